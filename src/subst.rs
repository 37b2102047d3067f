//! Fluent digit and bit substitution on numeric values.
//!
//! [`Num::subst`](crate::num::Num::subst) selects a unit (a byte for hex,
//! a bit for binary, a digit otherwise) or a unit range, optionally
//! narrows to a bit or bit range within that unit (1-based, MSB first),
//! and finally rewrites the selection with [`Subst::set`] or
//! [`Subst::update`]. Values are immutable; every substitution returns a
//! fresh [`Num`] with the same width and radix.

use std::ops::Range;

use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::error::{EngineError, Result};
use crate::num::{Num, Radix};

/// A pending substitution: the source value plus a selection.
#[derive(Clone)]
pub struct Subst {
    num: Num,
    span: Range<usize>,
    bits: Option<(usize, usize)>,
}

impl Subst {
    pub(crate) fn units(num: Num, span: Range<usize>) -> Subst {
        Subst {
            num,
            span,
            bits: None,
        }
    }

    /// Narrow the selection to one bit of the selected unit (1 = MSB).
    pub fn bit(self, k: usize) -> Subst {
        self.bits(k, k)
    }

    /// Narrow the selection to an inclusive bit range of the selected
    /// unit (1 = MSB).
    pub fn bits(mut self, from: usize, to: usize) -> Subst {
        self.bits = Some((from, to));
        self
    }

    /// Replace the selection with an integer value.
    pub fn set(self, v: u64) -> Result<Num> {
        self.apply(|_| BigUint::from(v))
    }

    /// Replace the selection with the result of `f`, which receives the
    /// current value of the selection.
    pub fn update<F: FnOnce(&Num) -> u64>(self, f: F) -> Result<Num> {
        self.apply(|cur| BigUint::from(f(cur)))
    }

    /// Replace a unit-range selection with another value's digits,
    /// left-padded with zeros to the span width.
    pub fn splice(self, v: &Num) -> Result<Num> {
        let radix = self.radix()?;
        let v = v.to_radix(radix);
        let digits = v.digits();
        self.apply(|_| {
            BigUint::from_radix_be(&digits, radix.base()).unwrap_or_default()
        })
    }

    fn radix(&self) -> Result<Radix> {
        self.num
            .radix()
            .ok_or(EngineError::UnitIndexOutOfRange { index: self.span.start, len: 0 })
    }

    fn apply<F: FnOnce(&Num) -> BigUint>(self, f: F) -> Result<Num> {
        let radix = self.radix()?;
        let len = self.num.len();
        if self.span.start >= len || self.span.end > len || self.span.is_empty() {
            return Err(EngineError::UnitIndexOutOfRange {
                index: self.span.start,
                len,
            });
        }
        let unit = radix.unit_digits();
        let mut digits = self.num.digits();
        let a = self.span.start * unit;
        let b = self.span.end * unit;

        match self.bits {
            None => {
                let current = Num::from_digit_values(radix, &digits[a..b]);
                let value = f(&current);
                let needed = if value == BigUint::default() {
                    1
                } else {
                    value.to_radix_be(radix.base()).len()
                };
                if needed > b - a {
                    return Err(EngineError::SubstDoesNotFit {
                        needed,
                        available: b - a,
                    });
                }
                let raw = value.to_radix_be(radix.base());
                for d in digits[a..b].iter_mut() {
                    *d = 0;
                }
                digits[b - raw.len()..b].copy_from_slice(&raw);
            }
            Some((from, to)) => {
                // Bit selection applies to exactly one unit of a
                // power-of-two base.
                if self.span.len() != 1 {
                    return Err(EngineError::InvalidPattern {
                        message: "bit substitution selects a single unit".to_string(),
                    });
                }
                let digit_bits = radix.digit_bits().ok_or(EngineError::NoBitWidth {
                    base: radix.base(),
                })?;
                let unit_bits = digit_bits * unit;
                if from < 1 || to < from || to > unit_bits {
                    return Err(EngineError::BitIndexOutOfRange {
                        index: if from < 1 { from } else { to },
                        width: unit_bits,
                    });
                }
                let current = unit_value(&digits[a..b], radix.base());
                let nbits = to - from + 1;
                let shift = unit_bits - to;
                let mask = ((1u64 << nbits) - 1) << shift;
                let selected = Radix::Bin.of((current & mask) >> shift);
                let value = f(&selected)
                    .to_u64()
                    .ok_or(EngineError::SubstDoesNotFit {
                        needed: 64,
                        available: nbits,
                    })?;
                if value >> nbits != 0 {
                    return Err(EngineError::SubstDoesNotFit {
                        needed: (64 - value.leading_zeros()) as usize,
                        available: nbits,
                    });
                }
                let merged = (current & !mask) | (value << shift);
                write_unit(&mut digits[a..b], radix.base(), merged);
            }
        }
        Ok(Num::from_digit_values(radix, &digits))
    }
}

/// Integer value of a single unit's digits.
fn unit_value(digits: &[u8], base: u32) -> u64 {
    digits
        .iter()
        .fold(0u64, |acc, &d| acc * u64::from(base) + u64::from(d))
}

/// Write an integer back into a single unit's digits, most significant
/// digit first.
fn write_unit(digits: &mut [u8], base: u32, mut value: u64) {
    for d in digits.iter_mut().rev() {
        *d = (value % u64::from(base)) as u8;
        value /= u64::from(base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn h(s: &str) -> Num {
        Radix::Hex.parse(s).unwrap()
    }

    #[test]
    fn test_replace_unit() {
        let n = h("80 02 00");
        assert_eq!(n.subst(1).set(0xFF).unwrap(), h("80 FF 00"));
        assert_eq!(n.subst(2).set(0x01).unwrap(), h("80 02 01"));
    }

    #[test]
    fn test_replace_unit_out_of_range() {
        let n = h("80");
        assert!(matches!(
            n.subst(3).set(0),
            Err(EngineError::UnitIndexOutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_replace_range() {
        let n = h("11 22 33 44");
        assert_eq!(n.subst_range(1..3).set(0xAABB).unwrap(), h("11 AA BB 44"));
        // Narrow values zero-pad on the left.
        assert_eq!(n.subst_range(1..3).set(0x7).unwrap(), h("11 00 07 44"));
    }

    #[test]
    fn test_replace_value_too_wide() {
        let n = h("11 22");
        assert!(matches!(
            n.subst(0).set(0x1FF),
            Err(EngineError::SubstDoesNotFit { .. })
        ));
    }

    #[test]
    fn test_replace_bit_msb_first() {
        let n = h("80");
        // Bit 1 is the MSB of the byte.
        assert_eq!(n.subst(0).bit(1).set(0).unwrap(), h("00"));
        assert_eq!(n.subst(0).bit(8).set(1).unwrap(), h("81"));
    }

    #[test]
    fn test_replace_bit_range() {
        let n = h("00");
        // Bits 1..=2 of the byte: the BER class field.
        assert_eq!(n.subst(0).bits(1, 2).set(0b10).unwrap(), h("80"));
        assert_eq!(h("FF").subst(0).bits(4, 6).set(0).unwrap(), h("E3"));
    }

    #[test]
    fn test_bit_index_bounds() {
        let n = h("80");
        assert!(matches!(
            n.subst(0).bit(0).set(1),
            Err(EngineError::BitIndexOutOfRange { .. })
        ));
        assert!(matches!(
            n.subst(0).bit(9).set(1),
            Err(EngineError::BitIndexOutOfRange { index: 9, width: 8 })
        ));
    }

    #[test]
    fn test_bit_subst_on_bin_unit() {
        let n = Radix::Bin.parse("1010").unwrap();
        assert_eq!(n.subst(1).set(1).unwrap(), Radix::Bin.parse("1110").unwrap());
        // A binary unit is a single bit; bit 1 addresses it directly.
        assert_eq!(
            n.subst(0).bit(1).set(0).unwrap(),
            Radix::Bin.parse("0010").unwrap()
        );
    }

    #[test]
    fn test_bit_subst_rejected_for_decimal() {
        let n = Radix::Bcd.parse("12").unwrap();
        assert!(matches!(
            n.subst(0).bit(1).set(0),
            Err(EngineError::NoBitWidth { base: 10 })
        ));
    }

    #[test]
    fn test_update_receives_current_value() {
        let n = h("07");
        let doubled = n.subst(0).update(|cur| cur.to_u64().unwrap() * 2).unwrap();
        assert_eq!(doubled, h("0E"));
    }

    #[test]
    fn test_splice_range() {
        let n = h("11 22 33");
        let spliced = n.subst_range(0..2).splice(&h("AB CD")).unwrap();
        assert_eq!(spliced, h("AB CD 33"));
    }

    #[test]
    fn test_width_is_preserved() {
        let n = h("00 80");
        let out = n.subst(1).set(0x7F).unwrap();
        assert_eq!(out.width(), 4);
        assert_eq!(out.to_string(), "00 7F");
    }
}
