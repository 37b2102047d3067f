//! The polymorphic numeric value.
//!
//! A [`Num`] is a digit string with an attached base: a magnitude `N`,
//! a total digit width (leading zeros included) and a [`Radix`]. Equality
//! compares magnitudes only; the width carries the serialized shape of the
//! value through arithmetic, concatenation and base conversion. The
//! distinguished [`Num::Null`] value is the identity of concatenation and
//! addition and the absorbing element of multiplication.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, BitAnd, BitOr, BitXor, Bound, Div, Mul, Not, RangeBounds, Rem, Shl, Shr, Sub};

use num_bigint::BigUint;
use num_traits::{Pow, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EngineError, Result};

/// Digit alphabet shared by every base up to 16.
const ALPHABET: &[u8; 16] = b"0123456789ABCDEF";

/// The base and granularity of a numeric value.
///
/// The radix decides how digits group into *units*: one hex unit is a
/// byte (two digits), one binary unit is a bit, everything else counts
/// single digits. Indexing, slicing, iteration and substitution all work
/// in units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Radix {
    /// Base 2, bit-granular.
    Bin,
    /// Base 10, packed two digits per byte, always even width.
    Bcd,
    /// Base 16, byte-granular, always even width.
    Hex,
    /// Any base in `2..=16`, digit-granular.
    Base(u8),
}

impl Radix {
    /// Numeric base of this radix.
    pub fn base(self) -> u32 {
        match self {
            Radix::Bin => 2,
            Radix::Bcd => 10,
            Radix::Hex => 16,
            Radix::Base(b) => u32::from(b),
        }
    }

    /// Radix for a plain base value: 2 and 16 map to the bit- and
    /// byte-granular kinds, everything else stays digit-granular.
    pub fn from_base(base: u32) -> Result<Radix> {
        match base {
            2 => Ok(Radix::Bin),
            16 => Ok(Radix::Hex),
            b @ 3..=15 => Ok(Radix::Base(b as u8)),
            b => Err(EngineError::UnsupportedBase { base: b }),
        }
    }

    /// Digits per indexing unit (hex: one byte = two digits).
    pub fn unit_digits(self) -> usize {
        match self {
            Radix::Hex => 2,
            _ => 1,
        }
    }

    /// Digits one byte occupies in this base: the smallest `K` with
    /// `base^K >= 256`. Two for hex, eight for binary, three for decimal.
    pub fn digits_per_byte(self) -> usize {
        let base = self.base();
        let mut k = 1;
        let mut span: u64 = u64::from(base);
        while span < 256 {
            span *= u64::from(base);
            k += 1;
        }
        k
    }

    /// Exact bit width of one digit, if the base is a power of two.
    pub fn digit_bits(self) -> Option<usize> {
        match self.base() {
            2 => Some(1),
            4 => Some(2),
            8 => Some(3),
            16 => Some(4),
            _ => None,
        }
    }

    /// Width invariant of the radix: hex and BCD values always hold an
    /// even number of digits.
    fn normalize_width(self, width: usize) -> usize {
        match self {
            Radix::Hex | Radix::Bcd => width + (width & 1),
            _ => width,
        }
    }

    /// Parse a digit literal in this radix.
    ///
    /// Whitespace is ignored. A leading `<base>'` prefix overrides the
    /// radix (`"2'1010"` is binary regardless of the receiver); a trailing
    /// matching quote is stripped. Hex literals additionally accept `{...}`
    /// escapes converting the enclosed ASCII characters to their byte
    /// codes. An empty literal yields [`Num::Null`].
    ///
    /// Hex rejects an odd digit count; use [`Radix::parse_padded`] to
    /// left-pad instead.
    pub fn parse(self, literal: &str) -> Result<Num> {
        self.parse_inner(literal, false)
    }

    /// Like [`Radix::parse`], but left-pads to the radix width invariant
    /// instead of rejecting odd-length hex.
    pub fn parse_padded(self, literal: &str) -> Result<Num> {
        self.parse_inner(literal, true)
    }

    fn parse_inner(self, literal: &str, pad: bool) -> Result<Num> {
        let (radix, body) = split_base_prefix(self, literal)?;
        let mut digits: Vec<u8> = Vec::with_capacity(body.len());
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            if c == '{' && radix == Radix::Hex {
                // ASCII escape: every enclosed character becomes one byte.
                let mut closed = false;
                for esc in chars.by_ref() {
                    if esc == '}' {
                        closed = true;
                        break;
                    }
                    let code = u32::from(esc);
                    if code > 0xFF {
                        return Err(EngineError::InvalidDigit {
                            digit: esc,
                            base: 16,
                        });
                    }
                    digits.push((code >> 4) as u8);
                    digits.push((code & 0x0F) as u8);
                }
                if !closed {
                    return Err(EngineError::UnbalancedEscape {
                        literal: literal.to_string(),
                    });
                }
                continue;
            }
            if c == '}' {
                return Err(EngineError::UnbalancedEscape {
                    literal: literal.to_string(),
                });
            }
            let d = c.to_digit(16).ok_or(EngineError::InvalidDigit {
                digit: c,
                base: radix.base(),
            })?;
            if d >= radix.base() {
                return Err(EngineError::InvalidDigit {
                    digit: c,
                    base: radix.base(),
                });
            }
            digits.push(d as u8);
        }
        if digits.is_empty() {
            return Ok(Num::Null);
        }
        let target = radix.normalize_width(digits.len());
        if target != digits.len() {
            if radix == Radix::Hex && !pad {
                return Err(EngineError::OddHexDigits {
                    digits: digits.len(),
                });
            }
            // BCD (and padded hex) silently restore the even-width invariant.
            digits.insert(0, 0);
        }
        Ok(Num::from_digit_values(radix, &digits))
    }

    /// Build a value from a host integer. Hex and BCD results are
    /// left-padded to an even digit count.
    pub fn of(self, v: u64) -> Num {
        let mag = BigUint::from(v);
        let width = self.normalize_width(min_width(&mag, self.base()));
        Num::Val(Digits {
            mag,
            width,
            radix: self,
        })
    }

    /// Reinterpret raw bytes in this radix, preserving leading zero bytes.
    ///
    /// BCD unpacks two decimal digits per byte and rejects nibbles above
    /// nine; the other radices read the bytes as a big-endian magnitude.
    pub fn from_bytes(self, bytes: &[u8]) -> Result<Num> {
        if bytes.is_empty() {
            return Ok(Num::Null);
        }
        match self {
            Radix::Bcd => {
                let mut digits = Vec::with_capacity(bytes.len() * 2);
                for &b in bytes {
                    let hi = b >> 4;
                    let lo = b & 0x0F;
                    if hi > 9 || lo > 9 {
                        return Err(EngineError::NonBcdNibble { byte: b });
                    }
                    digits.push(hi);
                    digits.push(lo);
                }
                Ok(Num::from_digit_values(Radix::Bcd, &digits))
            }
            _ => {
                let mag = BigUint::from_bytes_be(bytes);
                let width = bytes.len() * self.digits_per_byte();
                Ok(Num::Val(Digits {
                    mag,
                    width,
                    radix: self,
                }))
            }
        }
    }
}

/// Scan an optional `<base>'` prefix; returns the effective radix and the
/// remaining literal body (with a trailing matching quote stripped).
fn split_base_prefix(fallback: Radix, literal: &str) -> Result<(Radix, &str)> {
    let s = literal.trim();
    let Some(tick) = s.find('\'') else {
        return Ok((fallback, s));
    };
    let head = &s[..tick];
    if head.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
        return Ok((fallback, s));
    }
    let base: u32 = head.parse().map_err(|_| EngineError::UnsupportedBase {
        base: 0,
    })?;
    let mut body = &s[tick + 1..];
    if let Some(stripped) = body.strip_suffix(&['\'', '"'][..]) {
        body = stripped;
    }
    Ok((Radix::from_base(base)?, body))
}

/// Minimal digit count of a magnitude in a base (one digit for zero).
fn min_width(mag: &BigUint, base: u32) -> usize {
    if mag.is_zero() {
        1
    } else {
        mag.to_radix_be(base).len()
    }
}

fn base_pow(base: u32, exp: usize) -> BigUint {
    Pow::pow(BigUint::from(base), exp as u32)
}

/// A concrete (non-NULL) digit string.
#[derive(Clone)]
pub struct Digits {
    mag: BigUint,
    width: usize,
    radix: Radix,
}

impl Digits {
    /// Magnitude of the value.
    pub fn magnitude(&self) -> &BigUint {
        &self.mag
    }

    /// Total digit count, leading zeros included.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Radix of the value.
    pub fn radix(&self) -> Radix {
        self.radix
    }
}

/// A numeric value: NULL or a digit string.
#[derive(Clone, Default)]
pub enum Num {
    /// The absorbing empty value: identity of concatenation and addition,
    /// zero of multiplication, length 0, equal only to itself.
    #[default]
    Null,
    /// A digit string with magnitude, width and radix.
    Val(Digits),
}

impl Num {
    /// Parse a hex literal. Shorthand for `Radix::Hex.parse`.
    pub fn hex(literal: &str) -> Result<Num> {
        Radix::Hex.parse(literal)
    }

    /// Parse a binary literal. Shorthand for `Radix::Bin.parse`.
    pub fn bin(literal: &str) -> Result<Num> {
        Radix::Bin.parse(literal)
    }

    /// Parse a BCD literal. Shorthand for `Radix::Bcd.parse`.
    pub fn bcd(literal: &str) -> Result<Num> {
        Radix::Bcd.parse(literal)
    }

    pub(crate) fn from_digit_values(radix: Radix, digits: &[u8]) -> Num {
        if digits.is_empty() {
            return Num::Null;
        }
        let mag = BigUint::from_radix_be(digits, radix.base()).unwrap_or_default();
        Num::Val(Digits {
            mag,
            width: digits.len(),
            radix,
        })
    }

    /// True for [`Num::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Num::Null)
    }

    /// Radix of the value, if any.
    pub fn radix(&self) -> Option<Radix> {
        match self {
            Num::Null => None,
            Num::Val(d) => Some(d.radix),
        }
    }

    /// Total digit count; 0 for NULL.
    pub fn width(&self) -> usize {
        match self {
            Num::Null => 0,
            Num::Val(d) => d.width,
        }
    }

    /// Length in units (bytes for hex, bits for binary, digits otherwise).
    pub fn len(&self) -> usize {
        match self {
            Num::Null => 0,
            Num::Val(d) => d.width / d.radix.unit_digits(),
        }
    }

    /// True when the value holds no units.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The digit values, most significant first, leading zeros included.
    pub fn digits(&self) -> Vec<u8> {
        match self {
            Num::Null => Vec::new(),
            Num::Val(d) => {
                let mut raw = d.mag.to_radix_be(d.radix.base());
                if raw.is_empty() {
                    raw.push(0);
                }
                if raw.len() < d.width {
                    let mut padded = vec![0u8; d.width - raw.len()];
                    padded.extend_from_slice(&raw);
                    padded
                } else {
                    raw
                }
            }
        }
    }

    /// Magnitude as `u64`, if it fits. NULL has no magnitude.
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Num::Null => None,
            Num::Val(d) => d.mag.to_u64(),
        }
    }

    /// Magnitude as `usize`, if it fits.
    pub fn to_usize(&self) -> Option<usize> {
        match self {
            Num::Null => None,
            Num::Val(d) => d.mag.to_usize(),
        }
    }

    /// Raw bytes of the value, leading zero bytes preserved.
    ///
    /// BCD packs two decimal digits per byte, high nibble first; the other
    /// radices emit the big-endian magnitude padded to the byte count the
    /// digit width spans.
    pub fn bytes(&self) -> Vec<u8> {
        let Num::Val(d) = self else {
            return Vec::new();
        };
        if d.radix == Radix::Bcd {
            let digits = self.digits();
            return digits
                .chunks(2)
                .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
                .collect();
        }
        let per_byte = d.radix.digits_per_byte();
        let nbytes = (d.width + per_byte - 1) / per_byte;
        let raw = d.mag.to_bytes_be();
        if raw.len() >= nbytes {
            raw
        } else {
            let mut out = vec![0u8; nbytes - raw.len()];
            out.extend_from_slice(&raw);
            out
        }
    }

    /// Byte accessor with bounds checking.
    ///
    /// Unlike unit indexing through [`Num::get`], reading past the end is
    /// an error; length-prefix callbacks rely on this to surface truncated
    /// input.
    pub fn byte(&self, index: usize) -> Result<u8> {
        let bytes = self.bytes();
        bytes
            .get(index)
            .copied()
            .ok_or(EngineError::ByteIndexOutOfRange {
                index,
                len: bytes.len(),
            })
    }

    /// The unit at `index`, or NULL past the end.
    pub fn get(&self, index: usize) -> Num {
        self.slice(index..index + 1)
    }

    /// A sub-value spanning the given unit range.
    ///
    /// Bounds are clamped to the value's length; an empty span is NULL.
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> Num {
        let Num::Val(d) = self else {
            return Num::Null;
        };
        let len = self.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        };
        let start = start.min(len);
        let end = end.min(len);
        if start >= end {
            return Num::Null;
        }
        let unit = d.radix.unit_digits();
        let digits = self.digits();
        Num::from_digit_values(d.radix, &digits[start * unit..end * unit])
    }

    /// Iterate unit-at-a-time. NULL iterates once, yielding NULL.
    pub fn iter(&self) -> Units<'_> {
        Units {
            num: self,
            index: 0,
            len: if self.is_null() { 1 } else { self.len() },
        }
    }

    /// Digit-string concatenation.
    ///
    /// NULL is the identity on either side. Operand bases must agree.
    pub fn concat(&self, other: &Num) -> Result<Num> {
        match (self, other) {
            (Num::Null, x) | (x, Num::Null) => Ok(x.clone()),
            (Num::Val(a), Num::Val(b)) => {
                if a.radix.base() != b.radix.base() {
                    return Err(EngineError::BaseMismatch {
                        left: a.radix.base(),
                        right: b.radix.base(),
                    });
                }
                Ok(Num::Val(Digits {
                    mag: &a.mag * base_pow(b.radix.base(), b.width) + &b.mag,
                    width: a.width + b.width,
                    radix: a.radix,
                }))
            }
        }
    }

    /// Left-pad with zero digits to at least `width` digits. Never
    /// truncates; NULL stays NULL.
    pub fn pad_width(&self, width: usize) -> Num {
        match self {
            Num::Null => Num::Null,
            Num::Val(d) => Num::Val(Digits {
                mag: d.mag.clone(),
                width: d.width.max(width),
                radix: d.radix,
            }),
        }
    }

    /// Convert to another radix, rescaling the leading-zero prefix.
    ///
    /// With `k` leading zero digits in the source and `K1`/`K2` digits per
    /// byte in the source/target base, the converted width preserves
    /// `k / K1` bytes of zero prefix and is padded to a multiple of `K2`.
    pub fn to_radix(&self, target: Radix) -> Num {
        let Num::Val(d) = self else {
            return Num::Null;
        };
        if d.radix == target {
            return self.clone();
        }
        if d.radix.base() == target.base() {
            // Same base, different granularity: re-kind, keeping digits.
            return Num::Val(Digits {
                mag: d.mag.clone(),
                width: target.normalize_width(d.width),
                radix: target,
            });
        }
        let k1 = d.radix.digits_per_byte();
        let k2 = target.digits_per_byte();
        let zero_digits = d.width - min_width(&d.mag, d.radix.base()).min(d.width);
        let zero_bytes = zero_digits / k1;
        let minimal = min_width(&d.mag, target.base());
        let mut width = minimal + zero_bytes * k2;
        width = (width + k2 - 1) / k2 * k2;
        width = target.normalize_width(width);
        Num::Val(Digits {
            mag: d.mag.clone(),
            width,
            radix: target,
        })
    }

    /// Begin a fluent digit/bit substitution. See [`crate::subst::Subst`].
    pub fn subst(&self, index: usize) -> crate::subst::Subst {
        crate::subst::Subst::units(self.clone(), index..index + 1)
    }

    /// Substitution over a unit range.
    pub fn subst_range<R: RangeBounds<usize>>(&self, range: R) -> crate::subst::Subst {
        let len = self.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        };
        crate::subst::Subst::units(self.clone(), start..end)
    }

    /// Result radix and width for a binary arithmetic operation: the
    /// larger base wins, the width pads to the wider operand.
    fn combine(a: &Digits, b: &Digits, mag: BigUint) -> Num {
        let radix = if b.radix.base() > a.radix.base() {
            b.radix
        } else {
            a.radix
        };
        let width = a
            .width
            .max(b.width)
            .max(min_width(&mag, radix.base()));
        Num::Val(Digits {
            mag,
            width: radix.normalize_width(width),
            radix,
        })
    }

}

impl Div for &Num {
    type Output = Num;

    /// Integer quotient. NULL divided by anything is NULL.
    ///
    /// # Panics
    ///
    /// Panics on division by zero (or by NULL), matching host integers.
    fn div(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, _) => Num::Null,
            (Num::Val(_), Num::Null) => panic!("division by NULL"),
            (Num::Val(a), Num::Val(b)) => Num::combine(a, b, &a.mag / &b.mag),
        }
    }
}

impl Rem for &Num {
    type Output = Num;

    /// Integer remainder, with the same NULL and zero rules as division.
    fn rem(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, _) => Num::Null,
            (Num::Val(_), Num::Null) => panic!("remainder by NULL"),
            (Num::Val(a), Num::Val(b)) => Num::combine(a, b, &a.mag % &b.mag),
        }
    }
}

/// Unit iterator over a [`Num`].
pub struct Units<'a> {
    num: &'a Num,
    index: usize,
    len: usize,
}

impl Iterator for Units<'_> {
    type Item = Num;

    fn next(&mut self) -> Option<Num> {
        if self.index >= self.len {
            return None;
        }
        let item = if self.num.is_null() {
            Num::Null
        } else {
            self.num.get(self.index)
        };
        self.index += 1;
        Some(item)
    }
}

impl<'a> IntoIterator for &'a Num {
    type Item = Num;
    type IntoIter = Units<'a>;

    fn into_iter(self) -> Units<'a> {
        self.iter()
    }
}

impl Add for &Num {
    type Output = Num;

    fn add(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, x) | (x, Num::Null) => x.clone(),
            (Num::Val(a), Num::Val(b)) => Num::combine(a, b, &a.mag + &b.mag),
        }
    }
}

impl Sub for &Num {
    type Output = Num;

    /// Subtraction clamps at zero; there are no negative values.
    fn sub(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, _) => Num::Null,
            (x, Num::Null) => x.clone(),
            (Num::Val(a), Num::Val(b)) => {
                let mag = if b.mag > a.mag {
                    BigUint::zero()
                } else {
                    &a.mag - &b.mag
                };
                Num::combine(a, b, mag)
            }
        }
    }
}

impl Mul for &Num {
    type Output = Num;

    fn mul(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, _) | (_, Num::Null) => Num::Null,
            (Num::Val(a), Num::Val(b)) => Num::combine(a, b, &a.mag * &b.mag),
        }
    }
}

impl BitAnd for &Num {
    type Output = Num;

    fn bitand(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, _) | (_, Num::Null) => Num::Null,
            (Num::Val(a), Num::Val(b)) => Num::combine(a, b, &a.mag & &b.mag),
        }
    }
}

impl BitOr for &Num {
    type Output = Num;

    fn bitor(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, x) | (x, Num::Null) => x.clone(),
            (Num::Val(a), Num::Val(b)) => Num::combine(a, b, &a.mag | &b.mag),
        }
    }
}

impl BitXor for &Num {
    type Output = Num;

    fn bitxor(self, rhs: &Num) -> Num {
        match (self, rhs) {
            (Num::Null, x) | (x, Num::Null) => x.clone(),
            (Num::Val(a), Num::Val(b)) => Num::combine(a, b, &a.mag ^ &b.mag),
        }
    }
}

impl Shl<usize> for &Num {
    type Output = Num;

    fn shl(self, rhs: usize) -> Num {
        match self {
            Num::Null => Num::Null,
            Num::Val(d) => {
                let mag = &d.mag << rhs;
                let width = d.width.max(min_width(&mag, d.radix.base()));
                Num::Val(Digits {
                    mag,
                    width: d.radix.normalize_width(width),
                    radix: d.radix,
                })
            }
        }
    }
}

impl Shr<usize> for &Num {
    type Output = Num;

    fn shr(self, rhs: usize) -> Num {
        match self {
            Num::Null => Num::Null,
            Num::Val(d) => Num::Val(Digits {
                mag: &d.mag >> rhs,
                width: d.width,
                radix: d.radix,
            }),
        }
    }
}

impl Not for &Num {
    type Output = Num;

    /// Digit complement within the value's width: `base^width - 1 - N`.
    fn not(self) -> Num {
        match self {
            Num::Null => Num::Null,
            Num::Val(d) => Num::Val(Digits {
                mag: base_pow(d.radix.base(), d.width) - 1u32 - &d.mag,
                width: d.width,
                radix: d.radix,
            }),
        }
    }
}

// Host integers on the right-hand side coerce into the receiver's base.
macro_rules! int_rhs_ops {
    ($($op:ident :: $method:ident),* $(,)?) => {$(
        impl $op<u64> for &Num {
            type Output = Num;

            fn $method(self, rhs: u64) -> Num {
                let radix = self.radix().unwrap_or(Radix::Hex);
                $op::$method(self, &radix.of(rhs))
            }
        }
    )*};
}

int_rhs_ops!(
    Add::add,
    Sub::sub,
    Mul::mul,
    BitAnd::bitand,
    BitOr::bitor,
    BitXor::bitxor,
);

impl PartialEq for Num {
    fn eq(&self, other: &Num) -> bool {
        match (self, other) {
            (Num::Null, Num::Null) => true,
            (Num::Val(a), Num::Val(b)) => a.mag == b.mag,
            _ => false,
        }
    }
}

impl Eq for Num {}

impl PartialEq<u64> for Num {
    fn eq(&self, other: &u64) -> bool {
        match self {
            Num::Null => false,
            Num::Val(d) => d.mag == BigUint::from(*other),
        }
    }
}

impl PartialEq<&str> for Num {
    /// Compares against a literal parsed in the receiver's radix
    /// (hex when the receiver is NULL). Unparseable literals compare
    /// unequal.
    fn eq(&self, other: &&str) -> bool {
        let radix = self.radix().unwrap_or(Radix::Hex);
        match radix.parse_padded(other) {
            Ok(parsed) => *self == parsed,
            Err(_) => false,
        }
    }
}

impl PartialOrd for Num {
    fn partial_cmp(&self, other: &Num) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Num {
    /// Magnitude ordering, cross-base legal; NULL sorts first.
    fn cmp(&self, other: &Num) -> Ordering {
        match (self, other) {
            (Num::Null, Num::Null) => Ordering::Equal,
            (Num::Null, Num::Val(_)) => Ordering::Less,
            (Num::Val(_), Num::Null) => Ordering::Greater,
            (Num::Val(a), Num::Val(b)) => a.mag.cmp(&b.mag),
        }
    }
}

impl Hash for Num {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Num::Null => state.write_u8(0),
            Num::Val(d) => {
                state.write_u8(1);
                d.mag.to_bytes_be().hash(state);
            }
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Null => f.write_str("NULL"),
            Num::Val(d) if d.radix == Radix::Hex => {
                let encoded = hex::encode_upper(self.bytes());
                for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}{}", pair[0] as char, pair[1] as char)?;
                }
                Ok(())
            }
            Num::Val(_) => {
                for d in self.digits() {
                    write!(f, "{}", ALPHABET[d as usize] as char)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Num {
    // Debug shows the base-prefixed literal form, the same shape serde emits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::Null => f.write_str("Num(NULL)"),
            Num::Val(d) => {
                write!(f, "Num({}'", d.radix.base())?;
                for v in self.digits() {
                    write!(f, "{}", ALPHABET[v as usize] as char)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl Serialize for Num {
    /// Serializes as the base-prefixed literal (`"16'8002"`); NULL is the
    /// empty string.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Num::Null => serializer.serialize_str(""),
            Num::Val(d) => {
                let mut out = format!("{}'", d.radix.base());
                for v in self.digits() {
                    out.push(ALPHABET[v as usize] as char);
                }
                serializer.serialize_str(&out)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Num {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Num, D::Error> {
        let s = String::deserialize(deserializer)?;
        Radix::Hex
            .parse_padded(&s)
            .map_err(serde::de::Error::custom)
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
    fn test_parse_ignores_whitespace() {
        assert_eq!(h("80 02 00 00"), h("80020000"));
        assert_eq!(h("80 02").len(), 2);
    }

    #[test]
    fn test_parse_empty_is_null() {
        assert!(Radix::Hex.parse("").unwrap().is_null());
        assert!(Radix::Hex.parse("  ").unwrap().is_null());
    }

    #[test]
    fn test_parse_odd_hex_rejected() {
        assert!(matches!(
            Radix::Hex.parse("123"),
            Err(EngineError::OddHexDigits { digits: 3 })
        ));
        assert_eq!(Radix::Hex.parse_padded("123").unwrap(), h("01 23"));
    }

    #[test]
    fn test_parse_base_prefix() {
        let n = Radix::Hex.parse("2'1010").unwrap();
        assert_eq!(n.radix(), Some(Radix::Bin));
        assert_eq!(n, 10u64);
        let quoted = Radix::Hex.parse("16'80'").unwrap();
        assert_eq!(quoted, 0x80u64);
    }

    #[test]
    fn test_parse_ascii_escape() {
        let n = h("{A}");
        assert_eq!(n, 0x41u64);
        assert_eq!(h("3F{ab}"), h("3F 61 62"));
        assert!(matches!(
            Radix::Hex.parse("{ab"),
            Err(EngineError::UnbalancedEscape { .. })
        ));
    }

    #[test]
    fn test_of_pads_hex_even() {
        let n = Radix::Hex.of(0x123);
        assert_eq!(n.width(), 4);
        assert_eq!(n.to_string(), "01 23");
        assert_eq!(Radix::Hex.of(0).to_string(), "00");
    }

    #[test]
    fn test_equality_ignores_width_and_base() {
        assert_eq!(h("00 01"), h("01"));
        assert_eq!(h("0A"), Radix::Bin.parse("1010").unwrap());
        assert_ne!(Num::Null, Radix::Hex.of(0));
        assert_eq!(Num::Null, Num::Null);
    }

    #[test]
    fn test_literal_interop() {
        assert_eq!(h("80 02"), 0x8002u64);
        assert_eq!(h("80 02"), "8002");
        assert!(h("02") < h("80"));
    }

    #[test]
    fn test_concat_identity_and_mismatch() {
        let x = h("12 34");
        assert_eq!(Num::Null.concat(&x).unwrap(), x);
        assert_eq!(x.concat(&Num::Null).unwrap(), x);
        let cat = h("12").concat(&h("34")).unwrap();
        assert_eq!(cat, x);
        assert_eq!(cat.len(), 2);
        let bin = Radix::Bin.parse("1").unwrap();
        assert!(matches!(
            x.concat(&bin),
            Err(EngineError::BaseMismatch { left: 16, right: 2 })
        ));
    }

    #[test]
    fn test_concat_preserves_leading_zeros() {
        let cat = h("00").concat(&h("00 07")).unwrap();
        assert_eq!(cat.width(), 6);
        assert_eq!(cat.to_string(), "00 00 07");
    }

    #[test]
    fn test_null_arithmetic_identities() {
        let x = h("0A");
        assert_eq!(&x + &Num::Null, x);
        assert_eq!(&Num::Null + &x, x);
        assert!((&Num::Null * &x).is_null());
        assert!((&x * &Num::Null).is_null());
    }

    #[test]
    fn test_subtraction_clamps_to_zero() {
        let small = h("01");
        let big = h("FF");
        assert_eq!(&small - &big, 0u64);
        assert_eq!(&big - &small, 0xFEu64);
    }

    #[test]
    fn test_arithmetic_width_padding() {
        let sum = &h("00 01") + &h("02");
        assert_eq!(sum.width(), 4);
        assert_eq!(sum.to_string(), "00 03");
    }

    #[test]
    fn test_integer_operands_coerce() {
        let n = h("0F");
        assert_eq!(&n + 1, 0x10u64);
        assert_eq!(&n - 0x0F, 0u64);
        assert_eq!(&n & 0x0C, 0x0Cu64);
        assert_eq!(&n | 0xF0, 0xFFu64);
    }

    #[test]
    fn test_mixed_base_result_takes_larger_base() {
        let bin = Radix::Bin.parse("0000 0011").unwrap();
        let sum = &bin + &h("01");
        assert_eq!(sum.radix(), Some(Radix::Hex));
        assert_eq!(sum, 4u64);
    }

    #[test]
    fn test_complement() {
        let n = h("0F");
        assert_eq!(!&n, 0xF0u64);
        let bin = Radix::Bin.parse("101").unwrap();
        assert_eq!(!&bin, 0b010u64);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(&h("01") << 4, 0x10u64);
        assert_eq!(&h("80") >> 7, 1u64);
        assert_eq!((&h("80") >> 7).width(), 2);
    }

    #[test]
    fn test_indexing_and_slicing() {
        let n = h("80 02 00 00");
        assert_eq!(n.get(0), 0x80u64);
        assert_eq!(n.get(1), 0x02u64);
        assert!(n.get(9).is_null());
        assert_eq!(n.slice(1..), h("02 00 00"));
        assert_eq!(n.slice(1..3), h("02 00"));
        assert!(n.slice(4..).is_null());
        assert_eq!(n.slice(..).width(), 8);
    }

    #[test]
    fn test_byte_accessor_errors_past_end() {
        let n = h("80 02");
        assert_eq!(n.byte(0).unwrap(), 0x80);
        assert!(matches!(
            n.byte(2),
            Err(EngineError::ByteIndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_iteration_units() {
        let n = h("A0 B0");
        let units: Vec<Num> = n.iter().collect();
        assert_eq!(units, vec![h("A0"), h("B0")]);
        let nulls: Vec<Num> = Num::Null.iter().collect();
        assert_eq!(nulls.len(), 1);
        assert!(nulls[0].is_null());
    }

    #[test]
    fn test_bin_iteration_is_bit_granular() {
        let bits: Vec<Num> = Radix::Bin.parse("101").unwrap().iter().collect();
        assert_eq!(bits.len(), 3);
        assert_eq!(bits[0], 1u64);
        assert_eq!(bits[1], 0u64);
    }

    #[test]
    fn test_base_closure_round_trip() {
        for literal in ["00 01", "8C C0 10", "00 00", "FF"] {
            let x = h(literal);
            let back = x.to_radix(Radix::Bin).to_radix(Radix::Hex);
            assert_eq!(back, x);
            assert_eq!(back.width(), x.width(), "width drift for {literal}");
        }
    }

    #[test]
    fn test_leading_zero_rescaling() {
        // One zero byte of prefix survives the hex -> bin -> hex journey.
        let x = h("00 01");
        let bin = x.to_radix(Radix::Bin);
        assert_eq!(bin.width(), 16);
        let hex = bin.to_radix(Radix::Hex);
        assert_eq!(hex.width(), 4);
    }

    #[test]
    fn test_bin_width_is_byte_multiple() {
        let n = h("8C C0 10").to_radix(Radix::Bin);
        assert_eq!(n.width(), 24);
    }

    #[test]
    fn test_bytes_round_trip() {
        let n = h("00 8C 10");
        assert_eq!(n.bytes(), vec![0x00, 0x8C, 0x10]);
        assert_eq!(Radix::Hex.from_bytes(&[0x00, 0x8C, 0x10]).unwrap(), n);
    }

    #[test]
    fn test_bcd_packing() {
        let n = Radix::Bcd.parse("1234").unwrap();
        assert_eq!(n.bytes(), vec![0x12, 0x34]);
        assert_eq!(Radix::Bcd.from_bytes(&[0x12, 0x34]).unwrap(), 1234u64);
        assert!(matches!(
            Radix::Bcd.from_bytes(&[0x1A]),
            Err(EngineError::NonBcdNibble { byte: 0x1A })
        ));
    }

    #[test]
    fn test_bcd_pads_to_even() {
        let n = Radix::Bcd.parse("123").unwrap();
        assert_eq!(n.width(), 4);
        assert_eq!(n.to_string(), "0123");
    }

    #[test]
    fn test_display() {
        assert_eq!(h("80 02").to_string(), "80 02");
        assert_eq!(Radix::Bin.parse("0101").unwrap().to_string(), "0101");
        assert_eq!(Num::Null.to_string(), "NULL");
    }

    #[test]
    fn test_serde_round_trip() {
        let n = h("00 8C");
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"16'008C\"");
        let back: Num = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
        assert_eq!(back.width(), n.width());

        let null: Num = serde_json::from_str("\"\"").unwrap();
        assert!(null.is_null());
    }

    #[test]
    fn test_division() {
        assert_eq!(&h("10") / &h("02"), 8u64);
        assert_eq!(&h("10") % &h("03"), 1u64);
        assert!((&Num::Null / &h("02")).is_null());
    }
}
