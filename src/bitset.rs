//! Named fixed-width bit patterns.
//!
//! A [`Bitset`] enumerates the meaningful values of a bit field: a
//! mapping from bit patterns of one declared width to symbolic names.
//! Used as a pattern it consumes exactly its width and matches any value;
//! the name table is for lookup and display.

use crate::error::{EngineError, Result};
use crate::num::{Num, Radix};
use crate::pattern::Match;

/// One value of a [`Bitset`].
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    bits: u64,
}

/// A finite mapping from bit patterns of a fixed width to names.
#[derive(Debug, Clone)]
pub struct Bitset {
    width: usize,
    entries: Vec<Entry>,
}

impl Bitset {
    /// A bitset over patterns of `width` bits.
    pub fn new(width: usize) -> Bitset {
        Bitset {
            width,
            entries: Vec::new(),
        }
    }

    /// Declared width in bits.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Name a bit pattern, given as an integer or a binary digit string.
    pub fn set(&mut self, name: &str, bits: impl Into<BitInit>) -> Result<&mut Bitset> {
        let value = match bits.into() {
            BitInit::Int(v) => v,
            BitInit::Text(s) => {
                Radix::Bin
                    .parse(&s)?
                    .to_u64()
                    .ok_or(EngineError::InvalidPattern {
                        message: format!("bit pattern {s:?} too wide"),
                    })?
            }
        };
        if self.width < 64 && value >> self.width != 0 {
            return Err(EngineError::InvalidPattern {
                message: format!(
                    "bit pattern {value:#b} wider than {} bit(s)",
                    self.width
                ),
            });
        }
        self.entries.push(Entry {
            name: name.to_string(),
            bits: value,
        });
        Ok(self)
    }

    /// The name attached to a value, if any.
    pub fn name_of(&self, value: &Num) -> Option<&str> {
        let v = value.to_u64()?;
        self.entries
            .iter()
            .find(|e| e.bits == v)
            .map(|e| e.name.as_str())
    }

    /// The bit pattern registered under a name.
    pub fn value_of(&self, name: &str) -> Option<Num> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| Radix::Bin.of(e.bits).pad_width(self.width))
    }

    /// Consume exactly the declared width; any value matches. Longer
    /// input is left in the rest.
    pub(crate) fn matches(&self, data: &Num) -> Result<Match> {
        if data.len() < self.width {
            return Ok(Match::failure(Num::Null));
        }
        Ok(Match::success(
            data.slice(..self.width),
            data.slice(self.width..),
        ))
    }
}

/// Integer or binary-string initializer for [`Bitset::set`].
pub enum BitInit {
    /// Integer bit pattern.
    Int(u64),
    /// Binary digit string (`"10"`).
    Text(String),
}

impl From<u64> for BitInit {
    fn from(v: u64) -> BitInit {
        BitInit::Int(v)
    }
}

impl From<i32> for BitInit {
    fn from(v: i32) -> BitInit {
        BitInit::Int(v.max(0) as u64)
    }
}

impl From<&str> for BitInit {
    fn from(s: &str) -> BitInit {
        BitInit::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ber_class() -> Bitset {
        let mut bs = Bitset::new(2);
        bs.set("UniversalClass", "00").unwrap();
        bs.set("ApplicationClass", "01").unwrap();
        bs.set("ContextSpecificClass", "10").unwrap();
        bs.set("PrivateClass", "11").unwrap();
        bs
    }

    #[test]
    fn test_name_lookup() {
        let bs = ber_class();
        assert_eq!(bs.name_of(&Radix::Bin.of(0b10)), Some("ContextSpecificClass"));
        assert_eq!(bs.name_of(&Radix::Bin.of(0b11)), Some("PrivateClass"));
    }

    #[test]
    fn test_value_lookup_is_padded() {
        let bs = ber_class();
        let v = bs.value_of("ApplicationClass").unwrap();
        assert_eq!(v.width(), 2);
        assert_eq!(v, 1u64);
    }

    #[test]
    fn test_too_wide_pattern_rejected() {
        let mut bs = Bitset::new(1);
        assert!(bs.set("Bad", "10").is_err());
    }

    #[test]
    fn test_match_consumes_declared_width_only() {
        let bs = ber_class();
        let data = Radix::Bin.parse("1100 0000").unwrap();
        let m = bs.matches(&data).unwrap();
        assert!(!m.fail);
        assert_eq!(m.value, 0b11u64);
        assert_eq!(m.rest.len(), 6);
    }

    #[test]
    fn test_short_input_fails() {
        let bs = ber_class();
        let m = bs.matches(&Radix::Bin.parse("1").unwrap()).unwrap();
        assert!(m.fail);
    }
}
