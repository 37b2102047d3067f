//! Bytetable - Declarative Tables for Binary Formats
//!
//! This library describes, parses and synthesizes structured
//! byte-oriented data: BER-TLV records, smart-card APDUs and ATRs,
//! bit-packed fields, and similar protocol shapes. A format is written
//! once as a [`Table`] of named fields, and the same declaration drives
//! both directions: matching raw bytes into a populated tree and
//! serializing the tree back into bytes.
//!
//! # Features
//!
//! - **Mixed-radix values**: the [`Num`] type keeps a digit string with
//!   its base, preserving leading zeros across arithmetic, concatenation
//!   and base conversion
//! - **Composable patterns**: fixed sections, literals, alternation,
//!   lazy remainder, prefix dispatch, and match-time callbacks for
//!   length-driven widths
//! - **Bindings**: fields derived from other fields (a Length field that
//!   always matches its Value), recomputed automatically on mutation,
//!   with cycle detection
//! - **Composites**: repeated sequences, any-order sets dispatched by
//!   prefix, and bitmaps overlaying a bit stream
//!
//! # Quick Start
//!
//! ```
//! use bytetable::{Binding, Num, Pattern, Radix, Shape, Table};
//!
//! # fn main() -> bytetable::Result<()> {
//! // A record whose length byte announces the value width.
//! let record = Table::new();
//! record
//!     .add(
//!         1,
//!         "Len",
//!         Binding::new("Value", |v| {
//!             let n = v.to_num()?;
//!             Ok(Radix::Hex.of(n.len() as u64))
//!         }),
//!     )?
//!     .add(
//!         Pattern::func(|rec, _| {
//!             let len = rec.get("Len")?.to_num()?;
//!             Ok(Shape::Units(len.to_usize().unwrap_or(0)))
//!         }),
//!         "Value",
//!         "",
//!     )?;
//!
//! // Parsing and synthesis use the same declaration.
//! let parsed = record.parse(&Num::hex("02 3F 00")?)?;
//! assert_eq!(parsed.get("Value")?, Num::hex("3F 00")?);
//!
//! let built = record.with_value("Value", Num::hex("11 22 33")?)?;
//! assert_eq!(built.value()?, Num::hex("03 11 22 33")?);
//! # Ok(())
//! # }
//! ```
//!
//! # Format Support
//!
//! The [`tlv`] module carries ready-made templates for the classic
//! smart-card shapes: plain TLV/LV/TL records, the recursive BER TLV
//! (multi-byte tags, long-form lengths, constructed values), repeated
//! lists, and Data Object List helpers.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod bitset;
pub mod error;
pub mod field;
pub mod num;
pub mod pattern;
pub mod repeat;
pub mod subst;
pub mod table;
pub mod tlv;

pub use bitset::Bitset;
pub use error::{EngineError, Result};
pub use field::{Binding, Field, FieldInit, Source};
pub use num::{Num, Radix};
pub use pattern::{IntoPattern, Match, Pattern, Shape, Value};
pub use repeat::{List, Repeater};
pub use subst::Subst;
pub use table::Table;

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_round_trip_through_public_api() {
        let data = Num::hex("80 02 3F 00").unwrap();
        let parsed = tlv::tlv().unwrap().parse(&data).unwrap();
        assert_eq!(parsed.value().unwrap(), data);
    }
}
