//! The pattern engine.
//!
//! A [`Pattern`] describes how many units of input a field consumes.
//! Matching a pattern against a value yields a [`Match`]: the consumed
//! value, the unconsumed rest, and a failure flag. Patterns form a closed
//! sum; dynamic behavior (length fields controlling value widths) goes
//! through [`Pattern::Func`], whose callback inspects the partially
//! populated table and returns a [`Shape`] describing what to match next.

use std::fmt;
use std::rc::Rc;

use crate::bitset::Bitset;
use crate::error::{EngineError, Result};
use crate::num::{Num, Radix};
use crate::repeat::{List, Repeater};
use crate::table::Table;

/// What a pattern callback resolved to at match time.
pub enum Shape {
    /// Consume exactly this many units.
    Units(usize),
    /// Match this literal value.
    Lit(Num),
    /// Consume everything remaining.
    Rest,
    /// Match a full pattern.
    Pat(Pattern),
}

impl Shape {
    fn into_pattern(self) -> Pattern {
        match self {
            Shape::Units(n) => Pattern::Section(n),
            Shape::Lit(v) => Pattern::Literal(v),
            Shape::Rest => Pattern::Any,
            Shape::Pat(p) => p,
        }
    }
}

/// Match-time callback: receives the containing table copy (fields
/// matched so far are populated) and the remaining data.
pub type PatternFn = Rc<dyn Fn(&Table, &Num) -> Result<Shape>>;

/// A matcher over a unit stream.
#[derive(Clone)]
pub enum Pattern {
    /// Succeeds iff the data starts with the value; consumes its length.
    Literal(Num),
    /// Consumes exactly this many units (bytes in byte tables, bits in
    /// bitmaps); fails if fewer are available.
    Section(usize),
    /// Consumes all remaining data. Inside a table the engine backtracks,
    /// scanning split points from the right; one `Any` per table.
    Any,
    /// Tries alternatives left to right; first success wins.
    Alt(Vec<Pattern>),
    /// Resolved by a callback at match time.
    Func(PatternFn),
    /// Requires the prefix, then matches the inner pattern against the
    /// whole data again (the prefix is re-consumed).
    Prefixed(Num, Box<Pattern>),
    /// A nested table; matching populates a fresh copy.
    Table(Table),
    /// Bounded repetition of a table.
    Repeat(Repeater),
    /// A named fixed-width bit pattern.
    Bitset(Bitset),
    /// Applies the inner pattern to exactly the first `size` units; the
    /// rest continues after the window regardless of what the inner
    /// match left over.
    Window {
        /// Window width in units.
        size: usize,
        /// Pattern applied inside the window.
        inner: Box<Pattern>,
    },
}

impl Pattern {
    /// Wrap a match-time callback.
    pub fn func<F>(f: F) -> Pattern
    where
        F: Fn(&Table, &Num) -> Result<Shape> + 'static,
    {
        Pattern::Func(Rc::new(f))
    }

    /// Match this pattern against `data`. `ctx` is the containing table,
    /// required by callback patterns.
    pub fn matches(&self, data: &Num, ctx: Option<&Table>) -> Result<Match> {
        match self {
            Pattern::Literal(v) => {
                let v = align(v, data);
                let n = v.len();
                if data.len() < n {
                    return Ok(Match::failure(Num::Null));
                }
                let head = data.slice(..n);
                if head == v {
                    Ok(Match::success(head, data.slice(n..)))
                } else {
                    Ok(Match::failure(Num::Null))
                }
            }
            Pattern::Section(k) => {
                if data.len() < *k {
                    return Ok(Match::failure(Num::Null));
                }
                Ok(Match::success(data.slice(..*k), data.slice(*k..)))
            }
            Pattern::Any => Ok(Match::success(data.clone(), Num::Null)),
            Pattern::Alt(alternatives) => {
                let mut progress = Value::Num(Num::Null);
                for p in alternatives {
                    let m = p.matches(data, ctx)?;
                    if !m.fail {
                        return Ok(m);
                    }
                    if m.value.unit_len() > progress.unit_len() {
                        progress = m.value;
                    }
                }
                Ok(Match {
                    value: progress,
                    rest: Num::Null,
                    fail: true,
                })
            }
            Pattern::Func(f) => {
                let table = ctx.ok_or_else(|| EngineError::InvalidPattern {
                    message: "callback pattern outside a table".to_string(),
                })?;
                let shape = f(table, data)?;
                shape.into_pattern().matches(data, ctx)
            }
            Pattern::Prefixed(prefix, inner) => {
                let prefix = align(prefix, data);
                let n = prefix.len();
                if data.len() < n || data.slice(..n) != prefix {
                    return Ok(Match::failure(Num::Null));
                }
                // The prefix is part of the payload: the inner pattern
                // starts over from the beginning of the data.
                inner.matches(data, ctx)
            }
            Pattern::Table(t) => t.matches(data),
            Pattern::Repeat(r) => r.matches(data),
            Pattern::Bitset(b) => b.matches(data),
            Pattern::Window { size, inner } => {
                if data.len() < *size {
                    return Ok(Match::failure(Num::Null));
                }
                let m = inner.matches(&data.slice(..*size), ctx)?;
                if m.fail {
                    return Ok(m);
                }
                Ok(Match {
                    value: m.value,
                    rest: data.slice(*size..),
                    fail: false,
                })
            }
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(v) => write!(f, "Literal({v:?})"),
            Pattern::Section(k) => write!(f, "Section({k})"),
            Pattern::Any => f.write_str("Any"),
            Pattern::Alt(ps) => f.debug_tuple("Alt").field(ps).finish(),
            Pattern::Func(_) => f.write_str("Func(..)"),
            Pattern::Prefixed(p, inner) => write!(f, "Prefixed({p:?}, {inner:?})"),
            Pattern::Table(_) => f.write_str("Table(..)"),
            Pattern::Repeat(_) => f.write_str("Repeat(..)"),
            Pattern::Bitset(b) => write!(f, "Bitset(width={})", b.width()),
            Pattern::Window { size, inner } => write!(f, "Window({size}, {inner:?})"),
        }
    }
}

/// Convert the literal to the radix of the data it is matched against,
/// so unit counts line up.
fn align(v: &Num, data: &Num) -> Num {
    match (v.radix(), data.radix()) {
        (Some(a), Some(b)) if a != b => v.to_radix(b),
        _ => v.clone(),
    }
}

/// A matched or synthesized value: a number, a populated table, or a
/// list of matched tables.
#[derive(Clone, Debug)]
pub enum Value {
    /// A plain numeric value.
    Num(Num),
    /// A populated table (nested match result).
    Table(Table),
    /// A list of matched values.
    List(List),
}

impl Value {
    /// Reduce to a number: tables and lists synthesize.
    pub fn to_num(&self) -> Result<Num> {
        match self {
            Value::Num(n) => Ok(n.clone()),
            Value::Table(t) => t.value(),
            Value::List(l) => l.value(),
        }
    }

    /// Borrow the numeric value, if this is one.
    pub fn as_num(&self) -> Option<&Num> {
        match self {
            Value::Num(n) => Some(n),
            _ => None,
        }
    }

    /// Borrow the table, if this is one.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Borrow the list, if this is one.
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// True for a NULL numeric value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Num(Num::Null))
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Table(_) => "table",
            Value::List(_) => "list",
        }
    }

    /// Unit length of the underlying number, 0 when synthesis fails.
    pub(crate) fn unit_len(&self) -> usize {
        self.to_num().map(|n| n.len()).unwrap_or(0)
    }
}

impl From<Num> for Value {
    fn from(n: Num) -> Value {
        Value::Num(n)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Value {
        Value::Table(t)
    }
}

impl From<List> for Value {
    fn from(l: List) -> Value {
        Value::List(l)
    }
}

impl PartialEq for Value {
    /// Values compare by their synthesized numbers; anything that fails
    /// to synthesize compares unequal.
    fn eq(&self, other: &Value) -> bool {
        match (self.to_num(), other.to_num()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq<Num> for Value {
    fn eq(&self, other: &Num) -> bool {
        matches!(self.to_num(), Ok(n) if n == *other)
    }
}

impl PartialEq<u64> for Value {
    fn eq(&self, other: &u64) -> bool {
        matches!(self.to_num(), Ok(n) if n == *other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        matches!(self.to_num(), Ok(n) if n == *other)
    }
}

/// Result of matching a pattern against data.
#[derive(Clone, Debug)]
pub struct Match {
    /// The consumed value; on failure, the deepest non-failing
    /// intermediate value (for position reporting).
    pub value: Value,
    /// The unconsumed suffix; NULL when the data was exhausted.
    pub rest: Num,
    /// True when the pattern made no progress.
    pub fail: bool,
}

impl Match {
    /// A successful match.
    pub fn success(value: impl Into<Value>, rest: Num) -> Match {
        Match {
            value: value.into(),
            rest,
            fail: false,
        }
    }

    /// A failed match carrying the progress made before diverging.
    pub fn failure(progress: impl Into<Value>) -> Match {
        Match {
            value: progress.into(),
            rest: Num::Null,
            fail: true,
        }
    }
}

/// Conversion of the polymorphic `add` pattern argument.
///
/// Integers become sections, strings and numbers become literals parsed
/// in the table's radix, tables, repeaters and bitsets embed themselves.
pub trait IntoPattern {
    /// Resolve into a concrete pattern for a table of the given radix.
    fn into_pattern(self, radix: Radix) -> Result<Pattern>;
}

impl IntoPattern for Pattern {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        Ok(self)
    }
}

impl IntoPattern for usize {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        Ok(Pattern::Section(self))
    }
}

impl IntoPattern for u32 {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        Ok(Pattern::Section(self as usize))
    }
}

impl IntoPattern for i32 {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        usize::try_from(self)
            .map(Pattern::Section)
            .map_err(|_| EngineError::InvalidPattern {
                message: format!("negative section size {self}"),
            })
    }
}

impl IntoPattern for &str {
    fn into_pattern(self, radix: Radix) -> Result<Pattern> {
        Ok(Pattern::Literal(radix.parse_padded(self)?))
    }
}

impl IntoPattern for Num {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        Ok(Pattern::Literal(self))
    }
}

impl IntoPattern for Table {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        Ok(Pattern::Table(self))
    }
}

impl IntoPattern for Repeater {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        Ok(Pattern::Repeat(self))
    }
}

impl IntoPattern for Bitset {
    fn into_pattern(self, _radix: Radix) -> Result<Pattern> {
        Ok(Pattern::Bitset(self))
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
    fn test_literal_consumes_own_length() {
        let p = Pattern::Literal(h("80"));
        let m = p.matches(&h("80 02 00"), None).unwrap();
        assert!(!m.fail);
        assert_eq!(m.value, h("80"));
        assert_eq!(m.rest, h("02 00"));
    }

    #[test]
    fn test_literal_mismatch_fails() {
        let p = Pattern::Literal(h("80"));
        let m = p.matches(&h("7F 02"), None).unwrap();
        assert!(m.fail);
    }

    #[test]
    fn test_literal_short_data_fails() {
        let p = Pattern::Literal(h("80 02"));
        assert!(p.matches(&h("80"), None).unwrap().fail);
    }

    #[test]
    fn test_section_counts_units() {
        let p = Pattern::Section(2);
        let m = p.matches(&h("11 22 33"), None).unwrap();
        assert_eq!(m.value, h("11 22"));
        assert_eq!(m.rest, h("33"));
        assert!(p.matches(&h("11"), None).unwrap().fail);
    }

    #[test]
    fn test_section_exhausts_to_null_rest() {
        let p = Pattern::Section(1);
        let m = p.matches(&h("11"), None).unwrap();
        assert!(m.rest.is_null());
    }

    #[test]
    fn test_any_takes_everything() {
        let m = Pattern::Any.matches(&h("11 22 33"), None).unwrap();
        assert_eq!(m.value, h("11 22 33"));
        assert!(m.rest.is_null());
    }

    #[test]
    fn test_alt_first_success_wins() {
        let p = Pattern::Alt(vec![
            Pattern::Literal(h("90 00")),
            Pattern::Literal(h("61")),
            Pattern::Section(2),
        ]);
        let m = p.matches(&h("61 0A"), None).unwrap();
        assert_eq!(m.value, h("61"));
        assert_eq!(m.rest, h("0A"));
    }

    #[test]
    fn test_alt_all_fail() {
        let p = Pattern::Alt(vec![Pattern::Literal(h("90")), Pattern::Literal(h("6A"))]);
        assert!(p.matches(&h("FF"), None).unwrap().fail);
    }

    #[test]
    fn test_prefixed_reconsumes_prefix() {
        let p = Pattern::Prefixed(h("5F"), Box::new(Pattern::Section(2)));
        let m = p.matches(&h("5F 2D 03"), None).unwrap();
        assert_eq!(m.value, h("5F 2D"));
        assert_eq!(m.rest, h("03"));
        assert!(p.matches(&h("6F 2D"), None).unwrap().fail);
    }

    #[test]
    fn test_window_bounds_inner_match() {
        let p = Pattern::Window {
            size: 2,
            inner: Box::new(Pattern::Any),
        };
        let m = p.matches(&h("11 22 33 44"), None).unwrap();
        assert_eq!(m.value, h("11 22"));
        assert_eq!(m.rest, h("33 44"));
    }

    #[test]
    fn test_func_requires_table() {
        let p = Pattern::func(|_, _| Ok(Shape::Units(1)));
        assert!(matches!(
            p.matches(&h("11"), None),
            Err(EngineError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_literal_aligns_radix() {
        // A hex literal matched against binary data converts first.
        let p = Pattern::Literal(h("A0"));
        let data = h("A0 55").to_radix(crate::num::Radix::Bin);
        let m = p.matches(&data, None).unwrap();
        assert!(!m.fail);
        assert_eq!(m.value.to_num().unwrap().len(), 8);
    }
}
