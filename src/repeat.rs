//! Bounded repetition and ordered collections of matched values.
//!
//! A [`Repeater`] matches its sub-table as many times as the data allows
//! (within `min..=max`) and yields a [`List`] of the populated copies.
//! Lists are shared handles like tables: popping an element from a list
//! stored in a field invalidates the bound caches of the owning tree, so
//! a length field recomputes on its next read.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::num::{Num, Radix};
use crate::pattern::{Match, Pattern, Value};
use crate::table::{NodeWeak, Table};

/// Bounded repetition of a table.
#[derive(Clone)]
pub struct Repeater {
    proto: Table,
    min: usize,
    max: Option<usize>,
}

impl Repeater {
    /// Repeat `table` one or more times.
    pub fn new(table: Table) -> Repeater {
        Repeater {
            proto: table,
            min: 1,
            max: None,
        }
    }

    /// Repeat `table` with explicit occurrence bounds (`None` = unbounded).
    pub fn bounded(table: Table, min: usize, max: Option<usize>) -> Repeater {
        Repeater {
            proto: table,
            min,
            max,
        }
    }

    pub(crate) fn proto(&self) -> &Table {
        &self.proto
    }

    pub(crate) fn clone_with_proto(&self, proto: Table) -> Repeater {
        Repeater {
            proto,
            min: self.min,
            max: self.max,
        }
    }

    /// Match the sub-table repeatedly, stopping at the first failure.
    /// Fewer than `min` occurrences fail the repeater as a whole.
    pub(crate) fn matches(&self, data: &Num) -> Result<Match> {
        let mut rest = data.clone();
        let mut consumed = 0usize;
        let mut items: Vec<Value> = Vec::new();
        loop {
            if let Some(max) = self.max {
                if items.len() >= max {
                    break;
                }
            }
            if rest.is_empty() {
                break;
            }
            let m = self.proto.matches(&rest)?;
            if m.fail {
                break;
            }
            consumed += rest.len() - m.rest.len();
            items.push(m.value);
            rest = m.rest;
        }
        if items.len() < self.min {
            return Ok(Match::failure(data.slice(..consumed)));
        }
        Ok(Match::success(List::new(items), rest))
    }
}

impl fmt::Debug for Repeater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Repeater(min={}, max={:?})", self.min, self.max)
    }
}

struct ListNode {
    items: Vec<Value>,
    parent: NodeWeak,
}

/// An ordered collection of matched values that concatenates like a
/// number. Cloning clones the handle; mutation is visible through every
/// clone and invalidates the owning tree's bound caches.
#[derive(Clone)]
pub struct List {
    inner: Rc<RefCell<ListNode>>,
}

impl List {
    /// A list over the given values.
    pub fn new(items: Vec<Value>) -> List {
        List {
            inner: Rc::new(RefCell::new(ListNode {
                items,
                parent: NodeWeak::new(),
            })),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    /// True when the list holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element at `index`, if present.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.borrow().items.get(index).cloned()
    }

    /// Snapshot of the elements.
    pub fn items(&self) -> Vec<Value> {
        self.inner.borrow().items.clone()
    }

    /// Append an element; bound caches in the owning tree recompute on
    /// their next read.
    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        let parent = self.inner.borrow().parent.clone();
        if let Some(node) = parent.upgrade() {
            Table::adopt_into(&node, &value);
        }
        self.inner.borrow_mut().items.push(value);
        Table::invalidate_from_weak(&parent);
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        let popped = self.inner.borrow_mut().items.pop();
        if popped.is_some() {
            let parent = self.inner.borrow().parent.clone();
            Table::invalidate_from_weak(&parent);
        }
        popped
    }

    /// Synthesize: hex concatenation of every element's value.
    pub fn value(&self) -> Result<Num> {
        let mut acc = Num::Null;
        for item in self.items() {
            let num = item.to_num()?;
            if num.is_null() {
                continue;
            }
            let num = if num.radix() != Some(Radix::Hex) {
                num.to_radix(Radix::Hex)
            } else {
                num
            };
            acc = acc.concat(&num)?;
        }
        Ok(acc)
    }

    /// Match data by applying each element as a pattern, in order.
    pub(crate) fn matches(&self, data: &Num) -> Result<Match> {
        let mut rest = data.clone();
        let mut consumed = 0usize;
        let mut matched: Vec<Value> = Vec::new();
        for item in self.items() {
            let m = match &item {
                Value::Table(t) => t.matches(&rest)?,
                Value::Num(n) => Pattern::Literal(n.clone()).matches(&rest, None)?,
                Value::List(l) => l.matches(&rest)?,
            };
            if m.fail {
                return Ok(Match::failure(data.slice(..consumed)));
            }
            consumed += rest.len() - m.rest.len();
            matched.push(m.value);
            rest = m.rest;
        }
        Ok(Match::success(List::new(matched), rest))
    }

    pub(crate) fn items_snapshot(&self) -> Vec<Value> {
        self.items()
    }

    pub(crate) fn from_parts(items: Vec<Value>, parent: NodeWeak) -> List {
        List {
            inner: Rc::new(RefCell::new(ListNode { items, parent })),
        }
    }

    pub(crate) fn set_parent_weak(&self, parent: NodeWeak) {
        self.inner.borrow_mut().parent = parent;
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> List {
        List::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items().iter()).finish()
    }
}

impl PartialEq for List {
    /// Lists compare by their synthesized values.
    fn eq(&self, other: &List) -> bool {
        matches!((self.value(), other.value()), (Ok(a), Ok(b)) if a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::num::Radix;
    use pretty_assertions::assert_eq;

    fn h(s: &str) -> Num {
        Radix::Hex.parse(s).unwrap()
    }

    fn pair_table() -> Table {
        let t = Table::new();
        t.add(1, "Tag", "00").unwrap().add(1, "Val", "00").unwrap();
        t
    }

    #[test]
    fn test_repeater_collects_occurrences() {
        let rep = Repeater::new(pair_table());
        let m = rep.matches(&h("A1 01 A2 02 A3 03")).unwrap();
        assert!(!m.fail);
        let list = m.value.as_list().unwrap().clone();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(1).unwrap().as_table().unwrap().get("Tag").unwrap(), h("A2"));
        assert!(m.rest.is_null());
    }

    #[test]
    fn test_repeater_stops_at_first_failure() {
        let rep = Repeater::new(pair_table());
        // Odd trailing byte: two pairs match, the last byte is left over.
        let m = rep.matches(&h("A1 01 A2 02 FF")).unwrap();
        assert!(!m.fail);
        assert_eq!(m.value.as_list().unwrap().len(), 2);
        assert_eq!(m.rest, h("FF"));
    }

    #[test]
    fn test_repeater_min_bound() {
        let rep = Repeater::bounded(pair_table(), 2, None);
        assert!(rep.matches(&h("A1 01")).unwrap().fail);
        assert!(!rep.matches(&h("A1 01 A2 02")).unwrap().fail);
    }

    #[test]
    fn test_repeater_max_bound() {
        let rep = Repeater::bounded(pair_table(), 1, Some(2));
        let m = rep.matches(&h("A1 01 A2 02 A3 03")).unwrap();
        assert_eq!(m.value.as_list().unwrap().len(), 2);
        assert_eq!(m.rest, h("A3 03"));
    }

    #[test]
    fn test_list_synthesizes_as_hex() {
        let list = List::new(vec![Value::Num(h("82 01")), Value::Num(h("10"))]);
        assert_eq!(list.value().unwrap(), h("82 01 10"));
    }

    #[test]
    fn test_empty_list_is_null() {
        assert!(List::new(Vec::new()).value().unwrap().is_null());
    }

    #[test]
    fn test_list_matches_elements_in_order() {
        let list = List::new(vec![Value::Num(h("A1")), Value::Num(h("B2"))]);
        let m = list.matches(&h("A1 B2 C3")).unwrap();
        assert!(!m.fail);
        assert_eq!(m.rest, h("C3"));
        assert!(list.matches(&h("B2 A1")).unwrap().fail);
    }

    #[test]
    fn test_push_pop() {
        let list = List::new(vec![Value::Num(h("01"))]);
        list.push(Value::Num(h("02")));
        assert_eq!(list.value().unwrap(), h("01 02"));
        let popped = list.pop().unwrap();
        assert_eq!(popped, h("02"));
        assert_eq!(list.value().unwrap(), h("01"));
    }
}
