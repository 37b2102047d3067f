//! Declarative tables: ordered fields forming a composite pattern.
//!
//! A [`Table`] is built incrementally with [`Table::add`] and then used in
//! both directions: [`Table::parse`] matches raw data into a populated
//! copy (the prototype is never mutated), [`Table::value`] concatenates
//! the field values back into a byte sequence. Fields may derive their
//! values from other fields through [`Binding`]s; mutating any field
//! invalidates every bound cache in the tree, and the next read
//! recomputes.
//!
//! Three kinds share one structure: sequences match fields in order, sets
//! dispatch fields by prefix in any order, bitmaps overlay their fields
//! on a bit stream.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{EngineError, Result};
use crate::field::{Binding, Field, FieldInit, Source};
use crate::num::{Num, Radix};
use crate::pattern::{IntoPattern, Match, Pattern, Value};
use crate::repeat::List;

pub(crate) type NodeRef = Rc<RefCell<Node>>;
pub(crate) type NodeWeak = Weak<RefCell<Node>>;

/// Binding evaluation aborts when the stack is this deep and the same
/// binding is already on it.
const EVAL_DEPTH: usize = 10;

/// Names that collide with table accessors.
const RESERVED: &[&str] = &["", "value", "pattern", "fields", "parent", "rest"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Sequence,
    Set,
    Bitmap,
}

pub(crate) struct Node {
    kind: Kind,
    radix: Radix,
    fields: Vec<Field>,
    parent: NodeWeak,
    /// Binding evaluation stack; consulted at the root of the tree.
    eval: Vec<(usize, usize)>,
}

/// An ordered sequence of named fields, usable as a pattern and as a
/// value. Cloning a `Table` clones the handle, not the tree; use
/// [`Table::copy`] or [`Table::with_values`] for a deep copy.
#[derive(Clone)]
pub struct Table {
    node: NodeRef,
}

impl Table {
    fn with_kind(kind: Kind, radix: Radix) -> Table {
        Table {
            node: Rc::new(RefCell::new(Node {
                kind,
                radix,
                fields: Vec::new(),
                parent: Weak::new(),
                eval: Vec::new(),
            })),
        }
    }

    /// A sequential table over bytes (hex radix).
    pub fn new() -> Table {
        Table::with_kind(Kind::Sequence, Radix::Hex)
    }

    /// A sequential table over another radix.
    pub fn with_radix(radix: Radix) -> Table {
        Table::with_kind(Kind::Sequence, radix)
    }

    /// A table whose fields are dispatched by prefix, in any order.
    pub fn new_set() -> Table {
        Table::with_kind(Kind::Set, Radix::Hex)
    }

    /// A table whose fields are measured in bits.
    pub fn new_bitmap() -> Table {
        Table::with_kind(Kind::Bitmap, Radix::Bin)
    }

    /// The table's preferred radix (hex for byte tables, bin for
    /// bitmaps). Incoming data of another base is coerced to it.
    pub fn radix(&self) -> Radix {
        self.node.borrow().radix
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.node.borrow().fields.len()
    }

    /// True when no fields have been added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names, in order.
    pub fn names(&self) -> Vec<String> {
        self.node
            .borrow()
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    /// A copy of the first field with this name.
    pub fn field(&self, name: &str) -> Option<Field> {
        self.node
            .borrow()
            .fields
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }

    /// Append a field.
    ///
    /// `pattern` may be a unit count, a literal (string or number), a
    /// nested table, a repeater, a bitset, a callback built with
    /// [`Pattern::func`], or any [`Pattern`]. `default` may be a number,
    /// a text literal (parsed in the table's radix), a nested table, a
    /// [`Binding`], or a copied [`Field`].
    ///
    /// In a set, `pattern` is the dispatch prefix and the real matcher is
    /// derived from `default`. In a sequence, a table passed as `default`
    /// installs its own pattern. Returns the table for chaining.
    pub fn add<P, D>(&self, pattern: P, name: &str, default: D) -> Result<Table>
    where
        P: IntoPattern,
        D: Into<FieldInit>,
    {
        if RESERVED.contains(&name) {
            return Err(EngineError::ReservedName {
                name: name.to_string(),
            });
        }
        let radix = self.radix();
        let mut pattern = pattern.into_pattern(radix)?;
        let (value, binding) = match default.into() {
            FieldInit::Value(v) => (v, None),
            FieldInit::Text(s) => (Value::Num(radix.parse_padded(&s)?), None),
            FieldInit::Int(i) => (Value::Num(radix.of(i)), None),
            FieldInit::Bound(b) => (Value::Num(Num::Null), Some(b)),
            FieldInit::Copy(f) => (f.value, f.binding),
        };

        let kind = self.node.borrow().kind;
        if kind == Kind::Set {
            // The pattern argument is the dispatch prefix; the payload
            // matcher comes from the default value.
            let prefix = match pattern {
                Pattern::Literal(v) => v,
                other => {
                    return Err(EngineError::InvalidPattern {
                        message: format!("set prefix must be a literal, got {other:?}"),
                    })
                }
            };
            let inner = match &value {
                Value::Table(t) => Pattern::Table(t.clone()),
                Value::Num(n) => Pattern::Literal(n.clone()),
                Value::List(_) => {
                    return Err(EngineError::InvalidPattern {
                        message: "a list cannot be a set member".to_string(),
                    })
                }
            };
            pattern = Pattern::Prefixed(prefix, Box::new(inner));
        } else if let Value::Table(t) = &value {
            // A nested table installs its own pattern.
            pattern = Pattern::Table(t.clone());
        }

        self.adopt_value(&value);
        self.adopt_pattern(&pattern);
        self.node.borrow_mut().fields.push(Field {
            name: name.to_string(),
            pattern,
            value,
            binding,
        });
        Ok(self.clone())
    }

    /// Wire child tables in a value to this node.
    fn adopt_value(&self, value: &Value) {
        match value {
            Value::Table(t) => t.set_parent_weak(Rc::downgrade(&self.node)),
            Value::List(l) => {
                l.set_parent_weak(Rc::downgrade(&self.node));
                for item in l.items_snapshot() {
                    self.adopt_value(&item);
                }
            }
            Value::Num(_) => {}
        }
    }

    /// Wire prototype tables inside a pattern to this node.
    fn adopt_pattern(&self, pattern: &Pattern) {
        match pattern {
            Pattern::Table(t) => t.set_parent_weak(Rc::downgrade(&self.node)),
            Pattern::Prefixed(_, inner) | Pattern::Window { inner, .. } => {
                self.adopt_pattern(inner)
            }
            Pattern::Alt(ps) => {
                for p in ps {
                    self.adopt_pattern(p);
                }
            }
            Pattern::Repeat(r) => r.proto().set_parent_weak(Rc::downgrade(&self.node)),
            _ => {}
        }
    }

    /// The effective value of the first field with this name.
    ///
    /// Bindings fire on demand; the result is cached until the next
    /// mutation anywhere in the tree. Nested tables are returned by
    /// handle, so mutating them propagates.
    pub fn get(&self, name: &str) -> Result<Value> {
        let idx = self.index_of(name).ok_or_else(|| EngineError::NoSuchField {
            name: name.to_string(),
        })?;
        self.read_field(idx)
    }

    /// The effective values of every field with this name.
    pub fn get_all(&self, name: &str) -> Result<Vec<Value>> {
        let indices: Vec<usize> = {
            let node = self.node.borrow();
            node.fields
                .iter()
                .enumerate()
                .filter(|(_, f)| f.name == name)
                .map(|(i, _)| i)
                .collect()
        };
        if indices.is_empty() {
            return Err(EngineError::NoSuchField {
                name: name.to_string(),
            });
        }
        indices.into_iter().map(|i| self.read_field(i)).collect()
    }

    /// Breadth-first search for the first field with this name, here or
    /// in any nested table.
    pub fn find(&self, name: &str) -> Result<Value> {
        let mut queue = vec![self.clone()];
        let mut next = Vec::new();
        while !queue.is_empty() {
            for table in queue.drain(..) {
                if let Some(idx) = table.index_of(name) {
                    return table.read_field(idx);
                }
                let n = table.len();
                for i in 0..n {
                    let stored = table.node.borrow().fields[i].value.clone();
                    match stored {
                        Value::Table(t) => next.push(t),
                        Value::List(l) => {
                            for item in l.items_snapshot() {
                                if let Value::Table(t) = item {
                                    next.push(t);
                                }
                            }
                        }
                        Value::Num(_) => {}
                    }
                }
            }
            std::mem::swap(&mut queue, &mut next);
        }
        Err(EngineError::NoSuchField {
            name: name.to_string(),
        })
    }

    /// Assign a value to the first field with this name.
    ///
    /// Clears every bound-field cache in the root's subtree; bound
    /// siblings recompute on their next read.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.index_of(name).ok_or_else(|| EngineError::NoSuchField {
            name: name.to_string(),
        })?;
        let value = value.into();
        self.adopt_value(&value);
        self.node.borrow_mut().fields[idx].value = value;
        self.invalidate();
        Ok(())
    }

    /// Synthesize the table: concatenate the non-null effective values of
    /// every field in order. Nested tables and lists recurse; an empty
    /// table reduces to NULL. Bitmap fields are zero-padded to their
    /// declared bit widths.
    pub fn value(&self) -> Result<Num> {
        let (kind, radix, nfields) = {
            let node = self.node.borrow();
            (node.kind, node.radix, node.fields.len())
        };
        let mut acc = Num::Null;
        for i in 0..nfields {
            let v = self.read_field(i)?;
            let num = v.to_num()?;
            if num.is_null() {
                continue;
            }
            let mut num = if num.radix().map(|r| r.base()) != Some(radix.base()) {
                num.to_radix(radix)
            } else {
                num
            };
            if kind == Kind::Bitmap {
                let declared = {
                    let node = self.node.borrow();
                    declared_units(&node.fields[i].pattern)
                };
                if let Some(bits) = declared {
                    num = num.pad_width(bits);
                }
            }
            acc = acc.concat(&num)?;
        }
        Ok(acc)
    }

    /// Concatenate with another table, yielding a [`List`] of the two
    /// that synthesizes to their joined values.
    pub fn concat(&self, other: &Table) -> List {
        List::new(vec![
            Value::Table(self.clone()),
            Value::Table(other.clone()),
        ])
    }

    /// Match data against this table, the user-facing direction.
    ///
    /// Copies the prototype, runs the matcher, and returns the populated
    /// copy. Fails with [`EngineError::MatchFailure`] carrying the length
    /// of the longest successful prefix.
    pub fn parse(&self, data: &Num) -> Result<Table> {
        let m = self.matches(data)?;
        if m.fail {
            return Err(EngineError::MatchFailure {
                position: m.value.unit_len(),
            });
        }
        match m.value {
            Value::Table(t) => Ok(t),
            other => Err(EngineError::ValueKind {
                expected: "table",
                found: other.kind_name(),
            }),
        }
    }

    /// Match data against this table as a pattern: the prototype is
    /// deep-copied and the copy populated. A match that consumes zero
    /// units is a failure.
    pub fn matches(&self, data: &Num) -> Result<Match> {
        let copy = self.clone_subtree();
        copy.run_match(data)
    }

    fn run_match(&self, data: &Num) -> Result<Match> {
        let (kind, radix) = {
            let node = self.node.borrow();
            (node.kind, node.radix)
        };
        let incoming = data.radix();
        let data = if incoming.map(|r| r.base()) != Some(radix.base()) && !data.is_null() {
            data.to_radix(radix)
        } else {
            data.clone()
        };
        #[cfg(feature = "trace")]
        tracing::trace!(kind = ?kind, units = data.len(), "table match");
        let mut m = match kind {
            Kind::Sequence | Kind::Bitmap => self.match_sequence(&data)?,
            Kind::Set => self.match_set(&data)?,
        };
        if !m.fail && kind == Kind::Bitmap {
            // Residual bits convert back to the base the data came in.
            if let Some(r) = incoming {
                if r.base() != radix.base() {
                    m.rest = m.rest.to_radix(r);
                }
            }
        }
        Ok(m)
    }

    fn match_sequence(&self, data: &Num) -> Result<Match> {
        let nfields = self.len();
        let mut rest = data.clone();
        let mut consumed = 0usize;
        for i in 0..nfields {
            let pattern = self.node.borrow().fields[i].pattern.clone();
            if matches!(pattern, Pattern::Any) {
                return self.match_any_tail(i, data, consumed);
            }
            let m = pattern.matches(&rest, Some(self))?;
            if m.fail {
                let progress = consumed + m.value.unit_len();
                return Ok(Match::failure(data.slice(..progress)));
            }
            consumed += rest.len() - m.rest.len();
            self.store_matched(i, m.value);
            rest = m.rest;
        }
        if consumed == 0 {
            return Ok(Match::failure(Num::Null));
        }
        Ok(Match::success(self.clone(), rest))
    }

    /// Backtracking for the single `Any` field: split points are scanned
    /// from the right; the first split where every remaining field
    /// matches wins, and `Any` receives the prefix before it.
    fn match_any_tail(&self, any_idx: usize, data: &Num, offset: usize) -> Result<Match> {
        let nfields = self.len();
        for split in (offset..=data.len()).rev() {
            let mut rest = data.slice(split..);
            let mut saved: Vec<(usize, Value)> = Vec::new();
            let mut ok = true;
            for j in any_idx + 1..nfields {
                let pattern = self.node.borrow().fields[j].pattern.clone();
                if matches!(pattern, Pattern::Any) {
                    return Err(EngineError::InvalidPattern {
                        message: "a table supports a single any-remaining field".to_string(),
                    });
                }
                let m = pattern.matches(&rest, Some(self))?;
                if m.fail {
                    ok = false;
                    break;
                }
                saved.push((j, self.node.borrow().fields[j].value.clone()));
                self.store_matched(j, m.value);
                rest = m.rest;
            }
            if ok {
                self.store_matched(any_idx, Value::Num(data.slice(offset..split)));
                let consumed = data.len() - rest.len();
                if consumed == 0 {
                    return Ok(Match::failure(Num::Null));
                }
                return Ok(Match::success(self.clone(), rest));
            }
            // Roll the tail assignments back before trying an earlier
            // split point.
            for (j, old) in saved.into_iter().rev() {
                self.node.borrow_mut().fields[j].value = old;
            }
        }
        Ok(Match::failure(data.slice(..offset)))
    }

    /// Prefix dispatch: every remaining candidate is tried at the current
    /// position, first success wins and leaves the candidate list. Fields
    /// end up in match order. Remaining non-empty data that no candidate
    /// takes fails the set.
    fn match_set(&self, data: &Num) -> Result<Match> {
        let nfields = self.len();
        let mut rest = data.clone();
        let mut remaining: Vec<usize> = (0..nfields).collect();
        let mut order: Vec<usize> = Vec::new();
        while !rest.is_empty() {
            let mut hit = None;
            for (pos, &i) in remaining.iter().enumerate() {
                let pattern = self.node.borrow().fields[i].pattern.clone();
                let m = pattern.matches(&rest, Some(self))?;
                if !m.fail {
                    hit = Some((pos, i, m));
                    break;
                }
            }
            let Some((pos, i, m)) = hit else {
                let consumed = data.len() - rest.len();
                return Ok(Match::failure(data.slice(..consumed)));
            };
            remaining.remove(pos);
            order.push(i);
            self.store_matched(i, m.value);
            rest = m.rest;
        }
        let consumed = data.len() - rest.len();
        if consumed == 0 {
            return Ok(Match::failure(Num::Null));
        }
        order.extend(remaining);
        self.reorder(&order);
        Ok(Match::success(self.clone(), rest))
    }

    fn reorder(&self, order: &[usize]) {
        let mut node = self.node.borrow_mut();
        let mut old: Vec<Option<Field>> = node.fields.drain(..).map(Some).collect();
        for &i in order {
            if let Some(f) = old[i].take() {
                node.fields.push(f);
            }
        }
    }

    fn store_matched(&self, idx: usize, value: Value) {
        self.adopt_value(&value);
        self.node.borrow_mut().fields[idx].value = value;
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.node
            .borrow()
            .fields
            .iter()
            .position(|f| f.name == name)
    }

    /// Effective value of a field: the stored value, or the binding
    /// result (computed, coerced to the table radix and cached).
    fn read_field(&self, idx: usize) -> Result<Value> {
        let (value, binding, name) = {
            let node = self.node.borrow();
            let f = &node.fields[idx];
            (f.value.clone(), f.binding.clone(), f.name.clone())
        };
        if !value.is_null() || binding.is_none() {
            return Ok(value);
        }
        let binding = binding.expect("checked above");
        let root = self.root();
        let key = (Rc::as_ptr(&self.node) as usize, idx);
        {
            let mut root_node = root.node.borrow_mut();
            if root_node.eval.len() >= EVAL_DEPTH && root_node.eval.contains(&key) {
                root_node.eval.clear();
                return Err(EngineError::CircularBinding { name });
            }
            root_node.eval.push(key);
        }
        #[cfg(feature = "trace")]
        tracing::trace!(field = %name, "binding fires");
        let result = self.eval_binding(idx, &binding);
        root.node.borrow_mut().eval.pop();
        let num = result?;
        let radix = self.radix();
        let num = if num.radix().map(|r| r.base()) != Some(radix.base()) && !num.is_null() {
            num.to_radix(radix)
        } else {
            num
        };
        self.node.borrow_mut().fields[idx].value = Value::Num(num.clone());
        Ok(Value::Num(num))
    }

    fn eval_binding(&self, idx: usize, binding: &Binding) -> Result<Num> {
        let source = match &binding.source {
            Source::Field(name) => self.get(name)?,
            Source::Rest => {
                let radix = self.radix();
                let mut acc = Num::Null;
                for j in idx + 1..self.len() {
                    let num = self.read_field(j)?.to_num()?;
                    if num.is_null() {
                        continue;
                    }
                    let num = if num.radix().map(|r| r.base()) != Some(radix.base()) {
                        num.to_radix(radix)
                    } else {
                        num
                    };
                    acc = acc.concat(&num)?;
                }
                Value::Num(acc)
            }
        };
        (binding.func)(&source)
    }

    /// Clear every bound-field cache in the root's subtree.
    fn invalidate(&self) {
        let root = self.root();
        let mut stack = vec![root.node];
        while let Some(node) = stack.pop() {
            let mut n = node.borrow_mut();
            for f in n.fields.iter_mut() {
                if f.binding.is_some() {
                    f.value = Value::Num(Num::Null);
                }
                match &f.value {
                    Value::Table(t) => stack.push(t.node.clone()),
                    Value::List(l) => {
                        for item in l.items_snapshot() {
                            if let Value::Table(t) = item {
                                stack.push(t.node.clone());
                            }
                        }
                    }
                    Value::Num(_) => {}
                }
            }
        }
    }

    /// The root of the tree this table belongs to.
    pub fn root(&self) -> Table {
        let mut cur = self.node.clone();
        loop {
            let parent = cur.borrow().parent.upgrade();
            match parent {
                Some(p) => cur = p,
                None => return Table { node: cur },
            }
        }
    }

    /// Deep copy of the entire root tree; returns the new root.
    ///
    /// Parent links are rewired through an identity-keyed memo, so shared
    /// subtables stay shared inside the copy and the copy is fully
    /// isolated from the source.
    pub fn copy(&self) -> Table {
        self.root().clone_subtree()
    }

    /// Deep copy the whole root tree and assign values to named fields of
    /// this table's counterpart in the copy. Returns the new **root**.
    pub fn with_values<'a, I, V>(&self, assigns: I) -> Result<Table>
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Into<Value>,
    {
        let root = self.root();
        let mut memo = HashMap::new();
        let new_root = clone_node(&root.node, Weak::new(), &mut memo);
        // A table detached from its former tree (a stale parent link)
        // copies as its own root.
        let me = match memo.get(&(Rc::as_ptr(&self.node) as usize)) {
            Some(node) => Table { node: node.clone() },
            None => return self.clone_subtree().with_values(assigns),
        };
        for (name, v) in assigns {
            me.set(name, v.into())?;
        }
        Ok(Table { node: new_root })
    }

    /// Shorthand for [`Table::with_values`] with a single assignment.
    pub fn with_value(&self, name: &str, v: impl Into<Value>) -> Result<Table> {
        self.with_values([(name, v.into())])
    }

    pub(crate) fn clone_subtree(&self) -> Table {
        let mut memo = HashMap::new();
        Table {
            node: clone_node(&self.node, Weak::new(), &mut memo),
        }
    }

    pub(crate) fn set_parent_weak(&self, parent: NodeWeak) {
        self.node.borrow_mut().parent = parent;
    }

    /// Wire a value's child tables to an arbitrary node (list mutation).
    pub(crate) fn adopt_into(node: &NodeRef, value: &Value) {
        Table { node: node.clone() }.adopt_value(value);
    }

    pub(crate) fn invalidate_from_weak(parent: &NodeWeak) {
        if let Some(node) = parent.upgrade() {
            Table { node }.invalidate();
        }
    }
}

impl Default for Table {
    fn default() -> Table {
        Table::new()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node.borrow();
        let mut d = f.debug_struct("Table");
        d.field("kind", &node.kind);
        for field in &node.fields {
            d.field(&field.name, &field.value);
        }
        d.finish()
    }
}

/// Declared unit width of a bitmap field's pattern, if static.
fn declared_units(pattern: &Pattern) -> Option<usize> {
    match pattern {
        Pattern::Section(k) => Some(*k),
        Pattern::Bitset(b) => Some(b.width()),
        Pattern::Literal(v) => Some(v.len()),
        _ => None,
    }
}

fn clone_node(node: &NodeRef, parent: NodeWeak, memo: &mut HashMap<usize, NodeRef>) -> NodeRef {
    let key = Rc::as_ptr(node) as usize;
    if let Some(existing) = memo.get(&key) {
        return existing.clone();
    }
    let (kind, radix) = {
        let n = node.borrow();
        (n.kind, n.radix)
    };
    let new = Rc::new(RefCell::new(Node {
        kind,
        radix,
        fields: Vec::new(),
        parent,
        eval: Vec::new(),
    }));
    memo.insert(key, new.clone());
    let fields = node.borrow().fields.clone();
    for f in fields {
        let pattern = clone_pattern(&f.pattern, &new, memo);
        let value = clone_value(&f.value, &new, memo);
        new.borrow_mut().fields.push(Field {
            name: f.name,
            pattern,
            value,
            binding: f.binding,
        });
    }
    new
}

fn clone_pattern(pattern: &Pattern, parent: &NodeRef, memo: &mut HashMap<usize, NodeRef>) -> Pattern {
    match pattern {
        Pattern::Table(t) => Pattern::Table(Table {
            node: clone_node(&t.node, Rc::downgrade(parent), memo),
        }),
        Pattern::Prefixed(pfx, inner) => {
            Pattern::Prefixed(pfx.clone(), Box::new(clone_pattern(inner, parent, memo)))
        }
        Pattern::Window { size, inner } => Pattern::Window {
            size: *size,
            inner: Box::new(clone_pattern(inner, parent, memo)),
        },
        Pattern::Alt(ps) => Pattern::Alt(
            ps.iter()
                .map(|p| clone_pattern(p, parent, memo))
                .collect(),
        ),
        Pattern::Repeat(r) => Pattern::Repeat(r.clone_with_proto(Table {
            node: clone_node(&r.proto().node, Rc::downgrade(parent), memo),
        })),
        other => other.clone(),
    }
}

fn clone_value(value: &Value, parent: &NodeRef, memo: &mut HashMap<usize, NodeRef>) -> Value {
    match value {
        Value::Num(n) => Value::Num(n.clone()),
        Value::Table(t) => Value::Table(Table {
            node: clone_node(&t.node, Rc::downgrade(parent), memo),
        }),
        Value::List(l) => {
            let items = l
                .items_snapshot()
                .iter()
                .map(|v| clone_value(v, parent, memo))
                .collect();
            Value::List(List::from_parts(items, Rc::downgrade(parent)))
        }
    }
}
