//! Fields and value bindings.
//!
//! A field ties a pattern to a name and a value slot. A field may carry a
//! [`Binding`] instead of a literal value: the value is then derived from
//! a sibling field (or from everything positioned after the field) on
//! demand, and the cached result is dropped whenever anything in the tree
//! changes.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::num::Num;
use crate::pattern::{Pattern, Value};
use crate::repeat::List;
use crate::table::Table;

/// Where a binding reads its input from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// A sibling field, by name.
    Field(String),
    /// The concatenation of every field strictly after the bound one
    /// (the `"*"` selector). This is how a length field sees its value.
    Rest,
}

/// Binding callback: receives the source value, returns the derived
/// number (coerced to the host table's radix afterwards).
pub type BindingFn = Rc<dyn Fn(&Value) -> Result<Num>>;

/// A derivation rule for a field value.
#[derive(Clone)]
pub struct Binding {
    pub(crate) source: Source,
    pub(crate) func: BindingFn,
}

impl Binding {
    /// Bind to the named sibling field, or to everything after the bound
    /// field when `source` is `"*"`.
    pub fn new<F>(source: &str, f: F) -> Binding
    where
        F: Fn(&Value) -> Result<Num> + 'static,
    {
        let source = if source == "*" {
            Source::Rest
        } else {
            Source::Field(source.to_string())
        };
        Binding {
            source,
            func: Rc::new(f),
        }
    }

    /// The binding's source selector.
    pub fn source(&self) -> &Source {
        &self.source
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({:?})", self.source)
    }
}

/// One field of a table: pattern, name, value slot, optional binding.
#[derive(Clone, Debug)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) pattern: Pattern,
    pub(crate) value: Value,
    pub(crate) binding: Option<Binding>,
}

impl Field {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field's pattern.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// The stored value slot (bindings not evaluated).
    pub fn stored(&self) -> &Value {
        &self.value
    }

    /// The binding, if the field carries one.
    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }
}

/// The polymorphic default of [`Table::add`]: a literal value, a text
/// literal resolved in the table's radix, a nested table or list, a
/// binding, or a copy of an existing field.
pub enum FieldInit {
    /// A ready value.
    Value(Value),
    /// A digit literal, parsed in the table's radix at `add` time.
    Text(String),
    /// An integer, converted in the table's radix at `add` time.
    Int(u64),
    /// A binding; the value slot starts as NULL.
    Bound(Binding),
    /// Value and binding copied from an existing field.
    Copy(Field),
}

impl From<Value> for FieldInit {
    fn from(v: Value) -> FieldInit {
        FieldInit::Value(v)
    }
}

impl From<Num> for FieldInit {
    fn from(n: Num) -> FieldInit {
        FieldInit::Value(Value::Num(n))
    }
}

impl From<Table> for FieldInit {
    fn from(t: Table) -> FieldInit {
        FieldInit::Value(Value::Table(t))
    }
}

impl From<List> for FieldInit {
    fn from(l: List) -> FieldInit {
        FieldInit::Value(Value::List(l))
    }
}

impl From<&str> for FieldInit {
    fn from(s: &str) -> FieldInit {
        FieldInit::Text(s.to_string())
    }
}

impl From<u64> for FieldInit {
    fn from(v: u64) -> FieldInit {
        FieldInit::Int(v)
    }
}

impl From<i32> for FieldInit {
    fn from(v: i32) -> FieldInit {
        FieldInit::Int(v.max(0) as u64)
    }
}

impl From<Binding> for FieldInit {
    fn from(b: Binding) -> FieldInit {
        FieldInit::Bound(b)
    }
}

impl From<Field> for FieldInit {
    fn from(f: Field) -> FieldInit {
        FieldInit::Copy(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_selects_rest() {
        let b = Binding::new("*", |v| v.to_num());
        assert_eq!(*b.source(), Source::Rest);
    }

    #[test]
    fn test_named_source() {
        let b = Binding::new("Value", |v| v.to_num());
        assert_eq!(*b.source(), Source::Field("Value".to_string()));
    }
}
