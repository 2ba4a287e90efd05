mod object;

use std::fmt::Display;

use crate::gc::{Gc, Heap, ObjRef, Trace, Tracer};

pub use object::{
    BoundMethod, Class, Closure, Function, HeapKind, Instance, LoxString, Native, NativeFn, Obj,
    Upvalue,
};
pub(crate) use object::{field_entry_size, method_entry_size};

/// A value on the stack, in a global, in a field or in a constant pool.
///
/// Equality is by content for the immediate variants and by handle identity
/// for objects. Strings are interned, so identity is content equality for
/// them as well.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(ObjRef),
}

static_assertions::assert_eq_size!(Value, [u64; 2]);

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl Value {
    /// Returns `true` if the value is [`Nil`].
    ///
    /// [`Nil`]: Value::Nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        if let Self::Number(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_obj(&self) -> Option<ObjRef> {
        if let Self::Obj(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// The only falsy values are `nil` and `false`.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Name of this value's type, for error messages
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Obj(obj) => heap.obj(*obj).map_or("freed object", Obj::kind_name),
        }
    }

    pub fn display<'a>(&self, heap: &'a Heap) -> ValueDisplay<'a> {
        ValueDisplay { value: *self, heap }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T> From<Gc<T>> for Value {
    fn from(gc: Gc<T>) -> Self {
        Value::Obj(gc.obj_ref())
    }
}

impl Trace for Value {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark_value(self)
    }
}

/// Printable form of a [`Value`], resolved against its heap.
pub struct ValueDisplay<'a> {
    value: Value,
    heap: &'a Heap,
}

impl Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Obj(obj) => match self.heap.obj(obj) {
                Some(o) => o.fmt_with(self.heap, f),
                None => write!(f, "<freed {:?}>", obj),
            },
        }
    }
}
