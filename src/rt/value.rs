//! The tagged value manipulated by every operation.
//!
//! Primitive tags carry their payload inline; heap-referencing tags
//! carry an [`ObjRef`] into the collector's heap. Values are `Copy`;
//! copying never allocates, and heap-referencing copies share the
//! referenced object.

use super::heap::{Heap, Object};

/// Index handle to a collector-managed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

#[derive(Clone, Copy, Debug, Default)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    #[default]
    Null,
    Str(ObjRef),
    Array(ObjRef),
    Dict(ObjRef),
    Class(ObjRef),
    Instance(ObjRef),
}

/// Type tag, also stored in every heap object header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Int,
    Float,
    Bool,
    Null,
    Str,
    Array,
    Dict,
    Class,
    Instance,
}

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::Int => "int",
            Tag::Float => "float",
            Tag::Bool => "bool",
            Tag::Null => "null",
            Tag::Str => "string",
            Tag::Array => "array",
            Tag::Dict => "dict",
            Tag::Class => "class",
            Tag::Instance => "instance",
        }
    }
}

impl Value {
    #[inline]
    pub fn tag(self) -> Tag {
        match self {
            Value::Int(_) => Tag::Int,
            Value::Float(_) => Tag::Float,
            Value::Bool(_) => Tag::Bool,
            Value::Null => Tag::Null,
            Value::Str(_) => Tag::Str,
            Value::Array(_) => Tag::Array,
            Value::Dict(_) => Tag::Dict,
            Value::Class(_) => Tag::Class,
            Value::Instance(_) => Tag::Instance,
        }
    }

    #[inline]
    pub fn heap_ref(self) -> Option<ObjRef> {
        match self {
            Value::Str(r)
            | Value::Array(r)
            | Value::Dict(r)
            | Value::Class(r)
            | Value::Instance(r) => Some(r),
            _ => None,
        }
    }

    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Numeric payload promoted to float.
    #[inline]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(v as f64),
            Value::Float(v) => Some(v),
            _ => None,
        }
    }
}

/// The canonical mapping from any value to a boolean, used by branch
/// conditions and the logical operators.
pub fn truthy(heap: &Heap, value: Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Int(v) => v != 0,
        Value::Float(v) => v != 0.0,
        Value::Str(r) => !heap.str(r).is_empty(),
        Value::Array(r) => !heap.array(r).is_empty(),
        Value::Dict(r) => !heap.dict(r).is_empty(),
        Value::Class(_) | Value::Instance(_) => true,
    }
}

/// Equality: primitives by value (int/float promote), strings by
/// bytes, arrays/dicts/instances/classes by reference identity.
/// Mismatched tags compare unequal without error.
pub fn value_eq(heap: &Heap, a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => a as f64 == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        (Value::Str(a), Value::Str(b)) => a == b || heap.str(a) == heap.str(b),
        (Value::Array(a), Value::Array(b)) => a == b,
        (Value::Dict(a), Value::Dict(b)) => a == b,
        (Value::Class(a), Value::Class(b)) => a == b,
        (Value::Instance(a), Value::Instance(b)) => a == b,
        _ => false,
    }
}

/// Render a value the way `print` and string coercion see it.
///
/// Strings render raw at the top level but quoted inside containers.
pub fn to_string(heap: &Heap, value: Value) -> String {
    let mut out = String::new();
    write_value(&mut out, heap, value, false);
    out
}

fn write_value(out: &mut String, heap: &Heap, value: Value, quoted: bool) {
    use std::fmt::Write as _;

    match value {
        Value::Int(v) => {
            let _ = write!(out, "{v}");
        }
        Value::Float(v) => {
            let _ = write!(out, "{v}");
        }
        Value::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        Value::Null => out.push_str("null"),
        Value::Str(r) => {
            if quoted {
                let _ = write!(out, "{:?}", heap.str(r));
            } else {
                out.push_str(heap.str(r));
            }
        }
        Value::Array(r) => {
            out.push('[');
            for (i, item) in heap.array(r).iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, heap, *item, true);
            }
            out.push(']');
        }
        Value::Dict(r) => {
            out.push('{');
            for (i, (key, item)) in heap.dict(r).iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{key:?}: ");
                write_value(out, heap, *item, true);
            }
            out.push('}');
        }
        Value::Class(r) => {
            let Object::Class(class) = heap.object(r) else {
                unreachable!("class tag with non-class object");
            };
            let _ = write!(out, "<class {}>", class.decl.name);
        }
        Value::Instance(r) => {
            let Object::Instance(instance) = heap.object(r) else {
                unreachable!("instance tag with non-instance object");
            };
            let Object::Class(class) = heap.object(instance.class) else {
                unreachable!("instance of a non-class");
            };
            let _ = write!(out, "<instance {}>", class.decl.name);
        }
    }
}
