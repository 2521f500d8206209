//! Shared value operations: the binary-operator dispatcher, membership,
//! indexing, slicing, and instance member access.
//!
//! This module is the single authority for arithmetic, comparison, and
//! coercion. The evaluator and the lowering of emitted programs both
//! resolve here, so the two paths cannot drift.

use crate::ast::{BinOp, Loc};

use super::heap::Object;
use super::value::{self, Value, truthy, value_eq};
use super::{ErrorKind, Exec, Flow, Rt};

/// Apply `lhs op rhs`. Either returns a value or raises; never panics.
///
/// `&&`/`||` are handled for completeness, but callers that can
/// short-circuit should do so before dispatching here.
pub fn binary_op(rt: &mut Rt, lhs: Value, op: BinOp, rhs: Value, loc: &Loc) -> Exec<Value> {
    match op {
        BinOp::Add => add(rt, lhs, rhs, loc),
        BinOp::Sub => arith(rt, lhs, op, rhs, loc, i64::wrapping_sub, |a, b| a - b),
        BinOp::Mul => arith(rt, lhs, op, rhs, loc, i64::wrapping_mul, |a, b| a * b),
        BinOp::Div => div(rt, lhs, rhs, loc),
        BinOp::Rem => rem(rt, lhs, rhs, loc),
        BinOp::Eq => Ok(Value::Bool(value_eq(&rt.heap, lhs, rhs))),
        BinOp::Ne => Ok(Value::Bool(!value_eq(&rt.heap, lhs, rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(rt, lhs, op, rhs, loc),
        BinOp::And => Ok(Value::Bool(truthy(&rt.heap, lhs) && truthy(&rt.heap, rhs))),
        BinOp::Or => Ok(Value::Bool(truthy(&rt.heap, lhs) || truthy(&rt.heap, rhs))),
    }
}

/// `+` concatenates if either operand is a string, coercing the other
/// side; otherwise both operands must be numeric.
fn add(rt: &mut Rt, lhs: Value, rhs: Value, loc: &Loc) -> Exec<Value> {
    if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
        let mut text = value::to_string(&rt.heap, lhs);
        text.push_str(&value::to_string(&rt.heap, rhs));
        return Ok(rt.alloc_str(text));
    }
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
        _ if lhs.is_numeric() && rhs.is_numeric() => {
            let (a, b) = promoted(lhs, rhs);
            Ok(Value::Float(a + b))
        }
        _ => Err(type_error(rt, BinOp::Add, lhs, rhs, loc)),
    }
}

fn arith(
    rt: &mut Rt,
    lhs: Value,
    op: BinOp,
    rhs: Value,
    loc: &Loc,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Exec<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(a, b))),
        _ if lhs.is_numeric() && rhs.is_numeric() => {
            let (a, b) = promoted(lhs, rhs);
            Ok(Value::Float(float_op(a, b)))
        }
        _ => Err(type_error(rt, op, lhs, rhs, loc)),
    }
}

/// Integer division truncates; mixed operands promote to float.
fn div(rt: &mut Rt, lhs: Value, rhs: Value, loc: &Loc) -> Exec<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                return Err(rt.raise(loc, "division by zero"));
            }
            Ok(Value::Int(a.wrapping_div(b)))
        }
        _ if lhs.is_numeric() && rhs.is_numeric() => {
            let (a, b) = promoted(lhs, rhs);
            if b == 0.0 {
                return Err(rt.raise(loc, "division by zero"));
            }
            Ok(Value::Float(a / b))
        }
        _ => Err(type_error(rt, BinOp::Div, lhs, rhs, loc)),
    }
}

/// `%` operates on ints only.
fn rem(rt: &mut Rt, lhs: Value, rhs: Value, loc: &Loc) -> Exec<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                return Err(rt.raise(loc, "modulo by zero"));
            }
            Ok(Value::Int(a.wrapping_rem(b)))
        }
        _ => Err(type_error(rt, BinOp::Rem, lhs, rhs, loc)),
    }
}

/// Ordering: numerics promote, strings compare as bytes, bools order
/// `false < true`. Any other combination is a type error.
fn compare(rt: &mut Rt, lhs: Value, op: BinOp, rhs: Value, loc: &Loc) -> Exec<Value> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        _ if lhs.is_numeric() && rhs.is_numeric() => {
            let (a, b) = promoted(lhs, rhs);
            match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                // NaN fails every ordering
                None => return Ok(Value::Bool(false)),
            }
        }
        (Value::Str(a), Value::Str(b)) => rt.heap.str(a).as_bytes().cmp(rt.heap.str(b).as_bytes()),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(&b),
        _ => return Err(type_error(rt, op, lhs, rhs, loc)),
    };

    let result = match op {
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::Ge => ordering != Ordering::Less,
        _ => unreachable!("comparison dispatch on non-comparison operator"),
    };
    Ok(Value::Bool(result))
}

#[inline]
fn promoted(lhs: Value, rhs: Value) -> (f64, f64) {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => unreachable!("promotion of non-numeric operands"),
    }
}

fn type_error(rt: &mut Rt, op: BinOp, lhs: Value, rhs: Value, loc: &Loc) -> Flow {
    rt.raise_kind(
        ErrorKind::Type,
        loc,
        format!(
            "unsupported operands for `{}`: {} and {}",
            op.symbol(),
            lhs.tag().name(),
            rhs.tag().name()
        ),
    )
}

/// `lhs in rhs`: element of array (by equality scan), key of dict, or
/// substring. Other right operands are type errors.
pub fn in_operator(rt: &mut Rt, lhs: Value, rhs: Value, loc: &Loc) -> Exec<bool> {
    match rhs {
        Value::Array(r) => {
            let heap = &rt.heap;
            Ok(heap.array(r).iter().any(|item| value_eq(heap, lhs, *item)))
        }
        Value::Dict(r) => {
            let key = dict_key(rt, lhs, loc)?;
            Ok(rt.heap.dict(r).contains_key(&key))
        }
        Value::Str(r) => match lhs {
            Value::Str(needle) => {
                let needle = rt.heap.str(needle);
                Ok(rt.heap.str(r).contains(needle))
            }
            _ => Err(rt.raise_kind(
                ErrorKind::Type,
                loc,
                format!("cannot search a string for {}", lhs.tag().name()),
            )),
        },
        _ => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("`in` requires an array, dict, or string, got {}", rhs.tag().name()),
        )),
    }
}

/// Coerce a value to a dict key: strings pass through, ints render to
/// their decimal form.
pub fn dict_key(rt: &mut Rt, key: Value, loc: &Loc) -> Exec<String> {
    match key {
        Value::Str(r) => Ok(rt.heap.str(r).to_owned()),
        Value::Int(v) => Ok(v.to_string()),
        _ => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("dict keys must be strings, got {}", key.tag().name()),
        )),
    }
}

pub fn index_get(rt: &mut Rt, target: Value, index: Value, loc: &Loc) -> Exec<Value> {
    match target {
        Value::Array(r) => {
            let len = rt.heap.array(r).len();
            let i = array_index(len, index).ok_or_else(|| index_error(rt, index, r, loc))?;
            Ok(rt.heap.array(r)[i])
        }
        Value::Dict(r) => {
            let key = dict_key(rt, index, loc)?;
            match rt.heap.dict(r).get(&key) {
                Some(value) => Ok(*value),
                None => Err(rt.raise_kind(ErrorKind::Key, loc, format!("no key {key:?}"))),
            }
        }
        // one-byte string
        Value::Str(r) => {
            let len = rt.heap.str(r).len();
            let i = array_index(len, index).ok_or_else(|| index_error(rt, index, r, loc))?;
            let byte = rt.heap.str(r).as_bytes()[i];
            Ok(rt.alloc_str((byte as char).to_string()))
        }
        _ => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("cannot index into {}", target.tag().name()),
        )),
    }
}

pub fn index_set(rt: &mut Rt, target: Value, index: Value, value: Value, loc: &Loc) -> Exec<()> {
    match target {
        Value::Array(r) => {
            let len = rt.heap.array(r).len();
            let i = array_index(len, index).ok_or_else(|| index_error(rt, index, r, loc))?;
            rt.heap.array_mut(r)[i] = value;
            Ok(())
        }
        Value::Dict(r) => {
            let key = dict_key(rt, index, loc)?;
            rt.heap.dict_mut(r).insert(key, value);
            Ok(())
        }
        _ => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("cannot assign into {}", target.tag().name()),
        )),
    }
}

fn array_index(len: usize, index: Value) -> Option<usize> {
    match index {
        Value::Int(i) if i >= 0 && (i as usize) < len => Some(i as usize),
        _ => None,
    }
}

fn index_error(rt: &mut Rt, index: Value, target: super::value::ObjRef, loc: &Loc) -> Flow {
    match index {
        Value::Int(i) => {
            let len = match rt.heap.object(target) {
                Object::Array(items) => items.len(),
                Object::Str(s) => s.len(),
                _ => 0,
            };
            rt.raise_kind(
                ErrorKind::Index,
                loc,
                format!("index {i} out of range for length {len}"),
            )
        }
        _ => rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("indices must be ints, got {}", index.tag().name()),
        ),
    }
}

/// `target[start:end]` over arrays and strings. Missing bounds default
/// to the full extent; negative bounds address from the end; bounds are
/// clamped, and `start > end` yields an empty result.
pub fn slice(
    rt: &mut Rt,
    target: Value,
    start: Option<Value>,
    end: Option<Value>,
    loc: &Loc,
) -> Exec<Value> {
    let len = match target {
        Value::Array(r) => rt.heap.array(r).len(),
        Value::Str(r) => rt.heap.str(r).len(),
        _ => {
            return Err(rt.raise_kind(
                ErrorKind::Type,
                loc,
                format!("cannot slice {}", target.tag().name()),
            ));
        }
    };

    let start = slice_bound(rt, start, 0, len, loc)?;
    let end = slice_bound(rt, end, len, len, loc)?;
    let (start, end) = if start > end { (0, 0) } else { (start, end) };

    match target {
        Value::Array(r) => {
            let items = rt.heap.array(r)[start..end].to_vec();
            Ok(rt.alloc_array(items))
        }
        Value::Str(r) => {
            let text = rt.heap.str(r)[start..end].to_owned();
            Ok(rt.alloc_str(text))
        }
        _ => unreachable!(),
    }
}

fn slice_bound(
    rt: &mut Rt,
    bound: Option<Value>,
    default: usize,
    len: usize,
    loc: &Loc,
) -> Exec<usize> {
    let Some(bound) = bound else {
        return Ok(default);
    };
    match bound {
        Value::Int(i) => {
            let i = if i < 0 { i + len as i64 } else { i };
            Ok(i.clamp(0, len as i64) as usize)
        }
        _ => Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("slice bounds must be ints, got {}", bound.tag().name()),
        )),
    }
}

/// Read an instance field. Methods are not first-class values; naming
/// one without calling it is an error.
pub fn member_get(rt: &mut Rt, target: Value, name: &str, loc: &Loc) -> Exec<Value> {
    let Value::Instance(r) = target else {
        return Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("cannot access member {name:?} of {}", target.tag().name()),
        ));
    };
    let instance = rt.heap.instance(r);
    let fields = instance.fields;
    let class = instance.class;
    if let Some(value) = rt.heap.dict(fields).get(name) {
        return Ok(*value);
    }
    if rt.heap.class(class).method(name).is_some() {
        return Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("method {name:?} must be called"),
        ));
    }
    let class_name = rt.heap.class(class).decl.name.clone();
    Err(rt.raise_kind(
        ErrorKind::Undefined,
        loc,
        format!("instance of {class_name} has no member {name:?}"),
    ))
}

pub fn member_set(rt: &mut Rt, target: Value, name: &str, value: Value, loc: &Loc) -> Exec<()> {
    let Value::Instance(r) = target else {
        return Err(rt.raise_kind(
            ErrorKind::Type,
            loc,
            format!("cannot assign member {name:?} of {}", target.tag().name()),
        ));
    };
    let fields = rt.heap.instance(r).fields;
    rt.heap.dict_mut(fields).insert(name.to_owned(), value);
    Ok(())
}
