//! Operators, subscripts and iteration over values.

use std::{cmp::Ordering, rc::Rc};

use crate::{
    ast::{BinOp, CmpOp, UnaryOp},
    error::ScriptError,
    value::{Num, Value, is_same, values_equal},
};

/// Longest sequence `*` will build.
const MAX_REPEAT: usize = 10_000_000;

fn unsupported(op: &str, a: &Value, b: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

pub(crate) fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ScriptError> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!operand.is_truthy()));
    }
    let bad = || {
        let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
        ScriptError::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            operand.type_name()
        ))
    };
    match (op, Num::of(operand).ok_or_else(bad)?) {
        (UnaryOp::Neg, Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(ScriptError::overflow),
        (UnaryOp::Neg, Num::Float(f)) => Ok(Value::Float(-f)),
        (_, Num::Int(i)) => Ok(Value::Int(i)),
        (_, Num::Float(f)) => Ok(Value::Float(f)),
    }
}

pub(crate) fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, ScriptError> {
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return arithmetic(op, x, y);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => Ok(Value::str(format!("{x}{y}"))),
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if Num::of(n).is_some() => {
            let count = repeat_count(n, s.len())?;
            Ok(Value::str(s.repeat(count)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if Num::of(n).is_some() =>
        {
            let items = items.borrow();
            let count = repeat_count(n, items.len())?;
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        (BinOp::Add, Value::Str(_), other) => Err(ScriptError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        ))),
        _ => Err(unsupported(op.symbol(), a, b)),
    }
}

fn repeat_count(n: &Value, unit: usize) -> Result<usize, ScriptError> {
    let (Value::Int(_) | Value::Bool(_)) = n else {
        return Err(ScriptError::type_error(format!(
            "can't multiply sequence by non-int of type '{}'",
            n.type_name()
        )));
    };
    let Some(Num::Int(count)) = Num::of(n) else {
        return Ok(0);
    };
    let count = usize::try_from(count).unwrap_or(0);
    if count.saturating_mul(unit.max(1)) > MAX_REPEAT {
        return Err(ScriptError::new("MemoryError", "repeated sequence is too large"));
    }
    Ok(count)
}

fn arithmetic(op: BinOp, x: Num, y: Num) -> Result<Value, ScriptError> {
    if let (Num::Int(a), Num::Int(b)) = (x, y) {
        return int_arithmetic(op, a, b);
    }
    let (a, b) = (x.as_f64(), y.as_f64());
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ScriptError::new("ZeroDivisionError", "float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ScriptError::new("ZeroDivisionError", "float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ScriptError::new("ZeroDivisionError", "float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Float(result))
}

fn int_arithmetic(op: BinOp, a: i64, b: i64) -> Result<Value, ScriptError> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(ScriptError::zero_division());
            }
            #[allow(clippy::cast_precision_loss)]
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(ScriptError::new(
                    "ZeroDivisionError",
                    "integer division or modulo by zero",
                ));
            }
            a.checked_div(b).map(|q| if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ScriptError::new(
                    "ZeroDivisionError",
                    "integer division or modulo by zero",
                ));
            }
            a.checked_rem(b).map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinOp::Pow => {
            if b < 0 {
                return arithmetic(op, Num::Float(Num::Int(a).as_f64()), Num::Int(b));
            }
            u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
        }
    };
    result.map(Value::Int).ok_or_else(ScriptError::overflow)
}

pub(crate) fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    Ok(match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::NotEq => !values_equal(a, b),
        CmpOp::Is => is_same(a, b),
        CmpOp::IsNot => !is_same(a, b),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Lt => order(op, a, b)? == Ordering::Less,
        CmpOp::LtE => order(op, a, b)? != Ordering::Greater,
        CmpOp::Gt => order(op, a, b)? == Ordering::Greater,
        CmpOp::GtE => order(op, a, b)? != Ordering::Less,
    })
}

/// Ordering used by `<` and by `sorted`, `min` and `max`.
pub(crate) fn order(op: CmpOp, a: &Value, b: &Value) -> Result<Ordering, ScriptError> {
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => x.cmp(&y),
            _ => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            for (p, q) in x.iter().zip(y.iter()) {
                if !values_equal(p, q) {
                    return order(op, p, q);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(ScriptError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// `item in container`
pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
        Value::Dict(dict) => Ok(dict.borrow().contains(item)),
        Value::Range(r) => Ok(match Num::of(item) {
            Some(Num::Int(n)) => r.contains(n),
            #[allow(clippy::cast_possible_truncation)]
            Some(Num::Float(f)) if f.fract() == 0.0 => r.contains(f as i64),
            _ => false,
        }),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Iterate a value. Lists and dicts are snapshotted; ranges stay lazy.
pub(crate) fn iterate(value: &Value) -> Result<Box<dyn Iterator<Item = Value>>, ScriptError> {
    match value {
        Value::List(items) => Ok(Box::new(items.borrow().clone().into_iter())),
        Value::Dict(dict) => Ok(Box::new(
            dict.borrow().keys().cloned().collect::<Vec<_>>().into_iter(),
        )),
        Value::Str(s) => Ok(Box::new(
            s.chars()
                .map(|c| Value::str(c.to_string()))
                .collect::<Vec<_>>()
                .into_iter(),
        )),
        Value::Range(r) => Ok(Box::new(r.iter().map(Value::Int))),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn len(value: &Value) -> Result<usize, ScriptError> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Dict(dict) => Ok(dict.borrow().len()),
        Value::Range(r) => Ok(r.len()),
        other => Err(ScriptError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

fn index_of(kind: &str, index: &Value, len: usize) -> Result<Option<usize>, ScriptError> {
    let Some(Num::Int(i)) = (match index {
        Value::Int(_) | Value::Bool(_) => Num::of(index),
        _ => None,
    }) else {
        return Err(ScriptError::type_error(format!(
            "{kind} indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let i = if i < 0 { i + len } else { i };
    Ok(if (0..len).contains(&i) {
        usize::try_from(i).ok()
    } else {
        None
    })
}

/// `value[index]`
pub(crate) fn get_item(value: &Value, index: &Value) -> Result<Value, ScriptError> {
    match value {
        Value::List(items) => {
            let items = items.borrow();
            index_of("list", index, items.len())?
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| ScriptError::new("IndexError", "list index out of range"))
        }
        Value::Str(s) => {
            let count = s.chars().count();
            index_of("string", index, count)?
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| ScriptError::new("IndexError", "string index out of range"))
        }
        Value::Range(r) => index_of("range object", index, r.len())?
            .and_then(|i| r.get(i))
            .map(Value::Int)
            .ok_or_else(|| ScriptError::new("IndexError", "range object index out of range")),
        Value::Dict(dict) => dict
            .borrow()
            .get(index)
            .ok_or_else(|| ScriptError::new("KeyError", index.repr())),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `value[index] = item`
pub(crate) fn set_item(value: &Value, index: &Value, item: Value) -> Result<(), ScriptError> {
    match value {
        Value::List(items) => {
            let len = items.borrow().len();
            let i = index_of("list", index, len)?.ok_or_else(|| {
                ScriptError::new("IndexError", "list assignment index out of range")
            })?;
            items.borrow_mut()[i] = item;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index.clone(), item),
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// In-place `+=` for lists; `None` means fall back to `binary`.
pub(crate) fn add_in_place(target: &Value, rhs: &Value) -> Option<Result<(), ScriptError>> {
    let Value::List(items) = target else {
        return None;
    };
    let extra: Result<Vec<Value>, ScriptError> = if let Value::List(other) = rhs {
        if Rc::ptr_eq(items, other) {
            Ok(items.borrow().clone())
        } else {
            Ok(other.borrow().clone())
        }
    } else {
        iterate(rhs).map(Iterator::collect)
    };
    Some(extra.map(|extra| items.borrow_mut().extend(extra)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(1));
        assert_eq!(binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(3.5));
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, "ZeroDivisionError");
    }

    #[test]
    fn test_sequence_repetition_needs_an_int() {
        assert_eq!(
            binary(BinOp::Mul, &Value::str("ab"), &Value::Int(2)).unwrap(),
            Value::str("abab")
        );
        assert_eq!(
            binary(BinOp::Mul, &Value::Bool(true), &Value::str("x")).unwrap(),
            Value::str("x")
        );
        let err = binary(BinOp::Mul, &Value::str("ab"), &Value::Float(2.0)).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert_eq!(err.message, "can't multiply sequence by non-int of type 'float'");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
    }

    #[test]
    fn test_sequence_ops() {
        assert_eq!(binary(BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap(), Value::str("ababab"));
        let joined = binary(
            BinOp::Add,
            &Value::list(vec![Value::Int(1)]),
            &Value::list(vec![Value::Int(2)]),
        )
        .unwrap();
        assert_eq!(joined, Value::list(vec![Value::Int(1), Value::Int(2)]));
        assert!(binary(BinOp::Add, &Value::str("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_ordering_mismatch_is_type_error() {
        let err = compare(CmpOp::Lt, &Value::Int(1), &Value::str("a")).unwrap_err();
        assert_eq!(err.kind, "TypeError");
    }

    #[test]
    fn test_negative_indexing() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap(), Value::Int(3));
        assert_eq!(get_item(&list, &Value::Int(3)).unwrap_err().kind, "IndexError");
    }

    #[test]
    fn test_list_extends_itself() {
        let list = Value::list(vec![Value::Int(1)]);
        add_in_place(&list, &list).unwrap().unwrap();
        assert_eq!(len(&list).unwrap(), 2);
    }
}
