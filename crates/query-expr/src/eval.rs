use std::cmp::Ordering;

use crate::{BinaryOp, EvalError, EvalResult, Expr, SlotId, UnaryOp, Value};

/// Anything expressions can read fields from.
pub trait Record {
    fn field(&self, name: &str) -> Option<&Value>;

    fn slot(&self, _slot: SlotId) -> Option<&Value> {
        None
    }
}

impl<R: Record + ?Sized> Record for &R {
    fn field(&self, name: &str) -> Option<&Value> {
        (**self).field(name)
    }

    fn slot(&self, slot: SlotId) -> Option<&Value> {
        (**self).slot(slot)
    }
}

impl<R: Record + ?Sized> Record for std::sync::Arc<R> {
    fn field(&self, name: &str) -> Option<&Value> {
        (**self).field(name)
    }

    fn slot(&self, slot: SlotId) -> Option<&Value> {
        (**self).slot(slot)
    }
}

impl<R: Record + ?Sized> Record for std::rc::Rc<R> {
    fn field(&self, name: &str) -> Option<&Value> {
        (**self).field(name)
    }

    fn slot(&self, slot: SlotId) -> Option<&Value> {
        (**self).slot(slot)
    }
}

pub(crate) fn eval(expr: &Expr, args: &[&dyn Record]) -> EvalResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Param(_) => Err(EvalError::UnsupportedAccess),
        Expr::Field { base, name } => {
            let record = record(base, args)?;
            record
                .field(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownField(name.to_string()))
        }
        Expr::Slot { base, slot, name } => {
            let record = record(base, args)?;
            record
                .slot(*slot)
                .cloned()
                .ok_or_else(|| EvalError::MissingSlot(name.to_string()))
        }
        Expr::Tuple(items) => items
            .iter()
            .map(|item| eval(item, args))
            .collect::<EvalResult<Vec<_>>>()
            .map(Value::List),
        Expr::Unary { op, operand } => {
            let value = eval(operand, args)?;
            match op {
                UnaryOp::IsNull => Ok(Value::Bool(matches!(value, Value::Null))),
                UnaryOp::Not => match value {
                    Value::Null => Ok(Value::Null),
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(EvalError::NotABoolean(other.kind())),
                },
            }
        }
        Expr::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            left,
            right,
        } => {
            let left = truthy(&eval(left, args)?)?;
            match (op, left) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(truthy(&eval(right, args)?)?)),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, args)?;
            let right = eval(right, args)?;
            binary(*op, left, right)
        }
    }
}

fn record<'a>(base: &Expr, args: &[&'a dyn Record]) -> EvalResult<&'a dyn Record> {
    match base {
        Expr::Param(id) => {
            let index = usize::from(*id);
            args.get(index).copied().ok_or(EvalError::UnboundParam(index))
        }
        _ => Err(EvalError::UnsupportedAccess),
    }
}

/// Null counts as false so that filters drop rows with missing data.
pub(crate) fn truthy(value: &Value) -> EvalResult<bool> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        other => Err(EvalError::NotABoolean(other.kind())),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    let mismatch = |left: &Value, right: &Value| EvalError::TypeMismatch {
        op,
        left: left.kind(),
        right: right.kind(),
    };

    match op {
        BinaryOp::Add | BinaryOp::Sub => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => {
                    let result = if op == BinaryOp::Add {
                        a.checked_add(*b)
                    } else {
                        a.checked_sub(*b)
                    };
                    result.map(Value::Int).ok_or(EvalError::Overflow)
                }
                (Value::String(a), Value::String(b)) if op == BinaryOp::Add => {
                    Ok(Value::String(format!("{a}{b}").into()))
                }
                (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                    let (a, b) = (as_f64(&left), as_f64(&right));
                    Ok(Value::Float(if op == BinaryOp::Add { a + b } else { a - b }))
                }
                _ => Err(mismatch(&left, &right)),
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            // Comparisons involving null, even inside a tuple, are never satisfied.
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false));
            }
            let numeric = |value: &Value| matches!(value, Value::Int(_) | Value::Float(_));
            if std::mem::discriminant(&left) != std::mem::discriminant(&right) && !(numeric(&left) && numeric(&right)) {
                return Err(mismatch(&left, &right));
            }
            // Must agree with batch key identity.
            let equal = left.into_key() == right.into_key();
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false));
            }
            let ordering = left.compare(&right).ok_or_else(|| mismatch(&left, &right))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::And => Ok(Value::Bool(truthy(&left)? && truthy(&right)?)),
        BinaryOp::Or => Ok(Value::Bool(truthy(&left)? || truthy(&right)?)),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}
