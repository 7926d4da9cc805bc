use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::models::enums::{BinaryOp, ScalarType, UnaryOp};

/// Dialect-level column type, e.g. `STRING` or `BIGINT`, remembering the host type it stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnType {
    pub name: Cow<'static, str>,
    pub scalar_type: ScalarType,
}

impl ColumnType {
    pub fn new(name: impl Into<Cow<'static, str>>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar_type,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("cannot apply {op:?} to {left} and {right}")]
    TypeMismatch {
        op: BinaryOp,
        left: String,
        right: String,
    },
    #[error("cannot apply {op:?} to {operand}")]
    UnaryMismatch { op: UnaryOp, operand: String },
    #[error("integer overflow in {0:?}")]
    Overflow(BinaryOp),
}

/// A constant or runtime scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Timestamp(NaiveDateTime),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "'{}'", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Numeric view used for promotion: Int < Decimal < Double.
#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Decimal(Decimal),
    Double(f64),
}

impl Value {
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ScalarType::Boolean),
            Value::Int(_) => Some(ScalarType::Int64),
            Value::Double(_) => Some(ScalarType::Double),
            Value::Decimal(_) => Some(ScalarType::Decimal),
            Value::String(_) => Some(ScalarType::String),
            Value::Timestamp(_) => Some(ScalarType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            Value::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    /// Three-valued truth: `None` for NULL.
    pub fn truth(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Value::Int(i) => Some(Numeric::Int(*i)),
            Value::Decimal(d) => Some(Numeric::Decimal(*d)),
            Value::Double(d) => Some(Numeric::Double(*d)),
            _ => None,
        }
    }

    /// SQL comparison. `None` when either side is NULL or the types are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => match (self.numeric()?, other.numeric()?) {
                (Numeric::Int(a), Numeric::Int(b)) => Some(a.cmp(&b)),
                (Numeric::Decimal(a), Numeric::Decimal(b)) => Some(a.cmp(&b)),
                (Numeric::Int(a), Numeric::Decimal(b)) => Some(Decimal::from(a).cmp(&b)),
                (Numeric::Decimal(a), Numeric::Int(b)) => Some(a.cmp(&Decimal::from(b))),
                (a, b) => to_f64(a).partial_cmp(&to_f64(b)),
            },
        }
    }

    /// Total order for sorting: NULL sorts first, incomparable values compare equal.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Grouping equality: NULL groups with NULL.
    pub fn same_group(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ValueError> {
        match op {
            BinaryOp::And => Ok(match (left.truth(), right.truth()) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            }),
            BinaryOp::Or => Ok(match (left.truth(), right.truth()) {
                (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            }),
            op if op.is_comparison() => {
                if left.is_null() || right.is_null() {
                    return Ok(Value::Null);
                }
                let ord = left.compare(right).ok_or_else(|| mismatch(op, left, right))?;
                Ok(Value::Boolean(match op {
                    BinaryOp::Equal => ord == Ordering::Equal,
                    BinaryOp::NotEqual => ord != Ordering::Equal,
                    BinaryOp::LessThan => ord == Ordering::Less,
                    BinaryOp::LessThanOrEqual => ord != Ordering::Greater,
                    BinaryOp::GreaterThan => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            op => arithmetic(op, left, right),
        }
    }

    pub fn apply_unary(op: UnaryOp, operand: &Value) -> Result<Value, ValueError> {
        match (op, operand) {
            (_, Value::Null) => Ok(Value::Null),
            (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
            (UnaryOp::Negate, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or(ValueError::Overflow(BinaryOp::Subtract)),
            (UnaryOp::Negate, Value::Double(d)) => Ok(Value::Double(-d)),
            (UnaryOp::Negate, Value::Decimal(d)) => Ok(Value::Decimal(-*d)),
            (op, v) => Err(ValueError::UnaryMismatch {
                op,
                operand: v.to_string(),
            }),
        }
    }
}

fn to_f64(n: Numeric) -> f64 {
    match n {
        Numeric::Int(i) => i as f64,
        Numeric::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        Numeric::Double(d) => d,
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> ValueError {
    ValueError::TypeMismatch {
        op,
        left: left.to_string(),
        right: right.to_string(),
    }
}

// Hive semantics: `/` always yields a double and division by zero yields NULL.
fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ValueError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (l, r) = match (left.numeric(), right.numeric()) {
        (Some(l), Some(r)) => (l, r),
        _ => return Err(mismatch(op, left, right)),
    };
    if op == BinaryOp::Divide {
        let divisor = to_f64(r);
        if divisor == 0.0 {
            return Ok(Value::Null);
        }
        return Ok(Value::Double(to_f64(l) / divisor));
    }
    match (l, r) {
        (Numeric::Int(a), Numeric::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Modulo if b == 0 => return Ok(Value::Null),
                BinaryOp::Modulo => a.checked_rem(b),
                _ => return Err(mismatch(op, left, right)),
            };
            result.map(Value::Int).ok_or(ValueError::Overflow(op))
        }
        (Numeric::Double(_), _) | (_, Numeric::Double(_)) => {
            let (a, b) = (to_f64(l), to_f64(r));
            Ok(Value::Double(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Modulo if b == 0.0 => return Ok(Value::Null),
                BinaryOp::Modulo => a % b,
                _ => return Err(mismatch(op, left, right)),
            }))
        }
        (l, r) => {
            let a = to_decimal(l);
            let b = to_decimal(r);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Modulo if b.is_zero() => return Ok(Value::Null),
                BinaryOp::Modulo => a.checked_rem(b),
                _ => return Err(mismatch(op, left, right)),
            };
            result.map(Value::Decimal).ok_or(ValueError::Overflow(op))
        }
    }
}

fn to_decimal(n: Numeric) -> Decimal {
    match n {
        Numeric::Int(i) => Decimal::from(i),
        Numeric::Decimal(d) => d,
        Numeric::Double(d) => Decimal::from_f64(d).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        let v = Value::apply_binary(BinaryOp::Add, &Value::Int(3), &Value::Int(4)).unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn division_is_double_and_null_on_zero() {
        let v = Value::apply_binary(BinaryOp::Divide, &Value::Int(7), &Value::Int(2)).unwrap();
        assert_eq!(v, Value::Double(3.5));
        let z = Value::apply_binary(BinaryOp::Divide, &Value::Int(7), &Value::Int(0)).unwrap();
        assert_eq!(z, Value::Null);
    }

    #[test]
    fn decimal_promotion() {
        let d = Decimal::new(150, 2);
        let v = Value::apply_binary(BinaryOp::Add, &Value::Decimal(d), &Value::Int(1)).unwrap();
        assert_eq!(v, Value::Decimal(Decimal::new(250, 2)));
    }

    #[test]
    fn double_operands_promote_the_other_side() {
        let v = Value::apply_binary(BinaryOp::Add, &Value::Double(1.5), &Value::Int(2)).unwrap();
        assert_eq!(v, Value::Double(3.5));
        let d = Decimal::new(25, 1);
        let m = Value::apply_binary(BinaryOp::Multiply, &Value::Decimal(d), &Value::Double(2.0))
            .unwrap();
        assert_eq!(m, Value::Double(5.0));
        let r = Value::apply_binary(BinaryOp::Modulo, &Value::Int(7), &Value::Double(0.0)).unwrap();
        assert_eq!(r, Value::Null);
    }

    #[test]
    fn three_valued_logic() {
        let and = Value::apply_binary(BinaryOp::And, &Value::Null, &Value::Boolean(false)).unwrap();
        assert_eq!(and, Value::Boolean(false));
        let or = Value::apply_binary(BinaryOp::Or, &Value::Null, &Value::Boolean(false)).unwrap();
        assert_eq!(or, Value::Null);
        let eq = Value::apply_binary(BinaryOp::Equal, &Value::Null, &Value::Int(1)).unwrap();
        assert_eq!(eq, Value::Null);
    }

    #[test]
    fn mixed_comparison_and_sorting() {
        assert_eq!(
            Value::Int(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Less);
        assert!(Value::Null.same_group(&Value::Null));
    }

    #[test]
    fn string_plus_int_is_rejected() {
        let err = Value::apply_binary(BinaryOp::Add, &Value::from("a"), &Value::Int(1));
        assert!(matches!(err, Err(ValueError::TypeMismatch { .. })));
    }
}
