use std::{
    cmp::Ordering,
    fmt::Display,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{DivisionByZero, EngineConfig},
    error::{Error, Result},
};

/// Supported SQL data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Real,
    Text,
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
        })
    }
}

/// Runtime value type for expressions
///
/// Booleans behave as the integers 0 and 1 in arithmetic and when compared
/// with numbers. Text never converts implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

/// Operands after arithmetic coercion
#[derive(Debug, PartialEq)]
pub enum Coerced {
    /// At least one operand was NULL
    Null,
    Integers(i64, i64),
    Reals(f64, f64),
}

impl Value {
    /// Returns the data type of the value, or None if it's Null
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(DataType::Boolean),
            Self::Integer(_) => Some(DataType::Integer),
            Self::Real(_) => Some(DataType::Real),
            Self::Text(_) => Some(DataType::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn type_name(&self) -> String {
        match self.datatype() {
            Some(dt) => dt.to_string(),
            None => "NULL".to_string(),
        }
    }

    /// SQL comparison. `Ok(None)` is "unordered": either side is NULL (or NaN).
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(None),
            (Value::Text(a), Value::Text(b)) => Ok(Some(a.cmp(b))),
            (Value::Text(_), _) | (_, Value::Text(_)) => Err(Error::TypeError(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
            (a, b) => Ok(match a.coerce_for_arithmetic(b, "compare")? {
                Coerced::Integers(a, b) => Some(a.cmp(&b)),
                Coerced::Reals(a, b) => a.partial_cmp(&b),
                Coerced::Null => None,
            }),
        }
    }

    /// Total order used for sorting and grouping: NULL < numbers < text.
    /// Integer and Real compare by numeric value, so 1 and 1.0 are equal.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn class(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Boolean(_) | Value::Integer(_) | Value::Real(_) => 1,
                Value::Text(_) => 2,
            }
        }
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            (a, b) if class(a) != class(b) => class(a).cmp(&class(b)),
            (a, b) => match a.coerce_for_arithmetic(b, "sort") {
                Ok(Coerced::Integers(a, b)) => a.cmp(&b),
                Ok(Coerced::Reals(a, b)) => a.total_cmp(&b),
                _ => Ordering::Equal,
            },
        }
    }

    /// Widens a pair of numeric operands to a common representation.
    /// Integer with Integer stays integral, any Real widens both to Real.
    pub fn coerce_for_arithmetic(&self, other: &Value, op: &str) -> Result<Coerced> {
        let numeric = |v: &Value| -> Result<Option<Coerced>> {
            Ok(match v {
                Value::Null => None,
                Value::Boolean(b) => Some(Coerced::Integers(*b as i64, 0)),
                Value::Integer(i) => Some(Coerced::Integers(*i, 0)),
                Value::Real(r) => Some(Coerced::Reals(*r, 0.0)),
                Value::Text(_) => {
                    return Err(Error::TypeError(format!(
                        "cannot apply {} to {} and {}",
                        op,
                        self.type_name(),
                        other.type_name()
                    )))
                }
            })
        };
        // Both sides are checked before NULL short-circuits, so TEXT is
        // rejected even next to a NULL
        let (Some(a), Some(b)) = (numeric(self)?, numeric(other)?) else {
            return Ok(Coerced::Null);
        };
        Ok(match (a, b) {
            (Coerced::Integers(a, _), Coerced::Integers(b, _)) => Coerced::Integers(a, b),
            (Coerced::Integers(a, _), Coerced::Reals(b, _)) => Coerced::Reals(a as f64, b),
            (Coerced::Reals(a, _), Coerced::Integers(b, _)) => Coerced::Reals(a, b as f64),
            (Coerced::Reals(a, _), Coerced::Reals(b, _)) => Coerced::Reals(a, b),
            _ => Coerced::Null,
        })
    }

    fn arith(
        &self,
        other: &Value,
        op: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        real_op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        Ok(match self.coerce_for_arithmetic(other, op)? {
            Coerced::Null => Value::Null,
            // Integer overflow falls back to floating point
            Coerced::Integers(a, b) => match int_op(a, b) {
                Some(v) => Value::Integer(v),
                None => Value::Real(real_op(a as f64, b as f64)),
            },
            Coerced::Reals(a, b) => Value::Real(real_op(a, b)),
        })
    }

    pub fn add(&self, other: &Value) -> Result<Value> {
        self.arith(other, "+", i64::checked_add, |a, b| a + b)
    }

    pub fn subtract(&self, other: &Value) -> Result<Value> {
        self.arith(other, "-", i64::checked_sub, |a, b| a - b)
    }

    pub fn multiply(&self, other: &Value) -> Result<Value> {
        self.arith(other, "*", i64::checked_mul, |a, b| a * b)
    }

    /// Division; integer division truncates toward zero
    pub fn divide(&self, other: &Value, on_zero: DivisionByZero) -> Result<Value> {
        match self.coerce_for_arithmetic(other, "/")? {
            Coerced::Integers(_, 0) => Self::division_by_zero(on_zero),
            Coerced::Reals(_, b) if b == 0.0 => Self::division_by_zero(on_zero),
            _ => self.arith(other, "/", i64::checked_div, |a, b| a / b),
        }
    }

    pub fn remainder(&self, other: &Value, on_zero: DivisionByZero) -> Result<Value> {
        match self.coerce_for_arithmetic(other, "%")? {
            Coerced::Integers(_, 0) => Self::division_by_zero(on_zero),
            Coerced::Reals(_, b) if b == 0.0 => Self::division_by_zero(on_zero),
            // i64::MIN % -1 overflows but is mathematically zero
            Coerced::Integers(a, b) => Ok(Value::Integer(a.checked_rem(b).unwrap_or(0))),
            Coerced::Reals(a, b) => Ok(Value::Real(a % b)),
            Coerced::Null => Ok(Value::Null),
        }
    }

    fn division_by_zero(on_zero: DivisionByZero) -> Result<Value> {
        match on_zero {
            DivisionByZero::Null => Ok(Value::Null),
            DivisionByZero::Error => Err(Error::DivisionByZero),
        }
    }

    pub fn negate(&self) -> Result<Value> {
        Ok(match self {
            Value::Null => Value::Null,
            Value::Boolean(b) => Value::Integer(-(*b as i64)),
            Value::Integer(i) => match i.checked_neg() {
                Some(v) => Value::Integer(v),
                None => Value::Real(-(*i as f64)),
            },
            Value::Real(r) => Value::Real(-r),
            Value::Text(_) => {
                return Err(Error::TypeError(format!(
                    "cannot negate {}",
                    self.type_name()
                )))
            }
        })
    }

    /// String concatenation (`||`), numbers are rendered as text
    pub fn concat(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Value::Null,
            (a, b) => Value::Text(format!("{}{}", a.as_text(), b.as_text())),
        }
    }

    /// Text form used by `||`, `CAST(x AS TEXT)` and string functions
    pub fn as_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => (*b as i64).to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => format_real(*r, None),
            Value::Text(s) => s.clone(),
        }
    }

    /// Truth value for WHERE/ON/HAVING/CASE: NULL is unknown
    pub fn truth(&self) -> Result<Option<bool>> {
        match self {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            Value::Integer(i) => Ok(Some(*i != 0)),
            Value::Real(r) => Ok(Some(*r != 0.0)),
            Value::Text(_) => Err(Error::TypeError(
                "TEXT value used as a boolean condition".into(),
            )),
        }
    }

    /// Explicit conversion (`CAST`)
    pub fn cast(&self, to: DataType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        Ok(match to {
            DataType::Integer => Value::Integer(match self {
                Value::Boolean(b) => *b as i64,
                Value::Integer(i) => *i,
                Value::Real(r) => *r as i64,
                Value::Text(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                        .unwrap_or(0)
                }
                Value::Null => unreachable!(),
            }),
            DataType::Real => Value::Real(match self {
                Value::Boolean(b) => *b as i64 as f64,
                Value::Integer(i) => *i as f64,
                Value::Real(r) => *r,
                Value::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
                Value::Null => unreachable!(),
            }),
            DataType::Text => Value::Text(self.as_text()),
            DataType::Boolean => match self {
                Value::Text(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "t" | "1" => Value::Boolean(true),
                    "false" | "f" | "0" => Value::Boolean(false),
                    _ => {
                        return Err(Error::TypeError(format!(
                            "cannot cast '{}' to BOOLEAN",
                            s
                        )))
                    }
                },
                v => Value::Boolean(v.truth()?.unwrap_or(false)),
            },
        })
    }

    /// Converts a value for storage in a column of the given type. Integers
    /// widen into REAL columns; every other mismatch is rejected.
    pub fn coerce_to(self, datatype: DataType) -> Option<Value> {
        match (self, datatype) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Integer(i), DataType::Real) => Some(Value::Real(i as f64)),
            (v, dt) if v.datatype() == Some(dt) => Some(v),
            _ => None,
        }
    }

    /// Protocol rendering of a value
    pub fn to_display_text(&self, config: &EngineConfig) -> String {
        match self {
            Value::Null => config.null_text.clone(),
            Value::Real(r) => format_real(*r, config.real_precision),
            v => v.as_text(),
        }
    }
}

/// Formats a REAL: fixed decimals when a precision is given, otherwise the
/// shortest representation that round-trips. Negative zero prints as zero.
pub fn format_real(r: f64, precision: Option<usize>) -> String {
    let r = if r == 0.0 { 0.0 } else { r };
    match precision {
        Some(p) => format!("{:.*}", p, r),
        None => format!("{:?}", r),
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) if *b => write!(f, "TRUE"),
            Value::Boolean(_) => write!(f, "FALSE"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", format_real(*v, None)),
            Value::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

/// A row is a vector of values
pub type Row = Vec<Value>;

/// Values compared with `sort_cmp` semantics, usable as a hash key for
/// grouping and DISTINCT: NULL equals NULL and 1 equals 1.0.
#[derive(Debug, Clone)]
pub struct GroupKey(pub Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.sort_cmp(b) == Ordering::Equal)
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            match value {
                Value::Null => 0u8.hash(state),
                Value::Boolean(_) | Value::Integer(_) | Value::Real(_) => {
                    1u8.hash(state);
                    let f = match value {
                        Value::Boolean(b) => *b as i64 as f64,
                        Value::Integer(i) => *i as f64,
                        Value::Real(r) => *r,
                        _ => unreachable!(),
                    };
                    // 0.0 and -0.0 compare equal, so they must hash equal
                    let f = if f == 0.0 { 0.0 } else { f };
                    f.to_bits().hash(state);
                }
                Value::Text(s) => {
                    2u8.hash(state);
                    s.hash(state);
                }
            }
        }
    }
}
