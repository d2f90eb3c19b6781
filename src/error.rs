use std::{array::TryFromSliceError, fmt::Display, string::FromUtf8Error, sync::PoisonError};

use bincode::ErrorKind;
use serde::{de, ser};

/// Custom Result type for logicdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for logicdb
///
/// Everything except `Internal` is a user-facing, statement-local error: the
/// statement is rolled back and the session keeps going.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// SQL syntax error (lexer or parser), carries the offending token
    Parse(String),
    /// Table does not exist
    UnknownTable(String),
    /// Table already exists
    DuplicateTable(String),
    /// Column reference does not resolve
    UnknownColumn(String),
    /// Column reference resolves to more than one column
    AmbiguousColumn(String),
    /// Function name is not known
    UnknownFunction(String),
    /// Row arity or value type does not fit the table schema
    SchemaMismatch(String),
    /// Uniqueness violation on a primary key
    Constraint(String),
    /// Invalid operator/operand combination
    TypeError(String),
    DivisionByZero,
    /// Statement or subquery nesting went past its maximum depth
    StackDepthExceeded(usize),
    /// MVCC write conflict
    WriteConflict,
    /// Internal error (storage, serialization, malformed plans)
    Internal(String),
}

impl Error {
    /// Whether the error is an internal invariant violation rather than a
    /// problem with the user's SQL.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::WriteConflict)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(value: std::num::ParseIntError) -> Self {
        Error::Parse(value.to_string())
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(value: std::num::ParseFloatError) -> Self {
        Error::Parse(value.to_string())
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(value: PoisonError<T>) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<Box<ErrorKind>> for Error {
    fn from(value: Box<ErrorKind>) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Error::Internal(value.to_string())
    }
}

impl From<FromUtf8Error> for Error {
    fn from(value: FromUtf8Error) -> Self {
        Error::Internal(value.to_string())
    }
}

impl std::error::Error for Error {}

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Internal(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Internal(msg.to_string())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "syntax error: {}", err),
            Error::UnknownTable(name) => write!(f, "no such table: {}", name),
            Error::DuplicateTable(name) => write!(f, "table {} already exists", name),
            Error::UnknownColumn(name) => write!(f, "no such column: {}", name),
            Error::AmbiguousColumn(name) => write!(f, "ambiguous column name: {}", name),
            Error::UnknownFunction(name) => write!(f, "no such function: {}", name),
            Error::SchemaMismatch(err) => write!(f, "{}", err),
            Error::Constraint(err) => write!(f, "constraint failed: {}", err),
            Error::TypeError(err) => write!(f, "type error: {}", err),
            Error::DivisionByZero => write!(f, "division by zero"),
            Error::StackDepthExceeded(depth) => {
                write!(f, "nesting exceeds maximum depth of {}", depth)
            }
            Error::WriteConflict => write!(f, "write conflict, try transaction"),
            Error::Internal(err) => write!(f, "internal error {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::UnknownTable("users".into()).to_string(),
            "no such table: users"
        );
        assert_eq!(Error::DivisionByZero.to_string(), "division by zero");
        assert!(Error::Internal("bad plan".into()).is_internal());
        assert!(!Error::UnknownColumn("x".into()).is_internal());
    }
}
