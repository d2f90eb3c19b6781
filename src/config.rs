//! Engine configuration
//!
//! Knobs that change observable output or error behaviour. The defaults follow
//! the conventions of SQLite-derived logic test corpora.

/// What `x / 0` and `x % 0` evaluate to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivisionByZero {
    /// The expression evaluates to NULL
    Null,
    /// The statement fails with a division by zero error
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Text printed for NULL values
    pub null_text: String,
    /// Fixed number of decimals for REAL values, `None` for shortest round-trip
    pub real_precision: Option<usize>,
    pub division_by_zero: DivisionByZero,
    /// NULL is the smallest value in sort order (so first under ASC)
    pub nulls_first: bool,
    /// Maximum nesting of subqueries during binding and evaluation
    pub max_subquery_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            null_text: "NULL".to_string(),
            real_precision: Some(3),
            division_by_zero: DivisionByZero::Null,
            nulls_first: true,
            max_subquery_depth: 64,
        }
    }
}
