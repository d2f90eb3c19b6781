//! SQL processing module
//!
//! This module provides:
//! - `parser`: SQL lexer and parser
//! - `types`: values and their operators
//! - `schema`: Table and column schema definitions
//! - `plan`: Binding and execution plan generation
//! - `executor`: Query and mutation execution
//! - `engine`: Catalog, transactions and sessions

pub mod engine;
pub mod executor;
pub mod parser;
pub mod plan;
pub mod schema;
pub mod types;
