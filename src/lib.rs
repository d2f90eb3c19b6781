//! logicdb - an in-memory SQL engine
//!
//! This crate provides:
//! - SQL parsing (lexer, parser, AST)
//! - Binding and planning against the table catalog
//! - Pull-based execution with joins, grouping and subqueries
//! - An MVCC key-value store giving every statement its own transaction
//! - The tab-separated text protocol spoken by the `logicdb` binary

pub mod config;
pub mod error;
pub mod format;
pub mod sql;
pub mod storage;
