//! Text protocol rendering
//!
//! A query prints one line per row with tab-separated values; every other
//! statement prints nothing. Errors print `Error: <message>`. Each response
//! ends with a blank line.

use std::fmt::Write;

use crate::{config::EngineConfig, error::Result, sql::executor::ResultSet};

/// Renders the outcome of one statement block
pub fn format_response(result: &Result<ResultSet>, config: &EngineConfig) -> String {
    let mut out = String::new();
    match result {
        Ok(ResultSet::Query { rows, .. }) => {
            for row in rows {
                let line = row
                    .iter()
                    .map(|v| v.to_display_text(config))
                    .collect::<Vec<_>>()
                    .join("\t");
                out.push_str(&line);
                out.push('\n');
            }
        }
        Ok(_) => {}
        Err(err) => {
            let _ = writeln!(out, "Error: {}", err);
        }
    }
    out.push('\n');
    out
}

/// Collects protocol lines into executable blocks: lines are joined with a
/// space and a blank line ends the block
#[derive(Debug, Default)]
pub struct BlockReader {
    buffer: String,
}

impl BlockReader {
    /// Adds a line, returning the finished block when the line is blank.
    /// Blank lines without pending input produce nothing.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return self.finish();
        }
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(line);
        None
    }

    /// Takes whatever input is pending, e.g. at end of input
    pub fn finish(&mut self) -> Option<String> {
        match self.buffer.is_empty() {
            true => None,
            false => Some(std::mem::take(&mut self.buffer)),
        }
    }
}

/// Strips surrounding whitespace and one trailing `;` from a block
pub fn trim_block(block: &str) -> &str {
    let block = block.trim();
    block.strip_suffix(';').unwrap_or(block).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        sql::types::Value,
    };

    #[test]
    fn test_format_query() {
        let config = EngineConfig::default();
        let result = Ok(ResultSet::Query {
            columns: vec!["a".into(), "b".into(), "c".into()],
            rows: vec![
                vec![Value::Integer(2), Value::Text("y".into()), Value::Null],
                vec![Value::Real(0.5), Value::Boolean(true), Value::Real(-0.0)],
            ],
        });
        assert_eq!(
            format_response(&result, &config),
            "2\ty\tNULL\n0.500\t1\t0.000\n\n"
        );
    }

    #[test]
    fn test_format_statements_and_errors() {
        let config = EngineConfig::default();
        assert_eq!(format_response(&Ok(ResultSet::Insert { count: 2 }), &config), "\n");
        assert_eq!(format_response(&Ok(ResultSet::Empty), &config), "\n");
        assert_eq!(
            format_response(&Err(Error::UnknownTable("users".into())), &config),
            "Error: no such table: users\n\n"
        );
    }

    #[test]
    fn test_blocks() {
        let mut reader = BlockReader::default();
        assert_eq!(reader.push_line(""), None);
        assert_eq!(reader.push_line("SELECT a"), None);
        assert_eq!(reader.push_line("FROM t;"), None);
        assert_eq!(reader.push_line(""), Some("SELECT a FROM t;".to_string()));
        assert_eq!(reader.push_line("SELECT 1"), None);
        assert_eq!(reader.finish(), Some("SELECT 1".to_string()));
        assert_eq!(reader.finish(), None);

        assert_eq!(trim_block("  SELECT 1 ; "), "SELECT 1");
        assert_eq!(trim_block(";"), "");
    }
}
