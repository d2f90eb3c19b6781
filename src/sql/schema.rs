use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sql::types::{DataType, Row, Value},
};

/// Table schema definition
///
/// Names keep the case they were declared with; lookups ignore case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Validates table schema
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::SchemaMismatch(format!(
                "table {} has no columns",
                self.name
            )));
        }

        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(Error::SchemaMismatch(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
            if let Some(default) = &column.default {
                if default.is_null() && !column.nullable {
                    return Err(Error::SchemaMismatch(format!(
                        "column {} is NOT NULL but defaults to NULL",
                        column.name
                    )));
                }
            }
        }

        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(Error::SchemaMismatch(format!(
                "table {} has more than one primary key",
                self.name
            )));
        }
        Ok(())
    }

    /// Position of the primary key column, if the table has one
    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    /// Returns the column index for a given column name
    pub fn get_col_index(&self, col_name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(col_name))
            .ok_or_else(|| Error::UnknownColumn(format!("{}.{}", self.name, col_name)))
    }

    /// Checks a full row against the schema, widening values where allowed,
    /// and returns the row as it will be stored.
    pub fn check_row(&self, row: Row) -> Result<Row> {
        if row.len() != self.columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "table {} has {} columns but {} values were supplied",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }

        self.columns
            .iter()
            .zip(row)
            .map(|(col, value)| col.check_value(&self.name, value))
            .collect()
    }
}

/// Column schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    /// Primary key columns are unique and NOT NULL
    pub primary_key: bool,
}

impl Column {
    fn check_value(&self, table: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            if !self.nullable {
                return Err(Error::SchemaMismatch(format!(
                    "NOT NULL constraint failed: {}.{}",
                    table, self.name
                )));
            }
            return Ok(value);
        }

        let found = value.datatype();
        value.coerce_to(self.datatype).ok_or_else(|| {
            Error::SchemaMismatch(format!(
                "type mismatch for column {}.{}: expected {}, got {}",
                table,
                self.name,
                self.datatype,
                found.map(|dt| dt.to_string()).unwrap_or_default()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, Table};
    use crate::{
        error::{Error, Result},
        sql::types::{DataType, Value},
    };

    fn column(name: &str, datatype: DataType, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            datatype,
            nullable,
            default: None,
            primary_key: false,
        }
    }

    fn table() -> Table {
        Table {
            name: "Items".to_string(),
            columns: vec![
                column("Id", DataType::Integer, false),
                column("price", DataType::Real, true),
                column("label", DataType::Text, true),
            ],
        }
    }

    #[test]
    fn test_column_lookup_ignores_case() -> Result<()> {
        let table = table();
        assert_eq!(table.get_col_index("id")?, 0);
        assert_eq!(table.get_col_index("LABEL")?, 2);
        assert!(matches!(table.get_col_index("missing"), Err(Error::UnknownColumn(_))));
        Ok(())
    }

    #[test]
    fn test_check_row() -> Result<()> {
        let table = table();
        assert_eq!(
            table.check_row(vec![Value::Integer(1), Value::Integer(5), Value::Null])?,
            vec![Value::Integer(1), Value::Real(5.0), Value::Null]
        );
        assert!(matches!(
            table.check_row(vec![Value::Null, Value::Null, Value::Null]),
            Err(Error::SchemaMismatch(_))
        ));
        assert!(matches!(
            table.check_row(vec![Value::Text("1".into()), Value::Null, Value::Null]),
            Err(Error::SchemaMismatch(_))
        ));
        assert!(matches!(
            table.check_row(vec![Value::Integer(1)]),
            Err(Error::SchemaMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_duplicate_columns() {
        let mut table = table();
        table.columns.push(column("ID", DataType::Text, true));
        assert!(matches!(table.validate(), Err(Error::SchemaMismatch(_))));
    }
}
