use tracing::{debug, warn};

use crate::{
    config::EngineConfig,
    error::{Error, Result},
};

use super::{
    executor::ResultSet,
    parser::Parser,
    plan::Plan,
    schema::Table,
    types::Row,
};

mod kv;

pub use kv::{KVEngine, KVTransaction};

/// SQL engine trait
pub trait Engine: Clone {
    type Transaction: Transaction;

    fn begin(&self) -> Result<Self::Transaction>;

    fn session(&self) -> Result<Session<Self>> {
        self.session_with_config(EngineConfig::default())
    }

    fn session_with_config(&self, config: EngineConfig) -> Result<Session<Self>> {
        Ok(Session {
            engine: self.clone(),
            config,
        })
    }
}

/// Table catalog: case-insensitive table name to schema
pub trait Catalog {
    fn create_table(&mut self, table: Table) -> Result<()>;
    fn drop_table(&mut self, table_name: &str) -> Result<()>;
    fn get_table(&self, table_name: &str) -> Result<Option<Table>>;

    /// Returns table info, returns error if table doesn't exist
    fn must_get_table(&self, table_name: &str) -> Result<Table> {
        self.get_table(table_name)?
            .ok_or_else(|| Error::UnknownTable(table_name.to_string()))
    }
}

/// SQL transaction trait (DDL and DML operations)
///
/// Rows are addressed by a per-table id that grows with every insert, so
/// scanning in id order is scanning in insertion order.
pub trait Transaction: Catalog {
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// Checks the row against the schema and appends it to the table
    fn create_row(&mut self, table: &Table, row: Row) -> Result<()>;
    /// Replaces rows in place, keeping their ids
    fn update_rows(&mut self, table: &Table, rows: Vec<(u64, Row)>) -> Result<()>;
    fn delete_rows(&mut self, table: &Table, ids: Vec<u64>) -> Result<()>;
    /// All rows of the table with their ids, in insertion order
    fn scan_table(&self, table: &Table) -> Result<Vec<(u64, Row)>>;
}

/// SQL session for executing statements
pub struct Session<E: Engine> {
    engine: E,
    config: EngineConfig,
}

impl<E: Engine + 'static> Session<E> {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes a block of `;`-separated statements
    ///
    /// The whole block is parsed before anything runs. Each statement runs in
    /// its own transaction; the first failure rolls that statement back and
    /// stops the block, leaving earlier statements committed. Returns the
    /// result of the last statement.
    pub fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        let statements = Parser::new(sql).parse_statements()?;
        let mut result = ResultSet::Empty;
        for stmt in statements {
            let mut txn = self.engine.begin()?;
            let outcome = Plan::build(stmt, &txn, &self.config)
                .and_then(|plan| plan.execute(&mut txn, &self.config));
            match outcome {
                Ok(rs) => {
                    txn.commit()?;
                    result = rs;
                }
                Err(err) => {
                    match err.is_internal() {
                        true => warn!(%err, "statement failed"),
                        false => debug!(%err, "statement failed"),
                    }
                    txn.rollback()?;
                    return Err(err);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::{Engine, KVEngine, Session};
    use crate::{
        config::{DivisionByZero, EngineConfig},
        error::{Error, Result},
        sql::{executor::ResultSet, parser::MAX_NESTING_DEPTH, types::Value},
        storage::memory::MemoryEngine,
    };

    type MemorySession = Session<KVEngine<MemoryEngine>>;

    /// Session over a three row table `t (a primary key, b)`
    fn three_rows(config: EngineConfig) -> Result<MemorySession> {
        let mut s = KVEngine::new(MemoryEngine::new()).session_with_config(config)?;
        s.execute("create table t (a integer primary key, b integer)")?;
        s.execute("insert into t values (1, 10), (2, 20), (3, 30)")?;
        Ok(s)
    }

    fn rows(s: &mut MemorySession) -> Result<ResultSet> {
        s.execute("select a, b from t order by a")
    }

    #[test]
    fn test_statement_atomicity() -> Result<()> {
        let mut s = KVEngine::new(MemoryEngine::new()).session()?;
        s.execute("create table t (a integer primary key, b text)")?;
        s.execute("insert into t values (1, 'x')")?;

        // The second row violates the primary key, so neither row is kept
        assert_eq!(
            s.execute("insert into t values (2, 'y'), (1, 'z')"),
            Err(Error::Constraint("duplicate primary key 1 in table t".into()))
        );
        assert_eq!(
            s.execute("select a, b from t")?,
            ResultSet::Query {
                columns: vec!["a".into(), "b".into()],
                rows: vec![vec![Value::Integer(1), Value::Text("x".into())]],
            }
        );
        Ok(())
    }

    #[test]
    fn test_block_stops_at_first_error() -> Result<()> {
        let mut s = KVEngine::new(MemoryEngine::new()).session()?;
        assert_eq!(
            s.execute(
                "create table t (a int); insert into missing values (1); insert into t values (2)"
            ),
            Err(Error::UnknownTable("missing".into()))
        );
        assert_eq!(
            s.execute("select count(*) as n from t")?,
            ResultSet::Query {
                columns: vec!["n".into()],
                rows: vec![vec![Value::Integer(0)]],
            }
        );
        Ok(())
    }

    #[test]
    fn test_syntax_error_runs_nothing() -> Result<()> {
        let mut s = KVEngine::new(MemoryEngine::new()).session()?;
        assert!(matches!(
            s.execute("create table t (a int); selec 1"),
            Err(Error::Parse(_))
        ));
        assert_eq!(
            s.execute("select * from t"),
            Err(Error::UnknownTable("t".into()))
        );
        assert_eq!(s.execute("  ;; ")?, ResultSet::Empty);
        Ok(())
    }

    #[test]
    fn test_failed_update_keeps_rows() -> Result<()> {
        let mut s = three_rows(EngineConfig::default())?;
        let before = rows(&mut s)?;

        // Fails on the second row, after every old index entry was removed
        assert_eq!(
            s.execute("update t set a = 7"),
            Err(Error::Constraint("duplicate primary key 7 in table t".into()))
        );
        assert_eq!(rows(&mut s)?, before);
        s.execute("insert into t values (4, 40)")?;
        assert_eq!(
            s.execute("insert into t values (1, 0)"),
            Err(Error::Constraint("duplicate primary key 1 in table t".into()))
        );
        Ok(())
    }

    #[test]
    fn test_failed_expression_keeps_rows() -> Result<()> {
        let mut s = three_rows(EngineConfig {
            division_by_zero: DivisionByZero::Error,
            ..EngineConfig::default()
        })?;
        let before = rows(&mut s)?;

        assert_eq!(
            s.execute("update t set b = 10 / (a - 3)"),
            Err(Error::DivisionByZero)
        );
        assert_eq!(
            s.execute("delete from t where 10 / (a - 3) < 0"),
            Err(Error::DivisionByZero)
        );
        assert_eq!(rows(&mut s)?, before);
        Ok(())
    }

    #[test]
    fn test_deep_nesting_fails_cleanly() -> Result<()> {
        let mut s = KVEngine::new(MemoryEngine::new()).session()?;
        let sql = format!("select {}1{}", "(".repeat(5000), ")".repeat(5000));
        assert_eq!(
            s.execute(&sql),
            Err(Error::StackDepthExceeded(MAX_NESTING_DEPTH))
        );
        assert_eq!(
            s.execute("select 2 as n")?,
            ResultSet::Query {
                columns: vec!["n".into()],
                rows: vec![vec![Value::Integer(2)]],
            }
        );
        Ok(())
    }
}
