use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    error::{Error, Result},
    sql::{
        schema::Table,
        types::{Row, Value},
    },
    storage::{self, engine::Engine as StorageEngine, keycode},
};

use super::{Catalog, Engine, Transaction};

/// Key-value store backed SQL engine
pub struct KVEngine<E: StorageEngine> {
    pub kv: storage::mvcc::Mvcc<E>,
}

impl<E: StorageEngine> Clone for KVEngine<E> {
    fn clone(&self) -> Self {
        Self {
            kv: self.kv.clone(),
        }
    }
}

impl<E: StorageEngine> KVEngine<E> {
    pub fn new(engine: E) -> Self {
        Self {
            kv: storage::mvcc::Mvcc::new(engine),
        }
    }
}

impl<E: StorageEngine> Engine for KVEngine<E> {
    type Transaction = KVTransaction<E>;

    fn begin(&self) -> Result<Self::Transaction> {
        Ok(Self::Transaction::new(self.kv.begin()?))
    }
}

/// Key-value transaction (wrapper around MVCC transaction)
pub struct KVTransaction<E: StorageEngine> {
    txn: storage::mvcc::MvccTransaction<E>,
}

impl<E: StorageEngine> KVTransaction<E> {
    pub fn new(txn: storage::mvcc::MvccTransaction<E>) -> Self {
        Self { txn }
    }

    /// Allocates the next row id of a table
    fn next_row_id(&self, table: &str) -> Result<u64> {
        let key = Key::Sequence(table.into()).encode()?;
        let id = match self.txn.get(key.clone())? {
            Some(value) => bincode::deserialize(&value)?,
            None => 1,
        };
        self.txn.set(key, bincode::serialize(&(id + 1))?)?;
        Ok(id)
    }

    /// Primary key index entry of a row, for tables that have a primary key
    fn index_key(table: &Table, row: &Row) -> Result<Option<Vec<u8>>> {
        let Some(pk) = table.primary_key_index() else {
            return Ok(None);
        };
        let value = bincode::serialize(&row[pk])?;
        Ok(Some(Key::Index(normalize(&table.name), value).encode()?))
    }

    fn write_row(&self, table: &Table, id: u64, row: &Row) -> Result<()> {
        if let Some(index_key) = Self::index_key(table, row)? {
            if self.txn.get(index_key.clone())?.is_some() {
                let pk = table.primary_key_index().map(|i| &row[i]);
                return Err(Error::Constraint(format!(
                    "duplicate primary key {} in table {}",
                    pk.unwrap_or(&Value::Null),
                    table.name
                )));
            }
            self.txn.set(index_key, bincode::serialize(&id)?)?;
        }
        let key = Key::Row(normalize(&table.name), id).encode()?;
        self.txn.set(key, bincode::serialize(row)?)
    }

    fn remove_row(&self, table: &Table, id: u64) -> Result<()> {
        let key = Key::Row(normalize(&table.name), id).encode()?;
        if let Some(value) = self.txn.get(key.clone())? {
            let row: Row = bincode::deserialize(&value)?;
            if let Some(index_key) = Self::index_key(table, &row)? {
                self.txn.delete(index_key)?;
            }
        }
        self.txn.delete(key)
    }
}

/// Table names are case-insensitive; storage keys use the lowercase form
fn normalize(name: &str) -> String {
    name.to_lowercase()
}

impl<E: StorageEngine> Catalog for KVTransaction<E> {
    fn create_table(&mut self, table: Table) -> Result<()> {
        if self.get_table(&table.name)?.is_some() {
            return Err(Error::DuplicateTable(table.name));
        }
        table.validate()?;

        let key = Key::Table(normalize(&table.name)).encode()?;
        let value = bincode::serialize(&table)?;
        trace!(table = %table.name, "create table");
        self.txn.set(key, value)
    }

    fn drop_table(&mut self, table_name: &str) -> Result<()> {
        let table = self.must_get_table(table_name)?;
        let name = normalize(&table.name);

        // Rows, index entries and the id sequence go with the schema, so a
        // table created later under the same name starts out empty
        for prefix in [KeyPrefix::Row(name.clone()), KeyPrefix::Index(name.clone())] {
            for result in self.txn.scan_prefix(prefix.encode()?)? {
                self.txn.delete(result.key)?;
            }
        }
        self.txn.delete(Key::Sequence(name.clone()).encode()?)?;
        trace!(table = %table.name, "drop table");
        self.txn.delete(Key::Table(name).encode()?)
    }

    fn get_table(&self, table_name: &str) -> Result<Option<Table>> {
        let key = Key::Table(normalize(table_name)).encode()?;
        self.txn
            .get(key)?
            .map(|v| bincode::deserialize(&v))
            .transpose()
            .map_err(Error::from)
    }
}

impl<E: StorageEngine> Transaction for KVTransaction<E> {
    fn commit(&self) -> Result<()> {
        self.txn.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.txn.rollback()
    }

    fn create_row(&mut self, table: &Table, row: Row) -> Result<()> {
        let row = table.check_row(row)?;
        let id = self.next_row_id(&normalize(&table.name))?;
        self.write_row(table, id, &row)
    }

    fn update_rows(&mut self, table: &Table, rows: Vec<(u64, Row)>) -> Result<()> {
        let rows = rows
            .into_iter()
            .map(|(id, row)| Ok((id, table.check_row(row)?)))
            .collect::<Result<Vec<_>>>()?;
        // Clear every old index entry first, so rows may swap key values
        for (id, _) in &rows {
            self.remove_row(table, *id)?;
        }
        for (id, row) in &rows {
            self.write_row(table, *id, row)?;
        }
        Ok(())
    }

    fn delete_rows(&mut self, table: &Table, ids: Vec<u64>) -> Result<()> {
        for id in ids {
            self.remove_row(table, id)?;
        }
        Ok(())
    }

    fn scan_table(&self, table: &Table) -> Result<Vec<(u64, Row)>> {
        let prefix = KeyPrefix::Row(normalize(&table.name)).encode()?;
        self.txn
            .scan_prefix(prefix)?
            .into_iter()
            .map(|result| match keycode::deserialize_key(&result.key)? {
                Key::Row(_, id) => Ok((id, bincode::deserialize(&result.value)?)),
                key => Err(Error::Internal(format!("unexpected key {:?}", key))),
            })
            .collect()
    }
}

/// Key types for KV storage operations
///
/// Encoded with the order-preserving key codec, so rows of one table sort
/// by id and share the `KeyPrefix::Row` prefix.
#[derive(Debug, Serialize, Deserialize)]
enum Key {
    Table(String),
    Row(String, u64),
    /// Next row id of a table
    Sequence(String),
    /// Primary key value to row id
    Index(String, #[serde(with = "serde_bytes")] Vec<u8>),
}

impl Key {
    fn encode(&self) -> Result<Vec<u8>> {
        keycode::serialize_key(self)
    }
}

/// Key prefix types for prefix scanning
///
/// Variants must stay in the same order as `Key`.
#[derive(Debug, Serialize, Deserialize)]
enum KeyPrefix {
    Table,
    Row(String),
    Sequence,
    Index(String),
}

impl KeyPrefix {
    fn encode(&self) -> Result<Vec<u8>> {
        keycode::serialize_key(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{KVEngine, Key, KeyPrefix};
    use crate::{
        error::{Error, Result},
        sql::{
            engine::{Catalog, Engine, Transaction},
            executor::ResultSet,
            schema::{Column, Table},
            types::{DataType, Value},
        },
        storage::memory::MemoryEngine,
    };

    fn table() -> Table {
        Table {
            name: "Users".into(),
            columns: vec![
                Column {
                    name: "id".into(),
                    datatype: DataType::Integer,
                    nullable: false,
                    default: None,
                    primary_key: true,
                },
                Column {
                    name: "score".into(),
                    datatype: DataType::Real,
                    nullable: true,
                    default: None,
                    primary_key: false,
                },
            ],
        }
    }

    #[test]
    fn test_row_prefix_matches_row_keys() -> Result<()> {
        let prefix = KeyPrefix::Row("t".into()).encode()?;
        assert!(Key::Row("t".into(), 7).encode()?.starts_with(&prefix));
        assert!(!Key::Row("t2".into(), 7).encode()?.starts_with(&prefix));
        assert!(Key::Row("t".into(), 2).encode()? < Key::Row("t".into(), 10).encode()?);
        Ok(())
    }

    #[test]
    fn test_catalog() -> Result<()> {
        let engine = KVEngine::new(MemoryEngine::new());
        let mut txn = engine.begin()?;
        txn.create_table(table())?;
        assert_eq!(
            txn.create_table(Table {
                name: "USERS".into(),
                ..table()
            }),
            Err(Error::DuplicateTable("USERS".into()))
        );
        assert_eq!(txn.must_get_table("users")?, table());
        txn.drop_table("USERS")?;
        assert_eq!(txn.get_table("users")?, None);
        assert_eq!(
            txn.drop_table("users"),
            Err(Error::UnknownTable("users".into()))
        );
        txn.commit()
    }

    #[test]
    fn test_rows() -> Result<()> {
        let engine = KVEngine::new(MemoryEngine::new());
        let mut txn = engine.begin()?;
        let table = table();
        txn.create_table(table.clone())?;
        for i in 1..=3 {
            txn.create_row(&table, vec![Value::Integer(i), Value::Integer(i * 10)])?;
        }

        // Integers widen into the REAL column
        let rows = txn.scan_table(&table)?;
        assert_eq!(
            rows.iter().map(|(_, r)| r[1].clone()).collect::<Vec<_>>(),
            vec![Value::Real(10.0), Value::Real(20.0), Value::Real(30.0)]
        );

        assert!(matches!(
            txn.create_row(&table, vec![Value::Integer(2), Value::Null]),
            Err(Error::Constraint(_))
        ));
        assert!(matches!(
            txn.create_row(&table, vec![Value::Null, Value::Null]),
            Err(Error::SchemaMismatch(_))
        ));

        // Swapping primary keys in one update is allowed
        let (id1, id2) = (rows[0].0, rows[1].0);
        txn.update_rows(
            &table,
            vec![
                (id1, vec![Value::Integer(2), Value::Null]),
                (id2, vec![Value::Integer(1), Value::Null]),
            ],
        )?;
        txn.delete_rows(&table, vec![rows[2].0])?;
        let keys: Vec<_> = txn.scan_table(&table)?.into_iter().map(|(_, r)| r[0].clone()).collect();
        assert_eq!(keys, vec![Value::Integer(2), Value::Integer(1)]);

        // The deleted key can be reused
        txn.create_row(&table, vec![Value::Integer(3), Value::Null])?;
        txn.commit()
    }

    #[test]
    fn test_drop_then_create_is_empty() -> Result<()> {
        let engine = KVEngine::new(MemoryEngine::new());
        let mut s = engine.session()?;
        s.execute("create table t (a int primary key); insert into t values (1), (2)")?;
        s.execute("drop table t; create table t (a int primary key)")?;
        s.execute("insert into t values (1)")?;
        assert_eq!(
            s.execute("select * from t")?,
            ResultSet::Query {
                columns: vec!["a".into()],
                rows: vec![vec![Value::Integer(1)]],
            }
        );
        Ok(())
    }
}
