use tracing::debug;

use crate::{
    error::Result,
    sql::{engine::Transaction, executor::ResultSet, schema::Table},
};

use super::Context;

/// CREATE TABLE executor
pub struct CreateTable<'a> {
    schema: &'a Table,
    if_not_exists: bool,
}

impl<'a> CreateTable<'a> {
    pub fn new(schema: &'a Table, if_not_exists: bool) -> Box<Self> {
        Box::new(Self {
            schema,
            if_not_exists,
        })
    }

    pub fn execute<T: Transaction>(self: Box<Self>, ctx: &mut Context<'_, T>) -> Result<ResultSet> {
        let table_name = self.schema.name.clone();
        if self.if_not_exists && ctx.txn.get_table(&table_name)?.is_some() {
            debug!(table = %table_name, "table exists, skipping create");
        } else {
            ctx.txn.create_table(self.schema.clone())?;
        }
        Ok(ResultSet::CreateTable { table_name })
    }
}

/// DROP TABLE executor
pub struct DropTable<'a> {
    name: &'a str,
    if_exists: bool,
}

impl<'a> DropTable<'a> {
    pub fn new(name: &'a str, if_exists: bool) -> Box<Self> {
        Box::new(Self { name, if_exists })
    }

    pub fn execute<T: Transaction>(self: Box<Self>, ctx: &mut Context<'_, T>) -> Result<ResultSet> {
        if self.if_exists && ctx.txn.get_table(self.name)?.is_none() {
            debug!(table = %self.name, "table missing, skipping drop");
        } else {
            ctx.txn.drop_table(self.name)?;
        }
        Ok(ResultSet::DropTable {
            table_name: self.name.to_string(),
        })
    }
}
