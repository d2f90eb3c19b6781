use tracing::debug;

use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        plan::Expression,
        schema::Table,
        types::{Row, Value},
    },
};

use super::{Context, Executor, ResultSet, collect, evaluate};

/// INSERT executor
pub struct Insert<'a, T: Transaction> {
    table: &'a Table,
    columns: &'a [usize],
    source: Box<dyn Executor<T> + 'a>,
}

impl<'a, T: Transaction + 'static> Insert<'a, T> {
    pub fn new(
        table: &'a Table,
        columns: &'a [usize],
        source: Box<dyn Executor<T> + 'a>,
    ) -> Box<Self> {
        Box::new(Self {
            table,
            columns,
            source,
        })
    }

    /// Places source values at their target positions; omitted columns take
    /// their DEFAULT, or NULL
    fn make_row(&self, values: Row) -> Row {
        let mut row: Row = self
            .table
            .columns
            .iter()
            .map(|c| c.default.clone().unwrap_or(Value::Null))
            .collect();
        for (&index, value) in self.columns.iter().zip(values) {
            row[index] = value;
        }
        row
    }

    pub fn execute(mut self: Box<Self>, ctx: &mut Context<'_, T>) -> Result<ResultSet> {
        // The source is drained before writing, so INSERT ... SELECT from the
        // same table only sees the rows that existed before the statement
        let rows = collect(self.source.as_mut(), ctx, None)?;
        let count = rows.len();
        for values in rows {
            let row = self.make_row(values);
            ctx.txn.create_row(self.table, row)?;
        }
        debug!(table = %self.table.name, count, "inserted rows");
        Ok(ResultSet::Insert { count })
    }
}

/// Returns the rows of a table matching an optional filter, with their ids
fn matching_rows<T: Transaction + 'static>(
    table: &Table,
    filter: Option<&Expression>,
    ctx: &mut Context<'_, T>,
) -> Result<Vec<(u64, Row)>> {
    let rows = ctx.txn.scan_table(table)?;
    let Some(filter) = filter else {
        return Ok(rows);
    };
    let mut matched = Vec::new();
    for (id, row) in rows {
        if evaluate(filter, &row, ctx)?.truth()? == Some(true) {
            matched.push((id, row));
        }
    }
    Ok(matched)
}

/// UPDATE executor
pub struct Update<'a> {
    table: &'a Table,
    filter: Option<&'a Expression>,
    assignments: &'a [(usize, Expression)],
}

impl<'a> Update<'a> {
    pub fn new(
        table: &'a Table,
        filter: Option<&'a Expression>,
        assignments: &'a [(usize, Expression)],
    ) -> Box<Self> {
        Box::new(Self {
            table,
            filter,
            assignments,
        })
    }

    pub fn execute<T: Transaction + 'static>(
        self: Box<Self>,
        ctx: &mut Context<'_, T>,
    ) -> Result<ResultSet> {
        let mut updates = Vec::new();
        for (id, row) in matching_rows(self.table, self.filter, ctx)? {
            // Every assignment sees the row as it was before the update
            let mut new_row = row.clone();
            for (index, expr) in self.assignments {
                new_row[*index] = evaluate(expr, &row, ctx)?;
            }
            updates.push((id, new_row));
        }
        let count = updates.len();
        ctx.txn.update_rows(self.table, updates)?;
        debug!(table = %self.table.name, count, "updated rows");
        Ok(ResultSet::Update { count })
    }
}

/// DELETE executor
pub struct Delete<'a> {
    table: &'a Table,
    filter: Option<&'a Expression>,
}

impl<'a> Delete<'a> {
    pub fn new(table: &'a Table, filter: Option<&'a Expression>) -> Box<Self> {
        Box::new(Self { table, filter })
    }

    pub fn execute<T: Transaction + 'static>(
        self: Box<Self>,
        ctx: &mut Context<'_, T>,
    ) -> Result<ResultSet> {
        let ids: Vec<u64> = matching_rows(self.table, self.filter, ctx)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let count = ids.len();
        ctx.txn.delete_rows(self.table, ids)?;
        debug!(table = %self.table.name, count, "deleted rows");
        Ok(ResultSet::Delete { count })
    }
}
