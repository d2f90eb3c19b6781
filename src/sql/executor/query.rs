use std::{cmp::Ordering, collections::HashSet, vec};

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        parser::ast::OrderDirection,
        plan::{Expression, OrderKey},
        schema::Table,
        types::{GroupKey, Row, Value},
    },
};

use super::{Context, Executor, evaluate};

/// Table scan executor - yields the table's rows in storage order
pub struct Scan<'a> {
    table: &'a Table,
    rows: vec::IntoIter<Row>,
}

impl<'a> Scan<'a> {
    pub fn new(table: &'a Table) -> Box<Self> {
        Box::new(Self {
            table,
            rows: Vec::new().into_iter(),
        })
    }
}

impl<T: Transaction> Executor<T> for Scan<'_> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        // Each open takes a fresh snapshot from the start of the table
        let rows = ctx.txn.scan_table(self.table)?;
        self.rows = rows
            .into_iter()
            .map(|(_, row)| row)
            .collect::<Vec<_>>()
            .into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Literal rows, evaluated lazily
pub struct Values<'a> {
    rows: &'a [Vec<Expression>],
    position: usize,
}

impl<'a> Values<'a> {
    pub fn new(rows: &'a [Vec<Expression>]) -> Box<Self> {
        Box::new(Self { rows, position: 0 })
    }
}

impl<T: Transaction + 'static> Executor<T> for Values<'_> {
    fn open(&mut self, _ctx: &mut Context<'_, T>) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        let Some(exprs) = self.rows.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        exprs
            .iter()
            .map(|expr| evaluate(expr, &[], ctx))
            .collect::<Result<Row>>()
            .map(Some)
    }
}

/// Filter executor - keeps rows whose predicate evaluates to true
pub struct Filter<'a, T: Transaction> {
    source: Box<dyn Executor<T> + 'a>,
    predicate: &'a Expression,
}

impl<'a, T: Transaction> Filter<'a, T> {
    pub fn new(source: Box<dyn Executor<T> + 'a>, predicate: &'a Expression) -> Box<Self> {
        Box::new(Self { source, predicate })
    }
}

impl<T: Transaction + 'static> Executor<T> for Filter<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.source.open(ctx)
    }

    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        while let Some(row) = self.source.next(ctx)? {
            if evaluate(self.predicate, &row, ctx)?.truth()? == Some(true) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

/// Projection executor - computes the output columns of each row
pub struct Projection<'a, T: Transaction> {
    source: Box<dyn Executor<T> + 'a>,
    exprs: &'a [(Expression, Option<String>)],
}

impl<'a, T: Transaction> Projection<'a, T> {
    pub fn new(
        source: Box<dyn Executor<T> + 'a>,
        exprs: &'a [(Expression, Option<String>)],
    ) -> Box<Self> {
        Box::new(Self { source, exprs })
    }
}

impl<T: Transaction + 'static> Executor<T> for Projection<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.source.open(ctx)
    }

    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        let Some(row) = self.source.next(ctx)? else {
            return Ok(None);
        };
        self.exprs
            .iter()
            .map(|(expr, _)| evaluate(expr, &row, ctx))
            .collect::<Result<Row>>()
            .map(Some)
    }
}

/// Sort executor - buffers its input and sorts it stably
pub struct Order<'a, T: Transaction> {
    source: Box<dyn Executor<T> + 'a>,
    orders: &'a [OrderKey],
    rows: vec::IntoIter<Row>,
}

impl<'a, T: Transaction> Order<'a, T> {
    pub fn new(source: Box<dyn Executor<T> + 'a>, orders: &'a [OrderKey]) -> Box<Self> {
        Box::new(Self {
            source,
            orders,
            rows: Vec::new().into_iter(),
        })
    }
}

impl<T: Transaction> Executor<T> for Order<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.source.open(ctx)?;
        let mut rows = Vec::new();
        while let Some(row) = self.source.next(ctx)? {
            rows.push(row);
        }

        // NULLs come first in ascending order when they sort lowest
        let nulls_lowest = ctx.config.nulls_first;
        let keys: Vec<_> = self
            .orders
            .iter()
            .map(|o| {
                let ascending = o.direction == OrderDirection::Asc;
                let nulls_first = o.nulls_first.unwrap_or(nulls_lowest == ascending);
                (o.index, ascending, nulls_first)
            })
            .collect();
        // Vec::sort_by is stable, so ties keep their input order
        rows.sort_by(|a, b| {
            for &(index, ascending, nulls_first) in &keys {
                let (x, y) = (&a[index], &b[index]);
                let ordering = match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) if nulls_first => Ordering::Less,
                    (true, false) => Ordering::Greater,
                    (false, true) if nulls_first => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) if ascending => x.sort_cmp(y),
                    (false, false) => y.sort_cmp(x),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        self.rows = rows.into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Evaluates a LIMIT or OFFSET expression to a row count; negative values
/// mean no bound for LIMIT and zero for OFFSET
fn row_count<T: Transaction + 'static>(
    expr: &Expression,
    clause: &str,
    ctx: &mut Context<'_, T>,
) -> Result<Option<usize>> {
    match evaluate(expr, &[], ctx)? {
        Value::Integer(n) if n >= 0 => Ok(Some(n as usize)),
        Value::Integer(_) => Ok(None),
        v => Err(Error::TypeError(format!(
            "{} must be an integer, got {}",
            clause, v
        ))),
    }
}

/// LIMIT executor
pub struct Limit<'a, T: Transaction> {
    source: Box<dyn Executor<T> + 'a>,
    limit: &'a Expression,
    remaining: Option<usize>,
}

impl<'a, T: Transaction> Limit<'a, T> {
    pub fn new(source: Box<dyn Executor<T> + 'a>, limit: &'a Expression) -> Box<Self> {
        Box::new(Self {
            source,
            limit,
            remaining: None,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Limit<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.remaining = row_count(self.limit, "LIMIT", ctx)?;
        self.source.open(ctx)
    }

    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        match &mut self.remaining {
            Some(0) => Ok(None),
            Some(remaining) => {
                *remaining -= 1;
                self.source.next(ctx)
            }
            None => self.source.next(ctx),
        }
    }
}

/// OFFSET executor - skips the first rows of its input
pub struct Offset<'a, T: Transaction> {
    source: Box<dyn Executor<T> + 'a>,
    offset: &'a Expression,
    skip: usize,
}

impl<'a, T: Transaction> Offset<'a, T> {
    pub fn new(source: Box<dyn Executor<T> + 'a>, offset: &'a Expression) -> Box<Self> {
        Box::new(Self {
            source,
            offset,
            skip: 0,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Offset<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.skip = row_count(self.offset, "OFFSET", ctx)?.unwrap_or(0);
        self.source.open(ctx)
    }

    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        while self.skip > 0 {
            self.skip -= 1;
            if self.source.next(ctx)?.is_none() {
                return Ok(None);
            }
        }
        self.source.next(ctx)
    }
}

/// DISTINCT executor - yields the first occurrence of each row
pub struct Distinct<'a, T: Transaction> {
    source: Box<dyn Executor<T> + 'a>,
    seen: HashSet<GroupKey>,
}

impl<'a, T: Transaction> Distinct<'a, T> {
    pub fn new(source: Box<dyn Executor<T> + 'a>) -> Box<Self> {
        Box::new(Self {
            source,
            seen: HashSet::new(),
        })
    }
}

impl<T: Transaction> Executor<T> for Distinct<'_, T> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()> {
        self.seen.clear();
        self.source.open(ctx)
    }

    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>> {
        while let Some(row) = self.source.next(ctx)? {
            if self.seen.insert(GroupKey(row.clone())) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}
