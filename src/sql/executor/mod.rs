use std::{collections::HashMap, rc::Rc};

use tracing::debug;

use crate::{
    config::EngineConfig,
    error::{Error, Result},
    sql::{
        engine::Transaction,
        executor::{
            agg::Aggregate,
            join::NestedLoopJoin,
            mutation::{Delete, Insert, Update},
            query::{Distinct, Filter, Limit, Offset, Order, Projection, Scan, Values},
            schema::{CreateTable, DropTable},
        },
        plan::Node,
        types::Row,
    },
};

mod agg;
mod expr;
mod join;
mod mutation;
mod query;
mod schema;

pub use expr::evaluate;

/// Pull-based executor for one plan node
///
/// `open` prepares (or restarts) the executor, `next` yields one row at a
/// time until it returns `None`.
pub trait Executor<T: Transaction> {
    fn open(&mut self, ctx: &mut Context<'_, T>) -> Result<()>;
    fn next(&mut self, ctx: &mut Context<'_, T>) -> Result<Option<Row>>;
}

/// Builds an executor from a plan node
///
/// The `'static` bound is required for trait object usage in recursive executor building.
impl<T: Transaction + 'static> dyn Executor<T> {
    pub fn build(node: &Node) -> Result<Box<dyn Executor<T> + '_>> {
        Ok(match node {
            Node::Scan { table } => Scan::new(table),
            Node::Values { rows } => Values::new(rows),
            Node::Filter { source, predicate } => Filter::new(Self::build(source)?, predicate),
            Node::Projection { source, exprs } => Projection::new(Self::build(source)?, exprs),
            Node::NestedLoopJoin {
                left,
                right,
                predicate,
                outer,
                right_width,
            } => NestedLoopJoin::new(
                Self::build(left)?,
                Self::build(right)?,
                predicate.as_ref(),
                *outer,
                *right_width,
            ),
            Node::Aggregate {
                source,
                group_by,
                aggregates,
            } => Aggregate::new(Self::build(source)?, group_by, aggregates),
            Node::Order { source, orders } => Order::new(Self::build(source)?, orders),
            Node::Distinct { source } => Distinct::new(Self::build(source)?),
            Node::Limit { source, limit } => Limit::new(Self::build(source)?, limit),
            Node::Offset { source, offset } => Offset::new(Self::build(source)?, offset),
            Node::CreateTable { .. }
            | Node::DropTable { .. }
            | Node::Insert { .. }
            | Node::Update { .. }
            | Node::Delete { .. } => {
                return Err(Error::Internal(format!(
                    "statement node used as a query: {:?}",
                    node
                )))
            }
        })
    }
}

/// Cached rows of an uncorrelated subquery
type CachedRows = Rc<Vec<Row>>;

/// Per-statement execution state shared by all executors
pub struct Context<'t, T: Transaction> {
    pub txn: &'t mut T,
    pub config: &'t EngineConfig,
    /// Rows of the enclosing queries while a subquery runs, innermost last
    outer: Vec<Row>,
    /// Results of uncorrelated subqueries, by subquery id
    cache: HashMap<usize, CachedRows>,
}

impl<'t, T: Transaction> Context<'t, T> {
    pub fn new(txn: &'t mut T, config: &'t EngineConfig) -> Self {
        Self {
            txn,
            config,
            outer: Vec::new(),
            cache: HashMap::new(),
        }
    }
}

/// Runs a plan to completion and collects its result
pub fn execute<T: Transaction + 'static>(
    node: &Node,
    txn: &mut T,
    config: &EngineConfig,
) -> Result<ResultSet> {
    let mut ctx = Context::new(txn, config);
    match node {
        Node::CreateTable {
            schema,
            if_not_exists,
        } => CreateTable::new(schema, *if_not_exists).execute(&mut ctx),
        Node::DropTable { name, if_exists } => DropTable::new(name, *if_exists).execute(&mut ctx),
        Node::Insert {
            table,
            columns,
            source,
        } => Insert::new(table, columns, <dyn Executor<T>>::build(source)?).execute(&mut ctx),
        Node::Update {
            table,
            filter,
            assignments,
        } => Update::new(table, filter.as_ref(), assignments).execute(&mut ctx),
        Node::Delete { table, filter } => Delete::new(table, filter.as_ref()).execute(&mut ctx),
        query => {
            let columns = query.column_names();
            let rows = collect(<dyn Executor<T>>::build(query)?.as_mut(), &mut ctx, None)?;
            debug!(rows = rows.len(), "query finished");
            Ok(ResultSet::Query { columns, rows })
        }
    }
}

/// Opens an executor and drains it, stopping after `limit` rows if given
fn collect<T: Transaction>(
    executor: &mut dyn Executor<T>,
    ctx: &mut Context<'_, T>,
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    executor.open(ctx)?;
    let mut rows = Vec::new();
    while limit.is_none_or(|limit| rows.len() < limit) {
        match executor.next(ctx)? {
            Some(row) => rows.push(row),
            None => break,
        }
    }
    Ok(rows)
}

/// Execution result set
#[derive(Debug, PartialEq)]
pub enum ResultSet {
    CreateTable { table_name: String },
    DropTable { table_name: String },
    Insert { count: usize },
    Update { count: usize },
    Delete { count: usize },
    Query { columns: Vec<String>, rows: Vec<Row> },
    /// Input without any statement
    Empty,
}
