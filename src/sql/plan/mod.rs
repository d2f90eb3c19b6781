use crate::{
    config::EngineConfig,
    error::Result,
    sql::{
        engine::{Catalog, Transaction},
        executor::{ResultSet, execute},
        parser::ast,
        schema::Table,
        types::{DataType, Value},
    },
};

use self::planner::Planner;

pub mod planner;

/// Execution plan node
///
/// Every node yields rows of a fixed width; child nodes are owned by their
/// parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// CREATE TABLE
    CreateTable { schema: Table, if_not_exists: bool },

    /// DROP TABLE
    DropTable { name: String, if_exists: bool },

    /// INSERT: `columns` are the target positions for each source value
    Insert {
        table: Table,
        columns: Vec<usize>,
        source: Box<Node>,
    },

    /// UPDATE: assignments are evaluated against the old row
    Update {
        table: Table,
        filter: Option<Expression>,
        assignments: Vec<(usize, Expression)>,
    },

    /// DELETE
    Delete {
        table: Table,
        filter: Option<Expression>,
    },

    /// Full table scan in storage order
    Scan { table: Table },

    /// Literal rows; `SELECT` without FROM is a single empty row
    Values { rows: Vec<Vec<Expression>> },

    /// Keeps rows whose predicate is true
    Filter {
        source: Box<Node>,
        predicate: Expression,
    },

    /// Evaluates one expression per output column
    Projection {
        source: Box<Node>,
        exprs: Vec<(Expression, Option<String>)>,
    },

    /// Nested loop join; `outer` pads unmatched left rows with NULLs
    NestedLoopJoin {
        left: Box<Node>,
        right: Box<Node>,
        predicate: Option<Expression>,
        outer: bool,
        right_width: usize,
    },

    /// Groups rows; output is the group key values followed by the
    /// aggregate results
    Aggregate {
        source: Box<Node>,
        group_by: Vec<Expression>,
        aggregates: Vec<Aggregate>,
    },

    /// Stable sort
    Order {
        source: Box<Node>,
        orders: Vec<OrderKey>,
    },

    /// Removes duplicate rows, keeping the first occurrence
    Distinct { source: Box<Node> },

    /// LIMIT
    Limit {
        source: Box<Node>,
        limit: Expression,
    },

    /// OFFSET
    Offset {
        source: Box<Node>,
        offset: Expression,
    },
}

impl Node {
    /// Output column labels of a query node
    pub fn column_names(&self) -> Vec<String> {
        match self {
            Node::Projection { exprs, .. } => exprs
                .iter()
                .enumerate()
                .map(|(i, (_, name))| name.clone().unwrap_or_else(|| format!("column{}", i + 1)))
                .collect(),
            Node::Scan { table } => table.columns.iter().map(|c| c.name.clone()).collect(),
            Node::Filter { source, .. }
            | Node::Order { source, .. }
            | Node::Distinct { source }
            | Node::Limit { source, .. }
            | Node::Offset { source, .. } => source.column_names(),
            Node::NestedLoopJoin { left, right, .. } => {
                let mut names = left.column_names();
                names.extend(right.column_names());
                names
            }
            Node::Values { rows } => (1..=rows.first().map_or(0, |r| r.len()))
                .map(|i| format!("column{}", i))
                .collect(),
            Node::Aggregate {
                group_by,
                aggregates,
                ..
            } => (1..=group_by.len() + aggregates.len())
                .map(|i| format!("column{}", i))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// ORDER BY key over a column of the sorted rows
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub index: usize,
    pub direction: ast::OrderDirection,
    /// None uses the engine default for the direction
    pub nulls_first: Option<bool>,
}

/// Aggregate function applied per group
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// None for COUNT(*)
    pub arg: Option<Expression>,
    pub distinct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// Value of a column that is neither grouped nor aggregated, taken from
    /// the first row of the group
    First,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        })
    }
}

/// Expression bound to row positions
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column `index` of the row `depth` query levels out; depth 0 is the
    /// row being evaluated
    Column { depth: usize, index: usize },
    Constant(Value),
    Binary(BinaryOperator, Box<Expression>, Box<Expression>),
    Unary(UnaryOperator, Box<Expression>),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    Function(Function, Vec<Expression>),
    Case {
        operand: Option<Box<Expression>>,
        when_then: Vec<(Expression, Expression)>,
        else_expr: Option<Box<Expression>>,
    },
    Cast(Box<Expression>, DataType),
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Like {
        expr: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
    },
    Subquery(Box<Subquery>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperator {
    And,
    Or,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    Not,
    Negate,
    Identity,
}

/// Built-in scalar functions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Function {
    Abs,
    Coalesce,
    IfNull,
    NullIf,
    Length,
    Lower,
    Upper,
    Round,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "abs" => Self::Abs,
            "coalesce" => Self::Coalesce,
            "ifnull" => Self::IfNull,
            "nullif" => Self::NullIf,
            "length" => Self::Length,
            "lower" => Self::Lower,
            "upper" => Self::Upper,
            "round" => Self::Round,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Self::Abs | Self::Length | Self::Lower | Self::Upper => (1, 1),
            Self::IfNull | Self::NullIf => (2, 2),
            Self::Round => (1, 2),
            Self::Coalesce => (2, usize::MAX),
        }
    }
}

/// Nested query used as an expression
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    /// Unique within a statement; keys the result cache
    pub id: usize,
    pub plan: Node,
    /// References columns of an enclosing query, so it must be re-run per row
    pub correlated: bool,
    pub kind: SubqueryKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubqueryKind {
    /// Single value of the single column of the first row, NULL when empty
    Scalar,
    Exists { negated: bool },
    In { expr: Expression, negated: bool },
}

/// Execution plan (root node)
#[derive(Debug, PartialEq)]
pub struct Plan(pub Node);

impl Plan {
    /// Binds a statement against the catalog
    pub fn build<C: Catalog>(
        stmt: ast::Statement,
        catalog: &C,
        config: &EngineConfig,
    ) -> Result<Self> {
        Planner::new(catalog, config).build(stmt)
    }

    /// Executes the plan within a transaction
    pub fn execute<T: Transaction + 'static>(
        self,
        txn: &mut T,
        config: &EngineConfig,
    ) -> Result<ResultSet> {
        execute(&self.0, txn, config)
    }
}
