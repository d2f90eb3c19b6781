use crate::sql::types::DataType;

/// Abstract Syntax Tree (AST) node definitions for SQL statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// CREATE TABLE statement
    CreateTable {
        name: String,
        columns: Vec<Column>,
        if_not_exists: bool,
    },
    /// DROP TABLE statement
    DropTable { name: String, if_exists: bool },
    /// INSERT statement
    Insert {
        table_name: String,
        columns: Option<Vec<String>>,
        source: InsertSource,
    },
    /// SELECT statement
    Select(Box<Select>),
    /// UPDATE statement, assignments in the order written
    Update {
        table_name: String,
        columns: Vec<(String, Expression)>,
        where_clause: Option<Expression>,
    },
    /// DELETE statement
    Delete {
        table_name: String,
        where_clause: Option<Expression>,
    },
}

/// Rows for an INSERT: literal VALUES or the output of a query
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expression>>),
    Select(Box<Select>),
}

/// A SELECT query, also used for subqueries and derived tables
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    /// None for `SELECT <exprs>` without a FROM clause
    pub from: Option<FromItem>,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

/// One entry of the SELECT list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `t.*`
    QualifiedWildcard(String),
    /// Expression with optional alias (e.g., count(*) as cnt)
    Expr(Expression, Option<String>),
}

/// FROM clause item - represents a table, derived table or join expression
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// Single table reference
    Table { name: String, alias: Option<String> },
    /// Parenthesized subquery used as a table
    Subquery {
        query: Box<Select>,
        alias: Option<String>,
    },
    /// Join expression (two items joined together)
    Join {
        left: Box<FromItem>,
        right: Box<FromItem>,
        join_type: JoinType,
        /// Join ON condition (None for CROSS JOIN and comma lists)
        predicate: Option<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinType {
    Cross,
    Inner,
    Left,
    Right,
}

/// Sort direction (ascending or descending)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// ORDER BY entry
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expression,
    pub direction: OrderDirection,
    /// Explicit `NULLS FIRST` / `NULLS LAST`, None follows the engine default
    pub nulls_first: Option<bool>,
}

/// Column definition for CREATE TABLE statements
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: Option<bool>,
    pub default: Option<Expression>,
    pub primary_key: bool,
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference with optional table qualifier
    Field(Option<String>, String),
    /// Constant value
    Consts(Consts),
    /// Unary and binary operators
    Operation(Operation),
    /// Scalar or aggregate function call; `count(*)` has no arguments
    Function {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// Simple (`CASE x WHEN ..`) or searched (`CASE WHEN ..`) conditional
    Case {
        operand: Option<Box<Expression>>,
        when_then: Vec<(Expression, Expression)>,
        else_expr: Option<Box<Expression>>,
    },
    Cast(Box<Expression>, DataType),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expression>,
        query: Box<Select>,
        negated: bool,
    },
    Exists {
        query: Box<Select>,
        negated: bool,
    },
    /// Scalar subquery, yields the single value of its single row
    Subquery(Box<Select>),
    Like {
        expr: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
    },
}

/// Implements From trait to convert Consts into Expression
impl From<Consts> for Expression {
    fn from(value: Consts) -> Self {
        Self::Consts(value)
    }
}

impl From<Operation> for Expression {
    fn from(value: Operation) -> Self {
        Self::Operation(value)
    }
}

/// Constant values in SQL expressions
#[derive(Debug, PartialEq, Clone)]
pub enum Consts {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Operators
#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),

    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    LessThan(Box<Expression>, Box<Expression>),
    LessThanOrEqual(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),

    Add(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Remainder(Box<Expression>, Box<Expression>),
    Concat(Box<Expression>, Box<Expression>),
    Negate(Box<Expression>),
    /// Unary plus
    Identity(Box<Expression>),
}

impl Expression {
    /// Walks the expression tree (not descending into subqueries) and
    /// returns true if the visitor returns true for any node.
    pub fn contains(&self, visitor: &impl Fn(&Expression) -> bool) -> bool {
        if visitor(self) {
            return true;
        }
        match self {
            Expression::Field(..) | Expression::Consts(_) => false,
            Expression::Subquery(_) | Expression::Exists { .. } => false,
            Expression::Operation(op) => match op {
                Operation::Not(e) | Operation::Negate(e) | Operation::Identity(e) => {
                    e.contains(visitor)
                }
                Operation::And(l, r)
                | Operation::Or(l, r)
                | Operation::Equal(l, r)
                | Operation::NotEqual(l, r)
                | Operation::LessThan(l, r)
                | Operation::LessThanOrEqual(l, r)
                | Operation::GreaterThan(l, r)
                | Operation::GreaterThanOrEqual(l, r)
                | Operation::Add(l, r)
                | Operation::Subtract(l, r)
                | Operation::Multiply(l, r)
                | Operation::Divide(l, r)
                | Operation::Remainder(l, r)
                | Operation::Concat(l, r) => l.contains(visitor) || r.contains(visitor),
            },
            Expression::Function { args, .. } => args.iter().any(|a| a.contains(visitor)),
            Expression::Case {
                operand,
                when_then,
                else_expr,
            } => {
                operand.as_ref().is_some_and(|e| e.contains(visitor))
                    || when_then
                        .iter()
                        .any(|(w, t)| w.contains(visitor) || t.contains(visitor))
                    || else_expr.as_ref().is_some_and(|e| e.contains(visitor))
            }
            Expression::Cast(e, _) | Expression::IsNull { expr: e, .. } => e.contains(visitor),
            Expression::InList { expr, list, .. } => {
                expr.contains(visitor) || list.iter().any(|e| e.contains(visitor))
            }
            Expression::InSubquery { expr, .. } => expr.contains(visitor),
            Expression::Like { expr, pattern, .. } => {
                expr.contains(visitor) || pattern.contains(visitor)
            }
        }
    }

    /// Whether the expression nests deeper than `limit` levels, counting
    /// the queries of its subqueries. Stops descending at the limit.
    pub fn exceeds_depth(&self, limit: usize) -> bool {
        let Some(limit) = limit.checked_sub(1) else {
            return true;
        };
        let deeper = |e: &Expression| e.exceeds_depth(limit);
        match self {
            Expression::Field(..) | Expression::Consts(_) => false,
            Expression::Operation(op) => match op {
                Operation::Not(e) | Operation::Negate(e) | Operation::Identity(e) => deeper(e),
                Operation::And(l, r)
                | Operation::Or(l, r)
                | Operation::Equal(l, r)
                | Operation::NotEqual(l, r)
                | Operation::LessThan(l, r)
                | Operation::LessThanOrEqual(l, r)
                | Operation::GreaterThan(l, r)
                | Operation::GreaterThanOrEqual(l, r)
                | Operation::Add(l, r)
                | Operation::Subtract(l, r)
                | Operation::Multiply(l, r)
                | Operation::Divide(l, r)
                | Operation::Remainder(l, r)
                | Operation::Concat(l, r) => deeper(l) || deeper(r),
            },
            Expression::Function { args, .. } => args.iter().any(deeper),
            Expression::Case {
                operand,
                when_then,
                else_expr,
            } => {
                operand.as_deref().is_some_and(deeper)
                    || when_then.iter().any(|(w, t)| deeper(w) || deeper(t))
                    || else_expr.as_deref().is_some_and(deeper)
            }
            Expression::Cast(e, _) | Expression::IsNull { expr: e, .. } => deeper(e),
            Expression::InList { expr, list, .. } => deeper(expr) || list.iter().any(deeper),
            Expression::InSubquery { expr, query, .. } => {
                deeper(expr) || query.exceeds_depth(limit)
            }
            Expression::Exists { query, .. } | Expression::Subquery(query) => {
                query.exceeds_depth(limit)
            }
            Expression::Like { expr, pattern, .. } => deeper(expr) || deeper(pattern),
        }
    }

    /// Column name used when a SELECT item has no alias
    pub fn display_name(&self) -> Option<String> {
        match self {
            Expression::Field(_, name) => Some(name.clone()),
            _ => None,
        }
    }
}

impl Statement {
    /// Whether the statement nests deeper than `limit` levels
    pub fn exceeds_depth(&self, limit: usize) -> bool {
        let deeper = |e: &Expression| e.exceeds_depth(limit);
        match self {
            Statement::CreateTable { columns, .. } => {
                columns.iter().any(|c| c.default.as_ref().is_some_and(deeper))
            }
            Statement::DropTable { .. } => false,
            Statement::Insert { source, .. } => match source {
                InsertSource::Values(rows) => rows.iter().flatten().any(deeper),
                InsertSource::Select(query) => query.exceeds_depth(limit),
            },
            Statement::Select(query) => query.exceeds_depth(limit),
            Statement::Update {
                columns,
                where_clause,
                ..
            } => {
                columns.iter().any(|(_, e)| deeper(e))
                    || where_clause.as_ref().is_some_and(deeper)
            }
            Statement::Delete { where_clause, .. } => where_clause.as_ref().is_some_and(deeper),
        }
    }
}

impl Select {
    /// Whether the query nests deeper than `limit` levels. Each query,
    /// join and expression node is one level.
    pub fn exceeds_depth(&self, limit: usize) -> bool {
        let Some(limit) = limit.checked_sub(1) else {
            return true;
        };
        let deeper = |e: &Expression| e.exceeds_depth(limit);
        self.select
            .iter()
            .any(|item| matches!(item, SelectItem::Expr(e, _) if deeper(e)))
            || self.from.as_ref().is_some_and(|f| f.exceeds_depth(limit))
            || self.where_clause.as_ref().is_some_and(deeper)
            || self.group_by.iter().any(deeper)
            || self.having.as_ref().is_some_and(deeper)
            || self.order_by.iter().any(|o| deeper(&o.expr))
            || self.limit.as_ref().is_some_and(deeper)
            || self.offset.as_ref().is_some_and(deeper)
    }
}

impl FromItem {
    fn exceeds_depth(&self, limit: usize) -> bool {
        let Some(limit) = limit.checked_sub(1) else {
            return true;
        };
        match self {
            FromItem::Table { .. } => false,
            FromItem::Subquery { query, .. } => query.exceeds_depth(limit),
            FromItem::Join {
                left,
                right,
                predicate,
                ..
            } => {
                left.exceeds_depth(limit)
                    || right.exceeds_depth(limit)
                    || predicate.as_ref().is_some_and(|p| p.exceeds_depth(limit))
            }
        }
    }
}

/// Names of the aggregate functions
pub fn is_aggregate_function(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "count" | "sum" | "avg" | "min" | "max"
    )
}
