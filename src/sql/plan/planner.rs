use tracing::trace;

use crate::{
    config::EngineConfig,
    error::{Error, Result},
    sql::{
        engine::Catalog,
        parser::ast,
        plan::{
            Aggregate, AggregateFunction, BinaryOperator, Expression, Function, Node, OrderKey,
            Plan, Subquery, SubqueryKind, UnaryOperator,
        },
        schema::{self, Table},
        types::Value,
    },
};

/// Query planner - binds an AST against the catalog and builds plan nodes
pub struct Planner<'a, C: Catalog> {
    catalog: &'a C,
    config: &'a EngineConfig,
    /// Scopes of the enclosing queries, outermost first
    outer: Vec<Scope>,
    /// For each subquery being planned, the outermost query level it has
    /// referenced so far (usize::MAX for none)
    subquery_refs: Vec<usize>,
    next_subquery_id: usize,
}

impl<'a, C: Catalog> Planner<'a, C> {
    pub fn new(catalog: &'a C, config: &'a EngineConfig) -> Self {
        Self {
            catalog,
            config,
            outer: Vec::new(),
            subquery_refs: Vec::new(),
            next_subquery_id: 0,
        }
    }

    /// Builds an execution plan from an AST statement
    pub fn build(&mut self, stmt: ast::Statement) -> Result<Plan> {
        Ok(Plan(self.build_statement(stmt)?))
    }

    fn build_statement(&mut self, stmt: ast::Statement) -> Result<Node> {
        Ok(match stmt {
            ast::Statement::CreateTable {
                name,
                columns,
                if_not_exists,
            } => {
                let schema = Table {
                    name,
                    columns: columns
                        .into_iter()
                        .map(Self::build_column)
                        .collect::<Result<_>>()?,
                };
                schema.validate()?;
                Node::CreateTable {
                    schema,
                    if_not_exists,
                }
            }
            ast::Statement::DropTable { name, if_exists } => Node::DropTable { name, if_exists },
            ast::Statement::Insert {
                table_name,
                columns,
                source,
            } => self.build_insert(table_name, columns, source)?,
            ast::Statement::Select(select) => self.build_select(*select)?.0,
            ast::Statement::Update {
                table_name,
                columns,
                where_clause,
            } => {
                let table = self.catalog.must_get_table(&table_name)?;
                let scope = Scope::from_table(&table, None);
                let mut mode = Mode::Rows(&scope);
                let mut assignments = Vec::with_capacity(columns.len());
                for (column, expr) in columns {
                    let index = table.get_col_index(&column)?;
                    assignments.push((index, self.bind(expr, &mut mode)?));
                }
                let filter = where_clause
                    .map(|expr| self.bind(expr, &mut mode))
                    .transpose()?;
                Node::Update {
                    table,
                    filter,
                    assignments,
                }
            }
            ast::Statement::Delete {
                table_name,
                where_clause,
            } => {
                let table = self.catalog.must_get_table(&table_name)?;
                let scope = Scope::from_table(&table, None);
                let filter = where_clause
                    .map(|expr| self.bind(expr, &mut Mode::Rows(&scope)))
                    .transpose()?;
                Node::Delete { table, filter }
            }
        })
    }

    fn build_column(c: ast::Column) -> Result<schema::Column> {
        // Primary key columns are always NOT NULL
        let nullable = !c.primary_key && c.nullable.unwrap_or(true);
        let default = match c.default {
            Some(expr) => {
                let value = Self::constant_value(&expr)?;
                let value = value.coerce_to(c.datatype).ok_or_else(|| {
                    Error::SchemaMismatch(format!(
                        "default value for column {} is not of type {}",
                        c.name, c.datatype
                    ))
                })?;
                Some(value)
            }
            None => None,
        };
        Ok(schema::Column {
            name: c.name,
            datatype: c.datatype,
            nullable,
            default,
            primary_key: c.primary_key,
        })
    }

    /// Folds a DEFAULT expression, which must be a (possibly signed) literal
    fn constant_value(expr: &ast::Expression) -> Result<Value> {
        match expr {
            ast::Expression::Consts(c) => Ok(Self::literal(c.clone())),
            ast::Expression::Operation(ast::Operation::Negate(e)) => {
                Self::constant_value(e)?.negate()
            }
            ast::Expression::Operation(ast::Operation::Identity(e)) => Self::constant_value(e),
            _ => Err(Error::SchemaMismatch(
                "default value of column must be a constant".into(),
            )),
        }
    }

    fn literal(c: ast::Consts) -> Value {
        match c {
            ast::Consts::Null => Value::Null,
            ast::Consts::Boolean(b) => Value::Boolean(b),
            ast::Consts::Integer(i) => Value::Integer(i),
            ast::Consts::Float(f) => Value::Real(f),
            ast::Consts::String(s) => Value::Text(s),
        }
    }

    fn build_insert(
        &mut self,
        table_name: String,
        columns: Option<Vec<String>>,
        source: ast::InsertSource,
    ) -> Result<Node> {
        let table = self.catalog.must_get_table(&table_name)?;
        let columns = match columns {
            None => (0..table.columns.len()).collect::<Vec<_>>(),
            Some(names) => {
                let mut indexes: Vec<usize> = Vec::with_capacity(names.len());
                for name in names {
                    let index = table.get_col_index(&name)?;
                    if indexes.contains(&index) {
                        return Err(Error::SchemaMismatch(format!(
                            "column {} specified more than once",
                            name
                        )));
                    }
                    indexes.push(index);
                }
                indexes
            }
        };

        let source = match source {
            ast::InsertSource::Values(rows) => {
                let empty = Scope::default();
                let mut bound = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.len() != columns.len() {
                        return Err(Error::SchemaMismatch(format!(
                            "table {} has {} target columns but {} values were supplied",
                            table.name,
                            columns.len(),
                            row.len()
                        )));
                    }
                    bound.push(
                        row.into_iter()
                            .map(|expr| self.bind(expr, &mut Mode::Rows(&empty)))
                            .collect::<Result<Vec<_>>>()?,
                    );
                }
                Node::Values { rows: bound }
            }
            ast::InsertSource::Select(select) => {
                let (node, labels) = self.build_select(*select)?;
                if labels.len() != columns.len() {
                    return Err(Error::SchemaMismatch(format!(
                        "table {} has {} target columns but the query returns {}",
                        table.name,
                        columns.len(),
                        labels.len()
                    )));
                }
                node
            }
        };

        Ok(Node::Insert {
            table,
            columns,
            source: Box::new(source),
        })
    }

    /// Builds a SELECT query. Returns the plan and its output column labels.
    ///
    /// Node order: source, joins, WHERE filter, aggregate, HAVING filter,
    /// projection, DISTINCT, ORDER BY, OFFSET, LIMIT.
    fn build_select(&mut self, select: ast::Select) -> Result<(Node, Vec<Option<String>>)> {
        let (mut node, scope) = match select.from {
            Some(from) => self.build_from(from)?,
            None => (
                Node::Values {
                    rows: vec![Vec::new()],
                },
                Scope::default(),
            ),
        };

        if let Some(expr) = select.where_clause {
            let predicate = self.bind(expr, &mut Mode::Rows(&scope))?;
            node = Node::Filter {
                source: Box::new(node),
                predicate,
            };
        }

        // Expand wildcards against the FROM scope
        let mut terms = Vec::new();
        for item in select.select {
            match item {
                ast::SelectItem::Wildcard => {
                    if scope.columns.is_empty() {
                        return Err(Error::Parse("no tables specified for *".into()));
                    }
                    terms.extend((0..scope.columns.len()).map(SelectTerm::Column));
                }
                ast::SelectItem::QualifiedWildcard(table) => {
                    let matched: Vec<_> = scope
                        .columns
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| {
                            c.table.as_ref().is_some_and(|t| t.eq_ignore_ascii_case(&table))
                        })
                        .map(|(i, _)| SelectTerm::Column(i))
                        .collect();
                    if matched.is_empty() {
                        return Err(Error::UnknownTable(table));
                    }
                    terms.extend(matched);
                }
                ast::SelectItem::Expr(expr, alias) => terms.push(SelectTerm::Expr(expr, alias)),
            }
        }
        let labels: Vec<Option<String>> = terms
            .iter()
            .map(|t| match t {
                SelectTerm::Column(i) => scope.columns[*i].name.clone(),
                SelectTerm::Expr(_, Some(alias)) => Some(alias.clone()),
                SelectTerm::Expr(expr, None) => expr.display_name(),
            })
            .collect();

        // Aggregate calls anywhere in the select list, HAVING or ORDER BY
        let mut agg_calls: Vec<ast::Expression> = Vec::new();
        {
            let mut collect = |expr: &ast::Expression| {
                for call in Self::aggregate_calls(expr) {
                    if !agg_calls.contains(&call) {
                        agg_calls.push(call);
                    }
                }
            };
            for term in &terms {
                if let SelectTerm::Expr(expr, _) = term {
                    collect(expr);
                }
            }
            if let Some(having) = &select.having {
                collect(having);
            }
            for item in &select.order_by {
                collect(&item.expr);
            }
        }
        let aggregated =
            !agg_calls.is_empty() || !select.group_by.is_empty() || select.having.is_some();

        let mut agg = if aggregated {
            Some(self.build_aggregate_context(&scope, select.group_by, agg_calls)?)
        } else {
            None
        };

        // Select list, HAVING and ORDER BY bind against the aggregate output
        // when grouping, otherwise against the FROM rows
        let mut exprs = Vec::with_capacity(terms.len());
        let mut having = None;
        let mut orders = Vec::with_capacity(select.order_by.len());
        {
            let mut mode = match agg.as_mut() {
                Some(agg) => Mode::Groups(agg),
                None => Mode::Rows(&scope),
            };
            for term in terms {
                exprs.push(match term {
                    SelectTerm::Column(index) => match &mut mode {
                        Mode::Rows(_) => Expression::Column { depth: 0, index },
                        Mode::Groups(agg) => agg.column(index),
                    },
                    SelectTerm::Expr(expr, _) => self.bind(expr, &mut mode)?,
                });
            }
            if let Some(expr) = select.having {
                having = Some(self.bind(expr, &mut mode)?);
            }

            let visible = exprs.len();
            for item in select.order_by {
                let index = match Self::output_position(&item.expr, &labels, visible)? {
                    Some(index) => index,
                    None => {
                        let bound = self.bind(item.expr, &mut mode)?;
                        match exprs.iter().position(|e| *e == bound) {
                            Some(index) => index,
                            None => {
                                exprs.push(bound);
                                exprs.len() - 1
                            }
                        }
                    }
                };
                orders.push(OrderKey {
                    index,
                    direction: item.direction,
                    nulls_first: item.nulls_first,
                });
            }
        }
        let visible = labels.len();
        let hidden = exprs.len() > visible;
        if hidden && select.distinct {
            return Err(Error::Parse(
                "ORDER BY term must appear in the select list of a DISTINCT query".into(),
            ));
        }

        if let Some(agg) = agg {
            let mut aggregates = agg.aggregates;
            aggregates.extend(agg.bare.into_iter().map(|index| Aggregate {
                function: AggregateFunction::First,
                arg: Some(Expression::Column { depth: 0, index }),
                distinct: false,
            }));
            node = Node::Aggregate {
                source: Box::new(node),
                group_by: agg.group_by,
                aggregates,
            };
            if let Some(predicate) = having {
                node = Node::Filter {
                    source: Box::new(node),
                    predicate,
                };
            }
        }

        let names = labels
            .iter()
            .cloned()
            .chain(std::iter::repeat(None))
            .take(exprs.len());
        node = Node::Projection {
            source: Box::new(node),
            exprs: exprs.into_iter().zip(names).collect(),
        };

        if select.distinct {
            node = Node::Distinct {
                source: Box::new(node),
            };
        }
        if !orders.is_empty() {
            node = Node::Order {
                source: Box::new(node),
                orders,
            };
        }

        let empty = Scope::default();
        if let Some(expr) = select.offset {
            node = Node::Offset {
                source: Box::new(node),
                offset: self.bind(expr, &mut Mode::Rows(&empty))?,
            };
        }
        if let Some(expr) = select.limit {
            node = Node::Limit {
                source: Box::new(node),
                limit: self.bind(expr, &mut Mode::Rows(&empty))?,
            };
        }

        // Drop the columns that only existed for sorting
        if hidden {
            node = Node::Projection {
                source: Box::new(node),
                exprs: (0..visible)
                    .map(|index| Expression::Column { depth: 0, index })
                    .zip(labels.iter().cloned())
                    .collect(),
            };
        }

        trace!(columns = visible, "planned select");
        Ok((node, labels))
    }

    /// Resolves an ORDER BY term given as a 1-based ordinal or an output label
    fn output_position(
        expr: &ast::Expression,
        labels: &[Option<String>],
        visible: usize,
    ) -> Result<Option<usize>> {
        match expr {
            ast::Expression::Consts(ast::Consts::Integer(i)) => {
                if *i < 1 || *i as usize > visible {
                    return Err(Error::Parse(format!(
                        "ORDER BY term out of range - should be between 1 and {}",
                        visible
                    )));
                }
                Ok(Some(*i as usize - 1))
            }
            ast::Expression::Field(None, name) => Ok(labels
                .iter()
                .position(|l| l.as_ref().is_some_and(|l| l.eq_ignore_ascii_case(name)))),
            _ => Ok(None),
        }
    }

    fn build_aggregate_context(
        &mut self,
        scope: &Scope,
        group_by: Vec<ast::Expression>,
        calls: Vec<ast::Expression>,
    ) -> Result<AggContext> {
        let mut groups = Vec::with_capacity(group_by.len());
        let mut bound_groups = Vec::with_capacity(group_by.len());
        for expr in group_by {
            let bound = self.bind(expr.clone(), &mut Mode::Rows(scope))?;
            let column = match bound {
                Expression::Column { depth: 0, index } => Some(index),
                _ => None,
            };
            groups.push((expr, column));
            bound_groups.push(bound);
        }

        let mut aggregates = Vec::with_capacity(calls.len());
        for call in &calls {
            let ast::Expression::Function {
                name,
                args,
                distinct,
            } = call
            else {
                return Err(Error::Internal(format!("not an aggregate call: {:?}", call)));
            };
            let function = AggregateFunction::from_name(name)
                .ok_or_else(|| Error::Internal(format!("unknown aggregate {}", name)))?;
            let arg = match (function, args.as_slice()) {
                (AggregateFunction::Count, []) if !distinct => None,
                (_, [arg]) => Some(self.bind(arg.clone(), &mut Mode::Rows(scope))?),
                _ => {
                    return Err(Error::Parse(format!(
                        "wrong number of arguments to function {}()",
                        name
                    )))
                }
            };
            aggregates.push(Aggregate {
                function,
                arg,
                distinct: *distinct,
            });
        }

        let mut output = Scope::default();
        for (_, column) in &groups {
            output.columns.push(match column {
                Some(index) => scope.columns[*index].clone(),
                None => ScopeColumn::default(),
            });
        }
        output
            .columns
            .extend((0..aggregates.len()).map(|_| ScopeColumn::default()));

        Ok(AggContext {
            from: scope.clone(),
            output,
            groups,
            group_by: bound_groups,
            calls,
            aggregates,
            bare: Vec::new(),
        })
    }

    /// Collects the aggregate calls of an expression, outside subqueries
    fn aggregate_calls(expr: &ast::Expression) -> Vec<ast::Expression> {
        let found = std::cell::RefCell::new(Vec::new());
        expr.contains(&|e| {
            if Self::is_aggregate(e) {
                found.borrow_mut().push(e.clone());
            }
            false
        });
        found.into_inner()
    }

    fn is_aggregate(expr: &ast::Expression) -> bool {
        matches!(expr, ast::Expression::Function { name, .. } if ast::is_aggregate_function(name))
    }

    /// Builds a FROM item, returning its node and the columns it exposes
    fn build_from(&mut self, item: ast::FromItem) -> Result<(Node, Scope)> {
        Ok(match item {
            ast::FromItem::Table { name, alias } => {
                let table = self.catalog.must_get_table(&name)?;
                let scope = Scope::from_table(&table, alias);
                (Node::Scan { table }, scope)
            }
            ast::FromItem::Subquery { query, alias } => {
                // Derived tables cannot see enclosing queries
                let outer = std::mem::take(&mut self.outer);
                let refs = std::mem::take(&mut self.subquery_refs);
                let result = self.build_select(*query);
                self.outer = outer;
                self.subquery_refs = refs;
                let (node, labels) = result?;
                let scope = Scope {
                    columns: labels
                        .into_iter()
                        .map(|name| ScopeColumn {
                            table: alias.clone(),
                            name,
                        })
                        .collect(),
                };
                (node, scope)
            }
            ast::FromItem::Join {
                left,
                right,
                join_type,
                predicate,
            } => {
                let (left, left_scope) = self.build_from(*left)?;
                let (right, right_scope) = self.build_from(*right)?;
                let (left_width, right_width) =
                    (left_scope.columns.len(), right_scope.columns.len());
                let scope = left_scope.join(&right_scope);
                match join_type {
                    ast::JoinType::Cross | ast::JoinType::Inner | ast::JoinType::Left => {
                        let predicate = predicate
                            .map(|p| self.bind(p, &mut Mode::Rows(&scope)))
                            .transpose()?;
                        let node = Node::NestedLoopJoin {
                            left: Box::new(left),
                            right: Box::new(right),
                            predicate,
                            outer: join_type == ast::JoinType::Left,
                            right_width,
                        };
                        (node, scope)
                    }
                    // A right join is a left join with the inputs swapped,
                    // followed by a projection restoring the column order
                    ast::JoinType::Right => {
                        let swapped = right_scope.join(&left_scope);
                        let predicate = predicate
                            .map(|p| self.bind(p, &mut Mode::Rows(&swapped)))
                            .transpose()?;
                        let join = Node::NestedLoopJoin {
                            left: Box::new(right),
                            right: Box::new(left),
                            predicate,
                            outer: true,
                            right_width: left_width,
                        };
                        let exprs = (right_width..right_width + left_width)
                            .chain(0..right_width)
                            .zip(scope.columns.iter())
                            .map(|(index, c)| {
                                (Expression::Column { depth: 0, index }, c.name.clone())
                            })
                            .collect();
                        let node = Node::Projection {
                            source: Box::new(join),
                            exprs,
                        };
                        (node, scope)
                    }
                }
            }
        })
    }

    /// Binds an AST expression to row positions
    fn bind(&mut self, expr: ast::Expression, mode: &mut Mode) -> Result<Expression> {
        if let Mode::Groups(agg) = mode {
            if let Some(index) = agg.groups.iter().position(|(g, _)| *g == expr) {
                return Ok(Expression::Column { depth: 0, index });
            }
            if Self::is_aggregate(&expr) {
                let position = agg.calls.iter().position(|c| *c == expr).ok_or_else(|| {
                    Error::Internal(format!("aggregate {:?} was not collected", expr))
                })?;
                return Ok(Expression::Column {
                    depth: 0,
                    index: agg.groups.len() + position,
                });
            }
        }

        Ok(match expr {
            ast::Expression::Consts(c) => Expression::Constant(Self::literal(c)),
            ast::Expression::Field(table, name) => self.bind_column(table, name, mode)?,
            ast::Expression::Operation(op) => self.bind_operation(op, mode)?,
            ast::Expression::Function {
                name,
                args,
                distinct,
            } => {
                if ast::is_aggregate_function(&name) {
                    return Err(Error::Parse(format!(
                        "misuse of aggregate function {}()",
                        name
                    )));
                }
                let function =
                    Function::from_name(&name).ok_or_else(|| Error::UnknownFunction(name.clone()))?;
                let (min, max) = function.arity();
                if distinct || args.len() < min || args.len() > max {
                    return Err(Error::Parse(format!(
                        "wrong number of arguments to function {}()",
                        name
                    )));
                }
                let args = args
                    .into_iter()
                    .map(|a| self.bind(a, mode))
                    .collect::<Result<_>>()?;
                Expression::Function(function, args)
            }
            ast::Expression::Case {
                operand,
                when_then,
                else_expr,
            } => Expression::Case {
                operand: match operand {
                    Some(e) => Some(Box::new(self.bind(*e, mode)?)),
                    None => None,
                },
                when_then: when_then
                    .into_iter()
                    .map(|(w, t)| Ok((self.bind(w, mode)?, self.bind(t, mode)?)))
                    .collect::<Result<_>>()?,
                else_expr: match else_expr {
                    Some(e) => Some(Box::new(self.bind(*e, mode)?)),
                    None => None,
                },
            },
            ast::Expression::Cast(e, datatype) => {
                Expression::Cast(Box::new(self.bind(*e, mode)?), datatype)
            }
            ast::Expression::IsNull { expr, negated } => Expression::IsNull {
                expr: Box::new(self.bind(*expr, mode)?),
                negated,
            },
            ast::Expression::InList {
                expr,
                list,
                negated,
            } => Expression::InList {
                expr: Box::new(self.bind(*expr, mode)?),
                list: list
                    .into_iter()
                    .map(|e| self.bind(e, mode))
                    .collect::<Result<_>>()?,
                negated,
            },
            ast::Expression::Like {
                expr,
                pattern,
                negated,
            } => Expression::Like {
                expr: Box::new(self.bind(*expr, mode)?),
                pattern: Box::new(self.bind(*pattern, mode)?),
                negated,
            },
            ast::Expression::Subquery(query) => {
                self.bind_subquery(*query, SubqueryKind::Scalar, mode)?
            }
            ast::Expression::Exists { query, negated } => {
                self.bind_subquery(*query, SubqueryKind::Exists { negated }, mode)?
            }
            ast::Expression::InSubquery {
                expr,
                query,
                negated,
            } => {
                let expr = self.bind(*expr, mode)?;
                self.bind_subquery(*query, SubqueryKind::In { expr, negated }, mode)?
            }
        })
    }

    fn bind_operation(&mut self, op: ast::Operation, mode: &mut Mode) -> Result<Expression> {
        use ast::Operation as Op;
        let (operator, lhs, rhs) = match op {
            Op::Not(e) => return self.bind_unary(UnaryOperator::Not, *e, mode),
            Op::Negate(e) => return self.bind_unary(UnaryOperator::Negate, *e, mode),
            Op::Identity(e) => return self.bind_unary(UnaryOperator::Identity, *e, mode),
            Op::And(l, r) => (BinaryOperator::And, l, r),
            Op::Or(l, r) => (BinaryOperator::Or, l, r),
            Op::Equal(l, r) => (BinaryOperator::Equal, l, r),
            Op::NotEqual(l, r) => (BinaryOperator::NotEqual, l, r),
            Op::LessThan(l, r) => (BinaryOperator::LessThan, l, r),
            Op::LessThanOrEqual(l, r) => (BinaryOperator::LessThanOrEqual, l, r),
            Op::GreaterThan(l, r) => (BinaryOperator::GreaterThan, l, r),
            Op::GreaterThanOrEqual(l, r) => (BinaryOperator::GreaterThanOrEqual, l, r),
            Op::Add(l, r) => (BinaryOperator::Add, l, r),
            Op::Subtract(l, r) => (BinaryOperator::Subtract, l, r),
            Op::Multiply(l, r) => (BinaryOperator::Multiply, l, r),
            Op::Divide(l, r) => (BinaryOperator::Divide, l, r),
            Op::Remainder(l, r) => (BinaryOperator::Remainder, l, r),
            Op::Concat(l, r) => (BinaryOperator::Concat, l, r),
        };
        let lhs = self.bind(*lhs, mode)?;
        let rhs = self.bind(*rhs, mode)?;
        Ok(Expression::Binary(operator, Box::new(lhs), Box::new(rhs)))
    }

    fn bind_unary(
        &mut self,
        operator: UnaryOperator,
        expr: ast::Expression,
        mode: &mut Mode,
    ) -> Result<Expression> {
        Ok(Expression::Unary(operator, Box::new(self.bind(expr, mode)?)))
    }

    /// Resolves a column reference, innermost query first
    fn bind_column(
        &mut self,
        table: Option<String>,
        name: String,
        mode: &mut Mode,
    ) -> Result<Expression> {
        let found = match mode {
            Mode::Rows(scope) => scope.resolve(table.as_deref(), &name)?,
            Mode::Groups(agg) => agg.from.resolve(table.as_deref(), &name)?,
        };
        if let Some(index) = found {
            return Ok(match mode {
                Mode::Rows(_) => Expression::Column { depth: 0, index },
                Mode::Groups(agg) => agg.column(index),
            });
        }

        for level in (0..self.outer.len()).rev() {
            if let Some(index) = self.outer[level].resolve(table.as_deref(), &name)? {
                for r in self.subquery_refs.iter_mut() {
                    *r = (*r).min(level);
                }
                return Ok(Expression::Column {
                    depth: self.outer.len() - level,
                    index,
                });
            }
        }

        Err(Error::UnknownColumn(match table {
            Some(table) => format!("{}.{}", table, name),
            None => name,
        }))
    }

    fn bind_subquery(
        &mut self,
        query: ast::Select,
        kind: SubqueryKind,
        mode: &mut Mode,
    ) -> Result<Expression> {
        if self.outer.len() >= self.config.max_subquery_depth {
            return Err(Error::StackDepthExceeded(self.config.max_subquery_depth));
        }
        let scope = match mode {
            Mode::Rows(scope) => (*scope).clone(),
            Mode::Groups(agg) => agg.output.clone(),
        };
        self.outer.push(scope);
        self.subquery_refs.push(usize::MAX);
        let result = self.build_select(query);
        let min_ref = self.subquery_refs.pop().unwrap_or(usize::MAX);
        self.outer.pop();
        let (plan, labels) = result?;

        if !matches!(kind, SubqueryKind::Exists { .. }) && labels.len() != 1 {
            return Err(Error::SchemaMismatch(format!(
                "sub-select returns {} columns - expected 1",
                labels.len()
            )));
        }

        let id = self.next_subquery_id;
        self.next_subquery_id += 1;
        // The subquery's own level is one past the current one
        let correlated = min_ref <= self.outer.len();
        trace!(id, correlated, "bound subquery");
        Ok(Expression::Subquery(Box::new(Subquery {
            id,
            plan,
            correlated,
            kind,
        })))
    }
}

/// How expressions bind: against FROM rows, or against aggregate output
enum Mode<'s> {
    Rows(&'s Scope),
    Groups(&'s mut AggContext),
}

/// Binding state for a grouped query
struct AggContext {
    /// Scope of the rows feeding the aggregate
    from: Scope,
    /// Scope of the aggregate output, seen by subqueries
    output: Scope,
    /// GROUP BY expressions and, for plain columns, their FROM position
    groups: Vec<(ast::Expression, Option<usize>)>,
    group_by: Vec<Expression>,
    calls: Vec<ast::Expression>,
    aggregates: Vec<Aggregate>,
    /// FROM columns referenced outside aggregates without being grouped
    bare: Vec<usize>,
}

impl AggContext {
    /// Output position for a FROM column referenced after grouping
    fn column(&mut self, index: usize) -> Expression {
        if let Some(group) = self.groups.iter().position(|(_, c)| *c == Some(index)) {
            return Expression::Column {
                depth: 0,
                index: group,
            };
        }
        let bare = match self.bare.iter().position(|b| *b == index) {
            Some(position) => position,
            None => {
                self.bare.push(index);
                self.bare.len() - 1
            }
        };
        Expression::Column {
            depth: 0,
            index: self.groups.len() + self.aggregates.len() + bare,
        }
    }
}

/// SELECT list entry after wildcard expansion
enum SelectTerm {
    Column(usize),
    Expr(ast::Expression, Option<String>),
}

#[derive(Debug, Clone, Default)]
struct ScopeColumn {
    /// Table name or alias qualifying the column
    table: Option<String>,
    name: Option<String>,
}

/// Columns visible to expressions at one query level
#[derive(Debug, Clone, Default)]
struct Scope {
    columns: Vec<ScopeColumn>,
}

impl Scope {
    fn from_table(table: &Table, alias: Option<String>) -> Self {
        let qualifier = alias.unwrap_or_else(|| table.name.clone());
        Self {
            columns: table
                .columns
                .iter()
                .map(|c| ScopeColumn {
                    table: Some(qualifier.clone()),
                    name: Some(c.name.clone()),
                })
                .collect(),
        }
    }

    fn join(&self, right: &Scope) -> Self {
        let mut columns = self.columns.clone();
        columns.extend(right.columns.iter().cloned());
        Self { columns }
    }

    /// Finds a column by name, case-insensitively
    fn resolve(&self, table: Option<&str>, name: &str) -> Result<Option<usize>> {
        let mut found = None;
        for (i, column) in self.columns.iter().enumerate() {
            let name_matches = column
                .name
                .as_ref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name));
            let table_matches = match table {
                None => true,
                Some(t) => column.table.as_ref().is_some_and(|q| q.eq_ignore_ascii_case(t)),
            };
            if name_matches && table_matches {
                if found.is_some() {
                    return Err(Error::AmbiguousColumn(name.to_string()));
                }
                found = Some(i);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        config::EngineConfig,
        error::{Error, Result},
        sql::{
            engine::Catalog,
            parser::Parser,
            plan::{AggregateFunction, Expression, Node, Plan, SubqueryKind},
            schema::{Column, Table},
            types::DataType,
        },
    };

    #[derive(Default)]
    struct TestCatalog {
        tables: HashMap<String, Table>,
    }

    impl Catalog for TestCatalog {
        fn create_table(&mut self, table: Table) -> Result<()> {
            self.tables.insert(table.name.to_lowercase(), table);
            Ok(())
        }

        fn drop_table(&mut self, name: &str) -> Result<()> {
            self.tables.remove(&name.to_lowercase());
            Ok(())
        }

        fn get_table(&self, name: &str) -> Result<Option<Table>> {
            Ok(self.tables.get(&name.to_lowercase()).cloned())
        }
    }

    fn catalog() -> Result<TestCatalog> {
        let mut catalog = TestCatalog::default();
        for (name, cols) in [("t", ["a", "b"]), ("s", ["a", "c"])] {
            catalog.create_table(Table {
                name: name.to_string(),
                columns: cols
                    .iter()
                    .map(|c| Column {
                        name: c.to_string(),
                        datatype: DataType::Integer,
                        nullable: true,
                        default: None,
                        primary_key: false,
                    })
                    .collect(),
            })?;
        }
        Ok(catalog)
    }

    fn plan(sql: &str) -> Result<Node> {
        let catalog = catalog()?;
        let stmt = Parser::new(sql).parse()?;
        Ok(Plan::build(stmt, &catalog, &EngineConfig::default())?.0)
    }

    #[test]
    fn test_bind_errors() -> Result<()> {
        assert_eq!(plan("select x from t"), Err(Error::UnknownColumn("x".into())));
        assert_eq!(plan("select a from t, s"), Err(Error::AmbiguousColumn("a".into())));
        assert_eq!(plan("select * from nope"), Err(Error::UnknownTable("nope".into())));
        assert_eq!(plan("select foo(a) from t"), Err(Error::UnknownFunction("foo".into())));
        assert!(matches!(plan("select a from t where sum(a) > 1"), Err(Error::Parse(_))));
        assert!(matches!(plan("select distinct a from t order by b"), Err(Error::Parse(_))));
        assert!(matches!(plan("select (select a, c from s)"), Err(Error::SchemaMismatch(_))));
        plan("select t.a, s.a from t, s")?;
        plan("select A from T")?;
        Ok(())
    }

    #[test]
    fn test_order_by_hidden_column_is_trimmed() -> Result<()> {
        let Node::Projection { source, exprs } = plan("select a from t order by b")? else {
            panic!("expected trimming projection");
        };
        assert_eq!(exprs.len(), 1);
        let Node::Order { source, orders } = *source else {
            panic!("expected order");
        };
        assert_eq!(orders[0].index, 1);
        assert!(matches!(*source, Node::Projection { ref exprs, .. } if exprs.len() == 2));
        Ok(())
    }

    #[test]
    fn test_aggregate_layout() -> Result<()> {
        let node = plan("select b, count(*), sum(a) from t group by b having count(*) > 1")?;
        let Node::Projection { source, exprs } = node else {
            panic!("expected projection");
        };
        assert_eq!(
            exprs.into_iter().map(|(e, _)| e).collect::<Vec<_>>(),
            vec![
                Expression::Column { depth: 0, index: 0 },
                Expression::Column { depth: 0, index: 1 },
                Expression::Column { depth: 0, index: 2 },
            ]
        );
        let Node::Filter { source, .. } = *source else {
            panic!("expected having filter");
        };
        let Node::Aggregate {
            group_by,
            aggregates,
            ..
        } = *source
        else {
            panic!("expected aggregate");
        };
        assert_eq!(group_by, vec![Expression::Column { depth: 0, index: 1 }]);
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].function, AggregateFunction::Count);
        assert_eq!(aggregates[0].arg, None);
        Ok(())
    }

    #[test]
    fn test_correlated_subquery() -> Result<()> {
        let Node::Projection { exprs, .. } =
            plan("select (select count(*) from s where s.a = t.a), (select max(c) from s) from t")?
        else {
            panic!("expected projection");
        };
        let correlated: Vec<_> = exprs
            .iter()
            .map(|(e, _)| match e {
                Expression::Subquery(sq) => {
                    assert_eq!(sq.kind, SubqueryKind::Scalar);
                    sq.correlated
                }
                _ => panic!("expected subquery"),
            })
            .collect();
        assert_eq!(correlated, vec![true, false]);
        Ok(())
    }

    #[test]
    fn test_subquery_depth_limit() -> Result<()> {
        let catalog = catalog()?;
        let config = EngineConfig {
            max_subquery_depth: 2,
            ..EngineConfig::default()
        };
        let sql = "select (select (select (select 1)))";
        let stmt = Parser::new(sql).parse()?;
        assert_eq!(
            Plan::build(stmt, &catalog, &config),
            Err(Error::StackDepthExceeded(2))
        );
        Ok(())
    }
}
