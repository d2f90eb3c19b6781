use crate::error::{Error, Result};
use crate::sql::parser::ast::{
    Column, Consts, Expression, FromItem, InsertSource, JoinType, Operation, OrderDirection,
    OrderItem, Select, SelectItem, Statement,
};
use crate::sql::parser::lexer::{Keyword, Lexer, Token};

use super::types::DataType;

pub mod ast;
mod lexer;

/// Deepest nesting a statement may have, counting parentheses, queries,
/// joins and operators. Parsing, binding and evaluation all recurse over the
/// tree, so this bounds their stack use.
pub const MAX_NESTING_DEPTH: usize = 128;

/// SQL Parser - Converts tokens into Abstract Syntax Tree (AST)
///
/// The whole input is tokenized up front, so a lexing error anywhere fails
/// the parse before any statement is produced.
pub struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
    /// Current recursion depth of the descent
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given SQL input
    pub fn new(input: &'a str) -> Self {
        Parser {
            input,
            tokens: Vec::new(),
            pos: 0,
            depth: 0,
        }
    }

    fn tokenize(&mut self) -> Result<()> {
        let mut lexer = Lexer::new(self.input);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next() {
            tokens.push((token?, lexer.token_start()));
        }
        self.tokens = tokens;
        self.pos = 0;
        Ok(())
    }

    /// Parses a single statement; a trailing semicolon is optional
    pub fn parse(&mut self) -> Result<Statement> {
        let mut stmts = self.parse_statements()?;
        match stmts.len() {
            1 => Ok(stmts.remove(0)),
            0 => Err(Error::Parse("empty statement".into())),
            n => Err(Error::Parse(format!("expected one statement, found {}", n))),
        }
    }

    /// Parses every `;`-separated statement of the input. Empty statements
    /// between semicolons are skipped.
    pub fn parse_statements(&mut self) -> Result<Vec<Statement>> {
        self.tokenize()?;
        let mut stmts = Vec::new();
        loop {
            while self.next_if_token(Token::Semicolon).is_some() {}
            if self.peek()?.is_none() {
                break;
            }
            let stmt = self.parse_statement()?;
            if stmt.exceeds_depth(MAX_NESTING_DEPTH) {
                return Err(Error::StackDepthExceeded(MAX_NESTING_DEPTH));
            }
            stmts.push(stmt);
            // Statements must be separated by semicolons
            if self.peek()?.is_some() {
                self.next_expect(Token::Semicolon)?;
            }
        }
        Ok(stmts)
    }

    /// Runs a nested part of the descent, failing once nesting gets too deep
    fn nested<R>(&mut self, parse: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(Error::StackDepthExceeded(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Parses a statement based on the first token
    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek()? {
            Some(Token::Keyword(Keyword::Create)) => self.parse_ddl(),
            Some(Token::Keyword(Keyword::Drop)) => self.parse_ddl(),
            Some(Token::Keyword(Keyword::Select)) => {
                Ok(Statement::Select(Box::new(self.parse_select()?)))
            }
            Some(Token::Keyword(Keyword::Insert)) => self.parse_insert(),
            Some(Token::Keyword(Keyword::Update)) => self.parse_update(),
            Some(Token::Keyword(Keyword::Delete)) => self.parse_delete(),
            Some(_) => Err(self.unexpected()),
            None => Err(Error::Parse("unexpected end of input".into())),
        }
    }

    /// Parses DDL statements (CREATE TABLE, DROP TABLE)
    fn parse_ddl(&mut self) -> Result<Statement> {
        match self.next()? {
            Token::Keyword(Keyword::Create) => {
                self.next_expect(Token::Keyword(Keyword::Table))?;
                self.parse_ddl_create_table()
            }
            Token::Keyword(Keyword::Drop) => {
                self.next_expect(Token::Keyword(Keyword::Table))?;
                let if_exists = self.parse_if_exists()?;
                Ok(Statement::DropTable {
                    name: self.next_ident()?,
                    if_exists,
                })
            }
            _ => Err(self.unexpected_previous()),
        }
    }

    fn parse_if_exists(&mut self) -> Result<bool> {
        if self.next_if_token(Token::Keyword(Keyword::If)).is_none() {
            return Ok(false);
        }
        self.next_expect(Token::Keyword(Keyword::Exists))?;
        Ok(true)
    }

    /// Parses CREATE TABLE statement
    fn parse_ddl_create_table(&mut self) -> Result<Statement> {
        let if_not_exists = if self.next_if_token(Token::Keyword(Keyword::If)).is_some() {
            self.next_expect(Token::Keyword(Keyword::Not))?;
            self.next_expect(Token::Keyword(Keyword::Exists))?;
            true
        } else {
            false
        };
        let table_name = self.next_ident()?;
        self.next_expect(Token::OpenParen)?;

        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_ddl_column()?);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        self.next_expect(Token::CloseParen)?;
        Ok(Statement::CreateTable {
            name: table_name,
            columns,
            if_not_exists,
        })
    }

    /// Parses column definition in CREATE TABLE
    fn parse_ddl_column(&mut self) -> Result<Column> {
        let mut column = Column {
            name: self.next_ident()?,
            datatype: self.parse_datatype()?,
            nullable: None,
            default: None,
            primary_key: false,
        };

        // Parse column constraints (NULL, NOT NULL, DEFAULT, PRIMARY KEY)
        while let Some(Token::Keyword(keyword)) =
            self.next_if(|t| matches!(t, Token::Keyword(k) if !k.is_soft()))
        {
            match keyword {
                Keyword::Null => column.nullable = Some(true),
                Keyword::Not => {
                    self.next_expect(Token::Keyword(Keyword::Null))?;
                    column.nullable = Some(false);
                }
                Keyword::Default => column.default = Some(self.parse_unary()?),
                Keyword::Primary => {
                    self.next_expect(Token::Keyword(Keyword::Key))?;
                    column.primary_key = true;
                }
                _ => return Err(self.unexpected_previous()),
            }
        }

        Ok(column)
    }

    /// Parses a type name, ignoring size arguments like `VARCHAR(20)`
    fn parse_datatype(&mut self) -> Result<DataType> {
        let datatype = match self.next()? {
            Token::Keyword(
                Keyword::Int | Keyword::Integer | Keyword::Bigint | Keyword::Smallint,
            ) => DataType::Integer,
            Token::Keyword(Keyword::Bool | Keyword::Boolean) => DataType::Boolean,
            Token::Keyword(Keyword::Double) => {
                self.next_if_token(Token::Keyword(Keyword::Precision));
                DataType::Real
            }
            Token::Keyword(
                Keyword::Float | Keyword::Real | Keyword::Numeric | Keyword::Decimal,
            ) => DataType::Real,
            Token::Keyword(
                Keyword::String | Keyword::Text | Keyword::Varchar | Keyword::Char,
            ) => DataType::Text,
            _ => return Err(self.unexpected_previous()),
        };
        if self.next_if_token(Token::OpenParen).is_some() {
            loop {
                match self.next()? {
                    Token::Number(_) => {}
                    _ => return Err(self.unexpected_previous()),
                }
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
            self.next_expect(Token::CloseParen)?;
        }
        Ok(datatype)
    }

    /// Parses a SELECT query (used for statements and subqueries)
    fn parse_select(&mut self) -> Result<Select> {
        self.nested(Self::parse_select_body)
    }

    fn parse_select_body(&mut self) -> Result<Select> {
        self.next_expect(Token::Keyword(Keyword::Select))?;
        let distinct = if self.next_if_token(Token::Keyword(Keyword::Distinct)).is_some() {
            true
        } else {
            self.next_if_token(Token::Keyword(Keyword::All));
            false
        };

        let mut select = Vec::new();
        loop {
            select.push(self.parse_select_item()?);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }

        let from = match self.next_if_token(Token::Keyword(Keyword::From)) {
            Some(_) => Some(self.parse_from_clause()?),
            None => None,
        };
        let where_clause = self.parse_where_clause()?;

        let mut group_by = Vec::new();
        if self.next_if_token(Token::Keyword(Keyword::Group)).is_some() {
            self.next_expect(Token::Keyword(Keyword::By))?;
            loop {
                group_by.push(self.parse_expression()?);
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
        }

        let having = match self.next_if_token(Token::Keyword(Keyword::Having)) {
            Some(_) => Some(self.parse_expression()?),
            None => None,
        };

        let mut order_by = Vec::new();
        if self.next_if_token(Token::Keyword(Keyword::Order)).is_some() {
            self.next_expect(Token::Keyword(Keyword::By))?;
            loop {
                order_by.push(self.parse_order_item()?);
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
        }

        let (mut limit, mut offset) = (None, None);
        if self.next_if_token(Token::Keyword(Keyword::Limit)).is_some() {
            let first = self.parse_expression()?;
            // LIMIT <offset>, <count>
            if self.next_if_token(Token::Comma).is_some() {
                offset = Some(first);
                limit = Some(self.parse_expression()?);
            } else {
                limit = Some(first);
            }
        }
        if offset.is_none() && self.next_if_token(Token::Keyword(Keyword::Offset)).is_some() {
            offset = Some(self.parse_expression()?);
        }

        Ok(Select {
            distinct,
            select,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.next_if_token(Token::Asterisk).is_some() {
            return Ok(SelectItem::Wildcard);
        }
        // t.*
        if let (Some(Token::Ident(_)), Some(Token::Period), Some(Token::Asterisk)) =
            (self.peek_nth(0), self.peek_nth(1), self.peek_nth(2))
        {
            let table = self.next_ident()?;
            self.pos += 2;
            return Ok(SelectItem::QualifiedWildcard(table));
        }
        let expr = self.parse_expression()?;
        Ok(SelectItem::Expr(expr, self.parse_alias()?))
    }

    /// Parses `[AS] alias`
    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.next_if_token(Token::Keyword(Keyword::As)).is_some() {
            return match self.next()? {
                Token::String(alias) => Ok(Some(alias)),
                _ => {
                    self.pos -= 1;
                    Ok(Some(self.next_ident()?))
                }
            };
        }
        Ok(self
            .next_if(|t| matches!(t, Token::Ident(_)))
            .and_then(|t| match t {
                Token::Ident(alias) => Some(alias),
                _ => None,
            }))
    }

    fn parse_order_item(&mut self) -> Result<OrderItem> {
        let expr = self.parse_expression()?;
        let direction = match self.next_if(|t| {
            matches!(t, Token::Keyword(Keyword::Asc) | Token::Keyword(Keyword::Desc))
        }) {
            Some(Token::Keyword(Keyword::Desc)) => OrderDirection::Desc,
            _ => OrderDirection::Asc,
        };
        let nulls_first = if self.next_if_token(Token::Keyword(Keyword::Nulls)).is_some() {
            match self.next()? {
                Token::Keyword(Keyword::First) => Some(true),
                Token::Keyword(Keyword::Last) => Some(false),
                _ => return Err(self.unexpected_previous()),
            }
        } else {
            None
        };
        Ok(OrderItem {
            expr,
            direction,
            nulls_first,
        })
    }

    /// Parses a FROM list; comma separated items are cross joined
    fn parse_from_clause(&mut self) -> Result<FromItem> {
        let mut item = self.parse_from_join()?;
        while self.next_if_token(Token::Comma).is_some() {
            let right = self.parse_from_join()?;
            item = FromItem::Join {
                left: Box::new(item),
                right: Box::new(right),
                join_type: JoinType::Cross,
                predicate: None,
            };
        }
        Ok(item)
    }

    /// Parses a table factor followed by any number of JOIN clauses,
    /// associating left to right
    fn parse_from_join(&mut self) -> Result<FromItem> {
        let mut item = self.parse_from_table()?;
        while let Some(join_type) = self.parse_join_type()? {
            let right = self.parse_from_table()?;
            let predicate = match join_type {
                JoinType::Cross => None,
                _ => match self.next_if_token(Token::Keyword(Keyword::On)) {
                    Some(_) => Some(self.parse_expression()?),
                    None => None,
                },
            };
            item = FromItem::Join {
                left: Box::new(item),
                right: Box::new(right),
                join_type,
                predicate,
            };
        }
        Ok(item)
    }

    fn parse_from_table(&mut self) -> Result<FromItem> {
        if self.next_if_token(Token::OpenParen).is_some() {
            if let Some(Token::Keyword(Keyword::Select)) = self.peek()? {
                let query = Box::new(self.parse_select()?);
                self.next_expect(Token::CloseParen)?;
                return Ok(FromItem::Subquery {
                    query,
                    alias: self.parse_alias()?,
                });
            }
            let item = self.nested(Self::parse_from_clause)?;
            self.next_expect(Token::CloseParen)?;
            return Ok(item);
        }
        Ok(FromItem::Table {
            name: self.next_ident()?,
            alias: self.parse_alias()?,
        })
    }

    fn parse_join_type(&mut self) -> Result<Option<JoinType>> {
        let join_type = match self.peek()? {
            Some(Token::Keyword(Keyword::Join)) => JoinType::Inner,
            Some(Token::Keyword(Keyword::Inner)) => JoinType::Inner,
            Some(Token::Keyword(Keyword::Cross)) => JoinType::Cross,
            Some(Token::Keyword(Keyword::Left)) => JoinType::Left,
            Some(Token::Keyword(Keyword::Right)) => JoinType::Right,
            _ => return Ok(None),
        };
        if self.next()? != Token::Keyword(Keyword::Join) {
            if matches!(join_type, JoinType::Left | JoinType::Right) {
                self.next_if_token(Token::Keyword(Keyword::Outer));
            }
            self.next_expect(Token::Keyword(Keyword::Join))?;
        }
        Ok(Some(join_type))
    }

    /// Parses INSERT statement
    fn parse_insert(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Insert))?;
        self.next_expect(Token::Keyword(Keyword::Into))?;

        let table_name = self.next_ident()?;

        // Check if specific columns are specified
        let columns = if self.next_if_token(Token::OpenParen).is_some() {
            let mut cols = Vec::new();
            loop {
                cols.push(self.next_ident()?);
                match self.next()? {
                    Token::CloseParen => break,
                    Token::Comma => {}
                    _ => return Err(self.unexpected_previous()),
                }
            }
            Some(cols)
        } else {
            None
        };

        if let Some(Token::Keyword(Keyword::Select)) = self.peek()? {
            return Ok(Statement::Insert {
                table_name,
                columns,
                source: InsertSource::Select(Box::new(self.parse_select()?)),
            });
        }

        self.next_expect(Token::Keyword(Keyword::Values))?;
        // Parse multiple value rows: INSERT INTO tbl VALUES (1,2),(3,4);
        let mut values = Vec::new();
        loop {
            self.next_expect(Token::OpenParen)?;
            let mut expr = Vec::new();
            loop {
                expr.push(self.parse_expression()?);
                match self.next()? {
                    Token::CloseParen => break,
                    Token::Comma => {}
                    _ => return Err(self.unexpected_previous()),
                }
            }
            values.push(expr);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        Ok(Statement::Insert {
            table_name,
            columns,
            source: InsertSource::Values(values),
        })
    }

    /// Parses UPDATE statement
    fn parse_update(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Update))?;
        let table_name = self.next_ident()?;
        self.next_expect(Token::Keyword(Keyword::Set))?;

        let mut columns: Vec<(String, Expression)> = Vec::new();
        loop {
            let col = self.next_ident()?;
            self.next_expect(Token::Equal)?;
            let value = self.parse_expression()?;
            // Assigning the same column twice is an error
            if columns.iter().any(|(c, _)| c.eq_ignore_ascii_case(&col)) {
                return Err(Error::Parse(format!(
                    "duplicate column {} for update",
                    col
                )));
            }
            columns.push((col, value));
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        Ok(Statement::Update {
            table_name,
            columns,
            where_clause: self.parse_where_clause()?,
        })
    }

    /// Parses DELETE statement
    fn parse_delete(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Delete))?;
        self.next_expect(Token::Keyword(Keyword::From))?;
        let table_name = self.next_ident()?;
        Ok(Statement::Delete {
            table_name,
            where_clause: self.parse_where_clause()?,
        })
    }

    fn parse_where_clause(&mut self) -> Result<Option<Expression>> {
        if self.next_if_token(Token::Keyword(Keyword::Where)).is_none() {
            return Ok(None);
        }
        Ok(Some(self.parse_expression()?))
    }

    /// Parses an expression.
    /// Precedence, loosest first: OR, AND, NOT, comparison, additive,
    /// multiplicative, concatenation, unary.
    fn parse_expression(&mut self) -> Result<Expression> {
        self.nested(Self::parse_or)
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_and()?;
        while self.next_if_token(Token::Keyword(Keyword::Or)).is_some() {
            let rhs = self.parse_and()?;
            lhs = Operation::Or(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_not()?;
        while self.next_if_token(Token::Keyword(Keyword::And)).is_some() {
            let rhs = self.parse_not()?;
            lhs = Operation::And(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.next_if_token(Token::Keyword(Keyword::Not)).is_some() {
            let expr = self.nested(Self::parse_not)?;
            return Ok(Operation::Not(Box::new(expr)).into());
        }
        self.parse_comparison()
    }

    /// Comparison operators and the postfix predicates IS, IN, LIKE, BETWEEN
    fn parse_comparison(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_additive()?;
        loop {
            let build: fn(Box<Expression>, Box<Expression>) -> Operation = match self.peek()? {
                Some(Token::Equal) => Operation::Equal,
                Some(Token::NotEqual) => Operation::NotEqual,
                Some(Token::LessThan) => Operation::LessThan,
                Some(Token::LessThanOrEqual) => Operation::LessThanOrEqual,
                Some(Token::GreaterThan) => Operation::GreaterThan,
                Some(Token::GreaterThanOrEqual) => Operation::GreaterThanOrEqual,
                Some(Token::Keyword(Keyword::Is)) => {
                    self.next()?;
                    let negated = self.next_if_token(Token::Keyword(Keyword::Not)).is_some();
                    self.next_expect(Token::Keyword(Keyword::Null))?;
                    lhs = Expression::IsNull {
                        expr: Box::new(lhs),
                        negated,
                    };
                    continue;
                }
                Some(Token::Keyword(Keyword::Not)) => match self.peek_nth(1) {
                    Some(Token::Keyword(Keyword::In | Keyword::Like | Keyword::Between)) => {
                        self.next()?;
                        lhs = self.parse_postfix_predicate(lhs, true)?;
                        continue;
                    }
                    _ => break,
                },
                Some(Token::Keyword(Keyword::In | Keyword::Like | Keyword::Between)) => {
                    lhs = self.parse_postfix_predicate(lhs, false)?;
                    continue;
                }
                _ => break,
            };
            self.next()?;
            let rhs = self.parse_additive()?;
            lhs = build(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    /// Parses `IN (...)`, `LIKE pattern` or `BETWEEN a AND b` after its operand
    fn parse_postfix_predicate(&mut self, lhs: Expression, negated: bool) -> Result<Expression> {
        let expr = Box::new(lhs);
        match self.next()? {
            Token::Keyword(Keyword::In) => {
                self.next_expect(Token::OpenParen)?;
                if let Some(Token::Keyword(Keyword::Select)) = self.peek()? {
                    let query = Box::new(self.parse_select()?);
                    self.next_expect(Token::CloseParen)?;
                    return Ok(Expression::InSubquery {
                        expr,
                        query,
                        negated,
                    });
                }
                let mut list = Vec::new();
                if self.next_if_token(Token::CloseParen).is_none() {
                    loop {
                        list.push(self.parse_expression()?);
                        match self.next()? {
                            Token::CloseParen => break,
                            Token::Comma => {}
                            _ => return Err(self.unexpected_previous()),
                        }
                    }
                }
                Ok(Expression::InList {
                    expr,
                    list,
                    negated,
                })
            }
            Token::Keyword(Keyword::Like) => Ok(Expression::Like {
                expr,
                pattern: Box::new(self.parse_additive()?),
                negated,
            }),
            Token::Keyword(Keyword::Between) => {
                // Bounds bind tighter than AND so the separator is not consumed
                let low = self.parse_additive()?;
                self.next_expect(Token::Keyword(Keyword::And))?;
                let high = self.parse_additive()?;
                let between: Expression = Operation::And(
                    Box::new(Operation::GreaterThanOrEqual(expr.clone(), Box::new(low)).into()),
                    Box::new(Operation::LessThanOrEqual(expr, Box::new(high)).into()),
                )
                .into();
                Ok(if negated {
                    Operation::Not(Box::new(between)).into()
                } else {
                    between
                })
            }
            _ => Err(self.unexpected_previous()),
        }
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let build: fn(Box<Expression>, Box<Expression>) -> Operation = match self.peek()? {
                Some(Token::Plus) => Operation::Add,
                Some(Token::Minus) => Operation::Subtract,
                _ => break,
            };
            self.next()?;
            let rhs = self.parse_multiplicative()?;
            lhs = build(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_concat()?;
        loop {
            let build: fn(Box<Expression>, Box<Expression>) -> Operation = match self.peek()? {
                Some(Token::Asterisk) => Operation::Multiply,
                Some(Token::Slash) => Operation::Divide,
                Some(Token::Percent) => Operation::Remainder,
                _ => break,
            };
            self.next()?;
            let rhs = self.parse_concat()?;
            lhs = build(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_unary()?;
        while self.next_if_token(Token::Concat).is_some() {
            let rhs = self.parse_unary()?;
            lhs = Operation::Concat(Box::new(lhs), Box::new(rhs)).into();
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.next_if_token(Token::Minus).is_some() {
            // Fold negative literals so i64::MIN stays an integer
            if let Some(Token::Number(n)) = self.peek()? {
                self.next()?;
                return Ok(Self::parse_number(&format!("-{}", n))?.into());
            }
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Operation::Negate(Box::new(expr)).into());
        }
        if self.next_if_token(Token::Plus).is_some() {
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Operation::Identity(Box::new(expr)).into());
        }
        self.parse_primary()
    }

    /// Number literals are integers when they fit in i64, floats otherwise
    fn parse_number(n: &str) -> Result<Consts> {
        if n.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()) {
            if let Ok(i) = n.parse::<i64>() {
                return Ok(Consts::Integer(i));
            }
        }
        Ok(Consts::Float(n.parse()?))
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        Ok(match self.next()? {
            Token::Number(n) => Self::parse_number(&n)?.into(),
            Token::String(s) => Consts::String(s).into(),
            Token::Keyword(Keyword::True) => Consts::Boolean(true).into(),
            Token::Keyword(Keyword::False) => Consts::Boolean(false).into(),
            Token::Keyword(Keyword::Null) => Consts::Null.into(),
            Token::OpenParen => {
                if let Some(Token::Keyword(Keyword::Select)) = self.peek()? {
                    let query = self.parse_select()?;
                    self.next_expect(Token::CloseParen)?;
                    return Ok(Expression::Subquery(Box::new(query)));
                }
                let expr = self.parse_expression()?;
                self.next_expect(Token::CloseParen)?;
                expr
            }
            Token::Keyword(Keyword::Exists) => {
                self.next_expect(Token::OpenParen)?;
                let query = Box::new(self.parse_select()?);
                self.next_expect(Token::CloseParen)?;
                Expression::Exists {
                    query,
                    negated: false,
                }
            }
            Token::Keyword(Keyword::Case) => self.parse_case()?,
            Token::Keyword(Keyword::Cast) => {
                self.next_expect(Token::OpenParen)?;
                let expr = self.parse_expression()?;
                self.next_expect(Token::Keyword(Keyword::As))?;
                let datatype = self.parse_datatype()?;
                self.next_expect(Token::CloseParen)?;
                Expression::Cast(Box::new(expr), datatype)
            }
            Token::Ident(name) => self.parse_ident_expression(name)?,
            Token::Keyword(k) if k.is_soft() => {
                self.parse_ident_expression(k.to_str().to_lowercase())?
            }
            _ => return Err(self.unexpected_previous()),
        })
    }

    /// Parses what follows an identifier: a function call, a qualified
    /// column reference or a bare column reference
    fn parse_ident_expression(&mut self, name: String) -> Result<Expression> {
        if self.next_if_token(Token::OpenParen).is_some() {
            let mut args = Vec::new();
            let mut distinct = false;
            if self.next_if_token(Token::Asterisk).is_some() {
                self.next_expect(Token::CloseParen)?;
            } else if self.next_if_token(Token::CloseParen).is_none() {
                distinct = self.next_if_token(Token::Keyword(Keyword::Distinct)).is_some();
                loop {
                    args.push(self.parse_expression()?);
                    match self.next()? {
                        Token::CloseParen => break,
                        Token::Comma => {}
                        _ => return Err(self.unexpected_previous()),
                    }
                }
            }
            return Ok(Expression::Function {
                name: name.to_lowercase(),
                args,
                distinct,
            });
        }
        if self.next_if_token(Token::Period).is_some() {
            let column = self.next_ident()?;
            return Ok(Expression::Field(Some(name), column));
        }
        Ok(Expression::Field(None, name))
    }

    fn parse_case(&mut self) -> Result<Expression> {
        let operand = match self.peek()? {
            Some(Token::Keyword(Keyword::When)) => None,
            _ => Some(Box::new(self.parse_expression()?)),
        };
        let mut when_then = Vec::new();
        while self.next_if_token(Token::Keyword(Keyword::When)).is_some() {
            let when = self.parse_expression()?;
            self.next_expect(Token::Keyword(Keyword::Then))?;
            when_then.push((when, self.parse_expression()?));
        }
        if when_then.is_empty() {
            return Err(self.unexpected());
        }
        let else_expr = match self.next_if_token(Token::Keyword(Keyword::Else)) {
            Some(_) => Some(Box::new(self.parse_expression()?)),
            None => None,
        };
        self.next_expect(Token::Keyword(Keyword::End))?;
        Ok(Expression::Case {
            operand,
            when_then,
            else_expr,
        })
    }

    /// Peeks at the next token
    fn peek(&mut self) -> Result<Option<Token>> {
        Ok(self.peek_nth(0))
    }

    fn peek_nth(&self, n: usize) -> Option<Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t.clone())
    }

    /// Consumes and returns the next token
    fn next(&mut self) -> Result<Token> {
        match self.tokens.get(self.pos) {
            Some((token, _)) => {
                self.pos += 1;
                Ok(token.clone())
            }
            None => Err(Error::Parse("unexpected end of input".into())),
        }
    }

    /// Syntax error for the token at the current position
    fn unexpected(&self) -> Error {
        match self.tokens.get(self.pos) {
            Some((token, offset)) => {
                Error::Parse(format!("near \"{}\" at offset {}", token, offset))
            }
            None => Error::Parse("unexpected end of input".into()),
        }
    }

    /// Syntax error for the token that was just consumed
    fn unexpected_previous(&mut self) -> Error {
        self.pos = self.pos.saturating_sub(1);
        self.unexpected()
    }

    /// Expects and consumes an identifier; soft keywords are accepted too
    fn next_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(ident) => Ok(ident),
            Token::Keyword(k) if k.is_soft() => Ok(k.to_str().to_lowercase()),
            _ => Err(self.unexpected_previous()),
        }
    }

    /// Expects a specific token, returns error if different
    fn next_expect(&mut self, expect: Token) -> Result<()> {
        match self.tokens.get(self.pos) {
            Some((token, _)) if *token == expect => {
                self.pos += 1;
                Ok(())
            }
            Some((token, offset)) => Err(Error::Parse(format!(
                "expected {}, found \"{}\" at offset {}",
                expect, token, offset
            ))),
            None => Err(Error::Parse(format!(
                "expected {}, found end of input",
                expect
            ))),
        }
    }

    /// Consumes next token if it satisfies the predicate
    fn next_if<F: Fn(&Token) -> bool>(&mut self, predicate: F) -> Option<Token> {
        self.peek_nth(0).filter(|t| predicate(t))?;
        self.next().ok()
    }

    /// Consumes next token if it matches the given token
    fn next_if_token(&mut self, token: Token) -> Option<Token> {
        self.next_if(|t| t == &token)
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_NESTING_DEPTH, Parser};
    use crate::{
        error::{Error, Result},
        sql::parser::ast::{
            Consts, Expression, FromItem, InsertSource, JoinType, Operation, OrderDirection,
            Select, SelectItem, Statement,
        },
    };

    fn field(name: &str) -> Box<Expression> {
        Box::new(Expression::Field(None, name.to_string()))
    }

    fn int(i: i64) -> Box<Expression> {
        Box::new(Consts::Integer(i).into())
    }

    fn parse_select(sql: &str) -> Result<Select> {
        match Parser::new(sql).parse()? {
            Statement::Select(select) => Ok(*select),
            stmt => panic!("expected select, got {:?}", stmt),
        }
    }

    #[test]
    fn test_parser_create_table() -> Result<()> {
        let sql1 = "
            create table tbl1 (
                a int default 100,
                b float not null,
                c varchar(20) null,
                d bool default true
            );
        ";
        let stmt1 = Parser::new(sql1).parse()?;

        let sql2 = "
        create            table tbl1 (
            a int default     100,
            b float not null     ,
            c varchar ( 20 )     null,
            d       bool default        true
        )
        ";
        let stmt2 = Parser::new(sql2).parse()?;
        assert_eq!(stmt1, stmt2);

        let sql3 = "create table tbl1 (a int, b float,)";
        assert!(Parser::new(sql3).parse().is_err());
        Ok(())
    }

    #[test]
    fn test_parser_insert() -> Result<()> {
        let stmt = Parser::new("insert into tbl1 values (1, -2, 3.5, 'a', true);").parse()?;
        assert_eq!(
            stmt,
            Statement::Insert {
                table_name: "tbl1".to_string(),
                columns: None,
                source: InsertSource::Values(vec![vec![
                    Consts::Integer(1).into(),
                    Consts::Integer(-2).into(),
                    Consts::Float(3.5).into(),
                    Consts::String("a".to_string()).into(),
                    Consts::Boolean(true).into(),
                ]]),
            }
        );

        let stmt = Parser::new("insert into tbl2 (c1, c2) values (3, 'a'),(4, 'b')").parse()?;
        assert!(matches!(
            stmt,
            Statement::Insert {
                columns: Some(ref cols),
                source: InsertSource::Values(ref rows),
                ..
            } if cols.len() == 2 && rows.len() == 2
        ));

        let stmt = Parser::new("insert into t select a from s").parse()?;
        assert!(matches!(
            stmt,
            Statement::Insert { source: InsertSource::Select(_), .. }
        ));
        Ok(())
    }

    #[test]
    fn test_parser_precedence() -> Result<()> {
        let select = parse_select("select 1 + 2 * 3 = 7 or not a and b")?;
        let product: Box<Expression> = Box::new(Operation::Multiply(int(2), int(3)).into());
        let expected: Expression = Operation::Or(
            Box::new(
                Operation::Equal(
                    Box::new(Operation::Add(int(1), product).into()),
                    int(7),
                )
                .into(),
            ),
            Box::new(
                Operation::And(Box::new(Operation::Not(field("a")).into()), field("b")).into(),
            ),
        )
        .into();
        assert_eq!(select.select, vec![SelectItem::Expr(expected, None)]);
        Ok(())
    }

    #[test]
    fn test_parser_between_and_in() -> Result<()> {
        let select = parse_select("select * from t where a between 1 and 3 and b not in (1, 2)")?;
        let Some(Expression::Operation(Operation::And(lhs, rhs))) = select.where_clause else {
            panic!("expected AND");
        };
        assert_eq!(
            *lhs,
            Operation::And(
                Box::new(Operation::GreaterThanOrEqual(field("a"), int(1)).into()),
                Box::new(Operation::LessThanOrEqual(field("a"), int(3)).into()),
            )
            .into()
        );
        assert_eq!(
            *rhs,
            Expression::InList {
                expr: field("b"),
                list: vec![*int(1), *int(2)],
                negated: true,
            }
        );
        Ok(())
    }

    #[test]
    fn test_parser_select_clauses() -> Result<()> {
        let select = parse_select(
            "SELECT DISTINCT t.a AS x, count(*) cnt, s.* FROM t LEFT OUTER JOIN s ON t.a = s.a, u
             WHERE x > 1 GROUP BY t.a HAVING count(*) > 1 ORDER BY 1 DESC NULLS LAST, x LIMIT 5, 10",
        )?;
        assert!(select.distinct);
        assert_eq!(select.select.len(), 3);
        assert_eq!(
            select.select[1],
            SelectItem::Expr(
                Expression::Function { name: "count".into(), args: vec![], distinct: false },
                Some("cnt".into())
            )
        );
        assert_eq!(select.select[2], SelectItem::QualifiedWildcard("s".into()));
        match select.from {
            Some(FromItem::Join { join_type: JoinType::Cross, left, .. }) => {
                assert!(matches!(*left, FromItem::Join { join_type: JoinType::Left, .. }));
            }
            other => panic!("unexpected from {:?}", other),
        }
        assert_eq!(select.order_by.len(), 2);
        assert_eq!(select.order_by[0].direction, OrderDirection::Desc);
        assert_eq!(select.order_by[0].nulls_first, Some(false));
        assert_eq!(select.limit, Some(*int(10)));
        assert_eq!(select.offset, Some(*int(5)));
        Ok(())
    }

    #[test]
    fn test_parser_subqueries() -> Result<()> {
        let select = parse_select(
            "select (select max(b) from s), a from (select a from t) as d \
             where exists (select 1) and a in (select a from u)",
        )?;
        assert!(matches!(select.select[0], SelectItem::Expr(Expression::Subquery(_), None)));
        assert!(matches!(select.from, Some(FromItem::Subquery { alias: Some(_), .. })));
        Ok(())
    }

    #[test]
    fn test_parser_multiple_statements() -> Result<()> {
        let sql = "create table t (a int);; insert into t values (1); select * from t";
        let stmts = Parser::new(sql).parse_statements()?;
        assert_eq!(stmts.len(), 3);
        assert!(Parser::new("  ; ").parse_statements()?.is_empty());
        assert!(Parser::new("select 1 select 2").parse_statements().is_err());
        Ok(())
    }

    #[test]
    fn test_parser_errors() {
        let invalid = [
            "select",
            "select * from",
            "selec 1",
            "select (1",
            "update t set a = 1, a = 2",
        ];
        for sql in invalid {
            assert!(matches!(Parser::new(sql).parse(), Err(Error::Parse(_))), "{}", sql);
        }
        assert_eq!(
            Parser::new("select * form t").parse(),
            Err(Error::Parse("expected ;, found \"form\" at offset 9".into()))
        );
    }

    #[test]
    fn test_parser_nesting_limit() -> Result<()> {
        let nested = |open: &str, inner: &str, close: &str, n: usize| {
            format!("select {}{}{}", open.repeat(n), inner, close.repeat(n))
        };
        let too_deep = Err(Error::StackDepthExceeded(MAX_NESTING_DEPTH));

        // Deep input fails cleanly however it nests
        for sql in [
            nested("(", "1", ")", 5000),
            nested("(select ", "1", ")", 2000),
            nested("not ", "true", "", 100_000),
            nested("- ", "a", "", 100_000),
            format!("select * from {}t{}", "(".repeat(5000), ")".repeat(5000)),
        ] {
            assert_eq!(Parser::new(&sql).parse(), too_deep);
        }

        // Long operator chains build deep trees without recursing while parsing
        let chain = format!("select 1{}", " + 1".repeat(1000));
        assert_eq!(Parser::new(&chain).parse(), too_deep);
        let chain = format!("select 1{}", " + 1".repeat(100));
        assert!(Parser::new(&chain).parse().is_ok());

        // Parentheses alone add no tree depth
        let sql = nested("(", "1", ")", MAX_NESTING_DEPTH - 2);
        assert!(Parser::new(&sql).parse().is_ok());
        Ok(())
    }
}
