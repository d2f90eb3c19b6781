//! SQL Lexer - Tokenizes SQL input text into a stream of tokens

use std::{fmt::Display, iter::Peekable, str::CharIndices};

use crate::error::{Error, Result};

/// Represents a single lexical token in the SQL input
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// SQL reserved keyword
    Keyword(Keyword),
    /// Identifier such as table name or column name, quoted or not
    Ident(String),
    /// String literal
    String(String),
    /// Numeric literal (integer or floating-point)
    Number(String),
    OpenParen,
    CloseParen,
    Comma,
    Semicolon,
    Period,
    Asterisk,
    Plus,
    Minus,
    Slash,
    Percent,
    /// `||`
    Concat,
    Equal,
    /// `<>` or `!=`
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Token::Keyword(keyword) => keyword.to_str(),
            Token::Ident(ident) => ident,
            Token::String(v) => return write!(f, "'{}'", v),
            Token::Number(n) => n,
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Period => ".",
            Token::Asterisk => "*",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Concat => "||",
            Token::Equal => "=",
            Token::NotEqual => "<>",
            Token::LessThan => "<",
            Token::LessThanOrEqual => "<=",
            Token::GreaterThan => ">",
            Token::GreaterThanOrEqual => ">=",
        })
    }
}

macro_rules! keywords {
    ($($variant:ident => $text:literal,)*) => {
        /// SQL reserved keywords
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Keyword {
            $($variant,)*
        }

        impl Keyword {
            /// Attempts to parse a string as a keyword (case-insensitive)
            pub fn from_str(ident: &str) -> Option<Keyword> {
                Some(match ident.to_uppercase().as_ref() {
                    $($text => Keyword::$variant,)*
                    _ => return None,
                })
            }

            /// Returns the uppercase string representation of the keyword
            pub fn to_str(&self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text,)*
                }
            }
        }
    };
}

keywords! {
    All => "ALL",
    And => "AND",
    As => "AS",
    Asc => "ASC",
    Between => "BETWEEN",
    Bigint => "BIGINT",
    Bool => "BOOL",
    Boolean => "BOOLEAN",
    By => "BY",
    Case => "CASE",
    Cast => "CAST",
    Char => "CHAR",
    Create => "CREATE",
    Cross => "CROSS",
    Decimal => "DECIMAL",
    Default => "DEFAULT",
    Delete => "DELETE",
    Desc => "DESC",
    Distinct => "DISTINCT",
    Double => "DOUBLE",
    Drop => "DROP",
    Else => "ELSE",
    End => "END",
    Exists => "EXISTS",
    False => "FALSE",
    First => "FIRST",
    Float => "FLOAT",
    From => "FROM",
    Group => "GROUP",
    Having => "HAVING",
    If => "IF",
    In => "IN",
    Inner => "INNER",
    Insert => "INSERT",
    Int => "INT",
    Integer => "INTEGER",
    Into => "INTO",
    Is => "IS",
    Join => "JOIN",
    Key => "KEY",
    Last => "LAST",
    Left => "LEFT",
    Like => "LIKE",
    Limit => "LIMIT",
    Not => "NOT",
    Null => "NULL",
    Nulls => "NULLS",
    Numeric => "NUMERIC",
    Offset => "OFFSET",
    On => "ON",
    Or => "OR",
    Order => "ORDER",
    Outer => "OUTER",
    Precision => "PRECISION",
    Primary => "PRIMARY",
    Real => "REAL",
    Right => "RIGHT",
    Select => "SELECT",
    Set => "SET",
    Smallint => "SMALLINT",
    String => "STRING",
    Table => "TABLE",
    Text => "TEXT",
    Then => "THEN",
    True => "TRUE",
    Update => "UPDATE",
    Values => "VALUES",
    Varchar => "VARCHAR",
    When => "WHEN",
    Where => "WHERE",
}

impl Keyword {
    /// Keywords that may still be used as table or column names
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Keyword::Key
                | Keyword::First
                | Keyword::Last
                | Keyword::Nulls
                | Keyword::Precision
                | Keyword::Text
                | Keyword::String
        )
    }
}

impl Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

/// SQL lexical analyzer (lexer/tokenizer)
pub struct Lexer<'a> {
    iter: Peekable<CharIndices<'a>>,
    len: usize,
    /// Byte offset where the most recently scanned token starts
    token_start: usize,
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.scan() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => self.iter.peek().map(|(pos, c)| {
                Err(Error::Parse(format!(
                    "unexpected character {} at offset {}",
                    c, pos
                )))
            }),
            Err(err) => Some(Err(err)),
        }
    }
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given SQL text
    pub fn new(sql_text: &'a str) -> Self {
        Self {
            iter: sql_text.char_indices().peekable(),
            len: sql_text.len(),
            token_start: 0,
        }
    }

    /// Byte offset of the start of the last token returned
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    fn offset(&mut self) -> usize {
        self.iter.peek().map(|(pos, _)| *pos).unwrap_or(self.len)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.iter.peek().map(|(_, c)| *c)
    }

    /// Consumes the next character if it satisfies the predicate
    fn next_if<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<char> {
        self.iter.next_if(|(_, c)| predicate(*c)).map(|(_, c)| c)
    }

    /// Consumes consecutive characters while they satisfy the predicate
    fn next_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<String> {
        let mut value = String::new();
        while let Some(c) = self.next_if(&predicate) {
            value.push(c);
        }
        Some(value).filter(|v| !v.is_empty())
    }

    /// Skips whitespace and comments (`-- line` and `/* block */`)
    fn erase_whitespace(&mut self) -> Result<()> {
        loop {
            self.next_while(|c| c.is_whitespace());
            let mut ahead = self.iter.clone();
            match (ahead.next().map(|(_, c)| c), ahead.next().map(|(_, c)| c)) {
                (Some('-'), Some('-')) => {
                    self.next_while(|c| c != '\n');
                }
                (Some('/'), Some('*')) => {
                    self.iter.next();
                    self.iter.next();
                    let mut prev = ' ';
                    loop {
                        match self.iter.next() {
                            Some((_, '/')) if prev == '*' => break,
                            Some((_, c)) => prev = c,
                            None => return Err(Error::Parse("unterminated comment".into())),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Scans and returns the next token
    fn scan(&mut self) -> Result<Option<Token>> {
        self.erase_whitespace()?;
        self.token_start = self.offset();
        match self.peek_char() {
            Some('\'') => self.scan_string(),
            Some('"') => self.scan_quoted_ident('"', '"'),
            Some('`') => self.scan_quoted_ident('`', '`'),
            Some('[') => self.scan_quoted_ident('[', ']'),
            Some(c) if c.is_ascii_digit() => Ok(self.scan_number()),
            Some('.') => {
                let mut ahead = self.iter.clone();
                ahead.next();
                match ahead.peek() {
                    Some((_, c)) if c.is_ascii_digit() => Ok(self.scan_number()),
                    _ => Ok(self.scan_symbol()),
                }
            }
            Some(c) if c.is_alphabetic() || c == '_' => Ok(self.scan_ident()),
            Some(_) => Ok(self.scan_symbol()),
            None => Ok(None),
        }
    }

    /// Scans a string literal (single quotes, `''` escapes a quote)
    fn scan_string(&mut self) -> Result<Option<Token>> {
        self.iter.next();
        let mut val = String::new();
        loop {
            match self.iter.next() {
                Some((_, '\'')) => {
                    if self.next_if(|c| c == '\'').is_some() {
                        val.push('\'');
                    } else {
                        break;
                    }
                }
                Some((_, c)) => val.push(c),
                None => {
                    return Err(Error::Parse(format!(
                        "unterminated string literal at offset {}",
                        self.token_start
                    )))
                }
            }
        }
        Ok(Some(Token::String(val)))
    }

    /// Scans a quoted identifier; quoted names are never keywords
    fn scan_quoted_ident(&mut self, open: char, close: char) -> Result<Option<Token>> {
        self.iter.next();
        let mut val = String::new();
        loop {
            match self.iter.next() {
                Some((_, c)) if c == close => {
                    // A doubled closing quote is an escaped quote, except for [..]
                    if open == close && self.next_if(|n| n == close).is_some() {
                        val.push(close);
                    } else {
                        break;
                    }
                }
                Some((_, c)) => val.push(c),
                None => {
                    return Err(Error::Parse(format!(
                        "unterminated quoted identifier at offset {}",
                        self.token_start
                    )))
                }
            }
        }
        Ok(Some(Token::Ident(val)))
    }

    /// Scans a numeric literal: digits, optional fraction, optional exponent
    fn scan_number(&mut self) -> Option<Token> {
        let mut val = self.next_while(|c| c.is_ascii_digit()).unwrap_or_default();
        if let Some(sep) = self.next_if(|c| c == '.') {
            val.push(sep);
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                val.push(c);
            }
        }
        let mut ahead = self.iter.clone();
        if let Some((_, 'e' | 'E')) = ahead.next() {
            let digits_follow = match ahead.next() {
                Some((_, '+' | '-')) => matches!(ahead.next(), Some((_, c)) if c.is_ascii_digit()),
                Some((_, c)) => c.is_ascii_digit(),
                None => false,
            };
            if digits_follow {
                val.extend(self.iter.next().map(|(_, c)| c));
                if let Some(sign) = self.next_if(|c| c == '+' || c == '-') {
                    val.push(sign);
                }
                while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                    val.push(c);
                }
            }
        }
        Some(Token::Number(val))
    }

    /// Scans an identifier or keyword
    fn scan_ident(&mut self) -> Option<Token> {
        let val = self.next_while(|c| c.is_alphanumeric() || c == '_' || c == '$')?;
        // Returns Keyword if matched, otherwise returns as a regular Ident
        Some(Keyword::from_str(&val).map_or(Token::Ident(val), Token::Keyword))
    }

    /// Scans a one or two character symbol token
    fn scan_symbol(&mut self) -> Option<Token> {
        let c = self.peek_char()?;
        let token = match c {
            '*' => Token::Asterisk,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '.' => Token::Period,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => Token::Equal,
            '<' | '>' | '!' | '|' => {
                let mut ahead = self.iter.clone();
                ahead.next();
                let next = ahead.peek().map(|(_, c)| *c);
                let (token, len) = match (c, next) {
                    ('<', Some('=')) => (Token::LessThanOrEqual, 2),
                    ('<', Some('>')) => (Token::NotEqual, 2),
                    ('<', _) => (Token::LessThan, 1),
                    ('>', Some('=')) => (Token::GreaterThanOrEqual, 2),
                    ('>', _) => (Token::GreaterThan, 1),
                    ('!', Some('=')) => (Token::NotEqual, 2),
                    ('|', Some('|')) => (Token::Concat, 2),
                    _ => return None,
                };
                for _ in 0..len {
                    self.iter.next();
                }
                return Some(token);
            }
            _ => return None,
        };
        self.iter.next();
        // `==` is accepted as equality
        if token == Token::Equal {
            self.next_if(|c| c == '=');
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::Lexer;
    use crate::{
        error::Result,
        sql::parser::lexer::{Keyword, Token},
    };

    fn tokens(sql: &str) -> Result<Vec<Token>> {
        Lexer::new(sql).collect()
    }

    #[test]
    fn test_lexer_create_table() -> Result<()> {
        assert_eq!(
            tokens(
                "CREATE table tbl
                (
                    id1 int primary key,
                    Id2 integer
                );"
            )?,
            vec![
                Token::Keyword(Keyword::Create),
                Token::Keyword(Keyword::Table),
                Token::Ident("tbl".to_string()),
                Token::OpenParen,
                Token::Ident("id1".to_string()),
                Token::Keyword(Keyword::Int),
                Token::Keyword(Keyword::Primary),
                Token::Keyword(Keyword::Key),
                Token::Comma,
                Token::Ident("Id2".to_string()),
                Token::Keyword(Keyword::Integer),
                Token::CloseParen,
                Token::Semicolon
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_insert_into() -> Result<()> {
        assert_eq!(
            tokens("insert into tbl values (1, 2, 'it''s', true, 4.55, .5, 1e3);")?,
            vec![
                Token::Keyword(Keyword::Insert),
                Token::Keyword(Keyword::Into),
                Token::Ident("tbl".to_string()),
                Token::Keyword(Keyword::Values),
                Token::OpenParen,
                Token::Number("1".to_string()),
                Token::Comma,
                Token::Number("2".to_string()),
                Token::Comma,
                Token::String("it's".to_string()),
                Token::Comma,
                Token::Keyword(Keyword::True),
                Token::Comma,
                Token::Number("4.55".to_string()),
                Token::Comma,
                Token::Number(".5".to_string()),
                Token::Comma,
                Token::Number("1e3".to_string()),
                Token::CloseParen,
                Token::Semicolon,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_operators_and_comments() -> Result<()> {
        assert_eq!(
            tokens("a<=b -- trailing\n<> c != d || e >= f /* block */ == t.x")?,
            vec![
                Token::Ident("a".to_string()),
                Token::LessThanOrEqual,
                Token::Ident("b".to_string()),
                Token::NotEqual,
                Token::Ident("c".to_string()),
                Token::NotEqual,
                Token::Ident("d".to_string()),
                Token::Concat,
                Token::Ident("e".to_string()),
                Token::GreaterThanOrEqual,
                Token::Ident("f".to_string()),
                Token::Equal,
                Token::Ident("t".to_string()),
                Token::Period,
                Token::Ident("x".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_quoted_ident() -> Result<()> {
        assert_eq!(
            tokens("select \"Select\", [my col] from `t`")?,
            vec![
                Token::Keyword(Keyword::Select),
                Token::Ident("Select".to_string()),
                Token::Comma,
                Token::Ident("my col".to_string()),
                Token::Keyword(Keyword::From),
                Token::Ident("t".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_errors() {
        assert!(tokens("select 'abc").is_err());
        assert!(tokens("select a ? b").is_err());
        assert!(tokens("select 1 /* open").is_err());
    }
}
