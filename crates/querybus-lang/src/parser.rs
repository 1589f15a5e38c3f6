//! Recursive descent parser for subscription queries.
//!
//! Grammar:
//!
//! ```text
//! select     := SELECT projection FROM ident [WHERE filter (AND filter)*] [;]
//! projection := '*' | column (',' column)*
//! column     := name ['.' name] [[AS] name]
//! filter     := name '=' literal
//! ```

use crate::ast::{Column, Filter, Projection, SelectQuery};
use crate::error::ParseError;
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::Span;

/// Keywords that cannot be used as bare aliases.
const RESERVED: &[&str] = &["select", "from", "where", "and", "as"];

/// Parser for subscription queries.
pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    end: usize,
}

impl Parser {
    /// Create a parser over the given source.
    pub fn new(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            end: source.len(),
        })
    }

    /// Parse a complete `SELECT` statement.
    pub fn parse_select(&mut self) -> Result<SelectQuery, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("empty query", Span::at(0)));
        }

        self.expect_keyword("select")?;
        let projection = self.parse_projection()?;
        self.expect_keyword("from")?;
        let table = self.expect_name()?;

        let mut filters = Vec::new();
        if self.eat_keyword("where") {
            filters.push(self.parse_filter()?);
            while self.eat_keyword("and") {
                filters.push(self.parse_filter()?);
            }
        }

        if matches!(self.peek(), Some(Token::Semicolon)) {
            self.pos += 1;
        }

        if let Some(tok) = self.tokens.get(self.pos) {
            return Err(ParseError::new(
                format!("unexpected trailing input {:?}", tok.token),
                tok.span,
            ));
        }

        Ok(SelectQuery {
            projection,
            table,
            filters,
        })
    }

    fn parse_projection(&mut self) -> Result<Projection, ParseError> {
        if matches!(self.peek(), Some(Token::Star)) {
            self.pos += 1;
            if matches!(self.peek(), Some(Token::Comma)) {
                return Err(ParseError::new(
                    "* cannot be combined with other columns",
                    self.current_span(),
                ));
            }
            return Ok(Projection::Wildcard);
        }

        let mut columns = vec![self.parse_column()?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            columns.push(self.parse_column()?);
        }
        Ok(Projection::Columns(columns))
    }

    fn parse_column(&mut self) -> Result<Column, ParseError> {
        if matches!(self.peek(), Some(Token::Star)) {
            return Err(ParseError::new(
                "* cannot be combined with other columns",
                self.current_span(),
            ));
        }

        let mut name = self.expect_name()?;
        // Qualified names keep only the column part.
        if matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            name = self.expect_name()?;
        }

        let mut column = Column::new(name);
        if self.eat_keyword("as") {
            column = column.with_alias(self.expect_name()?);
        } else if let Some(alias) = self.peek_alias() {
            self.pos += 1;
            column = column.with_alias(alias);
        }
        Ok(column)
    }

    fn parse_filter(&mut self) -> Result<Filter, ParseError> {
        let column = self.expect_name()?;
        match self.advance() {
            Some(SpannedToken {
                token: Token::Eq, ..
            }) => {}
            Some(tok) => {
                return Err(ParseError::new(
                    format!("expected '=', found {:?}", tok.token),
                    tok.span,
                ))
            }
            None => return Err(ParseError::new("expected '='", Span::at(self.end))),
        }

        match self.advance() {
            Some(SpannedToken {
                token: Token::String(value) | Token::Number(value) | Token::Ident(value),
                ..
            }) => Ok(Filter::new(column, value)),
            Some(tok) => Err(ParseError::new(
                format!("expected literal, found {:?}", tok.token),
                tok.span,
            )),
            None => Err(ParseError::new("expected literal", Span::at(self.end))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    /// A bare identifier directly after a column is an implicit alias.
    fn peek_alias(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Ident(ident)) if !is_reserved(ident) => Some(ident.clone()),
            Some(Token::QuotedIdent(ident)) => Some(ident.clone()),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| Span::at(self.end))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected {}", keyword.to_ascii_uppercase()),
                self.current_span(),
            ))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Some(SpannedToken {
                token: Token::Ident(ident),
                span,
            }) => {
                if is_reserved(&ident) {
                    Err(ParseError::new(
                        format!("expected name, found keyword {}", ident.to_ascii_uppercase()),
                        span,
                    ))
                } else {
                    Ok(ident)
                }
            }
            Some(SpannedToken {
                token: Token::QuotedIdent(ident),
                ..
            }) => Ok(ident),
            Some(tok) => Err(ParseError::new(
                format!("expected name, found {:?}", tok.token),
                tok.span,
            )),
            None => Err(ParseError::new("expected name", Span::at(self.end))),
        }
    }
}

fn is_reserved(ident: &str) -> bool {
    RESERVED.iter().any(|k| ident.eq_ignore_ascii_case(k))
}

/// Parse a `SELECT` query.
pub fn parse_select(source: &str) -> Result<SelectQuery, ParseError> {
    Parser::new(source)?.parse_select()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_select() {
        let query = parse_select("SELECT pid, name FROM processes").unwrap();
        assert_eq!(
            query,
            SelectQuery {
                projection: Projection::Columns(vec![Column::new("pid"), Column::new("name")]),
                table: "processes".into(),
                filters: vec![],
            }
        );
    }

    #[test]
    fn test_aliases_and_qualified_names() {
        let query =
            parse_select("select p.pid as id, p.name process from processes;").unwrap();
        assert_eq!(
            query.column_names(),
            Some(vec!["id".to_string(), "process".to_string()])
        );
        assert_eq!(query.columns().unwrap()[0].name, "pid");
    }

    #[test]
    fn test_where_clause() {
        let query =
            parse_select("SELECT name FROM users WHERE uid = 0 AND shell = '/bin/sh'").unwrap();
        assert_eq!(
            query.filters,
            vec![Filter::new("uid", "0"), Filter::new("shell", "/bin/sh")]
        );
    }

    #[test]
    fn test_wildcard() {
        let query = parse_select("SELECT * FROM users").unwrap();
        assert!(query.is_wildcard());
    }

    #[test]
    fn test_wildcard_mixed_with_columns() {
        assert!(parse_select("SELECT *, name FROM users").is_err());
        assert!(parse_select("SELECT name, * FROM users").is_err());
    }

    #[test]
    fn test_missing_pieces() {
        assert!(parse_select("").is_err());
        assert!(parse_select("   ").is_err());
        assert!(parse_select("SELECT FROM users").is_err());
        assert!(parse_select("SELECT name users").is_err());
        assert!(parse_select("SELECT name FROM").is_err());
        assert!(parse_select("SELECT name FROM users WHERE uid").is_err());
        assert!(parse_select("SELECT name FROM users WHERE uid =").is_err());
    }

    #[test]
    fn test_trailing_input() {
        let err = parse_select("SELECT name FROM users extra").unwrap_err();
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn test_not_a_select() {
        let err = parse_select("DELETE FROM users").unwrap_err();
        assert_eq!(err.message, "expected SELECT");
        assert_eq!(err.span, Span::new(0, 6));
    }
}
