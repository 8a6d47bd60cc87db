//! Boolean query language over searchable run fields
//!
//! A query is a boolean combination (`&`, `|`, `~`, parentheses) of atomic
//! comparisons `field OP literal` with `OP` one of `==`, `!=`, `<`, `<=`,
//! `>`, `>=`, plus list membership `field in [v1, v2, ...]`. Fields are
//! dotted names; literals are quoted strings, integers, floats or booleans.
//!
//! ```text
//! info.status == 'COMPLETE' & (config.lr <= 0.1 | config.seed in [1, 2])
//! ```
//!
//! The empty query matches every run. Queries are validated against the
//! database's searchable schema before any row is evaluated; referencing an
//! unknown or non-searchable field fails fast. A run simply missing the
//! referenced field never matches the comparison and never errors.

mod lexer;

use std::collections::BTreeMap;

use lexer::{lex, Token};

use crate::reader::FieldSchema;
use crate::value::Scalar;
use crate::{Error, Result};

/// Comparison operator of an atomic predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Parsed query expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Matches every run (the empty query).
    All,
    /// `field OP literal`
    Cmp {
        /// Dotted field name
        field: String,
        /// Comparison operator
        op: CmpOp,
        /// Literal to compare against
        value: Scalar,
    },
    /// `field in [v1, v2, ...]`
    In {
        /// Dotted field name
        field: String,
        /// Accepted values
        values: Vec<Scalar>,
    },
    /// Conjunction
    And(Box<Expr>, Box<Expr>),
    /// Disjunction
    Or(Box<Expr>, Box<Expr>),
    /// Negation
    Not(Box<Expr>),
}

/// A parsed, evaluatable query.
#[derive(Debug, Clone)]
pub struct Query {
    expr: Expr,
}

impl Query {
    /// Parse a query string.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::QuerySyntax`] on malformed input.
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self { expr: Expr::All });
        }
        let tokens = lex(input)?;
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_or()?;
        parser.expect_end()?;
        Ok(Self { expr })
    }

    /// The expression tree.
    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Dotted field names referenced by the query.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_fields(&self.expr, &mut out);
        out
    }

    /// Check every referenced field against the searchable schema.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownField`] if a field is absent from the
    /// schema or not searchable.
    pub fn validate(&self, schema: &FieldSchema) -> Result<()> {
        for field in self.fields() {
            if !schema.contains(&field) || !FieldSchema::is_searchable(&field) {
                return Err(Error::UnknownField(field));
            }
        }
        Ok(())
    }

    /// Evaluate the query against one run's scalar fields.
    ///
    /// Absent fields make the enclosing comparison non-matching; they are
    /// never an error.
    #[must_use]
    pub fn matches(&self, values: &BTreeMap<String, Scalar>) -> bool {
        eval(&self.expr, values)
    }
}

fn collect_fields(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::All => {}
        Expr::Cmp { field, .. } | Expr::In { field, .. } => {
            if !out.contains(field) {
                out.push(field.clone());
            }
        }
        Expr::And(a, b) | Expr::Or(a, b) => {
            collect_fields(a, out);
            collect_fields(b, out);
        }
        Expr::Not(inner) => collect_fields(inner, out),
    }
}

fn eval(expr: &Expr, values: &BTreeMap<String, Scalar>) -> bool {
    match expr {
        Expr::All => true,
        Expr::Cmp { field, op, value } => values
            .get(field)
            .is_some_and(|actual| eval_cmp(actual, *op, value)),
        Expr::In {
            field,
            values: accepted,
        } => values
            .get(field)
            .is_some_and(|actual| accepted.iter().any(|v| actual.loose_eq(v))),
        Expr::And(a, b) => eval(a, values) && eval(b, values),
        Expr::Or(a, b) => eval(a, values) || eval(b, values),
        Expr::Not(inner) => !eval(inner, values),
    }
}

fn eval_cmp(actual: &Scalar, op: CmpOp, literal: &Scalar) -> bool {
    use std::cmp::Ordering;
    match op {
        CmpOp::Eq => actual.loose_eq(literal),
        CmpOp::Ne => !actual.loose_eq(literal),
        CmpOp::Lt => actual.compare(literal) == Some(Ordering::Less),
        CmpOp::Le => matches!(
            actual.compare(literal),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CmpOp::Gt => actual.compare(literal) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(
            actual.compare(literal),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

// Recursive descent with the usual precedence: `|` binds loosest, then `&`,
// then `~`, then atoms.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    const fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(Error::QuerySyntax(format!(
                "unexpected trailing input at '{token}'"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Not) => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(Expr::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::QuerySyntax("missing closing parenthesis".to_string())),
                }
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let field = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(token) => {
                return Err(Error::QuerySyntax(format!(
                    "expected field name, found '{token}'"
                )))
            }
            None => return Err(Error::QuerySyntax("unexpected end of query".to_string())),
        };

        match self.next() {
            Some(Token::Op(op)) => {
                let value = self.parse_literal()?;
                Ok(Expr::Cmp { field, op, value })
            }
            Some(Token::In) => {
                let values = self.parse_list()?;
                Ok(Expr::In { field, values })
            }
            Some(token) => Err(Error::QuerySyntax(format!(
                "expected comparison operator after '{field}', found '{token}'"
            ))),
            None => Err(Error::QuerySyntax(format!(
                "expected comparison operator after '{field}'"
            ))),
        }
    }

    fn parse_literal(&mut self) -> Result<Scalar> {
        match self.next() {
            Some(Token::Value(value)) => Ok(value),
            Some(token) => Err(Error::QuerySyntax(format!(
                "expected literal, found '{token}'"
            ))),
            None => Err(Error::QuerySyntax("expected literal".to_string())),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Scalar>> {
        match self.next() {
            Some(Token::LBracket) => {}
            _ => return Err(Error::QuerySyntax("expected '[' after 'in'".to_string())),
        }
        let mut values = Vec::new();
        if matches!(self.peek(), Some(Token::RBracket)) {
            self.next();
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::RBracket) => return Ok(values),
                _ => {
                    return Err(Error::QuerySyntax(
                        "expected ',' or ']' in list literal".to_string(),
                    ))
                }
            }
        }
    }
}
