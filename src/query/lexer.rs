//! Tokenizer for the query language

use std::fmt;

use super::CmpOp;
use crate::value::Scalar;
use crate::{Error, Result};

/// One token of a query string.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Dotted field name
    Ident(String),
    /// Literal scalar (string, number, boolean)
    Value(Scalar),
    /// Comparison operator
    Op(CmpOp),
    /// `&`
    And,
    /// `|`
    Or,
    /// `~` or `!`
    Not,
    /// `in`
    In,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::Value(value) => write!(f, "{value}"),
            Self::Op(op) => {
                let s = match op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                write!(f, "{s}")
            }
            Self::And => write!(f, "&"),
            Self::Or => write!(f, "|"),
            Self::Not => write!(f, "~"),
            Self::In => write!(f, "in"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::LBracket => write!(f, "["),
            Self::RBracket => write!(f, "]"),
            Self::Comma => write!(f, ","),
        }
    }
}

/// Tokenize a query string.
///
/// # Errors
///
/// Fails with [`Error::QuerySyntax`] on illegal characters, unterminated
/// strings or malformed numbers.
pub fn lex(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => pos += 1,
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            '&' => {
                tokens.push(Token::And);
                pos += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                pos += 1;
            }
            '~' => {
                tokens.push(Token::Not);
                pos += 1;
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    pos += 2;
                } else {
                    return Err(Error::QuerySyntax(
                        "single '=' is not an operator; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    pos += 2;
                } else {
                    tokens.push(Token::Not);
                    pos += 1;
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    pos += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    pos += 1;
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    pos += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    pos += 1;
                }
            }
            '\'' | '"' => {
                let (value, next) = lex_string(&chars, pos, c)?;
                tokens.push(Token::Value(Scalar::Str(value)));
                pos = next;
            }
            c if c.is_ascii_digit() || c == '+' || c == '-' || c == '.' => {
                let (value, next) = lex_number(&chars, pos)?;
                tokens.push(Token::Value(value));
                pos = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (word, next) = lex_word(&chars, pos);
                tokens.push(keyword_or_ident(&word));
                pos = next;
            }
            other => {
                return Err(Error::QuerySyntax(format!("illegal character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize, quote: char) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut pos = start + 1;
    while pos < chars.len() {
        if chars[pos] == quote {
            return Ok((out, pos + 1));
        }
        out.push(chars[pos]);
        pos += 1;
    }
    Err(Error::QuerySyntax("unterminated string literal".to_string()))
}

fn lex_number(chars: &[char], start: usize) -> Result<(Scalar, usize)> {
    let mut pos = start;
    if chars[pos] == '+' || chars[pos] == '-' {
        pos += 1;
    }
    let mut is_float = false;
    while pos < chars.len() {
        match chars[pos] {
            '0'..='9' => pos += 1,
            '.' | 'e' | 'E' => {
                is_float = true;
                pos += 1;
                if chars.get(pos) == Some(&'+') || chars.get(pos) == Some(&'-') {
                    pos += 1;
                }
            }
            _ => break,
        }
    }
    let text: String = chars[start..pos].iter().collect();
    let value = if is_float {
        text.parse::<f64>().map(Scalar::Float).ok()
    } else {
        text.parse::<i64>().map(Scalar::Int).ok()
    };
    value
        .map(|v| (v, pos))
        .ok_or_else(|| Error::QuerySyntax(format!("malformed number '{text}'")))
}

fn lex_word(chars: &[char], start: usize) -> (String, usize) {
    let mut pos = start;
    while pos < chars.len() {
        let c = chars[pos];
        if c.is_alphanumeric() || c == '_' || c == '.' {
            pos += 1;
        } else {
            break;
        }
    }
    (chars[start..pos].iter().collect(), pos)
}

fn keyword_or_ident(word: &str) -> Token {
    match word.to_ascii_lowercase().as_str() {
        "in" => Token::In,
        "true" => Token::Value(Scalar::Bool(true)),
        "false" => Token::Value(Scalar::Bool(false)),
        _ => Token::Ident(word.to_string()),
    }
}
