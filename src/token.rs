//! The token definition for the query language.

use std::borrow::Cow;
use std::fmt;

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Keywords
    And, // "AND"
    Or,  // "OR"
    Not, // "NOT"

    // Literals
    Identifier(&'a str),
    /// String contents without the surrounding quotes, escapes resolved.
    String(Cow<'a, str>),
    /// The raw digits of a number literal.
    Number(&'a str),

    // Punctuation
    LParen, // (
    RParen, // )

    // Operators
    Eq,    // =
    NotEq, // !=
    Gt,    // >
    Lt,    // <
    Gte,   // >=
    Lte,   // <=

    Eof,
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::And => f.write_str("AND"),
            TokenKind::Or => f.write_str("OR"),
            TokenKind::Not => f.write_str("NOT"),
            TokenKind::Identifier(name) => write!(f, "identifier `{name}`"),
            TokenKind::String(s) => write!(f, "string \"{s}\""),
            TokenKind::Number(n) => write!(f, "number {n}"),
            TokenKind::LParen => f.write_str("`(`"),
            TokenKind::RParen => f.write_str("`)`"),
            TokenKind::Eq => f.write_str("`=`"),
            TokenKind::NotEq => f.write_str("`!=`"),
            TokenKind::Gt => f.write_str("`>`"),
            TokenKind::Lt => f.write_str("`<`"),
            TokenKind::Gte => f.write_str("`>=`"),
            TokenKind::Lte => f.write_str("`<=`"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
