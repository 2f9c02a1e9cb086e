//! Parser for the query language.
//!
//! ## Call graph
//!
//! ```text
//! parse()
//!   ├─ empty input (only Eof) → no filter
//!   ├─ parse_or_expression()
//!   │    ├─ parse_and_expression()
//!   │    │    ├─ parse_not_expression()
//!   │    │    │    ├─ NOT → parse_not_expression() (recursive)
//!   │    │    │    └─ parse_primary_expression()
//!   │    │    │         ├─ "(" → parse_or_expression() → expect ")"
//!   │    │    │         └─ IDENT comparator literal
//!   │    │    └─ AND → next parse_not_expression()
//!   │    └─ OR → next parse_and_expression()
//!   └─ expect Eof (leftover tokens are a syntax error)
//! ```
//!
//! ## Precedence (high to low)
//!
//! 1. Parentheses `(expr)`
//! 2. `NOT expr`
//! 3. `AND` (left-associative)
//! 4. `OR` (left-associative)
//!
//! ## Examples
//!
//! ```text
//! status = "failed"
//! status = "failed" AND name = "login_test"
//! NOT (duration > 1000 OR status != "passed")
//! ```

use crate::ast::{CompOp, ConditionNode, FieldCondition, Literal, Number};
use crate::error::QueryError;
use crate::token::{Token, TokenKind};

/// Limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    /// Maximum nesting of parentheses and `NOT` chains.
    pub max_depth: usize,
    /// Maximum height of the condition tree. Every `AND`, `OR` and `NOT`
    /// adds a level, so long flat chains count too; later stages walk the
    /// tree recursively.
    pub max_tree_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_tree_depth: 256,
        }
    }
}

/// A parsed condition and the height of its tree.
type Subtree = (ConditionNode, usize);

const COMPARATORS: &[&str] = &["=", "!=", ">", "<", ">=", "<="];
const LITERALS: &[&str] = &["string literal", "number literal"];
const PRIMARY_START: &[&str] = &["field name", "NOT", "("];
const AFTER_EXPRESSION: &[&str] = &["AND", "OR", "end of input"];

pub struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    position: usize,
    depth: usize,
    config: ParserConfig,
}

impl<'t, 'a> Parser<'t, 'a> {
    /// `tokens` must end with an `Eof` token, as produced by [`crate::lexer::tokenize`].
    pub fn new(tokens: &'t [Token<'a>]) -> Self {
        Self::with_config(tokens, ParserConfig::default())
    }

    pub fn with_config(tokens: &'t [Token<'a>], config: ParserConfig) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
            config,
        }
    }

    /// Returns the current token without advancing.
    fn peek(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.position)
    }

    fn peek_kind(&self) -> Option<&'t TokenKind<'a>> {
        self.peek().map(|t| &t.kind)
    }

    /// Returns the current token and advances past it.
    fn advance(&mut self) -> Option<&'t Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// Position used when the token stream runs out.
    fn end_position(&self) -> usize {
        self.tokens.last().map_or(0, |t| t.span.end)
    }

    /// Builds the error for an unexpected token. Running into `Eof` (or past
    /// the end of the slice) is reported as `UnexpectedEof`.
    fn unexpected(&self, token: Option<&Token<'a>>, expected: &[&'static str]) -> QueryError {
        match token {
            Some(Token {
                kind: TokenKind::Eof,
                span,
            }) => QueryError::UnexpectedEof {
                position: span.start,
            },
            Some(token) => QueryError::Syntax {
                position: token.span.start,
                expected: expected.to_vec(),
                found: token.kind.to_string(),
            },
            None => QueryError::UnexpectedEof {
                position: self.end_position(),
            },
        }
    }

    fn enter_nesting(&mut self, token: &Token<'a>) -> Result<(), QueryError> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(QueryError::NestingTooDeep {
                position: token.span.start,
                limit: self.config.max_depth,
            });
        }
        Ok(())
    }

    /// Rejects a subtree taller than `max_tree_depth`, blaming the operator
    /// that would have grown it.
    fn check_height(&self, height: usize, operator: &Token<'a>) -> Result<usize, QueryError> {
        if height > self.config.max_tree_depth {
            return Err(QueryError::NestingTooDeep {
                position: operator.span.start,
                limit: self.config.max_tree_depth,
            });
        }
        Ok(height)
    }

    /// Parses the whole token stream. Empty input yields `None`.
    pub fn parse(&mut self) -> Result<Option<ConditionNode>, QueryError> {
        if matches!(self.peek_kind(), Some(TokenKind::Eof) | None) {
            return Ok(None);
        }

        let (condition, _) = self.parse_or_expression()?;

        match self.peek() {
            Some(Token {
                kind: TokenKind::Eof,
                ..
            }) => Ok(Some(condition)),
            Some(token) => Err(QueryError::Syntax {
                position: token.span.start,
                expected: AFTER_EXPRESSION.to_vec(),
                found: token.kind.to_string(),
            }),
            // Slices without a trailing Eof are accepted as long as they are fully consumed.
            None => Ok(Some(condition)),
        }
    }

    /// Lowest precedence: `and_expr (OR and_expr)*`
    fn parse_or_expression(&mut self) -> Result<Subtree, QueryError> {
        let (mut left, mut height) = self.parse_and_expression()?;

        while let Some(operator @ Token {
            kind: TokenKind::Or,
            ..
        }) = self.peek()
        {
            self.advance(); // consume OR
            let (right, right_height) = self.parse_and_expression()?;
            height = self.check_height(height.max(right_height) + 1, operator)?;
            left = ConditionNode::or(left, right);
        }

        Ok((left, height))
    }

    /// `not_expr (AND not_expr)*`
    fn parse_and_expression(&mut self) -> Result<Subtree, QueryError> {
        let (mut left, mut height) = self.parse_not_expression()?;

        while let Some(operator @ Token {
            kind: TokenKind::And,
            ..
        }) = self.peek()
        {
            self.advance(); // consume AND
            let (right, right_height) = self.parse_not_expression()?;
            height = self.check_height(height.max(right_height) + 1, operator)?;
            left = ConditionNode::and(left, right);
        }

        Ok((left, height))
    }

    /// `NOT* primary`
    fn parse_not_expression(&mut self) -> Result<Subtree, QueryError> {
        match self.peek() {
            Some(token @ Token {
                kind: TokenKind::Not,
                ..
            }) => {
                self.advance(); // consume NOT
                self.enter_nesting(token)?;
                let (inner, height) = self.parse_not_expression()?;
                self.depth -= 1;
                let height = self.check_height(height + 1, token)?;
                Ok((ConditionNode::negate(inner), height))
            }
            _ => self.parse_primary_expression(),
        }
    }

    /// `IDENT comparator literal | "(" or_expr ")"`
    fn parse_primary_expression(&mut self) -> Result<Subtree, QueryError> {
        match self.peek() {
            Some(open @ Token {
                kind: TokenKind::LParen,
                ..
            }) => {
                self.advance(); // consume (
                self.enter_nesting(open)?;
                let inner = self.parse_or_expression()?;
                self.expect_rparen()?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token {
                kind: TokenKind::Identifier(name),
                span,
            }) => {
                self.advance(); // consume field name
                let op = self.parse_comparison_operator()?;
                let value = self.parse_literal()?;
                let leaf = ConditionNode::Field(FieldCondition {
                    field: name.to_string(),
                    op,
                    value,
                    span: *span,
                });
                Ok((leaf, 1))
            }
            other => Err(self.unexpected(other, PRIMARY_START)),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), QueryError> {
        let token = self.peek();
        if matches!(token.map(|t| &t.kind), Some(TokenKind::RParen)) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(token, &["AND", "OR", ")"]))
        }
    }

    fn parse_comparison_operator(&mut self) -> Result<CompOp, QueryError> {
        let token = self.peek();
        let op = match token.map(|t| &t.kind) {
            Some(TokenKind::Eq) => CompOp::Eq,
            Some(TokenKind::NotEq) => CompOp::NotEq,
            Some(TokenKind::Gt) => CompOp::Gt,
            Some(TokenKind::Lt) => CompOp::Lt,
            Some(TokenKind::Gte) => CompOp::Gte,
            Some(TokenKind::Lte) => CompOp::Lte,
            _ => return Err(self.unexpected(token, COMPARATORS)),
        };
        self.advance();
        Ok(op)
    }

    fn parse_literal(&mut self) -> Result<Literal, QueryError> {
        let token = self.peek();
        let literal = match token.map(|t| &t.kind) {
            Some(TokenKind::String(s)) => Literal::String(s.to_string()),
            Some(TokenKind::Number(text)) => {
                let position = token.map_or(0, |t| t.span.start);
                Literal::Number(parse_number(text, position)?)
            }
            _ => return Err(self.unexpected(token, LITERALS)),
        };
        self.advance();
        Ok(literal)
    }
}

fn parse_number(text: &str, position: usize) -> Result<Number, QueryError> {
    let invalid = || QueryError::Lex {
        position,
        message: format!("invalid number literal {text}"),
    };
    if text.contains('.') {
        text.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Number::Float)
            .ok_or_else(invalid)
    } else {
        text.parse::<i64>().map(Number::Int).map_err(|_| invalid())
    }
}

/// Lexes and parses `input` in one step.
pub fn parse_filter(input: &str, config: ParserConfig) -> Result<Option<ConditionNode>, QueryError> {
    let tokens = crate::lexer::tokenize(input)?;
    Parser::with_config(&tokens, config).parse()
}
