//! AST for the query language.

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use crate::error::QueryError;
use crate::token::Span;

/// The root of a request: an optional filter, grouping dimensions and a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filter: Option<ConditionNode>,
    pub group_by: Vec<GroupToken>,
    pub offset: u64,
    pub limit: NonZeroU64,
}

impl Query {
    /// Builds a query, rejecting a zero `limit`.
    pub fn new(
        filter: Option<ConditionNode>,
        group_by: Vec<GroupToken>,
        offset: u64,
        limit: u64,
    ) -> Result<Self, QueryError> {
        let limit = NonZeroU64::new(limit).ok_or_else(|| {
            QueryError::InvalidPagination("limit must be at least 1".to_string())
        })?;
        Ok(Self {
            filter,
            group_by,
            offset,
            limit,
        })
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }
}

/// A node of the filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Field(FieldCondition),
    And(Box<ConditionNode>, Box<ConditionNode>),
    Or(Box<ConditionNode>, Box<ConditionNode>),
    Not(Box<ConditionNode>),
}

impl ConditionNode {
    pub fn and(left: ConditionNode, right: ConditionNode) -> Self {
        ConditionNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: ConditionNode, right: ConditionNode) -> Self {
        ConditionNode::Or(Box::new(left), Box::new(right))
    }

    pub fn negate(inner: ConditionNode) -> Self {
        ConditionNode::Not(Box::new(inner))
    }
}

/// Renders the tree fully parenthesized, which makes precedence visible.
impl fmt::Display for ConditionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionNode::Field(c) => write!(f, "{} {} {}", c.field, c.op, c.value),
            ConditionNode::And(l, r) => write!(f, "({l} AND {r})"),
            ConditionNode::Or(l, r) => write!(f, "({l} OR {r})"),
            ConditionNode::Not(inner) => write!(f, "(NOT {inner})"),
        }
    }
}

/// A single comparison, e.g. `status = "failed"`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub op: CompOp,
    pub value: Literal,
    /// Location of the field name in the query text.
    pub span: Span,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,    // =
    NotEq, // !=
    Gt,    // >
    Lt,    // <
    Gte,   // >=
    Lte,   // <=
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompOp::Eq => "=",
            CompOp::NotEq => "!=",
            CompOp::Gt => ">",
            CompOp::Lt => "<",
            CompOp::Gte => ">=",
            CompOp::Lte => "<=",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(Number),
}

impl Literal {
    pub fn kind(&self) -> LiteralKind {
        match self {
            Literal::String(_) => LiteralKind::String,
            Literal::Number(_) => LiteralKind::Number,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Number(Number::Int(n)) => write!(f, "{n}"),
            Literal::Number(Number::Float(n)) => write!(f, "{n}"),
        }
    }
}

/// The lexical kind of a literal, as opposed to the declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    String,
    Number,
}

impl fmt::Display for LiteralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiteralKind::String => "string",
            LiteralKind::Number => "number",
        })
    }
}

/// One grouping dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupToken {
    /// Group by the session (launch) a result belongs to.
    Session,
    /// Group by the value of the label with this key.
    Tag { key: String },
}

impl FromStr for GroupToken {
    type Err = QueryError;

    /// Accepts `session`, `tag:<key>` and `label:<key>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("session") {
            return Ok(GroupToken::Session);
        }
        let key = trimmed
            .split_once(':')
            .filter(|(prefix, _)| {
                prefix.eq_ignore_ascii_case("tag") || prefix.eq_ignore_ascii_case("label")
            })
            .map(|(_, key)| key.trim())
            .filter(|key| !key.is_empty());
        match key {
            Some(key) => Ok(GroupToken::Tag {
                key: key.to_string(),
            }),
            None => Err(QueryError::InvalidGroupDimension {
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for GroupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupToken::Session => f.write_str("session"),
            GroupToken::Tag { key } => write!(f, "tag:{key}"),
        }
    }
}

/// Parses a list of textual dimensions, keeping their order.
pub fn parse_group_by<S: AsRef<str>>(dimensions: &[S]) -> Result<Vec<GroupToken>, QueryError> {
    dimensions.iter().map(|d| d.as_ref().parse()).collect()
}
