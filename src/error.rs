//! Error types for the query pipeline and its configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::ast::LiteralKind;
use crate::schema::ValueType;

/// Every way a query can be rejected, from lexing through SQL generation.
///
/// Positions are byte offsets into the original query string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("lex error at {position}: {message}")]
    Lex { position: usize, message: String },

    #[error("syntax error at {position}: expected {}, found {found}", .expected.join(" or "))]
    Syntax {
        position: usize,
        expected: Vec<&'static str>,
        found: String,
    },

    #[error("unexpected end of input at {position}")]
    UnexpectedEof { position: usize },

    #[error("expression nested deeper than {limit} levels at {position}")]
    NestingTooDeep { position: usize, limit: usize },

    #[error("unknown field `{field}`")]
    UnknownField { field: String },

    #[error("field `{field}` expects a {expected_type} value, got a {literal_kind} literal")]
    TypeMismatch {
        field: String,
        expected_type: ValueType,
        literal_kind: LiteralKind,
    },

    #[error("tag `{tag_key}` is grouped more than once")]
    DuplicateGroupDimension { tag_key: String },

    #[error("session is grouped more than once")]
    DuplicateSessionDimension,

    #[error("invalid group dimension `{input}`: expected `session` or `tag:<key>`")]
    InvalidGroupDimension { input: String },

    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    /// Internal: grouping invariants were broken after validation.
    #[error("unsupported group combination: {0}")]
    UnsupportedGroupCombination(String),

    /// Internal: any other condition the compiler cannot handle.
    #[error("compile error: {0}")]
    Compile(String),
}

impl QueryError {
    /// Source position for lexical and syntax errors.
    pub fn position(&self) -> Option<usize> {
        match self {
            QueryError::Lex { position, .. }
            | QueryError::Syntax { position, .. }
            | QueryError::UnexpectedEof { position }
            | QueryError::NestingTooDeep { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// True when the error signals a bug rather than bad caller input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            QueryError::UnsupportedGroupCombination(_) | QueryError::Compile(_)
        )
    }
}

/// Errors raised while loading configuration or the field schema.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("{backend} {version} lacks {missing}")]
    UnsupportedDialect {
        backend: String,
        version: String,
        missing: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_only_for_lexical_errors() {
        let lex = QueryError::Lex {
            position: 7,
            message: "unterminated string".to_string(),
        };
        assert_eq!(lex.position(), Some(7));
        assert_eq!(QueryError::UnexpectedEof { position: 3 }.position(), Some(3));

        let unknown = QueryError::UnknownField {
            field: "foo".to_string(),
        };
        assert_eq!(unknown.position(), None);
        assert!(!unknown.is_internal());
        assert!(QueryError::Compile("boom".to_string()).is_internal());
    }

    #[test]
    fn test_syntax_error_message_lists_expected_tokens() {
        let err = QueryError::Syntax {
            position: 4,
            expected: vec!["AND", "OR"],
            found: "`(`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "syntax error at 4: expected AND or OR, found `(`"
        );
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = QueryError::TypeMismatch {
            field: "duration".to_string(),
            expected_type: ValueType::Number,
            literal_kind: LiteralKind::String,
        };
        assert_eq!(
            err.to_string(),
            "field `duration` expects a number value, got a string literal"
        );
    }
}
