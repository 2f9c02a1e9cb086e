//! Semantic checks of a parsed query against the field schema.
//!
//! Validation resolves every filter field to its table, column and type and
//! checks the grouping dimensions. The result, a [`ValidatedQuery`], is the
//! only input the SQL compiler accepts.

use std::collections::HashSet;
use std::num::NonZeroU64;

use crate::ast::{CompOp, ConditionNode, GroupToken, Literal, LiteralKind, Query};
use crate::error::QueryError;
use crate::schema::{FieldSchema, ValueType};

/// A query whose fields and dimensions passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    filter: Option<ResolvedCondition>,
    group_by: Vec<GroupToken>,
    offset: u64,
    limit: NonZeroU64,
}

impl ValidatedQuery {
    pub fn filter(&self) -> Option<&ResolvedCondition> {
        self.filter.as_ref()
    }

    pub fn group_by(&self) -> &[GroupToken] {
        &self.group_by
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> NonZeroU64 {
        self.limit
    }
}

/// The condition tree with each leaf annotated with its storage location.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedCondition {
    Field(ResolvedField),
    And(Box<ResolvedCondition>, Box<ResolvedCondition>),
    Or(Box<ResolvedCondition>, Box<ResolvedCondition>),
    Not(Box<ResolvedCondition>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// The name used in the query.
    pub field: String,
    pub table: String,
    pub column: String,
    pub value_type: ValueType,
    pub op: CompOp,
    pub value: Literal,
}

impl ResolvedCondition {
    /// Tables referenced by field leaves, in depth-first order, without repeats.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables = Vec::new();
        self.collect_tables(&mut tables);
        tables
    }

    fn collect_tables<'s>(&'s self, tables: &mut Vec<&'s str>) {
        match self {
            ResolvedCondition::Field(f) => {
                if !tables.contains(&f.table.as_str()) {
                    tables.push(&f.table);
                }
            }
            ResolvedCondition::And(l, r) | ResolvedCondition::Or(l, r) => {
                l.collect_tables(tables);
                r.collect_tables(tables);
            }
            ResolvedCondition::Not(inner) => inner.collect_tables(tables),
        }
    }
}

/// Validates `query` against `schema`. Neither argument is modified.
pub fn validate(query: &Query, schema: &FieldSchema) -> Result<ValidatedQuery, QueryError> {
    let filter = query
        .filter
        .as_ref()
        .map(|node| resolve(node, schema))
        .transpose()?;
    check_group_by(&query.group_by)?;

    Ok(ValidatedQuery {
        filter,
        group_by: query.group_by.clone(),
        offset: query.offset,
        limit: query.limit,
    })
}

fn resolve(node: &ConditionNode, schema: &FieldSchema) -> Result<ResolvedCondition, QueryError> {
    Ok(match node {
        ConditionNode::Field(condition) => {
            let def = schema
                .field(&condition.field)
                .ok_or_else(|| QueryError::UnknownField {
                    field: condition.field.clone(),
                })?;
            if !accepts(def.value_type, condition.value.kind()) {
                return Err(QueryError::TypeMismatch {
                    field: condition.field.clone(),
                    expected_type: def.value_type,
                    literal_kind: condition.value.kind(),
                });
            }
            ResolvedCondition::Field(ResolvedField {
                field: condition.field.clone(),
                table: schema.table_of(def).to_string(),
                column: def.column.clone(),
                value_type: def.value_type,
                op: condition.op,
                value: condition.value.clone(),
            })
        }
        ConditionNode::And(l, r) => {
            ResolvedCondition::And(Box::new(resolve(l, schema)?), Box::new(resolve(r, schema)?))
        }
        ConditionNode::Or(l, r) => {
            ResolvedCondition::Or(Box::new(resolve(l, schema)?), Box::new(resolve(r, schema)?))
        }
        ConditionNode::Not(inner) => ResolvedCondition::Not(Box::new(resolve(inner, schema)?)),
    })
}

fn accepts(value_type: ValueType, literal: LiteralKind) -> bool {
    match (value_type, literal) {
        (ValueType::String, LiteralKind::String) | (ValueType::Number, LiteralKind::Number) => true,
        (ValueType::String, LiteralKind::Number) | (ValueType::Number, LiteralKind::String) => false,
    }
}

/// Tag keys need not exist anywhere; only repeats are rejected.
pub(crate) fn check_group_by(group_by: &[GroupToken]) -> Result<(), QueryError> {
    let mut session_seen = false;
    let mut keys = HashSet::new();
    for token in group_by {
        match token {
            GroupToken::Session => {
                if session_seen {
                    return Err(QueryError::DuplicateSessionDimension);
                }
                session_seen = true;
            }
            GroupToken::Tag { key } => {
                if !keys.insert(key.as_str()) {
                    return Err(QueryError::DuplicateGroupDimension {
                        tag_key: key.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_group_by;
    use crate::parser::{parse_filter, ParserConfig};

    fn query(filter: &str, group_by: &[&str]) -> Query {
        Query::new(
            parse_filter(filter, ParserConfig::default()).unwrap(),
            parse_group_by(group_by).unwrap(),
            0,
            10,
        )
        .unwrap()
    }

    #[test]
    fn test_resolves_columns_and_tables() {
        let schema = FieldSchema::builtin();
        let validated = validate(
            &query(r#"session = 7 AND launch_name = "nightly""#, &[]),
            &schema,
        )
        .unwrap();

        match validated.filter() {
            Some(ResolvedCondition::And(l, r)) => {
                match (l.as_ref(), r.as_ref()) {
                    (ResolvedCondition::Field(l), ResolvedCondition::Field(r)) => {
                        assert_eq!((l.table.as_str(), l.column.as_str()), ("test_result", "launch_id"));
                        assert_eq!(l.value_type, ValueType::Number);
                        assert_eq!((r.table.as_str(), r.column.as_str()), ("launch", "name"));
                    }
                    other => panic!("Expected field leaves, got {other:?}"),
                }
            }
            other => panic!("Expected AND, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_field() {
        let err = validate(&query(r#"foo = "x""#, &[]), &FieldSchema::builtin()).unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownField {
                field: "foo".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_field_deep_in_tree() {
        let err = validate(
            &query(r#"name = "a" OR NOT (status = "failed" AND Name = "b")"#, &[]),
            &FieldSchema::builtin(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownField {
                field: "Name".to_string()
            }
        );
    }

    #[test]
    fn test_type_mismatch() {
        let schema = FieldSchema::builtin();
        let err = validate(&query(r#"duration > "slow""#, &[]), &schema).unwrap_err();
        assert_eq!(
            err,
            QueryError::TypeMismatch {
                field: "duration".to_string(),
                expected_type: ValueType::Number,
                literal_kind: LiteralKind::String,
            }
        );

        let err = validate(&query("name = 5", &[]), &schema).unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { .. }));
    }

    #[test]
    fn test_duplicate_tag_dimension() {
        let err = validate(
            &query("", &["tag:target", "session", "tag:target"]),
            &FieldSchema::builtin(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::DuplicateGroupDimension {
                tag_key: "target".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_session_dimension() {
        let err = validate(&query("", &["session", "session"]), &FieldSchema::builtin())
            .unwrap_err();
        assert_eq!(err, QueryError::DuplicateSessionDimension);
    }

    #[test]
    fn test_tag_keys_need_not_be_in_schema() {
        let validated = validate(
            &query("", &["session", "tag:target", "tag:Target"]),
            &FieldSchema::builtin(),
        )
        .unwrap();
        assert_eq!(validated.group_by().len(), 3);
        assert!(validated.filter().is_none());
    }

    #[test]
    fn test_validation_leaves_schema_untouched() {
        let schema = FieldSchema::builtin();
        let before = schema.clone();
        let _ = validate(&query(r#"foo = "x""#, &[]), &schema);
        let _ = validate(&query(r#"name = "x""#, &["tag:a"]), &schema);
        assert_eq!(schema, before);
    }

    #[test]
    fn test_referenced_tables_in_traversal_order() {
        let validated = validate(
            &query(
                r#"launch_name = "a" AND (name = "b" OR launch_name = "c")"#,
                &[],
            ),
            &FieldSchema::builtin(),
        )
        .unwrap();
        assert_eq!(
            validated.filter().unwrap().referenced_tables(),
            vec!["launch", "test_result"]
        );
    }
}
