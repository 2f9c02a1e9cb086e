//! Field catalog the query language is validated and compiled against.
//!
//! The hosting application delivers the catalog as JSON at startup. A loaded
//! [`FieldSchema`] is never mutated; [`SchemaRegistry`] hands out shared
//! snapshots and swaps in a new one on reload.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Declared type of a filterable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::String => "string",
            ValueType::Number => "number",
        })
    }
}

/// Where a DSL field lives in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub column: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Owning table; the base table when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// Key/value label storage, one row per label on a test result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTable {
    pub table: String,
    /// Column referencing the base table's primary key.
    pub foreign_key: String,
    pub key_column: String,
    pub value_column: String,
}

/// The status column and its severity order, worst first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSpec {
    pub column: String,
    pub severity: Vec<String>,
}

/// How a related table joins onto the base table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Column on the base table.
    pub local_column: String,
    /// Column on the related table.
    pub foreign_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub base_table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Column on the base table holding the session (launch) id.
    pub session_column: String,
    pub labels: LabelTable,
    pub status: StatusSpec,
    /// Ordering of ungrouped results; the primary key always breaks ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_order: Option<OrderSpec>,
    #[serde(default)]
    pub relations: BTreeMap<String, Relation>,
    pub fields: BTreeMap<String, FieldDef>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl FieldSchema {
    /// Parses and checks a schema from a JSON string.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let schema: FieldSchema =
            serde_json::from_str(content).map_err(|source| ConfigError::Json {
                origin: "field schema".to_string(),
                source,
            })?;
        schema.check()?;
        Ok(schema)
    }

    /// Loads and checks a schema from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let schema: FieldSchema =
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                origin: path.display().to_string(),
                source,
            })?;
        schema.check()?;
        Ok(schema)
    }

    /// Structural checks run once at load time.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.fields.is_empty() {
            return Err(ConfigError::Invalid("schema declares no fields".to_string()));
        }
        if self.status.severity.is_empty() {
            return Err(ConfigError::Invalid(
                "status severity order is empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.status.severity.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(ConfigError::Invalid(format!(
                "status `{dup}` appears twice in the severity order"
            )));
        }
        for (name, def) in &self.fields {
            let table = self.table_of(def);
            if table != self.base_table && !self.relations.contains_key(table) {
                return Err(ConfigError::Invalid(format!(
                    "field `{name}` lives in `{table}`, which has no relation to `{}`",
                    self.base_table
                )));
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn table_of<'s>(&'s self, def: &'s FieldDef) -> &'s str {
        def.table.as_deref().unwrap_or(&self.base_table)
    }

    /// Rank used by the worst-status aggregate: the worst status gets the
    /// highest rank, unknown statuses get 0.
    pub fn status_rank(&self, status: &str) -> i64 {
        let severity = &self.status.severity;
        severity
            .iter()
            .position(|s| s == status)
            .map_or(0, |idx| (severity.len() - idx) as i64)
    }

    /// Inverse of [`status_rank`](Self::status_rank), for mapping result rows.
    pub fn status_for_rank(&self, rank: i64) -> Option<&str> {
        let severity = &self.status.severity;
        let len = severity.len() as i64;
        if rank < 1 || rank > len {
            return None;
        }
        severity.get((len - rank) as usize).map(String::as_str)
    }

    /// The catalog of the stock test-result tables.
    pub fn builtin() -> Self {
        let field = |column: &str, value_type: ValueType| FieldDef {
            column: column.to_string(),
            value_type,
            table: None,
        };
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), field("name", ValueType::String));
        fields.insert("full_name".to_string(), field("full_name", ValueType::String));
        fields.insert("status".to_string(), field("status", ValueType::String));
        fields.insert("duration".to_string(), field("duration", ValueType::Number));
        fields.insert("session".to_string(), field("launch_id", ValueType::Number));
        fields.insert("created".to_string(), field("created_at", ValueType::Number));
        fields.insert(
            "launch_name".to_string(),
            FieldDef {
                column: "name".to_string(),
                value_type: ValueType::String,
                table: Some("launch".to_string()),
            },
        );

        let mut relations = BTreeMap::new();
        relations.insert(
            "launch".to_string(),
            Relation {
                local_column: "launch_id".to_string(),
                foreign_column: "id".to_string(),
            },
        );

        Self {
            base_table: "test_result".to_string(),
            primary_key: default_primary_key(),
            session_column: "launch_id".to_string(),
            labels: LabelTable {
                table: "test_result_label".to_string(),
                foreign_key: "test_result_id".to_string(),
                key_column: "name".to_string(),
                value_column: "value".to_string(),
            },
            status: StatusSpec {
                column: "status".to_string(),
                severity: ["broken", "failed", "unknown", "skipped", "passed"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            default_order: Some(OrderSpec {
                column: "created_at".to_string(),
                descending: true,
            }),
            relations,
            fields,
        }
    }
}

/// Holds the current schema snapshot.
///
/// Readers clone the `Arc` and keep using that snapshot for the whole
/// compilation; `replace` only affects compilations that start afterwards.
#[derive(Debug)]
pub struct SchemaRegistry {
    current: RwLock<Arc<FieldSchema>>,
}

impl SchemaRegistry {
    pub fn new(schema: FieldSchema) -> Self {
        Self {
            current: RwLock::new(Arc::new(schema)),
        }
    }

    pub fn snapshot(&self) -> Arc<FieldSchema> {
        // The guarded value is a plain Arc, so a poisoned lock still holds a usable snapshot.
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, schema: FieldSchema) {
        let next = Arc::new(schema);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        info!("field schema reloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCHEMA_JSON: &str = r#"{
        "base_table": "results",
        "session_column": "session_id",
        "labels": {
            "table": "labels",
            "foreign_key": "result_id",
            "key_column": "k",
            "value_column": "v"
        },
        "status": { "column": "state", "severity": ["failed", "passed"] },
        "fields": {
            "name": { "column": "title", "type": "string" },
            "duration": { "column": "elapsed_ms", "type": "number" }
        }
    }"#;

    #[test]
    fn test_load_from_json_str() {
        let schema = FieldSchema::from_json_str(SCHEMA_JSON).unwrap();
        assert_eq!(schema.base_table, "results");
        assert_eq!(schema.primary_key, "id");
        assert_eq!(schema.field("name").unwrap().column, "title");
        assert_eq!(schema.field("duration").unwrap().value_type, ValueType::Number);
        assert!(schema.field("missing").is_none());
        assert!(schema.default_order.is_none());
    }

    #[test]
    fn test_load_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{SCHEMA_JSON}").unwrap();

        let schema = FieldSchema::from_json_file(file.path()).unwrap();
        assert_eq!(schema.fields.len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = FieldSchema::from_json_file("no_such_schema.json").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_json() {
        let err = FieldSchema::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn test_field_in_unrelated_table_is_rejected() {
        let mut schema = FieldSchema::builtin();
        schema.fields.insert(
            "owner".to_string(),
            FieldDef {
                column: "login".to_string(),
                value_type: ValueType::String,
                table: Some("users".to_string()),
            },
        );
        assert!(matches!(schema.check(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_status_is_rejected() {
        let mut schema = FieldSchema::builtin();
        schema.status.severity.push("failed".to_string());
        assert!(matches!(schema.check(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_builtin_schema_is_consistent() {
        let schema = FieldSchema::builtin();
        assert!(schema.check().is_ok());
        assert_eq!(schema.table_of(schema.field("launch_name").unwrap()), "launch");
        assert_eq!(schema.table_of(schema.field("name").unwrap()), "test_result");
    }

    #[test]
    fn test_sample_schema_file_matches_builtin() {
        let schema = FieldSchema::from_json_str(include_str!("../field_schema.json")).unwrap();
        assert_eq!(schema, FieldSchema::builtin());
    }

    #[test]
    fn test_status_ranks_put_worst_first() {
        let schema = FieldSchema::builtin();
        assert_eq!(schema.status_rank("broken"), 5);
        assert_eq!(schema.status_rank("passed"), 1);
        assert_eq!(schema.status_rank("weird"), 0);
        assert!(schema.status_rank("failed") > schema.status_rank("skipped"));

        for status in &schema.status.severity {
            assert_eq!(
                schema.status_for_rank(schema.status_rank(status)),
                Some(status.as_str())
            );
        }
        assert_eq!(schema.status_for_rank(0), None);
        assert_eq!(schema.status_for_rank(6), None);
    }

    #[test]
    fn test_registry_swaps_snapshots() {
        let registry = SchemaRegistry::new(FieldSchema::builtin());
        let before = registry.snapshot();

        let mut next = FieldSchema::builtin();
        next.base_table = "test_result_v2".to_string();
        registry.replace(next);

        assert_eq!(before.base_table, "test_result");
        assert_eq!(registry.snapshot().base_table, "test_result_v2");
    }
}
