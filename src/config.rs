//! Engine configuration, loaded from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dialect::{connect_dialect, Backend, Dialect, ServerVersion};
use crate::error::ConfigError;
use crate::parser::ParserConfig;
use crate::schema::FieldSchema;

/// Target database backend and, when known, its server version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectConfig {
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Postgres,
            server_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Field schema JSON; the built-in test-result schema when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,
    #[serde(default)]
    pub dialect: DialectConfig,
    /// Requested limits above this are clamped.
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
    /// Maximum nesting of parentheses and `NOT`.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum height of the condition tree, counting every `AND`/`OR`/`NOT`.
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_limit() -> u64 {
    1000
}

fn default_max_depth() -> usize {
    ParserConfig::default().max_depth
}

fn default_max_tree_depth() -> usize {
    ParserConfig::default().max_tree_depth
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_path: None,
            dialect: DialectConfig::default(),
            max_limit: default_max_limit(),
            max_depth: default_max_depth(),
            max_tree_depth: default_max_tree_depth(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::NotFound(path_ref.to_path_buf()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;

        let config: EngineConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                origin: path_ref.display().to_string(),
                source,
            })?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_limit == 0 {
            return Err(ConfigError::Invalid("max_limit must be at least 1".to_string()));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".to_string()));
        }
        if self.max_tree_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_tree_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            max_depth: self.max_depth,
            max_tree_depth: self.max_tree_depth,
        }
    }

    /// Loads the configured schema, or the built-in one.
    pub fn load_schema(&self) -> Result<FieldSchema, ConfigError> {
        match &self.schema_path {
            Some(path) => FieldSchema::from_json_file(path),
            None => Ok(FieldSchema::builtin()),
        }
    }

    /// Builds the dialect, failing if the backend cannot run grouped queries.
    pub fn build_dialect(&self) -> Result<Arc<dyn Dialect>, ConfigError> {
        let version = self
            .dialect
            .server_version
            .as_deref()
            .map(str::parse::<ServerVersion>)
            .transpose()?;
        connect_dialect(self.dialect.backend, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_load_valid_json_config() {
        let file = write_temp(
            r#"{
                "dialect": { "backend": "mysql", "server_version": "8.0.32" },
                "max_limit": 200,
                "log_level": "debug"
            }"#,
        );

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.dialect.backend, Backend::Mysql);
        assert_eq!(config.max_limit, 200);
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.max_tree_depth, 256);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.build_dialect().unwrap().name(), "mysql");
        assert_eq!(config.load_schema().unwrap(), FieldSchema::builtin());
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let file = write_temp("{}");
        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_json_config() {
        let file = write_temp("invalid json");
        let result = EngineConfig::from_json_file(file.path());
        assert!(matches!(result, Err(ConfigError::Json { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::from_json_file("non_existent_file.json");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_zero_max_limit_is_rejected() {
        let file = write_temp(r#"{ "max_limit": 0 }"#);
        assert!(matches!(
            EngineConfig::from_json_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_old_backend_fails_at_startup() {
        let config = EngineConfig {
            dialect: DialectConfig {
                backend: Backend::Mysql,
                server_version: Some("5.7.44".to_string()),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.build_dialect(),
            Err(ConfigError::UnsupportedDialect { .. })
        ));
    }

    #[test]
    fn test_schema_path_is_followed() {
        let schema_json = serde_json::to_string(&FieldSchema::builtin()).unwrap();
        let schema_file = write_temp(&schema_json);
        let config = EngineConfig {
            schema_path: Some(schema_file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(config.load_schema().unwrap().base_table, "test_result");
    }
}
