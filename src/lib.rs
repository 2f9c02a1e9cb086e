//! Compiles the test-result query language into parameterized SQL.
//!
//! ```text
//! query string ─► lexer ─► parser ─► AST ─► validator ─► SQL compiler ─► CompiledStatement
//!                                             ▲               ▲
//!                                       FieldSchema        Dialect
//! ```
//!
//! The crate never talks to a database: the [`CompiledStatement`] is handed
//! to whatever executes SQL in the hosting application.

pub mod ast;
pub mod config;
pub mod dialect;
pub mod error;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod schema;
pub mod sql_compiler;
pub mod token;
pub mod validator;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use crate::ast::{ConditionNode, GroupToken, Query};
pub use crate::config::EngineConfig;
pub use crate::dialect::Dialect;
pub use crate::error::{ConfigError, QueryError};
pub use crate::schema::{FieldSchema, SchemaRegistry};
pub use crate::sql_compiler::{CompiledStatement, SqlCompiler};

use crate::ast::parse_group_by;
use crate::parser::{parse_filter, ParserConfig};
use crate::validator::validate;

/// One compilation request as the hosting application receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    /// Dimensions such as `session` or `tag:target`, in output order.
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            group_by: Vec::new(),
            offset: 0,
            limit: default_limit(),
        }
    }

    pub fn group_by<S: Into<String>>(mut self, dimensions: impl IntoIterator<Item = S>) -> Self {
        self.group_by = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Runs the whole pipeline against the current schema snapshot.
///
/// Safe to share between threads; every call works on its own data plus an
/// immutable schema snapshot.
#[derive(Debug)]
pub struct QueryEngine {
    schemas: SchemaRegistry,
    compiler: SqlCompiler,
    parser_config: ParserConfig,
    max_limit: u64,
}

impl QueryEngine {
    pub fn new(schema: FieldSchema, dialect: Arc<dyn Dialect>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            schemas: SchemaRegistry::new(schema),
            compiler: SqlCompiler::new(dialect),
            parser_config: defaults.parser_config(),
            max_limit: defaults.max_limit,
        }
    }

    /// Builds an engine from configuration. Unsupported backends and broken
    /// schemas are rejected here, before any query is compiled.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.check()?;
        let schema = config.load_schema()?;
        let dialect = config.build_dialect()?;
        Ok(Self {
            schemas: SchemaRegistry::new(schema),
            compiler: SqlCompiler::new(dialect),
            parser_config: config.parser_config(),
            max_limit: config.max_limit,
        })
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.compiler.dialect()
    }

    pub fn schema(&self) -> Arc<FieldSchema> {
        self.schemas.snapshot()
    }

    /// Swaps in a new schema. Compilations already running keep the old one.
    pub fn reload_schema(&self, schema: FieldSchema) -> Result<(), ConfigError> {
        schema.check()?;
        self.schemas.replace(schema);
        Ok(())
    }

    /// Parses `request.query` into a filter tree without validating it.
    pub fn parse(&self, input: &str) -> Result<Option<ConditionNode>, QueryError> {
        parse_filter(input, self.parser_config)
    }

    pub fn compile(&self, request: &QueryRequest) -> Result<CompiledStatement, QueryError> {
        let schema = self.schemas.snapshot();

        let filter = self.parse(&request.query)?;
        let group_by = parse_group_by(&request.group_by)?;

        let limit = if request.limit > self.max_limit {
            debug!(
                requested = request.limit,
                max = self.max_limit,
                "clamping page size"
            );
            self.max_limit
        } else {
            request.limit
        };

        let query = Query::new(filter, group_by, request.offset, limit)?;
        let validated = validate(&query, &schema)?;
        self.compiler.compile(&validated, &schema)
    }
}
