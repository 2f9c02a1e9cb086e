//! Database backends the compiler can target.
//!
//! Each dialect pairs its quoting and placeholder conventions with the
//! sea-query backend that emits the statement.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sea_query::{MysqlQueryBuilder, PostgresQueryBuilder, QueryBuilder, SqliteQueryBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A target database.
///
/// Statements are rendered by [`Dialect::query_builder`] alone.
/// `quote_identifier` and `placeholder` describe that builder's output for
/// callers that splice or inspect SQL text, and must agree with it.
pub trait Dialect: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Quotes an identifier the way `query_builder` does, doubling any
    /// embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String;

    /// The placeholder `query_builder` emits for the `index`-th (1-based)
    /// bound parameter.
    fn placeholder(&self, index: usize) -> String;

    fn supports_common_table_expressions(&self) -> bool;

    fn supports_window_functions(&self) -> bool;

    /// The sea-query backend that renders statements for this dialect.
    fn query_builder(&self) -> Box<dyn QueryBuilder>;
}

fn quote_with(name: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(quote);
    for c in name.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);
    quoted
}

/// A `major.minor[.patch]` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ServerVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid(format!("invalid server version `{s}`"));
        // Ignore vendor suffixes such as "8.0.32-log".
        let numeric = s
            .trim()
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();
        let mut parts = numeric.split('.');
        let mut next = |required: bool| -> Result<u32, ConfigError> {
            match parts.next() {
                Some(p) if !p.is_empty() => p.parse().map_err(|_| invalid()),
                Some(_) => Err(invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(false)?;
        let patch = next(false)?;
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// PostgreSQL: `"name"` identifiers and `$n` placeholders.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect {
    pub version: Option<ServerVersion>,
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn supports_common_table_expressions(&self) -> bool {
        self.version.map_or(true, |v| v >= ServerVersion::new(8, 4, 0))
    }

    fn supports_window_functions(&self) -> bool {
        self.version.map_or(true, |v| v >= ServerVersion::new(8, 4, 0))
    }

    fn query_builder(&self) -> Box<dyn QueryBuilder> {
        Box::new(PostgresQueryBuilder)
    }
}

/// MySQL: backtick identifiers and `?` placeholders. CTEs and window
/// functions arrived in 8.0.
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect {
    pub version: Option<ServerVersion>,
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '`')
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn supports_common_table_expressions(&self) -> bool {
        self.version.map_or(true, |v| v >= ServerVersion::new(8, 0, 0))
    }

    fn supports_window_functions(&self) -> bool {
        self.version.map_or(true, |v| v >= ServerVersion::new(8, 0, 0))
    }

    fn query_builder(&self) -> Box<dyn QueryBuilder> {
        Box::new(MysqlQueryBuilder)
    }
}

/// SQLite: `"name"` identifiers and `?` placeholders. Window functions
/// arrived in 3.25.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect {
    pub version: Option<ServerVersion>,
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_with(name, '"')
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn supports_common_table_expressions(&self) -> bool {
        self.version.map_or(true, |v| v >= ServerVersion::new(3, 8, 3))
    }

    fn supports_window_functions(&self) -> bool {
        self.version.map_or(true, |v| v >= ServerVersion::new(3, 25, 0))
    }

    fn query_builder(&self) -> Box<dyn QueryBuilder> {
        Box::new(SqliteQueryBuilder)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Mysql,
    Sqlite,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Backend::Postgres),
            "mysql" => Ok(Backend::Mysql),
            "sqlite" | "sqlite3" => Ok(Backend::Sqlite),
            other => Err(ConfigError::Invalid(format!("unknown database backend `{other}`"))),
        }
    }
}

/// Builds the dialect for `backend` and refuses backends that cannot run
/// grouped queries. Called once at startup.
pub fn connect_dialect(
    backend: Backend,
    version: Option<ServerVersion>,
) -> Result<Arc<dyn Dialect>, ConfigError> {
    let dialect: Arc<dyn Dialect> = match backend {
        Backend::Postgres => Arc::new(PostgresDialect { version }),
        Backend::Mysql => Arc::new(MySqlDialect { version }),
        Backend::Sqlite => Arc::new(SqliteDialect { version }),
    };

    let missing = if !dialect.supports_common_table_expressions() {
        Some("common table expressions")
    } else if !dialect.supports_window_functions() {
        Some("window functions")
    } else {
        None
    };
    if let Some(missing) = missing {
        return Err(ConfigError::UnsupportedDialect {
            backend: dialect.name().to_string(),
            version: version.map_or_else(|| "unknown".to_string(), |v| v.to_string()),
            missing,
        });
    }
    Ok(dialect)
}
