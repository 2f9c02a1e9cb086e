use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use result_query::config::EngineConfig;
use result_query::dialect::Backend;
use result_query::logging::{self, LogFormat};
use result_query::{CompiledStatement, QueryEngine, QueryRequest};

#[derive(Parser, Debug)]
#[command(name = "result-query")]
#[command(about = "Compile test-result queries into parameterized SQL")]
#[command(version)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Field schema file (JSON); overrides the configured one
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Target backend: postgres, mysql or sqlite
    #[arg(short, long)]
    dialect: Option<Backend>,

    /// Log level, unless RUST_LOG is set
    #[arg(long)]
    log_level: Option<String>,

    /// Multi-line log output
    #[arg(long)]
    pretty_logs: bool,

    /// Compile one query and exit
    #[arg(short, long)]
    execute: Option<String>,

    /// Group dimensions, e.g. `session,tag:target`
    #[arg(short, long, value_delimiter = ',')]
    group_by: Vec<String>,

    #[arg(long, default_value_t = 0)]
    offset: u64,

    #[arg(long, default_value_t = 50)]
    limit: u64,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(schema) = &cli.schema {
        config.schema_path = Some(schema.clone());
    }
    if let Some(backend) = cli.dialect {
        config.dialect.backend = backend;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

fn print_statement(stmt: &CompiledStatement) {
    println!("{}", stmt.sql_text);
    for (i, param) in stmt.params.iter().enumerate() {
        println!("  [{}] {:?}", i + 1, param);
    }
    if !stmt.group_columns.is_empty() {
        println!("  group columns: {}", stmt.group_columns.join(", "));
    }
}

/// State carried between REPL lines.
struct Session {
    engine: QueryEngine,
    config: EngineConfig,
    group_by: Vec<String>,
    offset: u64,
    limit: u64,
}

impl Session {
    fn compile(&self, query: &str) {
        let request = QueryRequest {
            query: query.to_string(),
            group_by: self.group_by.clone(),
            offset: self.offset,
            limit: self.limit,
        };
        match self.engine.compile(&request) {
            Ok(stmt) => print_statement(&stmt),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    /// Handles a `:command` line. Returns false when the REPL should stop.
    fn command(&mut self, line: &str) -> Result<bool> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        match name {
            ":quit" | ":q" => return Ok(false),
            ":group" => {
                self.group_by = args
                    .iter()
                    .flat_map(|a| a.split(','))
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect();
                println!("grouping by [{}]", self.group_by.join(", "));
            }
            ":page" => {
                let [offset, limit] = args.as_slice() else {
                    bail!("usage: :page <offset> <limit>");
                };
                self.offset = offset.parse().context("invalid offset")?;
                self.limit = limit.parse().context("invalid limit")?;
            }
            ":dialect" => {
                let [backend] = args.as_slice() else {
                    bail!("usage: :dialect postgres|mysql|sqlite");
                };
                self.config.dialect.backend = backend.parse()?;
                self.config.dialect.server_version = None;
                self.engine = QueryEngine::from_config(&self.config)?;
                println!("dialect: {}", self.engine.dialect().name());
            }
            ":reload" => {
                let schema = self.config.load_schema()?;
                self.engine.reload_schema(schema)?;
                println!("schema reloaded");
            }
            ":help" => {
                println!(":group <dims>         set group dimensions (session, tag:<key>)");
                println!(":page <offset> <limit>");
                println!(":dialect <backend>");
                println!(":reload               re-read the schema file");
                println!(":quit");
            }
            other => bail!("unknown command `{other}`, try :help"),
        }
        Ok(true)
    }
}

fn repl(mut session: Session) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!(
        "result-query ({}), :help for commands",
        session.engine.dialect().name()
    );

    loop {
        match editor.readline("query> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if line.starts_with(':') {
                    match session.command(line) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => eprintln!("error: {e:#}"),
                    }
                } else {
                    session.compile(line);
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let format = if cli.pretty_logs {
        LogFormat::Pretty
    } else {
        LogFormat::Compact
    };
    logging::init(&config.log_level, format);

    let engine = QueryEngine::from_config(&config)?;

    if let Some(query) = &cli.execute {
        let request = QueryRequest {
            query: query.clone(),
            group_by: cli.group_by.clone(),
            offset: cli.offset,
            limit: cli.limit,
        };
        let stmt = engine.compile(&request)?;
        print_statement(&stmt);
        return Ok(());
    }

    repl(Session {
        engine,
        config,
        group_by: cli.group_by,
        offset: cli.offset,
        limit: cli.limit,
    })
}
