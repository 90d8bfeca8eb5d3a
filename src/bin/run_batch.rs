//! Runs a SQL script as one batch against an embedded engine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use swanlake_embedded::sql_parser::split_statements;
use swanlake_embedded::{ConnectionOptions, EmbeddedConfig, EmbeddedConnection, EngineRegistry};
use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Execute every statement of a script and report one update count each
#[derive(Parser, Debug)]
#[command(name = "run_batch")]
#[command(about = "Run a SQL script as a batch on an embedded DuckDB engine", long_about = None)]
struct Args {
    /// Database directory (omit or pass :memory: for an in-memory database)
    #[arg(short, long)]
    directory: Option<String>,

    /// Run the engine in sequential mode
    #[arg(short, long)]
    sequential: bool,

    /// Show engine startup diagnostics
    #[arg(short, long)]
    verbose: bool,

    /// SQL script to execute
    script: PathBuf,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = EmbeddedConfig::load().context("failed to load configuration")?;
    if args.directory.is_some() {
        config.directory = args.directory.clone();
    }
    config.sequential |= args.sequential;
    if args.verbose {
        config.silent = false;
    }
    init_tracing(&config);

    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read {}", args.script.display()))?;
    let statements = split_statements(&script).context("failed to split script")?;
    info!(statements = statements.len(), script = %args.script.display(), "running batch");

    let registry = Arc::new(EngineRegistry::from_config(&config));
    let conn = EmbeddedConnection::with_registry(registry, ConnectionOptions::from_config(&config));
    conn.connect("", "").context("failed to connect")?;

    let outcome = conn
        .execute_batch(statements.as_slice())
        .context("failed to run batch")?;
    for (index, (statement, count)) in statements.iter().zip(&outcome.counts).enumerate() {
        println!("{:>4}  {:>8}  {}", index + 1, count.to_string(), first_line(statement));
    }
    conn.close().context("failed to close connection")?;

    match outcome.error {
        Some(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or_default()
}

fn init_tracing(config: &EmbeddedConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
