//! backend-kit - Main entry point.
//!
//! Command-line access to the database layer: a health probe, read queries and
//! retried write transactions. Results are printed as JSON.

use backend_kit::config::Config;
use backend_kit::db::{DEFAULT_RETRIES, Db, HealthState};
use backend_kit::error::{DbError, DbResult};
use backend_kit::logging::init_tracing;
use backend_kit::models::Fill;
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "backend-kit", version, about = "CockroachDB access toolkit")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the database answers
    Health,

    /// Run a read query and print the rows
    Query {
        /// SQL text; `$$` takes a scalar parameter, `$$$` a list
        sql: String,

        /// Parameter as JSON (scalar or array); plain text is taken as a string
        #[arg(long = "param", value_parser = parse_fill)]
        params: Vec<Fill>,
    },

    /// Run a statement in a write transaction, retrying conflicts
    Exec {
        /// SQL text; `$$` takes a scalar parameter, `$$$` a list
        sql: String,

        /// Parameter as JSON (scalar or array); plain text is taken as a string
        #[arg(long = "param", value_parser = parse_fill)]
        params: Vec<Fill>,

        /// Maximum attempts
        #[arg(long, default_value_t = DEFAULT_RETRIES)]
        retries: u32,
    },
}

fn parse_fill(s: &str) -> Result<Fill, String> {
    match serde_json::from_str::<JsonValue>(s) {
        Ok(value) => Fill::from_json(&value)
            .ok_or_else(|| format!("expected a JSON scalar or an array of scalars, got {}", s)),
        Err(_) => Ok(Fill::scalar(s)),
    }
}

/// Run a command. The flag tells whether the process should exit successfully.
async fn run(db: &Db, command: Command) -> DbResult<(JsonValue, bool)> {
    match command {
        Command::Health => {
            let report = db.health().await;
            let healthy = report.health == HealthState::Ok;
            Ok((to_json(&report)?, healthy))
        }
        Command::Query { sql, params } => {
            let rows = db
                .read(move |mut q| Box::pin(async move { q.query_with(&sql, &params).await }))
                .await?;
            Ok((to_json(&rows)?, true))
        }
        Command::Exec {
            sql,
            params,
            retries,
        } => {
            let rows = db
                .write_with_retries(
                    move |mut q| {
                        let sql = sql.clone();
                        let params = params.clone();
                        Box::pin(async move { q.query_with(&sql, &params).await })
                    },
                    retries,
                )
                .await?;
            Ok((to_json(&rows)?, true))
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> DbResult<JsonValue> {
    serde_json::to_value(value)
        .map_err(|e| DbError::internal(format!("Failed to serialize output: {}", e)))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.config) {
        eprintln!("Error: cannot open the log file: {}", e);
        std::process::exit(1);
    }

    info!(
        app = %cli.config.app_name,
        "Starting backend-kit v{}",
        env!("CARGO_PKG_VERSION")
    );
    cli.config.log_summary();

    let db = match Db::new(&cli.config) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Cannot set up the database");
            std::process::exit(1);
        }
    };

    let result = run(&db, cli.command).await;
    db.close().await;

    match result {
        Ok((output, success)) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            if !success {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!(
                error = %e,
                suggestion = e.suggestion().unwrap_or_default(),
                "Command failed"
            );
            std::process::exit(1);
        }
    }
}
