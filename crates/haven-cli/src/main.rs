//! haven-reconcile: bring a Haven database up to its declared schema.
//!
//! Subcommands:
//!
//! - `reconcile` (default): create missing tables and columns, print the
//!   result as JSON, exit non-zero if anything failed.
//! - `plan`: the same checks without executing any DDL.
//! - `check`: validate the table declarations offline.
//! - `tables`: list the declared tables and their required columns.

mod config;
mod output;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, DbArgs};
use haven_reconcile::{DbError, PgCatalog, Reconciler, ReconciliationResult, TableSpec};
use output::Painter;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "haven-reconcile", version, about = "Additive schema reconciliation for Haven")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Read table declarations from a JSON file instead of the built-in schema
    #[arg(long, global = true)]
    specs: Option<PathBuf>,

    #[command(flatten)]
    db: DbArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create missing tables and columns (default)
    Reconcile,
    /// Show what reconcile would change without changing it
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate table declarations without connecting
    Check,
    /// List declared tables
    Tables,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not connect: {0}")]
    Connect(DbError),

    #[error(transparent)]
    Reconcile(#[from] haven_reconcile::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine; flags and the real environment still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "haven_reconcile=info,haven_schema=info,haven_cli=info",
                )
            }),
        )
        .init();

    let painter = Painter {
        color: std::io::stdout().is_terminal(),
    };

    let specs = match &cli.specs {
        Some(path) => haven_reconcile::load_specs(path).map_err(CliError::from),
        None => Ok(haven_schema::tables()),
    };
    let command = cli.command.unwrap_or(Command::Reconcile);

    let specs = match specs {
        Ok(specs) => specs,
        // reconcile reports every failure as JSON on stdout
        Err(e) if matches!(command, Command::Reconcile) => {
            let (stdout, _) = reconcile_report(Err(e));
            println!("{stdout}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Reconcile => {
            let (stdout, success) = reconcile_report(run(&cli.db, &specs, false).await);
            println!("{stdout}");
            exit_code(success)
        }
        Command::Plan { json } => match run(&cli.db, &specs, true).await {
            Ok(result) => {
                if json {
                    println!("{}", result.to_json());
                } else {
                    print!("{}", output::render_plan(&result, &specs, painter));
                }
                exit_code(result.success)
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Command::Check => {
            let issues = haven_reconcile::validate(&specs);
            print!("{}", output::render_issues(&specs, &issues, painter));
            if issues.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Tables => {
            print!("{}", output::render_tables(&specs, painter));
            ExitCode::SUCCESS
        }
    }
}

async fn run(
    args: &DbArgs,
    specs: &[TableSpec],
    dry_run: bool,
) -> Result<ReconciliationResult, CliError> {
    let config = Config::from_args(args)?;
    info!(database = %config.display_url, dry_run, "connecting");

    let pool = config.pool()?;
    let conn = pool
        .get()
        .await
        .map_err(|e| CliError::Connect(DbError::from(e)))?;

    let catalog = PgCatalog::new(&conn);
    let mut reconciler = Reconciler::new(&catalog).dry_run(dry_run);
    if let Some(schema) = &config.schema {
        reconciler = reconciler.schema(schema.clone());
    }

    Ok(reconciler.run(specs).await?)
}

/// What `reconcile` prints on stdout, and whether it succeeded.
fn reconcile_report(outcome: Result<ReconciliationResult, CliError>) -> (String, bool) {
    match outcome {
        Ok(result) => (result.to_json(), result.success),
        Err(e) => (output::fatal_json(&e), false),
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
