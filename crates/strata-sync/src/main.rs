//! strata-sync CLI
//!
//! Applies a score to a SQLite database, previews the changes, or prints
//! the create script for any supported dialect.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, Subcommand};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use strata_core::{DialectKind, Score};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use strata_sync::prelude::*;

/// Keeps databases in line with a strata score.
#[derive(Parser)]
#[command(name = "strata-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:strata.db")]
    database: String,

    /// Target dialect. Only sqlite can be synchronized live.
    #[arg(long, env = "STRATA_DIALECT", default_value = "sqlite")]
    dialect: DialectKind,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the database in line with a score.
    Sync {
        /// Score file (JSON).
        #[arg(short, long)]
        score: PathBuf,

        /// Run every statement, then roll back.
        #[arg(long)]
        dry_run: bool,

        /// Write the report as JSON to this file.
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Show the statements a sync would run, without keeping them.
    Plan {
        /// Score file (JSON).
        #[arg(short, long)]
        score: PathBuf,
    },

    /// Print the full create script of a score.
    Ddl {
        /// Score file (JSON).
        #[arg(short, long)]
        score: PathBuf,
    },
}

fn load_score(path: &Path) -> anyhow::Result<Score> {
    let text = std::fs::read_to_string(path)?;
    Ok(Score::from_json(&text)?)
}

async fn open(url: &str) -> anyhow::Result<SqliteConnection> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    Ok(SqliteConnection::connect_with(&options).await?)
}

async fn run_sync(cli: &Cli, score: &Score, dry_run: bool) -> anyhow::Result<SyncReport> {
    if cli.dialect != DialectKind::Sqlite {
        anyhow::bail!("only sqlite databases can be synchronized, got {}", cli.dialect);
    }
    let mut conn = open(&cli.database).await?;
    let report = Synchronizer::new(score)
        .dry_run(dry_run)
        .run(&mut conn)
        .await?;
    conn.close().await?;

    for entry in report.warnings() {
        if let Outcome::Warning(message) = &entry.outcome {
            warn!(grain = %entry.grain, element = %entry.element, "{message}");
        }
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Sync {
            score,
            dry_run,
            report,
        } => {
            let score = load_score(score)?;
            if *dry_run {
                info!("Dry run mode - statements will be rolled back.");
            }
            let result = run_sync(&cli, &score, *dry_run).await?;
            info!(applied = result.applied, "Synchronization finished");

            if let Some(path) = report {
                std::fs::write(path, serde_json::to_string_pretty(&result)?)?;
                info!("Report written to {}", path.display());
            }
        }

        Commands::Plan { score } => {
            let score = load_score(score)?;
            let result = run_sync(&cli, &score, true).await?;
            if result.applied == 0 {
                info!("Database is up to date.");
            }
            for statement in result.statements() {
                println!("{statement};\n");
            }
        }

        Commands::Ddl { score } => {
            let score = load_score(score)?;
            let generator = cli.dialect.generator();
            for statement in create_script(&score, generator.as_ref()) {
                if statement.starts_with("--") {
                    println!("{statement}\n");
                } else {
                    println!("{statement};\n");
                }
            }
        }
    }

    Ok(())
}
