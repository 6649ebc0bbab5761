//! StyleTrack command line entry point.
//!
//! `run` streams one JSON progress frame per line on stdout while the
//! pipeline works; everything else on stdout is human-readable. Diagnostics
//! go to stderr via tracing.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use styletrack::application::{PipelineOrchestrator, RunOutcome};
use styletrack::infrastructure::{
    AnalyticsReader, AppConfig, DatabaseConnection, ProductRepository, init_logging,
};

#[derive(Parser)]
#[command(name = "styletrack")]
#[command(about = "Fashion retail price & color trend tracker")]
#[command(version)]
struct Cli {
    /// Configuration file (created with defaults on first use)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured category and store the observations
    Run {
        /// Free-text note stored on the session row
        #[arg(long)]
        notes: Option<String>,
    },
    /// Create the database file and schema without scraping
    InitDb,
    /// List recent scraping sessions
    Sessions {
        /// How many sessions to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Print whole-store summary counters
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(cli.config.as_deref()).await?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    init_logging(&config.logging)?;

    let connection = DatabaseConnection::new(&config.database.path).await?;
    connection.migrate().await?;
    let pool = connection.pool().clone();
    let repository = ProductRepository::new(Arc::new(pool.clone()));

    match cli.command {
        Commands::Run { notes } => {
            let orchestrator = PipelineOrchestrator::new(config, repository);
            let mut run = orchestrator.try_start(notes)?;
            while let Some(event) = run.next_event().await {
                println!("{}", serde_json::to_string(&event.to_frame())?);
            }
            let summary = run.join().await?;
            match summary.outcome {
                RunOutcome::Completed => Ok(ExitCode::SUCCESS),
                RunOutcome::Failed { .. } => Ok(ExitCode::FAILURE),
            }
        }
        Commands::InitDb => {
            info!(path = %config.database.path.display(), "database ready");
            println!("Database ready at {}", config.database.path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sessions { limit } => {
            let sessions = repository.recent_sessions(limit).await?;
            if sessions.is_empty() {
                println!("No scraping sessions yet.");
            }
            for session in sessions {
                let completed = session
                    .completed_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "running".to_string());
                println!(
                    "#{:<4} started {}  finished {:<19}  {:>5} products  {}",
                    session.id,
                    session.started_at.format("%Y-%m-%d %H:%M:%S"),
                    completed,
                    session.total_products,
                    session.notes.unwrap_or_default()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats => {
            let reader = AnalyticsReader::new(pool);
            let stats = reader.stats().await?;
            println!("Products tracked : {}", stats.total_products);
            println!("Currently active : {}", stats.active_products);
            for (site, count) in &stats.active_by_site {
                println!("  {site}: {count}");
            }
            println!("Sessions run     : {}", stats.sessions);
            println!("Price points     : {}", stats.price_observations);
            println!("Color points     : {}", stats.color_observations);
            if let Some(last) = stats.last_session_at {
                println!("Last session     : {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
