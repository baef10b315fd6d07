use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fundkeeper::{config::Config, db, AppContext};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fundkeeper", version, about = "Fund tracker maintenance tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations.
    Migrate {
        /// Apply at most this many migrations.
        #[arg(long)]
        steps: Option<u32>,
    },
    /// Delete stored images no attachment row references.
    Sweep {
        /// Report what would be deleted without deleting it.
        #[arg(long)]
        dry_run: bool,
        /// Keep running, sweeping every N seconds.
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.trim().eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Command::Migrate { steps } => {
            let conn = db::connect(&config.database).await.context("database connection failed")?;
            let applied = db::migrate(&conn, steps).await.context("migration failed")?;
            info!(applied, "Migrate finished");
        }
        Command::Sweep { dry_run, every } => {
            let ctx = AppContext::from_config(config).await.context("startup failed")?;
            let sweeper = ctx.sweeper();
            match every {
                Some(secs) if secs > 0 => {
                    info!(interval_secs = secs, dry_run, "Starting periodic orphan sweep");
                    tokio::select! {
                        _ = sweeper.run_periodic(Duration::from_secs(secs), dry_run) => {}
                        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping sweep"),
                    }
                }
                _ => {
                    let report = sweeper.sweep_all(dry_run).await.context("sweep failed")?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            ctx.shutdown().await;
        }
    }
    Ok(())
}
