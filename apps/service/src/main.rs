mod broadcast;
mod config;
mod database;
mod error;
mod maintenance;
mod monitoring;
mod orchestrator;
mod pool;
mod timezone;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::pool::LibsqlManager;

#[derive(Parser)]
#[command(name = "pulse-service", version, about = "Heartbeat monitoring service")]
struct Args {
    /// Path to the config file (defaults to the XDG config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the database path from the config file
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let args = Args::parse();
    let mut config = Config::from_config(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(path) = args.database {
        config.database.path = path;
    }
    info!("{config}");

    let database = libsql::Builder::new_local(&config.database.path)
        .build()
        .await
        .with_context(|| format!("failed to open database at {}", config.database.path))?;
    let manager = LibsqlManager::new(database);
    let pool = deadpool::managed::Pool::builder(manager)
        .config(deadpool::managed::PoolConfig::default())
        .build()
        .context("failed to build connection pool")?;

    Orchestrator::start(config, pool).await
}
