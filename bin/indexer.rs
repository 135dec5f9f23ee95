//! # Indexer Service
//!
//! Long-running service that polls the chain, reconciles pool reserves and
//! persists snapshots for downstream consumers.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin indexer
//! cargo run --bin indexer -- --once        # single cycle, then exit
//! cargo run --bin indexer -- --config /etc/amm/Config.toml
//! ```
//!
//! Press Ctrl+C to stop gracefully; an in-flight cycle is allowed to finish
//! so the cursor is never advanced past partially-processed work.

use amm_indexer::{Scheduler, Settings};
use anyhow::Result;
use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(name = "indexer", about = "Constant-product AMM indexer service")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "Config.toml")]
    config: String,

    /// Run a single cycle and exit (debugging / cron-style operation)
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    env_logger::init();

    let args = Args::parse();

    println!("🚀 Starting AMM Indexer");
    println!("═══════════════════════════════════════════════════════════════════\n");

    let settings = Settings::from_file(&args.config)?;
    // Missing endpoint or store credentials refuse to start; running without
    // them produces no useful output.
    settings.validate()?;

    let mut scheduler = Scheduler::new(settings).await?;

    if args.once {
        scheduler.run_once().await?;
        info!("Single cycle complete, exiting");
        return Ok(());
    }

    scheduler.run().await
}
