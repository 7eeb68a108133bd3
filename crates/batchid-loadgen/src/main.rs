#![doc = include_str!("../README.md")]

mod config;
mod driver;
mod telemetry;

use clap::Parser;
use config::{CliArgs, LoadConfig};
use telemetry::init_telemetry;

// Using mimalloc for better performance under contention: every session
// thread allocates records and key vectors on the hot path.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = LoadConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let report = driver::run(&config)?;

    tracing::info!(
        sessions = config.sessions,
        records = report.records,
        batches = report.batches,
        elapsed_ms = report.elapsed_ms(),
        records_per_sec = report.records_per_sec(),
        "every generated key matched its record"
    );
    Ok(())
}

fn log_startup_info(config: &LoadConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting load run with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting load run: {} sessions x {} records, batch size {}",
            config.sessions,
            config.records_per_session,
            config.batch.default_batch_size
        );
    }
}
