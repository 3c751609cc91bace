//! Postgres backup archiver
//!
//! Captures (or reuses) a managed Postgres backup, downloads it, optionally
//! encrypts it and archives it to S3 and, when configured, Swift.

// pgarchive/src/main.rs
mod backup;
mod config;
mod errors;
mod logger;
mod service;
mod storage;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use config::ArchiveConfig;
use std::env;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // .env may carry RUST_LOG, so it is loaded before the logger reads it.
    let dotenv_loaded = dotenv::dotenv().is_ok();
    logger::init();
    if dotenv_loaded {
        log::info!("Loaded environment from .env");
    }
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let config = ArchiveConfig::from_env().context("Failed to load configuration from environment")?;

    let choice = env::args().nth(1).unwrap_or_else(|| "archive".to_string());
    match choice.trim() {
        "archive" => {
            println!("🚀 Starting backup archive...");
            let result = backup::run_backup_flow(&config)
                .await
                .context("Backup archive failed")?;
            println!(
                "Backup {} archived: {} ({} bytes, encrypted: {}, expired: {})",
                result.snapshot.label(),
                result.key,
                result.bytes_downloaded,
                result.encrypted,
                result.expired
            );
        }
        "expire" => {
            println!("🗑️ Enforcing retention of {} backups...", config.retention);
            let expired = backup::run_expire_flow(&config)
                .await
                .context("Retention enforcement failed")?;
            println!("Expired {} backup(s)", expired);
        }
        other => {
            println!("❌ Invalid operation '{}'. Use 'archive' or 'expire'.", other);
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}
