// pgarchive/src/backup/mod.rs
mod logic;
pub(crate) mod artifact;
pub(crate) mod encrypt;
pub(crate) mod fetch;
pub(crate) mod retention;

use anyhow::{Context, Result};

use crate::config::ArchiveConfig;
use crate::service::HerokuPgClient;
use crate::storage::{ObjectStore, S3Store, SwiftStore, Uploader};
use encrypt::{Encryptor, GpgEncryptor};
use fetch::HttpFetcher;
pub use logic::{Orchestrator, RunResult};

/// Wires the production collaborators for `config`.
pub async fn build_orchestrator(config: &ArchiveConfig) -> Result<Orchestrator> {
    log::info!(
        "Archiving {} of {} (encryption: {}, secondary backend: {})",
        config.database,
        config.app,
        config.encryption_enabled(),
        config.secondary_backend_enabled()
    );
    let service = HerokuPgClient::new(&config.api_url, &config.platform_api_url, &config.app, &config.api_key)?;
    let fetcher = HttpFetcher::new()?;

    let encryptor: Option<Box<dyn Encryptor>> = match &config.encryption {
        Some(encryption) => Some(Box::new(GpgEncryptor::new(encryption)?)),
        None => {
            log::info!("No recipient key configured, backups will be archived unencrypted");
            None
        }
    };

    let mut backends: Vec<Box<dyn ObjectStore>> = vec![Box::new(S3Store::connect(&config.primary).await)];
    if let Some(swift) = &config.secondary {
        backends.push(Box::new(
            SwiftStore::new(swift).context("Failed to set up secondary Swift backend")?,
        ));
    }

    Ok(Orchestrator::new(
        config.clone(),
        Box::new(service),
        Box::new(fetcher),
        encryptor,
        Uploader::new(backends),
    ))
}

/// Public entry point for the archive process.
pub async fn run_backup_flow(config: &ArchiveConfig) -> Result<RunResult> {
    let orchestrator = build_orchestrator(config).await?;
    let result = orchestrator.run().await?;
    for outcome in &result.upload.outcomes {
        match (&outcome.error, outcome.segments) {
            (Some(error), _) => log::warn!("⚠️ {} did not receive {}: {}", outcome.backend, result.upload.key, error),
            (None, Some(segments)) => log::info!("{} holds {} as {} segments", outcome.backend, result.upload.key, segments),
            (None, None) => log::info!("{} holds {}", outcome.backend, result.upload.key),
        }
    }
    Ok(result)
}

/// Expires at most one old backup without capturing a new one.
pub async fn run_expire_flow(config: &ArchiveConfig) -> Result<usize> {
    let orchestrator = build_orchestrator(config).await?;
    Ok(orchestrator.expire().await?)
}
