// pgarchive/src/backup/logic.rs
use chrono::{DateTime, Utc};

use super::artifact::{StorageKey, TransientArtifact};
use super::encrypt::{Encrypted, Encryptor};
use super::fetch::Fetcher;
use super::retention::{self, TransferKind};
use crate::config::{ArchiveConfig, PollPolicy};
use crate::errors::{ArchiveError, Result};
use crate::service::{BackupService, Snapshot, parse_timestamp, sort_by_creation};
use crate::storage::{UploadReport, Uploader};

/// Age past which the latest backup is reported stale.
pub const STALE_AFTER_HOURS: i64 = 24;

/// Transfer name used for on-demand captures.
const CAPTURE_TARGET: &str = "BACKUP";

/// Result of the latest-backup age check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeCheck {
    Aged { hours: i64, stale: bool },
    Skipped,
}

pub fn age_check(created_at: Option<&str>, now: DateTime<Utc>) -> AgeCheck {
    match created_at.and_then(parse_timestamp) {
        Some(created) => {
            let hours = (now - created).num_hours();
            AgeCheck::Aged {
                hours,
                stale: hours > STALE_AFTER_HOURS,
            }
        }
        None => AgeCheck::Skipped,
    }
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub snapshot: Snapshot,
    pub key: StorageKey,
    pub bytes_downloaded: u64,
    pub encrypted: bool,
    pub expired: usize,
    pub upload: UploadReport,
}

/// Drives one archival run: select or capture, download, encrypt, archive,
/// clean up.
pub struct Orchestrator {
    config: ArchiveConfig,
    service: Box<dyn BackupService>,
    fetcher: Box<dyn Fetcher>,
    encryptor: Option<Box<dyn Encryptor>>,
    uploader: Uploader,
    poll: PollPolicy,
    kind: TransferKind,
}

impl Orchestrator {
    pub fn new(
        config: ArchiveConfig,
        service: Box<dyn BackupService>,
        fetcher: Box<dyn Fetcher>,
        encryptor: Option<Box<dyn Encryptor>>,
        uploader: Uploader,
    ) -> Self {
        let poll = config.poll;
        Self {
            config,
            service,
            fetcher,
            encryptor,
            uploader,
            poll,
            kind: TransferKind::default(),
        }
    }

    #[cfg(test)]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Runs the retention step on its own.
    pub async fn expire(&self) -> Result<usize> {
        retention::enforce(self.service.as_ref(), &self.config.app, self.config.retention, &self.kind).await
    }

    pub async fn run(&self) -> Result<RunResult> {
        let mut last_known: Option<Snapshot> = None;
        match self.run_inner(&mut last_known).await {
            Ok(result) => Ok(result),
            Err(e) => {
                let snapshot = format!("{:?}", last_known);
                eprintln!("PGBackup: {}", snapshot);
                Err(ArchiveError::Orchestration {
                    snapshot,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn run_inner(&self, last_known: &mut Option<Snapshot>) -> Result<RunResult> {
        let mut expired = 0;
        let snapshot = if self.config.use_latest_backup {
            self.use_latest_backup(last_known).await?
        } else {
            // Bespoke backup for this shipment; make room first.
            expired = self.expire().await?;
            self.capture(last_known).await?
        };

        let artifact = TransientArtifact::create_in(&self.config.work_dir)?;
        let outcome = self.ship(&snapshot, &artifact).await;
        let cleaned = artifact.cleanup();
        let (key, bytes_downloaded, encrypted, upload) = outcome?;
        cleaned?;

        log::info!("🎉 Backup archived as {}", key);
        Ok(RunResult {
            snapshot,
            key,
            bytes_downloaded,
            encrypted,
            expired,
            upload,
        })
    }

    async fn use_latest_backup(&self, last_known: &mut Option<Snapshot>) -> Result<Snapshot> {
        let mut transfers = self
            .service
            .list_transfers(&self.config.app)
            .await
            .map_err(ArchiveError::Service)?;
        sort_by_creation(&mut transfers);
        let latest = transfers.pop().ok_or(ArchiveError::NoSnapshotAvailable)?;
        *last_known = Some(latest.clone());

        println!("Latest backup: [{:?}]", latest);
        report_age(age_check(latest.created_at.as_deref(), Utc::now()));

        if latest.is_complete() {
            Ok(latest)
        } else {
            log::info!("Latest backup {} is still running, waiting for it", latest.label());
            self.wait_for_completion(latest, last_known).await
        }
    }

    async fn capture(&self, last_known: &mut Option<Snapshot>) -> Result<Snapshot> {
        log::info!("📸 Capturing backup of {}", self.config.database);
        let backup = self
            .service
            .create_transfer(&self.config.database, CAPTURE_TARGET, true)
            .await
            .map_err(ArchiveError::Service)?;
        *last_known = Some(backup.clone());
        self.wait_for_completion(backup, last_known).await
    }

    /// Re-fetches the transfer until the service reports it finished.
    async fn wait_for_completion(&self, mut backup: Snapshot, last_known: &mut Option<Snapshot>) -> Result<Snapshot> {
        let mut attempts = 0;
        while !backup.is_complete() {
            if let Some(max) = self.poll.max_attempts {
                if attempts >= max {
                    return Err(ArchiveError::CaptureTimedOut { id: backup.uuid, attempts });
                }
            }
            tokio::time::sleep(self.poll.interval).await;
            attempts += 1;
            backup = self
                .service
                .get_transfer(&backup.uuid)
                .await
                .map_err(ArchiveError::Service)?;
            *last_known = Some(backup.clone());
            log::debug!("poll {} for {}: finished_at={:?}", attempts, backup.label(), backup.finished_at);
        }
        log::info!("✅ Backup {} finished at {}", backup.label(), backup.finished_at.as_deref().unwrap_or_default());
        Ok(backup)
    }

    /// Download, optional encryption and upload. The caller owns cleanup.
    async fn ship(
        &self,
        snapshot: &Snapshot,
        artifact: &TransientArtifact,
    ) -> Result<(StorageKey, u64, bool, UploadReport)> {
        let finished_at = snapshot
            .finished_at
            .as_deref()
            .ok_or(ArchiveError::NoSnapshotAvailable)?;

        let url = match &snapshot.public_url {
            Some(url) => url.clone(),
            None => self
                .service
                .public_url(snapshot.num)
                .await
                .map_err(ArchiveError::Service)?,
        };
        log::info!("⬇️ Downloading {} into {}", snapshot.label(), artifact.dir().display());
        let bytes = self.fetcher.fetch(&url, artifact.plain_path()).await?;

        let (upload_path, encrypted) = match &self.encryptor {
            Some(encryptor) => match encryptor.encrypt(artifact.plain_path()).await? {
                Encrypted::Ciphertext(path) => {
                    debug_assert_eq!(path, artifact.encrypted_path());
                    (path, true)
                }
                Encrypted::Plaintext => (artifact.plain_path().to_path_buf(), false),
            },
            None => (artifact.plain_path().to_path_buf(), false),
        };

        let key = StorageKey::derive(
            &self.config.namespace,
            self.config.environment.as_deref(),
            finished_at,
            encrypted,
        );
        log::info!("Archive backup to {:?} [{}]", self.uploader.backend_names(), key);
        let upload = self.uploader.store(key.as_str(), &upload_path).await?;
        if !upload.primary_succeeded() {
            log::warn!(
                "⚠️ Primary backend failed; backup stored on {} of {} backends",
                upload.outcomes.len() - upload.failures().count(),
                upload.outcomes.len()
            );
        }
        Ok((key, bytes, encrypted, upload))
    }
}

fn report_age(check: AgeCheck) {
    match check {
        AgeCheck::Aged { hours, stale } => {
            println!("backup created {} hours ago", hours);
            println!("LATEST_BACKUP_MORE_THAN_24HR_OLD {}", stale);
        }
        AgeCheck::Skipped => {
            println!("CREATED_AT timestamp not available. Skipping backup age check.");
        }
    }
}
