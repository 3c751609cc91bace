// pgarchive/src/testing.rs
//! In-memory collaborators for unit tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tokio::io::AsyncReadExt;

use crate::backup::encrypt::{Encrypted, Encryptor, encrypted_path};
use crate::backup::fetch::Fetcher;
use crate::config::{ArchiveConfig, PollPolicy, S3Config};
use crate::errors::ArchiveError;
use crate::service::{BackupService, Snapshot};
use crate::storage::{ObjectStore, SegmentSource};

pub fn snapshot(num: i64, created_at: Option<&str>) -> Snapshot {
    Snapshot {
        uuid: format!("uuid-{}", num),
        num,
        created_at: created_at.map(str::to_string),
        finished_at: None,
        from_type: None,
        to_type: None,
        public_url: None,
    }
}

/// RFC 3339 timestamp `hours` after 2024-01-01T00:00:00Z.
pub fn hours_after_epoch(hours: i64) -> String {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (base + Duration::hours(hours)).to_rfc3339()
}

pub fn test_config(work_dir: &Path) -> ArchiveConfig {
    ArchiveConfig {
        app: "acme-prod".into(),
        database: "DATABASE_URL".into(),
        api_url: "http://127.0.0.1:1".into(),
        platform_api_url: "http://127.0.0.1:1".into(),
        api_key: "token".into(),
        use_latest_backup: false,
        retention: 30,
        namespace: "pgbackups".into(),
        environment: None,
        work_dir: work_dir.to_path_buf(),
        poll: PollPolicy::default(),
        encryption: None,
        primary: S3Config {
            bucket_name: "acme-backups".into(),
            region: "us-east-1".into(),
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            endpoint_url: None,
        },
        secondary: None,
    }
}

#[derive(Default)]
struct ServiceState {
    transfers: Vec<Snapshot>,
    deleted: Vec<i64>,
    created: Vec<String>,
    polls: u32,
    capture: Option<Snapshot>,
}

/// Backup service whose captures finish after a set number of polls.
#[derive(Clone, Default)]
pub struct FakeBackupService {
    state: Arc<Mutex<ServiceState>>,
    finish_after: u32,
    fail_listing: bool,
    fail_deletes: bool,
}

impl FakeBackupService {
    pub fn new(transfers: Vec<Snapshot>) -> Self {
        let service = Self::default();
        service.state.lock().unwrap().transfers = transfers;
        service
    }

    pub fn finishing_after(mut self, polls: u32) -> Self {
        self.finish_after = polls;
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn refusing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn polls(&self) -> u32 {
        self.state.lock().unwrap().polls
    }
}

#[async_trait]
impl BackupService for FakeBackupService {
    async fn create_transfer(&self, source: &str, _dest: &str, _expire: bool) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        state.created.push(source.to_string());
        let mut capture = snapshot(1000, Some(Utc::now().to_rfc3339().as_str()));
        capture.from_type = Some("pg_dump".into());
        capture.to_type = Some("gof3r".into());
        state.capture = Some(capture.clone());
        Ok(capture)
    }

    async fn get_transfer(&self, id: &str) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        let polls = state.polls;
        let mut found = state
            .capture
            .iter()
            .chain(state.transfers.iter())
            .find(|s| s.uuid == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no transfer {}", id))?;
        if polls >= self.finish_after {
            found.finished_at = Some("2024-03-01 10:15:30 +0000".into());
        }
        Ok(found)
    }

    async fn list_transfers(&self, _app: &str) -> Result<Vec<Snapshot>> {
        if self.fail_listing {
            anyhow::bail!("503 Service Unavailable");
        }
        Ok(self.state.lock().unwrap().transfers.clone())
    }

    async fn delete_transfer(&self, num: i64) -> Result<()> {
        if self.fail_deletes {
            anyhow::bail!("403 Forbidden: transfer {} is locked", num);
        }
        let mut state = self.state.lock().unwrap();
        state.transfers.retain(|s| s.num != num);
        state.deleted.push(num);
        Ok(())
    }

    async fn public_url(&self, num: i64) -> Result<String> {
        Ok(format!("https://transfers.example:8443/{}", num))
    }
}

/// "Downloads" a fixed payload and records the requested URLs.
#[derive(Clone)]
pub struct FileFetcher {
    payload: Arc<Vec<u8>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl FileFetcher {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload: Arc::new(payload),
            urls: Arc::default(),
        }
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, source_url: &str, dest: &Path) -> crate::errors::Result<u64> {
        self.urls.lock().unwrap().push(source_url.to_string());
        tokio::fs::write(dest, self.payload.as_slice()).await?;
        Ok(self.payload.len() as u64)
    }
}

#[derive(Clone, Copy)]
enum EncryptorMode {
    Working,
    Broken,
    Lenient,
}

/// Writes `ENC:` + plaintext to the `.pgp` sibling, fails, or falls back to
/// the plaintext the way gpg does with the unencrypted fallback enabled.
pub struct FakeEncryptor {
    mode: EncryptorMode,
}

impl FakeEncryptor {
    pub fn working() -> Self {
        Self { mode: EncryptorMode::Working }
    }

    pub fn broken() -> Self {
        Self { mode: EncryptorMode::Broken }
    }

    pub fn lenient() -> Self {
        Self { mode: EncryptorMode::Lenient }
    }
}

#[async_trait]
impl Encryptor for FakeEncryptor {
    async fn encrypt(&self, plain_path: &Path) -> crate::errors::Result<Encrypted> {
        match self.mode {
            EncryptorMode::Working => {}
            EncryptorMode::Broken => {
                return Err(ArchiveError::EncryptionFailed {
                    status: "exit status 2".into(),
                    stderr: "no public key".into(),
                });
            }
            EncryptorMode::Lenient => return Ok(Encrypted::Plaintext),
        }
        let mut data = b"ENC:".to_vec();
        data.extend(tokio::fs::read(plain_path).await?);
        let out: PathBuf = encrypted_path(plain_path);
        tokio::fs::write(&out, data).await?;
        Ok(Encrypted::Ciphertext(out))
    }
}

#[derive(Default)]
struct StoreState {
    objects: BTreeMap<String, Vec<u8>>,
    manifests: BTreeMap<String, String>,
}

/// Object store held in memory, optionally size limited or always failing.
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    limit: Option<(u64, usize)>,
    fail: bool,
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn unbounded(name: &str) -> Self {
        Self {
            name: name.to_string(),
            limit: None,
            fail: false,
            state: Arc::default(),
        }
    }

    pub fn size_limited(name: &str, limit: u64, buffer: usize) -> Self {
        Self {
            limit: Some((limit, buffer)),
            ..Self::unbounded(name)
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(name).cloned()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn manifest(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().manifests.get(key).cloned()
    }

    /// Concatenates the segments a manifest at `key` points to, in name order.
    pub fn reassemble(&self, key: &str) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{}/", key);
        state
            .objects
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            anyhow::bail!("{} is unavailable", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn segment_limit(&self) -> Option<u64> {
        self.limit.map(|(limit, _)| limit)
    }

    fn segment_buffer(&self) -> usize {
        self.limit.map(|(_, buffer)| buffer).unwrap_or(1024 * 1024)
    }

    fn manifest_prefix(&self, key: &str) -> String {
        format!("{}/{}/", self.name, key)
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        self.check()?;
        let data = tokio::fs::read(path).await?;
        self.state.lock().unwrap().objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn put_segment(&self, name: &str, source: &SegmentSource) -> Result<()> {
        self.check()?;
        let limit = self.segment_limit().unwrap_or(u64::MAX);
        let mut data = Vec::new();
        source.open().await?.read_to_end(&mut data).await?;
        anyhow::ensure!(data.len() as u64 <= limit, "segment {} exceeds {} bytes", name, limit);
        self.state.lock().unwrap().objects.insert(name.to_string(), data);
        Ok(())
    }

    async fn put_manifest(&self, key: &str, prefix: &str) -> Result<()> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .manifests
            .insert(key.to_string(), prefix.to_string());
        Ok(())
    }
}
