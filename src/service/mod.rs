// pgarchive/src/service/mod.rs
pub(crate) mod heroku;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use heroku::HerokuPgClient;

/// One transfer record known to the backup service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Snapshot {
    pub uuid: String,
    pub num: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub from_type: Option<String>,
    #[serde(default)]
    pub to_type: Option<String>,
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Snapshot {
    /// A snapshot may only be downloaded once the service reports it finished.
    pub fn is_complete(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    /// The `b001`-style label the service shows for this transfer.
    pub fn label(&self) -> String {
        format!("b{:03}", self.num)
    }
}

/// Parses the timestamp formats the service emits: RFC 3339 and
/// `2015-04-29 07:53:37 +0000`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z"))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// Orders snapshots oldest first by creation time. Records without a
/// parseable creation time sort before all others.
pub fn sort_by_creation(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| {
        a.created_time()
            .cmp(&b.created_time())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.num.cmp(&b.num))
    });
}

/// Client for the managed backup service.
#[async_trait]
pub trait BackupService: Send + Sync {
    /// Requests a new capture of `source` into the `dest` transfer target.
    async fn create_transfer(&self, source: &str, dest: &str, expire: bool) -> Result<Snapshot>;

    async fn get_transfer(&self, id: &str) -> Result<Snapshot>;

    async fn list_transfers(&self, app: &str) -> Result<Vec<Snapshot>>;

    async fn delete_transfer(&self, num: i64) -> Result<()>;

    /// Issues a short-lived public download URL for a finished transfer.
    async fn public_url(&self, num: i64) -> Result<String>;
}
