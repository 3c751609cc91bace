// pgarchive/src/storage/mod.rs
pub(crate) mod s3_upload;
pub(crate) mod segment;
pub(crate) mod swift;

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::errors::ArchiveError;
pub use s3_upload::S3Store;
pub use segment::{SegmentSource, plan_segments};
pub use swift::SwiftStore;

/// One archival destination.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// Largest object the backend accepts, or `None` when the backend takes
    /// care of large objects itself.
    fn segment_limit(&self) -> Option<u64> {
        None
    }

    /// Read buffer used when splitting artifacts into segments.
    fn segment_buffer(&self) -> usize {
        1024 * 1024
    }

    /// Prefix the manifest at `key` points to.
    fn manifest_prefix(&self, key: &str) -> String {
        format!("{}/", key)
    }

    /// Uploads a whole file as one private object. Only called when
    /// `segment_limit` is `None`.
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let _ = path;
        anyhow::bail!("{} only accepts segmented uploads ({})", self.name(), key)
    }

    async fn put_segment(&self, name: &str, source: &SegmentSource) -> Result<()> {
        let _ = source;
        anyhow::bail!("{} does not support segmented uploads ({})", self.name(), name)
    }

    async fn put_manifest(&self, key: &str, prefix: &str) -> Result<()> {
        let _ = prefix;
        anyhow::bail!("{} does not support manifests ({})", self.name(), key)
    }
}

/// Outcome of uploading to a single backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutcome {
    pub backend: String,
    pub segments: Option<usize>,
    pub error: Option<String>,
}

impl BackendOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub key: String,
    pub outcomes: Vec<BackendOutcome>,
}

impl UploadReport {
    /// The first configured backend is the primary.
    pub fn primary_succeeded(&self) -> bool {
        self.outcomes.first().is_some_and(BackendOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BackendOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

/// Uploads an artifact to every configured backend in order. A failing
/// backend is logged and recorded; the others still run.
pub struct Uploader {
    backends: Vec<Box<dyn ObjectStore>>,
}

impl Uploader {
    pub fn new(backends: Vec<Box<dyn ObjectStore>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub async fn store(&self, key: &str, path: &Path) -> crate::errors::Result<UploadReport> {
        let mut report = UploadReport {
            key: key.to_string(),
            outcomes: Vec::with_capacity(self.backends.len()),
        };

        for backend in &self.backends {
            log::info!("⬆️ Begin upload of {} to {} as {}", path.display(), backend.name(), key);
            let result = match backend.segment_limit() {
                Some(limit) => store_segmented(backend.as_ref(), key, path, limit).await.map(Some),
                None => backend.put_file(key, path).await.map(|_| None),
            };
            match result {
                Ok(segments) => {
                    log::info!("✅ Uploaded {} to {}", key, backend.name());
                    report.outcomes.push(BackendOutcome {
                        backend: backend.name().to_string(),
                        segments,
                        error: None,
                    });
                }
                Err(e) => {
                    log::error!("❌ Problem uploading to {}: {:#}", backend.name(), e);
                    report.outcomes.push(BackendOutcome {
                        backend: backend.name().to_string(),
                        segments: None,
                        error: Some(format!("{:#}", e)),
                    });
                }
            }
        }

        if !report.outcomes.iter().any(BackendOutcome::succeeded) {
            return Err(ArchiveError::AllBackendsFailed(
                report
                    .outcomes
                    .into_iter()
                    .map(|o| format!("{}: {}", o.backend, o.error.unwrap_or_default()))
                    .collect(),
            ));
        }
        Ok(report)
    }
}

/// Writes `path` as ordered segments under `key/` followed by the manifest
/// at `key`. Returns the number of segments written.
async fn store_segmented(backend: &dyn ObjectStore, key: &str, path: &Path, limit: u64) -> Result<usize> {
    let total = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat artifact {}", path.display()))?
        .len();
    let buffer = backend.segment_buffer();
    let spans = plan_segments(total, limit, buffer);
    let count = spans.len();

    for span in spans {
        let name = span.object_name(key);
        log::info!("   segment {} ({} bytes) -> {}", span.suffix(), span.len, name);
        let source = SegmentSource::new(path, span, buffer);
        backend
            .put_segment(&name, &source)
            .await
            .with_context(|| format!("Failed to upload segment {}", name))?;
    }

    let prefix = backend.manifest_prefix(key);
    backend
        .put_manifest(key, &prefix)
        .await
        .with_context(|| format!("Failed to write manifest {}", key))?;
    Ok(count)
}
