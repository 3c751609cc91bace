// pgarchive/src/backup/fetch.rs
use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use url::Url;

use crate::errors::{ArchiveError, Result};

/// Size of the write buffer between the response body and the file.
pub const FETCH_BUFFER_SIZE: usize = 1024 * 1024;

/// Copies a remote artifact to local disk.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the number of bytes written to `dest`.
    async fn fetch(&self, source_url: &str, dest: &Path) -> Result<u64>;
}

/// Validates a download URL. Explicit non-default ports are kept as given;
/// default ports are dropped so signed URLs match what the signer saw.
pub fn parse_source_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| ArchiveError::fetch(format!("invalid URL {}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ArchiveError::fetch(format!("unsupported URL scheme '{}'", other))),
    }
}

/// Streams an HTTP(S) response body to disk without holding it in memory.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ArchiveError::fetch(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source_url: &str, dest: &Path) -> Result<u64> {
        let url = parse_source_url(source_url)?;
        log::info!(
            "⬇️ Download backup from {}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or_default()
        );

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ArchiveError::fetch)?
            .error_for_status()
            .map_err(ArchiveError::fetch)?;

        let file = File::create(dest)
            .await
            .map_err(|e| ArchiveError::fetch(format!("failed to create {}: {}", dest.display(), e)))?;
        let mut output = BufWriter::with_capacity(FETCH_BUFFER_SIZE, file);

        let mut total_bytes_downloaded: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(ArchiveError::fetch)? {
            output
                .write_all(&chunk)
                .await
                .map_err(|e| ArchiveError::fetch(format!("failed to write {}: {}", dest.display(), e)))?;
            total_bytes_downloaded += chunk.len() as u64;
        }
        output
            .flush()
            .await
            .map_err(|e| ArchiveError::fetch(format!("failed to flush {}: {}", dest.display(), e)))?;

        log::info!("✅ Downloaded {} bytes to {}", total_bytes_downloaded, dest.display());
        Ok(total_bytes_downloaded)
    }
}
