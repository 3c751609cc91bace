// pgarchive/src/storage/swift.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Body, Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use super::{ObjectStore, SegmentSource};
use crate::config::SwiftConfig;

/// Authenticated endpoint for the object-storage service.
#[derive(Debug, Clone)]
struct Session {
    token: String,
    storage_url: String,
}

/// Secondary backend: a Swift container (Rackspace Cloud Files) with a hard
/// per-object ceiling. Large artifacts go up as segments plus a dynamic
/// large object manifest.
pub struct SwiftStore {
    http: Client,
    config: SwiftConfig,
    session: OnceCell<Session>,
}

impl SwiftStore {
    pub fn new(config: &SwiftConfig) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build HTTP client for Swift")?;
        Ok(Self {
            http,
            config: config.clone(),
            session: OnceCell::new(),
        })
    }

    async fn session(&self) -> Result<&Session> {
        self.session.get_or_try_init(|| self.authenticate()).await
    }

    async fn authenticate(&self) -> Result<Session> {
        let body = json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": self.config.username,
                    "apiKey": self.config.api_key,
                }
            }
        });
        let response: Value = self
            .http
            .post(&self.config.auth_url)
            .json(&body)
            .send()
            .await
            .context("Swift authentication request failed")?
            .error_for_status()
            .context("Swift authentication was rejected")?
            .json()
            .await
            .context("Failed to decode Swift authentication response")?;

        let session = parse_session(&response, &self.config.region)?;
        self.ensure_container(&session).await?;
        Ok(session)
    }

    async fn ensure_container(&self, session: &Session) -> Result<()> {
        log::info!("Open Swift container: {}", self.config.container);
        let status = self
            .http
            .head(format!("{}/{}", session.storage_url, self.config.container))
            .header("X-Auth-Token", &session.token)
            .send()
            .await
            .context("Failed to query Swift container")?
            .status();
        if status == StatusCode::NOT_FOUND {
            anyhow::bail!("Swift container {} does not exist", self.config.container);
        }
        if !status.is_success() {
            anyhow::bail!("Swift container {} is not accessible ({})", self.config.container, status);
        }
        Ok(())
    }

    fn object_url(&self, session: &Session, name: &str) -> String {
        format!("{}/{}/{}", session.storage_url, self.config.container, name)
    }

    async fn put(&self, name: &str, body: Body, manifest: Option<&str>) -> Result<()> {
        let session = self.session().await?;
        let mut request = self
            .http
            .put(self.object_url(session, name))
            .header("X-Auth-Token", &session.token)
            .body(body);
        if let Some(prefix) = manifest {
            request = request.header("X-Object-Manifest", prefix);
        }
        request
            .send()
            .await
            .with_context(|| format!("Swift PUT {} failed", name))?
            .error_for_status()
            .with_context(|| format!("Swift rejected PUT {}", name))?;
        Ok(())
    }
}

/// Pulls the token and the object-store endpoint for `region` out of an
/// identity v2.0 response.
fn parse_session(response: &Value, region: &str) -> Result<Session> {
    let access = &response["access"];
    let token = access["token"]["id"]
        .as_str()
        .context("Swift authentication response has no token")?
        .to_string();
    let endpoints = access["serviceCatalog"]
        .as_array()
        .context("Swift authentication response has no service catalog")?
        .iter()
        .find(|service| service["type"] == "object-store")
        .and_then(|service| service["endpoints"].as_array())
        .context("No object-store service in catalog")?;
    let storage_url = endpoints
        .iter()
        .find(|e| {
            e["region"]
                .as_str()
                .is_some_and(|r| r.eq_ignore_ascii_case(region))
        })
        .and_then(|e| e["publicURL"].as_str())
        .with_context(|| format!("No object-store endpoint for region {}", region))?
        .trim_end_matches('/')
        .to_string();
    Ok(Session { token, storage_url })
}

#[async_trait]
impl ObjectStore for SwiftStore {
    fn name(&self) -> &str {
        &self.config.container
    }

    fn segment_limit(&self) -> Option<u64> {
        Some(self.config.segment_limit)
    }

    fn segment_buffer(&self) -> usize {
        self.config.buffer_size
    }

    fn manifest_prefix(&self, key: &str) -> String {
        format!("{}/{}/", self.config.container, key)
    }

    async fn put_segment(&self, name: &str, source: &SegmentSource) -> Result<()> {
        let stream = source
            .stream()
            .await
            .with_context(|| format!("Failed to open segment source {}", source.path.display()))?;
        self.put(name, Body::wrap_stream(stream), None).await
    }

    async fn put_manifest(&self, key: &str, prefix: &str) -> Result<()> {
        self.put(key, Body::from(Vec::new()), Some(prefix)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_picks_region() -> anyhow::Result<()> {
        let response = json!({
            "access": {
                "token": { "id": "tok-123" },
                "serviceCatalog": [
                    { "type": "compute", "endpoints": [] },
                    {
                        "type": "object-store",
                        "name": "cloudFiles",
                        "endpoints": [
                            { "region": "DFW", "publicURL": "https://storage101.dfw1.example/v1/MossoCloudFS_1" },
                            { "region": "ORD", "publicURL": "https://storage101.ord1.example/v1/MossoCloudFS_1/" }
                        ]
                    }
                ]
            }
        });
        let session = parse_session(&response, "ord")?;
        assert_eq!(session.token, "tok-123");
        assert_eq!(session.storage_url, "https://storage101.ord1.example/v1/MossoCloudFS_1");

        assert!(parse_session(&response, "syd").is_err());
        Ok(())
    }

    #[test]
    fn test_manifest_prefix_includes_container() -> anyhow::Result<()> {
        let store = SwiftStore::new(&SwiftConfig {
            username: "ops".into(),
            api_key: "key".into(),
            container: "db-archive".into(),
            region: "ord".into(),
            auth_url: "http://127.0.0.1:1/v2.0/tokens".into(),
            segment_limit: 4096,
            buffer_size: 1024,
        })?;
        assert_eq!(store.manifest_prefix("pgbackups/a.dump"), "db-archive/pgbackups/a.dump/");
        assert_eq!(store.segment_limit(), Some(4096));
        Ok(())
    }
}
