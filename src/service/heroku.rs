// pgarchive/src/service/heroku.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use super::{BackupService, Snapshot};

const ACCEPT_V3: &str = "application/vnd.heroku+json; version=3";

/// Heroku Postgres backups API client.
pub struct HerokuPgClient {
    http: Client,
    base_url: String,
    platform_url: String,
    app: String,
    api_key: String,
}

#[derive(Deserialize)]
struct PublicUrl {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddonRef {
    pub name: String,
}

/// One add-on attached to the app, e.g. `DATABASE` -> `postgresql-shaped-1234`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddonAttachment {
    pub name: String,
    pub addon: AddonRef,
}

/// Maps a database selector to the add-on the backups API addresses.
///
/// Accepts a config var (`DATABASE_URL`), an attachment name (`DATABASE`) or
/// an add-on name. Returns `None` when nothing attached to the app matches.
pub fn resolve_addon(attachments: &[AddonAttachment], selector: &str) -> Option<String> {
    let wanted = selector.trim().to_ascii_uppercase();
    let attachment_name = wanted.strip_suffix("_URL").unwrap_or(wanted.as_str());

    attachments
        .iter()
        .find(|a| a.addon.name.eq_ignore_ascii_case(selector.trim()))
        .or_else(|| {
            attachments
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(attachment_name))
        })
        .map(|a| a.addon.name.clone())
}

impl HerokuPgClient {
    pub fn new(base_url: &str, platform_url: &str, app: &str, api_key: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pgarchive/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for the backups API")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            platform_url: platform_url.trim_end_matches('/').to_string(),
            app: app.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn app_route(&self, app: &str, rest: &str) -> String {
        format!("{}/client/v11/apps/{}/transfers{}", self.base_url, app, rest)
    }

    fn capture_route(&self, addon: &str) -> String {
        format!("{}/client/v11/databases/{}/backups", self.base_url, addon)
    }

    fn attachments_route(&self) -> String {
        format!("{}/apps/{}/addon-attachments", self.platform_url, self.app)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth("", Some(&self.api_key))
            .header("Accept", ACCEPT_V3)
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Backups API request failed: {}", what))?
            .error_for_status()
            .with_context(|| format!("Backups API rejected request: {}", what))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode backups API response: {}", what))
    }

    /// Looks the selector up among the app's add-on attachments.
    pub async fn resolve_database(&self, selector: &str) -> Result<String> {
        let attachments: Vec<AddonAttachment> = self
            .send(self.request(Method::GET, &self.attachments_route()), "list add-on attachments")
            .await?;
        match resolve_addon(&attachments, selector) {
            Some(addon) => {
                log::info!("Resolved {} to add-on {}", selector, addon);
                Ok(addon)
            }
            None => {
                log::warn!("⚠️ {} matches no attachment on {}, using it as the add-on name", selector, self.app);
                Ok(selector.to_string())
            }
        }
    }
}

#[async_trait]
impl BackupService for HerokuPgClient {
    async fn create_transfer(&self, source: &str, dest: &str, expire: bool) -> Result<Snapshot> {
        let addon = self.resolve_database(source).await?;
        let body = json!({ "to_name": dest, "expire": expire });
        self.send(self.request(Method::POST, &self.capture_route(&addon)).json(&body), "capture")
            .await
    }

    async fn get_transfer(&self, id: &str) -> Result<Snapshot> {
        let url = self.app_route(&self.app, &format!("/{}", id));
        self.send(self.request(Method::GET, &url), "get transfer").await
    }

    async fn list_transfers(&self, app: &str) -> Result<Vec<Snapshot>> {
        let url = self.app_route(app, "");
        self.send(self.request(Method::GET, &url), "list transfers").await
    }

    async fn delete_transfer(&self, num: i64) -> Result<()> {
        let url = self.app_route(&self.app, &format!("/{}", num));
        self.request(Method::DELETE, &url)
            .send()
            .await
            .context("Backups API request failed: delete transfer")?
            .error_for_status()
            .with_context(|| format!("Backups API refused to delete transfer {}", num))?;
        Ok(())
    }

    async fn public_url(&self, num: i64) -> Result<String> {
        let url = self.app_route(&self.app, &format!("/{}/actions/public-url", num));
        let public: PublicUrl = self
            .send(self.request(Method::POST, &url), "public url")
            .await?;
        Ok(public.url)
    }
}
