// pgarchive/src/config/mod.rs
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ArchiveError, Result};

pub const DEFAULT_NAMESPACE: &str = "pgbackups";
pub const DEFAULT_DATABASE: &str = "DATABASE_URL";
pub const DEFAULT_API_URL: &str = "https://postgres-api.heroku.com";
pub const DEFAULT_PLATFORM_API_URL: &str = "https://api.heroku.com";
pub const DEFAULT_RETENTION: usize = 30;
pub const DEFAULT_SWIFT_REGION: &str = "ord";
pub const DEFAULT_SWIFT_AUTH_URL: &str = "https://identity.api.rackspacecloud.com/v2.0/tokens";
/// Cloud Files rejects objects of 5 GiB and above.
pub const DEFAULT_SEGMENT_LIMIT: u64 = 5 * 1024 * 1024 * 1024 - 1;
pub const DEFAULT_SEGMENT_BUFFER: usize = 1024 * 1024;

/// Connection settings for the primary, S3-compatible backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
}

/// Connection settings for the secondary, Swift (Rackspace Cloud Files) backend.
#[derive(Debug, Clone)]
pub struct SwiftConfig {
    pub username: String,
    pub api_key: String,
    pub container: String,
    pub region: String,
    pub auth_url: String,
    pub segment_limit: u64,
    pub buffer_size: usize,
}

/// Recipient of the encrypted artifact.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub key_email: String,
    pub public_key: String,
    pub allow_unencrypted_fallback: bool,
}

/// How the capture poll waits for a snapshot to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub app: String,
    pub database: String,
    pub api_url: String,
    /// Platform API used to resolve the database selector to its add-on.
    pub platform_api_url: String,
    pub api_key: String,
    pub use_latest_backup: bool,
    pub retention: usize,
    pub namespace: String,
    pub environment: Option<String>,
    pub work_dir: PathBuf,
    pub poll: PollPolicy,
    pub encryption: Option<EncryptionConfig>,
    pub primary: S3Config,
    pub secondary: Option<SwiftConfig>,
}

impl ArchiveConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any name -> value lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |name: &str| {
            get(name).ok_or_else(|| ArchiveError::Config(format!("{} must be set", name)))
        };

        let retention = parse_number(get("PGBACKUPS_KEEP"), "PGBACKUPS_KEEP", DEFAULT_RETENTION)?;
        if retention == 0 {
            return Err(ArchiveError::Config("PGBACKUPS_KEEP must be at least 1".into()));
        }

        let poll = PollPolicy {
            interval: Duration::from_secs(parse_number(
                get("CAPTURE_POLL_INTERVAL_SECS"),
                "CAPTURE_POLL_INTERVAL_SECS",
                1,
            )?),
            max_attempts: match get("CAPTURE_MAX_POLLS") {
                Some(raw) => Some(parse_number(Some(raw), "CAPTURE_MAX_POLLS", 0)?),
                None => None,
            },
        };

        let encryption = match (get("KEY_EMAIL"), get("PGP_PUBLIC_KEY")) {
            (Some(key_email), Some(public_key)) => Some(EncryptionConfig {
                key_email,
                public_key,
                allow_unencrypted_fallback: parse_bool(
                    get("ALLOW_UNENCRYPTED_FALLBACK"),
                    "ALLOW_UNENCRYPTED_FALLBACK",
                )?,
            }),
            (None, None) => None,
            _ => {
                log::warn!("⚠️ Only one of KEY_EMAIL / PGP_PUBLIC_KEY is set. Backups will NOT be encrypted.");
                None
            }
        };

        let primary = S3Config {
            bucket_name: require("PGBACKUPS_BUCKET")?,
            region: require("PGBACKUPS_REGION")?,
            access_key_id: require("PGBACKUPS_AWS_ACCESS_KEY_ID")?,
            secret_access_key: require("PGBACKUPS_AWS_SECRET_ACCESS_KEY")?,
            endpoint_url: get("PGBACKUPS_ENDPOINT_URL"),
        };

        let secondary = match (
            get("RACKSPACE_USER_NAME"),
            get("RACKSPACE_API"),
            get("RACKSPACE_CONTAINER_NAME"),
        ) {
            (Some(username), Some(api_key), Some(container)) => {
                let segment_limit = parse_number(
                    get("SEGMENT_LIMIT_BYTES"),
                    "SEGMENT_LIMIT_BYTES",
                    DEFAULT_SEGMENT_LIMIT,
                )?;
                let buffer_size = parse_number(
                    get("SEGMENT_BUFFER_BYTES"),
                    "SEGMENT_BUFFER_BYTES",
                    DEFAULT_SEGMENT_BUFFER,
                )?;
                if buffer_size == 0 || buffer_size as u64 > segment_limit {
                    return Err(ArchiveError::Config(format!(
                        "SEGMENT_BUFFER_BYTES ({}) must be between 1 and SEGMENT_LIMIT_BYTES ({})",
                        buffer_size, segment_limit
                    )));
                }
                Some(SwiftConfig {
                    username,
                    api_key,
                    container,
                    region: get("RACKSPACE_REGION").unwrap_or_else(|| DEFAULT_SWIFT_REGION.to_string()),
                    auth_url: get("RACKSPACE_AUTH_URL")
                        .unwrap_or_else(|| DEFAULT_SWIFT_AUTH_URL.to_string()),
                    segment_limit,
                    buffer_size,
                })
            }
            (None, None, None) => None,
            _ => {
                // Only warn if some Rackspace fields were provided
                log::warn!("⚠️ Rackspace configuration is incomplete (RACKSPACE_USER_NAME, RACKSPACE_API, RACKSPACE_CONTAINER_NAME). Secondary upload will be disabled.");
                None
            }
        };

        Ok(ArchiveConfig {
            app: require("PGBACKUPS_APP")?,
            database: get("PGBACKUPS_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            api_url: get("PGBACKUPS_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            platform_api_url: get("PGBACKUPS_PLATFORM_API_URL")
                .unwrap_or_else(|| DEFAULT_PLATFORM_API_URL.to_string()),
            api_key: require("HEROKU_API_KEY")?,
            use_latest_backup: parse_bool(get("USE_LATEST_BACKUP"), "USE_LATEST_BACKUP")?,
            retention,
            namespace: get("PGBACKUPS_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            environment: get("PGBACKUPS_ENVIRONMENT"),
            work_dir: get("PGBACKUPS_WORK_DIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir),
            poll,
            encryption,
            primary,
            secondary,
        })
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn secondary_backend_enabled(&self) -> bool {
        self.secondary.is_some()
    }
}

fn parse_bool(raw: Option<String>, name: &str) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ArchiveError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_number<T>(raw: Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ArchiveError::Config(format!("{} must be a number, got '{}'", name, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("PGBACKUPS_APP", "acme-prod"),
            ("HEROKU_API_KEY", "token"),
            ("PGBACKUPS_BUCKET", "acme-backups"),
            ("PGBACKUPS_REGION", "us-east-1"),
            ("PGBACKUPS_AWS_ACCESS_KEY_ID", "AKIA"),
            ("PGBACKUPS_AWS_SECRET_ACCESS_KEY", "secret"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<ArchiveConfig> {
        ArchiveConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults_applied() -> anyhow::Result<()> {
        let config = load(&base_env())?;

        assert_eq!(config.database, "DATABASE_URL");
        assert_eq!(config.platform_api_url, "https://api.heroku.com");
        assert_eq!(config.retention, 30);
        assert_eq!(config.namespace, "pgbackups");
        assert_eq!(config.environment, None);
        assert!(!config.use_latest_backup);
        assert_eq!(config.poll, PollPolicy::default());
        assert!(!config.encryption_enabled());
        assert!(!config.secondary_backend_enabled());
        Ok(())
    }

    #[test]
    fn test_missing_primary_backend_is_rejected() {
        let mut env = base_env();
        env.remove("PGBACKUPS_BUCKET");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("PGBACKUPS_BUCKET"));
    }

    #[test]
    fn test_encryption_requires_both_values() -> anyhow::Result<()> {
        let mut env = base_env();
        env.insert("KEY_EMAIL", "ops@example.com");
        assert!(!load(&env)?.encryption_enabled());

        env.insert("PGP_PUBLIC_KEY", "-----BEGIN PGP PUBLIC KEY BLOCK-----");
        let config = load(&env)?;
        let encryption = config.encryption.expect("encryption configured");
        assert_eq!(encryption.key_email, "ops@example.com");
        assert!(!encryption.allow_unencrypted_fallback);
        Ok(())
    }

    #[test]
    fn test_partial_rackspace_config_disables_secondary() -> anyhow::Result<()> {
        let mut env = base_env();
        env.insert("RACKSPACE_USER_NAME", "ops");
        env.insert("RACKSPACE_API", "key");
        assert!(!load(&env)?.secondary_backend_enabled());

        env.insert("RACKSPACE_CONTAINER_NAME", "db-archive");
        let swift = load(&env)?.secondary.expect("secondary configured");
        assert_eq!(swift.region, "ord");
        assert_eq!(swift.segment_limit, 5_368_709_119);
        assert_eq!(swift.buffer_size, 1_048_576);
        Ok(())
    }

    #[test]
    fn test_booleans_and_numbers_are_validated() -> anyhow::Result<()> {
        let mut env = base_env();
        env.insert("USE_LATEST_BACKUP", "TRUE");
        env.insert("PGBACKUPS_KEEP", "7");
        env.insert("CAPTURE_MAX_POLLS", "600");
        let config = load(&env)?;
        assert!(config.use_latest_backup);
        assert_eq!(config.retention, 7);
        assert_eq!(config.poll.max_attempts, Some(600));

        env.insert("USE_LATEST_BACKUP", "sometimes");
        assert!(matches!(load(&env), Err(ArchiveError::Config(_))));

        env.insert("USE_LATEST_BACKUP", "no");
        env.insert("PGBACKUPS_KEEP", "0");
        assert!(matches!(load(&env), Err(ArchiveError::Config(_))));

        env.insert("PGBACKUPS_KEEP", "thirty");
        assert!(matches!(load(&env), Err(ArchiveError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_segment_buffer_must_fit_limit() {
        let mut env = base_env();
        env.insert("RACKSPACE_USER_NAME", "ops");
        env.insert("RACKSPACE_API", "key");
        env.insert("RACKSPACE_CONTAINER_NAME", "db-archive");
        env.insert("SEGMENT_LIMIT_BYTES", "1024");
        env.insert("SEGMENT_BUFFER_BYTES", "4096");
        assert!(matches!(load(&env), Err(ArchiveError::Config(_))));
    }
}
