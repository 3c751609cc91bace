// pgarchive/src/backup/artifact.rs
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::encrypt::{ENCRYPTED_SUFFIX, encrypted_path};
use crate::errors::Result;

pub const DUMP_EXTENSION: &str = ".dump";
const ARTIFACT_NAME: &str = "pgbackup";

/// Backend-agnostic object name for an archived snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// `namespace[/environment]/<sanitized finished_at>.dump[.pgp]`
    pub fn derive(namespace: &str, environment: Option<&str>, finished_at: &str, encrypted: bool) -> Self {
        let timestamp: String = finished_at
            .chars()
            .map(|c| if matches!(c, '/' | ':' | '.') || c.is_whitespace() { '-' } else { c })
            .collect();

        let mut parts = vec![namespace];
        if let Some(env) = environment {
            parts.push(env);
        }
        let mut key = format!("{}/{}{}", parts.join("/"), timestamp, DUMP_EXTENSION);
        if encrypted {
            key.push_str(ENCRYPTED_SUFFIX);
        }
        StorageKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local copy of one snapshot (and its encrypted sibling), owned by a single
/// run. Files are removed by `cleanup` and again on drop; the private
/// directory goes with the `TempDir`.
pub struct TransientArtifact {
    dir: TempDir,
    plain: PathBuf,
    encrypted: PathBuf,
}

impl TransientArtifact {
    pub fn create_in(work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let dir = tempfile::Builder::new().prefix("pgarchive-").tempdir_in(work_dir)?;
        let plain = dir.path().join(ARTIFACT_NAME);
        let encrypted = encrypted_path(&plain);
        Ok(Self { dir, plain, encrypted })
    }

    pub fn plain_path(&self) -> &Path {
        &self.plain
    }

    pub fn encrypted_path(&self) -> &Path {
        &self.encrypted
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Deletes both files. Missing files are not an error, so this can run
    /// any number of times.
    pub fn cleanup(&self) -> Result<()> {
        for path in [&self.plain, &self.encrypted] {
            match std::fs::remove_file(path) {
                Ok(()) => log::info!("🧹 Deleted {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for TransientArtifact {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("⚠️ Failed to remove transient backup files: {}", e);
        }
    }
}
