// pgarchive/src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No backup snapshot available to archive")]
    NoSnapshotAvailable,

    #[error("Capture {id} did not complete after {attempts} polls")]
    CaptureTimedOut { id: String, attempts: u32 },

    #[error("Backup service request failed: {0:#}")]
    Service(anyhow::Error),

    #[error("Download failed: {cause}")]
    Fetch { cause: String },

    #[error("Public key for {selector} could not be imported into the keyring")]
    KeyImportFailed { selector: String },

    #[error("Encryption failed ({status}): {stderr}")]
    EncryptionFailed { status: String, stderr: String },

    #[error("Upload failed on every storage backend: {}", .0.join("; "))]
    AllBackendsFailed(Vec<String>),

    #[error("Retention enforcement failed: {0:#}")]
    Retention(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{source} (last known snapshot: {snapshot})")]
    Orchestration {
        snapshot: String,
        #[source]
        source: Box<ArchiveError>,
    },
}

impl ArchiveError {
    pub fn fetch(cause: impl std::fmt::Display) -> Self {
        ArchiveError::Fetch { cause: cause.to_string() }
    }

    /// Unwraps an `Orchestration` wrapper down to the step error.
    pub fn root(&self) -> &ArchiveError {
        match self {
            ArchiveError::Orchestration { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
