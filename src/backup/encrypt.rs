// pgarchive/src/backup/encrypt.rs
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use which::which;

use crate::config::EncryptionConfig;
use crate::errors::{ArchiveError, Result};

/// Suffix of the encrypted sibling file and of encrypted storage keys.
pub const ENCRYPTED_SUFFIX: &str = ".pgp";

/// Captured result of one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// What the encryption step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encrypted {
    /// Ciphertext written to this path.
    Ciphertext(PathBuf),
    /// Encryption failed and the lenient fallback kept the plaintext.
    Plaintext,
}

#[async_trait]
pub trait Encryptor: Send + Sync {
    async fn encrypt(&self, plain_path: &Path) -> Result<Encrypted>;
}

pub fn encrypted_path(plain_path: &Path) -> PathBuf {
    let mut name = plain_path.as_os_str().to_owned();
    name.push(ENCRYPTED_SUFFIX);
    PathBuf::from(name)
}

/// Encrypts artifacts for one recipient by shelling out to `gpg`, importing
/// the recipient's public key into the local keyring when it is missing.
pub struct GpgEncryptor {
    gpg_path: PathBuf,
    config: EncryptionConfig,
}

impl GpgEncryptor {
    pub fn new(config: &EncryptionConfig) -> Result<Self> {
        let gpg_path = which("gpg").map_err(|_| {
            ArchiveError::Config(
                "gpg executable not found in PATH. Please install GnuPG or unset KEY_EMAIL / PGP_PUBLIC_KEY."
                    .into(),
            )
        })?;
        log::info!("Found gpg executable at: {}", gpg_path.display());
        Ok(Self::with_binary(gpg_path, config))
    }

    pub fn with_binary(gpg_path: PathBuf, config: &EncryptionConfig) -> Self {
        Self {
            gpg_path,
            config: config.clone(),
        }
    }

    fn run(&self, args: &[&OsStr]) -> Result<CommandOutcome> {
        let output = Command::new(&self.gpg_path).args(args).output()?;
        Ok(CommandOutcome {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn has_public_key(&self) -> Result<bool> {
        Ok(self.run(&[OsStr::new("--list-keys"), OsStr::new(&self.config.key_email)])?.success)
    }

    /// Makes sure the recipient key is in the keyring, importing it if needed.
    pub fn ensure_public_key(&self) -> Result<()> {
        log::info!("Looking for {} public key", self.config.key_email);
        if self.has_public_key()? {
            return Ok(());
        }

        log::info!("Importing Public Key into GPG Keychain");
        let mut key_file = tempfile::NamedTempFile::new()?;
        key_file.write_all(self.config.public_key.as_bytes())?;
        key_file.flush()?;

        let import = self.run(&[OsStr::new("--batch"), OsStr::new("--import"), key_file.path().as_os_str()])?;
        if !import.success {
            log::warn!("⚠️ gpg --import failed ({}): {}", import.status_text(), import.stderr.trim());
        }

        if self.has_public_key()? {
            Ok(())
        } else {
            Err(ArchiveError::KeyImportFailed {
                selector: self.config.key_email.clone(),
            })
        }
    }
}

#[async_trait]
impl Encryptor for GpgEncryptor {
    async fn encrypt(&self, plain_path: &Path) -> Result<Encrypted> {
        self.ensure_public_key()?;

        let output_path = encrypted_path(plain_path);
        log::info!("🔐 Encrypting backup for {}", self.config.key_email);
        let outcome = self.run(&[
            OsStr::new("--batch"),
            OsStr::new("--yes"),
            OsStr::new("--trust-model"),
            OsStr::new("always"),
            OsStr::new("-o"),
            output_path.as_os_str(),
            OsStr::new("-r"),
            OsStr::new(&self.config.key_email),
            OsStr::new("-e"),
            plain_path.as_os_str(),
        ])?;

        if !outcome.stdout.trim().is_empty() {
            log::debug!("gpg: {}", outcome.stdout.trim());
        }
        if outcome.success {
            log::info!("✅ Encrypted backup written to {}", output_path.display());
            return Ok(Encrypted::Ciphertext(output_path));
        }

        if self.config.allow_unencrypted_fallback {
            log::warn!(
                "⚠️ gpg failed ({}), archiving UNENCRYPTED backup: {}",
                outcome.status_text(),
                outcome.stderr.trim()
            );
            return Ok(Encrypted::Plaintext);
        }

        Err(ArchiveError::EncryptionFailed {
            status: outcome.status_text(),
            stderr: outcome.stderr.trim().to_string(),
        })
    }
}
