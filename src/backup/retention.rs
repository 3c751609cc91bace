// pgarchive/src/backup/retention.rs
use crate::errors::{ArchiveError, Result};
use crate::service::{BackupService, sort_by_creation};

/// Source/destination pair identifying the transfers a retention window
/// applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferKind {
    pub from: String,
    pub to: String,
}

impl Default for TransferKind {
    /// Scheduled logical backups.
    fn default() -> Self {
        TransferKind {
            from: "pg_dump".into(),
            to: "gof3r".into(),
        }
    }
}

/// Expires the single oldest matching transfer when more than `window` exist.
/// Returns how many transfers were deleted (0 or 1).
pub async fn enforce(
    service: &dyn BackupService,
    app: &str,
    window: usize,
    kind: &TransferKind,
) -> Result<usize> {
    let mut transfers: Vec<_> = service
        .list_transfers(app)
        .await
        .map_err(ArchiveError::Retention)?
        .into_iter()
        .filter(|t| t.from_type.as_deref() == Some(kind.from.as_str()) && t.to_type.as_deref() == Some(kind.to.as_str()))
        .collect();

    if transfers.len() <= window {
        log::info!("{} {} backups kept (window {}), nothing to expire", transfers.len(), kind.from, window);
        return Ok(0);
    }

    sort_by_creation(&mut transfers);
    let oldest = &transfers[0];
    service
        .delete_transfer(oldest.num)
        .await
        .map_err(ArchiveError::Retention)?;
    log::info!("🗑️ Backup {} expired", oldest.label());
    Ok(1)
}
