//! File lifecycle: a temp upload never outlives its pipeline run.
//!
//! Exactly one of {relocated, deleted} holds for every temp file at the end of
//! an invocation. Relocation targets a deterministic path derived from the new
//! record's id, which download collaborators resolve statically.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::upload::UploadedDocument;

/// Permanent attachment location for a startup's pitch deck.
pub fn attachment_path(attachment_dir: &Path, startup_id: i64) -> PathBuf {
    attachment_dir.join(format!("{}.pdf", startup_id))
}

/// Move the temp file into permanent attachment storage.
///
/// Rename is attempted first; a cross-filesystem temp dir falls back to
/// copy-then-remove.
pub async fn relocate(
    doc: &UploadedDocument,
    attachment_dir: &Path,
    startup_id: i64,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(attachment_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", attachment_dir))?;

    let target = attachment_path(attachment_dir, startup_id);

    match tokio::fs::rename(&doc.path, &target).await {
        Ok(()) => {
            debug!("Relocated {:?} -> {:?}", doc.path, target);
            Ok(target)
        }
        Err(rename_err) => {
            debug!(
                "Rename failed ({}), falling back to copy: {:?} -> {:?}",
                rename_err, doc.path, target
            );
            tokio::fs::copy(&doc.path, &target)
                .await
                .with_context(|| format!("Failed to copy {:?} to {:?}", doc.path, target))?;
            if let Err(e) = tokio::fs::remove_file(&doc.path).await {
                warn!("Copied but could not remove temp file {:?}: {}", doc.path, e);
            }
            Ok(target)
        }
    }
}

/// Delete the temp file if it still exists. Best-effort: errors are logged,
/// never propagated, so cleanup can run inside any failure path.
pub async fn cleanup(doc: &UploadedDocument) {
    match tokio::fs::remove_file(&doc.path).await {
        Ok(()) => debug!("Deleted temp file {:?}", doc.path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete temp file {:?}: {}", doc.path, e),
    }
}
