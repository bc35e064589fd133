//! Pipeline orchestration: upload handle in, committed record out.
//!
//! Stages run strictly in order: extraction chain, synthesis, materialization,
//! file relocation. Extraction and synthesis cannot fail; a persistence
//! failure deletes the temp file before it surfaces; a post-insert relocation
//! failure is a logged, non-fatal degraded state. Every exit path leaves the
//! temp file either relocated or deleted.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Settings;
use crate::extract::{self, ExtractionStrategy};
use crate::persist::{self, PersistedStartup, RecordStore};
use crate::storage;
use crate::synthesize::Synthesizer;
use crate::upload::UploadedDocument;

/// Terminal errors surfaced to the caller. Everything else degrades in place.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Persistence failure: {0}")]
    Persistence(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MissingField(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag for the failure body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::MissingField(_) => "missing_field",
            Self::BadRequest(_) => "bad_request",
            Self::Persistence(_) => "persistence_failure",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Successful completion payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success: bool,
    pub startup: PersistedStartup,
    pub original_file_name: String,
    pub extracted_text_length: usize,
    pub extraction_method: String,
    /// Null when the record was saved but its attachment could not be moved
    /// into place (degraded, recoverable).
    pub attachment_path: Option<String>,
}

/// Run the ingestion pipeline for one uploaded document.
///
/// Takes ownership of the document handle: by the time this returns, the temp
/// file has been relocated into attachment storage or deleted.
pub async fn run(
    doc: UploadedDocument,
    startup_name: String,
    strategies: &[Box<dyn ExtractionStrategy>],
    synthesizer: &dyn Synthesizer,
    store: &dyn RecordStore,
    settings: &Settings,
) -> Result<ImportOutcome, PipelineError> {
    info!(
        "Pipeline start: '{}' from {} ({} bytes)",
        startup_name, doc.original_name, doc.size_bytes
    );

    // Stages 1-2 are total: they always yield text and a candidate.
    let extracted = extract::run_chain(strategies, &doc, settings.min_text_len).await;
    let candidate = synthesizer.synthesize(&extracted.text, &startup_name).await;

    // Stage 3: the only fatal stage. Cleanup before surfacing the error.
    let startup = match persist::materialize(store, settings, &candidate, &extracted).await {
        Ok(startup) => startup,
        Err(e) => {
            storage::cleanup(&doc).await;
            return Err(e);
        }
    };

    // Stage 4: relocation. The record already exists; a failure here leaves it
    // attachment-less, which the review queue surfaces later.
    let attachment_path = match storage::relocate(&doc, &settings.attachment_dir, startup.id).await
    {
        Ok(path) => Some(path.to_string_lossy().to_string()),
        Err(e) => {
            warn!(
                "Startup {} saved but attachment relocation failed ({:#}); \
                 record is attachment-less",
                startup.id, e
            );
            storage::cleanup(&doc).await;
            None
        }
    };

    info!(
        "Pipeline complete: startup {} via '{}' ({} chars)",
        startup.id,
        extracted.strategy.as_str(),
        extracted.text_length
    );

    Ok(ImportOutcome {
        success: true,
        startup,
        original_file_name: doc.original_name,
        extracted_text_length: extracted.text_length,
        extraction_method: extracted.strategy.as_str().to_string(),
        attachment_path,
    })
}
