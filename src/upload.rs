//! Upload receiver: multipart validation and temp-file placement.
//!
//! Validation runs entirely before anything touches the filesystem, so a
//! rejected upload never creates a temp file that would need cleanup.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::Multipart;
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;
use crate::pipeline::PipelineError;

/// MIME types accepted for pitch-deck uploads.
const ALLOWED_MIME_TYPES: &[&str] = &["application/pdf"];

/// Content types browsers attach when they don't know better; for these the
/// filename extension decides.
const GENERIC_MIME_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

/// Handle to an uploaded file parked in the temp directory.
///
/// The pipeline run owns this path exclusively until the file is either
/// relocated into attachment storage or deleted.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub path: PathBuf,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Read the multipart request, validate it, and park the file in the temp
/// directory. Returns the document handle and the supplied startup name.
pub async fn receive_upload(
    mut multipart: Multipart,
    settings: &Settings,
) -> Result<(UploadedDocument, String), PipelineError> {
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut file_data: Option<Vec<u8>> = None;
    let mut startup_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("file") => {
                file_name = Some(field.file_name().unwrap_or("document.pdf").to_string());
                content_type = field.content_type().map(|m| m.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    PipelineError::BadRequest(format!("Failed to read uploaded file: {}", e))
                })?;
                file_data = Some(bytes.to_vec());
            }
            Some("name") => {
                let value = field.text().await.map_err(|e| {
                    PipelineError::BadRequest(format!("Failed to read name field: {}", e))
                })?;
                if !value.trim().is_empty() {
                    startup_name = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let startup_name =
        startup_name.ok_or_else(|| PipelineError::MissingField("name".to_string()))?;
    let data = file_data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| PipelineError::MissingField("file".to_string()))?;
    let original_name = file_name.unwrap_or_else(|| "document.pdf".to_string());

    let mime_type = validate_upload(
        &original_name,
        content_type.as_deref(),
        data.len(),
        settings,
    )?;

    let doc = store_temp(&settings.temp_dir, &original_name, &mime_type, &data).await?;
    info!(
        "Received upload: {} ({} bytes) -> {:?}",
        doc.original_name, doc.size_bytes, doc.path
    );

    Ok((doc, startup_name))
}

/// Enforce the MIME allow-list and the size cap. Returns the effective MIME
/// type on acceptance.
pub fn validate_upload(
    file_name: &str,
    content_type: Option<&str>,
    size_bytes: usize,
    settings: &Settings,
) -> Result<String, PipelineError> {
    if size_bytes > settings.max_upload_bytes {
        return Err(PipelineError::PayloadTooLarge {
            size: size_bytes,
            limit: settings.max_upload_bytes,
        });
    }

    let has_pdf_extension = file_name.to_lowercase().ends_with(".pdf");
    match content_type {
        Some(mime) if ALLOWED_MIME_TYPES.contains(&mime) => Ok(mime.to_string()),
        Some(mime) if GENERIC_MIME_TYPES.contains(&mime) && has_pdf_extension => {
            Ok("application/pdf".to_string())
        }
        None if has_pdf_extension => Ok("application/pdf".to_string()),
        other => Err(PipelineError::UnsupportedMediaType(
            other.unwrap_or("unknown").to_string(),
        )),
    }
}

/// Write accepted bytes under a collision-resistant generated name.
async fn store_temp(
    temp_dir: &Path,
    original_name: &str,
    mime_type: &str,
    data: &[u8],
) -> Result<UploadedDocument, PipelineError> {
    let path = temp_dir.join(temp_file_name());
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| PipelineError::BadRequest(format!("Failed to store upload: {}", e)))?;

    Ok(UploadedDocument {
        path,
        original_name: original_name.to_string(),
        mime_type: mime_type.to_string(),
        size_bytes: data.len() as u64,
    })
}

/// Timestamp plus random suffix; safe under concurrent uploads.
fn temp_file_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}-{}.pdf", millis, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        let mut settings = Settings::from_env().unwrap();
        settings.max_upload_bytes = 1024;
        settings
    }

    #[test]
    fn pdf_mime_accepted() {
        let settings = test_settings();
        let mime = validate_upload("deck.pdf", Some("application/pdf"), 512, &settings).unwrap();
        assert_eq!(mime, "application/pdf");
    }

    #[test]
    fn generic_mime_with_pdf_extension_accepted() {
        let settings = test_settings();
        let mime =
            validate_upload("deck.pdf", Some("application/octet-stream"), 512, &settings).unwrap();
        assert_eq!(mime, "application/pdf");
    }

    #[test]
    fn executable_rejected_as_unsupported() {
        let settings = test_settings();
        let err = validate_upload(
            "malware.exe",
            Some("application/x-msdownload"),
            512,
            &settings,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMediaType(_)));
    }

    #[test]
    fn oversized_upload_rejected() {
        let settings = test_settings();
        let err =
            validate_upload("deck.pdf", Some("application/pdf"), 4096, &settings).unwrap_err();
        assert!(matches!(err, PipelineError::PayloadTooLarge { .. }));
    }

    #[test]
    fn temp_names_are_unique() {
        let a = temp_file_name();
        let b = temp_file_name();
        assert_ne!(a, b);
        assert!(a.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn store_temp_writes_under_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let doc = store_temp(dir.path(), "deck.pdf", "application/pdf", b"%PDF-1.4")
            .await
            .unwrap();
        assert!(doc.path.starts_with(dir.path()));
        assert_eq!(doc.size_bytes, 8);
        assert!(doc.path.exists());
    }
}
