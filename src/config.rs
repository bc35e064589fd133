//! Runtime settings collected from environment variables.
//!
//! Everything tunable lives here: content thresholds, page caps, timeouts,
//! storage directories. Loaded once at startup (after `dotenvy::dotenv()`),
//! then shared read-only across handlers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory for uploaded files awaiting pipeline completion.
    pub temp_dir: PathBuf,
    /// Permanent pitch-deck attachment storage, keyed by startup id.
    pub attachment_dir: PathBuf,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: usize,
    /// Minimum trimmed character count for a strategy's output to be accepted.
    pub min_text_len: usize,
    /// Maximum number of pages taken from OCR output.
    pub max_ocr_pages: usize,
    /// Character cap applied to extracted text before it is embedded in a prompt.
    pub prompt_context_chars: usize,
    /// Per-call timeout for LLM and OCR requests.
    pub remote_call_timeout: Duration,
    /// Wall-clock timeout for the external extractor subprocess.
    pub subprocess_timeout: Duration,
    /// Command invoked for the external-process extraction strategy, if configured.
    pub extractor_command: Option<String>,
    /// Label matched (case-insensitive, substring) against status names to pick
    /// the initial pipeline column for new records.
    pub initial_status_label: String,
}

impl Settings {
    /// Build settings from the environment, applying defaults everywhere.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            temp_dir: env_path("TEMP_UPLOAD_DIR", "uploads/tmp"),
            attachment_dir: env_path("ATTACHMENT_DIR", "uploads/pitchdecks"),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?,
            min_text_len: env_parse("MIN_TEXT_LEN", 50)?,
            max_ocr_pages: env_parse("MAX_OCR_PAGES", 10)?,
            prompt_context_chars: env_parse("PROMPT_CONTEXT_CHARS", 120_000)?,
            remote_call_timeout: Duration::from_secs(env_parse("REMOTE_CALL_TIMEOUT_SECS", 60)?),
            subprocess_timeout: Duration::from_secs(env_parse("SUBPROCESS_TIMEOUT_SECS", 120)?),
            extractor_command: std::env::var("EXTRACTOR_COMMAND")
                .ok()
                .filter(|s| !s.is_empty()),
            initial_status_label: std::env::var("INITIAL_STATUS_LABEL")
                .unwrap_or_else(|_| "entrada".to_string()),
        })
    }

    /// Create the temp and attachment directories if they are missing.
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .with_context(|| format!("Failed to create temp dir {:?}", self.temp_dir))?;
        tokio::fs::create_dir_all(&self.attachment_dir)
            .await
            .with_context(|| format!("Failed to create attachment dir {:?}", self.attachment_dir))?;
        Ok(())
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}
