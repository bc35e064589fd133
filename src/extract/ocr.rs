//! Render-and-recognize strategy backed by Mistral's OCR API.
//!
//! The whole document is submitted; rasterization happens server-side. Only
//! the first `max_pages` returned pages are kept, joined with page-delimiter
//! markers. A deck longer than the cap is silently partial, which is an
//! accepted limitation of this stage.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ExtractionStrategy, StrategyKind};
use crate::upload::UploadedDocument;

pub struct OcrStrategy {
    api_key: String,
    client: reqwest::Client,
    max_pages: usize,
    timeout: Duration,
}

impl OcrStrategy {
    pub fn from_env(
        client: reqwest::Client,
        max_pages: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = std::env::var("MISTRAL_API_KEY")
            .map_err(|_| anyhow::anyhow!("MISTRAL_API_KEY not set"))?;
        Ok(Self {
            api_key,
            client,
            max_pages,
            timeout,
        })
    }
}

// ── Mistral API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest {
    model: String,
    document: DocumentSource,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum DocumentSource {
    #[serde(rename = "file")]
    File { file_id: String },
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[derive(Deserialize)]
struct OcrPage {
    index: u32,
    markdown: String,
}

#[derive(Deserialize)]
struct FileUploadResponse {
    id: String,
}

// ── Strategy implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl ExtractionStrategy for OcrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ocr
    }

    async fn extract(&self, doc: &UploadedDocument) -> Result<String> {
        let data = tokio::fs::read(&doc.path)
            .await
            .with_context(|| format!("Failed to read {:?}", doc.path))?;

        let file_id = self.upload_file(&doc.original_name, &data).await?;

        let body = OcrRequest {
            model: "mistral-ocr-latest".to_string(),
            document: DocumentSource::File { file_id },
        };

        info!("OcrStrategy: calling OCR API for {}", doc.original_name);

        let resp = self
            .client
            .post("https://api.mistral.ai/v1/ocr")
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mistral OCR API error ({}): {}", status, text);
        }

        let ocr: OcrResponse = resp.json().await.context("Failed to parse OCR response")?;
        debug!("OcrStrategy: {} pages returned", ocr.pages.len());

        Ok(join_pages(ocr.pages, self.max_pages))
    }
}

impl OcrStrategy {
    /// Upload raw bytes to the Files API, returning the file_id.
    async fn upload_file(&self, filename: &str, data: &[u8]) -> Result<String> {
        use reqwest::multipart::{Form, Part};

        debug!(
            "OcrStrategy: uploading {} ({} bytes) to Files API",
            filename,
            data.len()
        );

        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;

        let form = Form::new().part("file", part).text("purpose", "ocr");

        let resp = self
            .client
            .post("https://api.mistral.ai/v1/files")
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mistral Files API error ({}): {}", status, text);
        }

        let upload: FileUploadResponse = resp.json().await?;
        Ok(upload.id)
    }
}

/// Join per-page text with page markers, keeping at most `max_pages` pages.
/// Page indices from the API are 0-based and normalized to 1-based markers.
fn join_pages(pages: Vec<OcrPage>, max_pages: usize) -> String {
    pages
        .into_iter()
        .take(max_pages)
        .map(|p| format!("--- Page {} ---\n{}", p.index + 1, p.markdown))
        .collect::<Vec<_>>()
        .join("\n\n")
}
