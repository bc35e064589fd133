//! External-process delegation strategy.
//!
//! Last structured attempt before the placeholder: spawn a separate extractor
//! process (a Python sidecar in production) with the PDF path and startup name
//! as arguments, and parse the JSON it prints on stdout. The child is bounded
//! by a hard wall-clock timeout and killed if it exceeds it.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExtractionStrategy, StrategyKind};
use crate::upload::UploadedDocument;

pub struct SubprocessStrategy {
    command: String,
    startup_name: String,
    timeout: Duration,
}

impl SubprocessStrategy {
    pub fn new(command: String, startup_name: String, timeout: Duration) -> Self {
        Self {
            command,
            startup_name,
            timeout,
        }
    }
}

/// Stdout contract of the sidecar extractor.
#[derive(Debug, Deserialize)]
struct SidecarResult {
    #[serde(default)]
    extracted_text: String,
    #[serde(default)]
    extraction_method: Option<String>,
}

#[async_trait::async_trait]
impl ExtractionStrategy for SubprocessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExternalProcess
    }

    async fn extract(&self, doc: &UploadedDocument) -> Result<String> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().context("Extractor command is empty")?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .arg(&doc.path)
            .arg(&self.startup_name)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "SubprocessStrategy: running '{}' (timeout {:?})",
            self.command, self.timeout
        );

        // On timeout the output future is dropped and kill_on_drop reaps the child.
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("Extractor timed out after {:?}", self.timeout))?
            .context("Failed to spawn extractor process")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Extractor exited with {}: {}",
                output.status,
                stderr.trim().chars().take(500).collect::<String>()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = parse_sidecar_output(&stdout)?;

        if let Some(method) = &result.extraction_method {
            debug!("SubprocessStrategy: sidecar used '{}'", method);
        }
        if result.extracted_text.trim().is_empty() {
            warn!("SubprocessStrategy: sidecar returned empty text");
        }

        Ok(result.extracted_text)
    }
}

/// The sidecar logs progress lines before printing its JSON result, so parsing
/// starts at the first `{` and ignores anything after the first JSON value.
fn parse_sidecar_output(stdout: &str) -> Result<SidecarResult> {
    let start = stdout
        .find('{')
        .context("Extractor output contains no JSON")?;

    let mut stream = serde_json::Deserializer::from_str(&stdout[start..]).into_iter();
    match stream.next() {
        Some(Ok(result)) => Ok(result),
        Some(Err(e)) => Err(e).context("Failed to parse extractor JSON"),
        None => bail!("Extractor output contains no JSON"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn doc_at(path: PathBuf) -> UploadedDocument {
        UploadedDocument {
            path,
            original_name: "deck.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 10,
        }
    }

    #[test]
    fn log_lines_before_json_are_skipped() {
        let stdout = "=== EXTRACTING ===\npage 1 done\n{\"extracted_text\": \"hello world\", \"extraction_method\": \"ocr\"}\n";
        let result = parse_sidecar_output(stdout).unwrap();
        assert_eq!(result.extracted_text, "hello world");
        assert_eq!(result.extraction_method.as_deref(), Some("ocr"));
    }

    #[test]
    fn trailing_output_after_json_is_tolerated() {
        let stdout = "{\"extracted_text\": \"abc\"}\nleftover noise";
        let result = parse_sidecar_output(stdout).unwrap();
        assert_eq!(result.extracted_text, "abc");
    }

    #[test]
    fn output_without_json_is_an_error() {
        assert!(parse_sidecar_output("no json here at all").is_err());
    }

    #[tokio::test]
    async fn hung_process_is_killed_at_timeout() {
        // `tail -f` never exits on its own; the extra path/name arguments are
        // reported and ignored while /dev/null keeps the process alive.
        let strategy = SubprocessStrategy::new(
            "tail -f /dev/null".to_string(),
            "Acme".to_string(),
            Duration::from_millis(100),
        );
        let err = strategy
            .extract(&doc_at(PathBuf::from("/tmp/whatever.pdf")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn sidecar_json_round_trips_through_a_real_process() {
        // `cat` stands in for the sidecar: the "pdf" file holds the JSON
        // payload, and the extra name argument points at the same file so the
        // process exits zero.
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("payload.pdf");
        std::fs::write(&payload, "{\"extracted_text\": \"from sidecar\"}").unwrap();

        let strategy = SubprocessStrategy::new(
            "cat".to_string(),
            payload.to_string_lossy().to_string(),
            Duration::from_secs(5),
        );
        let text = strategy.extract(&doc_at(payload.clone())).await.unwrap();
        assert_eq!(text, "from sidecar");
    }

    #[tokio::test]
    async fn missing_program_is_a_strategy_failure() {
        let strategy = SubprocessStrategy::new(
            "definitely-not-a-real-binary-xyz".to_string(),
            "Acme".to_string(),
            Duration::from_secs(1),
        );
        assert!(strategy
            .extract(&doc_at(PathBuf::from("/tmp/x.pdf")))
            .await
            .is_err());
    }
}
