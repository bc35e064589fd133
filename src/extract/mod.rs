//! Extraction strategy chain: opaque document in, best-effort plain text out.
//!
//! Strategies run in a fixed priority order (decreasing fidelity, increasing
//! cost). The first one whose trimmed output clears the minimum-content
//! threshold wins and suppresses the rest. Per-strategy failures are logged
//! and swallowed; if everything fails, a diagnostic placeholder is returned so
//! downstream stages always have non-empty input. The chain itself never
//! fails.

pub mod ocr;
pub mod subprocess;
pub mod vision;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::upload::UploadedDocument;

/// Which strategy produced the accepted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Vision,
    Ocr,
    ExternalProcess,
    Placeholder,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Ocr => "ocr",
            Self::ExternalProcess => "external-process",
            Self::Placeholder => "placeholder",
        }
    }
}

/// The chain's output: always non-empty text plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedText {
    pub text: String,
    pub strategy: StrategyKind,
    pub text_length: usize,
}

/// One technique for turning a document into plain text.
#[async_trait::async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    async fn extract(&self, doc: &UploadedDocument) -> anyhow::Result<String>;
}

/// Run strategies in order, accepting the first whose trimmed length clears
/// `min_text_len`. Infallible: exhaustion resolves to the placeholder.
pub async fn run_chain(
    strategies: &[Box<dyn ExtractionStrategy>],
    doc: &UploadedDocument,
    min_text_len: usize,
) -> ExtractedText {
    for strategy in strategies {
        let kind = strategy.kind();
        match strategy.extract(doc).await {
            Ok(text) => {
                let trimmed_len = text.trim().chars().count();
                if trimmed_len >= min_text_len {
                    info!(
                        "Strategy '{}' accepted: {} chars (threshold {})",
                        kind.as_str(),
                        trimmed_len,
                        min_text_len
                    );
                    let text_length = text.chars().count();
                    return ExtractedText {
                        text,
                        strategy: kind,
                        text_length,
                    };
                }
                info!(
                    "Strategy '{}' produced only {} chars, below threshold {} - trying next",
                    kind.as_str(),
                    trimmed_len,
                    min_text_len
                );
            }
            Err(e) => {
                warn!("Strategy '{}' failed: {:#}", kind.as_str(), e);
            }
        }
    }

    let text = placeholder_text(doc);
    let text_length = text.chars().count();
    ExtractedText {
        text,
        strategy: StrategyKind::Placeholder,
        text_length,
    }
}

/// Fixed-format diagnostic emitted when every strategy came up short. Names
/// the file and its size so the review queue has something to go on.
fn placeholder_text(doc: &UploadedDocument) -> String {
    format!(
        "PITCH DECK DOCUMENT: {}\n\
         SIZE: {}KB\n\n\
         WARNING: automatic text extraction failed for this document.\n\
         It may be encrypted, corrupted, or contain only low-quality scans.\n\
         Manual review is required to capture its contents.",
        doc.original_name,
        doc.size_bytes / 1024
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn doc() -> UploadedDocument {
        UploadedDocument {
            path: PathBuf::from("/tmp/nonexistent-deck.pdf"),
            original_name: "deck.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 4096,
        }
    }

    /// Scripted strategy used to observe chain behavior.
    struct Scripted {
        kind: StrategyKind,
        result: Result<String, String>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ExtractionStrategy for Scripted {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn extract(&self, _doc: &UploadedDocument) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(text) => Ok(text.clone()),
                Err(msg) => Err(anyhow::anyhow!("{}", msg)),
            }
        }
    }

    fn scripted(
        kind: StrategyKind,
        result: Result<&str, &str>,
    ) -> (Box<dyn ExtractionStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = Scripted {
            kind,
            result: result.map(String::from).map_err(String::from),
            calls: calls.clone(),
        };
        (Box::new(strategy), calls)
    }

    #[tokio::test]
    async fn first_success_suppresses_later_strategies() {
        let long_text = "x".repeat(200);
        let (first, first_calls) = scripted(StrategyKind::Vision, Ok(&long_text));
        let (second, second_calls) = scripted(StrategyKind::Ocr, Ok(&long_text));

        let result = run_chain(&[first, second], &doc(), 50).await;

        assert_eq!(result.strategy, StrategyKind::Vision);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_output_falls_through_to_next() {
        let long_text = "y".repeat(200);
        let (first, _) = scripted(StrategyKind::Vision, Ok("too short"));
        let (second, second_calls) = scripted(StrategyKind::Ocr, Ok(&long_text));

        let result = run_chain(&[first, second], &doc(), 50).await;

        assert_eq!(result.strategy, StrategyKind::Ocr);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_degrade_without_propagating() {
        let long_text = "z".repeat(200);
        let (first, _) = scripted(StrategyKind::Vision, Err("pdf is corrupt"));
        let (second, _) = scripted(StrategyKind::Ocr, Ok(&long_text));

        let result = run_chain(&[first, second], &doc(), 50).await;
        assert_eq!(result.strategy, StrategyKind::Ocr);
    }

    #[tokio::test]
    async fn exhaustion_yields_placeholder() {
        let (first, _) = scripted(StrategyKind::Vision, Err("boom"));
        let (second, _) = scripted(StrategyKind::Ocr, Ok("gibberish"));
        let (third, _) = scripted(StrategyKind::ExternalProcess, Err("timeout"));

        let result = run_chain(&[first, second, third], &doc(), 50).await;

        assert_eq!(result.strategy, StrategyKind::Placeholder);
        assert!(result.text.contains("deck.pdf"));
        assert!(result.text.contains("4KB"));
        assert!(result.text_length > 0);
    }

    #[tokio::test]
    async fn empty_chain_still_returns_text() {
        let result = run_chain(&[], &doc(), 50).await;
        assert_eq!(result.strategy, StrategyKind::Placeholder);
        assert!(!result.text.trim().is_empty());
    }

    #[test]
    fn strategy_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&StrategyKind::ExternalProcess).unwrap();
        assert_eq!(json, "\"external-process\"");
        assert_eq!(StrategyKind::ExternalProcess.as_str(), "external-process");
    }
}
