//! Structured data synthesis: extracted text in, candidate record out.
//!
//! The primary path asks the LLM for a schema-constrained JSON completion and
//! projects the answer through the fixed field allow-list. If the call fails,
//! times out, or returns garbage, a local regex extractor scans the raw text
//! for well-known labels. Total failure still yields a name-plus-note
//! candidate; this function never errs and never aborts the pipeline.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::openrouter::{Message, OpenRouterClient};
use crate::schema::{self, CandidateRecord, FieldKind};

/// Seam between the pipeline and the synthesis backend.
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, supplied_name: &str) -> CandidateRecord;
}

/// Production synthesizer: model first, regex fallback second.
pub struct ModelSynthesizer {
    client: OpenRouterClient,
    settings: Settings,
}

impl ModelSynthesizer {
    pub fn new(client: OpenRouterClient, settings: Settings) -> Self {
        Self { client, settings }
    }
}

#[async_trait::async_trait]
impl Synthesizer for ModelSynthesizer {
    async fn synthesize(&self, text: &str, supplied_name: &str) -> CandidateRecord {
        synthesize(&self.client, &self.settings, text, supplied_name).await
    }
}

/// Convert extracted text plus the user-supplied name into a candidate record.
pub async fn synthesize(
    client: &OpenRouterClient,
    settings: &Settings,
    text: &str,
    supplied_name: &str,
) -> CandidateRecord {
    match synthesize_with_model(client, settings, text, supplied_name).await {
        Ok(record) => {
            info!("Synthesis succeeded via model for '{}'", supplied_name);
            record
        }
        Err(e) => {
            warn!(
                "Model synthesis failed for '{}', using local fallback: {:#}",
                supplied_name, e
            );
            fallback_extract(text, supplied_name)
        }
    }
}

async fn synthesize_with_model(
    client: &OpenRouterClient,
    settings: &Settings,
    text: &str,
    supplied_name: &str,
) -> Result<CandidateRecord> {
    let system_prompt = "You are a pitch deck analyst. Extract ONLY information actually \
present in the provided text; the text may be in Portuguese or English. Never invent or \
guess values. When a field is not mentioned in the text, return null for it - never an \
empty string or a placeholder.";

    let user_prompt = format!(
        "Extract a structured startup record from the pitch deck text below.\n\n\
         STARTUP NAME (authoritative, use as-is): {name}\n\n\
         FIELDS TO EXTRACT:\n{fields}\n\n\
         PITCH DECK TEXT:\n{text}\n\n\
         Return a single JSON object with exactly these fields. Use null for anything \
         the text does not state.",
        name = supplied_name,
        fields = schema::prompt_field_list(),
        text = truncate_for_context(text, settings.prompt_context_chars),
    );

    let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];

    let response = client
        .chat_json(messages, "startup_record", schema::response_json_schema())
        .await?;

    debug!("Raw synthesis response length: {} chars", response.len());

    let parsed: Value = parse_llm_json(&response).context("Failed to parse synthesis response")?;
    Ok(CandidateRecord::from_model_json(&parsed, supplied_name))
}

// ============================================================================
// Local fallback extractor
// ============================================================================

struct LabelPattern {
    field: &'static str,
    kind: FieldKind,
    regex: Regex,
}

/// Label patterns for the fallback path. Labels cover the pt-BR and English
/// forms seen in real decks; each regex captures the value only.
fn label_patterns() -> Vec<LabelPattern> {
    let table: &[(&str, FieldKind, &str)] = &[
        ("ceoName", FieldKind::Text, r"(?i)(?:CEO|founder|fundador[a]?)\s*[:\-]\s*([^,\n;]+)"),
        (
            "ceoEmail",
            FieldKind::Text,
            r"(?i)e-?mail\s*[:\-]\s*([A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,})",
        ),
        (
            "ceoWhatsapp",
            FieldKind::Text,
            r"(?i)whatsapp\s*[:\-]\s*(\+?[\d][\d\s().\-]{7,})",
        ),
        (
            "ceoLinkedin",
            FieldKind::Text,
            r"(?i)linkedin\s*[:\-]?\s*((?:https?://)?(?:www\.)?linkedin\.com/[^\s,;]+)",
        ),
        ("website", FieldKind::Text, r"(?i)(?:website|site)\s*[:\-]\s*([^\s,;]+)"),
        (
            "sector",
            FieldKind::Text,
            r"(?i)(?:setor|sector|ind[uú]stria)\s*[:\-]\s*([^,\n;]+)",
        ),
        ("city", FieldKind::Text, r"(?i)(?:cidade|city)\s*[:\-]\s*([^,\n;]+)"),
        ("state", FieldKind::Text, r"(?i)(?:estado|state)\s*[:\-]\s*([^,\n;]+)"),
        (
            "businessModel",
            FieldKind::Text,
            r"(?i)(?:modelo de neg[oó]cio|business model)\s*[:\-]\s*([^,\n;]+)",
        ),
        ("mrr", FieldKind::Number, r"(?i)\bMRR\s*[:\-]?\s*(R?\$?\s?[\d.,]+)"),
        (
            "clientCount",
            FieldKind::Count,
            r"(?i)(?:clientes|clients)\s*[:\-]\s*([\d.,]+)",
        ),
        (
            "foundingDate",
            FieldKind::Date,
            r"(?i)(?:funda[cç][aã]o|fundada em|founded)\s*[:\-]?\s*(\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4}|\d{2}/\d{4})",
        ),
    ];

    table
        .iter()
        .filter_map(|(field, kind, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(LabelPattern {
                field,
                kind: *kind,
                regex,
            }),
            Err(e) => {
                warn!("Skipping invalid label pattern for '{}': {}", field, e);
                None
            }
        })
        .collect()
}

/// Scan the raw text for labeled values, populating only confident matches.
/// Always returns at least the supplied name plus a description note.
pub fn fallback_extract(text: &str, supplied_name: &str) -> CandidateRecord {
    let mut record = CandidateRecord {
        name: supplied_name.to_string(),
        ..CandidateRecord::default()
    };

    let mut matched = 0usize;
    for pattern in label_patterns() {
        let Some(cap) = pattern.regex.captures(text) else {
            continue;
        };
        let Some(raw) = cap.get(1).map(|m| m.as_str().trim().to_string()) else {
            continue;
        };
        if let Some(value) = schema::coerce(&Value::String(raw), pattern.kind) {
            record.set(pattern.field, value);
            matched += 1;
        }
    }

    info!(
        "Fallback extraction for '{}': {} labeled fields matched",
        supplied_name, matched
    );

    if record.description.is_none() {
        // Carry a snippet of whatever the chain produced (for failed decks
        // this is the diagnostic placeholder) so the review queue sees it.
        let snippet = truncate_for_context(text.trim(), 400);
        record.description = Some(if snippet.is_empty() {
            format!(
                "Startup {} imported from pitch deck; automatic analysis unavailable - \
                 manual review required.",
                supplied_name
            )
        } else {
            format!(
                "Automatic analysis unavailable - manual review required. \
                 Extracted content:\n{}",
                snippet
            )
        });
    }

    record
}

// ============================================================================
// Helper functions
// ============================================================================

/// Parse LLM output as JSON, tolerating markdown code fences.
fn parse_llm_json<T: serde::de::DeserializeOwned>(response: &str) -> Result<T> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    serde_json::from_str(json_str).with_context(|| {
        format!(
            "Invalid JSON from model: {}",
            json_str.chars().take(200).collect::<String>()
        )
    })
}

/// Truncate to at most `max_chars` bytes without splitting a UTF-8 boundary.
fn truncate_for_context(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        text
    } else {
        let mut end = max_chars;
        while !text.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        &text[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_finds_labeled_fields() {
        let text = "Slide 3\nCEO: Maria Silva, Email: maria@x.com, Setor: sa\u{fa}de\nMRR: R$ 12.000";
        let record = fallback_extract(text, "HealthCo");

        assert_eq!(record.name, "HealthCo");
        assert_eq!(record.ceo_name.as_deref(), Some("Maria Silva"));
        assert_eq!(record.ceo_email.as_deref(), Some("maria@x.com"));
        assert_eq!(record.sector.as_deref(), Some("sa\u{fa}de"));
        assert_eq!(record.mrr, Some(12000.0));
    }

    #[test]
    fn fallback_never_invents_fields() {
        let text = "A beautiful deck about logistics with no contact details at all.";
        let record = fallback_extract(text, "Acme");

        assert_eq!(record.name, "Acme");
        assert!(record.ceo_name.is_none());
        assert!(record.ceo_email.is_none());
        assert!(record.mrr.is_none());
        // Terminal degradation still carries a description note.
        assert!(record.description.as_deref().unwrap().contains("manual review"));
    }

    #[test]
    fn fallback_reads_counts_and_dates() {
        let text = "Clientes: 1.250\nFunda\u{e7}\u{e3}o: 03/2021";
        let record = fallback_extract(text, "Acme");
        assert_eq!(record.client_count, Some(1250));
        assert_eq!(
            record.founding_date,
            Some(chrono::NaiveDate::from_ymd_opt(2021, 3, 1).unwrap())
        );
    }

    #[test]
    fn parse_llm_json_handles_fences() {
        let fenced = "```json\n{\"sector\": \"fintech\"}\n```";
        let value: Value = parse_llm_json(fenced).unwrap();
        assert_eq!(value["sector"], "fintech");

        let bare = "{\"sector\": \"fintech\"}";
        let value: Value = parse_llm_json(bare).unwrap();
        assert_eq!(value["sector"], "fintech");
    }

    #[test]
    fn parse_llm_json_rejects_garbage() {
        assert!(parse_llm_json::<Value>("the model said nothing useful").is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ol\u{e1} mundo";
        // Byte 3 falls inside the two-byte '\u{e1}'.
        let truncated = truncate_for_context(text, 3);
        assert!(truncated.len() <= 3);
        assert!(text.starts_with(truncated));
    }
}
