//! Record materialization: candidate record in, committed startup row out.
//!
//! The insert payload is built locally (typed, provenance-tagged, audited) and
//! written through the [`RecordStore`] trait in a single statement. The
//! production store speaks Supabase PostgREST; tests substitute a mock.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::extract::ExtractedText;
use crate::pipeline::PipelineError;
use crate::schema::CandidateRecord;

/// A lifecycle status row from the board.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRef {
    pub id: i64,
    pub name: String,
}

/// The committed row, including the identifier assigned at persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStartup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub status_id: Option<i64>,
    #[serde(default)]
    pub created_by_ai: bool,
    #[serde(default)]
    pub ai_reviewed: bool,
    /// Remaining columns come back as-is from the store.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Storage seam for the materializer.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// List lifecycle statuses; the materializer picks the initial one.
    async fn list_statuses(&self) -> Result<Vec<StatusRef>>;

    /// Insert one startup row and return it with its assigned id.
    async fn insert_startup(&self, payload: Value) -> Result<PersistedStartup>;
}

/// Validate, tag, and persist a candidate record.
///
/// Status resolution is best-effort (no match, or even a lookup failure,
/// leaves the status null); only the insert itself can fail the invocation.
pub async fn materialize(
    store: &dyn RecordStore,
    settings: &Settings,
    candidate: &CandidateRecord,
    extraction: &ExtractedText,
) -> Result<PersistedStartup, PipelineError> {
    let status = resolve_initial_status(store, &settings.initial_status_label).await;
    let payload = build_insert_payload(candidate, status.as_ref(), extraction);

    let startup = store
        .insert_startup(payload)
        .await
        .map_err(|e| PipelineError::Persistence(format!("{:#}", e)))?;

    info!(
        "Persisted startup '{}' with id {} (status_id: {:?})",
        startup.name, startup.id, startup.status_id
    );
    Ok(startup)
}

/// Pick the status whose name matches the configured initial-stage label
/// (case-insensitive substring). Any failure degrades to no status.
async fn resolve_initial_status(store: &dyn RecordStore, label: &str) -> Option<StatusRef> {
    let statuses = match store.list_statuses().await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!("Status lookup failed, inserting without status: {:#}", e);
            return None;
        }
    };

    let needle = label.to_lowercase();
    let found = statuses
        .into_iter()
        .find(|s| s.name.to_lowercase().contains(&needle));
    if found.is_none() {
        warn!("No status matching '{}'; inserting without status", label);
    }
    found
}

/// Build the single-row insert payload from the candidate.
///
/// Currency-like numerics are stringified as decimals to keep precision in
/// the store's numeric columns; absent fields become explicit nulls;
/// provenance flags and the audit blob are stamped here.
pub fn build_insert_payload(
    candidate: &CandidateRecord,
    status: Option<&StatusRef>,
    extraction: &ExtractedText,
) -> Value {
    let text_hash = {
        let mut hasher = Sha256::new();
        hasher.update(extraction.text.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    let audit = json!({
        "candidate": candidate,
        "text_length": extraction.text_length,
        "extraction_method": extraction.strategy.as_str(),
        "text_sha256": text_hash,
        "pipeline_version": env!("CARGO_PKG_VERSION"),
    });

    debug!(
        "Insert payload for '{}': strategy={}, {} chars extracted",
        candidate.name,
        extraction.strategy.as_str(),
        extraction.text_length
    );

    json!({
        "name": candidate.name,
        "description": candidate.description,
        "website": candidate.website,
        "sector": candidate.sector,
        "business_model": candidate.business_model,
        "category": candidate.category,
        "market": candidate.market,
        "ceo_name": candidate.ceo_name,
        "ceo_email": candidate.ceo_email,
        "ceo_whatsapp": candidate.ceo_whatsapp,
        "ceo_linkedin": candidate.ceo_linkedin,
        "city": candidate.city,
        "state": candidate.state,
        "mrr": decimal_string(candidate.mrr),
        "accumulated_revenue_current_year": decimal_string(candidate.accumulated_revenue_current_year),
        "total_revenue_last_year": decimal_string(candidate.total_revenue_last_year),
        "total_revenue_previous_year": decimal_string(candidate.total_revenue_previous_year),
        "tam": decimal_string(candidate.tam),
        "sam": decimal_string(candidate.sam),
        "som": decimal_string(candidate.som),
        "client_count": candidate.client_count,
        "partner_count": candidate.partner_count,
        "founding_date": candidate.founding_date,
        "due_date": candidate.due_date,
        "problem_solution": candidate.problem_solution,
        "differentials": candidate.differentials,
        "competitors": candidate.competitors,
        "positive_points": candidate.positive_points,
        "attention_points": candidate.attention_points,
        "observations": candidate.observations,
        "google_drive_link": candidate.google_drive_link,
        "origin_lead": candidate.origin_lead,
        "referred_by": candidate.referred_by,
        "priority": candidate.priority,
        "status_id": status.map(|s| s.id),
        "created_by_ai": true,
        "ai_reviewed": false,
        "ai_extraction_metadata": audit,
    })
}

/// Decimal columns take strings so float representation never leaks in.
fn decimal_string(value: Option<f64>) -> Value {
    match value {
        Some(v) => Value::String(format!("{:.2}", v)),
        None => Value::Null,
    }
}

// ============================================================================
// Supabase store
// ============================================================================

/// PostgREST-backed store.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseStore {
    /// Create a store from `SUPABASE_URL` and `SUPABASE_SERVICE_ROLE_KEY`.
    pub fn from_env(client: Client) -> Result<Self> {
        let base_url =
            std::env::var("SUPABASE_URL").map_err(|_| anyhow!("SUPABASE_URL not set"))?;
        let service_role_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map_err(|_| anyhow!("SUPABASE_SERVICE_ROLE_KEY not set"))?;

        Ok(Self {
            client,
            base_url,
            service_role_key,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }
}

#[async_trait::async_trait]
impl RecordStore for SupabaseStore {
    async fn list_statuses(&self) -> Result<Vec<StatusRef>> {
        let url = format!("{}/rest/v1/statuses?select=id,name", self.base_url);

        let resp = self.authed(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to list statuses: {} - {}", status, text));
        }

        Ok(resp.json().await?)
    }

    async fn insert_startup(&self, payload: Value) -> Result<PersistedStartup> {
        let url = format!("{}/rest/v1/startups", self.base_url);

        let resp = self
            .authed(self.client.post(&url))
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to insert startup: {} - {}", status, text));
        }

        // PostgREST returns the inserted rows as an array.
        let mut rows: Vec<PersistedStartup> = resp.json().await?;
        rows.pop()
            .ok_or_else(|| anyhow!("Insert returned no representation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::StrategyKind;
    use std::sync::Mutex;

    fn extraction() -> ExtractedText {
        ExtractedText {
            text: "CEO: Maria Silva".to_string(),
            strategy: StrategyKind::Vision,
            text_length: 16,
        }
    }

    fn candidate() -> CandidateRecord {
        let mut c = CandidateRecord {
            name: "HealthCo".to_string(),
            ..CandidateRecord::default()
        };
        c.ceo_name = Some("Maria Silva".to_string());
        c.mrr = Some(12500.0);
        c.client_count = Some(42);
        c
    }

    #[test]
    fn payload_types_and_provenance() {
        let payload = build_insert_payload(&candidate(), None, &extraction());

        assert_eq!(payload["name"], "HealthCo");
        assert_eq!(payload["ceo_name"], "Maria Silva");
        // Currency-like numerics go out as decimal strings, counts as numbers.
        assert_eq!(payload["mrr"], "12500.00");
        assert_eq!(payload["client_count"], 42);
        // Absent fields are explicit nulls, never omitted or empty strings.
        assert!(payload["ceo_email"].is_null());
        assert!(payload["tam"].is_null());
        assert!(payload["status_id"].is_null());
        // Provenance tagging.
        assert_eq!(payload["created_by_ai"], true);
        assert_eq!(payload["ai_reviewed"], false);
        let audit = &payload["ai_extraction_metadata"];
        assert_eq!(audit["extraction_method"], "vision");
        assert_eq!(audit["text_length"], 16);
        assert_eq!(audit["candidate"]["ceoName"], "Maria Silva");
    }

    #[test]
    fn payload_includes_resolved_status() {
        let status = StatusRef {
            id: 7,
            name: "Entrada".to_string(),
        };
        let payload = build_insert_payload(&candidate(), Some(&status), &extraction());
        assert_eq!(payload["status_id"], 7);
    }

    /// Store mock that records payloads and scripts its replies.
    struct MockStore {
        statuses: Result<Vec<StatusRef>, String>,
        inserted: Mutex<Vec<Value>>,
    }

    #[async_trait::async_trait]
    impl RecordStore for MockStore {
        async fn list_statuses(&self) -> Result<Vec<StatusRef>> {
            match &self.statuses {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow!("{}", e)),
            }
        }

        async fn insert_startup(&self, payload: Value) -> Result<PersistedStartup> {
            self.inserted.lock().unwrap().push(payload.clone());
            Ok(PersistedStartup {
                id: 99,
                name: payload["name"].as_str().unwrap_or_default().to_string(),
                status_id: payload["status_id"].as_i64(),
                created_by_ai: true,
                ai_reviewed: false,
                fields: Map::new(),
            })
        }
    }

    #[tokio::test]
    async fn status_matched_case_insensitively() {
        let store = MockStore {
            statuses: Ok(vec![
                StatusRef { id: 1, name: "Aprovada".to_string() },
                StatusRef { id: 2, name: "ENTRADA DE LEADS".to_string() },
            ]),
            inserted: Mutex::new(Vec::new()),
        };
        let settings = Settings::from_env().unwrap();

        let startup = materialize(&store, &settings, &candidate(), &extraction())
            .await
            .unwrap();
        assert_eq!(startup.status_id, Some(2));
    }

    #[tokio::test]
    async fn status_lookup_failure_degrades_to_null() {
        let store = MockStore {
            statuses: Err("connection refused".to_string()),
            inserted: Mutex::new(Vec::new()),
        };
        let settings = Settings::from_env().unwrap();

        let startup = materialize(&store, &settings, &candidate(), &extraction())
            .await
            .unwrap();
        assert_eq!(startup.status_id, None);
        assert_eq!(store.inserted.lock().unwrap().len(), 1);
    }
}
