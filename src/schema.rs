//! Fixed startup schema: the candidate record produced by synthesis and the
//! allow-list projection that turns untrusted model output into typed fields.
//!
//! The model's JSON is never merged wholesale into a record. Every field it may
//! populate is enumerated in [`FIELD_GUIDE`]; anything outside that list is
//! discarded, and every value is coerced to the field's declared type or
//! dropped. An empty string is never a substitute for "unknown".

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Count,
    Date,
}

/// Every field the synthesizer may populate, with its type and the semantic
/// description embedded in the extraction prompt. Prompt and projection are
/// driven from the same table so they cannot drift apart.
pub const FIELD_GUIDE: &[(&str, FieldKind, &str)] = &[
    ("name", FieldKind::Text, "startup name"),
    ("description", FieldKind::Text, "short description of the business"),
    ("website", FieldKind::Text, "company website URL"),
    ("sector", FieldKind::Text, "sector/industry (e.g. fintech, healthtech, saúde)"),
    ("businessModel", FieldKind::Text, "business model (e.g. SaaS B2B, marketplace)"),
    ("category", FieldKind::Text, "product category"),
    ("market", FieldKind::Text, "target market"),
    ("ceoName", FieldKind::Text, "name of the CEO or founder"),
    ("ceoEmail", FieldKind::Text, "CEO contact email"),
    ("ceoWhatsapp", FieldKind::Text, "CEO WhatsApp / phone number"),
    ("ceoLinkedin", FieldKind::Text, "CEO LinkedIn profile URL"),
    ("city", FieldKind::Text, "city where the startup is based"),
    ("state", FieldKind::Text, "state/region where the startup is based"),
    ("mrr", FieldKind::Number, "monthly recurring revenue, numeric"),
    ("accumulatedRevenueCurrentYear", FieldKind::Number, "revenue accumulated in the current year, numeric"),
    ("totalRevenueLastYear", FieldKind::Number, "total revenue in the last full year, numeric"),
    ("totalRevenuePreviousYear", FieldKind::Number, "total revenue in the year before last, numeric"),
    ("tam", FieldKind::Number, "total addressable market size, numeric"),
    ("sam", FieldKind::Number, "serviceable addressable market size, numeric"),
    ("som", FieldKind::Number, "serviceable obtainable market size, numeric"),
    ("clientCount", FieldKind::Count, "number of clients, integer"),
    ("partnerCount", FieldKind::Count, "number of partners, integer"),
    ("foundingDate", FieldKind::Date, "founding date, YYYY-MM-DD"),
    ("dueDate", FieldKind::Date, "next follow-up or due date, YYYY-MM-DD"),
    ("problemSolution", FieldKind::Text, "the problem addressed and the solution offered"),
    ("differentials", FieldKind::Text, "competitive differentials"),
    ("competitors", FieldKind::Text, "main competitors"),
    ("positivePoints", FieldKind::Text, "positive points noted in the deck"),
    ("attentionPoints", FieldKind::Text, "attention/risk points noted in the deck"),
    ("observations", FieldKind::Text, "free-form observations"),
    ("googleDriveLink", FieldKind::Text, "Google Drive link if mentioned"),
    ("originLead", FieldKind::Text, "lead origin channel"),
    ("referredBy", FieldKind::Text, "who referred the startup"),
    ("priority", FieldKind::Text, "priority label if stated"),
];

/// A typed value for a single schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Count(u32),
    Date(NaiveDate),
}

/// The not-yet-persisted, schema-shaped output of the synthesizer.
///
/// Every field is either a typed value or absent. `name` is the only field
/// guaranteed present (it always comes from the caller, not the model).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceo_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceo_whatsapp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceo_linkedin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulated_revenue_current_year: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_revenue_last_year: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_revenue_previous_year: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tam: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sam: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub som: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founding_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_solution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differentials: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competitors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positive_points: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_points: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_drive_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_lead: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl CandidateRecord {
    /// Minimal candidate used when synthesis fails entirely.
    pub fn name_only(name: &str, description: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.into()),
            ..Self::default()
        }
    }

    /// Project untrusted model output onto the fixed schema.
    ///
    /// Walks [`FIELD_GUIDE`] and pulls each field from the JSON object,
    /// coercing to the declared type. Keys outside the guide are ignored.
    /// The caller-supplied name always wins over a model-returned one.
    pub fn from_model_json(value: &Value, supplied_name: &str) -> Self {
        let mut record = Self {
            name: supplied_name.to_string(),
            ..Self::default()
        };

        let Some(obj) = value.as_object() else {
            return record;
        };

        for (field, kind, _) in FIELD_GUIDE {
            if *field == "name" {
                continue;
            }
            let Some(raw) = obj.get(*field) else { continue };
            if let Some(coerced) = coerce(raw, *kind) {
                record.set(field, coerced);
            }
        }

        record
    }

    /// Assign a coerced value to the named field. Type mismatches are
    /// impossible here because `coerce` already produced the field's kind.
    pub fn set(&mut self, field: &str, value: FieldValue) {
        match (field, value) {
            ("description", FieldValue::Text(v)) => self.description = Some(v),
            ("website", FieldValue::Text(v)) => self.website = Some(v),
            ("sector", FieldValue::Text(v)) => self.sector = Some(v),
            ("businessModel", FieldValue::Text(v)) => self.business_model = Some(v),
            ("category", FieldValue::Text(v)) => self.category = Some(v),
            ("market", FieldValue::Text(v)) => self.market = Some(v),
            ("ceoName", FieldValue::Text(v)) => self.ceo_name = Some(v),
            ("ceoEmail", FieldValue::Text(v)) => self.ceo_email = Some(v),
            ("ceoWhatsapp", FieldValue::Text(v)) => self.ceo_whatsapp = Some(v),
            ("ceoLinkedin", FieldValue::Text(v)) => self.ceo_linkedin = Some(v),
            ("city", FieldValue::Text(v)) => self.city = Some(v),
            ("state", FieldValue::Text(v)) => self.state = Some(v),
            ("mrr", FieldValue::Number(v)) => self.mrr = Some(v),
            ("accumulatedRevenueCurrentYear", FieldValue::Number(v)) => {
                self.accumulated_revenue_current_year = Some(v)
            }
            ("totalRevenueLastYear", FieldValue::Number(v)) => {
                self.total_revenue_last_year = Some(v)
            }
            ("totalRevenuePreviousYear", FieldValue::Number(v)) => {
                self.total_revenue_previous_year = Some(v)
            }
            ("tam", FieldValue::Number(v)) => self.tam = Some(v),
            ("sam", FieldValue::Number(v)) => self.sam = Some(v),
            ("som", FieldValue::Number(v)) => self.som = Some(v),
            ("clientCount", FieldValue::Count(v)) => self.client_count = Some(v),
            ("partnerCount", FieldValue::Count(v)) => self.partner_count = Some(v),
            ("foundingDate", FieldValue::Date(v)) => self.founding_date = Some(v),
            ("dueDate", FieldValue::Date(v)) => self.due_date = Some(v),
            ("problemSolution", FieldValue::Text(v)) => self.problem_solution = Some(v),
            ("differentials", FieldValue::Text(v)) => self.differentials = Some(v),
            ("competitors", FieldValue::Text(v)) => self.competitors = Some(v),
            ("positivePoints", FieldValue::Text(v)) => self.positive_points = Some(v),
            ("attentionPoints", FieldValue::Text(v)) => self.attention_points = Some(v),
            ("observations", FieldValue::Text(v)) => self.observations = Some(v),
            ("googleDriveLink", FieldValue::Text(v)) => self.google_drive_link = Some(v),
            ("originLead", FieldValue::Text(v)) => self.origin_lead = Some(v),
            ("referredBy", FieldValue::Text(v)) => self.referred_by = Some(v),
            ("priority", FieldValue::Text(v)) => self.priority = Some(v),
            _ => {}
        }
    }
}

/// JSON schema for the schema-constrained completion, generated from the guide.
pub fn response_json_schema() -> Value {
    let mut props = serde_json::Map::new();
    for (field, kind, desc) in FIELD_GUIDE {
        let ty = match kind {
            FieldKind::Text | FieldKind::Date => json!(["string", "null"]),
            FieldKind::Number | FieldKind::Count => json!(["number", "null"]),
        };
        props.insert(field.to_string(), json!({ "type": ty, "description": desc }));
    }
    json!({
        "type": "object",
        "properties": Value::Object(props),
        "additionalProperties": false
    })
}

/// Numbered field enumeration embedded in the synthesis prompt.
pub fn prompt_field_list() -> String {
    FIELD_GUIDE
        .iter()
        .enumerate()
        .map(|(i, (field, kind, desc))| {
            let ty = match kind {
                FieldKind::Text => "string",
                FieldKind::Number => "number",
                FieldKind::Count => "integer",
                FieldKind::Date => "date (YYYY-MM-DD)",
            };
            format!("{}. {} ({}): {}", i + 1, field, ty, desc)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Coerce a raw JSON value to the field's declared type, or drop it.
pub fn coerce(raw: &Value, kind: FieldKind) -> Option<FieldValue> {
    match kind {
        FieldKind::Text => coerce_text(raw).map(FieldValue::Text),
        FieldKind::Number => coerce_number(raw).map(FieldValue::Number),
        FieldKind::Count => coerce_number(raw)
            .filter(|n| *n >= 0.0 && n.is_finite())
            .map(|n| FieldValue::Count(n.round() as u32)),
        FieldKind::Date => coerce_date(raw).map(FieldValue::Date),
    }
}

fn coerce_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => {
            let trimmed = s.trim();
            if is_absent_marker(trimmed) {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn coerce_date(raw: &Value) -> Option<NaiveDate> {
    let s = raw.as_str()?.trim();
    if is_absent_marker(s) {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    // Month-only ("03/2021") resolves to the first of the month.
    if let Ok(date) = NaiveDate::parse_from_str(&format!("01/{}", s), "%d/%m/%Y") {
        return Some(date);
    }
    None
}

/// Strings the model uses to mean "unknown" are treated as absent.
fn is_absent_marker(s: &str) -> bool {
    s.is_empty() || matches!(s.to_ascii_lowercase().as_str(), "null" | "none" | "n/a" | "-")
}

/// Parse a human-formatted decimal, tolerating currency symbols, thousands
/// separators, and pt-BR decimal commas ("R$ 1.234,56" -> 1234.56).
pub fn parse_decimal(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .trim_start_matches("R$")
        .trim_start_matches("US$")
        .trim_start_matches('$')
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');
    let normalized = if has_dot && has_comma {
        // Rightmost separator is the decimal point.
        if cleaned.rfind(',') > cleaned.rfind('.') {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if has_comma {
        normalize_single_separator(&cleaned, ',')
    } else if has_dot {
        normalize_single_separator(&cleaned, '.')
    } else {
        cleaned
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Disambiguate a value with only one kind of separator. Repeated separators
/// are thousands marks; a lone separator followed by exactly three digits is
/// read as a thousands mark too ("50.000" -> 50000, "12,000" -> 12000) unless
/// the integer part is a bare zero ("0,500" stays 0.5).
fn normalize_single_separator(cleaned: &str, sep: char) -> String {
    if cleaned.matches(sep).count() > 1 {
        return cleaned.replace(sep, "");
    }
    let (int_part, frac_part) = cleaned.split_once(sep).unwrap_or((cleaned, ""));
    let int_digits = int_part.trim_start_matches('-');
    if frac_part.len() == 3 && int_digits != "0" && !int_digits.is_empty() {
        cleaned.replace(sep, "")
    } else {
        cleaned.replace(sep, ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_ignores_unknown_keys() {
        let raw = json!({
            "name": "ignored-model-name",
            "sector": "fintech",
            "totally_unknown": "payload",
            "__proto__": {"evil": true}
        });
        let record = CandidateRecord::from_model_json(&raw, "Acme");
        assert_eq!(record.name, "Acme");
        assert_eq!(record.sector.as_deref(), Some("fintech"));
    }

    #[test]
    fn numeric_fields_never_stay_strings() {
        let raw = json!({
            "mrr": "R$ 12.500,00",
            "tam": "1,000,000",
            "clientCount": "42",
            "sam": 250000.5
        });
        let record = CandidateRecord::from_model_json(&raw, "Acme");
        assert_eq!(record.mrr, Some(12500.0));
        assert_eq!(record.tam, Some(1_000_000.0));
        assert_eq!(record.client_count, Some(42));
        assert_eq!(record.sam, Some(250000.5));
    }

    #[test]
    fn empty_strings_are_absent_not_empty() {
        let raw = json!({
            "ceoName": "",
            "ceoEmail": "   ",
            "city": "null",
            "website": "N/A"
        });
        let record = CandidateRecord::from_model_json(&raw, "Acme");
        assert_eq!(record.ceo_name, None);
        assert_eq!(record.ceo_email, None);
        assert_eq!(record.city, None);
        assert_eq!(record.website, None);
    }

    #[test]
    fn missing_ceo_stays_absent() {
        // No CEO in the source text means no ceoName key from the model.
        let raw = json!({ "description": "A logistics marketplace" });
        let record = CandidateRecord::from_model_json(&raw, "Acme");
        assert!(record.ceo_name.is_none());
    }

    #[test]
    fn dates_parse_or_stay_absent() {
        let raw = json!({
            "foundingDate": "2021-03-15",
            "dueDate": "31/12/2026"
        });
        let record = CandidateRecord::from_model_json(&raw, "Acme");
        assert_eq!(
            record.founding_date,
            Some(NaiveDate::from_ymd_opt(2021, 3, 15).unwrap())
        );
        assert_eq!(
            record.due_date,
            Some(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap())
        );

        let bad = json!({ "foundingDate": "sometime in spring" });
        let record = CandidateRecord::from_model_json(&bad, "Acme");
        assert!(record.founding_date.is_none());
    }

    #[test]
    fn month_only_dates_resolve_to_first_of_month() {
        let raw = json!({ "foundingDate": "03/2021" });
        let record = CandidateRecord::from_model_json(&raw, "Acme");
        assert_eq!(
            record.founding_date,
            Some(NaiveDate::from_ymd_opt(2021, 3, 1).unwrap())
        );
    }

    #[test]
    fn parse_decimal_variants() {
        assert_eq!(parse_decimal("1234.56"), Some(1234.56));
        assert_eq!(parse_decimal("1.234,56"), Some(1234.56));
        assert_eq!(parse_decimal("1,234.56"), Some(1234.56));
        assert_eq!(parse_decimal("R$ 50.000"), Some(50000.0));
        assert_eq!(parse_decimal("2.500.000"), Some(2_500_000.0));
        assert_eq!(parse_decimal("12,000"), Some(12000.0));
        assert_eq!(parse_decimal("0,500"), Some(0.5));
        assert_eq!(parse_decimal("3,5"), Some(3.5));
        assert_eq!(parse_decimal("not a number"), None);
    }

    #[test]
    fn non_model_name_wins() {
        let raw = json!({ "name": "SomethingElse Inc" });
        let record = CandidateRecord::from_model_json(&raw, "HealthCo");
        assert_eq!(record.name, "HealthCo");
    }

    #[test]
    fn field_guide_matches_schema_generation() {
        let schema = response_json_schema();
        let props = schema["properties"].as_object().unwrap();
        assert_eq!(props.len(), FIELD_GUIDE.len());
        assert!(props.contains_key("ceoName"));
        assert!(props.contains_key("accumulatedRevenueCurrentYear"));
    }
}
