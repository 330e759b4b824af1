use crate::constants::{self, CD_NOM_FIELD, MAX_TEXT_FIELD_CHARS, TAXREF_NAME_FIELD, TAXREF_URL_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Stable row identifier inside a record store
pub type RowId = i64;

/// Field name -> value map written to a single row
pub type FieldValues = BTreeMap<String, Value>;

/// One row as read from the record store, restricted to the requested fields
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub row_id: RowId,
    pub values: HashMap<String, Value>,
}

impl StoreRow {
    pub fn new(row_id: RowId) -> Self {
        Self {
            row_id,
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.values.insert(field.to_string(), value.into());
        self
    }

    /// Text rendering of a cell. Null, blank and non-scalar cells yield None.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.values.get(field)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(i.to_string())
                } else if let Some(f) = n.as_f64() {
                    // REAL columns hold integral ids as 101.0
                    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        Some((f as i64).to_string())
                    } else {
                        Some(f.to_string())
                    }
                } else {
                    Some(n.to_string())
                }
            }
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Strategy-specific lookup key of one input record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupKey {
    /// Arbitrary grouping key such as a GBIF species id
    ExternalId(String),
    /// Free-text name plus the (already normalized) rank to query with
    ScientificName { name: String, rank: String },
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupKey::ExternalId(id) => write!(f, "id:{}", id),
            LookupKey::ScientificName { name, rank } => write!(f, "{} ({})", name, rank),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub row_id: RowId,
    pub key: LookupKey,
}

/// One lookup request plus every row it resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentJob {
    pub key: LookupKey,
    pub row_ids: Vec<RowId>,
}

/// A record passed over without any network call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub row_id: RowId,
    pub reason: String,
}

/// Jobs built from the store rows, in the order they will be issued
#[derive(Debug, Clone, Default)]
pub struct JobPlan {
    pub jobs: Vec<EnrichmentJob>,
    pub skipped: Vec<SkippedRecord>,
}

impl JobPlan {
    pub fn total_jobs(&self) -> usize {
        self.jobs.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomicResult {
    pub taxon_id: i64,
    pub display_name: String,
    pub reference_url: String,
}

impl TaxonomicResult {
    pub fn new(taxon_id: i64, display_name: impl Into<String>) -> Self {
        Self {
            taxon_id,
            display_name: display_name.into(),
            reference_url: constants::inpn_taxon_url(taxon_id),
        }
    }

    /// The three output fields, with text values capped to the field width.
    pub fn to_field_values(&self) -> FieldValues {
        let mut values = FieldValues::new();
        values.insert(CD_NOM_FIELD.to_string(), Value::from(self.taxon_id));
        values.insert(
            TAXREF_NAME_FIELD.to_string(),
            Value::from(cap_text(TAXREF_NAME_FIELD, &self.display_name)),
        );
        values.insert(
            TAXREF_URL_FIELD.to_string(),
            Value::from(cap_text(TAXREF_URL_FIELD, &self.reference_url)),
        );
        values
    }
}

fn cap_text(field: &str, text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_FIELD_CHARS {
        return text.to_string();
    }
    warn!(field, length = text.chars().count(), "Truncating value to {} chars", MAX_TEXT_FIELD_CHARS);
    text.chars().take(MAX_TEXT_FIELD_CHARS).collect()
}
