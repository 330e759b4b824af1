//! Lookup strategies: how store rows become jobs, how a job becomes one HTTP
//! request, and how one response becomes a taxonomic result.
//!
//! Strategies hold configuration only. Every method is a pure function of its
//! arguments so the driver can be exercised without network I/O.

pub mod checklistbank;
pub mod gbif;

pub use checklistbank::{NameSource, NameStrategy};
pub use gbif::IdentifierStrategy;

use crate::error::Result;
use crate::types::{EnrichmentJob, JobPlan, StoreRow, TaxonomicResult};
use reqwest::Url;

/// One outbound GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub url: Url,
}

impl QueryRequest {
    /// Value of the first query parameter named `name`
    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

pub trait LookupStrategy: Send + Sync {
    /// Strategy label used in logs, metrics and reports
    fn name(&self) -> &'static str;

    /// Store fields this strategy reads, given the fields the store has
    fn input_fields(&self, schema: &[String]) -> Vec<String>;

    /// Group rows into jobs, passing over rows that cannot be queried
    fn plan_jobs(&self, rows: &[StoreRow]) -> JobPlan;

    fn build_query(&self, job: &EnrichmentJob) -> Result<QueryRequest>;

    /// Interpret a successful response body. Unusable answers come back as
    /// `NotFound`, `AmbiguousMatch` or `MalformedResponse`.
    fn parse_response(&self, body: &[u8]) -> Result<TaxonomicResult>;
}

/// Service roots are configured without trailing slashes but users paste them anyway
pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|e| crate::error::TaxrefError::Config(format!("invalid base URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(crate::error::TaxrefError::Config(format!("'{}' cannot be used as a base URL", raw)));
    }
    Ok(url)
}

/// Taxon ids come back as JSON numbers or numeric strings depending on the service
pub(crate) fn taxon_id_from_json(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
