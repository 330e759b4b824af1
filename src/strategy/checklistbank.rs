use super::{parse_base_url, taxon_id_from_json, LookupStrategy, QueryRequest};
use crate::constants::{CHECKLISTBANK_FACETS, CHECKLISTBANK_LIMIT, NAME_STRATEGY};
use crate::error::{Result, TaxrefError};
use crate::rank::{normalize_rank, NormalizedRank};
use crate::types::{EnrichmentJob, InputRecord, JobPlan, LookupKey, SkippedRecord, StoreRow, TaxonomicResult};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

/// Where the scientific name of a record is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSource {
    /// A single field holds the name for every record
    Field(String),
    /// One column per rank (`species`, `genus`, `family`, ...); the column
    /// named after the normalized rank holds the name
    RankColumn,
}

/// Resolves scientific names against the ChecklistBank copy of TAXREF.
pub struct NameStrategy {
    base_url: Url,
    rank_field: String,
    name_source: NameSource,
    dataset_key: u32,
}

#[derive(Debug, Deserialize)]
struct NameUsageSearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    result: Vec<NameUsageHit>,
}

#[derive(Debug, Deserialize)]
struct NameUsageHit {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    usage: Option<NameUsage>,
}

#[derive(Debug, Deserialize)]
struct NameUsage {
    #[serde(default)]
    label: Option<String>,
}

impl NameStrategy {
    pub fn new(base_url: &str, rank_field: impl Into<String>, name_source: NameSource, dataset_key: u32) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            rank_field: rank_field.into(),
            name_source,
            dataset_key,
        })
    }

    fn input_record(&self, row: &StoreRow) -> std::result::Result<InputRecord, String> {
        let raw_rank = row
            .text(&self.rank_field)
            .ok_or_else(|| format!("no value in '{}'", self.rank_field))?;
        let rank = match normalize_rank(&raw_rank) {
            NormalizedRank::Skip => return Err(format!("rank '{}' has no queryable name", raw_rank)),
            NormalizedRank::Query(rank) => rank,
        };
        let name_field = match &self.name_source {
            NameSource::Field(field) => field.as_str(),
            NameSource::RankColumn => rank.as_str(),
        };
        let name = row
            .text(name_field)
            .ok_or_else(|| format!("no name in '{}'", name_field))?;

        Ok(InputRecord {
            row_id: row.row_id,
            key: LookupKey::ScientificName { name, rank },
        })
    }
}

impl LookupStrategy for NameStrategy {
    fn name(&self) -> &'static str {
        NAME_STRATEGY
    }

    fn input_fields(&self, schema: &[String]) -> Vec<String> {
        let mut fields = vec![self.rank_field.clone()];
        match &self.name_source {
            NameSource::Field(field) => fields.push(field.clone()),
            // Every other column may be a rank column
            NameSource::RankColumn => fields.extend(
                schema
                    .iter()
                    .filter(|c| **c != self.rank_field)
                    .cloned(),
            ),
        }
        fields
    }

    fn plan_jobs(&self, rows: &[StoreRow]) -> JobPlan {
        let mut plan = JobPlan::default();
        for row in rows {
            match self.input_record(row) {
                Ok(record) => plan.jobs.push(EnrichmentJob {
                    key: record.key,
                    row_ids: vec![record.row_id],
                }),
                Err(reason) => {
                    debug!(row_id = row.row_id, %reason, "Skipping record");
                    plan.skipped.push(SkippedRecord {
                        row_id: row.row_id,
                        reason,
                    });
                }
            }
        }
        plan
    }

    fn build_query(&self, job: &EnrichmentJob) -> Result<QueryRequest> {
        let LookupKey::ScientificName { name, rank } = &job.key else {
            return Err(TaxrefError::Config(format!("{} cannot query key {}", NAME_STRATEGY, job.key)));
        };
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TaxrefError::Config(format!("'{}' cannot be used as a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["nameusage", "search"]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("content", "SCIENTIFIC_NAME")
                .append_pair("datasetKey", &self.dataset_key.to_string());
            for facet in CHECKLISTBANK_FACETS {
                query.append_pair("facet", facet);
            }
            query
                .append_pair("limit", CHECKLISTBANK_LIMIT)
                .append_pair("offset", "0")
                .append_pair("q", name)
                .append_pair("rank", &rank.to_lowercase())
                .append_pair("status", "accepted")
                .append_pair("type", "PREFIX");
        }
        Ok(QueryRequest { url })
    }

    fn parse_response(&self, body: &[u8]) -> Result<TaxonomicResult> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(TaxrefError::NotFound);
        }
        let response: NameUsageSearchResponse = serde_json::from_slice(body)?;
        if response.total != 1 {
            return Err(TaxrefError::AmbiguousMatch { total: response.total });
        }
        let hit = response
            .result
            .into_iter()
            .next()
            .ok_or_else(|| TaxrefError::MalformedResponse("total is 1 but result is empty".to_string()))?;

        let taxon_id = taxon_id_from_json(&hit.id)
            .ok_or_else(|| TaxrefError::MalformedResponse(format!("unusable id {}", hit.id)))?;
        let display_name = hit
            .usage
            .and_then(|u| u.label)
            .ok_or_else(|| TaxrefError::MalformedResponse("missing usage.label".to_string()))?;

        Ok(TaxonomicResult::new(taxon_id, display_name))
    }
}
