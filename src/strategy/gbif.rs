use super::{parse_base_url, taxon_id_from_json, LookupStrategy, QueryRequest};
use crate::constants::{GBIF_CHECKLIST_LIMIT, GBIF_STRATEGY};
use crate::error::{Result, TaxrefError};
use crate::types::{EnrichmentJob, JobPlan, LookupKey, SkippedRecord, StoreRow, TaxonomicResult};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;

/// Resolves GBIF species ids through the checklist datasets that cite them.
///
/// Every row sharing one id is resolved by a single request.
pub struct IdentifierStrategy {
    base_url: Url,
    id_field: String,
    reference_title: String,
}

#[derive(Debug, Deserialize)]
struct ChecklistDatasetsResponse {
    #[serde(default)]
    results: Option<Vec<ChecklistDatasetEntry>>,
}

#[derive(Debug, Deserialize)]
struct ChecklistDatasetEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "_relatedTaxon", default)]
    related_taxon: Option<RelatedTaxon>,
}

#[derive(Debug, Deserialize)]
struct RelatedTaxon {
    #[serde(rename = "taxonID", default)]
    taxon_id: serde_json::Value,
    #[serde(rename = "scientificName", default)]
    scientific_name: Option<String>,
}

impl IdentifierStrategy {
    pub fn new(base_url: &str, id_field: impl Into<String>, reference_title: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            id_field: id_field.into(),
            reference_title: reference_title.into(),
        })
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }
}

impl LookupStrategy for IdentifierStrategy {
    fn name(&self) -> &'static str {
        GBIF_STRATEGY
    }

    fn input_fields(&self, _schema: &[String]) -> Vec<String> {
        vec![self.id_field.clone()]
    }

    fn plan_jobs(&self, rows: &[StoreRow]) -> JobPlan {
        let mut plan = JobPlan::default();
        let mut index_by_id: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let Some(external_id) = row.text(&self.id_field) else {
                plan.skipped.push(SkippedRecord {
                    row_id: row.row_id,
                    reason: format!("no value in '{}'", self.id_field),
                });
                continue;
            };
            match index_by_id.get(&external_id) {
                Some(&i) => plan.jobs[i].row_ids.push(row.row_id),
                None => {
                    index_by_id.insert(external_id.clone(), plan.jobs.len());
                    plan.jobs.push(EnrichmentJob {
                        key: LookupKey::ExternalId(external_id),
                        row_ids: vec![row.row_id],
                    });
                }
            }
        }
        plan
    }

    fn build_query(&self, job: &EnrichmentJob) -> Result<QueryRequest> {
        let LookupKey::ExternalId(external_id) = &job.key else {
            return Err(TaxrefError::Config(format!("{} cannot query key {}", GBIF_STRATEGY, job.key)));
        };
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TaxrefError::Config(format!("'{}' cannot be used as a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["species", external_id.as_str(), "checklistdatasets"]);
        url.query_pairs_mut().append_pair("limit", GBIF_CHECKLIST_LIMIT);
        Ok(QueryRequest { url })
    }

    fn parse_response(&self, body: &[u8]) -> Result<TaxonomicResult> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(TaxrefError::NotFound);
        }
        let response: ChecklistDatasetsResponse = serde_json::from_slice(body)?;
        let entry = response
            .results
            .unwrap_or_default()
            .into_iter()
            .find(|e| e.title.as_deref() == Some(self.reference_title.as_str()))
            .ok_or(TaxrefError::NotFound)?;

        let related = entry.related_taxon.ok_or_else(|| {
            TaxrefError::MalformedResponse(format!("{} entry has no _relatedTaxon", self.reference_title))
        })?;
        let taxon_id = taxon_id_from_json(&related.taxon_id).ok_or_else(|| {
            TaxrefError::MalformedResponse(format!("unusable taxonID {}", related.taxon_id))
        })?;
        let display_name = related
            .scientific_name
            .ok_or_else(|| TaxrefError::MalformedResponse("missing scientificName".to_string()))?;

        Ok(TaxonomicResult::new(taxon_id, display_name))
    }
}
