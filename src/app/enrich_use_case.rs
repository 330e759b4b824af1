use crate::app::ports::{HttpClientPort, HttpFailureKind, ProgressReporter};
use crate::constants::OUTPUT_FIELDS;
use crate::error::{Result, TaxrefError};
use crate::observability::metrics;
use crate::storage::RecordStore;
use crate::strategy::LookupStrategy;
use crate::types::{EnrichmentJob, TaxonomicResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Summary of one enrichment run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub updated_jobs: usize,
    pub updated_records: usize,
    pub not_found: usize,
    pub ambiguous: usize,
    pub service_unavailable: usize,
    /// Transport errors, timeouts and unreadable responses
    pub failed: usize,
    pub skipped_records: usize,
    pub cancelled: bool,
}

impl BatchReport {
    fn new(run_id: Uuid, strategy: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            strategy: strategy.to_string(),
            started_at: now,
            finished_at: now,
            total_jobs: 0,
            completed_jobs: 0,
            updated_jobs: 0,
            updated_records: 0,
            not_found: 0,
            ambiguous: 0,
            service_unavailable: 0,
            failed: 0,
            skipped_records: 0,
            cancelled: false,
        }
    }

    fn record_failure(&mut self, err: &TaxrefError) {
        match err {
            TaxrefError::NotFound => self.not_found += 1,
            TaxrefError::AmbiguousMatch { .. } => self.ambiguous += 1,
            TaxrefError::ServiceUnavailable { .. } => self.service_unavailable += 1,
            _ => self.failed += 1,
        }
    }
}

/// Job failure together with the response body that caused it, if any
struct JobFailure {
    error: TaxrefError,
    body: Option<String>,
}

impl From<TaxrefError> for JobFailure {
    fn from(error: TaxrefError) -> Self {
        Self { error, body: None }
    }
}

/// Drives one enrichment batch: reads the store once, then issues one lookup
/// at a time and writes each result back before moving on.
pub struct EnrichUseCase {
    http: Arc<dyn HttpClientPort>,
    store: Arc<dyn RecordStore>,
    progress: Arc<dyn ProgressReporter>,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl EnrichUseCase {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        store: Arc<dyn RecordStore>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            http,
            store,
            progress,
            request_timeout: Duration::from_secs(crate::constants::DEFAULT_TIMEOUT_SECONDS),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, strategy: &dyn LookupStrategy) -> Result<BatchReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("enrich_batch", run_id = %run_id, strategy = strategy.name());
        self.run_inner(run_id, strategy).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, strategy: &dyn LookupStrategy) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport::new(run_id, strategy.name());

        let schema = self.store.schema().await?;
        let input_fields = strategy.input_fields(&schema);
        let missing: Vec<String> = OUTPUT_FIELDS
            .iter()
            .map(|f| f.to_string())
            .chain(input_fields.iter().cloned())
            .filter(|f| !schema.iter().any(|c| c.eq_ignore_ascii_case(f)))
            .collect();
        if !missing.is_empty() {
            error!("Record store is missing fields: {:?}", missing);
            return Err(TaxrefError::Schema { missing });
        }

        let rows = self.store.read_all_records(&input_fields).await?;
        let plan = strategy.plan_jobs(&rows);
        for skipped in &plan.skipped {
            debug!(row_id = skipped.row_id, "Skipping record: {}", skipped.reason);
        }
        report.total_jobs = plan.total_jobs();
        report.skipped_records = plan.skipped.len();
        metrics::batch::records_skipped(strategy.name(), plan.skipped.len());
        info!(
            "Planned {} jobs from {} records ({} skipped)",
            report.total_jobs,
            rows.len(),
            report.skipped_records
        );

        self.progress.on_progress(0, report.total_jobs);

        let queue: VecDeque<EnrichmentJob> = plan.jobs.into();
        // A store failure ends the run but the progress sink is still closed
        let drained = match self.drain(strategy, queue, &mut report).await {
            Ok(()) => self.store.publish().await,
            Err(e) => Err(e),
        };
        self.progress.on_finished();
        drained?;

        report.finished_at = Utc::now();
        metrics::batch::records_updated(strategy.name(), report.updated_records);
        metrics::batch::completed(strategy.name(), started.elapsed().as_secs_f64());
        info!(
            "Batch finished: {}/{} jobs, {} records updated, {} not found, {} ambiguous",
            report.completed_jobs, report.total_jobs, report.updated_records, report.not_found, report.ambiguous
        );
        Ok(report)
    }

    async fn drain(
        &self,
        strategy: &dyn LookupStrategy,
        mut queue: VecDeque<EnrichmentJob>,
        report: &mut BatchReport,
    ) -> Result<()> {
        while let Some(job) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                warn!("Cancellation requested, abandoning {} remaining jobs", queue.len() + 1);
                report.cancelled = true;
                break;
            }

            let job_started = Instant::now();
            let outcome = self.lookup(strategy, &job).await;
            let outcome_label = match outcome {
                Ok(result) => {
                    self.apply(&job, &result).await?;
                    info!(key = %job.key, taxon_id = result.taxon_id, "Updated {} records", job.row_ids.len());
                    report.updated_jobs += 1;
                    report.updated_records += job.row_ids.len();
                    "updated"
                }
                Err(JobFailure { error, body }) => {
                    if !error.is_job_recoverable() {
                        return Err(error);
                    }
                    match (&error, body) {
                        (TaxrefError::NotFound | TaxrefError::AmbiguousMatch { .. }, Some(body)) => {
                            warn!(key = %job.key, kind = error.kind(), "{}; response: {}", error, body)
                        }
                        _ => warn!(key = %job.key, kind = error.kind(), "{}", error),
                    }
                    report.record_failure(&error);
                    error.kind()
                }
            };
            metrics::lookup::completed(strategy.name(), outcome_label, job_started.elapsed().as_secs_f64());

            report.completed_jobs += 1;
            self.progress.on_progress(report.completed_jobs, report.total_jobs);
        }
        Ok(())
    }

    /// One request for one job. Never retried.
    async fn lookup(
        &self,
        strategy: &dyn LookupStrategy,
        job: &EnrichmentJob,
    ) -> std::result::Result<TaxonomicResult, JobFailure> {
        let query = strategy.build_query(job)?;
        debug!(url = %query.url, "Requesting");

        let response = match tokio::time::timeout(self.request_timeout, self.http.get(query.url.as_str())).await {
            Err(_) => return Err(TaxrefError::Timeout(self.request_timeout.as_secs()).into()),
            Ok(Err(failure)) => {
                let error = match failure.kind {
                    HttpFailureKind::Timeout => TaxrefError::Timeout(self.request_timeout.as_secs()),
                    HttpFailureKind::Connect | HttpFailureKind::Other => TaxrefError::Transport(failure.message),
                };
                return Err(error.into());
            }
            Ok(Ok(response)) => response,
        };

        if response.is_service_unavailable() {
            return Err(JobFailure {
                error: TaxrefError::ServiceUnavailable { status: response.status },
                body: Some(response.body_text()),
            });
        }
        if !response.is_success() {
            return Err(JobFailure {
                error: TaxrefError::Transport(format!("unexpected HTTP status {}", response.status)),
                body: Some(response.body_text()),
            });
        }

        strategy.parse_response(&response.bytes).map_err(|error| JobFailure {
            error,
            body: Some(response.body_text()),
        })
    }

    /// All-or-nothing write of one result to every row of the job
    async fn apply(&self, job: &EnrichmentJob, result: &TaxonomicResult) -> Result<()> {
        let values = result.to_field_values();
        self.store.begin_edit_session().await?;
        for row_id in &job.row_ids {
            if let Err(e) = self.store.write_fields(*row_id, &values).await {
                error!(row_id, "Write failed, rolling back: {}", e);
                if let Err(rollback) = self.store.rollback_edit_session().await {
                    error!("Rollback failed: {}", rollback);
                }
                return Err(e);
            }
        }
        if let Err(e) = self.store.commit_edit_session().await {
            error!("Commit failed, rolling back: {}", e);
            if let Err(rollback) = self.store.rollback_edit_session().await {
                error!("Rollback failed: {}", rollback);
            }
            return Err(e);
        }
        for row_id in &job.row_ids {
            self.store.notify_changed(*row_id).await?;
        }
        Ok(())
    }
}
