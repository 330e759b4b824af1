use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taxref_collector::app::enrich_use_case::EnrichUseCase;
use taxref_collector::app::ports::{HttpClientPort, HttpFailure, HttpFailureKind, HttpGetResult, ProgressReporter};
use taxref_collector::constants::{CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD};
use taxref_collector::error::TaxrefError;
use taxref_collector::storage::InMemoryRecordStore;
use taxref_collector::strategy::{IdentifierStrategy, NameSource, NameStrategy};
use taxref_collector::types::StoreRow;
use tokio_util::sync::CancellationToken;

type Responder = dyn Fn(&str) -> Result<HttpGetResult, HttpFailure> + Send + Sync;

/// Fake HTTP port that answers from a closure and records concurrency
struct ScriptedHttp {
    respond: Box<Responder>,
    latency: Duration,
    urls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedHttp {
    fn new<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Result<HttpGetResult, HttpFailure> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            latency: Duration::from_millis(5),
            urls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Trip `token` once `requests` requests have been answered
    fn cancel_after(mut self, requests: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((requests, token));
        self
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClientPort for ScriptedHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult, HttpFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        let answered = {
            let mut urls = self.urls.lock().unwrap();
            urls.push(url.to_string());
            urls.len()
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some((after, token)) = &self.cancel_after {
            if answered >= *after {
                token.cancel();
            }
        }
        (self.respond)(url)
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<(usize, usize)>>,
    finished: AtomicUsize,
}

impl RecordingProgress {
    fn events(&self) -> Vec<(usize, usize)> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        self.events.lock().unwrap().push((completed, total));
    }

    fn on_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn json_response(status: u16, body: Value) -> Result<HttpGetResult, HttpFailure> {
    Ok(HttpGetResult {
        status,
        bytes: body.to_string().into_bytes(),
        content_type: "application/json".to_string(),
    })
}

fn checklist_datasets(taxon_id: &str, name: &str) -> Value {
    json!({
        "offset": 0,
        "limit": 100,
        "endOfRecords": true,
        "results": [
            {"title": "Catalogue of Life Checklist", "_relatedTaxon": {"taxonID": "4QHKG", "scientificName": name}},
            {"title": "TAXREF", "_relatedTaxon": {"taxonID": taxon_id, "scientificName": name}}
        ]
    })
}

fn gbif_store(rows: &[(i64, Value)]) -> Arc<InMemoryRecordStore> {
    let store = InMemoryRecordStore::new(&["gbif_id", CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD]);
    for (row_id, id) in rows {
        store.insert_row(StoreRow::new(*row_id).with("gbif_id", id.clone()));
    }
    Arc::new(store)
}

fn gbif_strategy() -> IdentifierStrategy {
    IdentifierStrategy::new("http://gbif.test/api", "gbif_id", "TAXREF").unwrap()
}

fn name_strategy() -> NameStrategy {
    NameStrategy::new(
        "http://clb.test",
        "rank",
        NameSource::Field("scientific_name".to_string()),
        2008,
    )
    .unwrap()
}

#[tokio::test]
async fn test_gbif_id_fills_every_row_sharing_it() {
    let store = gbif_store(&[(1, json!("101")), (2, json!(101))]);
    let http = Arc::new(ScriptedHttp::new(|url| {
        assert!(url.contains("/species/101/checklistdatasets"), "unexpected url {}", url);
        json_response(200, checklist_datasets("60612", "Vulpes vulpes"))
    }));
    let progress = Arc::new(RecordingProgress::default());

    let report = EnrichUseCase::new(http.clone(), store.clone(), progress.clone())
        .run(&gbif_strategy())
        .await
        .unwrap();

    assert_eq!(http.urls().len(), 1);
    for row_id in [1, 2] {
        assert_eq!(store.value(row_id, CD_NOM_FIELD), Some(json!(60612)));
        assert_eq!(store.value(row_id, TAXREF_NAME_FIELD), Some(json!("Vulpes vulpes")));
        assert_eq!(
            store.value(row_id, TAXREF_URL_FIELD),
            Some(json!("https://inpn.mnhn.fr/espece/cd_nom/60612"))
        );
    }
    assert_eq!(store.changed_rows(), vec![1, 2]);
    assert_eq!(progress.events(), vec![(0, 1), (1, 1)]);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
    assert_eq!(report.updated_jobs, 1);
    assert_eq!(report.updated_records, 2);
}

#[tokio::test]
async fn test_one_request_in_flight_and_monotone_progress() {
    let rows: Vec<(i64, Value)> = (1..=6).map(|i| (i, json!(format!("{}", 100 + i)))).collect();
    let store = gbif_store(&rows);
    let http = Arc::new(
        ScriptedHttp::new(|url| {
            if url.contains("/species/103/") {
                json_response(500, json!({"error": "boom"}))
            } else {
                json_response(200, checklist_datasets("1", "Taxon"))
            }
        })
        .with_latency(Duration::from_millis(15)),
    );
    let progress = Arc::new(RecordingProgress::default());

    let report = EnrichUseCase::new(http.clone(), store, progress.clone())
        .run(&gbif_strategy())
        .await
        .unwrap();

    assert_eq!(http.max_in_flight.load(Ordering::SeqCst), 1);
    let events = progress.events();
    assert_eq!(events.first(), Some(&(0, 6)));
    assert_eq!(events.last(), Some(&(6, 6)));
    assert!(events.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 == w[1].1));
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
    assert_eq!(report.service_unavailable, 1);
    assert_eq!(report.updated_jobs, 5);
}

#[tokio::test]
async fn test_rank_is_normalized_before_querying() {
    let store = InMemoryRecordStore::new(&["rank", "scientific_name", CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD]);
    store.insert_row(StoreRow::new(1).with("rank", "Subtribe").with("scientific_name", "Rosa"));
    let store = Arc::new(store);
    let http = Arc::new(ScriptedHttp::new(|_| {
        json_response(
            200,
            json!({"total": 1, "result": [{"id": "196304", "usage": {"label": "Rosa L."}}]}),
        )
    }));

    EnrichUseCase::new(http.clone(), store.clone(), Arc::new(RecordingProgress::default()))
        .run(&name_strategy())
        .await
        .unwrap();

    let urls = http.urls();
    assert_eq!(urls.len(), 1);
    let url = reqwest::Url::parse(&urls[0]).unwrap();
    let param = |name: &str| url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned());
    assert_eq!(param("rank").as_deref(), Some("family"));
    assert_eq!(param("q").as_deref(), Some("Rosa"));
    assert_eq!(param("datasetKey").as_deref(), Some("2008"));
    assert_eq!(store.value(1, CD_NOM_FIELD), Some(json!(196304)));
    assert_eq!(store.value(1, TAXREF_NAME_FIELD), Some(json!("Rosa L.")));
}

#[tokio::test]
async fn test_ambiguous_and_empty_matches_leave_fields_untouched() {
    let store = InMemoryRecordStore::new(&["rank", "scientific_name", CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD]);
    store.insert_row(StoreRow::new(1).with("rank", "species").with("scientific_name", "Bellis"));
    store.insert_row(StoreRow::new(2).with("rank", "species").with("scientific_name", "Nothing"));
    let store = Arc::new(store);
    let before = store.snapshot();
    let http = Arc::new(ScriptedHttp::new(|url| {
        if url.contains("q=Bellis") {
            json_response(
                200,
                json!({"total": 2, "result": [{"id": "1", "usage": {"label": "a"}}, {"id": "2", "usage": {"label": "b"}}]}),
            )
        } else {
            json_response(200, json!({"total": 0, "result": []}))
        }
    }));
    let progress = Arc::new(RecordingProgress::default());

    let report = EnrichUseCase::new(http, store.clone(), progress.clone())
        .run(&name_strategy())
        .await
        .unwrap();

    assert_eq!(store.snapshot(), before);
    assert_eq!(store.field_writes(), 0);
    assert_eq!(report.ambiguous, 2);
    assert_eq!(report.completed_jobs, 2);
    assert_eq!(progress.events(), vec![(0, 2), (1, 2), (2, 2)]);
}

#[tokio::test]
async fn test_rows_without_queryable_values_are_skipped() {
    let store = InMemoryRecordStore::new(&["rank", "scientific_name", CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD]);
    store.insert_row(StoreRow::new(1).with("rank", "stateofmatter").with("scientific_name", "Biota"));
    store.insert_row(StoreRow::new(2).with("rank", "species"));
    store.insert_row(StoreRow::new(3).with("scientific_name", "Vulpes vulpes"));
    let store = Arc::new(store);
    let http = Arc::new(ScriptedHttp::new(|_| json_response(200, json!({"total": 0}))));
    let progress = Arc::new(RecordingProgress::default());

    let report = EnrichUseCase::new(http.clone(), store, progress.clone())
        .run(&name_strategy())
        .await
        .unwrap();

    assert!(http.urls().is_empty());
    assert_eq!(report.total_jobs, 0);
    assert_eq!(report.skipped_records, 3);
    assert_eq!(progress.events(), vec![(0, 0)]);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rerun_produces_the_same_store() {
    let store = gbif_store(&[(1, json!("101")), (2, json!("202"))]);
    let respond = |url: &str| {
        if url.contains("/species/101/") {
            json_response(200, checklist_datasets("60612", "Vulpes vulpes"))
        } else {
            json_response(200, checklist_datasets("60585", "Canis lupus"))
        }
    };

    EnrichUseCase::new(
        Arc::new(ScriptedHttp::new(respond)),
        store.clone(),
        Arc::new(RecordingProgress::default()),
    )
    .run(&gbif_strategy())
    .await
    .unwrap();
    let first = store.snapshot();

    EnrichUseCase::new(
        Arc::new(ScriptedHttp::new(respond)),
        store.clone(),
        Arc::new(RecordingProgress::default()),
    )
    .run(&gbif_strategy())
    .await
    .unwrap();

    assert_eq!(store.snapshot(), first);
}

#[tokio::test]
async fn test_slow_request_times_out_and_batch_continues() {
    let store = gbif_store(&[(1, json!("101"))]);
    let http = Arc::new(
        ScriptedHttp::new(|_| json_response(200, checklist_datasets("60612", "Vulpes vulpes")))
            .with_latency(Duration::from_millis(500)),
    );
    let progress = Arc::new(RecordingProgress::default());

    let report = EnrichUseCase::new(http, store.clone(), progress.clone())
        .with_timeout(Duration::from_millis(20))
        .run(&gbif_strategy())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.completed_jobs, 1);
    assert_eq!(store.value(1, CD_NOM_FIELD), Some(Value::Null));
    assert_eq!(progress.events(), vec![(0, 1), (1, 1)]);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_between_jobs_keeps_committed_rows() {
    let store = gbif_store(&[(1, json!("101")), (2, json!("202")), (3, json!("303"))]);
    let token = CancellationToken::new();
    let http = Arc::new(
        ScriptedHttp::new(|_| json_response(200, checklist_datasets("60612", "Vulpes vulpes")))
            .cancel_after(1, token.clone()),
    );
    let progress = Arc::new(RecordingProgress::default());

    let report = EnrichUseCase::new(http.clone(), store.clone(), progress.clone())
        .with_cancellation(token)
        .run(&gbif_strategy())
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(http.urls().len(), 1);
    assert_eq!(store.value(1, CD_NOM_FIELD), Some(json!(60612)));
    assert_eq!(store.value(2, CD_NOM_FIELD), Some(Value::Null));
    assert_eq!(progress.events(), vec![(0, 3), (1, 3)]);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
    assert_eq!(store.publish_count(), 1);
}

#[tokio::test]
async fn test_missing_output_field_fails_before_any_request() {
    let store = InMemoryRecordStore::new(&["gbif_id", CD_NOM_FIELD]);
    store.insert_row(StoreRow::new(1).with("gbif_id", "101"));
    let http = Arc::new(ScriptedHttp::new(|_| json_response(200, json!({}))));
    let progress = Arc::new(RecordingProgress::default());

    let err = EnrichUseCase::new(http.clone(), Arc::new(store), progress.clone())
        .run(&gbif_strategy())
        .await
        .unwrap_err();

    match err {
        TaxrefError::Schema { missing } => {
            assert_eq!(missing, vec![TAXREF_NAME_FIELD.to_string(), TAXREF_URL_FIELD.to_string()])
        }
        other => panic!("expected schema error, got {:?}", other),
    }
    assert!(http.urls().is_empty());
    assert!(progress.events().is_empty());
    assert_eq!(progress.finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_write_rolls_back_the_whole_job() {
    let store = InMemoryRecordStore::new(&["gbif_id", CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD])
        .with_failing_row(2);
    store.insert_row(StoreRow::new(1).with("gbif_id", "101"));
    store.insert_row(StoreRow::new(2).with("gbif_id", "101"));
    let store = Arc::new(store);
    let http = Arc::new(ScriptedHttp::new(|_| json_response(200, checklist_datasets("60612", "Vulpes vulpes"))));
    let progress = Arc::new(RecordingProgress::default());

    let result = EnrichUseCase::new(http, store.clone(), progress.clone())
        .run(&gbif_strategy())
        .await;

    assert!(matches!(result, Err(TaxrefError::Store(_))));
    assert_eq!(store.value(1, CD_NOM_FIELD), Some(Value::Null));
    assert_eq!(store.commit_count(), 0);
    assert!(!store.session_open());
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
    assert_eq!(store.publish_count(), 0);
}

#[tokio::test]
async fn test_failed_commit_closes_the_session() {
    let store = InMemoryRecordStore::new(&["gbif_id", CD_NOM_FIELD, TAXREF_NAME_FIELD, TAXREF_URL_FIELD])
        .with_failing_commit();
    store.insert_row(StoreRow::new(1).with("gbif_id", "101"));
    store.insert_row(StoreRow::new(2).with("gbif_id", "202"));
    let store = Arc::new(store);
    let http = Arc::new(ScriptedHttp::new(|_| json_response(200, checklist_datasets("60612", "Vulpes vulpes"))));
    let progress = Arc::new(RecordingProgress::default());

    let result = EnrichUseCase::new(http.clone(), store.clone(), progress.clone())
        .run(&gbif_strategy())
        .await;

    match result {
        Err(TaxrefError::Store(message)) => assert_eq!(message, "database is locked"),
        other => panic!("expected store error, got {:?}", other),
    }
    assert!(!store.session_open());
    assert_eq!(store.value(1, CD_NOM_FIELD), Some(Value::Null));
    assert!(store.changed_rows().is_empty());
    assert_eq!(http.urls().len(), 1);
    assert_eq!(progress.events(), vec![(0, 2)]);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transport_failure_does_not_stop_the_batch() {
    let store = gbif_store(&[(1, json!("101")), (2, json!("202"))]);
    let http = Arc::new(ScriptedHttp::new(|url| {
        if url.contains("/species/101/") {
            Err(HttpFailure::new(HttpFailureKind::Other, "connection reset"))
        } else {
            json_response(200, checklist_datasets("60585", "Canis lupus"))
        }
    }));

    let report = EnrichUseCase::new(http, store.clone(), Arc::new(RecordingProgress::default()))
        .run(&gbif_strategy())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(store.value(2, CD_NOM_FIELD), Some(json!(60585)));
}
