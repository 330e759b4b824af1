use super::traits::RecordStore;
use crate::error::{Result, TaxrefError};
use crate::types::{FieldValues, RowId, StoreRow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory record store for development/testing
pub struct InMemoryRecordStore {
    schema: Vec<String>,
    rows: Arc<Mutex<BTreeMap<RowId, HashMap<String, Value>>>>,
    // Pending writes of the open edit session, None when no session is open
    session: Arc<Mutex<Option<BTreeMap<RowId, FieldValues>>>>,
    changed: Arc<Mutex<Vec<RowId>>>,
    field_writes: AtomicUsize,
    commits: AtomicUsize,
    published: AtomicUsize,
    failing_row: Option<RowId>,
    failing_commit: bool,
}

impl InMemoryRecordStore {
    pub fn new<S: AsRef<str>>(schema: &[S]) -> Self {
        Self {
            schema: schema.iter().map(|s| s.as_ref().to_string()).collect(),
            rows: Arc::new(Mutex::new(BTreeMap::new())),
            session: Arc::new(Mutex::new(None)),
            changed: Arc::new(Mutex::new(Vec::new())),
            field_writes: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            failing_row: None,
            failing_commit: false,
        }
    }

    /// Make every write to `row_id` fail, to exercise rollback paths
    pub fn with_failing_row(mut self, row_id: RowId) -> Self {
        self.failing_row = Some(row_id);
        self
    }

    /// Make every commit fail and leave the session open, like a busy SQLite COMMIT
    pub fn with_failing_commit(mut self) -> Self {
        self.failing_commit = true;
        self
    }

    pub fn insert_row(&self, row: StoreRow) {
        let mut rows = self.rows.lock().unwrap();
        let entry = rows.entry(row.row_id).or_default();
        for field in &self.schema {
            let value = row.values.get(field).cloned().unwrap_or(Value::Null);
            entry.insert(field.clone(), value);
        }
    }

    pub fn value(&self, row_id: RowId, field: &str) -> Option<Value> {
        let rows = self.rows.lock().unwrap();
        rows.get(&row_id).and_then(|r| r.get(field)).cloned()
    }

    /// Snapshot of every committed row, ordered by row id
    pub fn snapshot(&self) -> BTreeMap<RowId, HashMap<String, Value>> {
        self.rows.lock().unwrap().clone()
    }

    pub fn changed_rows(&self) -> Vec<RowId> {
        self.changed.lock().unwrap().clone()
    }

    /// Number of field values that reached committed state
    pub fn field_writes(&self) -> usize {
        self.field_writes.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    pub fn session_open(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn schema(&self) -> Result<Vec<String>> {
        Ok(self.schema.clone())
    }

    async fn read_all_records(&self, fields: &[String]) -> Result<Vec<StoreRow>> {
        let rows = self.rows.lock().unwrap();
        let records = rows
            .iter()
            .map(|(row_id, values)| StoreRow {
                row_id: *row_id,
                values: fields
                    .iter()
                    .filter_map(|f| values.get(f).map(|v| (f.clone(), v.clone())))
                    .collect(),
            })
            .collect();
        Ok(records)
    }

    async fn begin_edit_session(&self) -> Result<()> {
        let mut session = self.session.lock().unwrap();
        if session.is_some() {
            return Err(TaxrefError::Store("edit session already open".to_string()));
        }
        *session = Some(BTreeMap::new());
        Ok(())
    }

    async fn write_fields(&self, row_id: RowId, values: &FieldValues) -> Result<()> {
        if self.failing_row == Some(row_id) {
            return Err(TaxrefError::Store(format!("write rejected for row {}", row_id)));
        }
        if !self.rows.lock().unwrap().contains_key(&row_id) {
            return Err(TaxrefError::Store(format!("unknown row {}", row_id)));
        }
        if let Some(field) = values.keys().find(|f| !self.schema.contains(f)) {
            return Err(TaxrefError::Store(format!("unknown field {}", field)));
        }

        let mut session = self.session.lock().unwrap();
        let pending = session
            .as_mut()
            .ok_or_else(|| TaxrefError::Store("no edit session open".to_string()))?;
        pending
            .entry(row_id)
            .or_default()
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn commit_edit_session(&self) -> Result<()> {
        if self.failing_commit {
            return Err(TaxrefError::Store("database is locked".to_string()));
        }
        let pending = self
            .session
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TaxrefError::Store("no edit session open".to_string()))?;

        let mut rows = self.rows.lock().unwrap();
        for (row_id, values) in pending {
            if let Some(row) = rows.get_mut(&row_id) {
                self.field_writes.fetch_add(values.len(), Ordering::SeqCst);
                row.extend(values);
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed edit session");
        Ok(())
    }

    async fn rollback_edit_session(&self) -> Result<()> {
        let discarded = self.session.lock().unwrap().take();
        debug!(rows = discarded.map(|p| p.len()).unwrap_or(0), "Rolled back edit session");
        Ok(())
    }

    async fn notify_changed(&self, row_id: RowId) -> Result<()> {
        self.changed.lock().unwrap().push(row_id);
        Ok(())
    }

    async fn publish(&self) -> Result<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
