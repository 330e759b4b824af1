use crate::error::Result;
use crate::types::{FieldValues, RowId, StoreRow};
use async_trait::async_trait;

/// Narrow contract over the host's mutable observation table.
///
/// The store is not safe for concurrent writers: at most one edit session is
/// open at a time and only the enrichment driver opens it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Names of every field present on the table
    async fn schema(&self) -> Result<Vec<String>>;

    /// All rows, each restricted to `fields`
    async fn read_all_records(&self, fields: &[String]) -> Result<Vec<StoreRow>>;

    // Edit session
    async fn begin_edit_session(&self) -> Result<()>;
    async fn write_fields(&self, row_id: RowId, values: &FieldValues) -> Result<()>;
    async fn commit_edit_session(&self) -> Result<()>;
    async fn rollback_edit_session(&self) -> Result<()>;

    /// Tell the host a committed row changed (repaint, cache invalidation)
    async fn notify_changed(&self, row_id: RowId) -> Result<()>;

    /// Tell the host every record of the run is final and the table can be shown
    async fn publish(&self) -> Result<()>;
}
