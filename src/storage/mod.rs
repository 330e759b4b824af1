pub mod in_memory;
pub mod sqlite;
pub mod traits;

pub use in_memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use traits::RecordStore;
