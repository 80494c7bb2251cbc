//! Memory stores.
//!
//! Three independently failing stores share one id space:
//!
//! - **Record store**: canonical memory text, unique by content
//! - **Vector store**: one embedding per record id, cosine searchable
//! - **Graph store**: symmetric adjacency between record ids
//!
//! ## Example
//!
//! ```rust,ignore
//! use memweave_core::memory::{SqliteDatabase, SqliteRecordStore, RecordStore};
//!
//! let db = SqliteDatabase::in_memory()?;
//! let records = SqliteRecordStore::new(db.clone());
//!
//! let id = records.insert("User enjoys hiking").await?;
//! let record = records.get(&id).await?;
//! ```

mod schema;
mod store;
mod traits;
mod types;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::{SqliteDatabase, SqliteGraphStore, SqliteRecordStore, SqliteVectorStore};
pub use traits::{GraphStore, RecordStore, VectorStore};
pub use types::{
    cosine_similarity, Adjacency, MemoryId, MemoryRecord, Metric, ScoredId, StoreCounts,
};
