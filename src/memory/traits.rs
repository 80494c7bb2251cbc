//! Store contracts.
//!
//! Each store is an independently failing collaborator. Atomicity is only as
//! strong as a single call on one store; nothing here spans stores.

use async_trait::async_trait;

use super::types::{Adjacency, MemoryId, MemoryRecord, Metric, ScoredId};
use crate::error::Result;

/// Canonical text keyed by id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert new content and return the assigned id.
    ///
    /// Fails with `Error::DuplicateContent` if the exact content already exists.
    async fn insert(&self, content: &str) -> Result<MemoryId>;

    async fn get(&self, id: &MemoryId) -> Result<Option<MemoryRecord>>;

    /// Replace the content of an existing record.
    async fn update(&self, id: &MemoryId, content: &str) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    async fn clear_all(&self) -> Result<()>;
}

/// Similarity-searchable embeddings keyed by record id.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the vector for `id`. Replays are harmless.
    async fn upsert(&self, id: &MemoryId, vector: &[f32]) -> Result<()>;

    /// Up to `limit` hits, best first.
    async fn search(&self, vector: &[f32], limit: usize, metric: Metric) -> Result<Vec<ScoredId>>;

    async fn count(&self) -> Result<u64>;

    async fn clear_all(&self) -> Result<()>;

    /// Fixed vector length for this deployment.
    fn dimensions(&self) -> usize;
}

/// Symmetric adjacency between record ids.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Write both halves of `{a, b}`. Existing halves are left untouched.
    async fn add_symmetric_edge(&self, a: &MemoryId, b: &MemoryId) -> Result<()>;

    async fn neighbors(&self, id: &MemoryId) -> Result<Vec<MemoryId>>;

    async fn get_adjacency(&self) -> Result<Adjacency>;

    /// Number of unordered edges.
    async fn edge_count(&self) -> Result<u64>;

    async fn clear_all(&self) -> Result<()>;
}
