//! Sequencing of per-store calls.
//!
//! Every mutation the executor performs goes through here. The coordinator
//! enforces ordering across stores but holds no lock over them and never
//! rolls anything back.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{AppliedMutation, Error, Result};
use crate::memory::{
    Adjacency, GraphStore, MemoryId, MemoryRecord, Metric, RecordStore, ScoredId,
    SqliteDatabase, SqliteGraphStore, SqliteRecordStore, SqliteVectorStore, StoreCounts,
    VectorStore,
};

use super::decision::ActionTag;
use super::retriever::select_with_backfill;

/// Default number of raw vector hits scanned per similarity search.
pub const DEFAULT_SEARCH_LIMIT: usize = 1000;

/// The single entry point to the record, vector and graph stores.
pub struct CrossStoreCoordinator {
    records: Arc<dyn RecordStore>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    search_limit: usize,
}

impl CrossStoreCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            records,
            vectors,
            graph,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    /// All three stores over one SQLite database.
    pub fn sqlite(db: SqliteDatabase, dimensions: usize) -> Self {
        Self::new(
            Arc::new(SqliteRecordStore::new(db.clone())),
            Arc::new(SqliteVectorStore::new(db.clone(), dimensions)),
            Arc::new(SqliteGraphStore::new(db)),
        )
    }

    /// Open the SQLite stores named by `settings.storage`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let db = match &settings.storage.database_path {
            Some(path) => SqliteDatabase::open(path)?,
            None => SqliteDatabase::in_memory()?,
        };
        Ok(Self::sqlite(db, settings.embedding.dimensions)
            .with_search_limit(settings.retrieval.search_limit))
    }

    /// Vector length the vector store accepts.
    pub fn dimensions(&self) -> usize {
        self.vectors.dimensions()
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.vectors.dimensions();
        if embedding.len() != expected {
            return Err(Error::InvalidDimension {
                expected,
                got: embedding.len(),
            });
        }
        Ok(())
    }

    /// Create a record, then its vector under the same id.
    ///
    /// If the vector write fails the record stays; the error lists it as
    /// applied so the caller can replay [`index_memory`](Self::index_memory).
    pub async fn insert_memory(&self, content: &str, embedding: &[f32]) -> Result<MemoryId> {
        self.check_dimensions(embedding)?;

        let id = self.records.insert(content).await?;
        info!(memory_id = %id, "Record inserted");

        if let Err(e) = self.vectors.upsert(&id, embedding).await {
            warn!(memory_id = %id, error = %e, "Vector write failed after record insert");
            return Err(e.in_execution(
                ActionTag::Insert,
                Some(id.clone()),
                &[AppliedMutation::RecordInserted { id }],
            ));
        }
        debug!(memory_id = %id, "Vector upserted");

        Ok(id)
    }

    /// Replace a record's content, then its vector.
    pub async fn update_memory_content(
        &self,
        id: &MemoryId,
        content: &str,
        embedding: &[f32],
    ) -> Result<()> {
        self.check_dimensions(embedding)?;

        self.records.update(id, content).await?;
        info!(memory_id = %id, "Record updated");

        if let Err(e) = self.vectors.upsert(id, embedding).await {
            warn!(memory_id = %id, error = %e, "Vector write failed after record update");
            return Err(e.in_execution(
                ActionTag::AdditionToExisting,
                Some(id.clone()),
                &[AppliedMutation::RecordUpdated { id: id.clone() }],
            ));
        }
        debug!(memory_id = %id, "Vector upserted");

        Ok(())
    }

    /// Write (or rewrite) the vector of an existing record. Safe to replay.
    pub async fn index_memory(&self, id: &MemoryId, embedding: &[f32]) -> Result<()> {
        self.check_dimensions(embedding)?;
        self.get_memory(id).await?;
        self.vectors.upsert(id, embedding).await
    }

    /// Create the symmetric edge `{a, b}`.
    ///
    /// Both records must exist. Returns `false` for a self-link, which is
    /// skipped.
    pub async fn link_memories(&self, a: &MemoryId, b: &MemoryId) -> Result<bool> {
        if a == b {
            debug!(memory_id = %a, "Skipping self-link");
            return Ok(false);
        }
        self.get_memory(a).await?;
        self.get_memory(b).await?;

        self.graph.add_symmetric_edge(a, b).await?;
        info!(a = %a, b = %b, "Memories linked");
        Ok(true)
    }

    pub async fn find_memory(&self, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        self.records.get(id).await
    }

    pub async fn get_memory(&self, id: &MemoryId) -> Result<MemoryRecord> {
        self.records
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound { id: id.clone() })
    }

    /// Ranked hits: everything at or above `threshold`, backfilled to
    /// `min_k` when the store has enough entries.
    pub async fn search_similar(
        &self,
        embedding: &[f32],
        min_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredId>> {
        let limit = self.search_limit.max(min_k);
        let hits = self.vectors.search(embedding, limit, Metric::Cosine).await?;
        Ok(select_with_backfill(hits, min_k, threshold))
    }

    pub async fn neighbors(&self, id: &MemoryId) -> Result<Vec<MemoryId>> {
        self.graph.neighbors(id).await
    }

    /// Every node within `hops` edges of `id`, nearest first, excluding `id`.
    pub async fn neighborhood(&self, id: &MemoryId, hops: usize) -> Result<Vec<MemoryId>> {
        let mut seen = HashSet::from([id.clone()]);
        let mut found = Vec::new();
        let mut frontier = VecDeque::from([(id.clone(), 0usize)]);

        while let Some((node, depth)) = frontier.pop_front() {
            if depth == hops {
                continue;
            }
            for neighbor in self.graph.neighbors(&node).await? {
                if seen.insert(neighbor.clone()) {
                    found.push(neighbor.clone());
                    frontier.push_back((neighbor, depth + 1));
                }
            }
        }

        Ok(found)
    }

    pub async fn adjacency(&self) -> Result<Adjacency> {
        self.graph.get_adjacency().await
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            records: self.records.count().await?,
            vectors: self.vectors.count().await?,
            edges: self.graph.edge_count().await?,
        })
    }

    /// Administrative reset of all three stores.
    pub async fn clear_all(&self) -> Result<()> {
        self.graph.clear_all().await?;
        self.vectors.clear_all().await?;
        self.records.clear_all().await?;
        warn!("All memory stores cleared");
        Ok(())
    }
}
