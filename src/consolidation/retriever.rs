//! Similarity retrieval with minimum-count backfill.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::llm::EmbeddingModel;
use crate::memory::{MemoryId, MemoryRecord, ScoredId};

use super::coordinator::CrossStoreCoordinator;

/// Rank `hits` and keep every hit scoring at least `threshold`, or the
/// top `min_top_k` when fewer than that pass.
///
/// Never returns more than `hits.len()`.
pub fn select_with_backfill(mut hits: Vec<ScoredId>, min_top_k: usize, threshold: f32) -> Vec<ScoredId> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    let above = hits.iter().take_while(|hit| hit.score >= threshold).count();
    let keep = above.max(min_top_k.min(hits.len()));
    hits.truncate(keep);
    hits
}

/// A retrieved record with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedNeighbor {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Neighbours of a text, along with the embedding computed for it.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub embedding: Vec<f32>,
    pub neighbors: Vec<RetrievedNeighbor>,
}

impl Retrieval {
    pub fn records(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.neighbors.iter().map(|n| &n.record)
    }
}

/// Finds the memories most similar to a text.
pub struct SimilarityRetriever {
    coordinator: Arc<CrossStoreCoordinator>,
    embedder: Arc<dyn EmbeddingModel>,
    config: RetrievalConfig,
}

impl SimilarityRetriever {
    pub fn new(
        coordinator: Arc<CrossStoreCoordinator>,
        embedder: Arc<dyn EmbeddingModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            coordinator,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked ids for an embedding.
    pub async fn search(
        &self,
        embedding: &[f32],
        min_top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredId>> {
        self.coordinator
            .search_similar(embedding, min_top_k, threshold)
            .await
            .map_err(|e| e.in_retrieval())
    }

    /// Embed `text` and fetch its neighbours with the configured knobs.
    pub async fn retrieve(&self, text: &str) -> Result<Retrieval> {
        let embedding = self
            .embedder
            .embed_one(text)
            .await
            .map_err(|e| e.in_retrieval())?;
        let neighbors = self.neighbors_for(&embedding, None).await?;
        Ok(Retrieval {
            embedding,
            neighbors,
        })
    }

    /// Neighbour records for an embedding, best first.
    ///
    /// Hits whose record is gone are skipped; `exclude` drops one id (the
    /// memory being updated).
    pub async fn neighbors_for(
        &self,
        embedding: &[f32],
        exclude: Option<&MemoryId>,
    ) -> Result<Vec<RetrievedNeighbor>> {
        let hits = self
            .search(embedding, self.config.min_top_k, self.config.threshold)
            .await?;

        let mut neighbors = Vec::with_capacity(hits.len());
        for hit in hits {
            if exclude == Some(&hit.id) {
                continue;
            }
            match self
                .coordinator
                .find_memory(&hit.id)
                .await
                .map_err(|e| e.in_retrieval())?
            {
                Some(record) => neighbors.push(RetrievedNeighbor {
                    record,
                    score: hit.score,
                }),
                None => warn!(memory_id = %hit.id, "Vector entry has no record; skipping"),
            }
        }

        debug!(count = neighbors.len(), "Retrieved neighbours");
        Ok(neighbors)
    }
}
