//! Test doubles for the consolidation pipeline.

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::llm::{
    ChatMessage, EmbeddingModel, ModelRegistry, ReasoningModel, Stage, TextStream,
};
use crate::memory::{
    Adjacency, GraphStore, MemoryId, MemoryRecord, Metric, ScoredId, SqliteDatabase,
    SqliteGraphStore, SqliteRecordStore, SqliteVectorStore, VectorStore,
};

use super::cancel::CancelHandle;
use super::coordinator::CrossStoreCoordinator;

/// Wrap `payload` in the `<think>` + fenced JSON response format.
pub fn reply(reasoning: &str, payload: Value) -> String {
    format!("<think>{}</think>\n```json\n{}\n```", reasoning, payload)
}

enum Scripted {
    Text(String),
    Fail(String),
    Hang,
    /// Cancel the batch mid-call, then answer anyway.
    CancelThen(Arc<CancelHandle>, String),
}

/// Reasoning model that answers from a queue, one entry per call.
#[derive(Default)]
pub struct ScriptedReasoningModel {
    replies: Mutex<VecDeque<Scripted>>,
    received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedReasoningModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Text(text.into()));
        self
    }

    pub fn then_reply(self, reasoning: &str, payload: Value) -> Self {
        self.then_text(reply(reasoning, payload))
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()));
        self
    }

    /// Next call never completes.
    pub fn then_hang(self) -> Self {
        self.push(Scripted::Hang);
        self
    }

    pub fn then_cancel_and_reply(self, handle: Arc<CancelHandle>, reasoning: &str, payload: Value) -> Self {
        self.push(Scripted::CancelThen(handle, reply(reasoning, payload)));
        self
    }

    fn push(&self, entry: Scripted) {
        self.replies.lock().unwrap().push_back(entry);
    }

    pub fn calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Message lists received so far, in call order.
    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningModel for ScriptedReasoningModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        _temperature: f64,
    ) -> Result<TextStream> {
        self.received.lock().unwrap().push(messages);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Text(text)) => {
                Ok(Box::pin(stream::once(async move { Ok(text) })))
            }
            Some(Scripted::Fail(message)) => Err(Error::llm_api("scripted", message)),
            Some(Scripted::Hang) => futures::future::pending().await,
            Some(Scripted::CancelThen(handle, text)) => {
                handle.cancel();
                Ok(Box::pin(stream::once(async move { Ok(text) })))
            }
            None => Err(Error::LLM("scripted model has no replies left".to_string())),
        }
    }

    async fn generate_structured(
        &self,
        messages: Vec<ChatMessage>,
        _schema: &Value,
        temperature: f64,
    ) -> Result<Value> {
        let text = self.complete_text(messages, temperature).await?;
        Ok(serde_json::from_str(crate::llm::extract_json(&text))?)
    }
}

/// Deterministic embedder.
///
/// Texts registered with [`with_vector`](Self::with_vector) map to that
/// vector; anything else hashes to a stable pseudo-random unit-ish vector.
pub struct StaticEmbeddingModel {
    dimensions: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    fail: AtomicBool,
}

impl StaticEmbeddingModel {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
        self
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimensions);
        let mut counter = 0u32;
        while out.len() < self.dimensions {
            let digest = Sha256::new()
                .chain_update(text.as_bytes())
                .chain_update(counter.to_le_bytes())
                .finalize();
            for byte in digest {
                if out.len() == self.dimensions {
                    break;
                }
                out.push(byte as f32 / 255.0 - 0.5);
            }
            counter += 1;
        }
        out
    }
}

#[async_trait]
impl EmbeddingModel for StaticEmbeddingModel {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn get_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::llm_api("static", "embedding service unavailable"));
        }
        let vectors = self.vectors.lock().unwrap();
        Ok(texts
            .iter()
            .map(|text| vectors.get(text).cloned().unwrap_or_else(|| self.hashed(text)))
            .collect())
    }
}

/// Vector store that can be told to fail.
pub struct FaultyVectorStore {
    inner: SqliteVectorStore,
    fail_upserts: AtomicBool,
    fail_search: AtomicBool,
    /// Upserts that succeed before `fail_upserts` kicks in
    upserts_before_failure: AtomicUsize,
}

impl FaultyVectorStore {
    pub fn new(inner: SqliteVectorStore) -> Self {
        Self {
            inner,
            fail_upserts: AtomicBool::new(false),
            fail_search: AtomicBool::new(false),
            upserts_before_failure: AtomicUsize::new(0),
        }
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// Let `n` more upserts through, then fail the rest.
    pub fn fail_upserts_after(&self, n: usize) {
        self.upserts_before_failure.store(n, Ordering::SeqCst);
        self.fail_upserts(true);
    }

    pub fn fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for FaultyVectorStore {
    async fn upsert(&self, id: &MemoryId, vector: &[f32]) -> Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            let remaining = self.upserts_before_failure.load(Ordering::SeqCst);
            if remaining == 0 {
                return Err(Error::Storage("vector store unavailable".to_string()));
            }
            self.upserts_before_failure.store(remaining - 1, Ordering::SeqCst);
        }
        self.inner.upsert(id, vector).await
    }

    async fn search(&self, vector: &[f32], limit: usize, metric: Metric) -> Result<Vec<ScoredId>> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(Error::Storage("vector store unavailable".to_string()));
        }
        self.inner.search(vector, limit, metric).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }

    async fn clear_all(&self) -> Result<()> {
        self.inner.clear_all().await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Graph store that can be told to fail edge writes.
pub struct FaultyGraphStore {
    inner: SqliteGraphStore,
    fail_edges: AtomicBool,
}

impl FaultyGraphStore {
    pub fn new(inner: SqliteGraphStore) -> Self {
        Self {
            inner,
            fail_edges: AtomicBool::new(false),
        }
    }

    pub fn fail_edges(&self, fail: bool) {
        self.fail_edges.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GraphStore for FaultyGraphStore {
    async fn add_symmetric_edge(&self, a: &MemoryId, b: &MemoryId) -> Result<()> {
        if self.fail_edges.load(Ordering::SeqCst) {
            return Err(Error::Storage("graph store unavailable".to_string()));
        }
        self.inner.add_symmetric_edge(a, b).await
    }

    async fn neighbors(&self, id: &MemoryId) -> Result<Vec<MemoryId>> {
        self.inner.neighbors(id).await
    }

    async fn get_adjacency(&self) -> Result<Adjacency> {
        self.inner.get_adjacency().await
    }

    async fn edge_count(&self) -> Result<u64> {
        self.inner.edge_count().await
    }

    async fn clear_all(&self) -> Result<()> {
        self.inner.clear_all().await
    }
}

/// In-memory stores with fault switches, plus one scripted model per stage.
pub struct Harness {
    pub coordinator: Arc<CrossStoreCoordinator>,
    pub vectors: Arc<FaultyVectorStore>,
    pub graph: Arc<FaultyGraphStore>,
    pub embedder: Arc<StaticEmbeddingModel>,
    pub decision: Arc<ScriptedReasoningModel>,
    pub insertion: Arc<ScriptedReasoningModel>,
    pub addition: Arc<ScriptedReasoningModel>,
    pub generation: Arc<ScriptedReasoningModel>,
}

impl Harness {
    pub fn new(embedder: StaticEmbeddingModel) -> Self {
        Self::with_models(
            embedder,
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new(),
        )
    }

    pub fn with_models(
        embedder: StaticEmbeddingModel,
        decision: ScriptedReasoningModel,
        insertion: ScriptedReasoningModel,
        addition: ScriptedReasoningModel,
    ) -> Self {
        let db = SqliteDatabase::in_memory().unwrap();
        let dimensions = embedder.dimensions();
        let vectors = Arc::new(FaultyVectorStore::new(SqliteVectorStore::new(
            db.clone(),
            dimensions,
        )));
        let graph = Arc::new(FaultyGraphStore::new(SqliteGraphStore::new(db.clone())));
        let coordinator = Arc::new(CrossStoreCoordinator::new(
            Arc::new(SqliteRecordStore::new(db)),
            vectors.clone(),
            graph.clone(),
        ));

        Self {
            coordinator,
            vectors,
            graph,
            embedder: Arc::new(embedder),
            decision: Arc::new(decision),
            insertion: Arc::new(insertion),
            addition: Arc::new(addition),
            generation: Arc::new(ScriptedReasoningModel::new()),
        }
    }

    pub fn with_generation(mut self, generation: ScriptedReasoningModel) -> Self {
        self.generation = Arc::new(generation);
        self
    }

    pub fn registry(&self) -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::new(self.embedder.clone())
                .with_stage(Stage::MemoryGeneration, self.generation.clone(), 0.2)
                .with_stage(Stage::Decision, self.decision.clone(), 0.2)
                .with_stage(Stage::Insertion, self.insertion.clone(), 0.2)
                .with_stage(Stage::Addition, self.addition.clone(), 0.2),
        )
    }

    /// Seed a memory directly through the coordinator.
    pub async fn seed(&self, content: &str) -> MemoryRecord {
        let embedding = self.embedder.embed_one(content).await.unwrap();
        let id = self.coordinator.insert_memory(content, &embedding).await.unwrap();
        self.coordinator.get_memory(&id).await.unwrap()
    }
}
