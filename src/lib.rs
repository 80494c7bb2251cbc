//! # memweave-core
//!
//! Long-term memory consolidation for LLM agents.
//!
//! New candidate memories are compared against what is already stored, a
//! reasoning model decides whether each one is new, an extension, a
//! conflict, or noise, and the decision is applied across three stores: a
//! record store (canonical text), a vector store (embeddings), and a graph
//! store (symmetric links between related memories).
//!
//! ## Core Components
//!
//! - **Memory**: the three store contracts and their SQLite implementations
//! - **LLM**: reasoning and embedding capabilities behind a model registry
//! - **Consolidation**: retrieval, id normalization, classification, execution
//! - **Config**: settings tree loaded from JSON
//!
//! ## Example
//!
//! ```rust,ignore
//! use memweave_core::{CancelToken, ConsolidationPipeline, PipelineContext, Settings};
//!
//! let settings = Settings::from_json_file("memweave.json")?;
//! let pipeline = ConsolidationPipeline::new(&PipelineContext::from_settings(&settings)?);
//!
//! let report = pipeline
//!     .process_candidate("User enjoys hiking", &CancelToken::never())
//!     .await?;
//! println!("{}: {:?}", report.decision.tag(), report.outcome);
//! ```

pub mod config;
pub mod consolidation;
pub mod error;
pub mod llm;
pub mod memory;

// Re-exports for convenience
pub use config::{
    EmbeddingConfig, ModelConfig, PipelineConfig, RetrievalConfig, Settings, StageConfig,
    StageConfigs, StorageConfig,
};
pub use consolidation::{
    ActionExecutor, ActionTag, BatchReport, CancelHandle, CancelToken, CandidateFailure,
    CandidateReport, ConsolidationPipeline, CrossStoreCoordinator, Decision, DecisionClassifier,
    ExecutionOutcome, HoldForReview, MemoryExtractor, PendingConflict, PendingConflicts,
    PipelineContext, PromptTemplates, Resolution, ResolutionPolicy, SimilarityRetriever,
};
pub use error::{AppliedMutation, ClassificationFailure, Error, ErrorKind, Result};
pub use llm::{
    AnthropicClient, ClientConfig, EmbeddingModel, LLMClient, ModelRegistry, OpenAIClient,
    ProviderKind, ReasoningModel, Stage,
};
pub use memory::{
    GraphStore, MemoryId, MemoryRecord, RecordStore, SqliteDatabase, StoreCounts, VectorStore,
};
