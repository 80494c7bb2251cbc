//! Memory consolidation.
//!
//! A candidate memory flows through four stages:
//!
//! 1. [`SimilarityRetriever`] finds its nearest existing memories
//! 2. [`normalize`] renumbers them `0..n` for the model
//! 3. [`DecisionClassifier`] picks one of five [`Decision`]s
//! 4. [`ActionExecutor`] applies it through the [`CrossStoreCoordinator`]
//!
//! [`ConsolidationPipeline`] wires the stages together and runs batches.
//!
//! # Example
//!
//! ```rust,ignore
//! use memweave_core::{CancelToken, ConsolidationPipeline, PipelineContext, Settings};
//!
//! let settings = Settings::from_json_file("memweave.json")?;
//! let ctx = PipelineContext::from_settings(&settings)?;
//! let pipeline = ConsolidationPipeline::new(&ctx);
//!
//! let report = pipeline
//!     .process_batch(vec!["User enjoys hiking".into()], CancelToken::never())
//!     .await;
//! for failure in report.failures() {
//!     eprintln!("{}: {}", failure.candidate, failure.message);
//! }
//! ```

mod cancel;
mod classifier;
mod coordinator;
mod decision;
mod executor;
mod extractor;
mod normalize;
mod pipeline;
mod prompts;
mod proptest;
mod resolution;
mod response;
mod retriever;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::{CancelHandle, CancelToken};
pub use classifier::{Classification, DecisionClassifier, RelatedMemories};
pub use coordinator::{CrossStoreCoordinator, DEFAULT_SEARCH_LIMIT};
pub use decision::{ActionTag, ConflictingMemory, Decision, RelevancePayload, UpdatedMemory};
pub use executor::{ActionExecutor, ExecutionOutcome, UpdateOutcome};
pub use extractor::{
    AuxiliaryTool, ExtractionOutcome, MemoryExtractor, ToolDescriptor, ToolRegistry,
};
pub use normalize::{
    normalize, IdMapping, NormalizedId, NormalizedRecord, NormalizedView, DATETIME_FORMAT,
};
pub use pipeline::{
    BatchReport, CandidateFailure, CandidateReport, ConsolidationPipeline, IngestReport,
    PipelineContext,
};
pub use prompts::{DefaultPrompts, PromptTemplates};
pub use resolution::{HoldForReview, PendingConflict, PendingConflicts, Resolution, ResolutionPolicy};
pub use response::{parse_response, parse_typed, ModelResponse};
pub use retriever::{select_with_backfill, Retrieval, RetrievedNeighbor, SimilarityRetriever};
