//! End-to-end consolidation: retrieve, normalize, classify, execute.
//!
//! Candidates in a batch run concurrently up to `max_parallel`. Each one is
//! independent: a failure is reported for that candidate only, and results
//! come back in input order.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::config::{PipelineConfig, RetrievalConfig, Settings};
use crate::error::{Error, ErrorKind, Result};
use crate::llm::{ChatMessage, ModelRegistry};
use crate::memory::MemoryId;

use super::cancel::CancelToken;
use super::classifier::DecisionClassifier;
use super::coordinator::CrossStoreCoordinator;
use super::decision::Decision;
use super::executor::{ActionExecutor, ExecutionOutcome};
use super::extractor::{ExtractionOutcome, MemoryExtractor, ToolRegistry};
use super::normalize::normalize;
use super::prompts::{DefaultPrompts, PromptTemplates};
use super::resolution::{HoldForReview, ResolutionPolicy};
use super::retriever::SimilarityRetriever;

/// Shared collaborators the pipeline is assembled from.
#[derive(Clone)]
pub struct PipelineContext {
    pub coordinator: Arc<CrossStoreCoordinator>,
    pub registry: Arc<ModelRegistry>,
    pub prompts: Arc<dyn PromptTemplates>,
    pub policy: Arc<dyn ResolutionPolicy>,
    pub tools: ToolRegistry,
    pub retrieval: RetrievalConfig,
    pub pipeline: PipelineConfig,
}

impl PipelineContext {
    /// Default prompts, conflicts held for review, no tools.
    pub fn new(coordinator: Arc<CrossStoreCoordinator>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            coordinator,
            registry,
            prompts: Arc::new(DefaultPrompts),
            policy: Arc::new(HoldForReview::default()),
            tools: ToolRegistry::new(),
            retrieval: RetrievalConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Build stores and models from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let registry = ModelRegistry::from_settings(settings)?;
        let coordinator = CrossStoreCoordinator::from_settings(settings)?;
        Ok(Self::new(Arc::new(coordinator), Arc::new(registry))
            .with_retrieval(settings.retrieval)
            .with_pipeline(settings.pipeline))
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptTemplates>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn ResolutionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }
}

/// Everything that happened to one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub candidate: String,
    /// Neighbours shown to the decision model, best first
    pub neighbors: Vec<MemoryId>,
    pub reasoning: String,
    pub decision: Decision<MemoryId>,
    pub outcome: ExecutionOutcome,
}

/// A candidate that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateFailure {
    /// Position in the submitted batch
    pub index: usize,
    pub candidate: String,
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl CandidateFailure {
    fn new(index: usize, candidate: String, error: &Error) -> Self {
        Self {
            index,
            candidate,
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Per-candidate results, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub entries: Vec<std::result::Result<CandidateReport, CandidateFailure>>,
}

impl BatchReport {
    pub fn successes(&self) -> impl Iterator<Item = &CandidateReport> {
        self.entries.iter().filter_map(|e| e.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CandidateFailure> {
        self.entries.iter().filter_map(|e| e.as_ref().err())
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.is_ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of extracting and consolidating one conversation.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub extraction: ExtractionOutcome,
    pub batch: BatchReport,
}

pub struct ConsolidationPipeline {
    retriever: Arc<SimilarityRetriever>,
    classifier: Arc<DecisionClassifier>,
    executor: ActionExecutor,
    extractor: MemoryExtractor,
    max_parallel: usize,
}

impl ConsolidationPipeline {
    pub fn new(ctx: &PipelineContext) -> Self {
        let embedder = ctx.registry.embedding();
        let retriever = Arc::new(SimilarityRetriever::new(
            Arc::clone(&ctx.coordinator),
            Arc::clone(&embedder),
            ctx.retrieval,
        ));
        let classifier = Arc::new(DecisionClassifier::new(
            Arc::clone(&ctx.registry),
            Arc::clone(&ctx.prompts),
        ));
        let executor = ActionExecutor::new(
            Arc::clone(&ctx.coordinator),
            Arc::clone(&retriever),
            Arc::clone(&classifier),
            embedder,
            Arc::clone(&ctx.policy),
        );
        let extractor = MemoryExtractor::new(
            Arc::clone(&ctx.registry),
            Arc::clone(&ctx.prompts),
            ctx.pipeline.max_tool_iterations,
        )
        .with_tools(ctx.tools.clone());

        Self {
            retriever,
            classifier,
            executor,
            extractor,
            max_parallel: ctx.pipeline.max_parallel.max(1),
        }
    }

    /// Consolidate one candidate memory.
    #[instrument(skip_all, fields(candidate = %candidate))]
    pub async fn process_candidate(
        &self,
        candidate: &str,
        cancel: &CancelToken,
    ) -> Result<CandidateReport> {
        cancel.check()?;

        let retrieval = cancel.guard(self.retriever.retrieve(candidate)).await?;
        let view = normalize(retrieval.records())?;

        let classification = cancel
            .guard(self.classifier.classify(candidate, &view))
            .await?;
        cancel.check()?;

        let decision = classification.decision.clone();
        let outcome = self
            .executor
            .execute(candidate, classification.decision, cancel)
            .await?;

        info!(action = %decision.tag(), "Candidate consolidated");
        Ok(CandidateReport {
            candidate: candidate.to_string(),
            neighbors: retrieval.records().map(|r| r.id.clone()).collect(),
            reasoning: classification.reasoning,
            decision,
            outcome,
        })
    }

    /// Consolidate `candidates` concurrently. Never fails as a whole.
    pub async fn process_batch(&self, candidates: Vec<String>, cancel: CancelToken) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let tasks: Vec<_> = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| {
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                async move {
                    let result = async {
                        let _permit = semaphore
                            .acquire()
                            .await
                            .map_err(|e| Error::Internal(format!("Semaphore closed: {}", e)))?;
                        self.process_candidate(&candidate, &cancel).await
                    }
                    .await;

                    result.map_err(|e| {
                        warn!(index, kind = %e.kind(), error = %e, "Candidate failed");
                        CandidateFailure::new(index, candidate, &e)
                    })
                }
            })
            .collect();

        let report = BatchReport {
            entries: join_all(tasks).await,
        };
        info!(
            succeeded = report.success_count(),
            failed = report.failure_count(),
            "Batch consolidated"
        );
        report
    }

    /// Extract candidates from a conversation, then consolidate them.
    pub async fn ingest_conversation(
        &self,
        conversation: &[ChatMessage],
        cancel: CancelToken,
    ) -> Result<IngestReport> {
        let extraction = cancel.guard(self.extractor.extract(conversation)).await?;
        let batch = match &extraction {
            ExtractionOutcome::Memories(memories) => {
                self.process_batch(memories.clone(), cancel).await
            }
            ExtractionOutcome::NoResult { .. } => BatchReport::default(),
        };
        Ok(IngestReport { extraction, batch })
    }
}
