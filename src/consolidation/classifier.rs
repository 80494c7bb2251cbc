//! Model-driven classification of candidates.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::llm::{ModelRegistry, Stage};
use crate::memory::{MemoryId, MemoryRecord};

use super::decision::{Decision, RelevancePayload};
use super::normalize::{normalize, NormalizedView};
use super::prompts::PromptTemplates;
use super::response::{parse_response, parse_typed};

/// A decision together with the model's reasoning for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub reasoning: String,
    pub decision: Decision<MemoryId>,
}

/// Existing memories a new or updated memory should be linked to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelatedMemories {
    pub reasoning: String,
    pub ids: Vec<MemoryId>,
}

/// Asks the reasoning models which action to take and what to link.
///
/// Makes one model call per question and never retries; a malformed answer
/// is returned as a classification error.
pub struct DecisionClassifier {
    registry: Arc<ModelRegistry>,
    prompts: Arc<dyn PromptTemplates>,
}

impl DecisionClassifier {
    pub fn new(registry: Arc<ModelRegistry>, prompts: Arc<dyn PromptTemplates>) -> Self {
        Self { registry, prompts }
    }

    /// Choose one action for `candidate` given its normalized neighbours.
    #[instrument(skip(self, view), fields(neighbors = view.records.len()))]
    pub async fn classify(&self, candidate: &str, view: &NormalizedView) -> Result<Classification> {
        let stage = self.registry.stage(Stage::Decision)?;
        let messages = self.prompts.decision(candidate, view, Utc::now());

        let text = stage.model.complete_text(messages, stage.temperature).await?;
        let response = parse_response(&text)?;
        let decision = Decision::decode(response.payload)?.denormalize(&view.mapping);

        debug!(action = %decision.tag(), "Candidate classified");
        Ok(Classification {
            reasoning: response.reasoning,
            decision,
        })
    }

    /// Pick which of `neighbors` `content` is related to.
    ///
    /// With no neighbours there is nothing to choose from and no model call
    /// is made.
    pub async fn related(
        &self,
        stage: Stage,
        content: &str,
        neighbors: &[MemoryRecord],
    ) -> Result<RelatedMemories> {
        if neighbors.is_empty() {
            return Ok(RelatedMemories::default());
        }

        let view = normalize(neighbors)?;
        let stage_model = self.registry.stage(stage)?;
        let messages = self.prompts.relevance(content, &view);

        let text = stage_model
            .model
            .complete_text(messages, stage_model.temperature)
            .await?;
        let (reasoning, payload) = parse_typed::<RelevancePayload>(&text)?;
        let ids = payload.denormalize(&view.mapping);

        debug!(%stage, related = ids.len(), "Relevance classified");
        Ok(RelatedMemories { reasoning, ids })
    }
}
