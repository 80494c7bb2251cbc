//! Model registry: one reasoning model per pipeline stage plus the embedder.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{ModelConfig, Settings};
use crate::error::{Error, Result};

use super::capability::{ClientEmbeddingModel, ClientReasoningModel, EmbeddingModel, ReasoningModel};
use super::client::{AnthropicClient, ClientConfig, LLMClient, OpenAIClient};
use super::types::{CostTracker, ProviderKind};

/// Pipeline stage that issues model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Turning a conversation into candidate memories
    MemoryGeneration,
    /// Choosing the action for a candidate
    Decision,
    /// Relevance sub-classification after an insert
    Insertion,
    /// Relevance sub-classification after an addition
    Addition,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryGeneration => write!(f, "memory_generation"),
            Self::Decision => write!(f, "decision"),
            Self::Insertion => write!(f, "insertion"),
            Self::Addition => write!(f, "addition"),
        }
    }
}

/// A reasoning model bound to the temperature its stage runs at.
#[derive(Clone)]
pub struct StageModel {
    pub model: Arc<dyn ReasoningModel>,
    pub temperature: f64,
}

impl std::fmt::Debug for StageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageModel")
            .field("model", &self.model.model_id())
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Models resolved once from settings.
pub struct ModelRegistry {
    stages: HashMap<Stage, StageModel>,
    embedding: Arc<dyn EmbeddingModel>,
    costs: Arc<RwLock<CostTracker>>,
}

impl ModelRegistry {
    /// Registry with only an embedder; add stages with [`with_stage`](Self::with_stage).
    pub fn new(embedding: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            stages: HashMap::new(),
            embedding,
            costs: Arc::new(RwLock::new(CostTracker::new())),
        }
    }

    pub fn with_stage(
        mut self,
        stage: Stage,
        model: Arc<dyn ReasoningModel>,
        temperature: f64,
    ) -> Self {
        self.stages.insert(stage, StageModel { model, temperature });
        self
    }

    /// Build every client once. Stages sharing a model share its client.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let costs = Arc::new(RwLock::new(CostTracker::new()));
        let mut reasoning: HashMap<String, Arc<dyn ReasoningModel>> = HashMap::new();

        let stages = [
            (Stage::MemoryGeneration, &settings.stages.memory_generation),
            (Stage::Decision, &settings.stages.decision),
            (Stage::Insertion, &settings.stages.insertion),
            (Stage::Addition, &settings.stages.addition),
        ];

        let mut resolved = HashMap::new();
        for (stage, stage_config) in stages {
            let model = match reasoning.get(&stage_config.model) {
                Some(model) => Arc::clone(model),
                None => {
                    let model_config = settings.model(&stage_config.model).ok_or_else(|| {
                        Error::Config(format!("Unknown model `{}`", stage_config.model))
                    })?;
                    let client = build_client(model_config)?;
                    let model: Arc<dyn ReasoningModel> = Arc::new(ClientReasoningModel::new(
                        client,
                        &model_config.name,
                        Arc::clone(&costs),
                    ));
                    reasoning.insert(stage_config.model.clone(), Arc::clone(&model));
                    model
                }
            };
            resolved.insert(
                stage,
                StageModel {
                    model,
                    temperature: stage_config.temperature,
                },
            );
        }

        let embedding_config = &settings.embedding;
        let embedding_client = build_client_from(
            embedding_config.provider,
            ClientConfig::new(embedding_config.resolve_api_key()?)
                .with_default_model(&embedding_config.name)
                .with_timeout(embedding_config.timeout_secs)
                .with_pricing(embedding_config.pricing),
            embedding_config.base_url.as_deref(),
        )?;
        let embedding = Arc::new(ClientEmbeddingModel::new(
            embedding_client,
            &embedding_config.name,
            embedding_config.dimensions,
            embedding_config.pricing,
            Arc::clone(&costs),
        ));

        info!(
            models = reasoning.len(),
            embedding = %embedding_config.name,
            dimensions = embedding_config.dimensions,
            "Model registry built"
        );

        Ok(Self {
            stages: resolved,
            embedding,
            costs,
        })
    }

    /// Model and temperature for a stage.
    pub fn stage(&self, stage: Stage) -> Result<StageModel> {
        self.stages
            .get(&stage)
            .cloned()
            .ok_or_else(|| Error::Config(format!("No model registered for stage {}", stage)))
    }

    pub fn embedding(&self) -> Arc<dyn EmbeddingModel> {
        Arc::clone(&self.embedding)
    }

    /// Snapshot of token usage and cost across all registry models.
    pub async fn costs(&self) -> CostTracker {
        self.costs.read().await.clone()
    }
}

fn build_client(model: &ModelConfig) -> Result<Arc<dyn LLMClient>> {
    build_client_from(
        model.provider,
        ClientConfig::new(model.resolve_api_key()?)
            .with_default_model(&model.name)
            .with_timeout(model.timeout_secs)
            .with_pricing(model.pricing),
        model.base_url.as_deref(),
    )
}

fn build_client_from(
    provider: ProviderKind,
    mut config: ClientConfig,
    base_url: Option<&str>,
) -> Result<Arc<dyn LLMClient>> {
    if let Some(url) = base_url {
        config = config.with_base_url(url);
    }
    Ok(match provider {
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(config)?),
        ProviderKind::OpenAI => Arc::new(OpenAIClient::new(config)?),
        ProviderKind::OpenAICompatible => Arc::new(OpenAIClient::compatible(config)?),
    })
}
