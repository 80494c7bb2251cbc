//! Runtime settings.
//!
//! `Settings` is built once (from JSON or programmatically), validated, and
//! then handed to the components that need it. Nothing here is cached
//! globally.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::llm::{ModelPricing, ProviderKind};

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reasoning models available to the stages
    pub models: Vec<ModelConfig>,
    pub embedding: EmbeddingConfig,
    pub stages: StageConfigs,
    pub retrieval: RetrievalConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

/// One reasoning model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name as sent to the provider; also the key stages refer to
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key, read at registry build time
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub pricing: ModelPricing,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            name: name.into(),
            provider,
            base_url: None,
            api_key: None,
            api_key_env: None,
            pricing: ModelPricing::default(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Resolve the API key from the literal value or the named environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        resolve_api_key(&self.name, self.api_key.as_deref(), self.api_key_env.as_deref())
    }
}

/// The embedding model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Fixed vector length for this deployment
    pub dimensions: usize,
    #[serde(default)]
    pub pricing: ModelPricing,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            name: "text-embedding-3-small".to_string(),
            provider: ProviderKind::OpenAI,
            base_url: None,
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            dimensions: 1536,
            pricing: ModelPricing::new(0.02, 0.0),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn resolve_api_key(&self) -> Result<String> {
        resolve_api_key(&self.name, self.api_key.as_deref(), self.api_key_env.as_deref())
    }
}

fn resolve_api_key(model: &str, literal: Option<&str>, env: Option<&str>) -> Result<String> {
    if let Some(key) = literal {
        return Ok(key.to_string());
    }
    match env {
        Some(var) => std::env::var(var).map_err(|_| {
            Error::Config(format!(
                "API key for model `{}` not found in environment variable {}",
                model, var
            ))
        }),
        None => Err(Error::Config(format!(
            "Model `{}` has neither api_key nor api_key_env",
            model
        ))),
    }
}

fn default_timeout_secs() -> u64 {
    120
}

/// Model and sampling temperature for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Name of an entry in `Settings::models`
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl StageConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

fn default_temperature() -> f64 {
    0.2
}

/// Per-stage model selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfigs {
    pub memory_generation: StageConfig,
    pub decision: StageConfig,
    pub insertion: StageConfig,
    pub addition: StageConfig,
}

impl StageConfigs {
    /// Route every stage to the same model.
    pub fn all(model: impl Into<String>) -> Self {
        let stage = StageConfig::new(model);
        Self {
            memory_generation: stage.clone(),
            decision: stage.clone(),
            insertion: stage.clone(),
            addition: stage,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &StageConfig)> {
        [
            ("memory_generation", &self.memory_generation),
            ("decision", &self.decision),
            ("insertion", &self.insertion),
            ("addition", &self.addition),
        ]
        .into_iter()
    }
}

/// Similarity retrieval knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum neighbours returned when the store has enough entries
    pub min_top_k: usize,
    /// Score at or above which every hit is returned
    pub threshold: f32,
    /// Raw vector hits scanned per query
    pub search_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_top_k: 10,
            threshold: 0.75,
            search_limit: 1000,
        }
    }
}

/// Batch execution knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candidates processed concurrently within one batch
    pub max_parallel: usize,
    /// Tool calls allowed during memory extraction
    pub max_tool_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            max_tool_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; `None` keeps everything in memory
    pub database_path: Option<PathBuf>,
}

impl Settings {
    /// Parse and validate settings from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid settings JSON: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read settings {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_stages(mut self, stages: StageConfigs) -> Self {
        self.stages = stages;
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

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.database_path = Some(path.into());
        self
    }

    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Check cross-field constraints. API keys are resolved later, when the
    /// model registry is built.
    pub fn validate(&self) -> Result<()> {
        for (stage, config) in self.stages.iter() {
            if self.model(&config.model).is_none() {
                return Err(Error::Config(format!(
                    "Stage `{}` refers to unknown model `{}`",
                    stage, config.model
                )));
            }
            if !(0.0..=1.0).contains(&config.temperature) {
                return Err(Error::Config(format!(
                    "Stage `{}` temperature {} outside [0, 1]",
                    stage, config.temperature
                )));
            }
        }

        for model in &self.models {
            if model.provider == ProviderKind::OpenAICompatible && model.base_url.is_none() {
                return Err(Error::Config(format!(
                    "Model `{}` is openai_compatible but has no base_url",
                    model.name
                )));
            }
        }

        if self.embedding.dimensions == 0 {
            return Err(Error::Config(
                "Embedding dimensions must be greater than zero".to_string(),
            ));
        }
        if !self.embedding.provider.supports_embeddings() {
            return Err(Error::Config(format!(
                "Provider {} does not serve embeddings",
                self.embedding.provider
            )));
        }

        let retrieval = &self.retrieval;
        if !(-1.0..=1.0).contains(&retrieval.threshold) {
            return Err(Error::Config(format!(
                "Retrieval threshold {} outside [-1, 1]",
                retrieval.threshold
            )));
        }
        if retrieval.search_limit < retrieval.min_top_k {
            return Err(Error::Config(format!(
                "search_limit ({}) must be at least min_top_k ({})",
                retrieval.search_limit, retrieval.min_top_k
            )));
        }

        if self.pipeline.max_parallel == 0 {
            return Err(Error::Config("max_parallel must be at least 1".to_string()));
        }

        Ok(())
    }
}
