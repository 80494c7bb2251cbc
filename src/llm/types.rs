//! LLM types for requests, responses, and pricing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire protocol spoken by a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    /// Any vendor exposing the OpenAI chat/embeddings API at a custom base URL
    #[serde(rename = "openai_compatible")]
    OpenAICompatible,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAI => write!(f, "openai"),
            Self::OpenAICompatible => write!(f, "openai_compatible"),
        }
    }
}

impl ProviderKind {
    /// Whether the provider serves an embeddings endpoint.
    pub fn supports_embeddings(&self) -> bool {
        !matches!(self, Self::Anthropic)
    }
}

/// Per-model token pricing in USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input_per_m: f64,
    #[serde(default)]
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// USD for the given token counts.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        const PER: f64 = 1_000_000.0;
        input_tokens as f64 * self.input_per_m / PER + output_tokens as f64 * self.output_per_m / PER
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One chat completion call.
///
/// `model` falls back to the client's default model when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: Option<String>,
    /// Out-of-band system prompt, placed before any system messages
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    /// Clamped to `0.0..=1.0`
    pub temperature: Option<f64>,
}

impl CompletionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Text returned by a completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Model that actually served the request
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    /// USD, when the client knows the model's pricing
    pub cost: Option<f64>,
}

/// Texts to embed in one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: Option<String>,
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub model: String,
    /// One vector per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    pub usage: TokenUsage,
}

/// Usage attributed to a single model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCosts {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD; calls with unknown pricing add nothing
    pub cost: f64,
}

impl ModelCosts {
    fn add(&mut self, usage: &TokenUsage, cost: Option<f64>) {
        self.requests += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost += cost.unwrap_or(0.0);
    }
}

/// Token and cost accounting keyed by model name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostTracker {
    by_model: BTreeMap<String, ModelCosts>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from one model call.
    pub fn record(&mut self, model: &str, usage: &TokenUsage, cost: Option<f64>) {
        self.by_model
            .entry(model.to_string())
            .or_default()
            .add(usage, cost);
    }

    pub fn model(&self, name: &str) -> Option<&ModelCosts> {
        self.by_model.get(name)
    }

    /// Per-model entries, sorted by model name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelCosts)> {
        self.by_model.iter().map(|(name, costs)| (name.as_str(), costs))
    }

    pub fn total_requests(&self) -> u64 {
        self.by_model.values().map(|c| c.requests).sum()
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.by_model.values().fold(TokenUsage::default(), |acc, c| TokenUsage {
            input_tokens: acc.input_tokens + c.input_tokens,
            output_tokens: acc.output_tokens + c.output_tokens,
        })
    }

    pub fn total_cost(&self) -> f64 {
        self.by_model.values().map(|c| c.cost).sum()
    }
}
