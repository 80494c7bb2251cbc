//! LLM clients and model capabilities.
//!
//! Provider HTTP clients implement [`LLMClient`]. The consolidation pipeline
//! never talks to them directly: it depends on the [`ReasoningModel`] and
//! [`EmbeddingModel`] capabilities, resolved once per stage by the
//! [`ModelRegistry`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use memweave_core::config::Settings;
//! use memweave_core::llm::{ChatMessage, ModelRegistry, Stage};
//!
//! let settings = Settings::from_json_file("settings.json")?;
//! let registry = ModelRegistry::from_settings(&settings)?;
//!
//! let decision = registry.stage(Stage::Decision)?;
//! let text = decision
//!     .model
//!     .complete_text(vec![ChatMessage::user("Hello")], decision.temperature)
//!     .await?;
//! ```

mod capability;
mod client;
mod registry;
mod types;

pub(crate) use capability::extract_json;
pub use capability::{
    collect_stream, generate_structured_as, ClientEmbeddingModel, ClientReasoningModel,
    EmbeddingModel, ReasoningModel, TextStream,
};
pub use client::{AnthropicClient, ClientConfig, LLMClient, OpenAIClient};
pub use registry::{ModelRegistry, Stage, StageModel};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker, EmbeddingRequest,
    EmbeddingResponse, ModelCosts, ModelPricing, ProviderKind, TokenUsage,
};
