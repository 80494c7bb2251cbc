//! Capability interfaces the consolidation pipeline depends on.
//!
//! Vendors are chosen once when the [`ModelRegistry`](super::ModelRegistry)
//! is built; callers only see these traits.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

use super::client::LLMClient;
use super::types::{ChatMessage, CompletionRequest, CostTracker, EmbeddingRequest, ModelPricing};

/// Stream of response text chunks.
pub type TextStream = BoxStream<'static, Result<String>>;

/// A chat model that can reason over an ordered message list.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    /// Model identifier, for logs and cost accounting.
    fn model_id(&self) -> &str;

    /// Stream the response text.
    async fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
    ) -> Result<TextStream>;

    /// Ask for a JSON value matching `schema`.
    async fn generate_structured(
        &self,
        messages: Vec<ChatMessage>,
        schema: &Value,
        temperature: f64,
    ) -> Result<Value>;

    /// Full response text.
    async fn complete_text(&self, messages: Vec<ChatMessage>, temperature: f64) -> Result<String> {
        let stream = self.stream_completion(messages, temperature).await?;
        collect_stream(stream).await
    }
}

/// Typed wrapper over [`ReasoningModel::generate_structured`].
pub async fn generate_structured_as<T: DeserializeOwned>(
    model: &dyn ReasoningModel,
    messages: Vec<ChatMessage>,
    schema: &Value,
    temperature: f64,
) -> Result<T> {
    let value = model.generate_structured(messages, schema, temperature).await?;
    Ok(serde_json::from_value(value)?)
}

/// Concatenate every chunk of a text stream.
pub async fn collect_stream(mut stream: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}

/// A model that turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Vector length produced by this model.
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn get_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text, checking the vector length.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.get_embeddings(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::LLM("Embedding response was empty".to_string()))?;
        if vector.len() != self.dimensions() {
            return Err(Error::InvalidDimension {
                expected: self.dimensions(),
                got: vector.len(),
            });
        }
        Ok(vector)
    }
}

/// Extract JSON from a response that may contain markdown or other text.
pub(crate) fn extract_json(response: &str) -> &str {
    if let Some(start) = response.find("```json") {
        let content_start = start + 7;
        if let Some(end) = response[content_start..].find("```") {
            return response[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return &response[start..=end];
            }
        }
    }

    response.trim()
}

/// [`ReasoningModel`] backed by an [`LLMClient`], recording usage as it goes.
pub struct ClientReasoningModel {
    client: Arc<dyn LLMClient>,
    model: String,
    costs: Arc<RwLock<CostTracker>>,
    max_tokens: Option<u32>,
}

impl ClientReasoningModel {
    pub fn new(
        client: Arc<dyn LLMClient>,
        model: impl Into<String>,
        costs: Arc<RwLock<CostTracker>>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            costs,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f64) -> Result<String> {
        let mut request = CompletionRequest::new()
            .with_model(&self.model)
            .with_messages(messages)
            .with_temperature(temperature);
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = self.client.complete(request).await?;
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion finished"
        );

        self.costs
            .write()
            .await
            .record(&self.model, &response.usage, response.cost);

        Ok(response.content)
    }
}

#[async_trait]
impl ReasoningModel for ClientReasoningModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    // The HTTP clients return whole responses; the stream carries one chunk.
    async fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
    ) -> Result<TextStream> {
        let content = self.complete(messages, temperature).await?;
        Ok(stream::once(async move { Ok(content) }).boxed())
    }

    async fn generate_structured(
        &self,
        mut messages: Vec<ChatMessage>,
        schema: &Value,
        temperature: f64,
    ) -> Result<Value> {
        messages.push(ChatMessage::system(format!(
            "Respond only with a JSON object matching this schema:\n```json\n{}\n```",
            serde_json::to_string_pretty(schema)?
        )));

        let content = self.complete(messages, temperature).await?;
        serde_json::from_str(extract_json(&content)).map_err(|e| {
            Error::LLM(format!("Model {} returned invalid JSON: {}", self.model, e))
        })
    }
}

/// [`EmbeddingModel`] backed by an [`LLMClient`].
pub struct ClientEmbeddingModel {
    client: Arc<dyn LLMClient>,
    model: String,
    dimensions: usize,
    pricing: ModelPricing,
    costs: Arc<RwLock<CostTracker>>,
}

impl ClientEmbeddingModel {
    pub fn new(
        client: Arc<dyn LLMClient>,
        model: impl Into<String>,
        dimensions: usize,
        pricing: ModelPricing,
        costs: Arc<RwLock<CostTracker>>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
            pricing,
            costs,
        }
    }
}

#[async_trait]
impl EmbeddingModel for ClientEmbeddingModel {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn get_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .embed(EmbeddingRequest {
                model: Some(self.model.clone()),
                texts: texts.to_vec(),
            })
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(Error::LLM(format!(
                "Embedding model {} returned {} vectors for {} inputs",
                self.model,
                response.embeddings.len(),
                texts.len()
            )));
        }
        if let Some(bad) = response.embeddings.iter().find(|v| v.len() != self.dimensions) {
            return Err(Error::InvalidDimension {
                expected: self.dimensions,
                got: bad.len(),
            });
        }

        let cost = self
            .pricing
            .calculate_cost(response.usage.input_tokens, response.usage.output_tokens);
        self.costs
            .write()
            .await
            .record(&self.model, &response.usage, Some(cost));

        Ok(response.embeddings)
    }
}
