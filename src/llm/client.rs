//! LLM client trait and provider implementations.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

use super::types::{
    ChatRole, CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse,
    ModelPricing, ProviderKind, TokenUsage,
};

/// LLM client trait for making completions and embeddings.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Create embeddings for texts.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Get the provider for this client.
    fn provider(&self) -> ProviderKind;
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override, including the API version path
    pub base_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Pricing used to fill `CompletionResponse::cost`
    pub pricing: Option<ModelPricing>,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 120,
            pricing: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }

    fn cost(&self, usage: &TokenUsage) -> Option<f64> {
        self.pricing
            .map(|p| p.calculate_cost(usage.input_tokens, usage.output_tokens))
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);

    // Proxy auto-detection can panic in some sandboxed environments.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::LLM(format!("Failed to create HTTP client: {}", e))),
    }
}

/// POST a JSON body and return the raw response text, or the provider's error.
async fn post_json<B: Serialize>(
    request: reqwest::RequestBuilder,
    body: &B,
    provider: ProviderKind,
    parse_error: fn(&str) -> Option<String>,
) -> Result<String> {
    let response = request
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| Error::LLM(format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::LLM(format!("Failed to read response: {}", e)))?;

    if !status.is_success() {
        let message = parse_error(&text).unwrap_or_else(|| format!("({}): {}", status, text));
        return Err(Error::llm_api(provider.to_string(), message));
    }

    Ok(text)
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com/v1";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

fn parse_anthropic_error(body: &str) -> Option<String> {
    serde_json::from_str::<AnthropicError>(body)
        .ok()
        .map(|e| format!("{}: {}", e.error.error_type, e.error.message))
}

/// Anthropic takes the system prompt out of band; system-role messages are
/// folded into it in order.
fn anthropic_request(request: CompletionRequest, model: String) -> AnthropicRequest {
    let mut system: Vec<String> = request.system.into_iter().collect();
    let mut messages = Vec::with_capacity(request.messages.len());

    for m in request.messages {
        match m.role {
            ChatRole::System => system.push(m.content),
            ChatRole::User => messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: m.content,
            }),
            ChatRole::Assistant => messages.push(AnthropicMessage {
                role: "assistant".to_string(),
                content: m.content,
            }),
        }
    }

    AnthropicRequest {
        model,
        messages,
        max_tokens: request.max_tokens.unwrap_or(4096),
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        temperature: request.temperature,
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .clone()
            .or(self.config.default_model.clone())
            .ok_or_else(|| Error::Config("No model set for Anthropic request".to_string()))?;

        let api_request = anthropic_request(request, model);
        let url = format!("{}/messages", self.base_url());

        let body = post_json(
            self.http
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", Self::API_VERSION),
            &api_request,
            ProviderKind::Anthropic,
            parse_anthropic_error,
        )
        .await?;

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if api_response.stop_reason.as_deref() == Some("max_tokens") {
            warn!(model = %api_response.model, "Completion truncated at max_tokens");
        }

        let usage = TokenUsage {
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        };

        Ok(CompletionResponse {
            model: api_response.model,
            content,
            cost: self.config.cost(&usage),
            usage,
        })
    }

    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        Err(Error::llm_api(
            ProviderKind::Anthropic.to_string(),
            "embeddings are not offered by this provider",
        ))
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}

/// OpenAI chat/embeddings client, also used for OpenAI-compatible vendors.
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
    provider: ProviderKind,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self {
            config,
            http,
            provider: ProviderKind::OpenAI,
        })
    }

    /// Client for an OpenAI-compatible endpoint; `base_url` is required.
    pub fn compatible(config: ClientConfig) -> Result<Self> {
        if config.base_url.is_none() {
            return Err(Error::Config(
                "openai_compatible provider requires a base_url".to_string(),
            ));
        }
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self {
            config,
            http,
            provider: ProviderKind::OpenAICompatible,
        })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

fn parse_openai_error(body: &str) -> Option<String> {
    serde_json::from_str::<OpenAIError>(body)
        .ok()
        .map(|e| e.error.message)
}

// OpenAI Embedding types
#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    model: String,
    data: Vec<OpenAIEmbeddingData>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

fn openai_request(request: CompletionRequest, model: String) -> OpenAIRequest {
    let mut messages: Vec<OpenAIMessage> = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: Some(system),
        });
    }

    for m in request.messages {
        messages.push(OpenAIMessage {
            role: match m.role {
                ChatRole::User => "user".to_string(),
                ChatRole::Assistant => "assistant".to_string(),
                ChatRole::System => "system".to_string(),
            },
            content: Some(m.content),
        });
    }

    OpenAIRequest {
        model,
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Vendors may return embedding rows out of order; `index` restores input order.
fn order_embeddings(mut data: Vec<OpenAIEmbeddingData>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .clone()
            .or(self.config.default_model.clone())
            .ok_or_else(|| Error::Config(format!("No model set for {} request", self.provider)))?;

        let api_request = openai_request(request, model);
        let url = format!("{}/chat/completions", self.base_url());

        let body = post_json(
            self.http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.config.api_key)),
            &api_request,
            self.provider,
            parse_openai_error,
        )
        .await?;

        let api_response: OpenAIResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::LLM("No choices in response".to_string()))?;

        if choice.finish_reason.as_deref() == Some("length") {
            warn!(model = %api_response.model, "Completion truncated at max_tokens");
        }

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            model: api_response.model,
            content: choice.message.content.unwrap_or_default(),
            cost: self.config.cost(&usage),
            usage,
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .or(self.config.default_model.clone())
            .ok_or_else(|| Error::Config(format!("No model set for {} embedding", self.provider)))?;

        let api_request = OpenAIEmbeddingRequest {
            model,
            input: request.texts,
        };

        let url = format!("{}/embeddings", self.base_url());

        let body = post_json(
            self.http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.config.api_key)),
            &api_request,
            self.provider,
            parse_openai_error,
        )
        .await?;

        let api_response: OpenAIEmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        let usage = TokenUsage {
            input_tokens: api_response.usage.map(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens: 0,
        };

        Ok(EmbeddingResponse {
            model: api_response.model,
            embeddings: order_embeddings(api_response.data),
            usage,
        })
    }

    fn provider(&self) -> ProviderKind {
        self.provider
    }
}
