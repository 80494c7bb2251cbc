//! Splitting a reasoning model's answer into its reasoning and payload.
//!
//! Every consolidation prompt asks for a `<think>...</think>` section followed
//! by one fenced ```json block. Both are mandatory.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::ClassificationFailure;

static REASONING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("Invalid regex"));

static PAYLOAD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("Invalid regex"));

/// A parsed model answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub reasoning: String,
    pub payload: Value,
}

/// Extract both sections. No partial success: a missing section fails the
/// whole response.
pub fn parse_response(text: &str) -> Result<ModelResponse, ClassificationFailure> {
    let payload = PAYLOAD_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or(ClassificationFailure::MissingPayload)?;

    let reasoning = REASONING_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or(ClassificationFailure::MissingReasoning)?;

    let payload = serde_json::from_str(payload.as_str())
        .map_err(|e| ClassificationFailure::InvalidPayload(e.to_string()))?;

    Ok(ModelResponse {
        reasoning: reasoning.as_str().trim().to_string(),
        payload,
    })
}

/// Parse and decode the payload into `T`.
pub fn parse_typed<T: DeserializeOwned>(text: &str) -> Result<(String, T), ClassificationFailure> {
    let response = parse_response(text)?;
    let value = serde_json::from_value(response.payload)
        .map_err(|e| ClassificationFailure::InvalidPayload(e.to_string()))?;
    Ok((response.reasoning, value))
}
