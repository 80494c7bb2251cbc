//! Turning a conversation into candidate memories.
//!
//! The generation model may call auxiliary tools before answering. Each call
//! is bounded: once the iteration budget is spent, a further tool request
//! ends extraction with no memories.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ClassificationFailure, Result};
use crate::llm::{ChatMessage, ModelRegistry, Stage};

use super::prompts::PromptTemplates;
use super::response::parse_typed;

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A side capability the generation model may invoke.
#[async_trait]
pub trait AuxiliaryTool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool; the text is fed back to the model verbatim.
    async fn call(&self, arguments: Value) -> Result<String>;
}

/// Tools available during extraction, by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AuxiliaryTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn AuxiliaryTool>) {
        self.tools.insert(tool.descriptor().name, tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn AuxiliaryTool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AuxiliaryTool>> {
        self.tools.get(name)
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<_> = self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum GenerationStep {
    FunctionCall {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    FinalResult {
        memories: Vec<String>,
    },
}

/// How an extraction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Memories(Vec<String>),
    /// The tool budget ran out before a final answer.
    NoResult { tool_calls: usize },
}

impl ExtractionOutcome {
    /// Candidates to feed the pipeline; empty for [`NoResult`](Self::NoResult).
    pub fn into_memories(self) -> Vec<String> {
        match self {
            Self::Memories(memories) => memories,
            Self::NoResult { .. } => Vec::new(),
        }
    }
}

pub struct MemoryExtractor {
    registry: Arc<ModelRegistry>,
    prompts: Arc<dyn PromptTemplates>,
    tools: ToolRegistry,
    max_tool_iterations: usize,
}

impl MemoryExtractor {
    pub fn new(
        registry: Arc<ModelRegistry>,
        prompts: Arc<dyn PromptTemplates>,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            registry,
            prompts,
            tools: ToolRegistry::new(),
            max_tool_iterations,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Ask the generation model for candidate memories.
    pub async fn extract(&self, conversation: &[ChatMessage]) -> Result<ExtractionOutcome> {
        let stage = self.registry.stage(Stage::MemoryGeneration)?;
        let mut messages =
            self.prompts
                .memory_generation(conversation, &self.tools.descriptors(), Utc::now());
        let mut tool_calls = 0;

        loop {
            let text = stage
                .model
                .complete_text(messages.clone(), stage.temperature)
                .await?;
            let (_reasoning, step) = parse_typed::<GenerationStep>(&text)?;

            match step {
                GenerationStep::FinalResult { memories } => {
                    let memories: Vec<String> = memories
                        .into_iter()
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect();
                    info!(count = memories.len(), tool_calls, "Memories extracted");
                    return Ok(ExtractionOutcome::Memories(memories));
                }
                GenerationStep::FunctionCall { name, arguments } => {
                    if tool_calls >= self.max_tool_iterations {
                        warn!(
                            tool = %name,
                            limit = self.max_tool_iterations,
                            "Tool budget exhausted; ending extraction without result"
                        );
                        return Ok(ExtractionOutcome::NoResult { tool_calls });
                    }

                    let tool = self
                        .tools
                        .get(&name)
                        .ok_or_else(|| ClassificationFailure::UnknownTool(name.clone()))?;
                    let result = tool.call(arguments).await?;
                    tool_calls += 1;
                    debug!(tool = %name, tool_calls, "Tool called");

                    messages.push(ChatMessage::assistant(text));
                    messages.push(ChatMessage::user(format!("Function Result:\n{}", result)));
                }
            }
        }
    }
}
