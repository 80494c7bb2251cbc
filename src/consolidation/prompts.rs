//! Prompt construction for the consolidation stages.
//!
//! Wording is replaceable through [`PromptTemplates`]; the response contract
//! (`<think>` section plus one fenced JSON block) is not.

use chrono::{DateTime, Utc};

use crate::llm::{ChatMessage, ChatRole};

use super::extractor::ToolDescriptor;
use super::normalize::NormalizedView;

/// Builds the message lists sent to each stage.
pub trait PromptTemplates: Send + Sync {
    /// Choose one of the five actions for `candidate`.
    fn decision(
        &self,
        candidate: &str,
        existing: &NormalizedView,
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage>;

    /// Pick which `existing` memories `content` should be linked to.
    fn relevance(&self, content: &str, existing: &NormalizedView) -> Vec<ChatMessage>;

    /// Turn a conversation into candidate memories, optionally calling tools.
    fn memory_generation(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolDescriptor],
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage>;
}

/// Built-in prompt wording.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

const RESPONSE_CONTRACT: &str = "Think step by step inside <think></think> tags first. \
Then give your answer as exactly one ```json fenced block and nothing after it.";

fn render_conversation(conversation: &[ChatMessage]) -> String {
    conversation
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl PromptTemplates for DefaultPrompts {
    fn decision(
        &self,
        candidate: &str,
        existing: &NormalizedView,
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage> {
        let prompt = format!(
            "You maintain a long-term memory store about a user. Today is {date}, {time} UTC.\n\n\
             Existing memories (ids are local to this message):\n{existing}\n\n\
             New memory:\n{candidate}\n\n\
             Decide what to do with the new memory. Choose exactly one action:\n\
             - \"insert\": it is new information. data: {{\"content\": string}}\n\
             - \"merge_conflict\": it contradicts existing memories. \
             data: {{\"conflicting_memories\": [{{\"memory_id\": int, \"content\": string, \"reason\": string}}]}}\n\
             - \"resolve_temporal_conflict\": existing memories are outdated by it. \
             data: {{\"memory_ids\": [int]}}\n\
             - \"addition_to_existing_memory\": it extends existing memories. \
             data: {{\"updated_memories\": [{{\"memory_id\": int, \"content\": string}}]}}\n\
             - \"ignore\": it is already known or not worth keeping. data: {{\"reason\": string}}\n\n\
             Answer with {{\"action\": <action>, \"data\": <data>}}.\n\n{contract}",
            date = now.format("%A, %d %B %Y"),
            time = now.format("%H:%M:%S"),
            existing = existing.to_prompt_json(),
            candidate = candidate,
            contract = RESPONSE_CONTRACT,
        );
        vec![ChatMessage::user(prompt)]
    }

    fn relevance(&self, content: &str, existing: &NormalizedView) -> Vec<ChatMessage> {
        let prompt = format!(
            "A memory is being saved:\n{content}\n\n\
             Candidate related memories (ids are local to this message):\n{existing}\n\n\
             List the ids of the memories that are genuinely related to it and should be \
             linked in the memory graph. An empty list is a valid answer.\n\
             Answer with {{\"related_memory_ids\": [int]}}.\n\n{contract}",
            content = content,
            existing = existing.to_prompt_json(),
            contract = RESPONSE_CONTRACT,
        );
        vec![ChatMessage::user(prompt)]
    }

    fn memory_generation(
        &self,
        conversation: &[ChatMessage],
        tools: &[ToolDescriptor],
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage> {
        let tools = if tools.is_empty() {
            "No tools are available.".to_string()
        } else {
            tools
                .iter()
                .map(|t| format!("- {}: {}\n  arguments schema: {}", t.name, t.description, t.parameters))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "Today is {date}, {time} UTC.\n\n\
             Extract durable facts about the user from the conversation below. Each memory \
             must be a short, self-contained statement. Resolve relative dates to absolute ones.\n\n\
             Tools:\n{tools}\n\n\
             To call a tool answer with \
             {{\"type\": \"function_call\", \"data\": {{\"name\": string, \"arguments\": object}}}}.\n\
             When done answer with {{\"type\": \"final_result\", \"data\": {{\"memories\": [string]}}}}.\n\n\
             Conversation:\n{conversation}\n\n{contract}",
            date = now.format("%A, %d %B %Y"),
            time = now.format("%H:%M:%S"),
            tools = tools,
            conversation = render_conversation(conversation),
            contract = RESPONSE_CONTRACT,
        );
        vec![ChatMessage::user(prompt)]
    }
}
