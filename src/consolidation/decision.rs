//! The five consolidation actions and their payloads.
//!
//! A model answer is `{"action": <tag>, "data": {...}}`. [`Decision::decode`]
//! turns it into exactly one variant or fails; it never builds a variant
//! from a payload shaped for a different tag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::warn;

use crate::error::{ClassificationFailure, Error, Result};
use crate::memory::MemoryId;

use super::normalize::{IdMapping, NormalizedId};

/// Action tag as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    Insert,
    MergeConflict,
    ResolveTemporalConflict,
    #[serde(rename = "addition_to_existing_memory")]
    AdditionToExisting,
    Ignore,
}

impl ActionTag {
    pub const ALL: [ActionTag; 5] = [
        Self::Insert,
        Self::MergeConflict,
        Self::ResolveTemporalConflict,
        Self::AdditionToExisting,
        Self::Ignore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::MergeConflict => "merge_conflict",
            Self::ResolveTemporalConflict => "resolve_temporal_conflict",
            Self::AdditionToExisting => "addition_to_existing_memory",
            Self::Ignore => "ignore",
        }
    }
}

impl std::fmt::Display for ActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| Error::UnknownAction { tag: s.to_string() })
    }
}

/// An existing memory that contradicts the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictingMemory<I> {
    pub memory_id: I,
    pub content: String,
    pub reason: String,
}

/// New content for an existing memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatedMemory<I> {
    pub memory_id: I,
    pub content: String,
}

/// A consolidation decision, generic over the id space it refers to.
///
/// `Decision<NormalizedId>` is what the model wrote; `Decision<MemoryId>` is
/// what gets executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum Decision<I> {
    Insert {
        content: String,
    },
    MergeConflict {
        conflicting_memories: Vec<ConflictingMemory<I>>,
    },
    ResolveTemporalConflict {
        memory_ids: Vec<I>,
    },
    #[serde(rename = "addition_to_existing_memory")]
    AdditionToExisting {
        updated_memories: Vec<UpdatedMemory<I>>,
    },
    Ignore {
        reason: String,
    },
}

impl<I> Decision<I> {
    pub fn tag(&self) -> ActionTag {
        match self {
            Self::Insert { .. } => ActionTag::Insert,
            Self::MergeConflict { .. } => ActionTag::MergeConflict,
            Self::ResolveTemporalConflict { .. } => ActionTag::ResolveTemporalConflict,
            Self::AdditionToExisting { .. } => ActionTag::AdditionToExisting,
            Self::Ignore { .. } => ActionTag::Ignore,
        }
    }

    /// Merge and temporal conflicts wait for a resolution policy.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::MergeConflict { .. } | Self::ResolveTemporalConflict { .. }
        )
    }
}

// Payload shapes. Each has a distinct required field and rejects unknown
// fields, so a payload can only decode under its own tag.

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InsertData {
    content: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MergeConflictData {
    conflicting_memories: Vec<ConflictingMemory<NormalizedId>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TemporalConflictData {
    memory_ids: Vec<NormalizedId>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AdditionData {
    updated_memories: Vec<UpdatedMemory<NormalizedId>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IgnoreData {
    reason: String,
}

fn decode_data<T: DeserializeOwned>(tag: ActionTag, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| {
        ClassificationFailure::TagMismatch {
            tag: tag.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn non_blank(tag: ActionTag, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ClassificationFailure::TagMismatch {
            tag: tag.to_string(),
            message: format!("`{}` must not be empty", field),
        }
        .into());
    }
    Ok(())
}

impl Decision<NormalizedId> {
    /// Decode the `{"action", "data"}` envelope.
    ///
    /// An unrecognised tag is [`Error::UnknownAction`]; a payload that does
    /// not fit its tag is a classification failure.
    pub fn decode(payload: Value) -> Result<Self> {
        let Value::Object(mut envelope) = payload else {
            return Err(ClassificationFailure::InvalidPayload(
                "payload is not a JSON object".to_string(),
            )
            .into());
        };

        let tag = match envelope.remove("action") {
            Some(Value::String(tag)) => tag.parse::<ActionTag>()?,
            Some(other) => {
                return Err(ClassificationFailure::InvalidPayload(format!(
                    "`action` must be a string, got {}",
                    other
                ))
                .into())
            }
            None => {
                return Err(
                    ClassificationFailure::InvalidPayload("missing `action`".to_string()).into(),
                )
            }
        };

        let data = envelope.remove("data").ok_or_else(|| {
            Error::from(ClassificationFailure::TagMismatch {
                tag: tag.to_string(),
                message: "missing `data`".to_string(),
            })
        })?;

        let decision = match tag {
            ActionTag::Insert => {
                let data: InsertData = decode_data(tag, data)?;
                non_blank(tag, "content", &data.content)?;
                Self::Insert {
                    content: data.content,
                }
            }
            ActionTag::MergeConflict => {
                let data: MergeConflictData = decode_data(tag, data)?;
                Self::MergeConflict {
                    conflicting_memories: data.conflicting_memories,
                }
            }
            ActionTag::ResolveTemporalConflict => {
                let data: TemporalConflictData = decode_data(tag, data)?;
                Self::ResolveTemporalConflict {
                    memory_ids: data.memory_ids,
                }
            }
            ActionTag::AdditionToExisting => {
                let data: AdditionData = decode_data(tag, data)?;
                for updated in &data.updated_memories {
                    non_blank(tag, "content", &updated.content)?;
                }
                Self::AdditionToExisting {
                    updated_memories: data.updated_memories,
                }
            }
            ActionTag::Ignore => {
                let data: IgnoreData = decode_data(tag, data)?;
                Self::Ignore {
                    reason: data.reason,
                }
            }
        };

        Ok(decision)
    }

    /// Map every referenced id back through `mapping`.
    ///
    /// References the mapping does not know are dropped with a warning; the
    /// rest of the decision survives.
    pub fn denormalize(self, mapping: &IdMapping) -> Decision<MemoryId> {
        let resolve = |id: NormalizedId| {
            let resolved = mapping.denormalize(id).cloned();
            if resolved.is_none() {
                warn!(normalized_id = id, known = mapping.len(), "Dropping unknown memory reference");
            }
            resolved
        };

        match self {
            Self::Insert { content } => Decision::Insert { content },
            Self::Ignore { reason } => Decision::Ignore { reason },
            Self::MergeConflict {
                conflicting_memories,
            } => Decision::MergeConflict {
                conflicting_memories: conflicting_memories
                    .into_iter()
                    .filter_map(|m| {
                        resolve(m.memory_id).map(|memory_id| ConflictingMemory {
                            memory_id,
                            content: m.content,
                            reason: m.reason,
                        })
                    })
                    .collect(),
            },
            Self::ResolveTemporalConflict { memory_ids } => {
                let mut seen = HashSet::new();
                Decision::ResolveTemporalConflict {
                    memory_ids: memory_ids
                        .into_iter()
                        .filter_map(resolve)
                        .filter(|id| seen.insert(id.clone()))
                        .collect(),
                }
            }
            Self::AdditionToExisting { updated_memories } => Decision::AdditionToExisting {
                updated_memories: updated_memories
                    .into_iter()
                    .filter_map(|m| {
                        resolve(m.memory_id).map(|memory_id| UpdatedMemory {
                            memory_id,
                            content: m.content,
                        })
                    })
                    .collect(),
            },
        }
    }
}

/// Payload of the relevance sub-classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelevancePayload {
    pub related_memory_ids: Vec<NormalizedId>,
}

impl RelevancePayload {
    /// Resolve ids, dropping unknown and repeated ones.
    pub fn denormalize(self, mapping: &IdMapping) -> Vec<MemoryId> {
        let mut seen = HashSet::new();
        self.related_memory_ids
            .into_iter()
            .filter_map(|id| {
                let resolved = mapping.denormalize(id).cloned();
                if resolved.is_none() {
                    warn!(normalized_id = id, "Dropping unknown related memory");
                }
                resolved
            })
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }
}
