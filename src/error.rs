//! Error types for memweave-core.

use thiserror::Error;

use crate::consolidation::ActionTag;
use crate::memory::MemoryId;

/// Result type alias using memweave-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while consolidating memories.
#[derive(Error, Debug)]
pub enum Error {
    /// Similarity retrieval failed (store unreachable, query failure, embedding failure)
    #[error("Retrieval error: {message}")]
    Retrieval {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// The identifier bijection was violated
    #[error("Normalization error: {0}")]
    Normalization(String),

    /// The reasoning model's answer could not be turned into a decision
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationFailure),

    /// A store mutation failed while executing a decision
    #[error("Execution error during {action}: {message}")]
    Execution {
        action: ActionTag,
        message: String,
        /// Record the failed step was targeting, if known
        target: Option<MemoryId>,
        /// Mutations already committed before the failure
        applied: Vec<AppliedMutation>,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Decision tag outside the five known actions
    #[error("Unknown action: {tag}")]
    UnknownAction { tag: String },

    /// Record-store uniqueness violation on content
    #[error("Duplicate memory content: {preview}")]
    DuplicateContent { preview: String },

    /// Record not found
    #[error("Memory not found: {id}")]
    NotFound { id: MemoryId },

    /// Vector length does not match the deployment's dimensionality
    #[error("Invalid embedding dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    LLM(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The batch was cancelled before this candidate finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a model response could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationFailure {
    #[error("response has no reasoning section")]
    MissingReasoning,

    #[error("response has no fenced JSON payload")]
    MissingPayload,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload does not match declared action `{tag}`: {message}")]
    TagMismatch { tag: String, message: String },

    #[error("model requested unknown tool `{0}`")]
    UnknownTool(String),
}

/// Failure classes surfaced to callers of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retrieval,
    Normalization,
    Classification,
    Execution,
    UnknownAction,
    Cancelled,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Retrieval => "retrieval",
            Self::Normalization => "normalization",
            Self::Classification => "classification",
            Self::Execution => "execution",
            Self::UnknownAction => "unknown_action",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A store mutation that was committed before an execution failure.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum AppliedMutation {
    RecordInserted { id: MemoryId },
    RecordUpdated { id: MemoryId },
    VectorUpserted { id: MemoryId },
    Linked { a: MemoryId, b: MemoryId },
}

impl Error {
    /// Create a retrieval error.
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
            source: None,
        }
    }

    /// Create an execution error with no committed mutations.
    pub fn execution(action: ActionTag, message: impl Into<String>) -> Self {
        Self::Execution {
            action,
            message: message.into(),
            target: None,
            applied: Vec::new(),
            source: None,
        }
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a uniqueness violation, keeping only a short preview of the content.
    pub fn duplicate_content(content: &str) -> Self {
        let preview: String = content.chars().take(80).collect();
        Self::DuplicateContent { preview }
    }

    /// Map to the failure class reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Retrieval { .. } => ErrorKind::Retrieval,
            Self::Normalization(_) => ErrorKind::Normalization,
            Self::Classification(_) => ErrorKind::Classification,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::UnknownAction { .. } => ErrorKind::UnknownAction,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Whether replaying the same candidate may succeed.
    ///
    /// An execution failure after a record was inserted is not: the content
    /// now exists, so recovery goes through the reported target instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Execution { applied, .. } => !applied
                .iter()
                .any(|m| matches!(m, AppliedMutation::RecordInserted { .. })),
            other => !matches!(
                other.kind(),
                ErrorKind::UnknownAction | ErrorKind::Normalization
            ),
        }
    }

    /// Re-wrap a lower-level failure raised while retrieving neighbours.
    pub fn in_retrieval(self) -> Self {
        match self {
            Self::Retrieval { .. }
            | Self::Normalization(_)
            | Self::Classification(_)
            | Self::UnknownAction { .. }
            | Self::Cancelled => self,
            other => Self::Retrieval {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Re-wrap a lower-level failure raised while executing `action`.
    pub fn in_execution(
        self,
        action: ActionTag,
        target: Option<MemoryId>,
        applied: &[AppliedMutation],
    ) -> Self {
        match self {
            Self::Execution { .. }
            | Self::Normalization(_)
            | Self::UnknownAction { .. }
            | Self::Cancelled => self,
            other => Self::Execution {
                action,
                message: other.to_string(),
                target,
                applied: applied.to_vec(),
                source: Some(Box::new(other)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::retrieval("down").kind(), ErrorKind::Retrieval);
        assert_eq!(
            Error::from(ClassificationFailure::MissingPayload).kind(),
            ErrorKind::Classification
        );
        assert_eq!(
            Error::UnknownAction { tag: "x".into() }.kind(),
            ErrorKind::UnknownAction
        );
        assert_eq!(Error::Storage("x".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_fatal_kinds_not_retryable() {
        assert!(!Error::UnknownAction { tag: "x".into() }.is_retryable());
        assert!(!Error::Normalization("dup".into()).is_retryable());
        assert!(Error::retrieval("timeout").is_retryable());
        assert!(Error::execution(ActionTag::Insert, "boom").is_retryable());
    }

    #[test]
    fn test_committed_insert_not_retryable() {
        let id = MemoryId::new();
        let inserted = Error::Storage("edge write failed".into()).in_execution(
            ActionTag::Insert,
            Some(id.clone()),
            &[AppliedMutation::RecordInserted { id: id.clone() }],
        );
        assert!(!inserted.is_retryable());

        let updated = Error::Storage("edge write failed".into()).in_execution(
            ActionTag::AdditionToExisting,
            Some(id.clone()),
            &[AppliedMutation::RecordUpdated { id }],
        );
        assert!(updated.is_retryable());
    }

    #[test]
    fn test_in_retrieval_wraps_store_errors() {
        let err = Error::Storage("connection refused".into()).in_retrieval();
        assert_eq!(err.kind(), ErrorKind::Retrieval);
        assert!(err.to_string().contains("connection refused"));

        let passthrough = Error::from(ClassificationFailure::MissingReasoning).in_retrieval();
        assert_eq!(passthrough.kind(), ErrorKind::Classification);
    }

    #[test]
    fn test_in_execution_keeps_applied_mutations() {
        let id = MemoryId::new();
        let applied = vec![AppliedMutation::RecordInserted { id: id.clone() }];
        let err = Error::Storage("disk full".into()).in_execution(
            ActionTag::Insert,
            Some(id.clone()),
            &applied,
        );

        match err {
            Error::Execution {
                action,
                target,
                applied,
                ..
            } => {
                assert_eq!(action, ActionTag::Insert);
                assert_eq!(target, Some(id));
                assert_eq!(applied.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_preview_is_truncated() {
        let long = "a".repeat(500);
        match Error::duplicate_content(&long) {
            Error::DuplicateContent { preview } => assert_eq!(preview.len(), 80),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
