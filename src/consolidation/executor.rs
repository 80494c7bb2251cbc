//! Applying a decision to the stores.
//!
//! Each action runs as an ordered sequence of store calls through the
//! [`CrossStoreCoordinator`]. A failed step leaves earlier steps committed
//! and reports them in [`Error::Execution`]'s `applied` list.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppliedMutation, Error, Result};
use crate::llm::{EmbeddingModel, Stage};
use crate::memory::{MemoryId, MemoryRecord};

use super::cancel::CancelToken;
use super::classifier::DecisionClassifier;
use super::coordinator::CrossStoreCoordinator;
use super::decision::{ActionTag, Decision, UpdatedMemory};
use super::resolution::{PendingConflict, Resolution, ResolutionPolicy};
use super::retriever::SimilarityRetriever;

/// One updated memory and what it was linked to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub id: MemoryId,
    pub linked: Vec<MemoryId>,
}

/// What executing a decision did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Inserted { id: MemoryId, linked: Vec<MemoryId> },
    Updated { updates: Vec<UpdateOutcome> },
    /// A conflict is waiting for resolution; nothing was mutated.
    Pending(PendingConflict),
    Ignored { reason: String },
}

/// Attach `applied` to a failure, keeping anything the failure already
/// reported as committed.
fn after(
    err: Error,
    action: ActionTag,
    target: Option<&MemoryId>,
    applied: &[AppliedMutation],
) -> Error {
    match err {
        Error::Execution {
            action: failed_action,
            message,
            target: failed_target,
            applied: inner,
            source,
        } => {
            let mut all = applied.to_vec();
            all.extend(inner);
            Error::Execution {
                action: failed_action,
                message,
                target: failed_target.or_else(|| target.cloned()),
                applied: all,
                source,
            }
        }
        other => other.in_execution(action, target.cloned(), applied),
    }
}

/// Stop if cancelled. Once anything has been committed, cancellation is
/// reported as an execution failure so the caller still learns the target
/// and what was applied.
fn checkpoint(
    cancel: &CancelToken,
    action: ActionTag,
    target: Option<&MemoryId>,
    applied: &[AppliedMutation],
) -> Result<()> {
    match cancel.check() {
        Err(err) if !applied.is_empty() => Err(Error::Execution {
            action,
            message: "cancelled after partial execution".to_string(),
            target: target.cloned(),
            applied: applied.to_vec(),
            source: Some(Box::new(err)),
        }),
        other => other,
    }
}

pub struct ActionExecutor {
    coordinator: Arc<CrossStoreCoordinator>,
    retriever: Arc<SimilarityRetriever>,
    classifier: Arc<DecisionClassifier>,
    embedder: Arc<dyn EmbeddingModel>,
    policy: Arc<dyn ResolutionPolicy>,
}

impl ActionExecutor {
    pub fn new(
        coordinator: Arc<CrossStoreCoordinator>,
        retriever: Arc<SimilarityRetriever>,
        classifier: Arc<DecisionClassifier>,
        embedder: Arc<dyn EmbeddingModel>,
        policy: Arc<dyn ResolutionPolicy>,
    ) -> Self {
        Self {
            coordinator,
            retriever,
            classifier,
            embedder,
            policy,
        }
    }

    /// Apply `decision` for `candidate`.
    ///
    /// Conflicts go through the resolution policy first. Cancellation is
    /// checked between mutation groups; a group already started runs to
    /// completion.
    pub async fn execute(
        &self,
        candidate: &str,
        decision: Decision<MemoryId>,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        let decision = if decision.is_conflict() {
            let tag = decision.tag();
            match self
                .policy
                .resolve(candidate, decision)
                .await
                .map_err(|e| e.in_execution(tag, None, &[]))?
            {
                Resolution::Pending(conflict) => return Ok(ExecutionOutcome::Pending(conflict)),
                Resolution::Resolved(resolved) if resolved.is_conflict() => {
                    warn!(
                        action = %resolved.tag(),
                        "Policy resolved a conflict into another conflict; leaving it pending"
                    );
                    let conflict = PendingConflict::new(candidate, resolved);
                    self.policy
                        .hold(conflict.clone())
                        .await
                        .map_err(|e| e.in_execution(tag, None, &[]))?;
                    return Ok(ExecutionOutcome::Pending(conflict));
                }
                Resolution::Resolved(resolved) => {
                    info!(from = %tag, to = %resolved.tag(), "Conflict resolved by policy");
                    resolved
                }
            }
        } else {
            decision
        };

        match decision {
            Decision::Insert { content } => self.insert(&content, cancel).await,
            Decision::AdditionToExisting { updated_memories } => {
                self.add_to_existing(updated_memories, cancel).await
            }
            Decision::Ignore { reason } => {
                info!(
                    target: "memweave_core::audit",
                    candidate = %candidate,
                    reason = %reason,
                    "Candidate ignored"
                );
                Ok(ExecutionOutcome::Ignored { reason })
            }
            conflict @ (Decision::MergeConflict { .. } | Decision::ResolveTemporalConflict { .. }) => {
                Err(Error::execution(
                    conflict.tag(),
                    "conflicts are only applied through a resolution policy",
                ))
            }
        }
    }

    async fn embed(&self, action: ActionTag, text: &str, applied: &[AppliedMutation]) -> Result<Vec<f32>> {
        self.embedder
            .embed_one(text)
            .await
            .map_err(|e| after(e, action, None, applied))
    }

    /// embed, find neighbours, insert, classify relevance, link.
    async fn insert(&self, content: &str, cancel: &CancelToken) -> Result<ExecutionOutcome> {
        let action = ActionTag::Insert;
        let embedding = self.embed(action, content, &[]).await?;
        let neighbors: Vec<MemoryRecord> = self
            .retriever
            .neighbors_for(&embedding, None)
            .await
            .map_err(|e| after(e, action, None, &[]))?
            .into_iter()
            .map(|n| n.record)
            .collect();
        checkpoint(cancel, action, None, &[])?;

        let id = self
            .coordinator
            .insert_memory(content, &embedding)
            .await
            .map_err(|e| after(e, action, None, &[]))?;
        let mut applied = vec![
            AppliedMutation::RecordInserted { id: id.clone() },
            AppliedMutation::VectorUpserted { id: id.clone() },
        ];
        checkpoint(cancel, action, Some(&id), &applied)?;

        let related = self
            .classifier
            .related(Stage::Insertion, content, &neighbors)
            .await
            .map_err(|e| after(e, action, Some(&id), &applied))?;
        checkpoint(cancel, action, Some(&id), &applied)?;

        let linked = self.link_all(action, &id, &related.ids, &mut applied).await?;
        Ok(ExecutionOutcome::Inserted { id, linked })
    }

    /// Per item: embed, find neighbours, classify relevance, update, link.
    async fn add_to_existing(
        &self,
        updated_memories: Vec<UpdatedMemory<MemoryId>>,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        let action = ActionTag::AdditionToExisting;
        if updated_memories.is_empty() {
            warn!("Addition decision references no known memories");
        }

        let mut applied = Vec::new();
        let mut updates = Vec::with_capacity(updated_memories.len());

        for UpdatedMemory { memory_id, content } in updated_memories {
            let embedding = self.embed(action, &content, &applied).await?;
            let neighbors: Vec<MemoryRecord> = self
                .retriever
                .neighbors_for(&embedding, Some(&memory_id))
                .await
                .map_err(|e| after(e, action, Some(&memory_id), &applied))?
                .into_iter()
                .map(|n| n.record)
                .collect();
            let related = self
                .classifier
                .related(Stage::Addition, &content, &neighbors)
                .await
                .map_err(|e| after(e, action, Some(&memory_id), &applied))?;
            checkpoint(cancel, action, Some(&memory_id), &applied)?;

            self.coordinator
                .update_memory_content(&memory_id, &content, &embedding)
                .await
                .map_err(|e| after(e, action, Some(&memory_id), &applied))?;
            applied.push(AppliedMutation::RecordUpdated {
                id: memory_id.clone(),
            });
            applied.push(AppliedMutation::VectorUpserted {
                id: memory_id.clone(),
            });
            checkpoint(cancel, action, Some(&memory_id), &applied)?;

            let linked = self
                .link_all(action, &memory_id, &related.ids, &mut applied)
                .await?;
            updates.push(UpdateOutcome {
                id: memory_id,
                linked,
            });
        }

        Ok(ExecutionOutcome::Updated { updates })
    }

    async fn link_all(
        &self,
        action: ActionTag,
        id: &MemoryId,
        related: &[MemoryId],
        applied: &mut Vec<AppliedMutation>,
    ) -> Result<Vec<MemoryId>> {
        let mut linked = Vec::with_capacity(related.len());
        for other in related {
            let created = self
                .coordinator
                .link_memories(id, other)
                .await
                .map_err(|e| after(e, action, Some(id), applied))?;
            if created {
                applied.push(AppliedMutation::Linked {
                    a: id.clone(),
                    b: other.clone(),
                });
                linked.push(other.clone());
            }
        }
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::consolidation::cancel::CancelHandle;
    use crate::consolidation::decision::ConflictingMemory;
    use crate::consolidation::prompts::DefaultPrompts;
    use crate::consolidation::resolution::{HoldForReview, PendingConflicts};
    use crate::consolidation::testing::{Harness, ScriptedReasoningModel, StaticEmbeddingModel};
    use crate::memory::StoreCounts;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn embedder() -> StaticEmbeddingModel {
        StaticEmbeddingModel::new(4)
            .with_vector("User enjoys hiking", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("User hiked the Kalsubai trail", vec![0.9, 0.2, 0.0, 0.0])
            .with_vector("User plays chess", vec![0.0, 1.0, 0.0, 0.0])
            .with_vector("User owns a dog", vec![0.0, 0.0, 1.0, 0.0])
            .with_vector("User owns a dog named Bruno", vec![0.0, 0.1, 1.0, 0.0])
            .with_vector("User walks every morning", vec![0.0, 0.0, 0.8, 0.6])
    }

    fn executor(harness: &Harness, policy: Arc<dyn ResolutionPolicy>) -> ActionExecutor {
        let registry = harness.registry();
        let retriever = Arc::new(SimilarityRetriever::new(
            harness.coordinator.clone(),
            harness.embedder.clone(),
            RetrievalConfig::default(),
        ));
        let classifier = Arc::new(DecisionClassifier::new(
            registry.clone(),
            Arc::new(DefaultPrompts),
        ));
        ActionExecutor::new(
            harness.coordinator.clone(),
            retriever,
            classifier,
            registry.embedding(),
            policy,
        )
    }

    fn hold() -> Arc<dyn ResolutionPolicy> {
        Arc::new(HoldForReview::default())
    }

    fn insertion_linking_first() -> ScriptedReasoningModel {
        ScriptedReasoningModel::new().then_reply(
            "Hiking relates to the trail memory only.",
            json!({"related_memory_ids": [0]}),
        )
    }

    #[tokio::test]
    async fn test_ignore_mutates_nothing() {
        let harness = Harness::new(embedder());
        harness.seed("User plays chess").await;
        let before = harness.coordinator.counts().await.unwrap();

        let outcome = executor(&harness, hold())
            .execute(
                "User plays chess",
                Decision::Ignore {
                    reason: "already known".to_string(),
                },
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome::Ignored {
                reason: "already known".to_string()
            }
        );
        assert_eq!(harness.coordinator.counts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_insert_links_selected_neighbors() {
        let harness = Harness::with_models(
            embedder(),
            ScriptedReasoningModel::new(),
            insertion_linking_first(),
            ScriptedReasoningModel::new(),
        );
        let trail = harness.seed("User hiked the Kalsubai trail").await;
        let chess = harness.seed("User plays chess").await;

        let outcome = executor(&harness, hold())
            .execute(
                "User enjoys hiking",
                Decision::Insert {
                    content: "User enjoys hiking".to_string(),
                },
                &CancelToken::never(),
            )
            .await
            .unwrap();

        let (id, linked) = match outcome {
            ExecutionOutcome::Inserted { id, linked } => (id, linked),
            other => panic!("expected insert, got {other:?}"),
        };
        assert_eq!(linked, vec![trail.id.clone()]);

        let coordinator = &harness.coordinator;
        assert_eq!(coordinator.get_memory(&id).await.unwrap().content, "User enjoys hiking");
        assert_eq!(coordinator.neighbors(&id).await.unwrap(), vec![trail.id.clone()]);
        assert_eq!(coordinator.neighbors(&trail.id).await.unwrap(), vec![id.clone()]);
        assert!(coordinator.neighbors(&chess.id).await.unwrap().is_empty());
        assert_eq!(
            coordinator.counts().await.unwrap(),
            StoreCounts {
                records: 3,
                vectors: 3,
                edges: 1
            }
        );

        // Both neighbours were offered to the relevance model, best first.
        let prompt = &harness.insertion.received()[0][0].content;
        let trail_at = prompt.find("Kalsubai").unwrap();
        let chess_at = prompt.find("chess").unwrap();
        assert!(trail_at < chess_at);
    }

    #[tokio::test]
    async fn test_insert_into_empty_store_skips_relevance() {
        let harness = Harness::new(embedder());

        let outcome = executor(&harness, hold())
            .execute(
                "User enjoys hiking",
                Decision::Insert {
                    content: "User enjoys hiking".to_string(),
                },
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Inserted { ref linked, .. } if linked.is_empty()));
        assert_eq!(harness.insertion.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_link_reports_committed_insert() {
        let harness = Harness::with_models(
            embedder(),
            ScriptedReasoningModel::new(),
            insertion_linking_first(),
            ScriptedReasoningModel::new(),
        );
        harness.seed("User hiked the Kalsubai trail").await;
        harness.graph.fail_edges(true);

        let err = executor(&harness, hold())
            .execute(
                "User enjoys hiking",
                Decision::Insert {
                    content: "User enjoys hiking".to_string(),
                },
                &CancelToken::never(),
            )
            .await
            .unwrap_err();

        let (action, target, applied) = match err {
            Error::Execution {
                action,
                target,
                applied,
                ..
            } => (action, target, applied),
            other => panic!("expected execution error, got {other:?}"),
        };
        let id = target.unwrap();
        assert_eq!(action, ActionTag::Insert);
        assert_eq!(
            applied,
            vec![
                AppliedMutation::RecordInserted { id: id.clone() },
                AppliedMutation::VectorUpserted { id: id.clone() },
            ]
        );
        // The insert stays committed; only the edge is missing.
        assert!(harness.coordinator.find_memory(&id).await.unwrap().is_some());
        assert_eq!(harness.coordinator.counts().await.unwrap().edges, 0);
    }

    #[tokio::test]
    async fn test_addition_updates_and_links() {
        let harness = Harness::with_models(
            embedder(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new().then_reply(
                "The dog is walked in the morning.",
                json!({"related_memory_ids": [0]}),
            ),
        );
        let dog = harness.seed("User owns a dog").await;
        let walks = harness.seed("User walks every morning").await;

        let outcome = executor(&harness, hold())
            .execute(
                "User's dog is named Bruno",
                Decision::AdditionToExisting {
                    updated_memories: vec![UpdatedMemory {
                        memory_id: dog.id.clone(),
                        content: "User owns a dog named Bruno".to_string(),
                    }],
                },
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome::Updated {
                updates: vec![UpdateOutcome {
                    id: dog.id.clone(),
                    linked: vec![walks.id.clone()],
                }]
            }
        );
        let coordinator = &harness.coordinator;
        assert_eq!(
            coordinator.get_memory(&dog.id).await.unwrap().content,
            "User owns a dog named Bruno"
        );
        assert_eq!(coordinator.neighbors(&walks.id).await.unwrap(), vec![dog.id.clone()]);
        // The memory being updated is never offered as its own neighbour.
        let prompt = &harness.addition.received()[0][0].content;
        assert!(!prompt.contains("\"User owns a dog\""));
    }

    #[tokio::test]
    async fn test_addition_failure_reports_earlier_updates() {
        let harness = Harness::with_models(
            embedder(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new()
                .then_reply("Unrelated.", json!({"related_memory_ids": []}))
                .then_reply("Unrelated.", json!({"related_memory_ids": []})),
        );
        let dog = harness.seed("User owns a dog").await;
        let walks = harness.seed("User walks every morning").await;
        harness.vectors.fail_upserts_after(1);

        let err = executor(&harness, hold())
            .execute(
                "Bruno joins the morning walks",
                Decision::AdditionToExisting {
                    updated_memories: vec![
                        UpdatedMemory {
                            memory_id: dog.id.clone(),
                            content: "User owns a dog named Bruno".to_string(),
                        },
                        UpdatedMemory {
                            memory_id: walks.id.clone(),
                            content: "User walks Bruno every morning".to_string(),
                        },
                    ],
                },
                &CancelToken::never(),
            )
            .await
            .unwrap_err();

        match err {
            Error::Execution {
                action,
                target,
                applied,
                ..
            } => {
                assert_eq!(action, ActionTag::AdditionToExisting);
                assert_eq!(target, Some(walks.id.clone()));
                assert_eq!(
                    applied,
                    vec![
                        AppliedMutation::RecordUpdated { id: dog.id.clone() },
                        AppliedMutation::VectorUpserted { id: dog.id.clone() },
                        AppliedMutation::RecordUpdated { id: walks.id.clone() },
                    ]
                );
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_conflict_is_held_without_mutation() {
        let harness = Harness::new(embedder());
        let dog = harness.seed("User owns a dog").await;
        let queue = PendingConflicts::new();
        let before = harness.coordinator.counts().await.unwrap();

        let decision = Decision::MergeConflict {
            conflicting_memories: vec![ConflictingMemory {
                memory_id: dog.id.clone(),
                content: "User owns a dog".to_string(),
                reason: "User says they never had pets".to_string(),
            }],
        };
        let outcome = executor(&harness, Arc::new(HoldForReview::new(queue.clone())))
            .execute("User never had pets", decision.clone(), &CancelToken::never())
            .await
            .unwrap();

        let ExecutionOutcome::Pending(conflict) = outcome else {
            panic!("expected pending");
        };
        assert_eq!(conflict.decision, decision);
        assert_eq!(queue.list().await, vec![conflict]);
        assert_eq!(harness.coordinator.counts().await.unwrap(), before);
    }

    struct InsertInstead;

    #[async_trait]
    impl ResolutionPolicy for InsertInstead {
        async fn resolve(&self, candidate: &str, _decision: Decision<MemoryId>) -> Result<Resolution> {
            Ok(Resolution::Resolved(Decision::Insert {
                content: candidate.to_string(),
            }))
        }
    }

    /// Rewrites every conflict as a temporal conflict; parks through the
    /// review queue.
    struct Reclassify(HoldForReview);

    #[async_trait]
    impl ResolutionPolicy for Reclassify {
        async fn resolve(&self, _candidate: &str, decision: Decision<MemoryId>) -> Result<Resolution> {
            let memory_ids = match decision {
                Decision::MergeConflict { conflicting_memories } => conflicting_memories
                    .into_iter()
                    .map(|c| c.memory_id)
                    .collect(),
                _ => Vec::new(),
            };
            Ok(Resolution::Resolved(Decision::ResolveTemporalConflict { memory_ids }))
        }

        async fn hold(&self, conflict: PendingConflict) -> Result<()> {
            self.0.hold(conflict).await
        }
    }

    #[tokio::test]
    async fn test_conflict_resolved_into_conflict_is_queued() {
        let harness = Harness::new(embedder());
        let dog = harness.seed("User owns a dog").await;
        let queue = PendingConflicts::new();
        let before = harness.coordinator.counts().await.unwrap();

        let decision = Decision::MergeConflict {
            conflicting_memories: vec![ConflictingMemory {
                memory_id: dog.id.clone(),
                content: "User owns a dog".to_string(),
                reason: "User gave the dog away".to_string(),
            }],
        };
        let policy = Arc::new(Reclassify(HoldForReview::new(queue.clone())));
        let outcome = executor(&harness, policy)
            .execute("User gave the dog away", decision, &CancelToken::never())
            .await
            .unwrap();

        let ExecutionOutcome::Pending(conflict) = outcome else {
            panic!("expected pending");
        };
        assert_eq!(
            conflict.decision,
            Decision::ResolveTemporalConflict {
                memory_ids: vec![dog.id.clone()]
            }
        );
        assert_eq!(queue.list().await, vec![conflict]);
        assert_eq!(harness.coordinator.counts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_policy_can_resolve_conflict() {
        let harness = Harness::new(embedder());

        let outcome = executor(&harness, Arc::new(InsertInstead))
            .execute(
                "User enjoys hiking",
                Decision::ResolveTemporalConflict { memory_ids: vec![] },
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Inserted { .. }));
        assert_eq!(harness.coordinator.counts().await.unwrap().records, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_relevance_reports_committed_insert() {
        let handle = Arc::new(CancelHandle::new());
        let harness = Harness::with_models(
            embedder(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new().then_cancel_and_reply(
                handle.clone(),
                "Hiking relates to the trail memory only.",
                json!({"related_memory_ids": [0]}),
            ),
            ScriptedReasoningModel::new(),
        );
        harness.seed("User hiked the Kalsubai trail").await;

        let err = executor(&harness, hold())
            .execute(
                "User enjoys hiking",
                Decision::Insert {
                    content: "User enjoys hiking".to_string(),
                },
                &handle.token(),
            )
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        let (target, applied, source) = match err {
            Error::Execution {
                target,
                applied,
                source,
                ..
            } => (target, applied, source),
            other => panic!("expected execution error, got {other:?}"),
        };
        let id = target.unwrap();
        assert_eq!(
            applied,
            vec![
                AppliedMutation::RecordInserted { id: id.clone() },
                AppliedMutation::VectorUpserted { id: id.clone() },
            ]
        );
        assert!(matches!(source.as_deref(), Some(Error::Cancelled)));
        assert!(harness.coordinator.find_memory(&id).await.unwrap().is_some());
        assert_eq!(harness.coordinator.counts().await.unwrap().edges, 0);
    }

    #[tokio::test]
    async fn test_cancel_between_additions_reports_earlier_updates() {
        let handle = Arc::new(CancelHandle::new());
        let harness = Harness::with_models(
            embedder(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new(),
            ScriptedReasoningModel::new()
                .then_reply("Unrelated.", json!({"related_memory_ids": []}))
                .then_cancel_and_reply(handle.clone(), "Unrelated.", json!({"related_memory_ids": []})),
        );
        let dog = harness.seed("User owns a dog").await;
        let walks = harness.seed("User walks every morning").await;

        let err = executor(&harness, hold())
            .execute(
                "Bruno joins the morning walks",
                Decision::AdditionToExisting {
                    updated_memories: vec![
                        UpdatedMemory {
                            memory_id: dog.id.clone(),
                            content: "User owns a dog named Bruno".to_string(),
                        },
                        UpdatedMemory {
                            memory_id: walks.id.clone(),
                            content: "User walks Bruno every morning".to_string(),
                        },
                    ],
                },
                &handle.token(),
            )
            .await
            .unwrap_err();

        match err {
            Error::Execution { target, applied, .. } => {
                assert_eq!(target, Some(walks.id.clone()));
                assert_eq!(
                    applied,
                    vec![
                        AppliedMutation::RecordUpdated { id: dog.id.clone() },
                        AppliedMutation::VectorUpserted { id: dog.id.clone() },
                    ]
                );
            }
            other => panic!("expected execution error, got {other:?}"),
        }
        assert_eq!(
            harness.coordinator.get_memory(&walks.id).await.unwrap().content,
            "User walks every morning"
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_mutation() {
        let harness = Harness::new(embedder());
        let handle = CancelHandle::new();
        handle.cancel();

        let err = executor(&harness, hold())
            .execute(
                "User enjoys hiking",
                Decision::Insert {
                    content: "User enjoys hiking".to_string(),
                },
                &handle.token(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(harness.coordinator.counts().await.unwrap(), StoreCounts::default());
    }
}
