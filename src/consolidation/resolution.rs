//! What happens to conflict decisions.
//!
//! Merge and temporal conflicts are never applied automatically. A
//! [`ResolutionPolicy`] either parks them for review or turns them into a
//! decision the executor can apply.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::MemoryId;

use super::decision::Decision;

/// A conflict waiting for an outside decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConflict {
    pub ticket: Uuid,
    pub candidate: String,
    pub decision: Decision<MemoryId>,
    pub held_at: DateTime<Utc>,
}

impl PendingConflict {
    pub fn new(candidate: impl Into<String>, decision: Decision<MemoryId>) -> Self {
        Self {
            ticket: Uuid::new_v4(),
            candidate: candidate.into(),
            decision,
            held_at: Utc::now(),
        }
    }
}

/// Result of handing a conflict to a policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Nothing is mutated; the conflict waits.
    Pending(PendingConflict),
    /// Apply this decision instead.
    Resolved(Decision<MemoryId>),
}

#[async_trait]
pub trait ResolutionPolicy: Send + Sync {
    async fn resolve(&self, candidate: &str, decision: Decision<MemoryId>) -> Result<Resolution>;

    /// Park a conflict the executor could not apply, such as a resolution
    /// that is itself a conflict.
    ///
    /// Without a queue the returned [`Resolution::Pending`] outcome is the
    /// only record of it.
    async fn hold(&self, conflict: PendingConflict) -> Result<()> {
        warn!(
            ticket = %conflict.ticket,
            action = %conflict.decision.tag(),
            "Conflict left pending with no review queue"
        );
        Ok(())
    }
}

/// Shared list of conflicts parked by [`HoldForReview`].
#[derive(Debug, Clone, Default)]
pub struct PendingConflicts {
    inner: Arc<Mutex<Vec<PendingConflict>>>,
}

impl PendingConflicts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, conflict: PendingConflict) {
        self.inner.lock().await.push(conflict);
    }

    pub async fn list(&self) -> Vec<PendingConflict> {
        self.inner.lock().await.clone()
    }

    /// Remove and return one conflict.
    pub async fn take(&self, ticket: Uuid) -> Option<PendingConflict> {
        let mut inner = self.inner.lock().await;
        let idx = inner.iter().position(|c| c.ticket == ticket)?;
        Some(inner.remove(idx))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Default policy: park every conflict and mutate nothing.
#[derive(Debug, Clone, Default)]
pub struct HoldForReview {
    queue: PendingConflicts,
}

impl HoldForReview {
    pub fn new(queue: PendingConflicts) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &PendingConflicts {
        &self.queue
    }
}

#[async_trait]
impl ResolutionPolicy for HoldForReview {
    async fn resolve(&self, candidate: &str, decision: Decision<MemoryId>) -> Result<Resolution> {
        let conflict = PendingConflict::new(candidate, decision);
        self.hold(conflict.clone()).await?;
        Ok(Resolution::Pending(conflict))
    }

    async fn hold(&self, conflict: PendingConflict) -> Result<()> {
        info!(
            ticket = %conflict.ticket,
            action = %conflict.decision.tag(),
            "Conflict held for review"
        );
        self.queue.push(conflict).await;
        Ok(())
    }
}
