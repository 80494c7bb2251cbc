//! Per-call renumbering of memory ids to small integers.
//!
//! Models cross-reference `0, 1, 2` far more reliably than UUIDs. A view
//! lives for one model call and is never persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::memory::{MemoryId, MemoryRecord};

/// Integer id as it appears in prompts and model payloads.
///
/// Signed so that a hallucinated negative id is dropped like any other
/// out-of-range id instead of failing the whole payload decode.
pub type NormalizedId = i64;

/// Timestamp format shown to models: `YYYY/MM/DD HH:MM AM/PM`.
pub const DATETIME_FORMAT: &str = "%Y/%m/%d %I:%M %p";

/// A record as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: NormalizedId,
    pub content: String,
    pub created_at: String,
}

/// Bijection between `0..n` and the original ids, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping {
    ids: Vec<MemoryId>,
}

impl IdMapping {
    /// Original id for a normalized id, or `None` if the model made it up.
    pub fn denormalize(&self, id: NormalizedId) -> Option<&MemoryId> {
        usize::try_from(id).ok().and_then(|idx| self.ids.get(idx))
    }

    /// Normalized id for an original id.
    pub fn normalized(&self, id: &MemoryId) -> Option<NormalizedId> {
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .map(|idx| idx as NormalizedId)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(normalized, original)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (NormalizedId, &MemoryId)> {
        self.ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (idx as NormalizedId, id))
    }
}

/// Records renumbered for one model call, plus the way back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedView {
    pub records: Vec<NormalizedRecord>,
    pub mapping: IdMapping,
}

impl NormalizedView {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// JSON rendering used inside prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.records).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Assign `0..n` in input order.
///
/// A repeated input id would break the bijection and is rejected.
pub fn normalize<'a, I>(records: I) -> Result<NormalizedView>
where
    I: IntoIterator<Item = &'a MemoryRecord>,
{
    let mut seen = HashSet::new();
    let mut view = NormalizedView::default();

    for record in records {
        if !seen.insert(record.id.clone()) {
            return Err(Error::Normalization(format!(
                "memory {} appears more than once",
                record.id
            )));
        }
        view.records.push(NormalizedRecord {
            id: view.mapping.ids.len() as NormalizedId,
            content: record.content.clone(),
            created_at: record.created_at.format(DATETIME_FORMAT).to_string(),
        });
        view.mapping.ids.push(record.id.clone());
    }

    Ok(view)
}
