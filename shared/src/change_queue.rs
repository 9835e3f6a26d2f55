//! Per-object change coalescing for outbound batching

use crate::change::{merge_properties, ChangeRecord, Owned};
use std::collections::HashMap;

/// Holds the latest logically-equivalent record per object id.
///
/// Merge rules for [`push`](ChangeQueue::push):
/// - an `add`, or any record for an id with no pending entry, replaces the entry
/// - a `remove` replaces the entry, discarding pending properties
/// - an `update` onto a pending entry merges its properties and keeps the
///   entry's type and owner, so add + update stays an add
#[derive(Debug, Default)]
pub struct ChangeQueue {
    order: Vec<String>,
    changes: HashMap<String, ChangeRecord>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ChangeRecord) {
        let id = record.id().to_string();

        if let ChangeRecord::Update { properties, .. } = &record {
            if let Some(existing) = self.changes.get_mut(&id) {
                // A pending remove has no properties and stays a remove
                if let Some(target) = existing.properties_mut() {
                    merge_properties(target, properties);
                }
                return;
            }
        }

        if let Some(existing) = self.changes.get_mut(&id) {
            *existing = record;
            return;
        }

        self.order.push(id.clone());
        self.changes.insert(id, record);
    }

    pub fn push_list(&mut self, records: impl IntoIterator<Item = ChangeRecord>) {
        for record in records {
            self.push(record);
        }
    }

    /// Returns the pending records in order of first appearance and clears the queue
    pub fn flush_queue(&mut self) -> Vec<ChangeRecord> {
        let mut changes = std::mem::take(&mut self.changes);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|id| changes.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
