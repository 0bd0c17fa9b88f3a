//! In-memory ordered store

use std::collections::BTreeSet;
use std::ops::Bound;

use parking_lot::RwLock;

use feedmesh_core::{Range, Value};

use crate::ContentStore;

/// Ordered in-memory value set; the default store of a node
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeSet<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl ContentStore for MemoryStore {
    fn has(&self, value: &Value) -> bool {
        self.values.read().contains(value)
    }

    fn bulk_insert(&self, values: &[Value]) -> Vec<Value> {
        let mut stored = self.values.write();
        let accepted: Vec<Value> = values
            .iter()
            .filter(|value| stored.insert((*value).clone()))
            .cloned()
            .collect();

        tracing::trace!(
            offered = values.len(),
            accepted = accepted.len(),
            total = stored.len(),
            "bulk insert"
        );
        accepted
    }

    fn request(&self, range: &Range, limit: Option<usize>) -> Vec<Value> {
        let lower = match range.start() {
            Some(start) => Bound::Included(start.clone()),
            None => Bound::Unbounded,
        };
        let upper = match range.end() {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        // BTreeSet::range panics on an inverted interval
        if let (Bound::Included(start), Bound::Excluded(end)) = (&lower, &upper) {
            if start >= end {
                return Vec::new();
            }
        }

        let stored = self.values.read();
        stored
            .range((lower, upper))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
