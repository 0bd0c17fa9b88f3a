//! Content store contract

use std::sync::Arc;

use feedmesh_core::{Range, Value};

/// The set of known content for one feed.
///
/// Stores are shared between the node and its peer units, so every method
/// takes `&self`; implementations handle their own synchronization.
pub trait ContentStore: Send + Sync {
    /// Whether `value` is already known
    fn has(&self, value: &Value) -> bool;

    /// Insert a batch and return the values that were not known before.
    ///
    /// The result keeps input order and holds each value at most once, even
    /// when the batch repeats it.
    fn bulk_insert(&self, values: &[Value]) -> Vec<Value>;

    /// Known values inside `range`, in key order, at most `limit` of them
    fn request(&self, range: &Range, limit: Option<usize>) -> Vec<Value>;
}

impl<S: ContentStore + ?Sized> ContentStore for Arc<S> {
    fn has(&self, value: &Value) -> bool {
        (**self).has(value)
    }

    fn bulk_insert(&self, values: &[Value]) -> Vec<Value> {
        (**self).bulk_insert(values)
    }

    fn request(&self, range: &Range, limit: Option<usize>) -> Vec<Value> {
        (**self).request(range, limit)
    }
}
