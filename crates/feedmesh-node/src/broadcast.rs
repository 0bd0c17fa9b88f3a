//! Broadcast completion tracking

use std::fmt;

use feedmesh_core::Value;

/// Called once with the delivered values when a broadcast is done
pub type Completion = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Options for insert and bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Report completion after this many peer acknowledgements.
    /// Every eligible peer is still sent the values.
    pub min_peers: Option<usize>,
}

impl InsertOptions {
    pub fn with_min_peers(mut self, min_peers: usize) -> Self {
        self.min_peers = Some(min_peers);
        self
    }

    /// Acknowledgements needed out of `initiated` sends
    pub fn threshold(&self, initiated: usize) -> usize {
        match self.min_peers {
            Some(min_peers) => initiated.min(min_peers),
            None => initiated,
        }
    }
}

/// Countdown over peer acknowledgements that fires its completion once.
///
/// Built only for a non-zero threshold; zero-participant broadcasts are
/// completed by the node's deferred queue instead.
pub struct CompletionLatch {
    remaining: usize,
    values: Vec<Value>,
    completion: Option<Completion>,
}

impl CompletionLatch {
    pub fn new(threshold: usize, values: Vec<Value>, completion: Completion) -> Self {
        debug_assert!(threshold > 0, "zero-threshold latch never fires");
        CompletionLatch {
            remaining: threshold,
            values,
            completion: Some(completion),
        }
    }

    /// Record one acknowledgement. Returns the completion and its values
    /// the first time the count reaches zero, `None` otherwise.
    pub fn count_down(&mut self) -> Option<(Completion, Vec<Value>)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        let completion = self.completion.take()?;
        Some((completion, std::mem::take(&mut self.values)))
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_none()
    }
}

impl fmt::Debug for CompletionLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionLatch")
            .field("remaining", &self.remaining)
            .field("values", &self.values.len())
            .field("done", &self.is_done())
            .finish()
    }
}
