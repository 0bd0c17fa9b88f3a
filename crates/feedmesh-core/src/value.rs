//! Content values and key ranges
//!
//! A value is an opaque byte string; its bytes are also its key. Ranges are
//! half-open intervals over those bytes in lexicographic order.

use std::fmt;

use bytes::Bytes;

use crate::{FeedError, FeedResult};

/// Default upper bound for a single value
pub const DEFAULT_MAX_VALUE_SIZE: usize = 64 * 1024;

/// One replicated content value
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Value(Bytes);

impl Value {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Value(bytes.into())
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Value(Bytes::from_static(bytes))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Check that this value is well formed: non-empty and within `limit`
    pub fn check(&self, limit: usize) -> FeedResult<()> {
        if self.is_empty() {
            return Err(FeedError::InvalidArgument(
                "value must not be empty".into(),
            ));
        }
        if self.len() > limit {
            return Err(FeedError::ValueTooLarge {
                size: self.len(),
                limit,
            });
        }
        Ok(())
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value(Bytes::copy_from_slice(bytes))
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value(Bytes::from(bytes))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.len() <= 32 => write!(f, "Value({:?})", s),
            _ => write!(f, "Value(<{} bytes>)", self.0.len()),
        }
    }
}

/// Half-open key range `[start, end)`; a missing bound is unbounded
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Range {
    start: Option<Value>,
    end: Option<Value>,
}

impl Range {
    /// Every value
    pub fn full() -> Self {
        Range::default()
    }

    /// Values `>= start` and `< end`
    pub fn between(start: impl Into<Value>, end: impl Into<Value>) -> Self {
        Range {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    /// Values `>= start`
    pub fn starting_at(start: impl Into<Value>) -> Self {
        Range {
            start: Some(start.into()),
            end: None,
        }
    }

    /// Values `< end`
    pub fn until(end: impl Into<Value>) -> Self {
        Range {
            start: None,
            end: Some(end.into()),
        }
    }

    /// Values starting with `prefix`
    pub fn prefix(prefix: impl Into<Value>) -> Self {
        let prefix = prefix.into();
        let end = prefix_successor(prefix.as_bytes()).map(Value::from);
        Range {
            start: Some(prefix),
            end,
        }
    }

    pub fn start(&self) -> Option<&Value> {
        self.start.as_ref()
    }

    pub fn end(&self) -> Option<&Value> {
        self.end.as_ref()
    }

    pub fn contains(&self, value: &Value) -> bool {
        if let Some(start) = &self.start {
            if value < start {
                return false;
            }
        }
        match &self.end {
            Some(end) => value < end,
            None => true,
        }
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Range[")?;
        match &self.start {
            Some(start) => write!(f, "{:?}", start)?,
            None => write!(f, "..")?,
        }
        write!(f, ", ")?;
        match &self.end {
            Some(end) => write!(f, "{:?}", end)?,
            None => write!(f, "..")?,
        }
        write!(f, ")")
    }
}

/// Smallest byte string greater than every string with this prefix
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
