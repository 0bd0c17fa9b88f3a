//! Error types for feedmesh

use thiserror::Error;

/// Core feedmesh errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    // Precondition errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Value too large: {size} bytes exceeds limit of {limit}")]
    ValueTooLarge { size: usize, limit: usize },

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // Session errors
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Service errors
    #[error("Node stopped")]
    NodeStopped,

    #[error("Cancelled: node destroyed before completion")]
    Cancelled,
}

impl FeedError {
    /// Whether this error is a caller-supplied precondition violation
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            FeedError::InvalidArgument(_)
                | FeedError::ValueTooLarge { .. }
                | FeedError::InvalidKeyLength { .. }
        )
    }
}

/// Result type for feedmesh operations
pub type FeedResult<T> = Result<T, FeedError>;
