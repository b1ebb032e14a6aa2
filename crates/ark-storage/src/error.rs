use std::time::Duration;

use ark_types::NodeId;

/// Errors from storage node operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The node did not answer within the configured timeout.
    #[error("node {node} timed out after {after:?}")]
    Timeout { node: NodeId, after: Duration },

    /// The node refused the connection or reported itself stopped.
    #[error("node {node} unavailable: {reason}")]
    Unavailable { node: NodeId, reason: String },

    /// The node does not have room for the write.
    #[error("node {node} has {free} bytes free, {needed} needed")]
    Full { node: NodeId, needed: u64, free: u64 },

    /// No client is configured for this node id.
    #[error("unknown storage node: {0}")]
    UnknownNode(NodeId),

    /// I/O failure on the node's backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Digest computation on the node failed.
    #[error("digest error: {0}")]
    Crypto(#[from] ark_crypto::CryptoError),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
