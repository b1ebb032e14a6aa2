use std::path::PathBuf;

use ark_fixity::FixityError;
use ark_format::FormatError;
use ark_storage::StorageError;
use ark_store::StoreError;
use ark_types::{BatchId, BatchState, SipId};

/// Errors from the batch ingest coordinator.
///
/// `NotFound`, `InvalidState` and `InsufficientStorage` are returned to the
/// control-surface caller; the rest end up as the failure message of a
/// single SIP unit.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// No batch with this id is registered.
    #[error("batch not found: {0}")]
    NotFound(BatchId),

    /// The operation is not allowed in the batch's current state.
    #[error("cannot {operation} batch {batch} in state {state}")]
    InvalidState {
        batch: BatchId,
        state: BatchState,
        operation: &'static str,
    },

    /// Storage is down or too full to admit the work.
    #[error("insufficient storage: {free_bytes} bytes free, {required_bytes} required, running={running}")]
    InsufficientStorage {
        free_bytes: u64,
        required_bytes: u64,
        running: bool,
    },

    /// A SIP id appears twice in one batch.
    #[error("duplicate SIP in batch: {0}")]
    Duplicate(SipId),

    #[error("identification failed: {0}")]
    Identification(#[from] FormatError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The SIP was rejected by validation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("fixity check failed: {0}")]
    Fixity(#[from] FixityError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("repository error: {0}")]
    Repository(#[from] StoreError),

    #[error("package encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    /// The batch was canceled while the unit was running.
    #[error("batch canceled")]
    Canceled,

    /// A blocking task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for coordinator operations.
pub type BatchResult<T> = Result<T, BatchError>;
