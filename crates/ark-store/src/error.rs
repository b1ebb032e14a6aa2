use ark_types::{BatchId, SipId};

/// Errors from repository and allocation operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A referenced SIP has no record (e.g. allocating a version for an
    /// unregistered SIP).
    #[error("missing object: SIP {0} is not registered")]
    MissingObject(SipId),

    /// The batch has no record.
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// The version record does not exist.
    #[error("version {version} of SIP {sip_id} not found")]
    VersionNotFound { sip_id: SipId, version: u32 },

    /// The underlying persistence backend failed.
    #[error("repository backend error: {0}")]
    Backend(String),
}

/// Result alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;
