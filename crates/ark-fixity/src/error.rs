use std::path::PathBuf;

use ark_crypto::CryptoError;
use ark_store::StoreError;
use ark_types::SipId;

/// Errors that prevent a fixity check from being carried out.
#[derive(Debug, thiserror::Error)]
pub enum FixityError {
    /// The file to check could not be read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The SIP has no stored AIP version to check.
    #[error("no stored AIP for SIP {0}")]
    MissingObject(SipId),

    /// A submitted manifest could not be parsed.
    #[error("manifest {path} line {line}: {reason}")]
    Manifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("digest error: {0}")]
    Digest(CryptoError),

    #[error("repository error: {0}")]
    Repository(#[from] StoreError),
}

impl From<CryptoError> for FixityError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Io { path, source } => Self::Io { path, source },
            other => Self::Digest(other),
        }
    }
}

/// Result alias for fixity operations.
pub type VerifyResult<T> = Result<T, FixityError>;
