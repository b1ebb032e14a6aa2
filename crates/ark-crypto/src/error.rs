use std::path::PathBuf;

/// Errors from digest operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The content could not be read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A digest string could not be parsed.
    #[error("invalid {algorithm} digest {value:?}: {reason}")]
    InvalidDigest {
        algorithm: String,
        value: String,
        reason: String,
    },

    /// The algorithm name is not supported.
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),
}

impl CryptoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for digest operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
