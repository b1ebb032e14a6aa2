use std::path::PathBuf;

/// Errors from format identification.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The path to analyze does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// The signature database could not be loaded or is malformed, or the
    /// identification itself failed.
    #[error("identification failed: {0}")]
    Identification(String),

    /// A file could not be read while sniffing its header.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for identification operations.
pub type FormatResult<T> = Result<T, FormatError>;
