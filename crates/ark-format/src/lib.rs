//! File format identification for Ark.
//!
//! The [`FormatIdentifier`] characterizes every file of a SIP against a
//! [`SignatureDatabase`]. Identification is a pure function of the
//! database and the file bytes: the identifier holds no mutable state and
//! can be shared freely between ingest workers.
//!
//! # Matching order
//!
//! 1. Magic-byte signatures, longest pattern first
//! 2. File extension
//! 3. Otherwise the `UNKNOWN` format
//!
//! A built-in database covering common archival formats is embedded; an
//! operator-supplied TOML file replaces it.

pub mod error;
pub mod format;
pub mod identifier;
pub mod signature;

pub use error::{FormatError, FormatResult};
pub use format::{DetectedFormat, MatchBasis, UNKNOWN_PUID};
pub use identifier::{relative_key, FormatIdentifier};
pub use signature::{FormatEntry, MagicEntry, SignatureDatabase};
