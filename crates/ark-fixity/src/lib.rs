//! Fixity verification for Ark.
//!
//! - [`FixityVerifier`] -- checks files against expected digests and
//!   cross-checks every storage replica of an AIP
//! - [`SubmittedManifest`] -- BagIt-style `manifest-<algorithm>.txt`
//!   shipped inside a SIP
//! - [`FixityResult`] -- the outcome of one check
//!
//! A mismatch is a result value, not an error. Errors are reserved for
//! checks that could not be carried out at all: an unreadable file, or a
//! SIP with no stored AIP version to check against.

pub mod error;
pub mod manifest;
pub mod result;
pub mod verifier;

pub use error::{FixityError, VerifyResult};
pub use manifest::{ManifestEntry, SubmittedManifest};
pub use result::{FixityResult, FixitySubject};
pub use verifier::FixityVerifier;
