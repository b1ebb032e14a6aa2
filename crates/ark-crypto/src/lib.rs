//! Content digests for Ark.
//!
//! Provides the [`DigestEngine`], a streaming digest calculator over files and
//! readers, and the normalized [`Digest`] value it produces. Digests are
//! computed with a fixed-size buffer so arbitrarily large files never have to
//! fit in memory.
//!
//! All algorithms wrap established libraries (`sha2`, `blake3`); there is no
//! custom cryptography here.

pub mod digest;
pub mod error;

pub use digest::{Digest, DigestAlgorithm, DigestEngine};
pub use error::{CryptoError, CryptoResult};
