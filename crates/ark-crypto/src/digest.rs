use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::{CryptoError, CryptoResult};

/// Default read buffer for streaming digests.
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithms supported for fixity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 3] = [Self::Sha256, Self::Sha512, Self::Blake3];

    /// Canonical lower-case name, also used as the digest text prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    /// Length of the digest in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha256 | Self::Blake3 => 32,
            Self::Sha512 => 64,
        }
    }

    fn hasher(&self) -> StreamingHasher {
        match self {
            Self::Sha256 => StreamingHasher::Sha256(sha2::Sha256::new()),
            Self::Sha512 => StreamingHasher::Sha512(sha2::Sha512::new()),
            Self::Blake3 => StreamingHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CryptoError;

    /// Accepts `sha256`, `SHA-256`, `sha-512`, `BLAKE3` and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            _ => Err(CryptoError::UnknownAlgorithm(s.to_string())),
        }
    }
}

enum StreamingHasher {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamingHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// A digest value tagged with the algorithm that produced it.
///
/// The value is always stored as lower-case hex, so two digests are equal
/// exactly when their algorithms and bytes are equal, regardless of how the
/// text was originally written.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    value: String,
}

impl Digest {
    /// Build a digest from raw output bytes.
    pub fn from_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex::encode(bytes),
        }
    }

    /// Parse a digest for a known algorithm.
    ///
    /// Normalizes surrounding whitespace, letter case and an optional
    /// `<algorithm>:` prefix, then checks the hex length.
    pub fn parse(algorithm: DigestAlgorithm, text: &str) -> CryptoResult<Self> {
        let invalid = |reason: &str| CryptoError::InvalidDigest {
            algorithm: algorithm.name().to_string(),
            value: text.to_string(),
            reason: reason.to_string(),
        };

        let mut body = text.trim();
        if let Some((prefix, rest)) = body.split_once(':') {
            let prefixed: DigestAlgorithm = prefix.parse().map_err(|_| invalid("unknown prefix"))?;
            if prefixed != algorithm {
                return Err(invalid("algorithm prefix does not match"));
            }
            body = rest.trim();
        }

        let value = body.to_ascii_lowercase();
        let bytes = hex::decode(&value).map_err(|e| invalid(&e.to_string()))?;
        if bytes.len() != algorithm.output_len() {
            return Err(invalid(&format!(
                "expected {} bytes, got {}",
                algorithm.output_len(),
                bytes.len()
            )));
        }
        Ok(Self { algorithm, value })
    }

    /// Parse a self-describing `<algorithm>:<hex>` digest.
    pub fn parse_prefixed(text: &str) -> CryptoResult<Self> {
        let (prefix, _) = text
            .trim()
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidDigest {
                algorithm: "unknown".into(),
                value: text.to_string(),
                reason: "missing algorithm prefix".into(),
            })?;
        Self::parse(prefix.parse()?, text)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lower-case hex value without prefix.
    pub fn hex(&self) -> &str {
        &self.value
    }

    /// Short form (first 12 hex characters) for logs.
    pub fn short_hex(&self) -> &str {
        &self.value[..self.value.len().min(12)]
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Streaming digest calculator.
///
/// Reads content through a fixed-size buffer, so memory use is independent
/// of file size. The engine holds no mutable state and can be shared freely.
#[derive(Clone, Debug)]
pub struct DigestEngine {
    buffer_size: usize,
}

impl DigestEngine {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Engine with a custom read buffer size (minimum one byte).
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Digest an in-memory byte slice.
    pub fn digest_bytes(&self, data: &[u8], algorithm: DigestAlgorithm) -> Digest {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Digest::from_bytes(algorithm, &hasher.finalize())
    }

    /// Digest everything readable from `reader`. Returns the digest and the
    /// number of bytes consumed.
    pub fn digest_reader<R: Read>(
        &self,
        mut reader: R,
        algorithm: DigestAlgorithm,
    ) -> std::io::Result<(Digest, u64)> {
        let mut hasher = algorithm.hasher();
        let mut buffer = vec![0u8; self.buffer_size];
        let mut total = 0u64;
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..read]);
            total += read as u64;
        }
        Ok((Digest::from_bytes(algorithm, &hasher.finalize()), total))
    }

    /// Digest a file on disk.
    pub fn digest(&self, path: &Path, algorithm: DigestAlgorithm) -> CryptoResult<Digest> {
        let file = File::open(path).map_err(|e| CryptoError::io(path, e))?;
        let (digest, _) = self
            .digest_reader(file, algorithm)
            .map_err(|e| CryptoError::io(path, e))?;
        Ok(digest)
    }

    /// Returns `true` if the file at `path` hashes to `expected`.
    ///
    /// The file is digested with the expected digest's algorithm.
    pub fn verify(&self, path: &Path, expected: &Digest) -> CryptoResult<bool> {
        let computed = self.digest(path, expected.algorithm())?;
        Ok(computed == *expected)
    }
}

impl Default for DigestEngine {
    fn default() -> Self {
        Self::new()
    }
}
