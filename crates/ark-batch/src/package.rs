use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ark_crypto::Digest;
use ark_format::DetectedFormat;
use ark_types::{SipId, Timestamp};

use crate::error::{BatchError, BatchResult};

/// One file carried inside an AIP.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AipFile {
    pub path: String,
    pub format: DetectedFormat,
    pub digest: Digest,
    pub bytes: Vec<u8>,
}

/// The archival package written to every storage node, one binary object
/// per `(sip, version)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AipPackage {
    pub sip_id: SipId,
    pub version: u32,
    pub created_at: Timestamp,
    pub files: Vec<AipFile>,
}

impl AipPackage {
    /// Read every identified file of the SIP into a package.
    ///
    /// Each file must have a digest from the fixity stage. All content is
    /// held in memory and [`encode`](Self::encode) copies it once more;
    /// callers bound the size with [`content_size`] first.
    pub fn assemble(
        sip_id: SipId,
        version: u32,
        source: &Path,
        formats: &BTreeMap<String, DetectedFormat>,
        digests: &BTreeMap<String, Digest>,
    ) -> BatchResult<Self> {
        let mut files = Vec::with_capacity(formats.len());
        for (relative, format) in formats {
            let digest = digests.get(relative).ok_or_else(|| {
                BatchError::Validation(format!("no digest recorded for {relative}"))
            })?;
            let path = content_path(source, relative);
            let bytes = std::fs::read(&path).map_err(|e| BatchError::io(&path, e))?;
            files.push(AipFile {
                path: relative.clone(),
                format: format.clone(),
                digest: digest.clone(),
                bytes,
            });
        }
        Ok(Self {
            sip_id,
            version,
            created_at: Timestamp::now(),
            files,
        })
    }

    pub fn encode(&self) -> BatchResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> BatchResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Total content bytes across all files.
    pub fn content_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes.len() as u64).sum()
    }
}

/// Bytes on disk of every identified file of a SIP.
pub(crate) fn content_size(
    source: &Path,
    formats: &BTreeMap<String, DetectedFormat>,
) -> BatchResult<u64> {
    formats.keys().try_fold(0u64, |total, relative| {
        let path = content_path(source, relative);
        let len = std::fs::metadata(&path)
            .map_err(|e| BatchError::io(&path, e))?
            .len();
        Ok(total.saturating_add(len))
    })
}

/// Location of a SIP file given its key from format identification.
///
/// A single-file SIP is keyed by its own name, so the source itself is
/// the file.
pub(crate) fn content_path(source: &Path, relative: &str) -> PathBuf {
    if source.is_file() {
        source.to_path_buf()
    } else {
        source.join(relative)
    }
}
