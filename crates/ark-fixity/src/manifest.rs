use std::path::{Component, Path, PathBuf};

use ark_crypto::{Digest, DigestAlgorithm};

use crate::error::{FixityError, VerifyResult};

/// One line of a submitted manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    /// `/`-separated path relative to the SIP root.
    pub path: String,
    pub digest: Digest,
}

/// Checksums shipped by the producer inside a SIP, in BagIt layout:
/// `manifest-<algorithm>.txt` at the SIP root, one `<hex>  <path>` per line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedManifest {
    pub path: PathBuf,
    pub algorithm: DigestAlgorithm,
    pub entries: Vec<ManifestEntry>,
}

impl SubmittedManifest {
    /// Manifest file name for `algorithm`.
    pub fn file_name(algorithm: DigestAlgorithm) -> String {
        format!("manifest-{}.txt", algorithm.name())
    }

    /// True if `relative` names a manifest file at the SIP root.
    pub fn is_manifest_path(relative: &str) -> bool {
        DigestAlgorithm::ALL
            .iter()
            .any(|alg| relative == Self::file_name(*alg))
    }

    /// Find and parse the manifest in `root`, preferring `preferred` when
    /// several are present.
    pub fn discover(root: &Path, preferred: DigestAlgorithm) -> VerifyResult<Option<Self>> {
        if !root.is_dir() {
            return Ok(None);
        }
        let order = std::iter::once(preferred)
            .chain(DigestAlgorithm::ALL.into_iter().filter(|a| *a != preferred));
        for algorithm in order {
            let path = root.join(Self::file_name(algorithm));
            if path.is_file() {
                let text = std::fs::read_to_string(&path).map_err(|source| FixityError::Io {
                    path: path.clone(),
                    source,
                })?;
                return Self::parse(path, algorithm, &text).map(Some);
            }
        }
        Ok(None)
    }

    pub fn parse(path: PathBuf, algorithm: DigestAlgorithm, text: &str) -> VerifyResult<Self> {
        let mut entries = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let bad = |reason: String| FixityError::Manifest {
                path: path.clone(),
                line: index + 1,
                reason,
            };
            let (hex, file) = line
                .trim_start()
                .split_once(char::is_whitespace)
                .ok_or_else(|| bad("expected `<digest> <path>`".into()))?;
            let file = file.trim_start().trim_start_matches("./");
            if file.is_empty() {
                return Err(bad("missing path".into()));
            }
            let file = file.replace('\\', "/");
            if !is_contained(&file) {
                return Err(bad(format!("path {file:?} escapes the SIP root")));
            }
            let digest = Digest::parse(algorithm, hex).map_err(|e| bad(e.to_string()))?;
            entries.push(ManifestEntry { path: file, digest });
        }
        Ok(Self {
            path,
            algorithm,
            entries,
        })
    }
}

/// Entries must stay under the SIP root: no `..`, no absolute or prefixed paths.
fn is_contained(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
