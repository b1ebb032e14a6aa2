use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use ark_crypto::Digest;
use ark_types::{NodeId, SipId, Timestamp};

/// What a fixity check was about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixitySubject {
    File(PathBuf),
    Sip(SipId),
}

impl fmt::Display for FixitySubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Sip(sip) => write!(f, "sip {sip}"),
        }
    }
}

/// Outcome of one fixity check. Transient: reported, never stored here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixityResult {
    pub subject: FixitySubject,
    pub expected: Digest,
    /// `None` when nothing could be computed (no replica answered).
    pub computed: Option<Digest>,
    pub matched: bool,
    pub checked_at: Timestamp,
    /// Replicas whose digest differs from `expected` or that lack the
    /// package.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub divergent_nodes: Vec<NodeId>,
    /// Replicas that could not be asked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreachable_nodes: Vec<NodeId>,
}

impl FixityResult {
    /// Result of comparing one locally computed digest.
    pub fn compared(subject: FixitySubject, expected: Digest, computed: Digest) -> Self {
        Self {
            matched: computed == expected,
            subject,
            expected,
            computed: Some(computed),
            checked_at: Timestamp::now(),
            divergent_nodes: Vec::new(),
            unreachable_nodes: Vec::new(),
        }
    }
}
