use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier reported when nothing in the database matches.
pub const UNKNOWN_PUID: &str = "UNKNOWN";

/// How a format was recognised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchBasis {
    Signature,
    Extension,
    Unknown,
}

/// Format detected for one file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectedFormat {
    /// Registry identifier (PRONOM style, e.g. `fmt/11`).
    pub puid: String,
    pub name: String,
    pub mime: String,
    pub basis: MatchBasis,
}

impl DetectedFormat {
    pub fn unknown() -> Self {
        Self {
            puid: UNKNOWN_PUID.to_string(),
            name: "Unknown".to_string(),
            mime: "application/octet-stream".to_string(),
            basis: MatchBasis::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.basis == MatchBasis::Unknown
    }
}

impl fmt::Display for DetectedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.puid, self.name)
    }
}
