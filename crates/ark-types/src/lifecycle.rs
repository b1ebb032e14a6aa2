use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an ingest batch.
///
/// ```text
/// NEW --start--> RUNNING --suspend--> SUSPENDED --resume--> RUNNING
/// RUNNING | SUSPENDED --cancel--> CANCELED
/// RUNNING --all units terminal--> COMPLETED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    New,
    Running,
    Suspended,
    Canceled,
    Completed,
}

impl BatchState {
    /// `CANCELED` and `COMPLETED` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Canceled => "CANCELED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(BatchState::Canceled.is_terminal());
        assert!(BatchState::Completed.is_terminal());
        assert!(!BatchState::New.is_terminal());
        assert!(!BatchState::Running.is_terminal());
        assert!(!BatchState::Suspended.is_terminal());
    }

    #[test]
    fn serializes_screaming_case() {
        let json = serde_json::to_string(&BatchState::Suspended).unwrap();
        assert_eq!(json, "\"SUSPENDED\"");
    }
}
