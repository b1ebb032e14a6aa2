use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock timestamp in milliseconds since the UNIX epoch.
///
/// Used for `createdAt`/`checkedAt` style fields on records. Ordering is
/// plain numeric ordering of the millisecond value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from an explicit millisecond value.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(millis)
    }

    /// The UNIX epoch.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Milliseconds since the UNIX epoch.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, saturating at zero.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_produces_reasonable_timestamp() {
        // Should be after 2020-01-01 (1577836800000 ms)
        assert!(Timestamp::now().as_millis() > 1_577_836_800_000);
    }

    #[test]
    fn zero_is_smallest() {
        assert!(Timestamp::zero() < Timestamp::from_millis(1));
    }

    #[test]
    fn since_saturates() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(1_250);
        assert_eq!(b.since(a), Duration::from_millis(250));
        assert_eq!(a.since(b), Duration::ZERO);
    }

    #[test]
    fn serializes_as_plain_number() {
        let json = serde_json::to_string(&Timestamp::from_millis(42)).unwrap();
        assert_eq!(json, "42");
    }
}
