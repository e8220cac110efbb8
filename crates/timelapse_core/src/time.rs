//! Time types for timelapse.
//!
//! Recorded timestamps are wall-clock milliseconds captured by the live
//! recorder. Replay never reads the clock; it only compares recorded values.

use serde::{Deserialize, Serialize};

/// Wall clock timestamp in unix milliseconds
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Earliest representable instant
    pub const MIN: Self = Self(0);

    /// Latest representable instant, used as "end of session"
    pub const MAX: Self = Self(u64::MAX);

    /// Create from unix milliseconds
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current timestamp (for recording metadata only)
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(millis)
    }

    /// Convert to milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since an earlier timestamp (zero if `earlier` is later)
    #[must_use]
    pub const fn duration_since(&self, earlier: &Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Add a duration
    #[must_use]
    pub const fn add(&self, duration: &Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis()))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1_000, self.0 % 1_000)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A duration between timestamps, in milliseconds
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Duration(u64);

impl Duration {
    /// Zero duration
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Duration from milliseconds
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Duration from seconds
    #[must_use]
    pub const fn from_secs(seconds: u64) -> Self {
        Self(seconds.saturating_mul(1_000))
    }

    /// Get total milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Convert to a std duration
    #[must_use]
    pub const fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0)
    }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 1_000 {
            write!(f, "{}ms", self.0)
        } else {
            write!(f, "{}.{:03}s", self.0 / 1_000, self.0 % 1_000)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ord() {
        let t1 = Timestamp::from_millis(1);
        let t2 = Timestamp::from_millis(2);
        assert!(t1 < t2);
        assert!(Timestamp::MAX > t2);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t1 = Timestamp::from_millis(100_500);
        let t2 = Timestamp::from_millis(102_200);

        let duration = t2.duration_since(&t1);
        assert_eq!(duration.as_millis(), 1_700);
        assert_eq!(t1.add(&duration), t2);
        assert_eq!(t1.duration_since(&t2), Duration::zero());
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::from_millis(1_234).to_string(), "1.234");
    }

    #[test]
    fn test_duration() {
        assert_eq!(Duration::from_secs(60).as_millis(), 60_000);
        assert_eq!(Duration::from_millis(1500).to_string(), "1.500s");
        assert_eq!(Duration::from_millis(15).to_string(), "15ms");
        assert_eq!(Duration::from_millis(15).to_std(), std::time::Duration::from_millis(15));
    }
}
