//! Bridges embassy time to the `core::time::Duration` arithmetic the node
//! state machines are written against.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::ops::Add;

use embassy_time::{Duration, Instant};

/// Monotonic instant usable as the scheduler's time base.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeInstant(pub Instant);

impl NodeInstant {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }
}

impl Add<core::time::Duration> for NodeInstant {
    type Output = Self;

    fn add(self, rhs: core::time::Duration) -> Self {
        Self(self.0.checked_add(to_embassy(rhs)).unwrap_or(Instant::MAX))
    }
}

/// Converts with microsecond resolution, saturating on overflow.
#[must_use]
pub fn to_embassy(duration: core::time::Duration) -> Duration {
    Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_core_durations() {
        let start = NodeInstant(Instant::from_millis(1_000));
        let later = start + core::time::Duration::from_millis(2_500);
        assert_eq!(later.0, Instant::from_millis(3_500));
        assert!(later > start);
    }

    #[test]
    fn saturates_at_the_end_of_time() {
        let start = NodeInstant(Instant::from_millis(1));
        assert_eq!((start + core::time::Duration::MAX).0, Instant::MAX);
    }
}
