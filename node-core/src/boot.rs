//! Boot-time decisions and the node's fixed timing table.
//!
//! Every wake from suspend re-enters here with nothing but the store intact.

use core::time::Duration;

use crate::config::{ConfigStore, DeviceConfiguration, LoadError, StoreError};
use crate::discovery::{DISCOVERY_COUNT, DISCOVERY_INTERVAL};
use crate::probe::PROBE_INTERVAL;
use crate::provisioning::RESTART_FLUSH_DELAY;
use crate::reset::{RESET_HOLD, RESET_POLL_INTERVAL, RESET_SETTLE};
use crate::session::{COMMAND_POLL_INTERVAL, COMMAND_WINDOW, SUSPEND_INTERVAL};

/// Path the node takes after the factory-reset check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BootPlan {
    /// No usable configuration. Raise the access point and await provisioning.
    Provisioning { reason: ProvisioningReason },
    /// Join the configured network and run a session.
    Station(DeviceConfiguration),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProvisioningReason {
    Absent,
    Unreadable(StoreError),
}

/// Loads the store once and picks the boot path.
pub fn plan_boot<S: ConfigStore + ?Sized>(store: &mut S) -> BootPlan {
    match store.load() {
        Ok(config) => BootPlan::Station(config),
        Err(LoadError::NotFound) => BootPlan::Provisioning {
            reason: ProvisioningReason::Absent,
        },
        Err(LoadError::Store(error)) => BootPlan::Provisioning {
            reason: ProvisioningReason::Unreadable(error),
        },
    }
}

/// Durations governing one boot cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeTimings {
    /// Divisor applied to commanded acquisition durations. 1 on hardware.
    pub time_scale: u32,
    pub command_window: Duration,
    pub command_poll: Duration,
    pub suspend: Duration,
    pub discovery_interval: Duration,
    pub discovery_count: u8,
    pub reset_settle: Duration,
    pub reset_poll: Duration,
    pub reset_hold: Duration,
    pub restart_flush: Duration,
    pub probe_interval: Duration,
}

/// Floor for compressed poll intervals.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub const DEFAULT_TIMINGS: NodeTimings = NodeTimings {
    time_scale: 1,
    command_window: COMMAND_WINDOW,
    command_poll: COMMAND_POLL_INTERVAL,
    suspend: SUSPEND_INTERVAL,
    discovery_interval: DISCOVERY_INTERVAL,
    discovery_count: DISCOVERY_COUNT,
    reset_settle: RESET_SETTLE,
    reset_poll: RESET_POLL_INTERVAL,
    reset_hold: RESET_HOLD,
    restart_flush: RESTART_FLUSH_DELAY,
    probe_interval: PROBE_INTERVAL,
};

impl Default for NodeTimings {
    fn default() -> Self {
        DEFAULT_TIMINGS
    }
}

impl NodeTimings {
    /// Runs every interval `divisor` times faster. Counts are unchanged and
    /// poll intervals never drop below [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub fn compressed(self, divisor: u32) -> Self {
        let divisor = divisor.max(1);
        let scale = |duration: Duration| duration / divisor;
        let poll = |duration: Duration| scale(duration).max(MIN_POLL_INTERVAL);
        Self {
            time_scale: self.time_scale.saturating_mul(divisor),
            command_window: scale(self.command_window),
            command_poll: poll(self.command_poll),
            suspend: scale(self.suspend),
            discovery_interval: scale(self.discovery_interval),
            discovery_count: self.discovery_count,
            reset_settle: scale(self.reset_settle),
            reset_poll: poll(self.reset_poll),
            reset_hold: scale(self.reset_hold),
            restart_flush: scale(self.restart_flush),
            probe_interval: poll(self.probe_interval),
        }
    }

    /// Wall-clock length of an acquisition commanded for `seconds`.
    #[must_use]
    pub fn acquisition(&self, seconds: u32) -> Duration {
        Duration::from_secs(u64::from(seconds)) / self.time_scale.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_scales_durations_only() {
        let fast = DEFAULT_TIMINGS.compressed(10);
        assert_eq!(fast.command_window, Duration::from_secs(1));
        assert_eq!(fast.suspend, Duration::from_millis(500));
        assert_eq!(fast.discovery_count, 10);
        assert_eq!(fast.acquisition(5), Duration::from_millis(500));
        assert_eq!(DEFAULT_TIMINGS.acquisition(5), Duration::from_secs(5));
    }

    #[test]
    fn extreme_compression_keeps_polls_positive() {
        let fast = DEFAULT_TIMINGS.compressed(u32::MAX);
        assert_eq!(fast.reset_poll, MIN_POLL_INTERVAL);
        assert_eq!(fast.command_poll, MIN_POLL_INTERVAL);
        assert_eq!(fast.probe_interval, MIN_POLL_INTERVAL);
        assert!(fast.suspend < MIN_POLL_INTERVAL);
    }
}
