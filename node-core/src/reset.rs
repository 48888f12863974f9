//! Boot-time factory-reset button.
//!
//! The button is sampled once after a short settle. If held, it is polled
//! until released or until the hold threshold elapses; a full hold erases the
//! stored configuration.

use core::time::Duration;

use crate::boot::NodeTimings;

pub const RESET_SETTLE: Duration = Duration::from_millis(50);
pub const RESET_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const RESET_HOLD: Duration = Duration::from_secs(3);

/// Active-low boot button (GPIO0 with pull-up on hardware).
pub trait ResetButton {
    fn is_pressed(&mut self) -> bool;
}

impl<F: FnMut() -> bool> ResetButton for F {
    fn is_pressed(&mut self) -> bool {
        self()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetDecision {
    /// Continue booting with the stored configuration.
    Proceed,
    /// Erase the store and restart.
    Erase,
}

/// Progress of one hold measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetProgress {
    Holding { held: Duration },
    Decided(ResetDecision),
}

/// Accumulates poll ticks while the button is held.
#[derive(Debug)]
pub struct FactoryResetMonitor {
    held: Duration,
    poll: Duration,
    hold: Duration,
}

impl FactoryResetMonitor {
    #[must_use]
    pub const fn new(poll: Duration, hold: Duration) -> Self {
        Self {
            held: Duration::ZERO,
            poll,
            hold,
        }
    }

    /// Feeds the sample taken after one poll interval.
    pub fn tick(&mut self, pressed: bool) -> ResetProgress {
        if !pressed {
            return ResetProgress::Decided(ResetDecision::Proceed);
        }
        self.held += self.poll;
        if self.held >= self.hold {
            ResetProgress::Decided(ResetDecision::Erase)
        } else {
            ResetProgress::Holding { held: self.held }
        }
    }
}

/// Runs the blocking boot check. `delay` sleeps for the given duration.
pub fn check_factory_reset<B, D>(button: &mut B, timings: &NodeTimings, mut delay: D) -> ResetDecision
where
    B: ResetButton + ?Sized,
    D: FnMut(Duration),
{
    delay(timings.reset_settle);
    if !button.is_pressed() {
        return ResetDecision::Proceed;
    }

    let mut monitor = FactoryResetMonitor::new(timings.reset_poll, timings.reset_hold);
    loop {
        delay(timings.reset_poll);
        if let ResetProgress::Decided(decision) = monitor.tick(button.is_pressed()) {
            return decision;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::DEFAULT_TIMINGS;

    #[test]
    fn untouched_button_proceeds_after_settle() {
        let mut slept = Duration::ZERO;
        let decision = check_factory_reset(&mut || false, &DEFAULT_TIMINGS, |d| slept += d);
        assert_eq!(decision, ResetDecision::Proceed);
        assert_eq!(slept, RESET_SETTLE);
    }

    #[test]
    fn full_hold_requests_erase() {
        let mut slept = Duration::ZERO;
        let decision = check_factory_reset(&mut || true, &DEFAULT_TIMINGS, |d| slept += d);
        assert_eq!(decision, ResetDecision::Erase);
        assert_eq!(slept, RESET_SETTLE + RESET_HOLD);
    }

    #[test]
    fn held_button_decides_under_extreme_compression() {
        let timings = DEFAULT_TIMINGS.compressed(u32::MAX);
        let mut polls = 0u32;
        let decision = check_factory_reset(&mut || true, &timings, |_| polls += 1);
        assert_eq!(decision, ResetDecision::Erase);
        assert!(polls <= 2);
    }

    #[test]
    fn early_release_proceeds() {
        let mut samples = [true, true, true, false].into_iter();
        let mut button = move || samples.next().unwrap_or(false);
        let decision = check_factory_reset(&mut button, &DEFAULT_TIMINGS, |_| {});
        assert_eq!(decision, ResetDecision::Proceed);
    }
}
