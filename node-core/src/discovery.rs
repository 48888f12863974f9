//! Address announcement after the link comes up.
//!
//! The node broadcasts `CSI_IP,<dotted-ipv4>` to the limited broadcast address
//! a fixed number of times so a collector can learn where to send commands.

use core::fmt::Write as _;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::time::Duration;

use heapless::String;

pub const DISCOVERY_PORT: u16 = 50_002;
pub const DISCOVERY_TARGET: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::BROADCAST, DISCOVERY_PORT);
pub const DISCOVERY_PREFIX: &str = "CSI_IP,";
pub const DISCOVERY_COUNT: u8 = 10;
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);
/// Longest announcement: prefix plus `255.255.255.255`.
pub const DISCOVERY_MESSAGE_LEN: usize = 32;

pub type DiscoveryMessage = String<DISCOVERY_MESSAGE_LEN>;

/// Renders the announcement for `address`.
#[must_use]
pub fn discovery_message(address: Ipv4Addr) -> DiscoveryMessage {
    let mut message = DiscoveryMessage::new();
    // 7 + 15 bytes always fits.
    let _ = write!(message, "{DISCOVERY_PREFIX}{address}");
    message
}

/// Extracts the announced address from a received datagram.
#[must_use]
pub fn parse_discovery(payload: &[u8]) -> Option<Ipv4Addr> {
    let text = core::str::from_utf8(payload).ok()?;
    text.trim().strip_prefix(DISCOVERY_PREFIX)?.parse().ok()
}

/// Paces the fixed run of announcements.
#[derive(Clone, Debug)]
pub struct DiscoverySchedule {
    remaining: u8,
    interval: Duration,
}

impl DiscoverySchedule {
    #[must_use]
    pub const fn new(count: u8, interval: Duration) -> Self {
        Self {
            remaining: count,
            interval,
        }
    }

    #[must_use]
    pub const fn remaining(&self) -> u8 {
        self.remaining
    }
}

impl Iterator for DiscoverySchedule {
    /// Delay to wait after sending this announcement.
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.remaining = self.remaining.checked_sub(1)?;
        Some(self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_parser() {
        let address = Ipv4Addr::new(192, 168, 1, 42);
        let message = discovery_message(address);
        assert_eq!(message.as_str(), "CSI_IP,192.168.1.42");
        assert_eq!(parse_discovery(message.as_bytes()), Some(address));
        assert_eq!(
            discovery_message(Ipv4Addr::BROADCAST).as_str(),
            "CSI_IP,255.255.255.255"
        );
    }

    #[test]
    fn rejects_foreign_datagrams() {
        assert_eq!(parse_discovery(b"CSI_DATA,1"), None);
        assert_eq!(parse_discovery(b"CSI_IP,nope"), None);
    }

    #[test]
    fn schedule_yields_fixed_count() {
        let mut schedule = DiscoverySchedule::new(DISCOVERY_COUNT, DISCOVERY_INTERVAL);
        assert_eq!(schedule.clone().count(), 10);
        assert!(schedule.all(|delay| delay == DISCOVERY_INTERVAL));
    }
}
