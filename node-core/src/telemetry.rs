//! Lifecycle event catalog shared by firmware and host targets.
//!
//! The core never logs. State machines and runtimes produce [`NodeEvent`]
//! values; each runtime hands them to its own logging backend and may keep the
//! recent history in a [`TelemetryRecorder`].

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::config::{AuthType, StoreError};
use crate::provisioning::ProvisioningError;
use crate::reset::ResetDecision;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Lifecycle events. Addresses are carried as octets to stay `Copy` and
/// loggable on every backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeEvent {
    Boot,
    ResetButtonHeld,
    ResetButtonDecided(ResetDecision),
    ConfigurationLoaded {
        auth: AuthType,
    },
    ConfigurationAbsent,
    ConfigurationUnreadable(StoreError),
    ProvisioningApStarted,
    ProvisioningCommitted {
        auth: AuthType,
    },
    ProvisioningRejected(ProvisioningError),
    ProvisioningStoreFailed(StoreError),
    LinkConnecting,
    LinkAssociated,
    LinkReady {
        address: [u8; 4],
    },
    LinkDisconnected {
        failures: u32,
    },
    LinkFailureReset,
    DiscoverySent {
        remaining: u8,
    },
    CommandWindowOpened,
    StartCommand {
        seconds: u32,
    },
    CommandWindowExpired,
    AcquisitionStarted {
        seconds: u32,
    },
    ExportDestinationOpened {
        address: [u8; 4],
        port: u16,
    },
    AcquisitionFinished {
        next_seq: u32,
        dropped: u32,
    },
    FactoryResetErased,
    Suspending {
        millis: u64,
    },
}

impl NodeEvent {
    /// Stable kebab-case label for the event kind.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            NodeEvent::Boot => "boot",
            NodeEvent::ResetButtonHeld => "reset-button-held",
            NodeEvent::ResetButtonDecided(_) => "reset-button-decided",
            NodeEvent::ConfigurationLoaded { .. } => "configuration-loaded",
            NodeEvent::ConfigurationAbsent => "configuration-absent",
            NodeEvent::ConfigurationUnreadable(_) => "configuration-unreadable",
            NodeEvent::ProvisioningApStarted => "provisioning-ap-started",
            NodeEvent::ProvisioningCommitted { .. } => "provisioning-committed",
            NodeEvent::ProvisioningRejected(_) => "provisioning-rejected",
            NodeEvent::ProvisioningStoreFailed(_) => "provisioning-store-failed",
            NodeEvent::LinkConnecting => "link-connecting",
            NodeEvent::LinkAssociated => "link-associated",
            NodeEvent::LinkReady { .. } => "link-ready",
            NodeEvent::LinkDisconnected { .. } => "link-disconnected",
            NodeEvent::LinkFailureReset => "link-failure-reset",
            NodeEvent::DiscoverySent { .. } => "discovery-sent",
            NodeEvent::CommandWindowOpened => "command-window-opened",
            NodeEvent::StartCommand { .. } => "start-command",
            NodeEvent::CommandWindowExpired => "command-window-expired",
            NodeEvent::AcquisitionStarted { .. } => "acquisition-started",
            NodeEvent::ExportDestinationOpened { .. } => "export-destination-opened",
            NodeEvent::AcquisitionFinished { .. } => "acquisition-finished",
            NodeEvent::FactoryResetErased => "factory-reset-erased",
            NodeEvent::Suspending { .. } => "suspending",
        }
    }

    /// Events that indicate a fault or a destructive transition.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        matches!(
            self,
            NodeEvent::ConfigurationUnreadable(_)
                | NodeEvent::ProvisioningRejected(_)
                | NodeEvent::ProvisioningStoreFailed(_)
                | NodeEvent::LinkDisconnected { .. }
                | NodeEvent::LinkFailureReset
                | NodeEvent::FactoryResetErased
                | NodeEvent::ResetButtonHeld
        )
    }
}

struct Octets<'a>(&'a [u8; 4]);

impl fmt::Display for Octets<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())?;
        match self {
            NodeEvent::ResetButtonDecided(decision) => write!(f, " decision={decision:?}"),
            NodeEvent::ConfigurationLoaded { auth } | NodeEvent::ProvisioningCommitted { auth } => {
                write!(f, " auth={auth}")
            }
            NodeEvent::ConfigurationUnreadable(error)
            | NodeEvent::ProvisioningStoreFailed(error) => write!(f, " error=\"{error}\""),
            NodeEvent::ProvisioningRejected(error) => write!(f, " error=\"{error}\""),
            NodeEvent::LinkReady { address } => write!(f, " address={}", Octets(address)),
            NodeEvent::LinkDisconnected { failures } => write!(f, " failures={failures}"),
            NodeEvent::DiscoverySent { remaining } => write!(f, " remaining={remaining}"),
            NodeEvent::StartCommand { seconds } | NodeEvent::AcquisitionStarted { seconds } => {
                write!(f, " seconds={seconds}")
            }
            NodeEvent::ExportDestinationOpened { address, port } => {
                write!(f, " collector={}:{port}", Octets(address))
            }
            NodeEvent::AcquisitionFinished { next_seq, dropped } => {
                write!(f, " frames={next_seq} dropped={dropped}")
            }
            NodeEvent::Suspending { millis } => write!(f, " millis={millis}"),
            _ => Ok(()),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: NodeEvent,
}

/// Records lifecycle events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant: Copy, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    pub fn record(&mut self, event: NodeEvent, timestamp: TInstant) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
        });
        id
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_key_values() {
        let mut text = heapless::String::<64>::new();
        core::fmt::write(
            &mut text,
            format_args!(
                "{}",
                NodeEvent::ExportDestinationOpened {
                    address: [10, 0, 0, 5],
                    port: 9000
                }
            ),
        )
        .unwrap();
        assert_eq!(text.as_str(), "export-destination-opened collector=10.0.0.5:9000");
    }

    #[test]
    fn recorder_keeps_newest_entries() {
        let mut recorder = TelemetryRecorder::<u32, 2>::new();
        recorder.record(NodeEvent::Boot, 0);
        recorder.record(NodeEvent::LinkConnecting, 1);
        let id = recorder.record(NodeEvent::LinkAssociated, 2);

        assert_eq!(id, 2);
        assert_eq!(recorder.len(), 2);
        let events: heapless::Vec<NodeEvent, 2> =
            recorder.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[NodeEvent::LinkConnecting, NodeEvent::LinkAssociated]
        );
    }
}
