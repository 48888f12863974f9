//! Simulated station radio.
//!
//! Stands in for the Wi-Fi driver: association succeeds after a configurable
//! number of failures and the station is handed a fixed address. The receive
//! side lives in [`AirInterface`], which runs on its own thread like the
//! driver callback: every echo request the traffic probe sends produces a
//! burst of CSI measurements from the access point, plus the occasional frame
//! from a foreign transmitter.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use csi_node_core::export::{CsiFrame, CsiSamples, MacAddress, RxControl};
use csi_node_core::link::{CredentialStrategy, LinkEvent};
use csi_node_core::probe::ECHO_REQUEST_LEN;
use tracing::debug;

/// Subcarrier samples per synthetic measurement (64 subcarriers, I/Q).
pub const SYNTHETIC_SAMPLES: usize = 128;

const FOREIGN_TRANSMITTER: MacAddress = [0x02, 0x00, 0x5e, 0x10, 0x20, 0x30];

#[derive(Clone, Debug)]
pub struct RadioOptions {
    /// Association attempts that fail before one succeeds. Shared by every
    /// boot cycle of the process.
    pub failing_associations: u32,
    pub address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub bssid: MacAddress,
    /// Every n-th probe also yields a frame from another transmitter. 0 disables.
    pub foreign_every: u32,
    /// Access point frames reported per echo reply.
    pub burst: u32,
}

impl Default for RadioOptions {
    fn default() -> Self {
        Self {
            failing_associations: 0,
            address: Ipv4Addr::LOCALHOST,
            gateway: Ipv4Addr::LOCALHOST,
            bssid: [0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01],
            foreign_every: 5,
            burst: 1,
        }
    }
}

#[derive(Debug)]
pub struct SimulatedRadio {
    options: RadioOptions,
    failure_budget: Arc<AtomicU32>,
    started_at: Instant,
}

impl SimulatedRadio {
    pub fn new(options: RadioOptions, failure_budget: Arc<AtomicU32>) -> Self {
        Self {
            options,
            failure_budget,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.options.gateway
    }

    pub fn start(&mut self) -> LinkEvent {
        self.started_at = Instant::now();
        LinkEvent::Started
    }

    /// Receive side for the current association.
    #[must_use]
    pub fn air_interface(&self) -> AirInterface {
        AirInterface {
            bssid: self.options.bssid,
            foreign_every: self.options.foreign_every,
            burst: self.options.burst.max(1),
            started_at: self.started_at,
            probes: 0,
        }
    }

    /// Attempts one association and reports the resulting events.
    pub fn associate(
        &mut self,
        credentials: &CredentialStrategy<'_>,
    ) -> heapless::Vec<LinkEvent, 2> {
        let mut events = heapless::Vec::new();
        let failing = self
            .failure_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            debug!(ssid = credentials.ssid(), "simulated association failure");
            let _ = events.push(LinkEvent::Disconnected);
        } else {
            let _ = events.push(LinkEvent::Associated);
            let _ = events.push(LinkEvent::AddressAcquired(self.options.address));
        }
        events
    }
}

/// Frames the station overhears, produced off the scheduler thread.
#[derive(Debug)]
pub struct AirInterface {
    bssid: MacAddress,
    foreign_every: u32,
    burst: u32,
    started_at: Instant,
    probes: u32,
}

impl AirInterface {
    #[must_use]
    pub fn bssid(&self) -> MacAddress {
        self.bssid
    }

    /// Frames received in answer to one echo request.
    pub fn echo_reply(
        &mut self,
        request: &[u8; ECHO_REQUEST_LEN],
    ) -> impl Iterator<Item = CsiFrame> + '_ {
        self.probes = self.probes.wrapping_add(1);
        let seq = u16::from_be_bytes([request[6], request[7]]);
        let every = self.foreign_every;
        let foreign = (every != 0 && self.probes % every == 0).then_some(FOREIGN_TRANSMITTER);
        let burst = usize::try_from(self.burst).unwrap_or(1);
        let this: &Self = self;
        foreign
            .into_iter()
            .chain(std::iter::repeat_n(this.bssid, burst))
            .map(move |mac| this.synthesize(mac, seq))
    }

    fn synthesize(&self, mac: MacAddress, seq: u16) -> CsiFrame {
        let phase = i32::from(seq % 97);
        let mut frame = CsiFrame {
            mac,
            rx: RxControl {
                rssi: -40 - i8::try_from(seq % 12).unwrap_or(0),
                rate: 11,
                sig_mode: 1,
                mcs: 7,
                noise_floor: -92,
                channel: 6,
                timestamp: u32::try_from(self.started_at.elapsed().as_micros() % (1 << 32))
                    .unwrap_or(0),
                sig_len: 100,
                ..RxControl::default()
            },
            first_word_invalid: false,
            samples: CsiSamples::new(),
        };
        for index in 0..SYNTHETIC_SAMPLES {
            let offset = i32::try_from(index).unwrap_or(0);
            let value = (offset * 7 + phase * 3) % 41 - 20;
            let _ = frame.samples.push(i8::try_from(value).unwrap_or(0));
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csi_node_core::probe::TrafficProbe;

    #[test]
    fn failures_are_drawn_from_the_shared_budget() {
        let budget = Arc::new(AtomicU32::new(2));
        let mut radio = SimulatedRadio::new(RadioOptions::default(), Arc::clone(&budget));
        let credentials = CredentialStrategy::Open { ssid: "Cafe" };

        assert_eq!(radio.associate(&credentials).as_slice(), &[LinkEvent::Disconnected]);
        let mut next_boot = SimulatedRadio::new(RadioOptions::default(), budget);
        assert_eq!(
            next_boot.associate(&credentials).as_slice(),
            &[LinkEvent::Disconnected]
        );
        assert_eq!(
            next_boot.associate(&credentials).as_slice(),
            &[
                LinkEvent::Associated,
                LinkEvent::AddressAcquired(Ipv4Addr::LOCALHOST)
            ]
        );
    }

    #[test]
    fn every_probe_yields_an_access_point_frame() {
        let options = RadioOptions {
            foreign_every: 2,
            ..RadioOptions::default()
        };
        let bssid = options.bssid;
        let radio = SimulatedRadio::new(options, Arc::new(AtomicU32::new(0)));
        let mut air = radio.air_interface();
        let mut probe = TrafficProbe::new(Ipv4Addr::LOCALHOST, 1);

        let first: Vec<CsiFrame> = air.echo_reply(&probe.next_request()).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].mac, bssid);
        assert_eq!(first[0].samples.len(), SYNTHETIC_SAMPLES);

        let second: Vec<CsiFrame> = air.echo_reply(&probe.next_request()).collect();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].mac, FOREIGN_TRANSMITTER);
        assert_eq!(second[1].mac, bssid);
    }

    #[test]
    fn bursts_repeat_the_access_point_frame() {
        let options = RadioOptions {
            foreign_every: 0,
            burst: 4,
            ..RadioOptions::default()
        };
        let bssid = options.bssid;
        let mut air = SimulatedRadio::new(options, Arc::new(AtomicU32::new(0))).air_interface();
        let mut probe = TrafficProbe::new(Ipv4Addr::LOCALHOST, 1);

        let frames: Vec<CsiFrame> = air.echo_reply(&probe.next_request()).collect();
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|frame| frame.mac == bssid));
    }
}
