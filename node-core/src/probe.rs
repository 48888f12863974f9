//! Gateway ping used to provoke CSI measurements during acquisition.
//!
//! Every echo reply the access point sends back is a received frame, so
//! pinging the gateway at a fixed rate paces the measurement stream.

use core::net::Ipv4Addr;
use core::time::Duration;

/// Default pacing: 100 requests per second.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(10);
/// Echo payload size.
pub const PROBE_PAYLOAD_LEN: usize = 1;
pub const ICMP_HEADER_LEN: usize = 8;
pub const ECHO_REQUEST_LEN: usize = ICMP_HEADER_LEN + PROBE_PAYLOAD_LEN;
pub const IPV4_HEADER_LEN: usize = 20;
/// Echo request wrapped in an IPv4 header, as raw sockets expect it.
pub const ECHO_PACKET_LEN: usize = IPV4_HEADER_LEN + ECHO_REQUEST_LEN;

const IPV4_TTL: u8 = 64;
const IPPROTO_ICMP: u8 = 1;

const ICMP_ECHO_REQUEST: u8 = 8;

/// RFC 1071 ones'-complement checksum.
#[must_use]
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut chunks = bytes.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair[1]])))
        .sum();
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    // The fold above leaves at most 16 significant bits.
    !u16::try_from(sum).unwrap_or(u16::MAX)
}

/// Writes an ICMP echo request into `out`, returning the bytes used.
///
/// Returns `None` if `out` is too small.
#[must_use]
pub fn echo_request(ident: u16, seq: u16, payload: &[u8], out: &mut [u8]) -> Option<usize> {
    let len = ICMP_HEADER_LEN + payload.len();
    let packet = out.get_mut(..len)?;
    packet[0] = ICMP_ECHO_REQUEST;
    packet[1] = 0;
    packet[2..4].fill(0);
    packet[4..6].copy_from_slice(&ident.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    packet[ICMP_HEADER_LEN..].copy_from_slice(payload);
    let checksum = internet_checksum(packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    Some(len)
}

/// Prefixes `icmp` with a minimal IPv4 header (no options, don't-fragment
/// clear) and writes the packet into `out`.
///
/// Returns `None` if `out` is too small or the packet exceeds 64 KiB.
#[must_use]
pub fn ipv4_packet(
    source: Ipv4Addr,
    target: Ipv4Addr,
    id: u16,
    icmp: &[u8],
    out: &mut [u8],
) -> Option<usize> {
    let len = IPV4_HEADER_LEN + icmp.len();
    let total = u16::try_from(len).ok()?;
    let packet = out.get_mut(..len)?;
    packet[0] = 0x45;
    packet[1] = 0;
    packet[2..4].copy_from_slice(&total.to_be_bytes());
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[6..8].fill(0);
    packet[8] = IPV4_TTL;
    packet[9] = IPPROTO_ICMP;
    packet[10..12].fill(0);
    packet[12..16].copy_from_slice(&source.octets());
    packet[16..20].copy_from_slice(&target.octets());
    let checksum = internet_checksum(&packet[..IPV4_HEADER_LEN]);
    packet[10..12].copy_from_slice(&checksum.to_be_bytes());
    packet[IPV4_HEADER_LEN..].copy_from_slice(icmp);
    Some(len)
}

/// Sequence state for one acquisition's probe stream.
#[derive(Debug)]
pub struct TrafficProbe {
    target: Ipv4Addr,
    ident: u16,
    next_seq: u16,
}

impl TrafficProbe {
    #[must_use]
    pub const fn new(target: Ipv4Addr, ident: u16) -> Self {
        Self {
            target,
            ident,
            next_seq: 0,
        }
    }

    #[must_use]
    pub const fn target(&self) -> Ipv4Addr {
        self.target
    }

    /// Builds the next echo request and advances the sequence number.
    pub fn next_request(&mut self) -> [u8; ECHO_REQUEST_LEN] {
        let mut packet = [0u8; ECHO_REQUEST_LEN];
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        // Payload byte mirrors the low sequence bits so replies are distinguishable.
        let payload = [seq.to_be_bytes()[1]];
        let _ = echo_request(self.ident, seq, &payload, &mut packet);
        packet
    }

    /// Next echo request framed for a raw IPv4 socket bound to `source`.
    pub fn next_packet(&mut self, source: Ipv4Addr) -> [u8; ECHO_PACKET_LEN] {
        let request = self.next_request();
        let id = u16::from_be_bytes([request[6], request[7]]);
        let mut packet = [0u8; ECHO_PACKET_LEN];
        let _ = ipv4_packet(source, self.target, id, &request, &mut packet);
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_rfc1071_example() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn echo_request_verifies_to_zero() {
        let mut probe = TrafficProbe::new(Ipv4Addr::new(192, 168, 1, 1), 0x4353);
        let first = probe.next_request();
        let second = probe.next_request();

        assert_eq!(first[0], 8);
        assert_eq!(&first[4..6], &[0x43, 0x53]);
        assert_eq!(u16::from_be_bytes([second[6], second[7]]), 1);
        assert_eq!(internet_checksum(&first), 0);
        assert_eq!(internet_checksum(&second), 0);
    }

    #[test]
    fn odd_length_is_padded() {
        let mut out = [0u8; 16];
        let len = echo_request(1, 1, &[0xAB, 0xCD, 0xEF], &mut out).unwrap();
        assert_eq!(len, 11);
        assert_eq!(internet_checksum(&out[..len]), 0);
        assert_eq!(echo_request(1, 1, &[0; 9], &mut out), None);
    }

    #[test]
    fn raw_packet_carries_a_valid_ipv4_header() {
        let source = Ipv4Addr::new(192, 168, 1, 23);
        let gateway = Ipv4Addr::new(192, 168, 1, 1);
        let mut probe = TrafficProbe::new(gateway, 7);
        let _ = probe.next_request();
        let packet = probe.next_packet(source);

        assert_eq!(packet[0], 0x45);
        assert_eq!(usize::from(u16::from_be_bytes([packet[2], packet[3]])), ECHO_PACKET_LEN);
        assert_eq!(packet[9], 1);
        assert_eq!(&packet[12..16], &source.octets());
        assert_eq!(&packet[16..20], &gateway.octets());
        assert_eq!(internet_checksum(&packet[..IPV4_HEADER_LEN]), 0);

        let icmp = &packet[IPV4_HEADER_LEN..];
        assert_eq!(u16::from_be_bytes([icmp[6], icmp[7]]), 1);
        assert_eq!(internet_checksum(icmp), 0);
    }
}
