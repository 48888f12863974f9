//! Gateway pinger that keeps echo replies, and so CSI frames, flowing.

use core::net::Ipv4Addr;

use csi_node_core::probe::{ECHO_PACKET_LEN, TrafficProbe};
use embassy_net::Stack;
use embassy_net::raw::{IpProtocol, IpVersion, PacketMetadata, RawSocket};
use embassy_time::{Duration, Ticker};
use esp_radio::wifi::WifiDevice;

use crate::clock::NodeInstant;

const PROBE_IDENT: u16 = 0x4353;

#[embassy_executor::task]
pub async fn run(
    stack: Stack<'static>,
    source: Ipv4Addr,
    gateway: Ipv4Addr,
    interval: Duration,
    until: NodeInstant,
) {
    let mut rx_meta = [PacketMetadata::EMPTY; 1];
    let mut rx_buffer = [0u8; 64];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buffer = [0u8; 2 * ECHO_PACKET_LEN];
    let socket = RawSocket::new::<WifiDevice<'static>>(
        stack,
        IpVersion::Ipv4,
        IpProtocol::Icmp,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );

    defmt::debug!("probe: pinging gateway={}", gateway.octets());
    let mut probe = TrafficProbe::new(gateway, PROBE_IDENT);
    let mut ticker = Ticker::every(interval);
    while NodeInstant::now() < until {
        socket.send(&probe.next_packet(source)).await;
        ticker.next().await;
    }
}
