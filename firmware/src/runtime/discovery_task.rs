//! Announces the node's address on the local broadcast domain.

use core::net::Ipv4Addr;

use csi_node_core::boot::NodeTimings;
use csi_node_core::discovery::{DISCOVERY_TARGET, DiscoverySchedule, discovery_message};
use csi_node_core::telemetry::NodeEvent;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::Timer;

use crate::clock::to_embassy;
use crate::telemetry;

#[embassy_executor::task]
pub async fn run(stack: Stack<'static>, address: Ipv4Addr, timings: NodeTimings) {
    let mut rx_meta = [PacketMetadata::EMPTY; 1];
    let mut rx_buffer = [0u8; 16];
    let mut tx_meta = [PacketMetadata::EMPTY; 1];
    let mut tx_buffer = [0u8; 64];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(error) = socket.bind(0) {
        defmt::warn!("discovery: bind failed error={}", error);
        return;
    }

    let message = discovery_message(address);
    let target = IpEndpoint::from(DISCOVERY_TARGET);
    let mut schedule = DiscoverySchedule::new(timings.discovery_count, timings.discovery_interval);
    while let Some(delay) = schedule.next() {
        match socket.send_to(message.as_bytes(), target).await {
            Ok(()) => telemetry::emit(NodeEvent::DiscoverySent {
                remaining: schedule.remaining(),
            }),
            Err(error) => defmt::debug!("discovery: send failed error={}", error),
        }
        Timer::after(to_embassy(delay)).await;
    }
}
