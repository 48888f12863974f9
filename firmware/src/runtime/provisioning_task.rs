//! One-shot provisioning listener on the setup access point.

use csi_node_core::boot::NodeTimings;
use csi_node_core::provisioning::{
    PROVISIONING_BUFFER_LEN, PROVISIONING_PORT, ProvisioningListener, ProvisioningOutcome,
};
use csi_node_core::telemetry::NodeEvent;
use embassy_net::Stack;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_time::Timer;
use esp_radio::wifi::WifiController;

use crate::clock::to_embassy;
use crate::hw::{self, NodeStore};
use crate::{radio, telemetry};

#[embassy_executor::task]
pub async fn run(
    mut controller: WifiController<'static>,
    stack: Stack<'static>,
    mut store: NodeStore,
    timings: NodeTimings,
) {
    if let Err(error) = controller.set_config(&radio::access_point_mode()) {
        defmt::error!("provisioning: ap config rejected error={}", error);
        return;
    }
    if let Err(error) = controller.start_async().await {
        defmt::error!("provisioning: ap start failed error={}", error);
        return;
    }
    stack.wait_config_up().await;

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 2 * PROVISIONING_BUFFER_LEN];
    let mut tx_meta = [PacketMetadata::EMPTY; 1];
    let mut tx_buffer = [0u8; 16];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(error) = socket.bind(PROVISIONING_PORT) {
        defmt::error!("provisioning: bind failed error={}", error);
        return;
    }
    telemetry::emit(NodeEvent::ProvisioningApStarted);

    let mut listener = ProvisioningListener::new();
    let mut buffer = [0u8; PROVISIONING_BUFFER_LEN];
    let (len, meta) = match socket.recv_from(&mut buffer).await {
        Ok(received) => received,
        Err(error) => {
            defmt::warn!("provisioning: receive failed error={}", error);
            return;
        }
    };
    defmt::debug!("provisioning: datagram len={} from={}", len, meta.endpoint);

    match listener.accept(&buffer[..len], &mut store) {
        Some(ProvisioningOutcome::Committed(config)) => {
            telemetry::emit(NodeEvent::ProvisioningCommitted { auth: config.auth });
            Timer::after(to_embassy(timings.restart_flush)).await;
            hw::restart()
        }
        Some(ProvisioningOutcome::Rejected(error)) => {
            telemetry::emit(NodeEvent::ProvisioningRejected(error));
        }
        Some(ProvisioningOutcome::StoreFailed(error)) => {
            telemetry::emit(NodeEvent::ProvisioningStoreFailed(error));
        }
        None => {}
    }
    defmt::warn!("provisioning: listener closed, power-cycle to retry");
}
