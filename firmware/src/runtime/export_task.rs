//! CSI ingress from the driver callback and the UDP exporter.

use core::cell::RefCell;
use core::convert::Infallible;

use csi_node_core::config::CollectorEndpoint;
use csi_node_core::export::{
    CsiIngress, ExportDestination, IngressOutcome, MacAddress, Resolution, SequencedFrame,
    render_record,
};
use csi_node_core::telemetry::NodeEvent;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_radio::wifi::wifi_csi_info_t;

use super::FRAME_QUEUE;
use crate::frames::QueueSink;
use crate::{radio, telemetry};

type Ingress = CsiIngress<QueueSink<'static, CriticalSectionRawMutex>>;

/// Present only while an acquisition runs; frames outside it are ignored.
static INGRESS: Mutex<CriticalSectionRawMutex, RefCell<Option<Ingress>>> =
    Mutex::new(RefCell::new(None));

const TX_BUFFER_LEN: usize = 4096;

pub(super) fn arm(bssid: MacAddress) {
    INGRESS.lock(|ingress| {
        ingress
            .borrow_mut()
            .replace(CsiIngress::new(QueueSink::new(&FRAME_QUEUE), bssid));
    });
}

/// Stops accepting frames and returns `(next_seq, dropped)`.
pub(super) fn disarm() -> (u32, u32) {
    INGRESS.lock(|ingress| {
        ingress
            .borrow_mut()
            .take()
            .map_or((0, 0), |ingress| (ingress.next_seq(), ingress.dropped()))
    })
}

/// Driver callback. Runs in the Wi-Fi task context and never blocks.
pub(super) fn on_csi(info: wifi_csi_info_t) {
    INGRESS.lock(|ingress| {
        if let Some(ingress) = ingress.borrow_mut().as_mut()
            && let IngressOutcome::Dropped { seq } = ingress.on_frame(radio::frame_from_info(&info))
        {
            defmt::trace!("export: queue full seq={}", seq);
        }
    });
}

#[embassy_executor::task]
pub async fn run(stack: Stack<'static>, collector: CollectorEndpoint) {
    let mut rx_meta = [PacketMetadata::EMPTY; 1];
    let mut rx_buffer = [0u8; 64];
    let mut tx_meta = [PacketMetadata::EMPTY; 8];
    let mut tx_buffer = [0u8; TX_BUFFER_LEN];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(error) = socket.bind(0) {
        defmt::error!("export: bind failed error={}", error);
        return;
    }

    let mut destination = ExportDestination::<IpEndpoint>::new();
    loop {
        let SequencedFrame { seq, frame } = FRAME_QUEUE.receive().await;

        let resolution = destination.resolve(collector, |endpoint| {
            Ok::<_, Infallible>(IpEndpoint::from(endpoint.socket_addr()))
        });
        if matches!(resolution, Ok(Resolution::Opened | Resolution::Reopened)) {
            telemetry::emit(NodeEvent::ExportDestinationOpened {
                address: collector.address.octets(),
                port: collector.port,
            });
        }

        let Ok(record) = render_record(seq, &frame) else {
            defmt::debug!("export: record overflow seq={}", seq);
            continue;
        };
        if let Some(endpoint) = destination.socket_mut()
            && let Err(error) = socket.send_to(record.as_bytes(), *endpoint).await
        {
            defmt::trace!("export: send failed seq={} error={}", seq, error);
        }
    }
}
