//! One station session: command window, optional acquisition, deep sleep.

use csi_node_core::boot::NodeTimings;
use csi_node_core::config::CollectorEndpoint;
use csi_node_core::session::{COMMAND_BUFFER_LEN, COMMAND_PORT, SessionAction, SessionScheduler};
use csi_node_core::telemetry::NodeEvent;
use embassy_executor::Spawner;
use embassy_net::Stack;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_time::{Duration, Timer, with_timeout};
use esp_hal::rtc_cntl::Rtc;

use super::{LINK_READY, LINK_STOP, LINK_STOPPED, LinkReady};
use super::{discovery_task, export_task, probe_task};
use crate::clock::{NodeInstant, to_embassy};
use crate::hw;
use crate::{radio, telemetry};

type Scheduler = SessionScheduler<NodeInstant>;

#[embassy_executor::task]
pub async fn run(
    spawner: Spawner,
    stack: Stack<'static>,
    collector: CollectorEndpoint,
    timings: NodeTimings,
    mut rtc: Rtc<'static>,
) {
    let mut scheduler = Scheduler::new(timings);
    if scheduler.start() != Some(SessionAction::ConnectLink) {
        return;
    }

    let Some(mut ready) = LINK_READY.receiver() else {
        defmt::error!("session: ready signal already claimed");
        hw::restart()
    };
    let ready = ready.get().await;
    let action = match scheduler.on_ready(NodeInstant::now()) {
        Some(SessionAction::BeginCommandWindow { .. }) => {
            spawner.must_spawn(discovery_task::run(stack, ready.address, timings));
            await_command(stack, &mut scheduler, timings).await
        }
        _ => SessionAction::Suspend {
            interval: timings.suspend,
        },
    };

    let action = match action {
        SessionAction::StartAcquisition { seconds, until } => {
            telemetry::emit(NodeEvent::StartCommand { seconds });
            telemetry::emit(NodeEvent::AcquisitionStarted { seconds });
            let probe_interval = to_embassy(timings.probe_interval);
            acquire(spawner, stack, &mut scheduler, ready, collector, probe_interval, until).await
        }
        other => {
            telemetry::emit(NodeEvent::CommandWindowExpired);
            other
        }
    };

    LINK_STOP.signal(());
    LINK_STOPPED.wait().await;

    let SessionAction::Suspend { interval } = action else {
        hw::restart()
    };
    telemetry::emit(NodeEvent::Suspending {
        millis: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
    });
    hw::deep_sleep(&mut rtc, interval)
}

async fn await_command(
    stack: Stack<'static>,
    scheduler: &mut Scheduler,
    timings: NodeTimings,
) -> SessionAction<NodeInstant> {
    let expired = SessionAction::Suspend {
        interval: timings.suspend,
    };
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; 4 * COMMAND_BUFFER_LEN];
    let mut tx_meta = [PacketMetadata::EMPTY; 1];
    let mut tx_buffer = [0u8; 16];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(error) = socket.bind(COMMAND_PORT) {
        defmt::warn!("session: command bind failed error={}", error);
        return expired;
    }
    telemetry::emit(NodeEvent::CommandWindowOpened);

    let mut buffer = [0u8; COMMAND_BUFFER_LEN];
    loop {
        if let Some(action) = scheduler.on_tick(NodeInstant::now()) {
            return action;
        }
        match with_timeout(to_embassy(timings.command_poll), socket.recv_from(&mut buffer)).await {
            Ok(Ok((len, meta))) => {
                defmt::debug!("session: command len={} from={}", len, meta.endpoint);
                if let Some(action) = scheduler.on_datagram(NodeInstant::now(), &buffer[..len]) {
                    return action;
                }
            }
            Ok(Err(error)) => defmt::debug!("session: command dropped error={}", error),
            Err(_) => {}
        }
    }
}

async fn acquire(
    spawner: Spawner,
    stack: Stack<'static>,
    scheduler: &mut Scheduler,
    ready: LinkReady,
    collector: CollectorEndpoint,
    probe_interval: Duration,
    until: NodeInstant,
) -> SessionAction<NodeInstant> {
    export_task::arm(radio::connected_bssid());
    spawner.must_spawn(export_task::run(stack, collector));
    match ready.gateway {
        Some(gateway) => spawner.must_spawn(probe_task::run(
            stack,
            ready.address,
            gateway,
            probe_interval,
            until,
        )),
        None => defmt::warn!("session: no gateway, acquiring without probe traffic"),
    }

    let action = loop {
        if let Some(action) = scheduler.on_tick(NodeInstant::now()) {
            break action;
        }
        Timer::at(until.0).await;
    };

    let (next_seq, dropped) = export_task::disarm();
    telemetry::emit(NodeEvent::AcquisitionFinished { next_seq, dropped });
    action
}
