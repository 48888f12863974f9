//! Station link supervisor.

use csi_node_core::config::DeviceConfiguration;
use csi_node_core::link::{LinkAction, LinkController, LinkEvent, credential_strategy};
use csi_node_core::telemetry::NodeEvent;
use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use esp_radio::wifi::{WifiController, WifiEvent};

use super::export_task::on_csi;
use super::{LINK_READY, LINK_STOP, LINK_STOPPED, LinkReady, erase_and_restart};
use crate::hw::NodeStore;
use crate::{radio, telemetry};

#[embassy_executor::task]
pub async fn run(
    mut controller: WifiController<'static>,
    stack: Stack<'static>,
    config: &'static DeviceConfiguration,
    mut store: NodeStore,
) {
    let credentials = credential_strategy(config);
    if let Err(error) = controller.set_config(&radio::station_mode(&credentials)) {
        defmt::error!("link: station config rejected error={}", error);
    }
    radio::track_bssid();
    defmt::info!("link: joining ssid={=str} auth={}", credentials.ssid(), config.auth);
    telemetry::emit(NodeEvent::LinkConnecting);

    if let Either::Second(()) = select(
        supervise(&mut controller, stack, &mut store),
        LINK_STOP.wait(),
    )
    .await
    {
        if let Err(error) = controller.disconnect_async().await {
            defmt::warn!("link: disconnect failed error={}", error);
        }
        if let Err(error) = controller.stop_async().await {
            defmt::warn!("link: stop failed error={}", error);
        }
        LINK_STOPPED.signal(());
    }
}

/// Drives the controller until a stop request preempts it. Never returns on
/// its own; a factory reset reboots from inside.
async fn supervise(
    controller: &mut WifiController<'static>,
    stack: Stack<'static>,
    store: &mut NodeStore,
) {
    let mut link = LinkController::new();
    let mut event = start(controller).await;

    loop {
        let action = link.handle(event);
        match event {
            LinkEvent::Associated => telemetry::emit(NodeEvent::LinkAssociated),
            LinkEvent::Disconnected => telemetry::emit(NodeEvent::LinkDisconnected {
                failures: link.consecutive_failures(),
            }),
            LinkEvent::Started | LinkEvent::AddressAcquired(_) => {}
        }

        event = match action {
            LinkAction::Associate => associate(controller).await,
            LinkAction::None if event == LinkEvent::Associated => {
                acquire_address(controller, stack).await
            }
            LinkAction::SignalReady(address) => {
                telemetry::emit(NodeEvent::LinkReady {
                    address: address.octets(),
                });
                let gateway = stack.config_v4().and_then(|config| config.gateway);
                LINK_READY.sender().send(LinkReady { address, gateway });
                wait_for_disconnect(controller).await
            }
            LinkAction::None => wait_for_disconnect(controller).await,
            LinkAction::FactoryReset => {
                telemetry::emit(NodeEvent::LinkFailureReset);
                if let Err(error) = controller.stop_async().await {
                    defmt::warn!("link: stop before erase failed error={}", error);
                }
                erase_and_restart(store)
            }
        };
    }
}

async fn start(controller: &mut WifiController<'static>) -> LinkEvent {
    match controller.start_async().await {
        Ok(()) => {
            if let Err(error) = controller.set_csi(radio::csi_config(), on_csi) {
                defmt::warn!("link: csi unavailable error={}", error);
            }
            LinkEvent::Started
        }
        Err(error) => {
            defmt::warn!("link: radio start failed error={}", error);
            LinkEvent::Disconnected
        }
    }
}

async fn associate(controller: &mut WifiController<'static>) -> LinkEvent {
    match controller.connect_async().await {
        Ok(()) => LinkEvent::Associated,
        Err(error) => {
            defmt::debug!("link: association failed error={}", error);
            LinkEvent::Disconnected
        }
    }
}

async fn acquire_address(
    controller: &mut WifiController<'static>,
    stack: Stack<'static>,
) -> LinkEvent {
    match select(
        stack.wait_config_up(),
        controller.wait_for_event(WifiEvent::StaDisconnected),
    )
    .await
    {
        Either::First(()) => match stack.config_v4() {
            Some(config) => LinkEvent::AddressAcquired(config.address.address()),
            None => LinkEvent::Disconnected,
        },
        Either::Second(()) => LinkEvent::Disconnected,
    }
}

async fn wait_for_disconnect(controller: &mut WifiController<'static>) -> LinkEvent {
    controller.wait_for_event(WifiEvent::StaDisconnected).await;
    LinkEvent::Disconnected
}
