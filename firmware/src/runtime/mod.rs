//! Boot sequence and task wiring.
//!
//! Everything before the executor starts is blocking: the factory-reset check
//! and the store load. The boot plan then decides which tasks run. Provisioning
//! gets the access point, a DHCP server and the listener; a station boot gets
//! the link supervisor and the session, which spawns the discovery, export and
//! probe tasks as it advances.

mod dhcp_task;
mod discovery_task;
mod export_task;
mod link_task;
mod probe_task;
mod provisioning_task;
mod session_task;

use core::net::Ipv4Addr;

use csi_node_core::boot::{BootPlan, NodeTimings, ProvisioningReason, plan_boot};
use csi_node_core::config::{ConfigStore, DeviceConfiguration};
use csi_node_core::provisioning::{PROVISIONING_AP_ADDRESS, PROVISIONING_AP_PREFIX_LEN};
use csi_node_core::reset::{ResetButton, ResetDecision, check_factory_reset};
use csi_node_core::telemetry::NodeEvent;
use embassy_net::{Ipv4Cidr, Runner, StackResources, StaticConfigV4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_sync::watch::Watch;
use esp_hal::rng::Rng;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::WifiDevice;
use static_cell::StaticCell;

use crate::frames::FrameQueue;
use crate::hw::{self, BootButton, NodeStore};
use crate::{radio, telemetry};

const HEAP_BYTES: usize = 72 * 1024;
const STACK_SOCKETS: usize = 6;

/// Published once per boot when the station has an address.
#[derive(Copy, Clone, Debug)]
pub(super) struct LinkReady {
    pub address: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
}

pub(super) static LINK_READY: Watch<CriticalSectionRawMutex, LinkReady, 1> = Watch::new();
pub(super) static LINK_STOP: Signal<CriticalSectionRawMutex, ()> = Signal::new();
pub(super) static LINK_STOPPED: Signal<CriticalSectionRawMutex, ()> = Signal::new();
pub(super) static FRAME_QUEUE: FrameQueue<CriticalSectionRawMutex> = FrameQueue::new();

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static RESOURCES: StaticCell<StackResources<STACK_SOCKETS>> = StaticCell::new();
static CONFIG: StaticCell<DeviceConfiguration> = StaticCell::new();
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

pub fn run() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default());
    esp_alloc::heap_allocator!(size: HEAP_BYTES);
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let timings = NodeTimings::default();
    telemetry::emit(NodeEvent::Boot);

    let mut store = match hw::open_store(peripherals.FLASH) {
        Ok(store) => store,
        Err(error) => {
            defmt::error!("store: flash unusable error={}", error);
            hw::halt()
        }
    };

    let mut button = BootButton::new(peripherals.GPIO0);
    if check_reset_button(&mut button, &timings) == ResetDecision::Erase {
        erase_and_restart(&mut store);
    }
    drop(button);

    let plan = plan_boot(&mut store);

    let radio_ctrl = match esp_radio::init() {
        Ok(ctrl) => RADIO.init(ctrl),
        Err(error) => {
            defmt::error!("radio: init failed error={}", error);
            hw::restart()
        }
    };
    let (controller, interfaces) =
        match esp_radio::wifi::new(radio_ctrl, peripherals.WIFI, radio::runtime_config()) {
            Ok(wifi) => wifi,
            Err(error) => {
                defmt::error!("radio: wifi init failed error={}", error);
                hw::restart()
            }
        };
    let resources = RESOURCES.init(StackResources::new());
    let seed = seed();
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());

    match plan {
        BootPlan::Provisioning { reason } => {
            telemetry::emit(match reason {
                ProvisioningReason::Absent => NodeEvent::ConfigurationAbsent,
                ProvisioningReason::Unreadable(error) => NodeEvent::ConfigurationUnreadable(error),
            });
            let net_config = embassy_net::Config::ipv4_static(StaticConfigV4 {
                address: Ipv4Cidr::new(PROVISIONING_AP_ADDRESS, PROVISIONING_AP_PREFIX_LEN),
                gateway: Some(PROVISIONING_AP_ADDRESS),
                dns_servers: Default::default(),
            });
            let (stack, runner) = embassy_net::new(interfaces.ap, net_config, resources, seed);
            executor.run(move |spawner| {
                spawner.must_spawn(net_task(runner));
                spawner.must_spawn(dhcp_task::run(stack));
                spawner.must_spawn(provisioning_task::run(controller, stack, store, timings));
            })
        }
        BootPlan::Station(config) => {
            telemetry::emit(NodeEvent::ConfigurationLoaded { auth: config.auth });
            let config: &'static DeviceConfiguration = CONFIG.init(config);
            let net_config = embassy_net::Config::dhcpv4(Default::default());
            let (stack, runner) = embassy_net::new(interfaces.sta, net_config, resources, seed);
            let rtc = Rtc::new(peripherals.LPWR);
            executor.run(move |spawner| {
                spawner.must_spawn(net_task(runner));
                spawner.must_spawn(link_task::run(controller, stack, config, store));
                spawner.must_spawn(session_task::run(
                    spawner,
                    stack,
                    config.collector,
                    timings,
                    rtc,
                ));
            })
        }
    }
}

/// Samples the BOOT button, reporting a hold and its outcome.
fn check_reset_button(button: &mut BootButton<'_>, timings: &NodeTimings) -> ResetDecision {
    let mut held = false;
    let mut sample = || {
        let pressed = button.is_pressed();
        if pressed && !held {
            held = true;
            telemetry::emit(NodeEvent::ResetButtonHeld);
        }
        pressed
    };
    let decision = check_factory_reset(&mut sample, timings, hw::busy_wait);
    if held {
        telemetry::emit(NodeEvent::ResetButtonDecided(decision));
    }
    decision
}

/// Erases the configuration and reboots into provisioning.
pub(super) fn erase_and_restart(store: &mut NodeStore) -> ! {
    match store.erase() {
        Ok(()) => telemetry::emit(NodeEvent::FactoryResetErased),
        Err(error) => defmt::error!("store: erase failed error={}", error),
    }
    hw::restart()
}

fn seed() -> u64 {
    let rng = Rng::new();
    (u64::from(rng.random()) << 32) | u64::from(rng.random())
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}
