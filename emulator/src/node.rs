//! Host rendition of the node's boot cycle.
//!
//! Each call to [`EmulatedNode::run_cycle`] is one wake: the flash image is
//! reopened, the reset button sampled, and the node either waits for
//! provisioning or joins the network, runs one session and suspends. Nothing
//! but the flash image carries over between cycles.

use std::cell::Cell;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use csi_node_core::boot::{BootPlan, NodeTimings, ProvisioningReason, plan_boot};
use csi_node_core::config::{
    CollectorEndpoint, ConfigStore, DeviceConfiguration, FlashConfigStore,
};
use csi_node_core::discovery::{
    DISCOVERY_PORT, DiscoverySchedule, discovery_message,
};
use csi_node_core::export::{
    CsiIngress, ExportDestination, FRAME_QUEUE_DEPTH, FrameSink, IngressOutcome, Resolution,
    SequencedFrame, render_record,
};
use csi_node_core::link::{LinkAction, LinkController, LinkEvent, credential_strategy};
use csi_node_core::probe::{ECHO_REQUEST_LEN, TrafficProbe};
use csi_node_core::provisioning::{
    PROVISIONING_AP_ADDRESS, PROVISIONING_AP_SSID, PROVISIONING_BUFFER_LEN, PROVISIONING_PORT,
    ProvisioningListener, ProvisioningOutcome,
};
use csi_node_core::reset::{ResetDecision, check_factory_reset};
use csi_node_core::session::{COMMAND_BUFFER_LEN, COMMAND_PORT, SessionAction, SessionScheduler};
use csi_node_core::telemetry::{NodeEvent, TelemetryRecord, TelemetryRecorder};
use tracing::{debug, info, trace, warn};

use crate::error::EmulatorError;
use crate::flash::FileFlash;
use crate::net;
use crate::radio::{AirInterface, RadioOptions, SimulatedRadio};

const PROBE_IDENT: u16 = 0x4353;

#[derive(Clone, Debug)]
pub struct NodeOptions {
    pub flash_path: PathBuf,
    /// While this file exists the reset button reads as pressed.
    pub reset_flag: Option<PathBuf>,
    pub interface: Ipv4Addr,
    pub provisioning_port: u16,
    pub command_port: u16,
    pub discovery_target: SocketAddrV4,
    pub timings: NodeTimings,
    pub radio: RadioOptions,
}

impl NodeOptions {
    #[must_use]
    pub fn new(flash_path: PathBuf) -> Self {
        Self {
            flash_path,
            reset_flag: None,
            interface: Ipv4Addr::UNSPECIFIED,
            provisioning_port: PROVISIONING_PORT,
            command_port: COMMAND_PORT,
            discovery_target: SocketAddrV4::new(Ipv4Addr::BROADCAST, DISCOVERY_PORT),
            timings: NodeTimings::default(),
            radio: RadioOptions::default(),
        }
    }
}

/// How one boot cycle ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// Software restart after provisioning or a factory reset.
    Restarted,
    /// Woke from the suspend timer.
    Suspended,
    /// Provisioning failed; the node idles until power-cycled.
    Halted,
}

/// Fans lifecycle events out to tracing, the telemetry ring and an optional observer.
#[derive(Clone)]
struct NodeEvents {
    recorder: Arc<Mutex<TelemetryRecorder<Instant>>>,
    observer: Option<Sender<NodeEvent>>,
}

impl NodeEvents {
    fn emit(&self, event: NodeEvent) {
        if event.is_warning() {
            warn!("{event}");
        } else {
            info!("{event}");
        }
        if let Ok(mut recorder) = self.recorder.lock() {
            recorder.record(event, Instant::now());
        }
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }
}

pub struct EmulatedNode {
    options: NodeOptions,
    failure_budget: Arc<AtomicU32>,
    events: NodeEvents,
}

enum LinkOutcome {
    Ready(Ipv4Addr),
    FactoryReset,
}

/// Frame queue backed by a bounded channel. Full means drop.
struct ChannelSink(SyncSender<SequencedFrame>);

impl FrameSink for ChannelSink {
    fn try_push(&mut self, frame: SequencedFrame) -> Result<(), SequencedFrame> {
        self.0.try_send(frame).map_err(|error| match error {
            TrySendError::Full(frame) | TrySendError::Disconnected(frame) => frame,
        })
    }
}

impl EmulatedNode {
    #[must_use]
    pub fn new(options: NodeOptions) -> Self {
        let failure_budget = Arc::new(AtomicU32::new(options.radio.failing_associations));
        Self {
            options,
            failure_budget,
            events: NodeEvents {
                recorder: Arc::new(Mutex::new(TelemetryRecorder::new())),
                observer: None,
            },
        }
    }

    /// Forwards every emitted event to `observer`.
    #[must_use]
    pub fn observed_by(mut self, observer: Sender<NodeEvent>) -> Self {
        self.events.observer = Some(observer);
        self
    }

    /// Snapshot of the telemetry ring, oldest first.
    #[must_use]
    pub fn telemetry(&self) -> Vec<TelemetryRecord<Instant>> {
        self.events
            .recorder
            .lock()
            .map(|recorder| recorder.oldest_first().copied().collect())
            .unwrap_or_default()
    }

    /// Runs boot cycles until the node halts or `max_cycles` is reached.
    ///
    /// # Errors
    ///
    /// Propagates the first cycle error.
    pub fn run(&mut self, max_cycles: Option<usize>) -> Result<CycleOutcome, EmulatorError> {
        let mut cycles = 0usize;
        loop {
            let outcome = self.run_cycle()?;
            cycles += 1;
            if outcome == CycleOutcome::Halted {
                info!("provisioning closed; idle until power cycle");
                return Ok(outcome);
            }
            if max_cycles.is_some_and(|max| cycles >= max) {
                return Ok(outcome);
            }
        }
    }

    /// Runs one wake from reset or suspend.
    ///
    /// # Errors
    ///
    /// Returns an error if the flash image cannot be opened, a socket cannot
    /// be bound, or an erase could not be committed.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, EmulatorError> {
        self.events.emit(NodeEvent::Boot);
        let flash = FileFlash::open(&self.options.flash_path)?;
        let mut store = FlashConfigStore::new(flash, 0)?;

        if self.check_reset_button() == ResetDecision::Erase {
            store.erase()?;
            self.events.emit(NodeEvent::FactoryResetErased);
            self.release_reset_button();
            return Ok(CycleOutcome::Restarted);
        }

        match plan_boot(&mut store) {
            BootPlan::Provisioning { reason } => {
                self.events.emit(match reason {
                    ProvisioningReason::Absent => NodeEvent::ConfigurationAbsent,
                    ProvisioningReason::Unreadable(error) => {
                        NodeEvent::ConfigurationUnreadable(error)
                    }
                });
                self.provision(&mut store)
            }
            BootPlan::Station(config) => {
                self.events
                    .emit(NodeEvent::ConfigurationLoaded { auth: config.auth });
                self.station(&mut store, &config)
            }
        }
    }

    fn check_reset_button(&self) -> ResetDecision {
        let held = Cell::new(false);
        let mut button = || {
            let pressed = self
                .options
                .reset_flag
                .as_ref()
                .is_some_and(|flag| flag.exists());
            if pressed && !held.replace(true) {
                self.events.emit(NodeEvent::ResetButtonHeld);
            }
            pressed
        };
        let decision = check_factory_reset(&mut button, &self.options.timings, thread::sleep);
        if held.get() {
            self.events.emit(NodeEvent::ResetButtonDecided(decision));
        }
        decision
    }

    fn release_reset_button(&self) {
        if let Some(flag) = &self.options.reset_flag
            && let Err(error) = std::fs::remove_file(flag)
        {
            debug!(%error, "reset flag already released");
        }
    }

    fn provision<S: ConfigStore>(&self, store: &mut S) -> Result<CycleOutcome, EmulatorError> {
        let socket = net::bind(SocketAddrV4::new(
            self.options.interface,
            self.options.provisioning_port,
        ))?;
        info!(
            ssid = PROVISIONING_AP_SSID,
            address = %PROVISIONING_AP_ADDRESS,
            port = self.options.provisioning_port,
            "provisioning access point up"
        );
        self.events.emit(NodeEvent::ProvisioningApStarted);

        let mut listener = ProvisioningListener::new();
        let mut buffer = [0u8; PROVISIONING_BUFFER_LEN];
        let (len, peer) = socket
            .recv_from(&mut buffer)
            .map_err(EmulatorError::socket("provisioning receive"))?;
        debug!(%peer, len, "provisioning datagram");

        Ok(match listener.accept(&buffer[..len], store) {
            Some(ProvisioningOutcome::Committed(config)) => {
                self.events
                    .emit(NodeEvent::ProvisioningCommitted { auth: config.auth });
                thread::sleep(self.options.timings.restart_flush);
                CycleOutcome::Restarted
            }
            Some(ProvisioningOutcome::Rejected(error)) => {
                self.events.emit(NodeEvent::ProvisioningRejected(error));
                CycleOutcome::Halted
            }
            Some(ProvisioningOutcome::StoreFailed(error)) => {
                self.events.emit(NodeEvent::ProvisioningStoreFailed(error));
                CycleOutcome::Halted
            }
            None => CycleOutcome::Halted,
        })
    }

    fn station<S: ConfigStore>(
        &self,
        store: &mut S,
        config: &DeviceConfiguration,
    ) -> Result<CycleOutcome, EmulatorError> {
        let timings = self.options.timings;
        let mut scheduler = SessionScheduler::<Instant>::new(timings);
        if scheduler.start() != Some(SessionAction::ConnectLink) {
            return Ok(CycleOutcome::Halted);
        }

        let mut radio = SimulatedRadio::new(
            self.options.radio.clone(),
            Arc::clone(&self.failure_budget),
        );
        let address = match self.join_network(&mut radio, config) {
            LinkOutcome::Ready(address) => address,
            LinkOutcome::FactoryReset => {
                store.erase()?;
                self.events.emit(NodeEvent::FactoryResetErased);
                return Ok(CycleOutcome::Restarted);
            }
        };

        let (stop_discovery, discovery) = self.spawn_discovery(address)?;
        let action = self.await_command(&mut scheduler)?;
        let action = match action {
            SessionAction::StartAcquisition { seconds, .. } => {
                self.events.emit(NodeEvent::StartCommand { seconds });
                self.acquire(&mut scheduler, &radio, config.collector, seconds)?
            }
            other => {
                self.events.emit(NodeEvent::CommandWindowExpired);
                other
            }
        };

        drop(stop_discovery);
        discovery
            .join()
            .map_err(|_| EmulatorError::WorkerPanicked("discovery"))?;

        let SessionAction::Suspend { interval } = action else {
            return Ok(CycleOutcome::Halted);
        };
        self.events.emit(NodeEvent::Suspending {
            millis: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        });
        thread::sleep(interval);
        Ok(CycleOutcome::Suspended)
    }

    fn join_network(
        &self,
        radio: &mut SimulatedRadio,
        config: &DeviceConfiguration,
    ) -> LinkOutcome {
        let credentials = credential_strategy(config);
        info!(ssid = credentials.ssid(), auth = %config.auth, "joining network");
        self.events.emit(NodeEvent::LinkConnecting);

        let mut controller = LinkController::new();
        let mut pending = VecDeque::from([radio.start()]);
        loop {
            let Some(event) = pending.pop_front() else {
                pending.extend(radio.associate(&credentials));
                continue;
            };

            let action = controller.handle(event);
            match event {
                LinkEvent::Associated => self.events.emit(NodeEvent::LinkAssociated),
                LinkEvent::Disconnected => self.events.emit(NodeEvent::LinkDisconnected {
                    failures: controller.consecutive_failures(),
                }),
                LinkEvent::Started | LinkEvent::AddressAcquired(_) => {}
            }

            match action {
                LinkAction::None => {}
                LinkAction::Associate => pending.extend(radio.associate(&credentials)),
                LinkAction::SignalReady(address) => {
                    self.events.emit(NodeEvent::LinkReady {
                        address: address.octets(),
                    });
                    return LinkOutcome::Ready(address);
                }
                LinkAction::FactoryReset => {
                    self.events.emit(NodeEvent::LinkFailureReset);
                    return LinkOutcome::FactoryReset;
                }
            }
        }
    }

    /// Starts the announcement worker. Dropping the returned sender stops it early.
    fn spawn_discovery(
        &self,
        address: Ipv4Addr,
    ) -> Result<(Sender<()>, JoinHandle<()>), EmulatorError> {
        let socket = net::broadcaster(self.options.interface)?;
        let target = self.options.discovery_target;
        let timings = self.options.timings;
        let events = self.events.clone();
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("discovery".into())
            .spawn(move || {
                let message = discovery_message(address);
                let mut schedule =
                    DiscoverySchedule::new(timings.discovery_count, timings.discovery_interval);
                while let Some(delay) = schedule.next() {
                    match socket.send_to(message.as_bytes(), target) {
                        Ok(_) => events.emit(NodeEvent::DiscoverySent {
                            remaining: schedule.remaining(),
                        }),
                        Err(error) => debug!(%error, "discovery send failed"),
                    }
                    if stopped.recv_timeout(delay) != Err(RecvTimeoutError::Timeout) {
                        break;
                    }
                }
            })
            .map_err(EmulatorError::socket("spawn discovery worker"))?;
        Ok((stop, handle))
    }

    fn await_command(
        &self,
        scheduler: &mut SessionScheduler<Instant>,
    ) -> Result<SessionAction<Instant>, EmulatorError> {
        let socket = net::bind(SocketAddrV4::new(
            self.options.interface,
            self.options.command_port,
        ))?;
        net::set_poll_interval(&socket, self.options.timings.command_poll)?;

        let Some(SessionAction::BeginCommandWindow { .. }) = scheduler.on_ready(Instant::now())
        else {
            return Ok(SessionAction::Suspend {
                interval: self.options.timings.suspend,
            });
        };
        self.events.emit(NodeEvent::CommandWindowOpened);

        let mut buffer = [0u8; COMMAND_BUFFER_LEN];
        loop {
            if let Some(action) = scheduler.on_tick(Instant::now()) {
                return Ok(action);
            }
            let received = net::recv_within(&socket, &mut buffer)
                .map_err(EmulatorError::socket("command receive"))?;
            if let Some((len, peer)) = received {
                debug!(%peer, len, "command datagram");
                if let Some(action) = scheduler.on_datagram(Instant::now(), &buffer[..len]) {
                    return Ok(action);
                }
            }
        }
    }

    fn acquire(
        &self,
        scheduler: &mut SessionScheduler<Instant>,
        radio: &SimulatedRadio,
        collector: CollectorEndpoint,
        seconds: u32,
    ) -> Result<SessionAction<Instant>, EmulatorError> {
        self.events.emit(NodeEvent::AcquisitionStarted { seconds });
        let (frames, queue) = mpsc::sync_channel(FRAME_QUEUE_DEPTH);
        let events = self.events.clone();
        let exporter = thread::Builder::new()
            .name("export".into())
            .spawn(move || export_frames(&queue, collector, &events))
            .map_err(EmulatorError::socket("spawn export worker"))?;

        let (requests, echoes) = mpsc::channel();
        let mut air = radio.air_interface();
        let source = thread::Builder::new()
            .name("csi-source".into())
            .spawn(move || receive_frames(&echoes, &mut air, ChannelSink(frames)))
            .map_err(EmulatorError::socket("spawn frame source"))?;

        let mut probe = TrafficProbe::new(radio.gateway(), PROBE_IDENT);
        let action = loop {
            if let Some(action) = scheduler.on_tick(Instant::now()) {
                break action;
            }
            if requests.send(probe.next_request()).is_err() {
                debug!("frame source gone");
            }
            thread::sleep(self.options.timings.probe_interval);
        };

        drop(requests);
        let (next_seq, dropped) = source
            .join()
            .map_err(|_| EmulatorError::WorkerPanicked("frame source"))?;
        self.events
            .emit(NodeEvent::AcquisitionFinished { next_seq, dropped });
        exporter
            .join()
            .map_err(|_| EmulatorError::WorkerPanicked("export"))?;
        Ok(action)
    }
}

/// Driver callback stand-in: feeds every overheard frame through ingress
/// until the probe hangs up. Returns the next sequence number and drop count.
fn receive_frames(
    echoes: &Receiver<[u8; ECHO_REQUEST_LEN]>,
    air: &mut AirInterface,
    sink: ChannelSink,
) -> (u32, u32) {
    let mut ingress = CsiIngress::new(sink, air.bssid());
    for request in echoes {
        for frame in air.echo_reply(&request) {
            if let IngressOutcome::Dropped { seq } = ingress.on_frame(frame) {
                trace!(seq, "frame queue full");
            }
        }
    }
    (ingress.next_seq(), ingress.dropped())
}

/// Drains the frame queue to the collector until the producer hangs up.
fn export_frames(
    queue: &Receiver<SequencedFrame>,
    collector: CollectorEndpoint,
    events: &NodeEvents,
) {
    let mut destination = ExportDestination::<UdpSocket>::new();
    for SequencedFrame { seq, frame } in queue {
        match destination.resolve(collector, net::open_export) {
            Ok(Resolution::Reused) => {}
            Ok(Resolution::Opened | Resolution::Reopened) => {
                events.emit(NodeEvent::ExportDestinationOpened {
                    address: collector.address.octets(),
                    port: collector.port,
                });
            }
            Err(error) => {
                debug!(%error, seq, "export socket unavailable");
                continue;
            }
        }
        let Ok(record) = render_record(seq, &frame) else {
            debug!(seq, "record exceeds export buffer");
            continue;
        };
        if let Some(socket) = destination.socket_mut()
            && let Err(error) = socket.send(record.as_bytes())
        {
            trace!(%error, seq, "export send failed");
        }
    }
}
