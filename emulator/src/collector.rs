//! Collector side of the protocol: provision a node, hear its announcements,
//! command a session and capture the exported records as CSV.

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use csi_node_core::config::{AuthType, CollectorEndpoint};
use csi_node_core::discovery::parse_discovery;
use csi_node_core::export::{RECORD_PREFIX, parse_record};
use tracing::{debug, info, warn};

use crate::error::EmulatorError;
use crate::net;

/// Column names of the CSV the collector writes.
pub const CSV_HEADER: &str = "scenario,seq,mac,rssi,rate,sig_mode,mcs,cwb,smoothing,not_sounding,\
aggregation,stbc,fec_coding,sgi,noise_floor,ampdu_cnt,channel,secondary_channel,timestamp,\
ant,sig_len,rx_state,len,first_word_invalid,data";

/// Default port the collector receives records on.
pub const DEFAULT_COLLECTOR_PORT: u16 = 50_001;
/// Period between repeated start commands while no record has arrived.
pub const START_RESEND_INTERVAL: Duration = Duration::from_secs(3);
/// How long `discover` listens for announcements.
pub const DISCOVERY_LISTEN: Duration = Duration::from_secs(75);

const RECEIVE_BUFFER_LEN: usize = 4096;
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Checks that a scenario label can sit in a CSV column unquoted.
///
/// # Errors
///
/// Returns a message naming the offending character.
pub fn validate_scenario(label: &str) -> Result<(), String> {
    match label.chars().find(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        Some(c) => Err(format!("scenario label may not contain {c:?}")),
        None => Ok(()),
    }
}

/// Builds the provisioning record for the given fields. The identity is only
/// sent for `peap`.
#[must_use]
pub fn provisioning_payload(
    auth: AuthType,
    ssid: &str,
    identity: &str,
    password: &str,
    collector: CollectorEndpoint,
) -> String {
    let CollectorEndpoint { address, port } = collector;
    match auth {
        AuthType::Enterprise => format!("{auth},{ssid},{identity},{password},{address},{port}"),
        AuthType::Open | AuthType::Personal => format!("{auth},{ssid},{password},{address},{port}"),
    }
}

/// Sends one provisioning datagram to `node`.
///
/// # Errors
///
/// Returns an error if the datagram cannot be sent.
pub fn provision(node: SocketAddrV4, payload: &str) -> Result<(), EmulatorError> {
    let socket = net::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    socket
        .send_to(payload.trim_end().as_bytes(), node)
        .map_err(EmulatorError::socket("provisioning send"))?;
    info!(%node, "provisioning datagram sent");
    Ok(())
}

/// Listens on `listen` for the first node announcement.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or read.
pub fn discover(listen: SocketAddrV4, within: Duration) -> Result<Option<Ipv4Addr>, EmulatorError> {
    let socket = net::bind(listen)?;
    net::set_poll_interval(&socket, RECEIVE_POLL)?;
    let deadline = Instant::now() + within;
    let mut buffer = [0u8; 64];
    while Instant::now() < deadline {
        let received = net::recv_within(&socket, &mut buffer)
            .map_err(EmulatorError::socket("discovery receive"))?;
        let Some((len, peer)) = received else {
            continue;
        };
        match parse_discovery(&buffer[..len]) {
            Some(address) => {
                info!(%address, %peer, "node announced");
                return Ok(Some(address));
            }
            None => debug!(%peer, len, "ignoring datagram"),
        }
    }
    Ok(None)
}

#[derive(Clone, Debug)]
pub struct CollectOptions {
    pub seconds: u32,
    /// Label written into the first column of every row.
    pub scenario: String,
    pub resend_interval: Duration,
    /// Stop once no record arrived for this long after the first one.
    pub idle_timeout: Duration,
    /// Give up if no record arrives at all within this long.
    pub start_timeout: Duration,
}

impl CollectOptions {
    #[must_use]
    pub fn new(seconds: u32) -> Self {
        Self {
            seconds,
            scenario: String::new(),
            resend_interval: START_RESEND_INTERVAL,
            idle_timeout: Duration::from_secs(2),
            start_timeout: DISCOVERY_LISTEN,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CollectSummary {
    pub records: u32,
    pub malformed: u32,
    pub first_seq: Option<u32>,
    pub last_seq: Option<u32>,
}

/// Commands a session on `node` and writes every record received on
/// `socket` to `out` as CSV, each row labelled with the scenario.
///
/// # Errors
///
/// Returns an error on socket failure or if `out` cannot be written.
pub fn collect<W: Write>(
    socket: &UdpSocket,
    node: SocketAddr,
    options: &CollectOptions,
    out: &mut W,
) -> Result<CollectSummary, EmulatorError> {
    let output = |source: std::io::Error| EmulatorError::Output { source };
    net::set_poll_interval(socket, RECEIVE_POLL)?;
    writeln!(out, "{CSV_HEADER}").map_err(output)?;

    let command = format!("start,{}", options.seconds);
    let started = Instant::now();
    let mut last_command: Option<Instant> = None;
    let mut last_record: Option<Instant> = None;
    let mut summary = CollectSummary::default();
    let mut buffer = vec![0u8; RECEIVE_BUFFER_LEN];

    loop {
        let now = Instant::now();
        match last_record {
            Some(at) if now.duration_since(at) >= options.idle_timeout => break,
            None if now.duration_since(started) >= options.start_timeout => {
                warn!("no records received");
                break;
            }
            None if last_command.is_none_or(|at| now.duration_since(at) >= options.resend_interval) => {
                socket
                    .send_to(command.as_bytes(), node)
                    .map_err(EmulatorError::socket("command send"))?;
                debug!(%node, %command, "start command sent");
                last_command = Some(now);
            }
            _ => {}
        }

        let received = net::recv_within(socket, &mut buffer)
            .map_err(EmulatorError::socket("record receive"))?;
        let Some((len, _)) = received else {
            continue;
        };
        let Ok(line) = std::str::from_utf8(&buffer[..len]) else {
            summary.malformed += 1;
            continue;
        };
        if !line.starts_with(RECORD_PREFIX) {
            continue;
        }
        let Some(record) = parse_record(line) else {
            summary.malformed += 1;
            continue;
        };

        last_record = Some(Instant::now());
        summary.records += 1;
        summary.first_seq.get_or_insert(record.seq);
        summary.last_seq = Some(record.seq);
        let row = line
            .trim_end()
            .strip_prefix(RECORD_PREFIX)
            .and_then(|rest| rest.strip_prefix(','))
            .unwrap_or_default();
        writeln!(out, "{},{row}", options.scenario).map_err(output)?;
    }

    info!(
        records = summary.records,
        malformed = summary.malformed,
        "collection finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use csi_node_core::export::{CsiFrame, render_record};
    use csi_node_core::provisioning::parse_provisioning;

    fn loopback() -> UdpSocket {
        net::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap()
    }

    #[test]
    fn payload_places_identity_only_for_peap() {
        let collector = CollectorEndpoint::new(Ipv4Addr::new(10, 0, 0, 5), 9000);
        let peap = provisioning_payload(AuthType::Enterprise, "CorpNet", "alice", "secret", collector);
        assert_eq!(peap, "peap,CorpNet,alice,secret,10.0.0.5,9000");

        let personal = provisioning_payload(AuthType::Personal, "Home", "ignored", "pw", collector);
        assert_eq!(personal, "wpa2psk,Home,pw,10.0.0.5,9000");
        let parsed = parse_provisioning(personal.as_bytes()).unwrap();
        assert!(parsed.identity.is_empty());
        assert_eq!(parsed.collector, collector);
    }

    #[test]
    fn collect_resends_until_records_arrive() {
        let collector = loopback();
        let node = loopback();
        let collector_addr = collector.local_addr().unwrap();
        let node_addr = node.local_addr().unwrap();

        let responder = std::thread::spawn(move || {
            let mut buffer = [0u8; 64];
            let (len, _) = node.recv_from(&mut buffer).unwrap();
            assert_eq!(&buffer[..len], b"start,2");
            let mut frame = CsiFrame::default();
            frame.samples.extend_from_slice(&[1, -1]).unwrap();
            for seq in 0..3 {
                let record = render_record(seq, &frame).unwrap();
                node.send_to(record.as_bytes(), collector_addr).unwrap();
            }
            node.send_to(b"noise", collector_addr).unwrap();
        });

        let options = CollectOptions {
            scenario: "walk-by".into(),
            resend_interval: Duration::from_millis(200),
            idle_timeout: Duration::from_millis(300),
            start_timeout: Duration::from_secs(5),
            ..CollectOptions::new(2)
        };
        let mut csv = Vec::new();
        let summary = collect(&collector, node_addr, &options, &mut csv).unwrap();
        responder.join().unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.first_seq, Some(0));
        assert_eq!(summary.last_seq, Some(2));
        let csv = String::from_utf8(csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert!(
            lines
                .next()
                .unwrap()
                .starts_with("walk-by,0,00:00:00:00:00:00,0,")
        );
        assert!(csv.lines().skip(1).all(|row| row.starts_with("walk-by,")));
        assert!(csv.ends_with(",2,0,\"[1,-1]\"\n"));
    }

    #[test]
    fn scenario_labels_must_fit_one_column() {
        assert_eq!(validate_scenario(""), Ok(()));
        assert_eq!(validate_scenario("empty-room"), Ok(()));
        assert!(validate_scenario("a,b").is_err());
        assert!(validate_scenario("say \"hi\"").is_err());
        assert!(validate_scenario("two\nlines").is_err());
    }

    #[test]
    fn discover_ignores_unrelated_datagrams() {
        let reserved = loopback();
        let SocketAddr::V4(listen) = reserved.local_addr().unwrap() else {
            panic!("expected an IPv4 socket");
        };
        drop(reserved);

        let sender = std::thread::spawn(move || {
            let socket = loopback();
            for _ in 0..20 {
                let _ = socket.send_to(b"hello", listen);
                let _ = socket.send_to(b"CSI_IP,10.0.0.9", listen);
                std::thread::sleep(Duration::from_millis(50));
            }
        });
        let found = discover(listen, Duration::from_secs(5)).unwrap();
        sender.join().unwrap();
        assert_eq!(found, Some(Ipv4Addr::new(10, 0, 0, 9)));
    }
}
