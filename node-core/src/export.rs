//! CSI export pipeline.
//!
//! The radio driver hands every measurement to [`CsiIngress`] from its receive
//! callback. Ingress filters by BSSID, stamps a sequence number and pushes the
//! frame into a bounded [`FrameSink`] without blocking. An export task drains
//! the sink, renders each frame with [`format_record`] and sends one datagram
//! per record to the destination held in [`ExportDestination`].

use core::fmt;
use core::str::FromStr;

use heapless::{Deque, Vec};

use crate::config::CollectorEndpoint;

/// Upper bound on samples in one measurement.
pub const MAX_CSI_SAMPLES: usize = 612;
/// Depth of the queue between the driver callback and the export task.
pub const FRAME_QUEUE_DEPTH: usize = 8;
/// Longest rendered record: header, 19 metadata fields and every sample at 5 bytes.
pub const MAX_RECORD_LEN: usize = 3400;
pub const RECORD_PREFIX: &str = "CSI_DATA";

pub type MacAddress = [u8; 6];
pub type CsiSamples = Vec<i8, MAX_CSI_SAMPLES>;
pub type RecordBuffer = heapless::String<MAX_RECORD_LEN>;

/// Which long training fields the radio reports and how it scales them.
#[allow(clippy::struct_excessive_bools)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CaptureSettings {
    pub lltf: bool,
    pub htltf: bool,
    pub stbc_htltf2: bool,
    pub ltf_merge: bool,
    pub channel_filter: bool,
    pub manual_scale: bool,
    /// Left shift applied to the scaled samples when `manual_scale` is set.
    pub shift: u8,
    pub dump_ack: bool,
}

/// L-LTF only, merged and filtered, with a fixed one-bit manual scale so
/// sample magnitudes are comparable across frames.
pub const CAPTURE_SETTINGS: CaptureSettings = CaptureSettings {
    lltf: true,
    htltf: false,
    stbc_htltf2: false,
    ltf_merge: true,
    channel_filter: true,
    manual_scale: true,
    shift: 1,
    dump_ack: false,
};

/// Receive-control metadata reported with each measurement.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RxControl {
    pub rssi: i8,
    pub rate: u8,
    pub sig_mode: u8,
    pub mcs: u8,
    pub cwb: u8,
    pub smoothing: u8,
    pub not_sounding: u8,
    pub aggregation: u8,
    pub stbc: u8,
    pub fec_coding: u8,
    pub sgi: u8,
    pub noise_floor: i8,
    pub ampdu_cnt: u8,
    pub channel: u8,
    pub secondary_channel: u8,
    pub timestamp: u32,
    pub ant: u8,
    pub sig_len: u16,
    pub rx_state: u8,
}

/// One channel-state measurement from the driver.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CsiFrame {
    pub mac: MacAddress,
    pub rx: RxControl,
    pub first_word_invalid: bool,
    pub samples: CsiSamples,
}

/// Frame with the sequence number assigned on ingress.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SequencedFrame {
    pub seq: u32,
    pub frame: CsiFrame,
}

/// Writes `frame` as one export record, newline terminated.
///
/// # Errors
///
/// Propagates the writer's error, typically a full buffer.
pub fn format_record<W: fmt::Write>(seq: u32, frame: &CsiFrame, out: &mut W) -> fmt::Result {
    let rx = &frame.rx;
    write!(out, "{RECORD_PREFIX},{seq},{}", MacDisplay(&frame.mac))?;
    write!(
        out,
        ",{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        rx.rssi,
        rx.rate,
        rx.sig_mode,
        rx.mcs,
        rx.cwb,
        rx.smoothing,
        rx.not_sounding,
        rx.aggregation,
        rx.stbc,
        rx.fec_coding,
        rx.sgi,
        rx.noise_floor,
        rx.ampdu_cnt,
        rx.channel,
        rx.secondary_channel,
        rx.timestamp,
        rx.ant,
        rx.sig_len,
        rx.rx_state,
    )?;
    write!(
        out,
        ",{},{},\"[",
        frame.samples.len(),
        u8::from(frame.first_word_invalid)
    )?;
    for (index, sample) in frame.samples.iter().enumerate() {
        if index > 0 {
            out.write_char(',')?;
        }
        write!(out, "{sample}")?;
    }
    out.write_str("]\"\n")
}

/// Lowercase colon-separated MAC address.
pub struct MacDisplay<'a>(pub &'a MacAddress);

impl fmt::Display for MacDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Parses `aa:bb:cc:dd:ee:ff`.
#[must_use]
pub fn parse_mac(text: &str) -> Option<MacAddress> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in &mut mac {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

/// An export record as seen by the collector.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CsiRecord<'a> {
    pub seq: u32,
    pub mac: MacAddress,
    pub rx: RxControl,
    pub len: usize,
    pub first_word_invalid: bool,
    /// Comma-separated samples without the surrounding brackets.
    pub samples: &'a str,
}

/// Parses one line produced by [`format_record`].
#[must_use]
pub fn parse_record(line: &str) -> Option<CsiRecord<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (head, tail) = line.split_once(",\"[")?;
    let samples = tail.strip_suffix("]\"")?;

    let mut parts = head.split(',');
    if parts.next()? != RECORD_PREFIX {
        return None;
    }
    let seq = next_field(&mut parts)?;
    let mac = parse_mac(parts.next()?)?;
    let rx = RxControl {
        rssi: next_field(&mut parts)?,
        rate: next_field(&mut parts)?,
        sig_mode: next_field(&mut parts)?,
        mcs: next_field(&mut parts)?,
        cwb: next_field(&mut parts)?,
        smoothing: next_field(&mut parts)?,
        not_sounding: next_field(&mut parts)?,
        aggregation: next_field(&mut parts)?,
        stbc: next_field(&mut parts)?,
        fec_coding: next_field(&mut parts)?,
        sgi: next_field(&mut parts)?,
        noise_floor: next_field(&mut parts)?,
        ampdu_cnt: next_field(&mut parts)?,
        channel: next_field(&mut parts)?,
        secondary_channel: next_field(&mut parts)?,
        timestamp: next_field(&mut parts)?,
        ant: next_field(&mut parts)?,
        sig_len: next_field(&mut parts)?,
        rx_state: next_field(&mut parts)?,
    };
    let len = next_field(&mut parts)?;
    let first_word_invalid = next_field::<u8>(&mut parts)? != 0;
    if parts.next().is_some() {
        return None;
    }

    Some(CsiRecord {
        seq,
        mac,
        rx,
        len,
        first_word_invalid,
        samples,
    })
}

fn next_field<'a, T: FromStr>(parts: &mut impl Iterator<Item = &'a str>) -> Option<T> {
    parts.next()?.parse().ok()
}

/// Non-blocking frame queue between the driver callback and the export task.
pub trait FrameSink {
    /// Enqueues `frame`, handing it back if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the rejected frame when there is no room.
    fn try_push(&mut self, frame: SequencedFrame) -> Result<(), SequencedFrame>;
}

impl<const N: usize> FrameSink for Deque<SequencedFrame, N> {
    fn try_push(&mut self, frame: SequencedFrame) -> Result<(), SequencedFrame> {
        self.push_back(frame)
    }
}

/// What ingress did with one driver frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IngressOutcome {
    /// Not from the associated access point.
    Filtered,
    Queued { seq: u32 },
    /// The queue was full; the frame consumed `seq` and was discarded.
    Dropped { seq: u32 },
}

/// Driver-callback side of the pipeline.
#[derive(Debug)]
pub struct CsiIngress<Q> {
    sink: Q,
    bssid: MacAddress,
    next_seq: u32,
    dropped: u32,
}

impl<Q: FrameSink> CsiIngress<Q> {
    #[must_use]
    pub const fn new(sink: Q, bssid: MacAddress) -> Self {
        Self {
            sink,
            bssid,
            next_seq: 0,
            dropped: 0,
        }
    }

    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Sequence number the next accepted frame will carry.
    #[must_use]
    pub const fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn sink_mut(&mut self) -> &mut Q {
        &mut self.sink
    }

    pub fn on_frame(&mut self, frame: CsiFrame) -> IngressOutcome {
        if frame.mac != self.bssid {
            return IngressOutcome::Filtered;
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        match self.sink.try_push(SequencedFrame { seq, frame }) {
            Ok(()) => IngressOutcome::Queued { seq },
            Err(_) => {
                self.dropped = self.dropped.saturating_add(1);
                IngressOutcome::Dropped { seq }
            }
        }
    }
}

/// How [`ExportDestination::resolve`] satisfied a send.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// The cached socket matched the configured endpoint.
    Reused,
    /// No socket was cached.
    Opened,
    /// The endpoint changed; the old socket was closed first.
    Reopened,
}

/// Cached export socket keyed by the collector endpoint it was opened for.
#[derive(Debug)]
pub struct ExportDestination<S> {
    cached: Option<(CollectorEndpoint, S)>,
}

impl<S> Default for ExportDestination<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ExportDestination<S> {
    #[must_use]
    pub const fn new() -> Self {
        Self { cached: None }
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<CollectorEndpoint> {
        self.cached.as_ref().map(|(endpoint, _)| *endpoint)
    }

    /// Ensures the cached socket targets `current`, opening a new one if needed.
    ///
    /// The old socket is dropped before `open` runs.
    ///
    /// # Errors
    ///
    /// Propagates the error from `open`; the cache is left empty.
    pub fn resolve<E>(
        &mut self,
        current: CollectorEndpoint,
        open: impl FnOnce(CollectorEndpoint) -> Result<S, E>,
    ) -> Result<Resolution, E> {
        let resolution = match self.endpoint() {
            Some(endpoint) if endpoint == current => return Ok(Resolution::Reused),
            Some(_) => Resolution::Reopened,
            None => Resolution::Opened,
        };
        self.cached = None;
        let socket = open(current)?;
        self.cached = Some((current, socket));
        Ok(resolution)
    }

    pub fn socket_mut(&mut self) -> Option<&mut S> {
        self.cached.as_mut().map(|(_, socket)| socket)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

/// Renders `frame` into a fresh record buffer.
///
/// # Errors
///
/// Returns [`fmt::Error`] if the record does not fit [`MAX_RECORD_LEN`].
pub fn render_record(seq: u32, frame: &CsiFrame) -> Result<RecordBuffer, fmt::Error> {
    let mut buffer = RecordBuffer::new();
    format_record(seq, frame, &mut buffer)?;
    Ok(buffer)
}
