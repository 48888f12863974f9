//! Binary layout of the persisted provisioning record.
//!
//! ```text
//! 0..4    magic "CSIN"
//! 4       format version
//! 5       flags (bit 0: tombstone written by an erase)
//! 6..10   generation counter, little endian
//! 10..12  body length, little endian
//! 12..    body: repeated [key len][key][value len][value]
//! ..+4    FNV-1a checksum over header and body
//! ```
//!
//! Keys are the names under [`super::keys`]; the server port is stored as a
//! little-endian `u16`, every other value as UTF-8 text.

use core::net::Ipv4Addr;

use super::{AuthType, CollectorEndpoint, DeviceConfiguration, keys};
use super::store::StoreError;

pub const RECORD_MAGIC: u32 = u32::from_le_bytes(*b"CSIN");
pub const RECORD_VERSION: u8 = 1;
/// Fixed on-flash footprint of one record slot.
pub const RECORD_LEN: usize = 320;

const HEADER_LEN: usize = 12;
const CHECKSUM_LEN: usize = 4;
const BODY_CAPACITY: usize = RECORD_LEN - HEADER_LEN - CHECKSUM_LEN;
const FLAG_TOMBSTONE: u8 = 0b0000_0001;

/// Record content after a successful decode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordBody {
    /// An erase was committed.
    Erased,
    /// Every required key was present and valid.
    Config(DeviceConfiguration),
    /// The record verified but a required key was absent or invalid.
    Incomplete,
}

/// A record that passed magic, version and checksum checks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedRecord {
    pub generation: u32,
    pub body: RecordBody,
}

/// Serializes a record into `buf`. `None` writes a tombstone.
///
/// # Errors
///
/// Returns [`StoreError::Capacity`] if a field does not fit the slot.
pub fn encode(
    generation: u32,
    config: Option<&DeviceConfiguration>,
    buf: &mut [u8; RECORD_LEN],
) -> Result<(), StoreError> {
    buf.fill(0xFF);
    buf[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
    buf[4] = RECORD_VERSION;
    buf[5] = if config.is_some() { 0 } else { FLAG_TOMBSTONE };
    buf[6..10].copy_from_slice(&generation.to_le_bytes());

    let mut body = BodyWriter {
        buf: &mut buf[HEADER_LEN..HEADER_LEN + BODY_CAPACITY],
        len: 0,
    };
    if let Some(config) = config {
        let mut ip_text = heapless::String::<15>::new();
        core::fmt::write(&mut ip_text, format_args!("{}", config.collector.address))
            .map_err(|_| StoreError::Capacity)?;

        body.entry(keys::SSID, config.ssid.as_bytes())?;
        body.entry(keys::PASSWORD, config.password.as_bytes())?;
        body.entry(keys::IDENTITY, config.identity.as_bytes())?;
        body.entry(keys::AUTH, config.auth.tag().as_bytes())?;
        body.entry(keys::SERVER_IP, ip_text.as_bytes())?;
        body.entry(keys::SERVER_PORT, &config.collector.port.to_le_bytes())?;
    }
    let body_len = body.len;

    let body_len_field = u16::try_from(body_len).map_err(|_| StoreError::Capacity)?;
    buf[10..12].copy_from_slice(&body_len_field.to_le_bytes());
    let checksum_at = HEADER_LEN + body_len;
    let checksum = fnv1a(&buf[..checksum_at]);
    buf[checksum_at..checksum_at + CHECKSUM_LEN].copy_from_slice(&checksum.to_le_bytes());
    Ok(())
}

/// Validates and decodes a record slot. Blank or corrupt slots yield `None`.
#[must_use]
pub fn decode(buf: &[u8]) -> Option<DecodedRecord> {
    if buf.len() < RECORD_LEN {
        return None;
    }
    if u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) != RECORD_MAGIC {
        return None;
    }
    if buf[4] != RECORD_VERSION {
        return None;
    }
    let body_len = usize::from(u16::from_le_bytes([buf[10], buf[11]]));
    if body_len > BODY_CAPACITY {
        return None;
    }
    let checksum_at = HEADER_LEN + body_len;
    let stored = u32::from_le_bytes([
        buf[checksum_at],
        buf[checksum_at + 1],
        buf[checksum_at + 2],
        buf[checksum_at + 3],
    ]);
    if fnv1a(&buf[..checksum_at]) != stored {
        return None;
    }

    let generation = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);
    let body = if buf[5] & FLAG_TOMBSTONE != 0 {
        RecordBody::Erased
    } else {
        decode_body(&buf[HEADER_LEN..checksum_at])
            .map_or(RecordBody::Incomplete, RecordBody::Config)
    };
    Some(DecodedRecord { generation, body })
}

#[derive(Default)]
struct Fields<'a> {
    ssid: Option<&'a str>,
    password: Option<&'a str>,
    identity: Option<&'a str>,
    auth: Option<&'a str>,
    server_ip: Option<&'a str>,
    server_port: Option<u16>,
}

fn decode_body(mut body: &[u8]) -> Option<DeviceConfiguration> {
    let mut fields = Fields::default();
    while !body.is_empty() {
        let (key, rest) = take_prefixed(body)?;
        let (value, rest) = take_prefixed(rest)?;
        body = rest;
        match core::str::from_utf8(key).ok()? {
            keys::SSID => fields.ssid = Some(core::str::from_utf8(value).ok()?),
            keys::PASSWORD => fields.password = Some(core::str::from_utf8(value).ok()?),
            keys::IDENTITY => fields.identity = Some(core::str::from_utf8(value).ok()?),
            keys::AUTH => fields.auth = Some(core::str::from_utf8(value).ok()?),
            keys::SERVER_IP => fields.server_ip = Some(core::str::from_utf8(value).ok()?),
            keys::SERVER_PORT => {
                let bytes: [u8; 2] = value.try_into().ok()?;
                fields.server_port = Some(u16::from_le_bytes(bytes));
            }
            // Unknown keys from a newer writer are skipped.
            _ => {}
        }
    }

    let auth = AuthType::from_tag(fields.auth?)?;
    let address: Ipv4Addr = fields.server_ip?.parse().ok()?;
    let collector = CollectorEndpoint::new(address, fields.server_port?);
    DeviceConfiguration::new(
        auth,
        fields.ssid?,
        fields.password?,
        fields.identity.unwrap_or(""),
        collector,
    )
    .ok()
}

fn take_prefixed(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&len, rest) = bytes.split_first()?;
    let len = usize::from(len);
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

struct BodyWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl BodyWriter<'_> {
    fn entry(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.prefixed(key.as_bytes())?;
        self.prefixed(value)
    }

    fn prefixed(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        let len = u8::try_from(bytes.len()).map_err(|_| StoreError::Capacity)?;
        let end = self.len + 1 + bytes.len();
        if end > self.buf.len() {
            return Err(StoreError::Capacity);
        }
        self.buf[self.len] = len;
        self.buf[self.len + 1..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
