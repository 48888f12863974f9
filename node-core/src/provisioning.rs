//! One-shot provisioning listener.
//!
//! An unconfigured node raises its own access point and waits, without a
//! timeout, for a single datagram on [`PROVISIONING_PORT`]:
//!
//! ```text
//! open,<ssid>,<pass>,<serverIp>,<serverPort>
//! wpa2psk,<ssid>,<pass>,<serverIp>,<serverPort>
//! peap,<ssid>,<identity>,<pass>,<serverIp>,<serverPort>
//! ```
//!
//! Fields are positional. Only the auth tag and SSID are required; the rest
//! default to empty text, `0.0.0.0`, or port 0.

use core::fmt;
use core::net::Ipv4Addr;
use core::time::Duration;

use heapless::Vec;
use winnow::combinator::opt;
use winnow::prelude::*;
use winnow::token::take_till;

use crate::config::{
    AuthType, CollectorEndpoint, ConfigField, ConfigStore, DeviceConfiguration, FieldTooLong,
    StoreError,
};
use crate::wire::leading_decimal;

/// UDP port the provisioning listener binds.
pub const PROVISIONING_PORT: u16 = 50_000;
/// SSID of the access point raised while unprovisioned.
pub const PROVISIONING_AP_SSID: &str = "ESP_PROV";
/// WPA2 passphrase of the provisioning access point.
pub const PROVISIONING_AP_PASSWORD: &str = "12345678";
/// Address the node holds on its own access point.
pub const PROVISIONING_AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
/// Prefix length of the access point subnet.
pub const PROVISIONING_AP_PREFIX_LEN: u8 = 24;
/// Clients the access point leases addresses to at once.
pub const PROVISIONING_LEASES: usize = 8;
/// Receive buffer size; one byte is reserved so payloads cap at 255.
pub const PROVISIONING_BUFFER_LEN: usize = 256;
/// Longest payload the listener considers. Longer datagrams are truncated.
pub const MAX_PROVISIONING_PAYLOAD: usize = PROVISIONING_BUFFER_LEN - 1;
/// Delay between a successful commit and the restart.
pub const RESTART_FLUSH_DELAY: Duration = Duration::from_secs(1);

const MAX_FIELDS: usize = 6;

/// Why a provisioning datagram was rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProvisioningError {
    /// Nothing but whitespace was received.
    Empty,
    InvalidUtf8,
    /// The auth tag field was empty.
    MissingAuth,
    /// The SSID field was absent or empty.
    MissingSsid,
    /// The auth tag is not one of `open`, `wpa2psk`, `peap`.
    UnknownAuth,
    FieldTooLong(ConfigField),
}

impl From<FieldTooLong> for ProvisioningError {
    fn from(error: FieldTooLong) -> Self {
        ProvisioningError::FieldTooLong(error.0)
    }
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningError::Empty => f.write_str("empty provisioning payload"),
            ProvisioningError::InvalidUtf8 => f.write_str("provisioning payload is not UTF-8"),
            ProvisioningError::MissingAuth => f.write_str("auth type missing"),
            ProvisioningError::MissingSsid => f.write_str("ssid missing"),
            ProvisioningError::UnknownAuth => f.write_str("unknown auth type"),
            ProvisioningError::FieldTooLong(field) => {
                write!(f, "field `{}` too long", field.key())
            }
        }
    }
}

/// Parses one provisioning datagram into a configuration.
///
/// # Errors
///
/// Returns [`ProvisioningError`] when the payload is malformed.
pub fn parse_provisioning(payload: &[u8]) -> Result<DeviceConfiguration, ProvisioningError> {
    let truncated = payload.len() > MAX_PROVISIONING_PAYLOAD;
    let payload = &payload[..payload.len().min(MAX_PROVISIONING_PAYLOAD)];
    let text = match core::str::from_utf8(payload) {
        Ok(text) => text,
        // The cut landed inside a multibyte character; keep what precedes it.
        Err(error) if truncated && error.error_len().is_none() => {
            core::str::from_utf8(&payload[..error.valid_up_to()])
                .map_err(|_| ProvisioningError::InvalidUtf8)?
        }
        Err(_) => return Err(ProvisioningError::InvalidUtf8),
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(ProvisioningError::Empty);
    }

    let mut input = text;
    let fields = fields
        .parse_next(&mut input)
        .map_err(|_| ProvisioningError::Empty)?;
    let field = |index: usize| fields.get(index).copied().unwrap_or("");

    let tag = field(0);
    if tag.is_empty() {
        return Err(ProvisioningError::MissingAuth);
    }
    let auth = AuthType::from_tag(tag).ok_or(ProvisioningError::UnknownAuth)?;
    let ssid = field(1);
    if ssid.is_empty() {
        return Err(ProvisioningError::MissingSsid);
    }

    let (identity, password, server_ip, server_port) = match auth {
        AuthType::Enterprise => (field(2), field(3), field(4), field(5)),
        AuthType::Open | AuthType::Personal => ("", field(2), field(3), field(4)),
    };

    let address = server_ip.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
    let port = u16::try_from(leading_decimal(server_port)).unwrap_or(0);
    let config = DeviceConfiguration::new(
        auth,
        ssid,
        password,
        identity,
        CollectorEndpoint::new(address, port),
    )?;
    Ok(config)
}

/// First and last address handed to clients of the provisioning access
/// point. The pool follows the node's own address inside its subnet.
#[must_use]
pub fn provisioning_lease_range() -> (Ipv4Addr, Ipv4Addr) {
    let base = u32::from(PROVISIONING_AP_ADDRESS);
    let leases = u32::try_from(PROVISIONING_LEASES).unwrap_or(1);
    (Ipv4Addr::from(base + 1), Ipv4Addr::from(base + leases))
}

/// Splits the payload on commas, keeping empty fields. Fields past the sixth are ignored.
fn fields<'a>(input: &mut &'a str) -> ModalResult<Vec<&'a str, MAX_FIELDS>> {
    let mut out = Vec::new();
    loop {
        let value = take_till(0.., ',').parse_next(input)?;
        if out.push(value).is_err() {
            break;
        }
        if opt(',').parse_next(input)?.is_none() {
            break;
        }
    }
    Ok(out)
}

/// Listener lifecycle. There is no timeout while awaiting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ListenerState {
    AwaitingProvisioning,
    /// A configuration was committed; the runtime restarts after [`RESTART_FLUSH_DELAY`].
    RestartPending,
    /// The datagram was rejected or could not be stored. The node stays idle
    /// until power-cycled.
    Closed,
}

/// Result of handing the listener its datagram.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProvisioningOutcome {
    Committed(DeviceConfiguration),
    Rejected(ProvisioningError),
    StoreFailed(StoreError),
}

/// One-shot provisioning state machine.
#[derive(Debug)]
pub struct ProvisioningListener {
    state: ListenerState,
}

impl Default for ProvisioningListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningListener {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ListenerState::AwaitingProvisioning,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ListenerState {
        self.state
    }

    /// Consumes the first datagram. Later datagrams return `None`.
    pub fn accept<S: ConfigStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Option<ProvisioningOutcome> {
        if self.state != ListenerState::AwaitingProvisioning {
            return None;
        }

        let outcome = match parse_provisioning(payload) {
            Ok(config) => match store.save(&config) {
                Ok(()) => ProvisioningOutcome::Committed(config),
                Err(error) => ProvisioningOutcome::StoreFailed(error),
            },
            Err(error) => ProvisioningOutcome::Rejected(error),
        };

        self.state = match outcome {
            ProvisioningOutcome::Committed(_) => ListenerState::RestartPending,
            ProvisioningOutcome::Rejected(_) | ProvisioningOutcome::StoreFailed(_) => {
                ListenerState::Closed
            }
        };
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_personal_record() {
        let config = parse_provisioning(b"wpa2psk,MySSID,MyPass,10.0.0.5,9000").unwrap();
        assert_eq!(config.auth, AuthType::Personal);
        assert_eq!(config.ssid.as_str(), "MySSID");
        assert_eq!(config.password.as_str(), "MyPass");
        assert!(config.identity.is_empty());
        assert_eq!(
            config.collector,
            CollectorEndpoint::new(Ipv4Addr::new(10, 0, 0, 5), 9000)
        );
    }

    #[test]
    fn parses_enterprise_record() {
        let config = parse_provisioning(b"peap,CorpNet,alice,secret,10.0.0.5,9000").unwrap();
        assert_eq!(config.auth, AuthType::Enterprise);
        assert_eq!(config.ssid.as_str(), "CorpNet");
        assert_eq!(config.identity.as_str(), "alice");
        assert_eq!(config.password.as_str(), "secret");
        assert_eq!(config.collector.port, 9000);
    }

    #[test]
    fn trailing_newline_and_short_records_use_defaults() {
        let config = parse_provisioning(b"open,Cafe\r\n").unwrap();
        assert_eq!(config.auth, AuthType::Open);
        assert_eq!(config.ssid.as_str(), "Cafe");
        assert!(config.password.is_empty());
        assert_eq!(config.collector, CollectorEndpoint::UNSPECIFIED);
    }

    #[test]
    fn unusable_endpoint_fields_fall_back() {
        let config = parse_provisioning(b"wpa2psk,Home,pw,not-an-ip,70000").unwrap();
        assert_eq!(config.collector, CollectorEndpoint::UNSPECIFIED);

        let config = parse_provisioning(b"wpa2psk,Home,pw,192.168.1.2,port").unwrap();
        assert_eq!(config.collector.port, 0);
    }

    #[test]
    fn rejects_malformed_records() {
        assert_eq!(parse_provisioning(b""), Err(ProvisioningError::Empty));
        assert_eq!(parse_provisioning(b" \n"), Err(ProvisioningError::Empty));
        assert_eq!(
            parse_provisioning(b",ssid,pw"),
            Err(ProvisioningError::MissingAuth)
        );
        assert_eq!(
            parse_provisioning(b"wpa2psk"),
            Err(ProvisioningError::MissingSsid)
        );
        assert_eq!(
            parse_provisioning(b"wpa2psk,,pw"),
            Err(ProvisioningError::MissingSsid)
        );
        assert_eq!(
            parse_provisioning(b"wep,Home,pw"),
            Err(ProvisioningError::UnknownAuth)
        );
        assert_eq!(
            parse_provisioning(&[0xFF, b',', b'x']),
            Err(ProvisioningError::InvalidUtf8)
        );
    }

    #[test]
    fn truncation_inside_a_multibyte_character_keeps_the_prefix() {
        let prefix = b"open,Cafe,,10.1.1.1,5000,xy,";
        let mut payload = [0u8; 268];
        payload[..prefix.len()].copy_from_slice(prefix);
        for pair in payload[prefix.len()..].chunks_exact_mut(2) {
            pair.copy_from_slice("é".as_bytes());
        }
        assert!(core::str::from_utf8(&payload).is_ok());
        assert!(core::str::from_utf8(&payload[..MAX_PROVISIONING_PAYLOAD]).is_err());

        let config = parse_provisioning(&payload).unwrap();
        assert_eq!(config.ssid.as_str(), "Cafe");
        assert_eq!(config.collector.port, 5000);

        assert_eq!(
            parse_provisioning(b"open,Caf\xC3"),
            Err(ProvisioningError::InvalidUtf8)
        );
    }

    #[test]
    fn lease_range_stays_inside_the_access_point_subnet() {
        let (first, last) = provisioning_lease_range();
        let mask = u32::MAX << (32 - u32::from(PROVISIONING_AP_PREFIX_LEN));
        let network = u32::from(PROVISIONING_AP_ADDRESS) & mask;
        let broadcast = network | !mask;

        assert_eq!(first, Ipv4Addr::new(192, 168, 4, 2));
        assert!(u32::from(first) > u32::from(PROVISIONING_AP_ADDRESS));
        assert!(u32::from(last) < broadcast);
        assert_eq!(u32::from(last) & mask, network);
        let pool = u32::from(last) - u32::from(first) + 1;
        assert_eq!(pool, u32::try_from(PROVISIONING_LEASES).unwrap());
    }

    #[test]
    fn extra_fields_are_ignored() {
        let config = parse_provisioning(b"open,Cafe,,10.1.1.1,5000,extra,more,fields").unwrap();
        assert_eq!(
            config.collector,
            CollectorEndpoint::new(Ipv4Addr::new(10, 1, 1, 1), 5000)
        );
    }
}
