//! Provisioned device configuration shared by firmware and host targets.
//!
//! A [`DeviceConfiguration`] is either absent (the node boots into
//! provisioning mode) or fully populated. The persistent copy is owned by a
//! [`ConfigStore`]; every other component works from a transient clone that is
//! valid for the current boot cycle only.

use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

use heapless::String;

pub mod record;
pub mod store;

pub use store::{ConfigStore, FlashConfigStore, LoadError, StoreError};

/// Longest SSID accepted by the 802.11 stack.
pub const SSID_MAX: usize = 32;
/// Longest WPA2 passphrase (or EAP password) we persist.
pub const PASSWORD_MAX: usize = 64;
/// Longest EAP identity we persist.
pub const IDENTITY_MAX: usize = 64;

/// Namespace the provisioning record is filed under.
pub const NAMESPACE: &str = "wifi_prov";

/// Keys used inside the persisted record.
pub mod keys {
    pub const SSID: &str = "ssid";
    pub const PASSWORD: &str = "pass";
    pub const IDENTITY: &str = "identity";
    pub const AUTH: &str = "auth_type";
    pub const SERVER_IP: &str = "server_ip";
    pub const SERVER_PORT: &str = "server_port";
}

pub type Ssid = String<SSID_MAX>;
pub type Password = String<PASSWORD_MAX>;
pub type Identity = String<IDENTITY_MAX>;

/// Authentication scheme used to join the provisioned network.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthType {
    /// No credentials.
    Open,
    /// WPA2 pre-shared key.
    Personal,
    /// WPA2-Enterprise (PEAP) with identity, username and password.
    Enterprise,
}

impl AuthType {
    pub const ALL: [AuthType; 3] = [AuthType::Open, AuthType::Personal, AuthType::Enterprise];

    /// Tag used on the provisioning wire format and in the persisted record.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            AuthType::Open => "open",
            AuthType::Personal => "wpa2psk",
            AuthType::Enterprise => "peap",
        }
    }

    /// Parses a wire/persisted tag. Tags are matched exactly.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|auth| auth.tag() == tag)
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// UDP endpoint of the collector that receives exported CSI records.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CollectorEndpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl CollectorEndpoint {
    #[must_use]
    pub const fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Endpoint used when provisioning supplied nothing usable.
    pub const UNSPECIFIED: Self = Self::new(Ipv4Addr::UNSPECIFIED, 0);

    #[must_use]
    pub const fn socket_addr(self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

impl fmt::Display for CollectorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Identifies a configuration field in error reports.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigField {
    Ssid,
    Password,
    Identity,
}

impl ConfigField {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            ConfigField::Ssid => keys::SSID,
            ConfigField::Password => keys::PASSWORD,
            ConfigField::Identity => keys::IDENTITY,
        }
    }
}

/// A text field exceeded its fixed capacity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FieldTooLong(pub ConfigField);

impl fmt::Display for FieldTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field `{}` exceeds its capacity", self.0.key())
    }
}

/// Network credentials and collector endpoint committed by provisioning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfiguration {
    pub auth: AuthType,
    pub ssid: Ssid,
    pub password: Password,
    /// Only meaningful for [`AuthType::Enterprise`]; empty otherwise.
    pub identity: Identity,
    pub collector: CollectorEndpoint,
}

impl DeviceConfiguration {
    /// Builds a configuration from borrowed text, checking field capacities.
    pub fn new(
        auth: AuthType,
        ssid: &str,
        password: &str,
        identity: &str,
        collector: CollectorEndpoint,
    ) -> Result<Self, FieldTooLong> {
        Ok(Self {
            auth,
            ssid: bounded(ssid, ConfigField::Ssid)?,
            password: bounded(password, ConfigField::Password)?,
            identity: bounded(identity, ConfigField::Identity)?,
            collector,
        })
    }
}

pub(crate) fn bounded<const N: usize>(
    value: &str,
    field: ConfigField,
) -> Result<String<N>, FieldTooLong> {
    let mut out = String::new();
    out.push_str(value).map_err(|_| FieldTooLong(field))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_tags_round_trip_exactly() {
        for auth in AuthType::ALL {
            assert_eq!(AuthType::from_tag(auth.tag()), Some(auth));
        }
        assert_eq!(AuthType::from_tag("WPA2PSK"), None);
        assert_eq!(AuthType::from_tag(""), None);
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let long_ssid = "a-network-name-that-is-longer-than-32-bytes";
        let error = DeviceConfiguration::new(
            AuthType::Open,
            long_ssid,
            "",
            "",
            CollectorEndpoint::UNSPECIFIED,
        )
        .expect_err("33+ byte SSID must not fit");
        assert_eq!(error, FieldTooLong(ConfigField::Ssid));
    }
}
