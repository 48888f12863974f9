//! Station link supervision.
//!
//! [`LinkController`] turns radio events into actions for the runtime. It
//! re-associates immediately after every disconnection and, once
//! [`FAILURE_RESET_THRESHOLD`] disconnections have happened without an
//! intervening association, asks for a factory reset exactly once.

use core::net::Ipv4Addr;

use crate::config::{AuthType, DeviceConfiguration};

/// Consecutive disconnections tolerated before the stored configuration is erased.
pub const FAILURE_RESET_THRESHOLD: u32 = 15;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Radio and network events fed to the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkEvent {
    /// The station interface is up and may associate.
    Started,
    /// Association with the access point succeeded.
    Associated,
    /// The network stack obtained an address.
    AddressAcquired(Ipv4Addr),
    /// The link dropped or an association attempt failed.
    Disconnected,
}

/// What the runtime must do in response to an event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkAction {
    None,
    /// Begin (or retry) association with the configured credentials.
    Associate,
    /// Publish the ready signal with the acquired address.
    SignalReady(Ipv4Addr),
    /// Stop the radio, erase the store and restart.
    FactoryReset,
}

/// Credentials handed to the radio for association.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CredentialStrategy<'a> {
    Open {
        ssid: &'a str,
    },
    PreSharedKey {
        ssid: &'a str,
        password: &'a str,
    },
    Enterprise {
        ssid: &'a str,
        identity: &'a str,
        username: &'a str,
        password: &'a str,
    },
}

impl CredentialStrategy<'_> {
    #[must_use]
    pub const fn ssid(&self) -> &str {
        match self {
            CredentialStrategy::Open { ssid }
            | CredentialStrategy::PreSharedKey { ssid, .. }
            | CredentialStrategy::Enterprise { ssid, .. } => ssid,
        }
    }
}

/// Selects the association credentials for `config.auth`.
///
/// Enterprise networks use the identity as both the outer identity and the
/// inner username.
#[must_use]
pub fn credential_strategy(config: &DeviceConfiguration) -> CredentialStrategy<'_> {
    match config.auth {
        AuthType::Open => CredentialStrategy::Open {
            ssid: config.ssid.as_str(),
        },
        AuthType::Personal => CredentialStrategy::PreSharedKey {
            ssid: config.ssid.as_str(),
            password: config.password.as_str(),
        },
        AuthType::Enterprise => CredentialStrategy::Enterprise {
            ssid: config.ssid.as_str(),
            identity: config.identity.as_str(),
            username: config.identity.as_str(),
            password: config.password.as_str(),
        },
    }
}

/// Link state machine. Never persisted; rebuilt on every boot.
#[derive(Debug)]
pub struct LinkController {
    state: LinkState,
    consecutive_failures: u32,
    threshold: u32,
    ready: Option<Ipv4Addr>,
    reset_requested: bool,
}

impl Default for LinkController {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkController {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_threshold(FAILURE_RESET_THRESHOLD)
    }

    #[must_use]
    pub const fn with_threshold(threshold: u32) -> Self {
        Self {
            state: LinkState::Disconnected,
            consecutive_failures: 0,
            threshold,
            ready: None,
            reset_requested: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Address published by the first [`LinkAction::SignalReady`], if any.
    #[must_use]
    pub const fn ready(&self) -> Option<Ipv4Addr> {
        self.ready
    }

    #[must_use]
    pub const fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    pub fn handle(&mut self, event: LinkEvent) -> LinkAction {
        if self.reset_requested {
            return LinkAction::None;
        }

        match event {
            LinkEvent::Started => {
                self.state = LinkState::Connecting;
                LinkAction::Associate
            }
            LinkEvent::Associated => {
                self.state = LinkState::Connected;
                self.consecutive_failures = 0;
                LinkAction::None
            }
            LinkEvent::AddressAcquired(address) => {
                if self.ready.is_some() {
                    return LinkAction::None;
                }
                self.ready = Some(address);
                LinkAction::SignalReady(address)
            }
            LinkEvent::Disconnected => {
                self.state = LinkState::Disconnected;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.threshold {
                    self.reset_requested = true;
                    return LinkAction::FactoryReset;
                }
                self.state = LinkState::Connecting;
                LinkAction::Associate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorEndpoint;

    #[test]
    fn strategy_matches_auth_type() {
        let endpoint = CollectorEndpoint::UNSPECIFIED;
        let open = DeviceConfiguration::new(AuthType::Open, "Cafe", "", "", endpoint).unwrap();
        assert_eq!(
            credential_strategy(&open),
            CredentialStrategy::Open { ssid: "Cafe" }
        );

        let psk = DeviceConfiguration::new(AuthType::Personal, "Home", "pw", "", endpoint).unwrap();
        assert_eq!(
            credential_strategy(&psk),
            CredentialStrategy::PreSharedKey {
                ssid: "Home",
                password: "pw"
            }
        );

        let peap =
            DeviceConfiguration::new(AuthType::Enterprise, "Corp", "secret", "alice", endpoint)
                .unwrap();
        assert_eq!(
            credential_strategy(&peap),
            CredentialStrategy::Enterprise {
                ssid: "Corp",
                identity: "alice",
                username: "alice",
                password: "secret"
            }
        );
    }

    #[test]
    fn ready_is_signalled_once() {
        let mut link = LinkController::new();
        let address = Ipv4Addr::new(10, 0, 0, 7);
        assert_eq!(link.handle(LinkEvent::Started), LinkAction::Associate);
        assert_eq!(link.handle(LinkEvent::Associated), LinkAction::None);
        assert_eq!(
            link.handle(LinkEvent::AddressAcquired(address)),
            LinkAction::SignalReady(address)
        );
        assert_eq!(
            link.handle(LinkEvent::AddressAcquired(address)),
            LinkAction::None
        );
        assert_eq!(link.ready(), Some(address));
        assert_eq!(link.state(), LinkState::Connected);
    }
}
