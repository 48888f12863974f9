//! UDP plumbing for the emulated node and the collector.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use csi_node_core::config::CollectorEndpoint;

use crate::error::EmulatorError;

/// Binds a UDP socket, tagging failures with the address.
///
/// # Errors
///
/// Returns [`EmulatorError::Bind`] if the address is unavailable.
pub fn bind(address: SocketAddrV4) -> Result<UdpSocket, EmulatorError> {
    UdpSocket::bind(address).map_err(|source| EmulatorError::Bind {
        address: address.to_string(),
        source,
    })
}

/// Binds an ephemeral socket allowed to send broadcasts.
///
/// # Errors
///
/// Returns an error if binding or enabling broadcast fails.
pub fn broadcaster(interface: Ipv4Addr) -> Result<UdpSocket, EmulatorError> {
    let socket = bind(SocketAddrV4::new(interface, 0))?;
    socket
        .set_broadcast(true)
        .map_err(EmulatorError::socket("enable broadcast"))?;
    Ok(socket)
}

/// Opens a connected socket towards the collector. Used as the export opener.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn open_export(endpoint: CollectorEndpoint) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(endpoint.socket_addr())?;
    Ok(socket)
}

/// Receives one datagram, treating a read timeout as `None`.
///
/// # Errors
///
/// Returns any error other than a timeout.
pub fn recv_within(
    socket: &UdpSocket,
    buffer: &mut [u8],
) -> io::Result<Option<(usize, SocketAddr)>> {
    match socket.recv_from(buffer) {
        Ok(received) => Ok(Some(received)),
        Err(error) if is_timeout(&error) => Ok(None),
        Err(error) => Err(error),
    }
}

/// Sets a read timeout, rounding zero up to the smallest accepted value.
///
/// # Errors
///
/// Returns [`EmulatorError::Socket`] if the option cannot be set.
pub fn set_poll_interval(socket: &UdpSocket, interval: Duration) -> Result<(), EmulatorError> {
    socket
        .set_read_timeout(Some(interval.max(Duration::from_millis(1))))
        .map_err(EmulatorError::socket("set read timeout"))
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_yields_none() {
        let socket = bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        set_poll_interval(&socket, Duration::ZERO).unwrap();
        let mut buffer = [0u8; 8];
        assert!(recv_within(&socket, &mut buffer).unwrap().is_none());
    }

    #[test]
    fn export_socket_reaches_the_collector() {
        let collector = bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let SocketAddr::V4(address) = collector.local_addr().unwrap() else {
            panic!("expected an IPv4 socket");
        };
        set_poll_interval(&collector, Duration::from_secs(2)).unwrap();

        let export = open_export(CollectorEndpoint::new(*address.ip(), address.port())).unwrap();
        export.send(b"CSI_DATA").unwrap();

        let mut buffer = [0u8; 16];
        let (len, _) = recv_within(&collector, &mut buffer).unwrap().unwrap();
        assert_eq!(&buffer[..len], b"CSI_DATA");
    }
}
