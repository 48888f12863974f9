//! DHCP server for clients of the provisioning access point.

use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use csi_node_core::provisioning::{
    PROVISIONING_AP_ADDRESS, PROVISIONING_LEASES, provisioning_lease_range,
};
use edge_dhcp::io::{self, DEFAULT_SERVER_PORT};
use edge_dhcp::server::{Server, ServerOptions};
use edge_nal::UdpBind;
use edge_nal_embassy::{Udp, UdpBuffers};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};

const RETRY_DELAY: Duration = Duration::from_millis(500);

#[embassy_executor::task]
pub async fn run(stack: Stack<'static>) {
    stack.wait_config_up().await;

    let buffers = UdpBuffers::<2, 1024, 1024, 4>::new();
    let udp = Udp::new(stack, &buffers);
    let mut socket = match udp
        .bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            DEFAULT_SERVER_PORT,
        )))
        .await
    {
        Ok(socket) => socket,
        Err(error) => {
            defmt::error!("dhcp: bind failed error={}", defmt::Debug2Format(&error));
            return;
        }
    };

    let (first, last) = provisioning_lease_range();
    let mut server = Server::<_, PROVISIONING_LEASES>::new_with_et(PROVISIONING_AP_ADDRESS);
    server.range_start = first;
    server.range_end = last;
    defmt::info!(
        "dhcp: leasing {}..={}",
        defmt::Display2Format(&first),
        defmt::Display2Format(&last)
    );

    let mut gateway = [Ipv4Addr::UNSPECIFIED];
    let mut buffer = [0u8; 1500];
    loop {
        let options = ServerOptions::new(PROVISIONING_AP_ADDRESS, Some(&mut gateway));
        if let Err(error) = io::server::run(&mut server, &options, &mut socket, &mut buffer).await
        {
            defmt::warn!("dhcp: server error={}", defmt::Debug2Format(&error));
        }
        Timer::after(RETRY_DELAY).await;
    }
}
