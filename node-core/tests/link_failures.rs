use core::net::Ipv4Addr;

use csi_node_core::link::{
    FAILURE_RESET_THRESHOLD, LinkAction, LinkController, LinkEvent, LinkState,
};

#[test]
fn fifteenth_consecutive_disconnect_requests_reset_once() {
    let mut link = LinkController::new();
    assert_eq!(link.handle(LinkEvent::Started), LinkAction::Associate);

    for failure in 1..FAILURE_RESET_THRESHOLD {
        assert_eq!(
            link.handle(LinkEvent::Disconnected),
            LinkAction::Associate,
            "disconnect {failure} should re-associate immediately"
        );
        assert_eq!(link.consecutive_failures(), failure);
        assert_eq!(link.state(), LinkState::Connecting);
    }

    assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::FactoryReset);
    assert!(link.reset_requested());
    assert_eq!(link.state(), LinkState::Disconnected);

    for _ in 0..5 {
        assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::None);
    }
    assert_eq!(link.handle(LinkEvent::Associated), LinkAction::None);
}

#[test]
fn association_resets_the_failure_counter() {
    let mut link = LinkController::new();
    link.handle(LinkEvent::Started);

    for _ in 0..FAILURE_RESET_THRESHOLD - 1 {
        link.handle(LinkEvent::Disconnected);
    }
    assert_eq!(link.handle(LinkEvent::Associated), LinkAction::None);
    assert_eq!(link.consecutive_failures(), 0);
    assert_eq!(link.state(), LinkState::Connected);

    for _ in 0..FAILURE_RESET_THRESHOLD - 1 {
        assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::Associate);
    }
    assert!(!link.reset_requested());
}

#[test]
fn ready_survives_later_disconnects() {
    let mut link = LinkController::new();
    let address = Ipv4Addr::new(192, 168, 1, 50);
    link.handle(LinkEvent::Started);
    link.handle(LinkEvent::Associated);
    assert_eq!(
        link.handle(LinkEvent::AddressAcquired(address)),
        LinkAction::SignalReady(address)
    );

    assert_eq!(link.handle(LinkEvent::Disconnected), LinkAction::Associate);
    link.handle(LinkEvent::Associated);
    assert_eq!(
        link.handle(LinkEvent::AddressAcquired(address)),
        LinkAction::None,
        "ready is set once per boot"
    );
    assert_eq!(link.ready(), Some(address));
}
