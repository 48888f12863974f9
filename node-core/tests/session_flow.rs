mod common;

use core::time::Duration;

use common::MockInstant;
use csi_node_core::boot::DEFAULT_TIMINGS;
use csi_node_core::session::{SessionAction, SessionPhase, SessionScheduler};

fn linked_scheduler() -> SessionScheduler<MockInstant> {
    let mut scheduler = SessionScheduler::new(DEFAULT_TIMINGS);
    assert_eq!(scheduler.start(), Some(SessionAction::ConnectLink));
    assert_eq!(scheduler.start(), None);
    assert_eq!(
        scheduler.on_ready(MockInstant::secs(0)),
        Some(SessionAction::BeginCommandWindow {
            deadline: MockInstant::secs(10)
        })
    );
    scheduler
}

#[test]
fn start_command_inside_window_begins_acquisition() {
    let mut scheduler = linked_scheduler();
    for second in 1..3 {
        assert_eq!(scheduler.on_tick(MockInstant::secs(second)), None);
    }

    let action = scheduler.on_datagram(MockInstant::secs(3), b"start,30");
    assert_eq!(
        action,
        Some(SessionAction::StartAcquisition {
            seconds: 30,
            until: MockInstant::secs(33)
        })
    );

    assert_eq!(
        scheduler.on_datagram(MockInstant::secs(4), b"start,99"),
        None,
        "window closes after the first command"
    );
    assert_eq!(scheduler.on_tick(MockInstant::secs(32)), None);
    assert_eq!(
        scheduler.on_tick(MockInstant::secs(33)),
        Some(SessionAction::Suspend {
            interval: Duration::from_secs(5)
        })
    );
    assert_eq!(scheduler.phase(), SessionPhase::Suspended);
}

#[test]
fn silent_window_suspends_at_deadline() {
    let mut scheduler = linked_scheduler();
    for second in 1..10 {
        assert_eq!(scheduler.on_tick(MockInstant::secs(second)), None);
    }
    assert_eq!(
        scheduler.on_tick(MockInstant::secs(10)),
        Some(SessionAction::Suspend {
            interval: Duration::from_secs(5)
        })
    );
}

#[test]
fn stray_datagrams_keep_the_window_open() {
    let mut scheduler = linked_scheduler();
    assert_eq!(scheduler.on_datagram(MockInstant::secs(1), b"hello"), None);
    assert_eq!(scheduler.on_datagram(MockInstant::secs(2), b"CSI_IP,1.2.3.4"), None);
    assert!(matches!(
        scheduler.phase(),
        SessionPhase::AwaitingCommand(_)
    ));

    assert_eq!(
        scheduler.on_datagram(MockInstant::millis(9_500), b"start,5"),
        Some(SessionAction::StartAcquisition {
            seconds: 5,
            until: MockInstant::millis(14_500)
        })
    );
}

#[test]
fn non_numeric_duration_goes_straight_to_suspend() {
    let mut scheduler = linked_scheduler();
    assert_eq!(
        scheduler.on_datagram(MockInstant::secs(2), b"start,abc"),
        Some(SessionAction::Suspend {
            interval: Duration::from_secs(5)
        })
    );
    assert_eq!(scheduler.on_tick(MockInstant::secs(20)), None);
}

#[test]
fn events_before_link_ready_are_ignored() {
    let mut scheduler = SessionScheduler::<MockInstant>::new(DEFAULT_TIMINGS);
    assert_eq!(scheduler.on_ready(MockInstant::secs(0)), None);
    scheduler.start();
    assert_eq!(scheduler.on_datagram(MockInstant::secs(0), b"start,5"), None);
    assert_eq!(scheduler.on_tick(MockInstant::secs(100)), None);
    assert_eq!(scheduler.phase(), SessionPhase::AwaitingLink);
}
