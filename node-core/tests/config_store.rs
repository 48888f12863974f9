mod common;

use common::{FaultyFlash, personal};
use csi_node_core::boot::{BootPlan, ProvisioningReason, plan_boot};
use csi_node_core::config::{ConfigStore, FlashConfigStore, LoadError, StoreError};
use csi_node_core::provisioning::{ListenerState, ProvisioningListener, ProvisioningOutcome};

#[test]
fn torn_write_leaves_previous_configuration_loadable() {
    let mut store = FlashConfigStore::new(FaultyFlash::blank(), 0).expect("store fits");
    store.save(&personal("First", 9000)).expect("first save");
    store.save(&personal("Second", 9001)).expect("second save");

    let mut flash = store.into_inner();
    flash.tear_next_write_after = Some(40);
    let mut store = FlashConfigStore::new(flash, 0).expect("store fits");

    assert_eq!(
        store.save(&personal("Third", 9002)),
        Err(StoreError::Flash)
    );
    let loaded = store.load().expect("previous generation survives");
    assert_eq!(loaded.ssid.as_str(), "Second");
    assert_eq!(loaded.collector.port, 9001);

    store.save(&personal("Third", 9002)).expect("retry by caller succeeds");
    assert_eq!(store.load().unwrap().ssid.as_str(), "Third");
}

#[test]
fn erase_then_load_is_not_found_from_any_state() {
    let mut blank = FlashConfigStore::new(FaultyFlash::blank(), 0).unwrap();
    blank.erase().expect("erasing an empty store succeeds");
    assert_eq!(blank.load(), Err(LoadError::NotFound));
    assert_eq!(blank.into_inner().writes, 0, "nothing to erase");

    let mut populated = FlashConfigStore::new(FaultyFlash::blank(), 0).unwrap();
    populated.save(&personal("Home", 9000)).unwrap();
    populated.erase().unwrap();
    assert_eq!(populated.load(), Err(LoadError::NotFound));
    populated.erase().expect("erase is idempotent");
    assert_eq!(populated.load(), Err(LoadError::NotFound));

    populated.save(&personal("Again", 9000)).unwrap();
    assert_eq!(populated.load().unwrap().ssid.as_str(), "Again");
}

#[test]
fn unreadable_flash_boots_into_provisioning() {
    let mut flash = FaultyFlash::blank();
    flash.fail_reads = true;
    let mut store = FlashConfigStore::new(flash, 0).unwrap();

    assert_eq!(
        plan_boot(&mut store),
        BootPlan::Provisioning {
            reason: ProvisioningReason::Unreadable(StoreError::Flash)
        }
    );
}

#[test]
fn provisioning_commits_then_boot_finds_station_config() {
    let mut store = FlashConfigStore::new(FaultyFlash::blank(), 0).unwrap();
    assert_eq!(
        plan_boot(&mut store),
        BootPlan::Provisioning {
            reason: ProvisioningReason::Absent
        }
    );

    let mut listener = ProvisioningListener::new();
    let outcome = listener
        .accept(b"peap,CorpNet,alice,secret,10.0.0.5,9000\n", &mut store)
        .expect("first datagram is consumed");
    let ProvisioningOutcome::Committed(config) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(listener.state(), ListenerState::RestartPending);
    assert_eq!(
        listener.accept(b"open,Other", &mut store),
        None,
        "listener is one-shot"
    );

    // Restart: a fresh boot reads the committed record.
    let flash = store.into_inner();
    let mut store = FlashConfigStore::new(flash, 0).unwrap();
    assert_eq!(plan_boot(&mut store), BootPlan::Station(config));
}

#[test]
fn malformed_or_unsaved_provisioning_closes_listener() {
    let mut store = FlashConfigStore::new(FaultyFlash::blank(), 0).unwrap();
    let mut listener = ProvisioningListener::new();
    assert!(matches!(
        listener.accept(b"wpa2psk", &mut store),
        Some(ProvisioningOutcome::Rejected(_))
    ));
    assert_eq!(listener.state(), ListenerState::Closed);
    assert_eq!(store.load(), Err(LoadError::NotFound));

    let mut flash = FaultyFlash::blank();
    flash.tear_next_write_after = Some(0);
    let mut store = FlashConfigStore::new(flash, 0).unwrap();
    let mut listener = ProvisioningListener::new();
    assert_eq!(
        listener.accept(b"open,Cafe", &mut store),
        Some(ProvisioningOutcome::StoreFailed(StoreError::Flash))
    );
    assert_eq!(listener.state(), ListenerState::Closed);
}
