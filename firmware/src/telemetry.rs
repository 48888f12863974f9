//! Firmware sink for node lifecycle events.
//!
//! Every event is logged over defmt and kept in a small ring so a debugger
//! can inspect the recent history after a fault.

use core::cell::RefCell;

use csi_node_core::telemetry::{NodeEvent, TelemetryRecorder};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::clock::NodeInstant;

const FIRMWARE_RING_CAPACITY: usize = 32;

static RECORDER: Mutex<
    CriticalSectionRawMutex,
    RefCell<TelemetryRecorder<NodeInstant, FIRMWARE_RING_CAPACITY>>,
> = Mutex::new(RefCell::new(TelemetryRecorder::new()));

pub fn emit(event: NodeEvent) {
    if event.is_warning() {
        defmt::warn!("node: {}", event);
    } else {
        defmt::info!("node: {}", event);
    }
    RECORDER.lock(|recorder| {
        recorder.borrow_mut().record(event, NodeInstant::now());
    });
}
