#![no_std]

// Shared logic for the CSI sensing node.
//
// This crate stays portable across the ESP32 firmware and the host emulator by
// avoiding the Rust standard library. Everything here is a plain state machine,
// codec, or storage adapter; the runtimes own sockets, timers, and the radio.

pub mod boot;
pub mod config;
pub mod discovery;
pub mod export;
pub mod link;
pub mod probe;
pub mod provisioning;
pub mod reset;
pub mod session;
pub mod telemetry;

mod wire;
