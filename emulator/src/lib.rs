//! Host emulator for the CSI sensing node.
//!
//! Runs the node's boot cycle against a file-backed flash image, a simulated
//! radio and real UDP sockets, and provides the collector side of the
//! protocol for driving it.

pub mod collector;
pub mod error;
pub mod flash;
pub mod net;
pub mod node;
pub mod radio;

pub use error::EmulatorError;
pub use node::{CycleOutcome, EmulatedNode, NodeOptions};
