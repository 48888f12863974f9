//! Host-side error type.

use std::io;
use std::path::PathBuf;

use csi_node_core::config::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("failed to {action} {path}")]
    FlashImage {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind UDP socket on {address}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("socket operation failed: {context}")]
    Socket {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to write collected records")]
    Output {
        #[source]
        source: io::Error,
    },

    #[error("configuration store failed: {0}")]
    Store(StoreError),

    #[error("worker thread `{0}` panicked")]
    WorkerPanicked(&'static str),
}

impl From<StoreError> for EmulatorError {
    fn from(error: StoreError) -> Self {
        EmulatorError::Store(error)
    }
}

impl EmulatorError {
    pub(crate) fn socket(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| EmulatorError::Socket { context, source }
    }
}
