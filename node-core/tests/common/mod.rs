#![allow(dead_code)]

use core::net::Ipv4Addr;
use core::ops::Add;
use core::time::Duration;

use csi_node_core::config::store::STORE_SPAN;
use csi_node_core::config::{AuthType, CollectorEndpoint, DeviceConfiguration};
use embedded_storage::{ReadStorage, Storage};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockInstant(u64);

impl MockInstant {
    pub fn millis(value: u64) -> Self {
        Self(value)
    }

    pub fn secs(value: u64) -> Self {
        Self(value * 1000)
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.as_millis() as u64)
    }
}

/// In-memory NOR flash that can be told to tear the next write.
pub struct FaultyFlash {
    pub bytes: Vec<u8>,
    /// When set, the next write stores only this many bytes and then fails.
    pub tear_next_write_after: Option<usize>,
    pub fail_reads: bool,
    pub writes: usize,
}

impl FaultyFlash {
    pub fn blank() -> Self {
        Self {
            bytes: vec![0xFF; STORE_SPAN as usize],
            tear_next_write_after: None,
            fail_reads: false,
            writes: 0,
        }
    }
}

#[derive(Debug)]
pub struct FlashFault;

impl ReadStorage for FaultyFlash {
    type Error = FlashFault;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), FlashFault> {
        if self.fail_reads {
            return Err(FlashFault);
        }
        let start = offset as usize;
        bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for FaultyFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), FlashFault> {
        self.writes += 1;
        let start = offset as usize;
        if let Some(limit) = self.tear_next_write_after.take() {
            self.bytes[start..start + limit].copy_from_slice(&bytes[..limit]);
            return Err(FlashFault);
        }
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

pub fn personal(ssid: &str, port: u16) -> DeviceConfiguration {
    DeviceConfiguration::new(
        AuthType::Personal,
        ssid,
        "MyPass",
        "",
        CollectorEndpoint::new(Ipv4Addr::new(10, 0, 0, 5), port),
    )
    .expect("fixture fits")
}
