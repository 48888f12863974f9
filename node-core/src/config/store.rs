//! Durable storage for the provisioning record.
//!
//! [`FlashConfigStore`] keeps two record slots and always writes the slot that
//! does not hold the newest valid record. A commit only becomes visible once
//! its checksum verifies, so a write torn by power loss leaves the previous
//! generation in place.

use core::fmt;

use embedded_storage::{ReadStorage, Storage};

use super::DeviceConfiguration;
use super::record::{self, DecodedRecord, RECORD_LEN, RecordBody};

/// Distance between the two record slots. One flash sector each.
pub const SLOT_STRIDE: u32 = 4096;
/// Flash span a store occupies starting at its base offset.
pub const STORE_SPAN: u32 = SLOT_STRIDE * 2;

/// Persistent storage failures. Never retried by the store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The backing flash reported a read or write failure.
    Flash,
    /// A slot holds data that does not verify and no valid record exists.
    Corrupt,
    /// The record does not fit its slot, or the store does not fit the flash.
    Capacity,
    /// A committed write did not read back intact.
    Verify,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StoreError::Flash => "flash access failed",
            StoreError::Corrupt => "stored record is corrupt",
            StoreError::Capacity => "record exceeds storage capacity",
            StoreError::Verify => "write did not verify",
        };
        f.write_str(text)
    }
}

/// Outcome of [`ConfigStore::load`] when no configuration is returned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadError {
    /// Nothing was provisioned, the record was erased, or a required key is missing.
    NotFound,
    Store(StoreError),
}

impl From<StoreError> for LoadError {
    fn from(error: StoreError) -> Self {
        LoadError::Store(error)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NotFound => f.write_str("configuration absent"),
            LoadError::Store(error) => write!(f, "configuration unreadable: {error}"),
        }
    }
}

/// Durable map of the provisioning fields.
pub trait ConfigStore {
    /// Returns the committed configuration.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotFound`] when no complete record is committed, or
    /// [`LoadError::Store`] when the backing storage cannot be read.
    fn load(&mut self) -> Result<DeviceConfiguration, LoadError>;

    /// Commits `config`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the commit did not complete. The previously
    /// committed value is still what `load` returns.
    fn save(&mut self, config: &DeviceConfiguration) -> Result<(), StoreError>;

    /// Removes the committed configuration. Erasing an empty store succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the tombstone could not be committed.
    fn erase(&mut self) -> Result<(), StoreError>;
}

impl<S: ConfigStore + ?Sized> ConfigStore for &mut S {
    fn load(&mut self) -> Result<DeviceConfiguration, LoadError> {
        (**self).load()
    }

    fn save(&mut self, config: &DeviceConfiguration) -> Result<(), StoreError> {
        (**self).save(config)
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        (**self).erase()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Slot {
    A,
    B,
}

impl Slot {
    const fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// State of both slots as read from flash.
struct Scan {
    newest: Option<(Slot, DecodedRecord)>,
    corrupt: bool,
}

/// [`ConfigStore`] over any NOR-flash style `embedded-storage` backend.
pub struct FlashConfigStore<F> {
    flash: F,
    base: u32,
}

impl<F> FlashConfigStore<F>
where
    F: ReadStorage + Storage,
{
    /// Places the store at `base`, occupying [`STORE_SPAN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Capacity`] if the span does not fit the flash.
    pub fn new(flash: F, base: u32) -> Result<Self, StoreError> {
        let end = base.checked_add(STORE_SPAN).ok_or(StoreError::Capacity)?;
        let end = usize::try_from(end).map_err(|_| StoreError::Capacity)?;
        if end > flash.capacity() {
            return Err(StoreError::Capacity);
        }
        Ok(Self { flash, base })
    }

    /// Releases the backing flash.
    #[must_use]
    pub fn into_inner(self) -> F {
        self.flash
    }

    const fn offset(&self, slot: Slot) -> u32 {
        match slot {
            Slot::A => self.base,
            Slot::B => self.base + SLOT_STRIDE,
        }
    }

    fn read_slot(&mut self, slot: Slot) -> Result<[u8; RECORD_LEN], StoreError> {
        let mut buf = [0u8; RECORD_LEN];
        self.flash
            .read(self.offset(slot), &mut buf)
            .map_err(|_| StoreError::Flash)?;
        Ok(buf)
    }

    fn scan(&mut self) -> Result<Scan, StoreError> {
        let mut scan = Scan {
            newest: None,
            corrupt: false,
        };
        for slot in [Slot::A, Slot::B] {
            let buf = self.read_slot(slot)?;
            match record::decode(&buf) {
                Some(decoded) => {
                    let newer = scan
                        .newest
                        .as_ref()
                        .is_none_or(|(_, best)| generation_after(decoded.generation, best.generation));
                    if newer {
                        scan.newest = Some((slot, decoded));
                    }
                }
                None if buf.iter().all(|&byte| byte == 0xFF) => {}
                None => scan.corrupt = true,
            }
        }
        Ok(scan)
    }

    fn commit(&mut self, config: Option<&DeviceConfiguration>) -> Result<(), StoreError> {
        let scan = self.scan()?;
        let (target, generation) = match &scan.newest {
            Some((slot, current)) => (slot.other(), current.generation.wrapping_add(1)),
            None => (Slot::A, 1),
        };

        let mut buf = [0u8; RECORD_LEN];
        record::encode(generation, config, &mut buf)?;
        self.flash
            .write(self.offset(target), &buf)
            .map_err(|_| StoreError::Flash)?;

        let readback = self.read_slot(target)?;
        if readback != buf {
            return Err(StoreError::Verify);
        }
        Ok(())
    }
}

impl<F> ConfigStore for FlashConfigStore<F>
where
    F: ReadStorage + Storage,
{
    fn load(&mut self) -> Result<DeviceConfiguration, LoadError> {
        let scan = self.scan()?;
        match scan.newest {
            Some((_, DecodedRecord { body: RecordBody::Config(config), .. })) => Ok(config),
            Some(_) => Err(LoadError::NotFound),
            None if scan.corrupt => Err(LoadError::Store(StoreError::Corrupt)),
            None => Err(LoadError::NotFound),
        }
    }

    fn save(&mut self, config: &DeviceConfiguration) -> Result<(), StoreError> {
        self.commit(Some(config))
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        let scan = self.scan()?;
        match scan.newest {
            Some((_, DecodedRecord { body: RecordBody::Erased, .. })) => Ok(()),
            None if !scan.corrupt => Ok(()),
            _ => self.commit(None),
        }
    }
}

/// Serial-number comparison so the generation counter may wrap.
fn generation_after(candidate: u32, current: u32) -> bool {
    let distance = candidate.wrapping_sub(current);
    distance != 0 && distance < u32::MAX / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthType, CollectorEndpoint};
    use core::net::Ipv4Addr;

    struct RamFlash {
        bytes: [u8; STORE_SPAN as usize],
    }

    impl RamFlash {
        fn blank() -> Self {
            Self {
                bytes: [0xFF; STORE_SPAN as usize],
            }
        }
    }

    impl ReadStorage for RamFlash {
        type Error = ();

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), ()> {
            let start = offset as usize;
            bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for RamFlash {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ()> {
            let start = offset as usize;
            self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    fn config(port: u16) -> DeviceConfiguration {
        DeviceConfiguration::new(
            AuthType::Personal,
            "MySSID",
            "MyPass",
            "",
            CollectorEndpoint::new(Ipv4Addr::new(10, 0, 0, 5), port),
        )
        .unwrap()
    }

    #[test]
    fn blank_flash_is_not_found() {
        let mut store = FlashConfigStore::new(RamFlash::blank(), 0).unwrap();
        assert_eq!(store.load(), Err(LoadError::NotFound));
    }

    #[test]
    fn saves_alternate_slots_and_newest_wins() {
        let mut store = FlashConfigStore::new(RamFlash::blank(), 0).unwrap();
        store.save(&config(1)).unwrap();
        store.save(&config(2)).unwrap();
        store.save(&config(3)).unwrap();
        assert_eq!(store.load().unwrap().collector.port, 3);

        let flash = store.into_inner();
        let a = record::decode(&flash.bytes[..RECORD_LEN]).unwrap();
        let b = record::decode(&flash.bytes[SLOT_STRIDE as usize..]).unwrap();
        assert_eq!((a.generation, b.generation), (3, 2));
    }

    #[test]
    fn corrupt_only_slot_is_reported() {
        let mut flash = RamFlash::blank();
        flash.bytes[..8].copy_from_slice(b"garbage!");
        let mut store = FlashConfigStore::new(flash, 0).unwrap();
        assert_eq!(store.load(), Err(LoadError::Store(StoreError::Corrupt)));

        store.erase().unwrap();
        assert_eq!(store.load(), Err(LoadError::NotFound));
    }

    #[test]
    fn store_must_fit_flash() {
        let result = FlashConfigStore::new(RamFlash::blank(), 1);
        assert!(matches!(result, Err(StoreError::Capacity)));
    }

    #[test]
    fn generation_comparison_wraps() {
        assert!(generation_after(1, 0));
        assert!(generation_after(0, u32::MAX));
        assert!(!generation_after(5, 5));
        assert!(!generation_after(4, 5));
    }
}
