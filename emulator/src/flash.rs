//! File-backed flash image.
//!
//! The image survives emulator restarts the way the configuration partition
//! survives deep sleep. Fresh images are filled with `0xFF` like erased NOR.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use csi_node_core::config::store::STORE_SPAN;
use embedded_storage::{ReadStorage, Storage};

use crate::error::EmulatorError;

const ERASED: u8 = 0xFF;

/// Flash image size: exactly one configuration store.
pub const IMAGE_LEN: u64 = STORE_SPAN as u64;

#[derive(Debug)]
pub struct FileFlash {
    file: File,
    path: PathBuf,
}

impl FileFlash {
    /// Opens `path`, creating an erased image if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EmulatorError::FlashImage`] if the image cannot be opened or
    /// padded to full size.
    pub fn open(path: &Path) -> Result<Self, EmulatorError> {
        let image_error = |action: &'static str| {
            move |source: io::Error| EmulatorError::FlashImage {
                action,
                path: path.to_path_buf(),
                source,
            }
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(image_error("open"))?;

        let len = file.metadata().map_err(image_error("inspect"))?.len();
        if len < IMAGE_LEN {
            file.seek(SeekFrom::Start(len)).map_err(image_error("extend"))?;
            let padding = vec![ERASED; usize::try_from(IMAGE_LEN - len).unwrap_or_default()];
            file.write_all(&padding).map_err(image_error("extend"))?;
            file.sync_all().map_err(image_error("sync"))?;
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_range(offset: u32, len: usize) -> io::Result<()> {
        let end = u64::from(offset) + len as u64;
        if end > IMAGE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "access beyond flash image",
            ));
        }
        Ok(())
    }
}

impl ReadStorage for FileFlash {
    type Error = io::Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        Self::check_range(offset, bytes.len())?;
        self.file.seek(SeekFrom::Start(u64::from(offset)))?;
        self.file.read_exact(bytes)
    }

    fn capacity(&self) -> usize {
        STORE_SPAN as usize
    }
}

impl Storage for FileFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        Self::check_range(offset, bytes.len())?;
        self.file.seek(SeekFrom::Start(u64::from(offset)))?;
        self.file.write_all(bytes)?;
        self.file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csi_node_core::config::{
        AuthType, CollectorEndpoint, ConfigStore, DeviceConfiguration, FlashConfigStore,
        LoadError,
    };
    use std::net::Ipv4Addr;

    #[test]
    fn image_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.flash");

        let config = DeviceConfiguration::new(
            AuthType::Open,
            "Cafe",
            "",
            "",
            CollectorEndpoint::new(Ipv4Addr::LOCALHOST, 50_001),
        )
        .unwrap();

        let mut store = FlashConfigStore::new(FileFlash::open(&path).unwrap(), 0).unwrap();
        assert_eq!(store.load(), Err(LoadError::NotFound));
        store.save(&config).unwrap();
        drop(store);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), IMAGE_LEN);
        let mut reopened = FlashConfigStore::new(FileFlash::open(&path).unwrap(), 0).unwrap();
        assert_eq!(reopened.load(), Ok(config));
    }

    #[test]
    fn rejects_out_of_range_access() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FileFlash::open(&dir.path().join("small.flash")).unwrap();
        let mut buf = [0u8; 4];
        assert!(flash.read(STORE_SPAN - 2, &mut buf).is_err());
    }
}
