use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::{ReadStorage, Storage};
use envnode_core::config::{CONFIG_PATH, DRD_FLAG_PATH};
use envnode_core::peripherals::{Filesystem, FsError};
use esp_storage::FlashStorage;
use log::{debug, error};

use crate::config::{STORAGE_OFFSET, STORAGE_SECTORS};

const SECTOR_SIZE: u32 = 4096;
const MAGIC: u32 = 0x454e_5631; // "ENV1"
const HEADER_LEN: usize = 12;
const MAX_FILE_LEN: usize = SECTOR_SIZE as usize - HEADER_LEN;

/// Every file lives in its own sector of the data partition.
const FILES: [&str; 2] = [CONFIG_PATH, DRD_FLAG_PATH];

/// Fixed-slot file store on the `envnode` flash partition.
///
/// Sector layout: magic, payload length, payload checksum (all little
/// endian u32), then the payload. Erased flash reads as a missing file.
pub struct FlashFs<'d> {
    flash: FlashStorage<'d>,
}

impl<'d> FlashFs<'d> {
    pub fn new(flash: FlashStorage<'d>) -> Self {
        Self { flash }
    }

    fn sector_of(path: &str) -> Result<u32, FsError> {
        let index = FILES
            .iter()
            .position(|known| *known == path)
            .ok_or(FsError::NotFound)? as u32;
        debug_assert!(index < STORAGE_SECTORS);
        Ok(STORAGE_OFFSET + index * SECTOR_SIZE)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |sum, byte| sum.rotate_left(5) ^ u32::from(*byte))
}

fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Filesystem for FlashFs<'_> {
    fn read(&mut self, path: &str) -> Result<Vec<u8>, FsError> {
        let offset = Self::sector_of(path)?;

        let mut header = [0u8; HEADER_LEN];
        self.flash.read(offset, &mut header).map_err(|e| {
            error!("Flash read failed at {:#x}: {:?}", offset, e);
            FsError::Io
        })?;

        if word(&header, 0) != MAGIC {
            return Err(FsError::NotFound);
        }
        let len = word(&header, 4) as usize;
        if len > MAX_FILE_LEN {
            return Err(FsError::Corrupt);
        }

        let mut payload = vec![0u8; len];
        self.flash
            .read(offset + HEADER_LEN as u32, &mut payload)
            .map_err(|e| {
                error!("Flash read failed at {:#x}: {:?}", offset, e);
                FsError::Io
            })?;

        if checksum(&payload) != word(&header, 8) {
            return Err(FsError::Corrupt);
        }
        debug!("Read {} bytes from {}", len, path);
        Ok(payload)
    }

    fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), FsError> {
        let offset = Self::sector_of(path).map_err(|_| FsError::Io)?;
        if bytes.len() > MAX_FILE_LEN {
            return Err(FsError::Io);
        }

        let mut image = Vec::with_capacity(HEADER_LEN + bytes.len());
        image.extend_from_slice(&MAGIC.to_le_bytes());
        image.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        image.extend_from_slice(&checksum(bytes).to_le_bytes());
        image.extend_from_slice(bytes);

        // `Storage::write` erases and rewrites the touched sector.
        self.flash.write(offset, &image).map_err(|e| {
            error!("Flash write failed at {:#x}: {:?}", offset, e);
            FsError::Io
        })?;
        debug!("Wrote {} bytes to {}", bytes.len(), path);
        Ok(())
    }
}
