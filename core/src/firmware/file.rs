//! Firmware image on disk

use crate::crc::Stm32Crc32;
use crate::BlueStError;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareType {
    /// Raw flash image
    Bin,
    Unknown,
}

/// A firmware image loaded in memory with its size and CRC
#[derive(Clone)]
pub struct FirmwareFile {
    path: PathBuf,
    data: Arc<[u8]>,
    firmware_type: FirmwareType,
    crc: u32,
}

impl FirmwareFile {
    /// Load `path` and checksum it.
    ///
    /// The CRC covers the largest 4-byte-aligned prefix of the image; trailing
    /// bytes are still sent during the transfer.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlueStError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let file = Self::from_bytes(path, data)?;
        debug!(
            "Loaded firmware {} ({} bytes, crc {:#010x})",
            path.display(),
            file.size(),
            file.crc
        );
        Ok(file)
    }

    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<Self, BlueStError> {
        let path = path.into();
        if u32::try_from(data.len()).is_err() {
            return Err(BlueStError::InvalidLength(data.len()));
        }
        let aligned = data.len() - data.len() % 4;
        let crc = Stm32Crc32::checksum(&data[..aligned])?;
        let firmware_type = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("bin") => FirmwareType::Bin,
            _ => FirmwareType::Unknown,
        };

        Ok(Self {
            path,
            data: data.into(),
            firmware_type,
            crc,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image size in bytes
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn firmware_type(&self) -> FirmwareType {
        self.firmware_type
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Fresh reader positioned at the start of the image
    pub fn reader(&self) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(self.data.clone()))
    }
}

impl std::fmt::Debug for FirmwareFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareFile")
            .field("path", &self.path)
            .field("size", &self.size())
            .field("type", &self.firmware_type)
            .field("crc", &format_args!("{:#010x}", self.crc))
            .finish()
    }
}
