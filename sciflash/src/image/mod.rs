//! Memory images: flash and EEPROM contents loaded for writing, and dump
//! files produced while reading.

pub mod dump;

use crate::error::{Error, Result};
use crate::target::flash::{FlashChip, SIZE_128K, SIZE_256K};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub use dump::DumpFile;

/// EEPROM size in bytes.
pub const EEPROM_SIZE: u32 = 0x200;

fn read_all(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}

/// Sum of all bytes, modulo 2^32.
///
/// Matches the figure ECU calibration tools print for a ROM, which makes it
/// handy for comparing a dump with its source image.
pub fn sum32(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

/// A flash image to be written.
#[derive(Clone)]
pub struct FlashImage {
    data: Vec<u8>,
}

impl FlashImage {
    /// Load a flash image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading flash image from: {}", path.display());
        Self::from_bytes(read_all(path)?)
    }

    /// Wrap raw flash contents.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        match u32::try_from(data.len()) {
            Ok(SIZE_128K | SIZE_256K) => Ok(Self { data }),
            _ => Err(Error::InvalidImage(format!(
                "flash image must be {SIZE_128K} or {SIZE_256K} bytes, got {}",
                data.len()
            ))),
        }
    }

    /// Image size in bytes.
    #[allow(clippy::cast_possible_truncation)] // checked in from_bytes
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    /// Always false; images are validated on construction.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the image exactly fills a chip.
    pub fn fits(&self, chip: FlashChip) -> bool {
        self.len() == chip.size()
    }

    /// Bytes `[offset, offset + len)`, clipped to the image.
    pub fn block(&self, offset: u32, len: u16) -> &[u8] {
        let start = (offset as usize).min(self.data.len());
        let end = (start + usize::from(len)).min(self.data.len());
        &self.data[start..end]
    }

    /// Chips this image could be written to.
    pub fn candidate_chips(&self) -> Vec<FlashChip> {
        FlashChip::ALL
            .into_iter()
            .filter(|chip| self.fits(*chip))
            .collect()
    }
}

impl std::fmt::Debug for FlashImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashImage")
            .field("len", &self.data.len())
            .finish()
    }
}

/// An EEPROM image to be written.
#[derive(Clone)]
pub struct EepromImage {
    data: Vec<u8>,
}

impl EepromImage {
    /// Load an EEPROM image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading EEPROM image from: {}", path.display());
        Self::from_bytes(read_all(path)?)
    }

    /// Wrap raw EEPROM contents.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() != EEPROM_SIZE as usize {
            return Err(Error::InvalidImage(format!(
                "EEPROM image must be {EEPROM_SIZE} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    /// Raw contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes `[offset, offset + len)`, clipped to the image.
    pub fn block(&self, offset: u32, len: u16) -> &[u8] {
        let start = (offset as usize).min(self.data.len());
        let end = (start + usize::from(len)).min(self.data.len());
        &self.data[start..end]
    }
}

impl std::fmt::Debug for EepromImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EepromImage")
            .field("len", &self.data.len())
            .finish()
    }
}
