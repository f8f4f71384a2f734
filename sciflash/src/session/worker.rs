//! Worker functions: code fragments uploaded into ECU RAM.
//!
//! A worker function goes through upload, start and (for resident workers)
//! exit. Resident workers keep serving block requests after their start
//! reply until they are explicitly exited; one-shot workers do their job,
//! report it in the start reply and hand control back to the bootloader.

use std::fmt;

/// Remote code fragment identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum WorkerFunction {
    /// Nothing selected.
    #[default]
    Empty = 0x00,
    /// Read the controller part number.
    PartNumberRead = 0x01,
    /// Read flash manufacturer and device ids.
    FlashID = 0x02,
    /// Serve flash block reads.
    FlashRead = 0x03,
    /// Erase flash.
    FlashErase = 0x04,
    /// Serve flash block writes.
    FlashWrite = 0x05,
    /// Verify flash checksum.
    VerifyFlashChecksum = 0x06,
    /// Serve EEPROM block reads.
    EEPROMRead = 0x07,
    /// Serve EEPROM block writes.
    EEPROMWrite = 0x08,
}

impl WorkerFunction {
    /// Wire id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Stays running across requests until exited.
    pub fn is_resident(self) -> bool {
        matches!(
            self,
            Self::FlashRead | Self::FlashWrite | Self::EEPROMRead | Self::EEPROMWrite
        )
    }

    /// Starting it modifies non-volatile memory.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::FlashErase | Self::FlashWrite | Self::EEPROMWrite)
    }
}

impl fmt::Display for WorkerFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::PartNumberRead => "part number read",
            Self::FlashID => "flash ID",
            Self::FlashRead => "flash read",
            Self::FlashErase => "flash erase",
            Self::FlashWrite => "flash write",
            Self::VerifyFlashChecksum => "verify flash checksum",
            Self::EEPROMRead => "EEPROM read",
            Self::EEPROMWrite => "EEPROM write",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the worker function currently loaded in the ECU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStage {
    /// Upload acknowledged, not started yet.
    Uploaded,
    /// Start acknowledged; resident workers accept block requests.
    Running,
}

/// Worker function loaded in the ECU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWorker {
    /// Which function.
    pub function: WorkerFunction,
    /// How far it got.
    pub stage: WorkerStage,
}

impl ActiveWorker {
    /// A freshly uploaded worker.
    pub fn uploaded(function: WorkerFunction) -> Self {
        Self {
            function,
            stage: WorkerStage::Uploaded,
        }
    }

    /// Whether a resident worker is running and must be exited.
    pub fn needs_exit(&self) -> bool {
        self.function.is_resident() && self.stage == WorkerStage::Running
    }
}

fn is_revision_letter(byte: u8) -> bool {
    byte.is_ascii_uppercase()
}

/// Extract the part number from a `PartNumberRead` start reply.
///
/// The reply carries the number at byte 1, or at byte 21 when the first
/// slot is blank (0xFF). Four BCD-ish bytes print as hex and are followed by
/// a two-letter revision, or "99" when none is stored.
pub fn parse_part_number(sci: &[u8]) -> Option<String> {
    if sci.len() < 30 {
        return None;
    }

    let start = if sci[1] != 0xFF {
        1
    } else if sci[21] != 0xFF {
        21
    } else {
        return None;
    };

    let mut part: String = sci[start..start + 4]
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect();
    let revision = &sci[start + 4..start + 6];
    if revision.iter().all(|&b| is_revision_letter(b)) {
        part.extend(revision.iter().map(|&b| char::from(b)));
    } else {
        part.push_str("99");
    }
    Some(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with(offset: usize, number: [u8; 4], revision: [u8; 2]) -> Vec<u8> {
        let mut sci = vec![0xFF; 30];
        sci[0] = 0x21;
        sci[offset..offset + 4].copy_from_slice(&number);
        sci[offset + 4..offset + 6].copy_from_slice(&revision);
        sci
    }

    #[test]
    fn test_part_number_primary_slot() {
        let sci = reply_with(1, [0x56, 0x04, 0x42, 0x68], *b"AC");
        assert_eq!(parse_part_number(&sci).as_deref(), Some("56044268AC"));
    }

    #[test]
    fn test_part_number_fallback_slot_without_revision() {
        let sci = reply_with(21, [0x04, 0x60, 0x63, 0x59], [0x00, 0x41]);
        assert_eq!(parse_part_number(&sci).as_deref(), Some("0460635999"));
    }

    #[test]
    fn test_part_number_unknown() {
        assert_eq!(parse_part_number(&[0x21; 10]), None);
        assert_eq!(parse_part_number(&[0xFF; 30]), None);
    }

    #[test]
    fn test_resident_workers() {
        assert!(WorkerFunction::FlashRead.is_resident());
        assert!(!WorkerFunction::FlashErase.is_resident());
        assert!(WorkerFunction::FlashErase.is_destructive());
        assert!(!WorkerFunction::EEPROMRead.is_destructive());
        let running = ActiveWorker {
            function: WorkerFunction::EEPROMWrite,
            stage: WorkerStage::Running,
        };
        assert!(running.needs_exit());
        assert!(!ActiveWorker::uploaded(WorkerFunction::FlashRead).needs_exit());
    }
}
