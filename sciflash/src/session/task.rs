//! Session phases.

use crate::session::transfer::{Direction, Region};
use crate::session::worker::WorkerFunction;
use std::fmt;

/// Phase of a bootstrap session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Task {
    /// Idle.
    #[default]
    None,
    /// Measure battery, bootstrap and programming voltages.
    CheckVoltages,
    /// Read the controller part number.
    ReadPartNumber,
    /// Identify the flash chip (or use the selected one).
    DetectFlashMemoryType,
    /// Dump flash before erasing it.
    BackupFlashMemory,
    /// Dump flash on request.
    ReadFlashMemory,
    /// Dump EEPROM before erasing flash.
    BackupEEPROM,
    /// Erase flash.
    EraseFlashMemory,
    /// Write the flash image.
    WriteFlashMemory,
    /// Verify the flash checksum.
    VerifyFlashChecksum,
    /// EEPROM update after a flash write.
    UpdateEEPROM,
    /// Dump EEPROM on request.
    ReadEEPROM,
    /// Write an EEPROM image.
    WriteEEPROM,
    /// Flash read done.
    FinishFlashRead,
    /// Flash write done.
    FinishFlashWrite,
    /// EEPROM read done.
    FinishEEPROMRead,
    /// EEPROM write done.
    FinishEEPROMWrite,
}

impl Task {
    /// `None` and the `Finish*` phases.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::None
                | Self::FinishFlashRead
                | Self::FinishFlashWrite
                | Self::FinishEEPROMRead
                | Self::FinishEEPROMWrite
        )
    }

    /// Worker function the phase runs, if any.
    pub fn worker(self) -> Option<WorkerFunction> {
        match self {
            Self::ReadPartNumber => Some(WorkerFunction::PartNumberRead),
            Self::DetectFlashMemoryType => Some(WorkerFunction::FlashID),
            Self::BackupFlashMemory | Self::ReadFlashMemory => Some(WorkerFunction::FlashRead),
            Self::BackupEEPROM | Self::ReadEEPROM => Some(WorkerFunction::EEPROMRead),
            Self::EraseFlashMemory => Some(WorkerFunction::FlashErase),
            Self::WriteFlashMemory => Some(WorkerFunction::FlashWrite),
            Self::VerifyFlashChecksum => Some(WorkerFunction::VerifyFlashChecksum),
            Self::UpdateEEPROM | Self::WriteEEPROM => Some(WorkerFunction::EEPROMWrite),
            _ => None,
        }
    }

    /// Block transfer the phase performs, if any.
    pub fn transfer(self) -> Option<(Region, Direction)> {
        match self {
            Self::BackupFlashMemory | Self::ReadFlashMemory => {
                Some((Region::Flash, Direction::Read))
            },
            Self::WriteFlashMemory => Some((Region::Flash, Direction::Write)),
            Self::BackupEEPROM | Self::ReadEEPROM => Some((Region::Eeprom, Direction::Read)),
            Self::WriteEEPROM => Some((Region::Eeprom, Direction::Write)),
            _ => None,
        }
    }

    /// Step header shown during a flash write.
    pub fn step_title(self) -> Option<&'static str> {
        match self {
            Self::CheckVoltages => Some("Step 1. Check voltages."),
            Self::ReadPartNumber => Some("Step 2. Read part number."),
            Self::DetectFlashMemoryType => Some("Step 3. Detect flash memory type."),
            Self::BackupFlashMemory => Some("Step 4. Backup flash memory."),
            Self::BackupEEPROM => Some("Step 5. Backup EEPROM."),
            Self::EraseFlashMemory => Some("Step 6. Erase flash memory."),
            Self::WriteFlashMemory => Some("Step 7. Write flash memory."),
            Self::VerifyFlashChecksum => Some("Step 8. Verify flash checksum."),
            Self::UpdateEEPROM => Some("Step 9. Update EEPROM."),
            _ => None,
        }
    }

    /// Success message for terminal phases.
    pub fn finish_message(self) -> Option<&'static str> {
        match self {
            Self::FinishFlashRead => Some("Flash memory reading session finished successfully."),
            Self::FinishFlashWrite => Some("Flash memory writing session finished successfully."),
            Self::FinishEEPROMRead => Some("EEPROM reading session finished successfully."),
            Self::FinishEEPROMWrite => Some("EEPROM writing session finished successfully."),
            _ => None,
        }
    }

    /// Whether the ECU needs a key cycle after reaching this phase.
    pub fn requires_key_cycle(self) -> bool {
        matches!(self, Self::FinishFlashWrite | Self::FinishEEPROMWrite)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
