//! Bootstrap session engine.
//!
//! A [`Session`] is a pure state machine: it consumes [`Event`]s (packets,
//! timer firings, cancellation) and returns [`Effect`]s (packets to send,
//! timers to arm, file writes, status lines). It performs no I/O itself;
//! [`crate::runner::SessionRunner`] owns the transport, the timers and the
//! dump files and feeds events in arrival order.
//!
//! ## Write flash sequence
//!
//! ```text
//! CheckVoltages -> ReadPartNumber -> DetectFlashMemoryType
//!     -> [BackupFlashMemory] -> [BackupEEPROM] -> EraseFlashMemory
//!     -> WriteFlashMemory -> VerifyFlashChecksum -> [UpdateEEPROM]
//!     -> FinishFlashWrite
//! ```
//!
//! JTEC-family bootloaders skip the part number, the EEPROM backup and the
//! EEPROM update.

pub mod machine;
pub mod outcome;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod sim;
pub mod task;
pub mod transfer;
pub mod voltage;
pub mod worker;

use crate::error::{Error, Result};
use crate::image::{EepromImage, FlashImage};
use crate::protocol::packet::Packet;
use crate::target::bootloader::Bootloader;
use crate::target::flash::FlashChip;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub use machine::Session;
pub use outcome::{AbortReason, EcuState, Outcome};
pub use scheduler::{Scheduler, Timing};
pub use task::Task;
pub use transfer::{BlockResponse, BlockTransfer, Direction, Progress, Region};
pub use voltage::{VoltageFault, VoltageReading};
pub use worker::{ActiveWorker, WorkerFunction, WorkerStage};

/// User-facing operation a session performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Dump flash to a file.
    ReadFlash,
    /// Check voltages, back up, erase and write flash.
    WriteFlash,
    /// Dump EEPROM to a file.
    ReadEeprom,
    /// Write an EEPROM image.
    WriteEeprom,
    /// Identify the flash chip only.
    IdentifyFlashChip,
}

impl Operation {
    /// Phase the session starts in.
    pub fn initial_task(self) -> Task {
        match self {
            Self::ReadFlash => Task::ReadFlashMemory,
            Self::WriteFlash => Task::CheckVoltages,
            Self::ReadEeprom => Task::ReadEEPROM,
            Self::WriteEeprom => Task::WriteEEPROM,
            Self::IdentifyFlashChip => Task::DetectFlashMemoryType,
        }
    }

    /// Modifies ECU memory.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::WriteFlash | Self::WriteEeprom)
    }
}

/// Immutable session parameters, captured when the session is created.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// What to do.
    pub operation: Operation,
    /// Bootloader variant the ECU was bootstrapped with.
    pub bootloader: Bootloader,
    /// Selected flash chip; `None` means detect it.
    pub flash_chip: Option<FlashChip>,
    /// Back up flash before erasing.
    pub backup_flash: bool,
    /// Back up EEPROM before erasing flash (ignored for JTEC).
    pub backup_eeprom: bool,
    /// Image for [`Operation::WriteFlash`].
    pub flash_image: Option<FlashImage>,
    /// Image for [`Operation::WriteEeprom`].
    pub eeprom_image: Option<EepromImage>,
    /// Destination for read operations.
    pub output: Option<PathBuf>,
    /// Directory for backups taken during a flash write.
    pub backup_dir: PathBuf,
    /// Timestamp used in backup file names.
    pub backup_stamp: u64,
    /// Timing parameters.
    pub timing: Timing,
}

impl SessionConfig {
    /// Config with backups enabled and default timing.
    pub fn new(operation: Operation, bootloader: Bootloader) -> Self {
        let backup_stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            operation,
            bootloader,
            flash_chip: bootloader.default_flash_chip(),
            backup_flash: true,
            backup_eeprom: true,
            flash_image: None,
            eeprom_image: None,
            output: None,
            backup_dir: PathBuf::from("backups"),
            backup_stamp,
            timing: Timing::default(),
        }
    }

    /// Use a specific flash chip instead of detecting it.
    #[must_use]
    pub fn with_flash_chip(mut self, chip: Option<FlashChip>) -> Self {
        if chip.is_some() {
            self.flash_chip = chip;
        }
        self
    }

    /// Choose which backups to take before erasing.
    #[must_use]
    pub fn with_backups(mut self, flash: bool, eeprom: bool) -> Self {
        self.backup_flash = flash;
        self.backup_eeprom = eeprom;
        self
    }

    /// Image to write with [`Operation::WriteFlash`].
    #[must_use]
    pub fn with_flash_image(mut self, image: FlashImage) -> Self {
        self.flash_image = Some(image);
        self
    }

    /// Image to write with [`Operation::WriteEeprom`].
    #[must_use]
    pub fn with_eeprom_image(mut self, image: EepromImage) -> Self {
        self.eeprom_image = Some(image);
        self
    }

    /// Destination for read operations.
    #[must_use]
    pub fn with_output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    /// Directory for backups.
    #[must_use]
    pub fn with_backup_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.backup_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Timestamp for backup file names.
    #[must_use]
    pub fn with_backup_stamp(mut self, stamp: u64) -> Self {
        self.backup_stamp = stamp;
        self
    }

    /// Timing parameters.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Path of the flash backup taken during a write.
    pub fn flash_backup_path(&self) -> PathBuf {
        self.backup_dir
            .join(format!("pcm_flash_{}.bin", self.backup_stamp))
    }

    /// Path of the EEPROM backup taken during a write.
    pub fn eeprom_backup_path(&self) -> PathBuf {
        self.backup_dir
            .join(format!("pcm_eeprom_{}.bin", self.backup_stamp))
    }

    /// Reject combinations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.bootloader == Bootloader::Empty {
            return Err(Error::Config("no bootloader selected".into()));
        }
        match self.operation {
            Operation::WriteFlash => {
                if self.flash_image.is_none() {
                    return Err(Error::Config("flash write needs an image".into()));
                }
            },
            Operation::ReadFlash => {
                if self.flash_chip.is_none() {
                    return Err(Error::Config(
                        "Detect flash memory chip first.".into(),
                    ));
                }
                if self.output.is_none() {
                    return Err(Error::Config("flash read needs an output file".into()));
                }
            },
            Operation::ReadEeprom | Operation::WriteEeprom => {
                if self.bootloader.is_jtec() {
                    return Err(Error::Unsupported(format!(
                        "EEPROM access is not supported with the {} bootloader",
                        self.bootloader
                    )));
                }
                if self.operation == Operation::ReadEeprom && self.output.is_none() {
                    return Err(Error::Config("EEPROM read needs an output file".into()));
                }
                if self.operation == Operation::WriteEeprom && self.eeprom_image.is_none() {
                    return Err(Error::Config("EEPROM write needs an image".into()));
                }
            },
            Operation::IdentifyFlashChip => {},
        }
        Ok(())
    }
}

/// Identifies one transmission of a request.
///
/// Retries get a fresh id, so a timeout armed for an earlier transmission
/// can be told apart from one for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

/// A packet to send, tagged with its request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Id used by timeout events.
    pub id: RequestId,
    /// Packet.
    pub packet: Packet,
}

/// Input to the session machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Begin the session.
    Started,
    /// A packet arrived from the transport.
    Packet(Packet),
    /// The pacing timer fired; the session may issue its next request.
    NextRequestTick,
    /// No response to `request` within the receive timeout.
    ReceiveTimeout {
        /// Request the timer was armed for.
        request: RequestId,
    },
    /// `request` could not be transmitted.
    TransmitTimeout {
        /// Request that failed.
        request: RequestId,
    },
    /// Operator stop.
    Cancel,
}

/// Output of the session machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Transmit a packet.
    Send(Request),
    /// Fire [`Event::NextRequestTick`] after the pacing interval.
    ArmNextRequest,
    /// Fire [`Event::ReceiveTimeout`] for `request` after `after`.
    ArmReceiveTimeout {
        /// Request being waited on.
        request: RequestId,
        /// Timeout.
        after: std::time::Duration,
    },
    /// Stop the receive timer.
    DisarmReceiveTimeout,
    /// Create (truncate) the dump file for a region.
    CreateDump(Region, PathBuf),
    /// Append one accepted block to the region's dump file.
    AppendDump(Region, Vec<u8>),
    /// Human-readable status line.
    Status(String),
    /// Transfer progress.
    Progress(Progress),
    /// The operator must cycle the ignition key before starting the engine.
    KeyCycleRequired,
    /// The session ended.
    Finished(Outcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_read_flash_needs_chip() {
        let config = SessionConfig::new(Operation::ReadFlash, Bootloader::Sbec3a)
            .with_output("flash.bin");
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = config.with_flash_chip(Some(FlashChip::N28F020));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_jtec_defaults_to_dual_chip() {
        let config = SessionConfig::new(Operation::ReadFlash, Bootloader::Jtec)
            .with_output("flash.bin");
        assert_eq!(config.flash_chip, Some(FlashChip::N28F010Dual));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_eeprom_rejects_jtec() {
        let config = SessionConfig::new(Operation::ReadEeprom, Bootloader::JtecPlus)
            .with_output("eeprom.bin");
        assert!(matches!(config.validate(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_validate_write_needs_image() {
        let config = SessionConfig::new(Operation::WriteFlash, Bootloader::Sbec3a);
        assert!(config.validate().is_err());
        let config = SessionConfig::new(Operation::WriteEeprom, Bootloader::Sbec3a);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backup_paths() {
        let config = SessionConfig::new(Operation::WriteFlash, Bootloader::Sbec3a)
            .with_backup_dir("/tmp/roms")
            .with_backup_stamp(42);
        assert_eq!(
            config.flash_backup_path(),
            PathBuf::from("/tmp/roms/pcm_flash_42.bin")
        );
        assert_eq!(
            config.eeprom_backup_path(),
            PathBuf::from("/tmp/roms/pcm_eeprom_42.bin")
        );
    }

    #[test]
    fn test_initial_tasks() {
        assert_eq!(Operation::WriteFlash.initial_task(), Task::CheckVoltages);
        assert_eq!(
            Operation::IdentifyFlashChip.initial_task(),
            Task::DetectFlashMemoryType
        );
        assert!(Operation::WriteEeprom.is_destructive());
        assert!(!Operation::ReadFlash.is_destructive());
    }
}
