//! Terminal outcomes of a session.

use crate::protocol::sci::{ErrorStatus, UploadResult};
use crate::session::task::Task;
use crate::session::voltage::{VoltageFault, describe_faults};
use crate::target::flash::FlashChip;
use thiserror::Error;

/// What the ECU's memory looks like after the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EcuState {
    /// Nothing destructive was started.
    #[default]
    Intact,
    /// An erase or write was started; flash/EEPROM contents are unknown.
    Indeterminate,
}

/// Why a session was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// The voltage gate failed.
    #[error("{}", describe_faults(.0))]
    VoltageTooLow(Vec<VoltageFault>),

    /// Ten consecutive receive timeouts.
    #[error("No response during {task}.")]
    NoResponse {
        /// Phase that stopped answering.
        task: Task,
    },

    /// The transport kept failing to send.
    #[error("Failed to transmit request during {task}.")]
    TransmitFailed {
        /// Phase being served.
        task: Task,
    },

    /// A worker function upload was refused.
    #[error("Worker function status: {0}.")]
    UploadFailed(UploadResult),

    /// Flash erase reported a failure code.
    #[error("Flash erase error {0:#04x}")]
    EraseFailed(u8),

    /// A block transfer was rejected.
    #[error("{0}")]
    BlockRejected(ErrorStatus),

    /// FlashID returned ids not in the catalog.
    #[error("Flash memory type could not be determined ({manufacturer:02X} {device:02X}).")]
    UnknownFlashChip {
        /// Manufacturer id.
        manufacturer: u8,
        /// Device id.
        device: u8,
    },

    /// The flash image does not fill the chip.
    #[error("Flash file size ({image} bytes) must be equal to the flash memory chip size ({} bytes)!", .chip.size())]
    ImageSizeMismatch {
        /// Image size.
        image: u32,
        /// Selected chip.
        chip: FlashChip,
    },

    /// A dump file could not be written.
    #[error("Cannot write dump file: {0}")]
    DumpFailed(String),
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reached the given terminal phase.
    Success(Task),
    /// Stopped on a fatal error.
    Aborted {
        /// Cause.
        reason: AbortReason,
        /// ECU memory state.
        ecu: EcuState,
    },
    /// Stopped by the operator.
    Cancelled {
        /// ECU memory state.
        ecu: EcuState,
    },
}

impl Outcome {
    /// Whether the session completed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// ECU state implied by the outcome.
    pub fn ecu(&self) -> EcuState {
        match self {
            Self::Success(_) => EcuState::Intact,
            Self::Aborted { ecu, .. } | Self::Cancelled { ecu } => *ecu,
        }
    }
}
