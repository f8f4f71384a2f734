//! SCI-bus bootstrap message ids, opcodes and status codes.
//!
//! Everything here operates on the SCI bytes of an inbound PCM/TCM packet,
//! i.e. the payload with the scanner's 4-byte timestamp removed (see
//! [`sci_bytes`]).

use crate::protocol::packet::Packet;
use thiserror::Error;

/// Length of the scanner timestamp prefixed to inbound SCI payloads.
pub const TIMESTAMP_LEN: usize = 4;

/// Fixed block size for flash and EEPROM transfers.
pub const BLOCK_SIZE: u16 = 512;

/// First byte of an SCI reply.
pub mod id {
    /// Block write failed.
    pub const WRITE_ERROR: u8 = 0x01;
    /// Bootstrap baudrate switched to 62500.
    pub const BOOTSTRAP_BAUDRATE_SET: u8 = 0x06;
    /// Worker function upload result.
    pub const UPLOAD_WORKER_FUNCTION_RESULT: u8 = 0x11;
    /// Worker function started.
    pub const START_WORKER_FUNCTION: u8 = 0x21;
    /// Worker function exited. Doubles as the erase success status.
    pub const EXIT_WORKER_FUNCTION: u8 = 0x22;
    /// Security seed request.
    pub const BOOTSTRAP_SEED_KEY_REQUEST: u8 = 0x24;
    /// Security key response.
    pub const BOOTSTRAP_SEED_KEY_RESPONSE: u8 = 0x26;
    /// Flash block written.
    pub const FLASH_BLOCK_WRITE: u8 = 0x31;
    /// Flash block read.
    pub const FLASH_BLOCK_READ: u8 = 0x34;
    /// EEPROM block written.
    pub const EEPROM_BLOCK_WRITE: u8 = 0x37;
    /// EEPROM block read.
    pub const EEPROM_BLOCK_READ: u8 = 0x3A;
    /// Bootloader started.
    pub const START_BOOTLOADER: u8 = 0x47;
    /// Bootloader uploaded.
    pub const UPLOAD_BOOTLOADER: u8 = 0x4C;
    /// Block size rejected.
    pub const BLOCK_SIZE_ERROR: u8 = 0x80;
    /// Flash erase failure codes.
    pub const ERASE_ERROR_81: u8 = 0x81;
    /// Flash erase failure codes.
    pub const ERASE_ERROR_82: u8 = 0x82;
    /// Flash erase failure codes.
    pub const ERASE_ERROR_83: u8 = 0x83;
    /// Block offset rejected.
    pub const OFFSET_ERROR: u8 = 0x84;
    /// Bootstrap mode has no security lock.
    pub const BOOTSTRAP_MODE_NOT_PROTECTED: u8 = 0xDB;
}

/// Request opcodes understood by the block worker functions.
pub mod opcode {
    /// Flash block write.
    pub const FLASH_WRITE: u8 = 0x30;
    /// Flash block read.
    pub const FLASH_READ: u8 = 0x33;
    /// EEPROM block write.
    pub const EEPROM_WRITE: u8 = 0x36;
    /// EEPROM block read.
    pub const EEPROM_READ: u8 = 0x39;
}

const SEED_KEY_OK: [u8; 4] = [0xD0, 0x67, 0xC2, 0x1F];
const NOT_PROTECTED: [u8; 4] = [0x2F, 0xD8, 0x3E, 0x23];

/// SCI bytes of an inbound ECU packet, with the timestamp stripped.
///
/// Returns `None` for scanner packets and for SCI packets that carry no
/// bytes beyond the timestamp.
pub fn sci_bytes(packet: &Packet) -> Option<&[u8]> {
    if !packet.bus.is_sci() {
        return None;
    }
    packet
        .payload
        .get(TIMESTAMP_LEN..)
        .filter(|bytes| !bytes.is_empty())
}

/// Status byte trailing a rejected block response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorStatus {
    /// 0x01.
    #[error("Write error.")]
    WriteError,
    /// 0x80.
    #[error("Invalid block size.")]
    BlockSizeError,
    /// 0x84.
    #[error("Invalid offset.")]
    OffsetError,
    /// Anything else.
    #[error("Unknown error ({0:#04x}).")]
    Unknown(u8),
}

impl ErrorStatus {
    /// Classify a trailing status byte.
    pub fn from_status(status: u8) -> Self {
        match status {
            id::WRITE_ERROR => Self::WriteError,
            id::BLOCK_SIZE_ERROR => Self::BlockSizeError,
            id::OFFSET_ERROR => Self::OffsetError,
            other => Self::Unknown(other),
        }
    }
}

/// Worker function upload result reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UploadResult {
    /// Uploaded and pinged.
    #[error("OK")]
    Ok,
    /// ECU did not answer the ping after upload.
    #[error("no response to ping")]
    NoResponseToPing,
    /// Upload stopped midway.
    #[error("upload interrupted")]
    UploadInterrupted,
    /// ECU answered with something unexpected.
    #[error("unexpected upload result")]
    UnexpectedUploadResult,
    /// Code not known to this crate.
    #[error("unknown upload result {0:#04x}")]
    Other(u8),
}

impl UploadResult {
    /// Classify an upload result code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x01 => Self::NoResponseToPing,
            0x02 => Self::UploadInterrupted,
            0x03 => Self::UnexpectedUploadResult,
            other => Self::Other(other),
        }
    }
}

/// Bootloader handshake status reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootloaderStatus {
    /// Bootstrap mode entered.
    #[error("OK")]
    Ok,
    /// 0x01.
    #[error("no response to magic byte")]
    NoResponseToMagicByte,
    /// 0x02.
    #[error("unexpected response to magic byte")]
    UnexpectedResponseToMagicByte,
    /// 0x03.
    #[error("security seed response timeout")]
    SecuritySeedResponseTimeout,
    /// 0x04.
    #[error("security seed checksum error")]
    SecuritySeedChecksumError,
    /// 0x05.
    #[error("security key status timeout")]
    SecurityKeyStatusTimeout,
    /// 0x06.
    #[error("security key not accepted")]
    SecurityKeyNotAccepted,
    /// 0x07.
    #[error("start bootloader timeout")]
    StartBootloaderTimeout,
    /// 0x08.
    #[error("unexpected bootloader status byte")]
    UnexpectedBootloaderStatusByte,
    /// Code not known to this crate.
    #[error("unknown ({0:#04x})")]
    Other(u8),
}

impl BootloaderStatus {
    /// Classify a bootloader status code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x01 => Self::NoResponseToMagicByte,
            0x02 => Self::UnexpectedResponseToMagicByte,
            0x03 => Self::SecuritySeedResponseTimeout,
            0x04 => Self::SecuritySeedChecksumError,
            0x05 => Self::SecurityKeyStatusTimeout,
            0x06 => Self::SecurityKeyNotAccepted,
            0x07 => Self::StartBootloaderTimeout,
            0x08 => Self::UnexpectedBootloaderStatusByte,
            other => Self::Other(other),
        }
    }

    /// Whether bootstrap mode is usable.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// Human-readable line for informational bootstrap replies.
///
/// These replies appear while the scanner runs the bootloader handshake and
/// never change session state.
pub fn describe_notice(sci: &[u8]) -> Option<String> {
    let (&first, rest) = sci.split_first()?;
    match first {
        id::BOOTSTRAP_BAUDRATE_SET => Some("Set bootstrap baudrate to 62500 baud. OK.".to_string()),
        id::BOOTSTRAP_SEED_KEY_RESPONSE if rest == SEED_KEY_OK => {
            Some("Unlock bootstrap mode security. OK.".to_string())
        },
        id::BOOTSTRAP_MODE_NOT_PROTECTED if rest == NOT_PROTECTED => {
            Some("Bootstrap mode is not protected.".to_string())
        },
        id::START_BOOTLOADER => match sci.len() {
            4 if sci[3] == id::EXIT_WORKER_FUNCTION => Some("Start bootloader. OK.".to_string()),
            3 => Some("Start bootloader. Error.".to_string()),
            _ => None,
        },
        id::UPLOAD_BOOTLOADER if sci.len() >= 5 => {
            let start = u16::from_be_bytes([sci[1], sci[2]]);
            let end = u16::from_be_bytes([sci[3], sci[4]]);
            let expected = usize::from(end.wrapping_sub(start)) + 1;
            if expected == sci.len() - 5 {
                Some("Upload bootloader. OK.".to_string())
            } else {
                Some("Upload bootloader. Error.".to_string())
            }
        },
        _ => None,
    }
}
