//! Block transfer sub-protocol.
//!
//! Memory moves in fixed 512-byte blocks. Every request carries the offset
//! and block length; the worker echoes both back, and a response is only
//! accepted when the echoed length matches the bytes received and the
//! echoed offset matches the request still pending.
//!
//! ## Flash
//!
//! ```text
//! request:  [op, off_hi, off_mid, off_lo, len_hi, len_lo, (data)]
//! response: [id, off_hi, off_mid, off_lo, len_hi, len_lo, data...]
//! ```
//!
//! ## EEPROM
//!
//! ```text
//! request:  [op, off_hi, off_lo, len_hi, len_lo, (data)]
//! response: [id, off_hi, off_lo, len_hi, len_lo, data...]
//! ```

use crate::image::EEPROM_SIZE;
use crate::protocol::sci::{BLOCK_SIZE, ErrorStatus, id, opcode};
use std::fmt;

/// Memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Flash (24-bit offsets).
    Flash,
    /// EEPROM (16-bit offsets, one 512-byte region).
    Eeprom,
}

impl Region {
    fn header_len(self) -> usize {
        match self {
            Self::Flash => 6,
            Self::Eeprom => 5,
        }
    }

    fn offset_len(self) -> usize {
        self.header_len() - 3
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash => f.write_str("flash"),
            Self::Eeprom => f.write_str("EEPROM"),
        }
    }
}

/// Transfer direction, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// ECU to host.
    Read,
    /// Host to ECU.
    Write,
}

/// Observable transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Region being moved.
    pub region: Region,
    /// Direction.
    pub direction: Direction,
    /// Bytes confirmed so far.
    pub done: u32,
    /// Total bytes.
    pub total: u32,
}

impl Progress {
    /// Rounded percentage.
    #[allow(clippy::cast_possible_truncation)]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let done = u64::from(self.done.min(self.total));
        ((done * 100 + u64::from(self.total) / 2) / u64::from(self.total)) as u8
    }
}

/// How a block response was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockResponse {
    /// Cursor advanced; read transfers carry the block data.
    Accepted(Option<Vec<u8>>),
    /// Well-formed but not for the pending request.
    Stale,
    /// Worker reported an error status.
    Rejected(ErrorStatus),
    /// Not a response for this transfer.
    Ignored,
}

/// Offset-tracked transfer of one memory region.
#[derive(Debug, Clone)]
pub struct BlockTransfer {
    region: Region,
    direction: Direction,
    total: u32,
    cursor: u32,
    pending: Option<u32>,
}

impl BlockTransfer {
    /// New transfer starting at offset 0.
    pub fn new(region: Region, direction: Direction, total: u32) -> Self {
        let total = match region {
            Region::Flash => total,
            Region::Eeprom => total.min(EEPROM_SIZE),
        };
        Self {
            region,
            direction,
            total,
            cursor: 0,
            pending: None,
        }
    }

    /// Region.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Next offset to transfer.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Region size.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Every block has been confirmed.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total
    }

    /// Offset of the request awaiting its response.
    pub fn pending(&self) -> Option<u32> {
        self.pending
    }

    fn request_opcode(&self) -> u8 {
        match (self.region, self.direction) {
            (Region::Flash, Direction::Read) => opcode::FLASH_READ,
            (Region::Flash, Direction::Write) => opcode::FLASH_WRITE,
            (Region::Eeprom, Direction::Read) => opcode::EEPROM_READ,
            (Region::Eeprom, Direction::Write) => opcode::EEPROM_WRITE,
        }
    }

    /// SCI id of the matching response.
    pub fn response_id(&self) -> u8 {
        match (self.region, self.direction) {
            (Region::Flash, Direction::Read) => id::FLASH_BLOCK_READ,
            (Region::Flash, Direction::Write) => id::FLASH_BLOCK_WRITE,
            (Region::Eeprom, Direction::Read) => id::EEPROM_BLOCK_READ,
            (Region::Eeprom, Direction::Write) => id::EEPROM_BLOCK_WRITE,
        }
    }

    fn offset_bytes(&self, offset: u32) -> Vec<u8> {
        let bytes = offset.to_be_bytes();
        bytes[4 - self.region.offset_len()..].to_vec()
    }

    /// Build the request for the current cursor and mark it pending.
    ///
    /// `data` is the source block for writes and is ignored for reads.
    /// Returns `None` once the transfer is complete.
    pub fn request(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if self.is_complete() {
            return None;
        }

        let mut payload = Vec::with_capacity(self.region.header_len() + usize::from(BLOCK_SIZE));
        payload.push(self.request_opcode());
        payload.extend(self.offset_bytes(self.cursor));
        payload.extend_from_slice(&BLOCK_SIZE.to_be_bytes());
        if self.direction == Direction::Write {
            payload.extend_from_slice(data);
        }

        self.pending = Some(self.cursor);
        Some(payload)
    }

    /// Classify a response to the pending request.
    pub fn evaluate(&mut self, sci: &[u8]) -> BlockResponse {
        let header = self.region.header_len();
        if sci.first() != Some(&self.response_id()) || sci.len() < header + 1 {
            return BlockResponse::Ignored;
        }

        let offset_len = self.region.offset_len();
        let echoed_offset = &sci[1..=offset_len];
        let block = u16::from_be_bytes([sci[offset_len + 1], sci[offset_len + 2]]);
        let received = sci.len() - header;

        if usize::from(block) != received {
            let status = sci[sci.len() - 1];
            return BlockResponse::Rejected(ErrorStatus::from_status(status));
        }
        if self.region == Region::Eeprom && echoed_offset[0] >= 0x02 {
            return BlockResponse::Rejected(ErrorStatus::OffsetError);
        }
        if self.direction == Direction::Read && block != BLOCK_SIZE {
            return BlockResponse::Rejected(ErrorStatus::BlockSizeError);
        }

        let Some(pending) = self.pending else {
            return BlockResponse::Stale;
        };
        if echoed_offset != self.offset_bytes(pending).as_slice() {
            return BlockResponse::Stale;
        }

        self.pending = None;
        self.cursor = (self.cursor + u32::from(BLOCK_SIZE)).min(self.total);
        let data = match self.direction {
            Direction::Read => Some(sci[header..].to_vec()),
            Direction::Write => None,
        };
        BlockResponse::Accepted(data)
    }

    /// Current progress.
    pub fn progress(&self) -> Progress {
        Progress {
            region: self.region,
            direction: self.direction,
            done: self.cursor,
            total: self.total,
        }
    }
}
