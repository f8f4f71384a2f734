//! Scanner link framing.
//!
//! ## Frame Format
//!
//! ```text
//! +------+--------+----------+------+-----------+----------+
//! | Sync | Length | DataCode | Mode |  Payload  | Checksum |
//! +------+--------+----------+------+-----------+----------+
//! | 1    | 2 (BE) | 1        | 1    | variable  | 1        |
//! +------+--------+----------+------+-----------+----------+
//! | 0x3D | 2 + n  | bus<<4|c | mode |  n bytes  | sum      |
//! +------+--------+----------+------+-----------+----------+
//! ```
//!
//! The checksum is the low byte of the sum of every byte from the length
//! field through the end of the payload.

use crate::protocol::packet::{Bus, Command, Packet};
use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, trace};

/// Frame sync byte.
pub const SYNC: u8 = 0x3D;

/// Sync + length + datacode + mode + checksum.
pub const FRAME_OVERHEAD: usize = 6;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - 2;

/// Additive checksum over a byte slice.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode a packet into a wire frame.
///
/// Payloads longer than [`MAX_PAYLOAD`] are truncated; no packet built by
/// this crate comes close to the limit.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode(packet: &Packet) -> Vec<u8> {
    let payload = &packet.payload[..packet.payload.len().min(MAX_PAYLOAD)];
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());

    buf.push(SYNC);
    buf.write_u16::<BigEndian>((payload.len() + 2) as u16).unwrap();
    buf.push(((packet.bus as u8) << 4) | (packet.command as u8 & 0x0F));
    buf.push(packet.mode);
    buf.extend_from_slice(payload);

    let sum = checksum(&buf[1..]);
    buf.push(sum);
    buf
}

/// Streaming frame decoder.
///
/// Bytes are pushed in whatever chunks the serial port delivers them;
/// complete packets are pulled out with [`FrameDecoder::next_packet`].
/// Garbage before a sync byte, frames with a bad checksum and frames for
/// buses or commands this crate does not model are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete packet, if any.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            let Some(start) = self.buf.iter().position(|&b| b == SYNC) else {
                if !self.buf.is_empty() {
                    trace!("Discarding {} bytes without sync", self.buf.len());
                }
                self.buf.clear();
                return None;
            };
            if start > 0 {
                trace!("Skipping {start} bytes before sync");
                self.buf.drain(..start);
            }

            if self.buf.len() < 3 {
                return None;
            }
            let len = usize::from(u16::from_be_bytes([self.buf[1], self.buf[2]]));
            if len < 2 {
                debug!("Invalid frame length {len}, resyncing");
                self.buf.drain(..1);
                continue;
            }
            let total = len + 4;
            if self.buf.len() < total {
                return None;
            }

            let frame: Vec<u8> = self.buf.drain(..total).collect();
            let expected = checksum(&frame[1..total - 1]);
            let actual = frame[total - 1];
            if expected != actual {
                debug!("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}");
                // The sync byte may have been a data byte; retry from the next one.
                let mut rest = frame[1..].to_vec();
                rest.extend_from_slice(&self.buf);
                self.buf = rest;
                continue;
            }

            let datacode = frame[3];
            let (bus, command) = match (
                Bus::try_from(datacode >> 4),
                Command::try_from(datacode & 0x0F),
            ) {
                (Ok(bus), Ok(command)) => (bus, command),
                _ => {
                    trace!("Dropping frame with datacode {datacode:#04x}");
                    continue;
                }
            };

            let packet = Packet::new(bus, command, frame[4], frame[5..total - 1].to_vec());
            trace!("RX {packet:?}");
            return Some(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::debug_mode;

    #[test]
    fn test_encode_layout() {
        let frame = encode(&Packet::upload_worker(0x04, 0x03));
        assert_eq!(frame[0], SYNC);
        assert_eq!(&frame[1..3], &[0x00, 0x04]);
        assert_eq!(frame[3], 0x0E);
        assert_eq!(frame[4], debug_mode::UPLOAD_WORKER_FUNCTION);
        assert_eq!(&frame[5..7], &[0x04, 0x03]);
        assert_eq!(frame[7], checksum(&frame[1..7]));
        assert_eq!(frame.len(), FRAME_OVERHEAD + 2);
    }

    #[test]
    fn test_pcm_datacode() {
        let frame = encode(&Packet::pcm_message(vec![0x33, 0, 0, 0, 2, 0]));
        assert_eq!(frame[3], 0x26);
    }

    #[test]
    fn test_decode_split_chunks() {
        let packet = Packet::pcm_message(vec![0x21, 0x22]);
        let frame = encode(&packet);

        let mut decoder = FrameDecoder::new();
        decoder.push(&frame[..3]);
        assert!(decoder.next_packet().is_none());
        decoder.push(&frame[3..]);
        assert_eq!(decoder.next_packet(), Some(packet));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_skips_garbage_and_bad_checksum() {
        let good = Packet::set_prog_volt(0x00);
        let mut corrupt = encode(&Packet::request_voltages());
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x00, 0x11]);
        decoder.push(&corrupt);
        decoder.push(&encode(&good));

        assert_eq!(decoder.next_packet(), Some(good));
        assert!(decoder.next_packet().is_none());
    }

    #[test]
    fn test_decode_drops_unknown_bus() {
        let mut frame = encode(&Packet::request_voltages());
        // CCD bus is not modeled here.
        frame[3] = 0x14;
        let last = frame.len() - 1;
        frame[last] = checksum(&frame[1..last]);

        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        assert!(decoder.next_packet().is_none());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let a = Packet::pcm_message(vec![0x22]);
        let b = Packet::exit_worker(3, 0);
        let mut decoder = FrameDecoder::new();
        let mut bytes = encode(&a);
        bytes.extend(encode(&b));
        decoder.push(&bytes);
        assert_eq!(decoder.next_packet(), Some(a));
        assert_eq!(decoder.next_packet(), Some(b));
    }
}
