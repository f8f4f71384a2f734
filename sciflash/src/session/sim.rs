//! Scripted scanner and ECU for tests.

use crate::protocol::packet::{
    Bus, Command, Packet, debug_mode, request_mode, settings_mode,
};
use crate::protocol::sci::{id, opcode};
use crate::session::worker::WorkerFunction;

/// Wrap SCI bytes as a received PCM message with a timestamp.
pub(crate) fn rx(sci: &[u8]) -> Packet {
    let mut payload = vec![0x00, 0x00, 0x12, 0x34];
    payload.extend_from_slice(sci);
    Packet::new(Bus::Pcm, Command::MsgRx, 0x01, payload)
}

/// Scanner packet.
pub(crate) fn usb(command: Command, mode: u8, payload: Vec<u8>) -> Packet {
    Packet::new(Bus::Usb, command, mode, payload)
}

/// Scanner `SetProgVolt` notification.
pub(crate) fn prog_volt(selector: u8) -> Packet {
    usb(Command::Settings, settings_mode::SET_PROG_VOLT, vec![selector])
}

/// Voltage measurement reply.
pub(crate) fn volts(battery: u16, bootstrap: u16, programming: u16) -> Packet {
    let mut payload = Vec::new();
    for mv in [battery, bootstrap, programming] {
        payload.extend_from_slice(&mv.to_be_bytes());
    }
    usb(Command::Response, request_mode::ALL_VOLTS, payload)
}

/// An ECU in bootstrap mode behind a scanner.
#[derive(Debug, Clone)]
pub(crate) struct SimEcu {
    pub flash: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub manufacturer: u8,
    pub device: u8,
    pub voltages: [u16; 3],
    pub part_number: [u8; 6],
    pub erase_result: u8,
    /// Report the erase result in a separate exit packet after a bare start reply.
    pub split_erase_reply: bool,
    pub upload_result: u8,
    pub bootstrap_status: u8,
    pub uploads: Vec<WorkerFunction>,
    pub exits: Vec<u8>,
}

#[allow(clippy::cast_possible_truncation)]
fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8) ^ ((i >> 9) as u8).wrapping_add(seed))
        .collect()
}

impl SimEcu {
    /// ECU with an Intel N28F020 (256 kB) and patterned memories.
    pub fn new() -> Self {
        Self::with_chip(0x89, 0xBD, 262_144)
    }

    pub fn with_chip(manufacturer: u8, device: u8, flash_len: usize) -> Self {
        Self {
            flash: pattern(flash_len, 0x5A),
            eeprom: pattern(512, 0xA5),
            manufacturer,
            device,
            voltages: [12_600, 12_100, 20_200],
            part_number: [0x56, 0x04, 0x42, 0x68, b'A', b'C'],
            erase_result: id::EXIT_WORKER_FUNCTION,
            split_erase_reply: false,
            upload_result: 0x00,
            bootstrap_status: 0x00,
            uploads: Vec::new(),
            exits: Vec::new(),
        }
    }

    fn worker(payload: &[u8]) -> Option<WorkerFunction> {
        let id = *payload.first()?;
        [
            WorkerFunction::PartNumberRead,
            WorkerFunction::FlashID,
            WorkerFunction::FlashRead,
            WorkerFunction::FlashErase,
            WorkerFunction::FlashWrite,
            WorkerFunction::VerifyFlashChecksum,
            WorkerFunction::EEPROMRead,
            WorkerFunction::EEPROMWrite,
        ]
        .into_iter()
        .find(|w| w.id() == id)
    }

    /// Replies the scanner and ECU send for one host packet.
    pub fn respond(&mut self, packet: &Packet) -> Vec<Packet> {
        match (packet.bus, packet.command, packet.mode) {
            (Bus::Usb, Command::Request, request_mode::ALL_VOLTS) => {
                let [b, v, p] = self.voltages;
                vec![volts(b, v, p)]
            },
            (Bus::Usb, Command::Settings, settings_mode::SET_PROG_VOLT) => {
                vec![prog_volt(packet.payload[0])]
            },
            (Bus::Usb, Command::Debug, debug_mode::INIT_BOOTSTRAP_MODE) => vec![
                rx(&[id::BOOTSTRAP_BAUDRATE_SET]),
                usb(
                    Command::Debug,
                    debug_mode::INIT_BOOTSTRAP_MODE,
                    vec![self.bootstrap_status],
                ),
            ],
            (Bus::Usb, Command::Debug, debug_mode::UPLOAD_WORKER_FUNCTION) => {
                if let Some(worker) = Self::worker(&packet.payload) {
                    self.uploads.push(worker);
                }
                vec![usb(
                    Command::Debug,
                    debug_mode::UPLOAD_WORKER_FUNCTION,
                    vec![self.upload_result],
                )]
            },
            (Bus::Usb, Command::Debug, debug_mode::START_WORKER_FUNCTION) => {
                self.start(Self::worker(&packet.payload))
            },
            (Bus::Usb, Command::Debug, debug_mode::EXIT_WORKER_FUNCTION) => {
                self.exits.push(packet.payload[0]);
                vec![rx(&[id::EXIT_WORKER_FUNCTION])]
            },
            (Bus::Pcm, Command::MsgTx, _) => self.block(&packet.payload),
            _ => Vec::new(),
        }
    }

    fn start(&mut self, worker: Option<WorkerFunction>) -> Vec<Packet> {
        let start = id::START_WORKER_FUNCTION;
        match worker {
            Some(WorkerFunction::PartNumberRead) => {
                let mut sci = vec![0xFF; 30];
                sci[0] = start;
                sci[1..7].copy_from_slice(&self.part_number);
                vec![rx(&sci)]
            },
            Some(WorkerFunction::FlashID) => vec![
                rx(&[start, self.manufacturer, self.device]),
                prog_volt(0x00),
            ],
            Some(WorkerFunction::FlashErase) => {
                if self.erase_result != id::EXIT_WORKER_FUNCTION {
                    return vec![rx(&[start, self.erase_result])];
                }
                self.flash.fill(0xFF);
                if self.split_erase_reply {
                    return vec![
                        rx(&[start]),
                        rx(&[id::EXIT_WORKER_FUNCTION]),
                        prog_volt(0x00),
                    ];
                }
                vec![rx(&[start, self.erase_result]), prog_volt(0x00)]
            },
            Some(_) => vec![rx(&[start])],
            None => Vec::new(),
        }
    }

    fn block(&mut self, payload: &[u8]) -> Vec<Packet> {
        let Some((&op, rest)) = payload.split_first() else {
            return Vec::new();
        };
        let (offset_len, response) = match op {
            opcode::FLASH_READ => (3, id::FLASH_BLOCK_READ),
            opcode::FLASH_WRITE => (3, id::FLASH_BLOCK_WRITE),
            opcode::EEPROM_READ => (2, id::EEPROM_BLOCK_READ),
            opcode::EEPROM_WRITE => (2, id::EEPROM_BLOCK_WRITE),
            _ => return Vec::new(),
        };
        let offset = rest[..offset_len]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        let len = usize::from(u16::from_be_bytes([rest[offset_len], rest[offset_len + 1]]));
        let data = &rest[offset_len + 2..];

        let memory = if offset_len == 3 {
            &mut self.flash
        } else {
            &mut self.eeprom
        };
        let echoed = match op {
            opcode::FLASH_WRITE | opcode::EEPROM_WRITE => {
                memory[offset..offset + len].copy_from_slice(data);
                data.to_vec()
            },
            _ => memory[offset..offset + len].to_vec(),
        };

        let mut sci = vec![response];
        sci.extend_from_slice(&rest[..offset_len + 2]);
        sci.extend_from_slice(&echoed);
        vec![rx(&sci)]
    }
}
