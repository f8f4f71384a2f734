//! Packet data model shared with the scanner firmware.
//!
//! A [`Packet`] is the atomic unit exchanged with the scanner: a bus id, a
//! command, a command-specific mode byte and a payload. The payload is only
//! meaningful in the context of `(bus, command, mode)`, so consumers must
//! check its length before indexing into it.

use std::fmt;

/// Bus the packet is addressed to or received from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Bus {
    /// The scanner itself (settings, measurements, debug functions).
    Usb = 0x00,
    /// SCI-bus, engine controller.
    Pcm = 0x02,
    /// SCI-bus, transmission controller.
    Tcm = 0x03,
}

impl Bus {
    /// Whether this bus carries SCI traffic.
    pub fn is_sci(self) -> bool {
        matches!(self, Self::Pcm | Self::Tcm)
    }
}

impl TryFrom<u8> for Bus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(Self::Usb),
            0x02 => Ok(Self::Pcm),
            0x03 => Ok(Self::Tcm),
            other => Err(other),
        }
    }
}

/// Packet command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Change scanner settings.
    Settings = 0x03,
    /// Request a measurement or value from the scanner.
    Request = 0x04,
    /// Scanner reply to a request.
    Response = 0x05,
    /// Transmit a message on a bus.
    MsgTx = 0x06,
    /// Message received from a bus.
    MsgRx = 0x07,
    /// Debug functions (bootstrap, worker functions).
    Debug = 0x0E,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x03 => Ok(Self::Settings),
            0x04 => Ok(Self::Request),
            0x05 => Ok(Self::Response),
            0x06 => Ok(Self::MsgTx),
            0x07 => Ok(Self::MsgRx),
            0x0E => Ok(Self::Debug),
            other => Err(other),
        }
    }
}

/// Mode bytes for [`Command::Request`] and [`Command::Response`].
pub mod request_mode {
    /// Battery, bootstrap and programming voltages.
    pub const ALL_VOLTS: u8 = 0x1A;
}

/// Mode bytes for [`Command::Settings`].
pub mod settings_mode {
    /// Apply or remove VBB/VPP on the SCI-RX pin.
    pub const SET_PROG_VOLT: u8 = 0x0B;
}

/// Mode bytes for [`Command::Debug`].
pub mod debug_mode {
    /// Run the bootloader handshake.
    pub const INIT_BOOTSTRAP_MODE: u8 = 0x12;
    /// Upload a worker function into ECU RAM.
    pub const UPLOAD_WORKER_FUNCTION: u8 = 0x13;
    /// Start the uploaded worker function.
    pub const START_WORKER_FUNCTION: u8 = 0x14;
    /// Exit the running worker function.
    pub const EXIT_WORKER_FUNCTION: u8 = 0x15;
}

/// Mode bytes for [`Command::MsgTx`].
pub mod msg_tx_mode {
    /// Send a message once.
    pub const SINGLE: u8 = 0x02;
    /// Send a message once while programming voltage is applied.
    pub const SINGLE_VPP: u8 = 0x82;
}

/// Programming voltage selector carried by a `SetProgVolt` payload.
pub mod prog_volt {
    /// Remove VBB and VPP.
    pub const OFF: u8 = 0x00;
    /// Apply VPP (20 V).
    pub const VPP: u8 = 0x40;
    /// Apply VBB (12 V).
    pub const VBB: u8 = 0x80;

    /// Status line for a `SetProgVolt` notification.
    pub fn describe(selector: u8) -> Option<&'static str> {
        if selector & VBB != 0 {
            Some("Apply VBB (12V) to SCI-RX pin.")
        } else if selector & VPP != 0 {
            Some("Apply VPP (20V) to SCI-RX pin.")
        } else if selector == OFF {
            Some("VBB/VPP removed from SCI-RX pin.")
        } else {
            None
        }
    }
}

/// A packet exchanged with the scanner.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Target or source bus.
    pub bus: Bus,
    /// Command.
    pub command: Command,
    /// Mode byte, meaning depends on `command`.
    pub mode: u8,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet.
    pub fn new(bus: Bus, command: Command, mode: u8, payload: Vec<u8>) -> Self {
        Self {
            bus,
            command,
            mode,
            payload,
        }
    }

    /// Ask the scanner for all voltage measurements.
    pub fn request_voltages() -> Self {
        Self::new(
            Bus::Usb,
            Command::Request,
            request_mode::ALL_VOLTS,
            Vec::new(),
        )
    }

    /// Apply or remove programming voltage on the SCI-RX pin.
    pub fn set_prog_volt(selector: u8) -> Self {
        Self::new(
            Bus::Usb,
            Command::Settings,
            settings_mode::SET_PROG_VOLT,
            vec![selector],
        )
    }

    /// Run the bootloader handshake for a bootloader and flash chip index.
    pub fn init_bootstrap(bootloader: u8, flash_chip: u8) -> Self {
        Self::debug(debug_mode::INIT_BOOTSTRAP_MODE, bootloader, flash_chip)
    }

    /// Upload a worker function.
    pub fn upload_worker(worker: u8, flash_chip: u8) -> Self {
        Self::debug(debug_mode::UPLOAD_WORKER_FUNCTION, worker, flash_chip)
    }

    /// Start the uploaded worker function.
    pub fn start_worker(worker: u8, flash_chip: u8) -> Self {
        Self::debug(debug_mode::START_WORKER_FUNCTION, worker, flash_chip)
    }

    /// Exit the running worker function.
    pub fn exit_worker(worker: u8, flash_chip: u8) -> Self {
        Self::debug(debug_mode::EXIT_WORKER_FUNCTION, worker, flash_chip)
    }

    /// Send an SCI message to the engine controller once.
    pub fn pcm_message(payload: Vec<u8>) -> Self {
        Self::new(Bus::Pcm, Command::MsgTx, msg_tx_mode::SINGLE, payload)
    }

    /// Send an SCI message to the engine controller with VPP applied.
    pub fn pcm_message_vpp(payload: Vec<u8>) -> Self {
        Self::new(Bus::Pcm, Command::MsgTx, msg_tx_mode::SINGLE_VPP, payload)
    }

    fn debug(mode: u8, function: u8, flash_chip: u8) -> Self {
        Self::new(Bus::Usb, Command::Debug, mode, vec![function, flash_chip])
    }

    /// Whether this is a scanner reply for the given command and mode.
    ///
    /// Replies to requests come back as [`Command::Response`]; settings and
    /// debug replies echo their own command.
    pub fn is_usb(&self, command: Command, mode: u8) -> bool {
        self.bus == Bus::Usb && self.command == command && self.mode == mode
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet {{ bus: {:?}, command: {:?}, mode: {:#04x}, payload: [",
            self.bus, self.command, self.mode
        )?;
        for (i, byte) in self.payload.iter().take(16).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        if self.payload.len() > 16 {
            write!(f, " .. +{}", self.payload.len() - 16)?;
        }
        f.write_str("] }")
    }
}
