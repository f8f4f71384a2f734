//! Operator-driven bootstrap mode entry.
//!
//! Before any session the ECU has to be started in bootstrap mode: the
//! scanner applies VBB to the SCI-RX pin while the ignition comes on, then
//! runs the bootloader handshake and reports a [`BootloaderStatus`].

use crate::error::{Error, Result};
use crate::protocol::packet::{Command, Packet, debug_mode, prog_volt, settings_mode};
use crate::protocol::sci::{BootloaderStatus, describe_notice, sci_bytes};
use crate::runner::{POLL_INTERVAL, SessionGuard, SessionRunner, Transport};
use crate::session::Event;
use crate::target::bootloader::Bootloader;
use crate::target::flash::FlashChip;
use log::{debug, info};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

/// How long the scanner may take to finish the handshake.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// The person at the vehicle.
pub trait Operator {
    /// Ask for an action; `false` cancels.
    fn confirm(&mut self, prompt: &str) -> bool;

    /// A status line.
    fn status(&mut self, _line: &str) {}
}

/// How the bootstrap sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The ECU is in bootstrap mode.
    Ready,
    /// The operator declined a step or interrupted.
    Cancelled,
    /// The scanner reported a failed handshake.
    Failed(BootloaderStatus),
}

impl<T: Transport> SessionRunner<T> {
    /// Put the ECU into bootstrap mode.
    pub fn bootstrap(
        &mut self,
        bootloader: Bootloader,
        flash_chip: Option<FlashChip>,
        timeout: Duration,
        operator: &mut dyn Operator,
    ) -> Result<BootstrapOutcome> {
        let _guard = SessionGuard::acquire()?;
        info!("Bootstrapping ECU with the {bootloader} bootloader");

        if !operator.confirm("Turn key to OFF/LOCKED position. Wait at least 10 seconds afterwards.") {
            return self.abandon_bootstrap(operator);
        }
        self.transport.send(&Packet::set_prog_volt(prog_volt::VBB))?;

        if !operator.confirm("Turn key to RUN position. Do not start the engine.") {
            return self.abandon_bootstrap(operator);
        }
        self.transport.send(&Packet::set_prog_volt(prog_volt::OFF))?;

        let chip = flash_chip.map_or(0, FlashChip::index);
        self.transport
            .send(&Packet::init_bootstrap(bootloader.id(), chip))?;

        let deadline = Instant::now() + timeout;
        loop {
            if crate::is_interrupted_requested() {
                return self.abandon_bootstrap(operator);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(
                    "no bootstrap status from the scanner".to_string(),
                ));
            }

            let packet = match self.events.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok(Event::Packet(packet)) => packet,
                Ok(Event::Cancel) => return self.abandon_bootstrap(operator),
                Ok(_) | Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    continue;
                },
            };

            if packet.is_usb(Command::Debug, debug_mode::INIT_BOOTSTRAP_MODE) {
                let Some(&code) = packet.payload.first() else {
                    continue;
                };
                let status = BootloaderStatus::from_code(code);
                debug!("Bootloader status {code:#04x}: {status}");
                if status.is_ok() {
                    operator.status("Bootstrap mode initialized.");
                    return Ok(BootstrapOutcome::Ready);
                }
                operator.status(&format!("Bootstrap failed: {status}."));
                return Ok(BootstrapOutcome::Failed(status));
            }

            if packet.is_usb(Command::Settings, settings_mode::SET_PROG_VOLT) {
                if let Some(line) = packet.payload.first().copied().and_then(prog_volt::describe) {
                    operator.status(line);
                }
            } else if let Some(line) = sci_bytes(&packet).and_then(describe_notice) {
                operator.status(&line);
            }
        }
    }

    fn abandon_bootstrap(&mut self, operator: &mut dyn Operator) -> Result<BootstrapOutcome> {
        self.transport.send(&Packet::set_prog_volt(prog_volt::OFF))?;
        operator.status("ECU bootstrapping is cancelled.");
        Ok(BootstrapOutcome::Cancelled)
    }
}
