//! # sciflash
//!
//! A library for reprogramming SBEC3 and JTEC engine controllers in
//! bootstrap mode through an SCI-bus scanner.
//!
//! The scanner is a USB serial device that relays SCI-bus traffic and runs
//! the bootloader handshake. Once the ECU is in bootstrap mode, the host
//! uploads small worker functions into ECU RAM and drives them to read,
//! erase and write flash and EEPROM in 512-byte blocks.
//!
//! - [`session`]: the pure session state machine
//! - [`runner`]: the I/O driver, bootstrap entry and link reader
//! - [`protocol`]: packet model, wire framing and SCI reply classification
//! - [`target`]: bootloader and flash chip catalogs
//! - [`image`]: flash/EEPROM images and dump files
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: `Serialize` for discovered ports
//!
//! ## Example
//!
//! ```rust,no_run
//! use sciflash::session::{Operation, Session, SessionConfig};
//! use sciflash::target::{Bootloader, FlashChip};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new(Operation::ReadFlash, Bootloader::Sbec3a)
//!         .with_flash_chip(Some(FlashChip::N28F020))
//!         .with_output("flash.bin");
//!     let session = Session::new(config)?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         use sciflash::port::{NativePort, Port};
//!         use sciflash::runner::{LinkTransport, NoopObserver, SessionRunner, spawn_link_reader};
//!
//!         let port = NativePort::open_simple("/dev/ttyACM0", 250_000)?;
//!         let mut runner = SessionRunner::new(LinkTransport::new(port.try_clone_port()?));
//!         let _reader = spawn_link_reader(port, runner.sender());
//!         let report = runner.run(session, &mut NoopObserver)?;
//!         println!("{:?}", report.outcome);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by the session runner.
///
/// The checker should return `true` when the current session should be
/// cancelled (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    host::{auto_detect_port, discover_ports, discover_scanner_ports},
    image::{DumpFile, EepromImage, FlashImage},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Bus, Command, Packet},
    runner::{
        BootstrapOutcome, LinkTransport, NoopObserver, Operator, SessionObserver, SessionReport,
        SessionRunner, Transport,
    },
    session::{AbortReason, EcuState, Operation, Outcome, Session, SessionConfig, Task},
    target::{Bootloader, FlashChip},
};
