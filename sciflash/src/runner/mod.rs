//! Session driver.
//!
//! [`SessionRunner`] owns the transport, the event queue, the timers and
//! the dump files. It feeds events to a [`Session`] in arrival order and
//! carries out the effects it returns. Packets arrive on the event queue
//! from a [`LinkReader`] thread; timers are polled between receives.
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> sciflash::Result<()> {
//! use sciflash::port::{NativePort, Port};
//! use sciflash::runner::{LinkTransport, NoopObserver, SessionRunner, spawn_link_reader};
//! use sciflash::session::{Operation, Session, SessionConfig};
//! use sciflash::target::Bootloader;
//!
//! let port = NativePort::open_simple("/dev/ttyACM0", 250_000)?;
//! let mut runner = SessionRunner::new(LinkTransport::new(port.try_clone_port()?));
//! let _reader = spawn_link_reader(port, runner.sender());
//!
//! let config = SessionConfig::new(Operation::ReadEeprom, Bootloader::Sbec3a)
//!     .with_output("eeprom.bin");
//! let report = runner.run(Session::new(config)?, &mut NoopObserver)?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

pub mod bootstrap;
pub mod transport;

use crate::error::{Error, Result};
use crate::image::DumpFile;
use crate::session::{
    AbortReason, Effect, Event, Outcome, Progress, Region, Scheduler, Session,
};
use crate::target::flash::FlashChip;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

pub use bootstrap::{BootstrapOutcome, Operator};
pub use transport::{LinkReader, LinkTransport, Transport, spawn_link_reader};

/// Longest wait between checks for an interrupt request.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Process-wide claim on the scanner link.
///
/// Only one session or bootstrap sequence may drive the ECU at a time.
#[derive(Debug)]
pub struct SessionGuard(());

impl SessionGuard {
    /// Claim the link, or fail with [`Error::Busy`].
    pub fn acquire() -> Result<Self> {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(Self(()))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Receives what a running session reports.
pub trait SessionObserver {
    /// A status line.
    fn status(&mut self, _line: &str) {}

    /// Transfer progress.
    fn progress(&mut self, _progress: &Progress) {}

    /// The operator must cycle the key before starting the engine.
    fn key_cycle_required(&mut self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Result of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// How the session ended.
    pub outcome: Outcome,
    /// Flash chip in use at the end.
    pub flash_chip: Option<FlashChip>,
    /// Part number, if one was read.
    pub part_number: Option<String>,
}

/// Drives sessions over a transport.
pub struct SessionRunner<T: Transport> {
    transport: T,
    sender: Sender<Event>,
    events: Receiver<Event>,
    pending: VecDeque<Event>,
    scheduler: Scheduler,
    dumps: HashMap<Region, DumpFile>,
}

impl<T: Transport> SessionRunner<T> {
    /// Runner sending through `transport`.
    pub fn new(transport: T) -> Self {
        let (sender, events) = mpsc::channel();
        Self {
            transport,
            sender,
            events,
            pending: VecDeque::new(),
            scheduler: Scheduler::default(),
            dumps: HashMap::new(),
        }
    }

    /// Event queue handle for the link reader.
    pub fn sender(&self) -> Sender<Event> {
        self.sender.clone()
    }

    /// Handle that stops the running session when it sends
    /// [`Event::Cancel`].
    pub fn canceller(&self) -> Sender<Event> {
        self.sender.clone()
    }

    /// Drop events queued before a session starts, such as late replies to
    /// the previous session's cleanup or a cancel nobody consumed.
    fn discard_queued(&mut self) {
        self.pending.clear();
        let stale = self.events.try_iter().count();
        if stale > 0 {
            debug!("Discarded {stale} stale event(s)");
        }
    }

    /// Run `session` to completion.
    ///
    /// Events queued before the call are discarded; cancel a running
    /// session through [`SessionRunner::canceller`] from another thread.
    pub fn run(
        &mut self,
        mut session: Session,
        observer: &mut dyn SessionObserver,
    ) -> Result<SessionReport> {
        let _guard = SessionGuard::acquire()?;
        self.scheduler = Scheduler::new(session.config().timing.next_request);
        self.discard_queued();
        self.dumps.clear();

        self.apply(&mut session, Event::Started, observer);
        while !session.is_finished() {
            if crate::is_interrupted_requested() {
                self.apply(&mut session, Event::Cancel, observer);
                break;
            }

            if let Some(event) = self.pending.pop_front() {
                self.apply(&mut session, event, observer);
                continue;
            }

            let now = Instant::now();
            let expired = self.scheduler.expired(now);
            if !expired.is_empty() {
                for event in expired {
                    self.apply(&mut session, event, observer);
                }
                continue;
            }

            let wait = self
                .scheduler
                .next_deadline()
                .map_or(POLL_INTERVAL, |at| at.saturating_duration_since(now))
                .min(POLL_INTERVAL);
            match self.events.recv_timeout(wait) {
                Ok(event) => {
                    if matches!(event, Event::Packet(_)) {
                        self.scheduler.on_packet(Instant::now());
                    }
                    self.apply(&mut session, event, observer);
                },
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {},
            }
        }

        self.dumps.clear();
        let outcome = session
            .outcome()
            .cloned()
            .ok_or_else(|| Error::Protocol("session ended without an outcome".into()))?;
        Ok(SessionReport {
            outcome,
            flash_chip: session.flash_chip(),
            part_number: session.part_number().map(str::to_string),
        })
    }

    fn apply(&mut self, session: &mut Session, event: Event, observer: &mut dyn SessionObserver) {
        let mut effects: VecDeque<Effect> = session.handle(event).into();
        while let Some(effect) = effects.pop_front() {
            if let Err(reason) = self.perform(effect, observer) {
                effects.clear();
                effects.extend(session.fail(reason));
            }
        }
    }

    fn perform(
        &mut self,
        effect: Effect,
        observer: &mut dyn SessionObserver,
    ) -> std::result::Result<(), AbortReason> {
        match effect {
            Effect::Send(request) => {
                if let Err(e) = self.transport.send(&request.packet) {
                    warn!("Failed to send request #{}: {e}", request.id.0);
                    self.pending.push_back(Event::TransmitTimeout {
                        request: request.id,
                    });
                }
            },
            Effect::ArmNextRequest => self.scheduler.arm_next_request(Instant::now()),
            Effect::ArmReceiveTimeout { request, after } => {
                self.scheduler.arm_receive(request, after, Instant::now());
            },
            Effect::DisarmReceiveTimeout => self.scheduler.disarm_receive(),
            Effect::CreateDump(region, path) => {
                let file = DumpFile::create(&path).map_err(|e| {
                    AbortReason::DumpFailed(format!("{}: {e}", path.display()))
                })?;
                self.dumps.insert(region, file);
            },
            Effect::AppendDump(region, data) => {
                if let Some(file) = self.dumps.get_mut(&region) {
                    file.append(&data).map_err(|e| {
                        AbortReason::DumpFailed(format!("{}: {e}", file.path().display()))
                    })?;
                }
            },
            Effect::Status(line) => observer.status(&line),
            Effect::Progress(progress) => observer.progress(&progress),
            Effect::KeyCycleRequired => observer.key_cycle_required(),
            Effect::Finished(outcome) => debug!("Session outcome: {outcome:?}"),
        }
        Ok(())
    }
}
