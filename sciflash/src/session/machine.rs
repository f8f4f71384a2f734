//! The session state machine.

use crate::error::Result;
use crate::image::EEPROM_SIZE;
use crate::protocol::packet::{
    Bus, Command, Packet, debug_mode, prog_volt, request_mode, settings_mode,
};
use crate::protocol::sci::{
    self, BLOCK_SIZE, BootloaderStatus, ErrorStatus, UploadResult, id, sci_bytes,
};
use crate::session::outcome::{AbortReason, EcuState, Outcome};
use crate::session::task::Task;
use crate::session::transfer::{BlockResponse, BlockTransfer, Direction, Progress, Region};
use crate::session::voltage::VoltageReading;
use crate::session::worker::{ActiveWorker, WorkerFunction, WorkerStage, parse_part_number};
use crate::session::{Effect, Event, Operation, Request, RequestId, SessionConfig};
use crate::target::flash::{FlashChip, FlashManufacturer};
use log::{debug, info, trace, warn};
use std::path::PathBuf;

/// Reply the session is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Voltages,
    Upload(WorkerFunction),
    Start(WorkerFunction),
    Exit(WorkerFunction),
    Block,
    ProgVoltRemoved,
}

#[derive(Debug, Clone)]
struct Outstanding {
    id: RequestId,
    expect: Expect,
    /// Re-sent on timeout; `None` for pure waits.
    packet: Option<Packet>,
}

#[derive(Debug, Clone)]
enum Turn {
    Idle,
    Ready,
    Waiting(Outstanding),
    Done,
}

/// A bootstrap reprogramming session.
///
/// Feed it events with [`Session::handle`] and carry out the returned
/// effects in order.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    task: Task,
    flash_chip: Option<FlashChip>,
    worker: Option<ActiveWorker>,
    transfer: Option<BlockTransfer>,
    turn: Turn,
    next_id: u32,
    rx_retries: u8,
    tx_retries: u8,
    erase_ok: bool,
    uploaded_any: bool,
    ecu: EcuState,
    part_number: Option<String>,
    outcome: Option<Outcome>,
}

impl Session {
    /// Create a session after validating its configuration.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            flash_chip: config.flash_chip,
            config,
            task: Task::None,
            worker: None,
            transfer: None,
            turn: Turn::Idle,
            next_id: 0,
            rx_retries: 0,
            tx_retries: 0,
            erase_ok: false,
            uploaded_any: false,
            ecu: EcuState::Intact,
            part_number: None,
            outcome: None,
        })
    }

    /// Current phase.
    pub fn task(&self) -> Task {
        self.task
    }

    /// Session parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Selected or detected flash chip.
    pub fn flash_chip(&self) -> Option<FlashChip> {
        self.flash_chip
    }

    /// Part number read from the ECU.
    pub fn part_number(&self) -> Option<&str> {
        self.part_number.as_deref()
    }

    /// Worker function loaded in the ECU.
    pub fn worker(&self) -> Option<ActiveWorker> {
        self.worker
    }

    /// Progress of the current block transfer.
    pub fn progress(&self) -> Option<Progress> {
        self.transfer.as_ref().map(BlockTransfer::progress)
    }

    /// Consecutive receive timeouts for the outstanding request.
    pub fn receive_retries(&self) -> u8 {
        self.rx_retries
    }

    /// Terminal outcome, once finished.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Whether the session has ended.
    pub fn is_finished(&self) -> bool {
        matches!(self.turn, Turn::Done)
    }

    /// Abort on a failure detected outside the machine, such as a dump
    /// file that cannot be written.
    pub fn fail(&mut self, reason: AbortReason) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_finished() {
            self.abort(reason, &mut fx);
        }
        fx
    }

    /// Process one event.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.is_finished() {
            trace!("Session finished, ignoring {event:?}");
            return fx;
        }

        match event {
            Event::Started => self.start(&mut fx),
            Event::Packet(packet) => self.on_packet(&packet, &mut fx),
            Event::NextRequestTick => {
                if matches!(self.turn, Turn::Ready) {
                    self.issue(&mut fx);
                }
            },
            Event::ReceiveTimeout { request } => self.on_receive_timeout(request, &mut fx),
            Event::TransmitTimeout { request } => self.on_transmit_timeout(request, &mut fx),
            Event::Cancel => self.cancel(&mut fx),
        }
        fx
    }

    // ---- bookkeeping -------------------------------------------------

    fn status(fx: &mut Vec<Effect>, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        fx.push(Effect::Status(line));
    }

    fn expecting(&self) -> Option<Expect> {
        match &self.turn {
            Turn::Waiting(out) => Some(out.expect),
            _ => None,
        }
    }

    fn chip_index(&self) -> u8 {
        self.flash_chip.map_or(0, FlashChip::index)
    }

    fn is_jtec(&self) -> bool {
        self.config.bootloader.is_jtec()
    }

    fn announce_steps(&self) -> bool {
        self.config.operation == Operation::WriteFlash
    }

    fn allocate_id(&mut self) -> RequestId {
        self.next_id = self.next_id.wrapping_add(1);
        RequestId(self.next_id)
    }

    fn send(&mut self, packet: Packet, expect: Expect, fx: &mut Vec<Effect>) {
        let id = self.allocate_id();
        debug!("TX #{} {:?} during {}: {packet:?}", id.0, expect, self.task);
        fx.push(Effect::Send(Request {
            id,
            packet: packet.clone(),
        }));
        fx.push(Effect::ArmReceiveTimeout {
            request: id,
            after: self.config.timing.receive_timeout(self.task),
        });
        self.turn = Turn::Waiting(Outstanding {
            id,
            expect,
            packet: Some(packet),
        });
    }

    fn wait(&mut self, expect: Expect, fx: &mut Vec<Effect>) {
        let id = self.allocate_id();
        fx.push(Effect::ArmReceiveTimeout {
            request: id,
            after: self.config.timing.receive_timeout(self.task),
        });
        self.turn = Turn::Waiting(Outstanding {
            id,
            expect,
            packet: None,
        });
    }

    /// Record an accepted response.
    fn accept(&mut self, fx: &mut Vec<Effect>) {
        self.rx_retries = 0;
        self.tx_retries = 0;
        fx.push(Effect::DisarmReceiveTimeout);
    }

    fn ready(&mut self, fx: &mut Vec<Effect>) {
        self.turn = Turn::Ready;
        fx.push(Effect::ArmNextRequest);
    }

    fn finish(&mut self, outcome: Outcome, fx: &mut Vec<Effect>) {
        debug!("Session finished: {outcome:?}");
        self.turn = Turn::Done;
        self.outcome = Some(outcome.clone());
        fx.push(Effect::DisarmReceiveTimeout);
        fx.push(Effect::Finished(outcome));
    }

    fn abort(&mut self, reason: AbortReason, fx: &mut Vec<Effect>) {
        warn!("Session aborted during {}: {reason}", self.task);
        Self::status(fx, reason.to_string());
        self.cleanup(fx);
        let ecu = self.ecu;
        self.finish(Outcome::Aborted { reason, ecu }, fx);
    }

    fn cancel(&mut self, fx: &mut Vec<Effect>) {
        Self::status(fx, "Current task is cancelled.");
        self.cleanup(fx);
        let ecu = self.ecu;
        self.finish(Outcome::Cancelled { ecu }, fx);
    }

    /// Exit a running resident worker so the ECU stops serving blocks.
    fn cleanup(&mut self, fx: &mut Vec<Effect>) {
        if let Some(worker) = self.worker.take().filter(ActiveWorker::needs_exit) {
            let id = self.allocate_id();
            debug!("Exiting {} on shutdown", worker.function);
            fx.push(Effect::Send(Request {
                id,
                packet: Packet::exit_worker(worker.function.id(), self.chip_index()),
            }));
        }
    }

    // ---- phase transitions -------------------------------------------

    fn start(&mut self, fx: &mut Vec<Effect>) {
        if !matches!(self.turn, Turn::Idle) {
            return;
        }
        Self::status(fx, format!("Bootloader: {}.", self.config.bootloader));
        if let Some(chip) = self.flash_chip {
            Self::status(fx, format!("Flash memory: {chip}."));
        }
        self.enter(self.config.operation.initial_task(), fx);
    }

    fn dump_path(&self, task: Task) -> Option<PathBuf> {
        match task {
            Task::ReadFlashMemory | Task::ReadEEPROM => self.config.output.clone(),
            Task::BackupFlashMemory => Some(self.config.flash_backup_path()),
            Task::BackupEEPROM => Some(self.config.eeprom_backup_path()),
            _ => None,
        }
    }

    fn enter(&mut self, task: Task, fx: &mut Vec<Effect>) {
        debug!("Task {} -> {task}", self.task);
        self.task = task;
        self.transfer = None;

        if task.is_terminal() {
            self.succeed(task, fx);
            return;
        }
        if self.announce_steps() {
            if let Some(title) = task.step_title() {
                Self::status(fx, title);
            }
        }

        if let Some((region, direction)) = task.transfer() {
            let total = match region {
                Region::Flash => self.flash_chip.map_or(0, FlashChip::size),
                Region::Eeprom => EEPROM_SIZE,
            };
            self.transfer = Some(BlockTransfer::new(region, direction, total));
            if direction == Direction::Read {
                if let Some(path) = self.dump_path(task) {
                    fx.push(Effect::CreateDump(region, path));
                }
            }
        }

        if task == Task::DetectFlashMemoryType
            && self.flash_chip.is_some()
            && self.config.operation != Operation::IdentifyFlashChip
        {
            Self::status(fx, "Use selected flash chip.");
            self.after_chip_known(fx);
            return;
        }

        self.ready(fx);
    }

    fn succeed(&mut self, task: Task, fx: &mut Vec<Effect>) {
        if let Some(message) = task.finish_message() {
            Self::status(fx, message);
        }
        if task.requires_key_cycle() {
            Self::status(fx, "Turn key to OFF/LOCKED position.");
            Self::status(fx, "Wait for 5 seconds before starting the engine.");
            fx.push(Effect::KeyCycleRequired);
        }
        self.finish(Outcome::Success(task), fx);
    }

    fn after_chip_known(&mut self, fx: &mut Vec<Effect>) {
        let Some(chip) = self.flash_chip else {
            return;
        };
        if let Some(image) = &self.config.flash_image {
            if !image.fits(chip) {
                let image = image.len();
                self.abort(AbortReason::ImageSizeMismatch { image, chip }, fx);
                return;
            }
        }
        let next = self.backup_or_erase(fx);
        self.enter(next, fx);
    }

    fn backup_or_erase(&self, fx: &mut Vec<Effect>) -> Task {
        if self.config.backup_flash {
            return Task::BackupFlashMemory;
        }
        Self::status(fx, "Step 4. Backup flash memory.");
        Self::status(fx, "Skip flash memory backup.");
        self.after_flash_backup(fx)
    }

    fn after_flash_backup(&self, fx: &mut Vec<Effect>) -> Task {
        if self.config.backup_eeprom && !self.is_jtec() {
            return Task::BackupEEPROM;
        }
        Self::status(fx, "Step 5. Backup EEPROM.");
        Self::status(fx, "Skip EEPROM backup.");
        Task::EraseFlashMemory
    }

    // ---- requests ----------------------------------------------------

    fn issue(&mut self, fx: &mut Vec<Effect>) {
        if self.task == Task::CheckVoltages {
            self.send(Packet::request_voltages(), Expect::Voltages, fx);
            return;
        }
        let Some(needed) = self.task.worker() else {
            return;
        };

        if let Some(active) = self.worker {
            if active.function != needed {
                if active.needs_exit() {
                    let packet = Packet::exit_worker(active.function.id(), self.chip_index());
                    self.send(packet, Expect::Exit(active.function), fx);
                    return;
                }
                self.worker = None;
            }
        }

        match self.worker.map(|w| w.stage) {
            None => {
                Self::status(fx, format!("Upload worker function: {needed}."));
                let packet = Packet::upload_worker(needed.id(), self.chip_index());
                self.send(packet, Expect::Upload(needed), fx);
            },
            Some(WorkerStage::Uploaded) => {
                if needed.is_destructive() {
                    self.ecu = EcuState::Indeterminate;
                }
                let packet = Packet::start_worker(needed.id(), self.chip_index());
                self.send(packet, Expect::Start(needed), fx);
            },
            Some(WorkerStage::Running) => self.issue_running(needed, fx),
        }
    }

    fn issue_running(&mut self, worker: WorkerFunction, fx: &mut Vec<Effect>) {
        let exit = Packet::exit_worker(worker.id(), self.chip_index());
        let Some(transfer) = self.transfer.as_ref() else {
            // UpdateEEPROM: a single exchange with no blocks.
            self.send(exit, Expect::Exit(worker), fx);
            return;
        };
        if transfer.is_complete() {
            self.send(exit, Expect::Exit(worker), fx);
            return;
        }

        let cursor = transfer.cursor();
        let region = transfer.region();
        let direction = transfer.direction();
        let data: Vec<u8> = match (region, direction) {
            (Region::Flash, Direction::Write) => self
                .config
                .flash_image
                .as_ref()
                .map(|image| image.block(cursor, BLOCK_SIZE).to_vec()),
            (Region::Eeprom, Direction::Write) => self
                .config
                .eeprom_image
                .as_ref()
                .map(|image| image.block(cursor, BLOCK_SIZE).to_vec()),
            _ => None,
        }
        .unwrap_or_default();

        let Some(payload) = self.transfer.as_mut().and_then(|t| t.request(&data)) else {
            return;
        };
        let packet = match (region, direction) {
            (Region::Flash, Direction::Write) => Packet::pcm_message_vpp(payload),
            _ => Packet::pcm_message(payload),
        };
        self.send(packet, Expect::Block, fx);
    }

    // ---- responses ---------------------------------------------------

    fn on_packet(&mut self, packet: &Packet, fx: &mut Vec<Effect>) {
        if packet.bus == Bus::Usb {
            self.on_scanner_packet(packet, fx);
            return;
        }
        let Some(sci) = sci_bytes(packet) else {
            return;
        };
        let expect = self.expecting();

        match sci[0] {
            id::START_WORKER_FUNCTION => {
                if let Some(Expect::Start(worker)) = expect {
                    self.on_start(worker, sci, fx);
                }
            },
            id::EXIT_WORKER_FUNCTION => match expect {
                Some(
                    Expect::Start(WorkerFunction::FlashErase)
                    | Expect::Exit(WorkerFunction::FlashErase),
                ) => self.on_erase_ok(fx),
                Some(Expect::Exit(worker)) => self.on_exit(worker, fx),
                _ => {},
            },
            id::FLASH_BLOCK_WRITE
            | id::FLASH_BLOCK_READ
            | id::EEPROM_BLOCK_WRITE
            | id::EEPROM_BLOCK_READ => {
                if expect == Some(Expect::Block) {
                    self.on_block(sci, fx);
                }
            },
            id::UPLOAD_WORKER_FUNCTION_RESULT => {
                debug!("Worker upload echo: {sci:02X?}");
            },
            code @ (id::BLOCK_SIZE_ERROR | id::OFFSET_ERROR) if self.uploaded_any => {
                self.abort(AbortReason::BlockRejected(ErrorStatus::from_status(code)), fx);
            },
            code @ (id::ERASE_ERROR_81 | id::ERASE_ERROR_82 | id::ERASE_ERROR_83)
                if self.uploaded_any =>
            {
                self.abort(AbortReason::EraseFailed(code), fx);
            },
            _ => {
                if let Some(line) = sci::describe_notice(sci) {
                    Self::status(fx, line);
                } else {
                    trace!("Ignoring SCI reply {sci:02X?}");
                }
            },
        }
    }

    fn on_scanner_packet(&mut self, packet: &Packet, fx: &mut Vec<Effect>) {
        let expect = self.expecting();
        match (packet.command, packet.mode) {
            (Command::Response, request_mode::ALL_VOLTS) => {
                if expect == Some(Expect::Voltages) {
                    self.on_voltages(&packet.payload, fx);
                }
            },
            (Command::Settings, settings_mode::SET_PROG_VOLT) => {
                self.on_prog_volt(&packet.payload, fx);
            },
            (Command::Debug, debug_mode::UPLOAD_WORKER_FUNCTION) => {
                if let (Some(Expect::Upload(worker)), Some(&code)) = (expect, packet.payload.first())
                {
                    self.on_upload(worker, code, fx);
                }
            },
            (Command::Debug, debug_mode::INIT_BOOTSTRAP_MODE) => {
                if let Some(&code) = packet.payload.first() {
                    Self::status(
                        fx,
                        format!("Bootstrap status: {}.", BootloaderStatus::from_code(code)),
                    );
                }
            },
            _ => trace!("Ignoring scanner packet {packet:?}"),
        }
    }

    fn on_voltages(&mut self, payload: &[u8], fx: &mut Vec<Effect>) {
        let Some(reading) = VoltageReading::parse(payload) else {
            debug!("Short voltage response: {payload:02X?}");
            return;
        };
        for line in reading.lines() {
            Self::status(fx, line);
        }
        let faults = reading.faults();
        if !faults.is_empty() {
            self.abort(AbortReason::VoltageTooLow(faults), fx);
            return;
        }
        Self::status(fx, "All voltages are nominal.");
        self.accept(fx);
        let next = if self.is_jtec() {
            Task::DetectFlashMemoryType
        } else {
            Task::ReadPartNumber
        };
        self.enter(next, fx);
    }

    fn on_prog_volt(&mut self, payload: &[u8], fx: &mut Vec<Effect>) {
        let Some(&selector) = payload.first() else {
            return;
        };
        if let Some(line) = prog_volt::describe(selector) {
            Self::status(fx, line);
        }
        if selector != prog_volt::OFF || self.expecting() != Some(Expect::ProgVoltRemoved) {
            return;
        }
        self.accept(fx);
        match self.task {
            Task::DetectFlashMemoryType => self.after_chip_known(fx),
            Task::EraseFlashMemory if self.erase_ok => self.enter(Task::WriteFlashMemory, fx),
            _ => self.ready(fx),
        }
    }

    fn on_upload(&mut self, worker: WorkerFunction, code: u8, fx: &mut Vec<Effect>) {
        match UploadResult::from_code(code) {
            UploadResult::Ok => {
                Self::status(fx, "Worker function uploaded successfully.");
                self.uploaded_any = true;
                self.worker = Some(ActiveWorker::uploaded(worker));
                self.accept(fx);
                self.ready(fx);
            },
            result => self.abort(AbortReason::UploadFailed(result), fx),
        }
    }

    fn on_start(&mut self, worker: WorkerFunction, sci: &[u8], fx: &mut Vec<Effect>) {
        match worker {
            WorkerFunction::PartNumberRead => {
                self.part_number = parse_part_number(sci);
                match &self.part_number {
                    Some(part) => Self::status(fx, format!("Part number: {part}")),
                    None => Self::status(fx, "Part number: unknown."),
                }
                self.worker = None;
                self.accept(fx);
                self.enter(Task::DetectFlashMemoryType, fx);
            },
            WorkerFunction::FlashID => {
                let [_, manufacturer, device, ..] = *sci else {
                    return;
                };
                self.worker = None;
                let Some(chip) = FlashChip::identify(manufacturer, device) else {
                    self.abort(
                        AbortReason::UnknownFlashChip {
                            manufacturer,
                            device,
                        },
                        fx,
                    );
                    return;
                };
                if let Some(vendor) = FlashManufacturer::from_id(manufacturer) {
                    Self::status(fx, format!("Flash memory: {vendor} {chip}."));
                }
                self.flash_chip = Some(chip);
                self.accept(fx);
                if self.config.operation == Operation::IdentifyFlashChip {
                    self.finish(Outcome::Success(Task::DetectFlashMemoryType), fx);
                } else {
                    self.wait(Expect::ProgVoltRemoved, fx);
                }
            },
            WorkerFunction::FlashErase => match sci.get(1) {
                None => {
                    // Erase is running; the result follows as a standalone exit packet.
                    Self::status(fx, "Erase flash memory.");
                    self.worker = Some(ActiveWorker {
                        function: worker,
                        stage: WorkerStage::Running,
                    });
                    self.accept(fx);
                    self.wait(Expect::Exit(WorkerFunction::FlashErase), fx);
                },
                Some(&id::EXIT_WORKER_FUNCTION) => self.on_erase_ok(fx),
                Some(&result) => {
                    self.worker = None;
                    self.abort(AbortReason::EraseFailed(result), fx);
                },
            },
            WorkerFunction::FlashRead
            | WorkerFunction::FlashWrite
            | WorkerFunction::EEPROMRead
            | WorkerFunction::EEPROMWrite => {
                let line = match (worker, self.task) {
                    (WorkerFunction::EEPROMWrite, Task::UpdateEEPROM) => "Skip EEPROM update.",
                    (WorkerFunction::FlashRead, _) => "Start flash reading.",
                    (WorkerFunction::FlashWrite, _) => "Start flash writing.",
                    (WorkerFunction::EEPROMRead, _) => "Start EEPROM reading.",
                    _ => "Start EEPROM writing.",
                };
                Self::status(fx, line);
                self.worker = Some(ActiveWorker {
                    function: worker,
                    stage: WorkerStage::Running,
                });
                self.accept(fx);
                self.ready(fx);
            },
            WorkerFunction::VerifyFlashChecksum => {
                Self::status(fx, "Skip flash checksum verification.");
                self.worker = None;
                self.accept(fx);
                let next = if self.is_jtec() {
                    Task::FinishFlashWrite
                } else {
                    Task::UpdateEEPROM
                };
                self.enter(next, fx);
            },
            WorkerFunction::Empty => {},
        }
    }

    fn on_erase_ok(&mut self, fx: &mut Vec<Effect>) {
        Self::status(fx, "Flash erased successfully.");
        self.erase_ok = true;
        self.worker = None;
        self.accept(fx);
        self.wait(Expect::ProgVoltRemoved, fx);
    }

    fn on_exit(&mut self, worker: WorkerFunction, fx: &mut Vec<Effect>) {
        Self::status(fx, format!("Exit {worker}."));
        self.worker = None;
        self.accept(fx);

        let next = match (worker, self.task) {
            (WorkerFunction::FlashRead, Task::BackupFlashMemory) => self.after_flash_backup(fx),
            (WorkerFunction::FlashRead, Task::ReadFlashMemory) => Task::FinishFlashRead,
            (WorkerFunction::FlashWrite, Task::WriteFlashMemory) => Task::VerifyFlashChecksum,
            (WorkerFunction::EEPROMRead, Task::BackupEEPROM) => Task::EraseFlashMemory,
            (WorkerFunction::EEPROMRead, Task::ReadEEPROM) => Task::FinishEEPROMRead,
            (WorkerFunction::EEPROMWrite, Task::UpdateEEPROM) => Task::FinishFlashWrite,
            (WorkerFunction::EEPROMWrite, Task::WriteEEPROM) => Task::FinishEEPROMWrite,
            _ => {
                // Switched away from a worker another phase left running.
                self.ready(fx);
                return;
            },
        };
        self.enter(next, fx);
    }

    fn on_block(&mut self, sci: &[u8], fx: &mut Vec<Effect>) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        match transfer.evaluate(sci) {
            BlockResponse::Accepted(data) => {
                let region = transfer.region();
                let progress = transfer.progress();
                if let Some(data) = data {
                    fx.push(Effect::AppendDump(region, data));
                }
                fx.push(Effect::Progress(progress));
                self.accept(fx);
                self.ready(fx);
            },
            BlockResponse::Stale => {
                debug!("Ignoring stale {} block response", transfer.region());
            },
            BlockResponse::Rejected(status) => {
                self.abort(AbortReason::BlockRejected(status), fx);
            },
            BlockResponse::Ignored => trace!("Ignoring block reply {sci:02X?}"),
        }
    }

    // ---- timeouts ----------------------------------------------------

    fn on_receive_timeout(&mut self, request: RequestId, fx: &mut Vec<Effect>) {
        let Turn::Waiting(out) = &self.turn else {
            return;
        };
        if out.id != request {
            trace!("Ignoring timeout for superseded request #{}", request.0);
            return;
        }
        let (expect, packet) = (out.expect, out.packet.clone());

        if self.rx_retries >= self.config.timing.max_retries {
            let task = self.task;
            self.abort(AbortReason::NoResponse { task }, fx);
            return;
        }
        self.rx_retries += 1;
        warn!(
            "No response during {} (retry {}/{})",
            self.task, self.rx_retries, self.config.timing.max_retries
        );
        match packet {
            Some(packet) => self.send(packet, expect, fx),
            None => self.wait(expect, fx),
        }
    }

    fn on_transmit_timeout(&mut self, request: RequestId, fx: &mut Vec<Effect>) {
        let Turn::Waiting(out) = &self.turn else {
            return;
        };
        if out.id != request {
            return;
        }
        let (expect, packet) = (out.expect, out.packet.clone());

        if self.tx_retries >= self.config.timing.max_retries {
            let task = self.task;
            self.abort(AbortReason::TransmitFailed { task }, fx);
            return;
        }
        self.tx_retries += 1;
        warn!(
            "Transmit failed during {} (retry {}/{})",
            self.task, self.tx_retries, self.config.timing.max_retries
        );
        if let Some(packet) = packet {
            self.send(packet, expect, fx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{EepromImage, FlashImage};
    use crate::protocol::sci::TIMESTAMP_LEN;
    use crate::session::Timing;
    use crate::session::sim::{SimEcu, prog_volt, rx, volts};
    use crate::target::bootloader::Bootloader;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct Trace {
        sent: Vec<Packet>,
        status: Vec<String>,
        dumps: HashMap<Region, (PathBuf, Vec<u8>)>,
        tasks: Vec<Task>,
        key_cycle: bool,
        last_progress: Option<Progress>,
    }

    /// Run a session against a simulated ECU until it finishes.
    fn run(session: &mut Session, ecu: &mut SimEcu) -> Trace {
        let mut trace = Trace::default();
        let mut queue = VecDeque::from([Event::Started]);
        let mut steps = 0;
        while let Some(event) = queue.pop_front() {
            steps += 1;
            assert!(steps < 100_000, "session did not finish");
            for effect in session.handle(event) {
                match effect {
                    Effect::Send(request) => {
                        queue.extend(ecu.respond(&request.packet).into_iter().map(Event::Packet));
                        trace.sent.push(request.packet);
                    },
                    Effect::ArmNextRequest => queue.push_back(Event::NextRequestTick),
                    Effect::CreateDump(region, path) => {
                        trace.dumps.insert(region, (path, Vec::new()));
                    },
                    Effect::AppendDump(region, data) => {
                        trace.dumps.get_mut(&region).unwrap().1.extend(data);
                    },
                    Effect::Status(line) => trace.status.push(line),
                    Effect::Progress(progress) => trace.last_progress = Some(progress),
                    Effect::KeyCycleRequired => trace.key_cycle = true,
                    Effect::ArmReceiveTimeout { .. }
                    | Effect::DisarmReceiveTimeout
                    | Effect::Finished(_) => {},
                }
            }
            if trace.tasks.last() != Some(&session.task()) {
                trace.tasks.push(session.task());
            }
        }
        trace
    }

    fn sent_request_id(fx: &[Effect]) -> RequestId {
        fx.iter()
            .find_map(|effect| match effect {
                Effect::ArmReceiveTimeout { request, .. } => Some(*request),
                _ => None,
            })
            .unwrap()
    }

    fn sends(fx: &[Effect]) -> Vec<&Packet> {
        fx.iter()
            .filter_map(|effect| match effect {
                Effect::Send(request) => Some(&request.packet),
                _ => None,
            })
            .collect()
    }

    fn write_flash_config(image: Vec<u8>, bootloader: Bootloader) -> SessionConfig {
        SessionConfig::new(Operation::WriteFlash, bootloader)
            .with_flash_image(FlashImage::from_bytes(image).unwrap())
            .with_backup_dir("backups")
            .with_backup_stamp(7)
    }

    #[test]
    fn test_read_flash_dumps_whole_chip() {
        let mut ecu = SimEcu::with_chip(0x89, 0xB4, 131_072);
        let config = SessionConfig::new(Operation::ReadFlash, Bootloader::Sbec3a)
            .with_flash_chip(Some(FlashChip::N28F010))
            .with_output("flash.bin");
        let mut session = Session::new(config).unwrap();

        let trace = run(&mut session, &mut ecu);

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Success(Task::FinishFlashRead))
        );
        let (path, data) = &trace.dumps[&Region::Flash];
        assert_eq!(path, &PathBuf::from("flash.bin"));
        assert_eq!(data.len(), 131_072);
        assert_eq!(data, &ecu.flash);
        assert_eq!(trace.last_progress.map(|p| p.percent()), Some(100));
        assert!(!trace.key_cycle);
        assert_eq!(ecu.exits, vec![WorkerFunction::FlashRead.id()]);
    }

    #[test]
    fn test_write_flash_full_sequence() {
        let mut ecu = SimEcu::new();
        let original_flash = ecu.flash.clone();
        let original_eeprom = ecu.eeprom.clone();
        let image: Vec<u8> = (0..262_144u32).map(|i| (i % 251) as u8).collect();
        let mut session = Session::new(write_flash_config(image.clone(), Bootloader::Sbec3a)).unwrap();

        let trace = run(&mut session, &mut ecu);

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Success(Task::FinishFlashWrite))
        );
        assert_eq!(
            trace.tasks,
            vec![
                Task::CheckVoltages,
                Task::ReadPartNumber,
                Task::DetectFlashMemoryType,
                Task::BackupFlashMemory,
                Task::BackupEEPROM,
                Task::EraseFlashMemory,
                Task::WriteFlashMemory,
                Task::VerifyFlashChecksum,
                Task::UpdateEEPROM,
                Task::FinishFlashWrite,
            ]
        );
        assert_eq!(ecu.flash, image);
        assert_eq!(trace.dumps[&Region::Flash].1, original_flash);
        assert_eq!(
            trace.dumps[&Region::Flash].0,
            PathBuf::from("backups/pcm_flash_7.bin")
        );
        assert_eq!(trace.dumps[&Region::Eeprom].1, original_eeprom);
        assert_eq!(session.flash_chip(), Some(FlashChip::N28F020));
        assert_eq!(session.part_number(), Some("56044268AC"));
        assert!(trace.key_cycle);
        assert!(trace.status.iter().any(|s| s == "Flash erased successfully."));
        assert!(trace.status.iter().any(|s| s == "Skip EEPROM update."));
        assert!(trace.status.iter().any(|s| s == "Step 7. Write flash memory."));

        let vpp_blocks = trace
            .sent
            .iter()
            .filter(|p| p.mode == crate::protocol::packet::msg_tx_mode::SINGLE_VPP)
            .count();
        assert_eq!(vpp_blocks, 512);
    }

    #[test]
    fn test_write_flash_without_backups() {
        let mut ecu = SimEcu::new();
        let config = write_flash_config(vec![0x00; 262_144], Bootloader::Sbec3a)
            .with_backups(false, false);
        let mut session = Session::new(config).unwrap();

        let trace = run(&mut session, &mut ecu);

        assert!(session.outcome().unwrap().is_success());
        assert!(trace.dumps.is_empty());
        assert!(trace.status.iter().any(|s| s == "Skip flash memory backup."));
        assert!(trace.status.iter().any(|s| s == "Skip EEPROM backup."));
        assert!(!trace.tasks.contains(&Task::BackupFlashMemory));
    }

    #[test]
    fn test_jtec_write_skips_part_number_and_eeprom() {
        let mut ecu = SimEcu::new();
        let mut session = Session::new(write_flash_config(vec![0x11; 262_144], Bootloader::Jtec)).unwrap();

        let trace = run(&mut session, &mut ecu);

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Success(Task::FinishFlashWrite))
        );
        assert!(!trace.tasks.contains(&Task::ReadPartNumber));
        assert!(!trace.tasks.contains(&Task::BackupEEPROM));
        assert!(!trace.tasks.contains(&Task::UpdateEEPROM));
        assert!(!ecu.uploads.contains(&WorkerFunction::FlashID));
        assert!(!ecu.uploads.contains(&WorkerFunction::EEPROMRead));
        assert_eq!(session.flash_chip(), Some(FlashChip::N28F010Dual));
    }

    #[test]
    fn test_low_voltage_aborts_before_anything_is_uploaded() {
        let mut ecu = SimEcu::new();
        ecu.voltages = [11_000, 12_000, 20_000];
        let mut session = Session::new(write_flash_config(vec![0; 262_144], Bootloader::Sbec3a)).unwrap();

        let trace = run(&mut session, &mut ecu);

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Aborted {
                reason: AbortReason::VoltageTooLow(vec![crate::session::VoltageFault::Battery]),
                ecu: EcuState::Intact,
            })
        );
        assert_eq!(trace.sent.len(), 1);
        assert!(ecu.uploads.is_empty());
        assert!(trace.status.iter().any(|s| s == "Battery voltage: 11.000 V"));
    }

    #[test]
    fn test_erase_failure_leaves_ecu_indeterminate() {
        let mut ecu = SimEcu::new();
        ecu.erase_result = 0x82;
        let config = write_flash_config(vec![0; 262_144], Bootloader::Sbec3a).with_backups(false, false);
        let mut session = Session::new(config).unwrap();

        run(&mut session, &mut ecu);

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Aborted {
                reason: AbortReason::EraseFailed(0x82),
                ecu: EcuState::Indeterminate,
            })
        );
        assert!(!ecu.uploads.contains(&WorkerFunction::FlashWrite));
    }

    #[test]
    fn test_erase_result_in_separate_exit_packet() {
        let mut ecu = SimEcu::new();
        ecu.split_erase_reply = true;
        let image = vec![0x3C; 262_144];
        let config = write_flash_config(image.clone(), Bootloader::Sbec3a).with_backups(false, false);
        let mut session = Session::new(config).unwrap();

        let trace = run(&mut session, &mut ecu);

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Success(Task::FinishFlashWrite))
        );
        assert!(trace.tasks.contains(&Task::WriteFlashMemory));
        assert!(trace.status.iter().any(|s| s == "Flash erased successfully."));
        assert_eq!(ecu.flash, image);

        let erase_starts = trace
            .sent
            .iter()
            .filter(|p| {
                p.mode == debug_mode::START_WORKER_FUNCTION
                    && p.payload.first() == Some(&WorkerFunction::FlashErase.id())
            })
            .count();
        assert_eq!(erase_starts, 1);
    }

    #[test]
    fn test_timeout_while_erasing_does_not_erase_again() {
        let mut ecu = SimEcu::new();
        let config = write_flash_config(vec![0; 262_144], Bootloader::Sbec3a).with_backups(false, false);
        let mut session = Session::new(config).unwrap();
        let mut pending = VecDeque::from([Event::Started]);
        let mut erase_start = None;

        // Drive until the erase start goes out, holding back its replies.
        while erase_start.is_none() {
            let event = pending.pop_front().unwrap();
            let fx = session.handle(event);
            for effect in &fx {
                match effect {
                    Effect::Send(request)
                        if request.packet.mode == debug_mode::START_WORKER_FUNCTION
                            && session.task() == Task::EraseFlashMemory =>
                    {
                        erase_start = Some(sent_request_id(&fx));
                    },
                    Effect::Send(request) => {
                        pending.extend(ecu.respond(&request.packet).into_iter().map(Event::Packet));
                    },
                    Effect::ArmNextRequest => pending.push_back(Event::NextRequestTick),
                    _ => {},
                }
            }
        }

        let fx = session.handle(Event::Packet(rx(&[0x21])));
        assert!(fx.contains(&Effect::Status("Erase flash memory.".into())));
        let waiting = sent_request_id(&fx);
        assert_ne!(Some(waiting), erase_start);

        let fx = session.handle(Event::ReceiveTimeout { request: waiting });
        assert!(sends(&fx).is_empty());
        assert_eq!(session.receive_retries(), 1);

        let fx = session.handle(Event::Packet(rx(&[0x22])));
        assert!(fx.contains(&Effect::Status("Flash erased successfully.".into())));
        assert_eq!(session.task(), Task::EraseFlashMemory);

        session.handle(Event::Packet(prog_volt(0x00)));
        assert_eq!(session.task(), Task::WriteFlashMemory);
        assert_eq!(session.receive_retries(), 0);
    }

    #[test]
    fn test_image_size_must_match_detected_chip() {
        let mut ecu = SimEcu::new();
        let mut session = Session::new(write_flash_config(vec![0; 131_072], Bootloader::Sbec3a)).unwrap();

        run(&mut session, &mut ecu);

        assert!(matches!(
            session.outcome(),
            Some(Outcome::Aborted {
                reason: AbortReason::ImageSizeMismatch {
                    image: 131_072,
                    chip: FlashChip::N28F020
                },
                ..
            })
        ));
        assert!(!ecu.uploads.contains(&WorkerFunction::FlashErase));
    }

    #[test]
    fn test_unknown_flash_chip_aborts() {
        let mut ecu = SimEcu::with_chip(0x01, 0x02, 262_144);
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3);
        let mut session = Session::new(config).unwrap();

        run(&mut session, &mut ecu);

        assert!(matches!(
            session.outcome(),
            Some(Outcome::Aborted {
                reason: AbortReason::UnknownFlashChip {
                    manufacturer: 0x01,
                    device: 0x02
                },
                ..
            })
        ));
    }

    #[test]
    fn test_identify_flash_chip() {
        let mut ecu = SimEcu::with_chip(0x20, 0xE0, 262_144);
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3a);
        let mut session = Session::new(config).unwrap();

        let trace = run(&mut session, &mut ecu);

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Success(Task::DetectFlashMemoryType))
        );
        assert_eq!(session.flash_chip(), Some(FlashChip::M28F210));
        assert!(trace.status.iter().any(|s| s.starts_with("Flash memory: ST")));
    }

    #[test]
    fn test_upload_failure_aborts() {
        let mut ecu = SimEcu::new();
        ecu.upload_result = 0x01;
        let config = SessionConfig::new(Operation::ReadEeprom, Bootloader::Sbec3a)
            .with_output("eeprom.bin");
        let mut session = Session::new(config).unwrap();

        run(&mut session, &mut ecu);

        assert!(matches!(
            session.outcome(),
            Some(Outcome::Aborted {
                reason: AbortReason::UploadFailed(UploadResult::NoResponseToPing),
                ..
            })
        ));
    }

    #[test]
    fn test_eeprom_write_and_read() {
        let mut ecu = SimEcu::new();
        let image: Vec<u8> = (0..512u32).map(|i| (i * 3) as u8).collect();
        let config = SessionConfig::new(Operation::WriteEeprom, Bootloader::Sbec3)
            .with_eeprom_image(EepromImage::from_bytes(image.clone()).unwrap());
        let mut session = Session::new(config).unwrap();
        let trace = run(&mut session, &mut ecu);
        assert_eq!(
            session.outcome(),
            Some(&Outcome::Success(Task::FinishEEPROMWrite))
        );
        assert!(trace.key_cycle);
        assert_eq!(ecu.eeprom, image);

        let config = SessionConfig::new(Operation::ReadEeprom, Bootloader::Sbec3)
            .with_output("eeprom.bin");
        let mut session = Session::new(config).unwrap();
        let trace = run(&mut session, &mut ecu);
        assert_eq!(trace.dumps[&Region::Eeprom].1, image);
    }

    #[test]
    fn test_ten_receive_timeouts_abort() {
        let config = SessionConfig::new(Operation::WriteFlash, Bootloader::Sbec3a)
            .with_flash_image(FlashImage::from_bytes(vec![0; 262_144]).unwrap());
        let mut session = Session::new(config).unwrap();
        session.handle(Event::Started);
        let mut fx = session.handle(Event::NextRequestTick);
        let first = sends(&fx)[0].clone();

        for attempt in 1..=9 {
            let id = sent_request_id(&fx);
            fx = session.handle(Event::ReceiveTimeout { request: id });
            assert_eq!(sends(&fx), vec![&first], "attempt {attempt}");
            assert_ne!(sent_request_id(&fx), id);
            assert_eq!(session.receive_retries(), attempt);
        }

        let id = sent_request_id(&fx);
        fx = session.handle(Event::ReceiveTimeout { request: id });
        assert!(fx.contains(&Effect::Finished(Outcome::Aborted {
            reason: AbortReason::NoResponse {
                task: Task::CheckVoltages
            },
            ecu: EcuState::Intact,
        })));
        assert!(session.handle(Event::NextRequestTick).is_empty());
    }

    #[test]
    fn test_largest_retry_bound_still_aborts() {
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3a)
            .with_timing(Timing {
                max_retries: u8::MAX,
                ..Timing::default()
            });
        let mut session = Session::new(config).unwrap();
        session.handle(Event::Started);
        let mut fx = session.handle(Event::NextRequestTick);

        for _ in 0..u8::MAX {
            fx = session.handle(Event::ReceiveTimeout {
                request: sent_request_id(&fx),
            });
            assert!(!session.is_finished());
        }
        assert_eq!(session.receive_retries(), u8::MAX);

        let fx = session.handle(Event::ReceiveTimeout {
            request: sent_request_id(&fx),
        });
        assert!(fx.contains(&Effect::Finished(Outcome::Aborted {
            reason: AbortReason::NoResponse {
                task: Task::DetectFlashMemoryType
            },
            ecu: EcuState::Intact,
        })));
    }

    #[test]
    fn test_transmit_retries_are_bounded() {
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3a)
            .with_timing(Timing {
                max_retries: u8::MAX,
                ..Timing::default()
            });
        let mut session = Session::new(config).unwrap();
        session.handle(Event::Started);
        let mut fx = session.handle(Event::NextRequestTick);

        for _ in 0..=u8::MAX {
            if session.is_finished() {
                break;
            }
            fx = session.handle(Event::TransmitTimeout {
                request: sent_request_id(&fx),
            });
        }
        assert!(fx.contains(&Effect::Finished(Outcome::Aborted {
            reason: AbortReason::TransmitFailed {
                task: Task::DetectFlashMemoryType
            },
            ecu: EcuState::Intact,
        })));
    }

    #[test]
    fn test_response_resets_retry_counter() {
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3a);
        let mut session = Session::new(config).unwrap();
        session.handle(Event::Started);
        let fx = session.handle(Event::NextRequestTick);
        let fx = session.handle(Event::ReceiveTimeout {
            request: sent_request_id(&fx),
        });
        assert!(!sends(&fx).is_empty());
        assert_eq!(session.receive_retries(), 1);

        let upload = crate::session::sim::usb(
            Command::Debug,
            debug_mode::UPLOAD_WORKER_FUNCTION,
            vec![0x00],
        );
        session.handle(Event::Packet(upload));
        assert_eq!(session.receive_retries(), 0);
    }

    #[test]
    fn test_superseded_timeout_is_ignored() {
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3a);
        let mut session = Session::new(config).unwrap();
        session.handle(Event::Started);
        let fx = session.handle(Event::NextRequestTick);
        let stale = sent_request_id(&fx);
        session.handle(Event::ReceiveTimeout { request: stale });

        let fx = session.handle(Event::ReceiveTimeout { request: stale });
        assert!(fx.is_empty());
        assert_eq!(session.receive_retries(), 1);
    }

    #[test]
    fn test_replayed_block_response_is_not_counted_twice() {
        let mut ecu = SimEcu::new();
        let config = SessionConfig::new(Operation::ReadEeprom, Bootloader::Sbec3a)
            .with_output("eeprom.bin");
        let mut session = Session::new(config).unwrap();
        let mut pending = VecDeque::from([Event::Started, Event::NextRequestTick]);
        let mut block_reply = None;

        // Drive until the first block request goes out.
        while block_reply.is_none() {
            let event = pending.pop_front().unwrap();
            for effect in session.handle(event) {
                match effect {
                    Effect::Send(request) => {
                        let replies = ecu.respond(&request.packet);
                        if request.packet.bus == Bus::Pcm {
                            block_reply = replies.first().cloned();
                        } else {
                            pending.extend(replies.into_iter().map(Event::Packet));
                        }
                    },
                    Effect::ArmNextRequest => pending.push_back(Event::NextRequestTick),
                    _ => {},
                }
            }
        }

        let reply = block_reply.unwrap();
        let fx = session.handle(Event::Packet(reply.clone()));
        assert!(fx.iter().any(|e| matches!(e, Effect::AppendDump(_, _))));
        assert_eq!(session.progress().map(|p| p.done), Some(512));

        let fx = session.handle(Event::Packet(reply));
        assert!(fx.is_empty());
        assert_eq!(session.progress().map(|p| p.done), Some(512));
    }

    #[test]
    fn test_eeprom_write_ignores_mismatched_offset_echo() {
        let mut ecu = SimEcu::new();
        let config = SessionConfig::new(Operation::WriteEeprom, Bootloader::Sbec3a)
            .with_eeprom_image(EepromImage::from_bytes(vec![0x42; 512]).unwrap());
        let mut session = Session::new(config).unwrap();
        let mut pending = VecDeque::from([Event::Started]);
        let mut block_reply = None;

        while block_reply.is_none() {
            let event = pending.pop_front().unwrap();
            for effect in session.handle(event) {
                match effect {
                    Effect::Send(request) => {
                        let replies = ecu.respond(&request.packet);
                        if request.packet.bus == Bus::Pcm {
                            block_reply = replies.first().cloned();
                        } else {
                            pending.extend(replies.into_iter().map(Event::Packet));
                        }
                    },
                    Effect::ArmNextRequest => pending.push_back(Event::NextRequestTick),
                    _ => {},
                }
            }
        }

        // Same length, offset high byte 0x01 instead of 0x00.
        let reply = block_reply.unwrap();
        let mut stale = reply.clone();
        stale.payload[TIMESTAMP_LEN + 1] = 0x01;

        let fx = session.handle(Event::Packet(stale));
        assert!(!fx.contains(&Effect::DisarmReceiveTimeout));
        assert!(fx.is_empty());
        assert_eq!(session.progress().map(|p| p.done), Some(0));
        assert!(!session.is_finished());

        let fx = session.handle(Event::Packet(reply));
        assert!(fx.contains(&Effect::DisarmReceiveTimeout));
        assert_eq!(session.progress().map(|p| p.done), Some(512));
    }

    #[test]
    fn test_cancel_exits_running_worker() {
        let mut ecu = SimEcu::new();
        let config = SessionConfig::new(Operation::ReadFlash, Bootloader::Sbec3a)
            .with_flash_chip(Some(FlashChip::N28F020))
            .with_output("flash.bin");
        let mut session = Session::new(config).unwrap();
        let mut pending = VecDeque::from([Event::Started]);

        while session.worker().is_none_or(|w| !w.needs_exit()) {
            let event = pending.pop_front().unwrap();
            for effect in session.handle(event) {
                match effect {
                    Effect::Send(request) => {
                        pending.extend(ecu.respond(&request.packet).into_iter().map(Event::Packet));
                    },
                    Effect::ArmNextRequest => pending.push_back(Event::NextRequestTick),
                    _ => {},
                }
            }
        }

        let fx = session.handle(Event::Cancel);
        let exit = Packet::exit_worker(WorkerFunction::FlashRead.id(), FlashChip::N28F020.index());
        assert_eq!(sends(&fx), vec![&exit]);
        assert!(fx.contains(&Effect::Status("Current task is cancelled.".into())));
        assert!(fx.contains(&Effect::Finished(Outcome::Cancelled {
            ecu: EcuState::Intact
        })));
        assert!(session.handle(Event::Packet(rx(&[0x22]))).is_empty());
    }

    #[test]
    fn test_prog_volt_notifications_are_reported() {
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3a);
        let mut session = Session::new(config).unwrap();
        session.handle(Event::Started);
        let fx = session.handle(Event::Packet(prog_volt(0x80)));
        assert_eq!(
            fx,
            vec![Effect::Status("Apply VBB (12V) to SCI-RX pin.".into())]
        );
        let fx = session.handle(Event::Packet(prog_volt(0x40)));
        assert_eq!(
            fx,
            vec![Effect::Status("Apply VPP (20V) to SCI-RX pin.".into())]
        );
    }

    #[test]
    fn test_unexpected_voltage_reply_is_ignored() {
        let config = SessionConfig::new(Operation::IdentifyFlashChip, Bootloader::Sbec3a);
        let mut session = Session::new(config).unwrap();
        session.handle(Event::Started);
        assert!(session.handle(Event::Packet(volts(1, 1, 1))).is_empty());
        assert!(!session.is_finished());
    }

    #[test]
    fn test_standalone_error_after_upload_aborts() {
        let mut ecu = SimEcu::new();
        let config = SessionConfig::new(Operation::ReadEeprom, Bootloader::Sbec3a)
            .with_output("eeprom.bin");
        let mut session = Session::new(config).unwrap();

        // Before any upload the byte is just noise.
        session.handle(Event::Started);
        assert!(session.handle(Event::Packet(rx(&[0x84]))).is_empty());

        let fx = session.handle(Event::NextRequestTick);
        for packet in sends(&fx) {
            for reply in ecu.respond(packet) {
                session.handle(Event::Packet(reply));
            }
        }
        let fx = session.handle(Event::Packet(rx(&[0x84])));
        assert!(fx.contains(&Effect::Finished(Outcome::Aborted {
            reason: AbortReason::BlockRejected(ErrorStatus::OffsetError),
            ecu: EcuState::Intact,
        })));
    }
}
