//! Request pacing and timeouts.
//!
//! [`Timing`] holds the durations; [`Scheduler`] turns the arm/disarm
//! effects of a session into deadlines and fires them as events. The
//! scheduler takes `now` explicitly so it can be driven from tests.

use crate::session::task::Task;
use crate::session::{Event, RequestId};
use std::time::{Duration, Instant};

/// Delay between a response and the next request.
pub const NEXT_REQUEST_INTERVAL: Duration = Duration::from_millis(25);

/// Receive timeout for ordinary requests.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Receive timeout while erasing flash.
pub const ERASE_RECEIVE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Receive timeout while writing EEPROM.
pub const EEPROM_WRITE_RECEIVE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Transmit timeout.
pub const TRANSMIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Consecutive timeouts tolerated before a session aborts.
pub const MAX_RETRIES: u8 = 9;

/// Session timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pacing between response and next request.
    pub next_request: Duration,
    /// Receive timeout for ordinary requests.
    pub receive: Duration,
    /// Receive timeout during flash erase.
    pub erase_receive: Duration,
    /// Receive timeout during EEPROM writes.
    pub eeprom_write_receive: Duration,
    /// Transmit timeout.
    pub transmit: Duration,
    /// Retries before abort; the session aborts on retry `max_retries + 1`.
    pub max_retries: u8,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            next_request: NEXT_REQUEST_INTERVAL,
            receive: RECEIVE_TIMEOUT,
            erase_receive: ERASE_RECEIVE_TIMEOUT,
            eeprom_write_receive: EEPROM_WRITE_RECEIVE_TIMEOUT,
            transmit: TRANSMIT_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

impl Timing {
    /// Receive timeout for requests issued during `task`.
    pub fn receive_timeout(&self, task: Task) -> Duration {
        match task {
            Task::EraseFlashMemory => self.erase_receive,
            Task::WriteEEPROM => self.eeprom_write_receive,
            _ => self.receive,
        }
    }
}

/// Deadline bookkeeping for one session.
#[derive(Debug, Default)]
pub struct Scheduler {
    interval: Duration,
    next_request: Option<Instant>,
    receive: Option<(RequestId, Instant)>,
}

impl Scheduler {
    /// Scheduler with the given pacing interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Fire a next-request tick one interval from now.
    pub fn arm_next_request(&mut self, now: Instant) {
        self.next_request = Some(now + self.interval);
    }

    /// Fire a receive timeout for `request` after `after`.
    ///
    /// Replaces any earlier receive deadline.
    pub fn arm_receive(&mut self, request: RequestId, after: Duration, now: Instant) {
        self.receive = Some((request, now + after));
    }

    /// Cancel the receive deadline.
    pub fn disarm_receive(&mut self) {
        self.receive = None;
    }

    /// Bus traffic pushes a pending tick back by one interval.
    pub fn on_packet(&mut self, now: Instant) {
        if self.next_request.is_some() {
            self.next_request = Some(now + self.interval);
        }
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_request, self.receive.map(|(_, at)| at)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Pop every deadline that has passed, earliest first.
    pub fn expired(&mut self, now: Instant) -> Vec<Event> {
        let mut fired: Vec<(Instant, Event)> = Vec::new();
        if let Some(at) = self.next_request.filter(|at| *at <= now) {
            self.next_request = None;
            fired.push((at, Event::NextRequestTick));
        }
        if let Some((request, at)) = self.receive.filter(|(_, at)| *at <= now) {
            self.receive = None;
            fired.push((at, Event::ReceiveTimeout { request }));
        }
        fired.sort_by_key(|(at, _)| *at);
        fired.into_iter().map(|(_, event)| event).collect()
    }
}
