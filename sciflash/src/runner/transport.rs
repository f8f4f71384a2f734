//! Packet transport over the scanner link.

use crate::error::Result;
use crate::protocol::link::{FrameDecoder, encode};
use crate::protocol::packet::Packet;
use crate::session::Event;
use log::{trace, warn};
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Idle delay when the reader returns no bytes.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Outbound half of the link.
pub trait Transport: Send {
    /// Transmit one packet.
    fn send(&mut self, packet: &Packet) -> Result<()>;
}

/// Frames packets onto a byte writer.
pub struct LinkTransport<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> LinkTransport<W> {
    /// Wrap a writer, typically a serial port handle.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Transport for LinkTransport<W> {
    fn send(&mut self, packet: &Packet) -> Result<()> {
        let frame = encode(packet);
        trace!("TX {frame:02X?}");
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Background thread turning inbound bytes into [`Event::Packet`]s.
///
/// Stops when dropped, when the event receiver goes away or on a read
/// error other than a timeout.
pub struct LinkReader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LinkReader {
    /// Ask the thread to stop and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LinkReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the reader thread.
///
/// `reader` should have a short read timeout so the thread notices
/// shutdown promptly.
pub fn spawn_link_reader<R>(mut reader: R, events: Sender<Event>) -> LinkReader
where
    R: Read + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);

    let handle = thread::spawn(move || {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        while !flag.load(Ordering::Relaxed) {
            match reader.read(&mut buf) {
                Ok(0) => thread::sleep(IDLE_BACKOFF),
                Ok(n) => {
                    trace!("RX {:02X?}", &buf[..n]);
                    decoder.push(&buf[..n]);
                    while let Some(packet) = decoder.next_packet() {
                        if events.send(Event::Packet(packet)).is_err() {
                            return;
                        }
                    }
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => {
                    warn!("Link read failed: {e}");
                    return;
                },
            }
        }
    });

    LinkReader {
        stop,
        handle: Some(handle),
    }
}
