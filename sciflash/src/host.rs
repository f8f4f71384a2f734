//! Host-side utilities for scanner discovery.

use crate::device::DetectedPort;

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports that are likely scanners.
#[must_use]
pub fn discover_scanner_ports() -> Vec<DetectedPort> {
    crate::device::detect_scanner_ports()
}

/// Auto-detect a single best scanner candidate.
pub fn auto_detect_port() -> crate::Result<DetectedPort> {
    crate::device::auto_detect_port()
}
