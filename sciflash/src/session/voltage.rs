//! Voltage precondition gate.

use std::fmt;
use thiserror::Error;

/// Minimum battery voltage (mV).
pub const MIN_BATTERY_MV: u16 = 11_500;
/// Minimum bootstrap rail voltage (mV).
pub const MIN_BOOTSTRAP_MV: u16 = 11_500;
/// Minimum programming rail voltage (mV).
pub const MIN_PROGRAMMING_MV: u16 = 19_500;

/// Voltages measured by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoltageReading {
    /// Battery (mV).
    pub battery_mv: u16,
    /// Bootstrap rail, VBB (mV).
    pub bootstrap_mv: u16,
    /// Programming rail, VPP (mV).
    pub programming_mv: u16,
}

/// A voltage below its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VoltageFault {
    /// Battery below 11.5 V.
    #[error("Battery voltage must be above 11.5V.")]
    Battery,
    /// Bootstrap rail below 11.5 V.
    #[error("Bootstrap voltage must be above 11.5V.")]
    Bootstrap,
    /// Programming rail below 19.5 V.
    #[error("Programming voltage must be above 19.5V.")]
    Programming,
}

impl VoltageReading {
    /// Parse an `AllVolts` response payload (three big-endian millivolt values).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let [b0, b1, v0, v1, p0, p1, ..] = *payload else {
            return None;
        };
        Some(Self {
            battery_mv: u16::from_be_bytes([b0, b1]),
            bootstrap_mv: u16::from_be_bytes([v0, v1]),
            programming_mv: u16::from_be_bytes([p0, p1]),
        })
    }

    /// Thresholds that are not met.
    pub fn faults(&self) -> Vec<VoltageFault> {
        let mut faults = Vec::new();
        if self.battery_mv < MIN_BATTERY_MV {
            faults.push(VoltageFault::Battery);
        }
        if self.bootstrap_mv < MIN_BOOTSTRAP_MV {
            faults.push(VoltageFault::Bootstrap);
        }
        if self.programming_mv < MIN_PROGRAMMING_MV {
            faults.push(VoltageFault::Programming);
        }
        faults
    }

    /// Status lines, one per rail.
    pub fn lines(&self) -> [String; 3] {
        [
            format!("Battery voltage: {}", Volts(self.battery_mv)),
            format!("Bootstrap voltage: {}", Volts(self.bootstrap_mv)),
            format!("Programming voltage: {}", Volts(self.programming_mv)),
        ]
    }
}

struct Volts(u16);

impl fmt::Display for Volts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03} V", self.0 / 1000, self.0 % 1000)
    }
}

/// Faults joined for display.
pub fn describe_faults(faults: &[VoltageFault]) -> String {
    faults
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(battery: u16, bootstrap: u16, programming: u16) -> VoltageReading {
        VoltageReading {
            battery_mv: battery,
            bootstrap_mv: bootstrap,
            programming_mv: programming,
        }
    }

    #[test]
    fn test_parse() {
        let payload = [0x2E, 0xE0, 0x2E, 0xE0, 0x4E, 0x20];
        assert_eq!(
            VoltageReading::parse(&payload),
            Some(reading(12_000, 12_000, 20_000))
        );
        assert_eq!(VoltageReading::parse(&payload[..5]), None);
    }

    #[test]
    fn test_nominal_voltages_pass() {
        assert!(reading(12_000, 12_000, 20_000).faults().is_empty());
        assert!(reading(11_500, 11_500, 19_500).faults().is_empty());
    }

    #[test]
    fn test_each_threshold_reported() {
        assert_eq!(
            reading(11_499, 12_000, 20_000).faults(),
            vec![VoltageFault::Battery]
        );
        assert_eq!(
            reading(12_000, 0, 19_000).faults(),
            vec![VoltageFault::Bootstrap, VoltageFault::Programming]
        );
    }

    #[test]
    fn test_lines_format() {
        let lines = reading(12_345, 11_000, 20_050).lines();
        assert_eq!(lines[0], "Battery voltage: 12.345 V");
        assert_eq!(lines[2], "Programming voltage: 20.050 V");
    }
}
