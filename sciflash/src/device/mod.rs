//! Scanner adapter discovery and classification.
//!
//! The scanner firmware runs on an Arduino Mega class board. Genuine boards
//! enumerate with the Arduino vendor id; clones use a CH340 or an FTDI
//! bridge. Discovery is serial-port based.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB serial adapter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Arduino Mega 2560 (ATmega16U2 USB interface).
    ArduinoMega,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// FTDI FT232 USB-to-Serial converter.
    Ftdi,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x2341, &[0x0010, 0x0042], DeviceKind::ArduinoMega),
    (0x2A03, &[0x0010, 0x0042], DeviceKind::ArduinoMega),
    (0x1A86, &[0x7523, 0x7522, 0x5523], DeviceKind::Ch340),
    (0x0403, &[0x6001, 0x6015], DeviceKind::Ftdi),
    (0x10C4, &[0xEA60], DeviceKind::Cp210x),
];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, device)| *device)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ArduinoMega => "Arduino Mega",
            Self::Ch340 => "CH340/CH341",
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a known adapter.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Preferred during auto-selection.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::ArduinoMega)
    }
}

/// Discovered serial endpoint.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_kind"))]
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

#[cfg(feature = "serde")]
fn serialize_kind<S: serde::Serializer>(
    kind: &DeviceKind,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.name())
}

impl DetectedPort {
    /// Whether this endpoint is likely a scanner.
    pub fn is_likely_scanner(&self) -> bool {
        self.device.is_known()
    }
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|port_info| {
            let mut detected = DetectedPort {
                name: port_info.port_name.clone(),
                device: DeviceKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial: None,
            };

            if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                    port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                );
                detected.vid = Some(usb_info.vid);
                detected.pid = Some(usb_info.pid);
                detected.manufacturer = usb_info.manufacturer;
                detected.product = usb_info.product;
                detected.serial = usb_info.serial_number;
            }
            detected
        })
        .collect()
}

/// Detect all available endpoints (no serial support compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Endpoints that look like a scanner.
pub fn detect_scanner_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_scanner)
        .collect()
}

/// Pick the best scanner candidate out of `ports`.
pub fn select_port(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    if let Some(port) = ports.iter().find(|p| p.device.is_high_priority()) {
        return Ok(port.clone());
    }
    if let Some(port) = ports.iter().find(|p| p.device.is_known()) {
        return Ok(port.clone());
    }
    ports.into_iter().next().ok_or(Error::DeviceNotFound)
}

/// Auto-detect a single scanner endpoint.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let port = select_port(detect_ports())?;
    info!("Auto-detected {} adapter: {}", port.device.name(), port.name);
    Ok(port)
}

/// Auto-detect a single scanner endpoint (no serial support compiled in).
#[cfg(not(feature = "native"))]
pub fn auto_detect_port() -> Result<DetectedPort> {
    Err(Error::Unsupported(
        "serial port discovery requires the `native` feature".to_string(),
    ))
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, device: DeviceKind) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            device,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(
            DeviceKind::from_vid_pid(0x2341, 0x0042),
            DeviceKind::ArduinoMega
        );
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x2341, 0x8036), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_select_prefers_arduino() {
        let ports = vec![
            port("/dev/ttyUSB0", DeviceKind::Ch340),
            port("/dev/ttyACM0", DeviceKind::ArduinoMega),
        ];
        assert_eq!(select_port(ports).unwrap().name, "/dev/ttyACM0");
    }

    #[test]
    fn test_select_falls_back_to_first() {
        let ports = vec![
            port("/dev/ttyS0", DeviceKind::Unknown),
            port("/dev/ttyS1", DeviceKind::Unknown),
        ];
        assert_eq!(select_port(ports).unwrap().name, "/dev/ttyS0");
        assert!(matches!(
            select_port(Vec::new()),
            Err(Error::DeviceNotFound)
        ));
    }

    #[test]
    fn test_format_port_list() {
        let mut known = port("/dev/ttyACM0", DeviceKind::ArduinoMega);
        known.product = Some("Arduino Mega 2560".to_string());
        let mut unknown = port("/dev/ttyUSB1", DeviceKind::Unknown);
        unknown.vid = Some(0x1234);
        unknown.pid = Some(0xABCD);

        let formatted = format_port_list(&[known, unknown]);
        assert_eq!(
            formatted[0],
            "/dev/ttyACM0 [Arduino Mega] - Arduino Mega 2560"
        );
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:1234 PID:ABCD]");
    }
}
