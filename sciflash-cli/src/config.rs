//! Configuration file support for sciflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SCIFLASH_*)
//! 3. Local config file (./sciflash.toml or ./sciflash_ports.toml)
//! 4. Global config file (~/.config/sciflash/config.toml)

use crate::CliError;
use directories::ProjectDirs;
use log::{debug, info, warn};
use sciflash::session::Timing;
use sciflash::{Bootloader, FlashChip};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCAL_CONFIG: &str = "sciflash.toml";
const LOCAL_PORTS_CONFIG: &str = "sciflash_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Scanner baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Remembered USB adapters for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Session defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Bootloader short name or id (e.g., "sbec3a").
    pub bootloader: Option<String>,
    /// Flash chip name or index (e.g., "N28F020").
    pub flash_chip: Option<String>,
    /// Back up flash before writing.
    pub backup_flash: Option<bool>,
    /// Back up EEPROM before writing flash.
    pub backup_eeprom: Option<bool>,
    /// Directory for backup files.
    pub backup_dir: Option<PathBuf>,
}

/// Timing overrides, all in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pacing between a response and the next request.
    pub next_request_ms: Option<u64>,
    /// Receive timeout for ordinary requests.
    pub receive_timeout_ms: Option<u64>,
    /// Receive timeout while erasing flash.
    pub erase_timeout_ms: Option<u64>,
    /// Receive timeout while writing EEPROM.
    pub eeprom_write_timeout_ms: Option<u64>,
    /// Write timeout on the serial port.
    pub transmit_timeout_ms: Option<u64>,
    /// Retries before a session gives up.
    pub max_retries: Option<u8>,
}

impl TimingConfig {
    /// Apply the overrides on top of `base`.
    pub fn apply(&self, base: Timing) -> Timing {
        let ms = |value: Option<u64>, default: Duration| value.map_or(default, Duration::from_millis);
        Timing {
            next_request: ms(self.next_request_ms, base.next_request),
            receive: ms(self.receive_timeout_ms, base.receive),
            erase_receive: ms(self.erase_timeout_ms, base.erase_receive),
            eeprom_write_receive: ms(self.eeprom_write_timeout_ms, base.eeprom_write_receive),
            transmit: ms(self.transmit_timeout_ms, base.transmit),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Session defaults.
    #[serde(default)]
    pub session: SessionSettings,
    /// Timing overrides.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Unreadable or malformed files are skipped with a warning.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_lenient(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_lenient(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        // Load ports config
        if let Some(ports_config) = Self::load_ports_config() {
            config.port = ports_config;
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid config file {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_lenient(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Load ports configuration from sciflash_ports.toml.
    fn load_ports_config() -> Option<PortConfig> {
        let local_path = Path::new(LOCAL_PORTS_CONFIG);
        if let Some(config) = Self::load_ports_file(local_path) {
            return Some(config);
        }

        Self::global_config_dir().and_then(|dir| Self::load_ports_file(&dir.join("ports.toml")))
    }

    fn load_ports_file(path: &Path) -> Option<PortConfig> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => {
                debug!("Loaded ports config from {}", path.display());
                Some(config)
            },
            Err(e) => {
                warn!("Failed to parse ports file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sciflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        self.port.usb_device.extend(other.port.usb_device);

        let session = other.session;
        if session.bootloader.is_some() {
            self.session.bootloader = session.bootloader;
        }
        if session.flash_chip.is_some() {
            self.session.flash_chip = session.flash_chip;
        }
        if session.backup_flash.is_some() {
            self.session.backup_flash = session.backup_flash;
        }
        if session.backup_eeprom.is_some() {
            self.session.backup_eeprom = session.backup_eeprom;
        }
        if session.backup_dir.is_some() {
            self.session.backup_dir = session.backup_dir;
        }

        let timing = other.timing;
        self.timing.next_request_ms = timing.next_request_ms.or(self.timing.next_request_ms);
        self.timing.receive_timeout_ms = timing
            .receive_timeout_ms
            .or(self.timing.receive_timeout_ms);
        self.timing.erase_timeout_ms = timing.erase_timeout_ms.or(self.timing.erase_timeout_ms);
        self.timing.eeprom_write_timeout_ms = timing
            .eeprom_write_timeout_ms
            .or(self.timing.eeprom_write_timeout_ms);
        self.timing.transmit_timeout_ms = timing
            .transmit_timeout_ms
            .or(self.timing.transmit_timeout_ms);
        self.timing.max_retries = timing.max_retries.or(self.timing.max_retries);
    }

    /// Configured bootloader, if any.
    pub fn bootloader(&self) -> anyhow::Result<Option<Bootloader>> {
        self.session
            .bootloader
            .as_deref()
            .map(|name| {
                Bootloader::from_name(name).ok_or_else(|| {
                    CliError::Config(format!("Unknown bootloader in config: {name}")).into()
                })
            })
            .transpose()
    }

    /// Configured flash chip, if any.
    pub fn flash_chip(&self) -> anyhow::Result<Option<FlashChip>> {
        self.session
            .flash_chip
            .as_deref()
            .map(|name| {
                FlashChip::from_name(name).ok_or_else(|| {
                    CliError::Config(format!("Unknown flash chip in config: {name}")).into()
                })
            })
            .transpose()
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        // Don't add duplicates
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        // Try to save to local file first, fall back to global
        let path = if Path::new(LOCAL_PORTS_CONFIG).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS_CONFIG)
        };

        self.port.usb_device.push(device);

        let content = toml::to_string_pretty(&self.port)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}
