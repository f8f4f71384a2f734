//! Flash memory chip catalog.

use std::fmt;

/// 128 kB flash.
pub const SIZE_128K: u32 = 131_072;

/// 256 kB flash.
pub const SIZE_256K: u32 = 262_144;

/// Flash memory manufacturers reported by the FlashID worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FlashManufacturer {
    /// STMicroelectronics.
    St = 0x20,
    /// Catalyst.
    Catalyst = 0x31,
    /// Intel.
    Intel = 0x89,
    /// Texas Instruments.
    TexasInstruments = 0x97,
}

impl FlashManufacturer {
    /// Look up a manufacturer by JEDEC id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x20 => Some(Self::St),
            0x31 => Some(Self::Catalyst),
            0x89 => Some(Self::Intel),
            0x97 => Some(Self::TexasInstruments),
            _ => None,
        }
    }
}

impl fmt::Display for FlashManufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::St => write!(f, "ST"),
            Self::Catalyst => write!(f, "CATALYST"),
            Self::Intel => write!(f, "Intel"),
            Self::TexasInstruments => write!(f, "Texas Instruments"),
        }
    }
}

/// Flash chips supported by the worker functions.
///
/// The discriminant is the chip index the scanner firmware expects in
/// worker function requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FlashChip {
    /// M28F102 (128 kB).
    M28F102 = 1,
    /// CAT28F102 (128 kB).
    Cat28F102 = 2,
    /// N28F010 (128 kB).
    N28F010 = 3,
    /// N28F020 (256 kB).
    N28F020 = 4,
    /// M28F210 (256 kB).
    M28F210 = 5,
    /// M28F220 (256 kB).
    M28F220 = 6,
    /// M28F200T/B (256 kB).
    M28F200 = 7,
    /// Two N28F010 chips (128k+128k), used by JTEC.
    N28F010Dual = 8,
    /// TMS28F210 (256 kB).
    Tms28F210 = 9,
}

impl FlashChip {
    /// Every chip, in index order.
    pub const ALL: [Self; 9] = [
        Self::M28F102,
        Self::Cat28F102,
        Self::N28F010,
        Self::N28F020,
        Self::M28F210,
        Self::M28F220,
        Self::M28F200,
        Self::N28F010Dual,
        Self::Tms28F210,
    ];

    /// Index sent to the scanner.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Look up a chip by index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|chip| chip.index() == index)
    }

    /// Parse a chip name (case-insensitive) or index.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Ok(index) = name.parse::<u8>() {
            return Self::from_index(index);
        }
        Self::ALL
            .into_iter()
            .find(|chip| chip.name().eq_ignore_ascii_case(name))
    }

    /// Capacity in bytes.
    pub fn size(self) -> u32 {
        match self {
            Self::M28F102 | Self::Cat28F102 | Self::N28F010 => SIZE_128K,
            _ => SIZE_256K,
        }
    }

    /// Part name.
    pub fn name(self) -> &'static str {
        match self {
            Self::M28F102 => "M28F102",
            Self::Cat28F102 => "CAT28F102",
            Self::N28F010 => "N28F010",
            Self::N28F020 => "N28F020",
            Self::M28F210 => "M28F210",
            Self::M28F220 => "M28F220",
            Self::M28F200 => "M28F200",
            Self::N28F010Dual => "N28F010x2",
            Self::Tms28F210 => "TMS28F210",
        }
    }

    /// Resolve a manufacturer/device id pair read by the FlashID worker.
    ///
    /// Both ids must be known; the pair itself is not cross-checked, which
    /// matches how the worker reports second-source parts. The dual N28F010
    /// layout cannot be detected and is never returned.
    pub fn identify(manufacturer: u8, device: u8) -> Option<Self> {
        FlashManufacturer::from_id(manufacturer)?;
        match device {
            0x50 => Some(Self::M28F102),
            0x51 => Some(Self::Cat28F102),
            0xB4 => Some(Self::N28F010),
            0xBD => Some(Self::N28F020),
            0xE0 => Some(Self::M28F210),
            0xE6 => Some(Self::M28F220),
            0x74 | 0x75 => Some(Self::M28F200),
            0xE5 => Some(Self::Tms28F210),
            _ => None,
        }
    }
}

impl fmt::Display for FlashChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kb = self.size() / 1024;
        match self {
            Self::N28F010Dual => write!(f, "N28F010 (128k+128k)"),
            _ => write!(f, "{} ({kb} kB)", self.name()),
        }
    }
}
