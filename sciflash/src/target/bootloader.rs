//! Bootloader variants.
//!
//! The bootloader variant selects the unlock sequence the scanner runs and a
//! handful of sequencing quirks: JTEC-family controllers have no part-number
//! worker, no EEPROM backup during flash writes and no EEPROM update step.

use crate::target::flash::FlashChip;
use std::fmt;

/// Known bootloader variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum Bootloader {
    /// No bootloader selected.
    Empty = 0x00,
    /// SBEC3/SBEC3+ (128k).
    Sbec3 = 0x01,
    /// SBEC3 (128k) custom.
    Sbec3Custom = 0x02,
    /// SBEC3A/3A+/3B (256k).
    #[default]
    Sbec3a = 0x03,
    /// SBEC3 (256k) custom.
    Sbec3Custom256k = 0x04,
    /// EATX3 (128k).
    Eatx3 = 0x05,
    /// EATX3A (256k).
    Eatx3a = 0x06,
    /// JTEC (256k).
    Jtec = 0x07,
    /// JTEC+ (256k).
    JtecPlus = 0x08,
}

impl Bootloader {
    /// Every selectable variant, in id order.
    pub const ALL: [Self; 8] = [
        Self::Sbec3,
        Self::Sbec3Custom,
        Self::Sbec3a,
        Self::Sbec3Custom256k,
        Self::Eatx3,
        Self::Eatx3a,
        Self::Jtec,
        Self::JtecPlus,
    ];

    /// Wire id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a variant by wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(Self::Empty),
            0x01 => Some(Self::Sbec3),
            0x02 => Some(Self::Sbec3Custom),
            0x03 => Some(Self::Sbec3a),
            0x04 => Some(Self::Sbec3Custom256k),
            0x05 => Some(Self::Eatx3),
            0x06 => Some(Self::Eatx3a),
            0x07 => Some(Self::Jtec),
            0x08 => Some(Self::JtecPlus),
            _ => None,
        }
    }

    /// Parse a short name or a numeric id.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        if let Ok(id) = name.parse::<u8>() {
            return Self::from_id(id);
        }
        match name.as_str() {
            "sbec3" | "sbec3+" => Some(Self::Sbec3),
            "sbec3-custom" => Some(Self::Sbec3Custom),
            "sbec3a" | "sbec3a+" | "sbec3b" => Some(Self::Sbec3a),
            "sbec3-256k-custom" => Some(Self::Sbec3Custom256k),
            "eatx3" => Some(Self::Eatx3),
            "eatx3a" => Some(Self::Eatx3a),
            "jtec" => Some(Self::Jtec),
            "jtec+" | "jtecplus" => Some(Self::JtecPlus),
            _ => None,
        }
    }

    /// Short name accepted by [`Bootloader::from_name`].
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Sbec3 => "sbec3",
            Self::Sbec3Custom => "sbec3-custom",
            Self::Sbec3a => "sbec3a",
            Self::Sbec3Custom256k => "sbec3-256k-custom",
            Self::Eatx3 => "eatx3",
            Self::Eatx3a => "eatx3a",
            Self::Jtec => "jtec",
            Self::JtecPlus => "jtec+",
        }
    }

    /// JTEC-family controllers.
    pub fn is_jtec(self) -> bool {
        matches!(self, Self::Jtec | Self::JtecPlus)
    }

    /// Flash chip implied by the variant, if it has a fixed layout.
    pub fn default_flash_chip(self) -> Option<FlashChip> {
        match self {
            Self::Jtec => Some(FlashChip::N28F010Dual),
            _ => None,
        }
    }
}

impl fmt::Display for Bootloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Sbec3 => "SBEC3/SBEC3+ (128k)",
            Self::Sbec3Custom => "SBEC3 (128k) custom",
            Self::Sbec3a => "SBEC3A/3A+/3B (256k)",
            Self::Sbec3Custom256k => "SBEC3A (256k) custom",
            Self::Eatx3 => "EATX3 (128k)",
            Self::Eatx3a => "EATX3A (256k)",
            Self::Jtec => "JTEC (256k)",
            Self::JtecPlus => "JTEC+ (256k)",
        };
        f.write_str(name)
    }
}
