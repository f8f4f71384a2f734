//! Hardware catalogs: bootloader variants and flash chips.

pub mod bootloader;
pub mod flash;

pub use bootloader::Bootloader;
pub use flash::{FlashChip, FlashManufacturer};
