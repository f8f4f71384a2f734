//! Catalog, image info and port listing command implementations.

use {
    anyhow::{Context, Result},
    console::style,
    sciflash::{
        Bootloader, EepromImage, FlashChip, FlashImage, auto_detect_port, discover_ports,
        image::{EEPROM_SIZE, sum32},
    },
    std::path::Path,
};

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = discover_ports();

    if json {
        return print_json(&serde_json::json!({
            "ok": true,
            "data": {
                "ports": serde_json::to_value(&detected)?,
            }
        }));
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for line in sciflash::device::format_port_list(&detected) {
        eprintln!("  {} {}", style("•").green(), line);
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected scanner: {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }

    Ok(())
}

/// Chips command implementation.
pub(crate) fn cmd_chips(json: bool) -> Result<()> {
    if json {
        let bootloaders: Vec<serde_json::Value> = Bootloader::ALL
            .iter()
            .map(|b| {
                serde_json::json!({
                    "id": b.id(),
                    "name": b.short_name(),
                    "description": b.to_string(),
                    "flash_chip": b.default_flash_chip().map(FlashChip::name),
                })
            })
            .collect();
        let chips: Vec<serde_json::Value> = FlashChip::ALL
            .iter()
            .map(|c| {
                serde_json::json!({
                    "index": c.index(),
                    "name": c.name(),
                    "size": c.size(),
                })
            })
            .collect();
        return print_json(&serde_json::json!({
            "ok": true,
            "data": {
                "bootloaders": bootloaders,
                "flash_chips": chips,
            }
        }));
    }

    println!("{}", style("Bootloaders:").bold().underlined());
    for bootloader in Bootloader::ALL {
        println!(
            "  {:>2}  {:<18} {}",
            bootloader.id(),
            style(bootloader.short_name()).cyan(),
            bootloader
        );
    }

    println!();
    println!("{}", style("Flash chips:").bold().underlined());
    for chip in FlashChip::ALL {
        println!(
            "  {:>2}  {:<10} {} KiB",
            chip.index(),
            style(chip.name()).cyan(),
            chip.size() / 1024
        );
    }

    Ok(())
}

/// What an image file holds.
enum ImageKind {
    Flash(FlashImage),
    Eeprom(EepromImage),
}

impl ImageKind {
    fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        if data.len() == EEPROM_SIZE as usize {
            return Ok(Self::Eeprom(EepromImage::from_bytes(data)?));
        }
        let image = FlashImage::from_bytes(data)
            .with_context(|| format!("Failed to load image {}", path.display()))?;
        Ok(Self::Flash(image))
    }

    fn data(&self) -> &[u8] {
        match self {
            Self::Flash(image) => image.data(),
            Self::Eeprom(image) => image.data(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Flash(_) => "flash",
            Self::Eeprom(_) => "eeprom",
        }
    }

    fn candidate_chips(&self) -> Vec<FlashChip> {
        match self {
            Self::Flash(image) => image.candidate_chips(),
            Self::Eeprom(_) => Vec::new(),
        }
    }
}

/// Info command implementation.
pub(crate) fn cmd_info(image_path: &Path, json: bool) -> Result<()> {
    if !json {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            image_path.display()
        );
    }
    let image = ImageKind::load(image_path)?;
    let data = image.data();
    let chips = image.candidate_chips();

    if json {
        return print_json(&serde_json::json!({
            "ok": true,
            "data": {
                "kind": image.kind(),
                "size": data.len(),
                "checksum": format!("{:08X}", sum32(data)),
                "flash_chips": chips.iter().map(|c| c.name()).collect::<Vec<_>>(),
            }
        }));
    }

    println!("{}", style("Image Information").bold().underlined());
    println!("  Type:     {}", image.kind());
    println!("  Size:     {} bytes", data.len());
    println!("  Checksum: {:08X}", sum32(data));
    if !chips.is_empty() {
        println!(
            "  Fits:     {}",
            chips
                .iter()
                .map(|c| c.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_kind_by_size() {
        let dir = tempfile::tempdir().unwrap();

        let eeprom = dir.path().join("eeprom.bin");
        std::fs::write(&eeprom, vec![0u8; 512]).unwrap();
        let image = ImageKind::load(&eeprom).unwrap();
        assert_eq!(image.kind(), "eeprom");
        assert!(image.candidate_chips().is_empty());

        let flash = dir.path().join("flash.bin");
        std::fs::write(&flash, vec![0xFFu8; 262_144]).unwrap();
        let image = ImageKind::load(&flash).unwrap();
        assert_eq!(image.kind(), "flash");
        assert!(image.candidate_chips().contains(&FlashChip::N28F020));
        assert!(!image.candidate_chips().contains(&FlashChip::N28F010));
    }

    #[test]
    fn test_image_kind_rejects_odd_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.bin");
        std::fs::write(&path, vec![0u8; 1000]).unwrap();
        assert!(ImageKind::load(&path).is_err());
        assert!(ImageKind::load(&dir.path().join("missing.bin")).is_err());
    }
}
