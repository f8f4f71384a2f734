//! Append-only dump files.

use crate::error::Result;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination file for a memory dump.
///
/// The file is truncated on creation and every accepted block is appended
/// with a single write, so an interrupted session leaves exactly the blocks
/// that were confirmed.
#[derive(Debug)]
pub struct DumpFile {
    path: PathBuf,
    file: File,
    written: u64,
}

impl DumpFile {
    /// Create (or truncate) a dump file, creating parent directories.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        debug!("Created dump file: {}", path.display());
        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    /// Append one block.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        self.file.flush()?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
