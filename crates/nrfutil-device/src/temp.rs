//! Temporary firmware files for programming from memory.

use crate::types::FirmwareType;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A firmware buffer written to a uniquely named file in the OS temp
/// directory. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct TempFirmware {
    path: PathBuf,
}

impl TempFirmware {
    /// Write `buffer` to a new file in the OS temp directory.
    pub fn write(buffer: &[u8], kind: FirmwareType) -> std::io::Result<Self> {
        Self::write_in(&std::env::temp_dir(), buffer, kind)
    }

    /// Write `buffer` to a new file in `dir`.
    pub fn write_in(dir: &Path, buffer: &[u8], kind: FirmwareType) -> std::io::Result<Self> {
        let (path, mut file) = create_unused(dir, || {
            format!("nrf-sandbox-{}.{}", Uuid::new_v4(), kind.extension())
        })?;
        // Removed again on drop if the write fails.
        let temp = Self { path };
        file.write_all(buffer)?;
        tracing::debug!(path = %temp.path.display(), bytes = buffer.len(), "Wrote temporary firmware file");
        Ok(temp)
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFirmware {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed temporary firmware file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove temporary firmware file")
            }
        }
    }
}

/// Create a file under a fresh name from `name`, retrying while the name is
/// taken. Creation and the existence check are one atomic step.
fn create_unused(dir: &Path, mut name: impl FnMut() -> String) -> std::io::Result<(PathBuf, File)> {
    loop {
        let candidate = dir.join(name());
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}
