//! Error types for nrfutil-device.

use nrfutil_sandbox::SandboxError;
use thiserror::Error;

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while operating on a device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The sandboxed nrfutil command failed.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// I/O error, e.g. writing a temporary firmware file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Firmware read back from the device was not valid base64.
    #[error("invalid firmware buffer: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The device record carries no serial number to address it by.
    #[error("device {0} has no serial number")]
    MissingSerialNumber(u64),

    /// Settings could not be loaded or stored.
    #[error("settings error: {0}")]
    Settings(String),
}

impl DeviceError {
    /// Exit code of the failed nrfutil process, when there was one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Sandbox(e) => e.exit_code(),
            _ => None,
        }
    }
}
