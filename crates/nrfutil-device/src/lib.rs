//! # nrfutil-device
//!
//! Typed operations on Nordic development kits and dongles, run through a
//! version-pinned `nrfutil device` sandbox.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nrfutil_device::{
//!     DeviceSandboxConfig, DeviceSandboxProvider, FirmwareType, MemorySettings,
//!     NrfutilDeviceWithSerialnumber,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceSandboxConfig::from_env().sandbox_config()?;
//!     let provider = DeviceSandboxProvider::new(config, Arc::new(MemorySettings::new()));
//!     let client = provider.client().await?;
//!
//!     let device = NrfutilDeviceWithSerialnumber::new("000683512345");
//!     let firmware = std::fs::read("app.hex")?;
//!     client
//!         .program_buffer(&device, &firmware, FirmwareType::Hex, None, None, None)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod provider;
pub mod settings;
pub mod temp;
pub mod types;

pub use client::DeviceClient;
pub use error::{DeviceError, Result};
pub use provider::{
    default_base_dir, DeviceSandboxConfig, DeviceSandboxProvider, DEFAULT_DEVICE_VERSION,
    DEVICE_MODULE,
};
pub use settings::{
    is_logging_verbose, tool_log_level, JsonFileSettings, MemorySettings, SettingsStore,
    VERBOSE_LOGGING_KEY,
};
pub use temp::TempFirmware;
pub use types::{
    ChipEraseMode, CoreInfo, DeviceCore, DeviceEvent, DeviceTraits, FirmwareType, FwInfo,
    ImageInfo, ImageLocation, JlinkInfo, ListOptions, McuState, NrfutilDevice,
    NrfutilDeviceWithSerialnumber, ProgrammingOptions, ProtectionLevel, ProtectionStatus,
    ProtectionStatusResult, ResetKind, SerialPort, UsbInfo, VerifyMode,
};
