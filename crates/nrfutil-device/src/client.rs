//! Typed device commands over a sandboxed `nrfutil device`.
//!
//! Every single-device command ends with `--serial-number <sn>`:
//!
//! ```text
//! nrfutil device program --firmware /tmp/nrf-sandbox-<uuid>.hex --core Application \
//!     --options chip_erase_mode=ERASE_ALL --serial-number 000683512345 \
//!     --json --log-output=stdout
//! ```

use crate::error::{DeviceError, Result};
use crate::temp::TempFirmware;
use crate::types::{
    CoreInfo, DeviceCore, DeviceEvent, FirmwareReadResult, FirmwareType, FwInfo, ListEvent,
    ListOptions, McuState, NrfutilDeviceWithSerialnumber, ProgrammingOptions, ProtectionLevel,
    ProtectionStatusResult, ResetKind,
};
use base64::{engine::general_purpose, Engine as _};
use nrfutil_sandbox::{BackgroundTask, NrfutilSandbox, Operation, ProgressCallback, SandboxError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Device commands bound to one device sandbox.
///
/// Cheap to clone. Commands return an [`Operation`] that can be awaited or
/// cancelled; `list` returns a [`BackgroundTask`].
///
/// # Panics
///
/// Every command starts its process on the current Tokio runtime, so
/// calling one outside a runtime panics.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    sandbox: Arc<NrfutilSandbox>,
    temp_dir: PathBuf,
}

impl DeviceClient {
    /// Create a client over a prepared device sandbox.
    pub fn new(sandbox: Arc<NrfutilSandbox>) -> Self {
        Self {
            sandbox,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Use `dir` instead of the OS temp directory for firmware buffers.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// The underlying sandbox.
    pub fn sandbox(&self) -> &Arc<NrfutilSandbox> {
        &self.sandbox
    }

    /// Enumerate devices, and with `options.hotplug` keep watching.
    ///
    /// Every enumerated or arriving device is reported as
    /// [`DeviceEvent::Arrived`]. Departures are reported as
    /// [`DeviceEvent::Left`] only in hotplug mode.
    ///
    /// # Errors
    ///
    /// Returns an error if nrfutil cannot be started. Later failures, and
    /// stream items that are not device events, go to `on_error`.
    pub fn list<F, E>(&self, options: ListOptions, mut on_event: F, on_error: E) -> Result<BackgroundTask>
    where
        F: FnMut(DeviceEvent) + Send + 'static,
        E: FnMut(DeviceError) + Send + 'static,
    {
        let mut args = Vec::new();
        if let Some(traits) = options.traits.to_arg() {
            args.push("--traits".to_string());
            args.push(traits);
        }
        if options.hotplug {
            args.push("--hotplug".to_string());
        }
        if let Some(timeout) = options.timeout_ms {
            args.push("--timeout-ms".to_string());
            args.push(timeout.to_string());
        }

        let on_error = Arc::new(Mutex::new(on_error));
        let report = {
            let on_error = Arc::clone(&on_error);
            move |e: DeviceError| {
                let mut on_error = on_error.lock().unwrap_or_else(PoisonError::into_inner);
                (*on_error)(e)
            }
        };

        let hotplug = options.hotplug;
        let report_decode = report.clone();
        let on_data = Box::new(move |item: Value| match ListEvent::from_value(item) {
            Ok(ListEvent::Enumerated { devices }) => {
                devices.into_iter().map(DeviceEvent::Arrived).for_each(&mut on_event)
            }
            Ok(ListEvent::Arrived { device }) => on_event(DeviceEvent::Arrived(device)),
            Ok(ListEvent::Left { id }) if hotplug => on_event(DeviceEvent::Left(id)),
            Ok(ListEvent::Left { .. }) => {}
            Err(source) => report_decode(DeviceError::Sandbox(SandboxError::Decode {
                command: "device list".into(),
                source,
            })),
        });
        let report_sandbox = report;
        let on_sandbox_error = Box::new(move |e: SandboxError| report_sandbox(e.into()));

        tracing::debug!(hotplug, traits = ?options.traits.to_arg(), "Listing devices");
        Ok(self
            .sandbox
            .spawn_background_subcommand("list", args, on_data, on_sandbox_error)?)
    }

    /// Program a firmware file.
    ///
    /// # Arguments
    ///
    /// * `firmware` - `.hex` or `.zip` file
    /// * `core` - target core on multi-core devices
    /// * `options` - transport specific options, sent as `--options`
    pub fn program(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        firmware: &Path,
        core: Option<DeviceCore>,
        options: Option<ProgrammingOptions>,
        on_progress: Option<ProgressCallback>,
    ) -> Operation<(), DeviceError> {
        let mut args = vec![
            "--firmware".to_string(),
            firmware.to_string_lossy().into_owned(),
        ];
        if let Some(core) = core {
            args.push("--core".to_string());
            args.push(core.as_arg().to_string());
        }
        if let Some(options) = options.as_ref().and_then(ProgrammingOptions::to_arg) {
            args.push("--options".to_string());
            args.push(options);
        }
        self.run("program", device, args, None, on_progress)
    }

    /// Program firmware held in memory.
    ///
    /// The buffer is written to a temporary file that is removed once the
    /// operation settles, whether it succeeded, failed or was cancelled.
    pub fn program_buffer(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        firmware: &[u8],
        kind: FirmwareType,
        core: Option<DeviceCore>,
        options: Option<ProgrammingOptions>,
        on_progress: Option<ProgressCallback>,
    ) -> Operation<(), DeviceError> {
        let temp = match TempFirmware::write_in(&self.temp_dir, firmware, kind) {
            Ok(temp) => temp,
            Err(e) => return Operation::ready(Err(e.into())),
        };

        self.program(device, temp.path(), core, options, on_progress)
            .map(move |result| {
                drop(temp);
                result
            })
    }

    /// Erase the device.
    pub fn erase(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        core: Option<DeviceCore>,
        on_progress: Option<ProgressCallback>,
    ) -> Operation<(), DeviceError> {
        self.run("erase", device, Vec::new(), core, on_progress)
    }

    /// Recover a protected device by erasing it completely.
    pub fn recover(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        core: Option<DeviceCore>,
        on_progress: Option<ProgressCallback>,
    ) -> Operation<(), DeviceError> {
        self.run("recover", device, Vec::new(), core, on_progress)
    }

    /// Reset the device.
    pub fn reset(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        core: Option<DeviceCore>,
        kind: Option<ResetKind>,
    ) -> Operation<(), DeviceError> {
        let args = kind
            .map(|kind| vec!["--reset-kind".to_string(), kind.as_arg().to_string()])
            .unwrap_or_default();
        self.run("reset", device, args, core, None)
    }

    /// Read the device firmware.
    pub fn read_firmware(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        core: Option<DeviceCore>,
    ) -> Operation<Vec<u8>, DeviceError> {
        self.run_as::<FirmwareReadResult>("fw-read", device, Vec::new(), core)
            .map(|result| Ok(general_purpose::STANDARD.decode(result?.buffer)?))
    }

    /// Describe the firmware images on the device.
    pub fn fw_info(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        core: Option<DeviceCore>,
    ) -> Operation<FwInfo, DeviceError> {
        self.run_as("fw-info", device, Vec::new(), core)
    }

    /// Describe the memory layout of a core.
    pub fn core_info(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        core: Option<DeviceCore>,
    ) -> Operation<CoreInfo, DeviceError> {
        self.run_as("core-info", device, Vec::new(), core)
    }

    /// Read the readback protection status.
    pub fn get_protection_status(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        core: Option<DeviceCore>,
    ) -> Operation<ProtectionStatusResult, DeviceError> {
        self.run_as("protection-get", device, Vec::new(), core)
    }

    /// Enable readback protection for `level`.
    pub fn set_protection_status(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        level: ProtectionLevel,
        core: Option<DeviceCore>,
    ) -> Operation<(), DeviceError> {
        self.run(
            "protection-set",
            device,
            vec![level.as_arg().to_string()],
            core,
            None,
        )
    }

    /// Switch the MCU between application and programming mode.
    pub fn set_mcu_state(
        &self,
        device: &NrfutilDeviceWithSerialnumber,
        state: McuState,
        core: Option<DeviceCore>,
    ) -> Operation<(), DeviceError> {
        self.run(
            "mcu-state-set",
            device,
            vec![state.as_arg().to_string()],
            core,
            None,
        )
    }

    fn run(
        &self,
        command: &str,
        device: &NrfutilDeviceWithSerialnumber,
        args: Vec<String>,
        core: Option<DeviceCore>,
        on_progress: Option<ProgressCallback>,
    ) -> Operation<(), DeviceError> {
        let args = device_args(device, args, core);
        tracing::debug!(command, serial_number = %device.serial_number(), "Running device command");
        self.sandbox
            .spawn_subcommand(command, args, on_progress)
            .map(|result| result.map(drop).map_err(DeviceError::from))
    }

    fn run_as<T>(
        &self,
        command: &str,
        device: &NrfutilDeviceWithSerialnumber,
        args: Vec<String>,
        core: Option<DeviceCore>,
    ) -> Operation<T, DeviceError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let args = device_args(device, args, core);
        tracing::debug!(command, serial_number = %device.serial_number(), "Running device command");
        self.sandbox
            .spawn_subcommand_as::<T>(command, args, None)
            .map(|result| result.map_err(DeviceError::from))
    }
}

fn device_args(
    device: &NrfutilDeviceWithSerialnumber,
    mut args: Vec<String>,
    core: Option<DeviceCore>,
) -> Vec<String> {
    if let Some(core) = core {
        args.push("--core".to_string());
        args.push(core.as_arg().to_string());
    }
    args.push("--serial-number".to_string());
    args.push(device.serial_number().to_string());
    args
}
