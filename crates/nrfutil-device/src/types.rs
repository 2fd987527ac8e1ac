//! Device records and the argument types of device commands.

use crate::error::DeviceError;
use nrfutil_sandbox::DiscriminatedVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Capability flags of a connected device.
///
/// Also used as a filter for `list`: only set flags are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceTraits {
    pub usb: bool,
    pub nordic_usb: bool,
    pub nordic_dfu: bool,
    pub segger_usb: bool,
    pub jlink: bool,
    pub serial_ports: bool,
    pub broken: bool,
    pub mcu_boot: bool,
    pub modem: bool,
}

impl DeviceTraits {
    fn flags(&self) -> [(&'static str, bool); 9] {
        [
            ("usb", self.usb),
            ("nordicUsb", self.nordic_usb),
            ("nordicDfu", self.nordic_dfu),
            ("seggerUsb", self.segger_usb),
            ("jlink", self.jlink),
            ("serialPorts", self.serial_ports),
            ("broken", self.broken),
            ("mcuBoot", self.mcu_boot),
            ("modem", self.modem),
        ]
    }

    /// Comma-joined names of the set flags, `None` if no flag is set.
    pub fn to_arg(&self) -> Option<String> {
        let names: Vec<&str> = self
            .flags()
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect();
        (!names.is_empty()).then(|| names.join(","))
    }
}

/// USB descriptor summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsbInfo {
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

/// Details reported by a SEGGER J-Link probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JlinkInfo {
    pub board_version: Option<String>,
    pub device_family: Option<String>,
    pub device_version: Option<String>,
    pub jlink_ob_firmware_version: Option<String>,
    pub serial_number: Option<String>,
}

/// A serial port exposed by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SerialPort {
    pub path: Option<String>,
    pub com_name: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub vcom: Option<u32>,
}

/// A device as enumerated by `nrfutil device list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NrfutilDevice {
    /// Enumeration id, stable while the device stays connected.
    pub id: u64,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub traits: DeviceTraits,
    #[serde(default)]
    pub usb: Option<UsbInfo>,
    #[serde(default)]
    pub jlink: Option<JlinkInfo>,
    #[serde(default)]
    pub serial_ports: Vec<SerialPort>,
}

/// A device that can be addressed by serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NrfutilDeviceWithSerialnumber {
    device: NrfutilDevice,
    serial_number: String,
}

impl NrfutilDeviceWithSerialnumber {
    /// Address a device directly by serial number.
    pub fn new(serial_number: impl Into<String>) -> Self {
        let serial_number = serial_number.into();
        Self {
            device: NrfutilDevice {
                serial_number: Some(serial_number.clone()),
                ..Default::default()
            },
            serial_number,
        }
    }

    /// Serial number used for `--serial-number`.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// The full device record.
    pub fn device(&self) -> &NrfutilDevice {
        &self.device
    }
}

impl TryFrom<NrfutilDevice> for NrfutilDeviceWithSerialnumber {
    type Error = DeviceError;

    fn try_from(device: NrfutilDevice) -> Result<Self, Self::Error> {
        match device.serial_number.clone().filter(|s| !s.is_empty()) {
            Some(serial_number) => Ok(Self {
                device,
                serial_number,
            }),
            None => Err(DeviceError::MissingSerialNumber(device.id)),
        }
    }
}

/// One item of the `list` stream.
/// One item of the `list` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListEvent {
    Enumerated { devices: Vec<NrfutilDevice> },
    Arrived { device: NrfutilDevice },
    Left { id: u64 },
}

#[derive(Deserialize)]
struct Enumeration {
    devices: Vec<NrfutilDevice>,
}

// Hotplug items carry `"event": "Arrived" | "Left"`.
#[derive(Deserialize)]
#[serde(tag = "event")]
enum HotplugEvent {
    Arrived { device: NrfutilDevice },
    Left { id: u64 },
}

impl ListEvent {
    /// Decode a stream item: `{devices: [..]}` from enumeration, otherwise
    /// a hotplug item selected by its `event` field.
    pub(crate) fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("devices").is_some() {
            let Enumeration { devices } = serde_json::from_value(value)?;
            return Ok(Self::Enumerated { devices });
        }

        Ok(match serde_json::from_value(value)? {
            HotplugEvent::Arrived { device } => Self::Arrived { device },
            HotplugEvent::Left { id } => Self::Left { id },
        })
    }
}

/// What `list` reports about connected devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device is present, either at enumeration or by hotplug.
    Arrived(NrfutilDevice),
    /// The device with this enumeration id was disconnected.
    Left(u64),
}

/// Options of `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only report devices with these traits.
    pub traits: DeviceTraits,
    /// Keep running and report arrivals and departures.
    pub hotplug: bool,
    /// Enumeration timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

macro_rules! arg_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $arg:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $arg)] $variant),+
        }

        impl $name {
            /// Value as passed on the command line.
            pub fn as_arg(&self) -> &'static str {
                match self {
                    $(Self::$variant => $arg),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_arg())
            }
        }
    };
}

arg_enum!(
    /// Target core of multi-core devices (`--core`).
    DeviceCore {
        Application => "Application",
        Network => "Network",
        Modem => "Modem",
    }
);

arg_enum!(
    /// Reset kind (`--reset-kind`).
    ResetKind {
        System => "RESET_SYSTEM",
        Hard => "RESET_HARD",
        Debug => "RESET_DEBUG",
        Pin => "RESET_PIN",
        ViaSecdom => "RESET_VIA_SECDOM",
    }
);

arg_enum!(
    /// Erase strategy before J-Link programming.
    ChipEraseMode {
        All => "ERASE_ALL",
        None => "ERASE_NONE",
        RangesTouchedByFirmware => "ERASE_RANGES_TOUCHED_BY_FIRMWARE",
    }
);

arg_enum!(
    /// Verification after J-Link programming.
    VerifyMode {
        Hash => "VERIFY_HASH",
        None => "VERIFY_NONE",
        Read => "VERIFY_READ",
    }
);

arg_enum!(
    /// MCU state (`mcu-state-set`, and the end state after DFU).
    McuState {
        Application => "Application",
        Programming => "Programming",
    }
);

arg_enum!(
    /// Region to protect with `protection-set`.
    ProtectionLevel {
        All => "All",
        SecureRegions => "SecureRegions",
        Region0 => "Region0",
        Region0Region1 => "Region0Region1",
    }
);

arg_enum!(
    /// Readback protection reported by `protection-get`.
    ProtectionStatus {
        None => "NRFDL_PROTECTION_STATUS_NONE",
        Region0 => "NRFDL_PROTECTION_STATUS_REGION0",
        Region0Secure => "NRFDL_PROTECTION_STATUS_REGION0_SECURE",
        Secure => "NRFDL_PROTECTION_STATUS_SECURE",
    }
);

/// Container format of a firmware buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareType {
    /// Intel HEX.
    Hex,
    /// DFU or MCUboot zip package.
    Zip,
}

impl FirmwareType {
    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::Zip => "zip",
        }
    }
}

/// Transport specific `program` options, sent as `--options k=v,...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammingOptions {
    /// Programming through a J-Link probe.
    Jlink {
        chip_erase_mode: Option<ChipEraseMode>,
        reset: Option<ResetKind>,
        verify: Option<VerifyMode>,
    },
    /// Programming through the MCUboot bootloader.
    McuBoot {
        mcu_end_state: Option<McuState>,
        net_core_upload_delay: Option<u32>,
    },
    /// Programming through Nordic DFU.
    NordicDfu { mcu_end_state: Option<McuState> },
}

impl ProgrammingOptions {
    /// Comma-joined `key=value` pairs, `None` if nothing is set.
    pub fn to_arg(&self) -> Option<String> {
        let mut pairs = Vec::new();
        match self {
            Self::Jlink {
                chip_erase_mode,
                reset,
                verify,
            } => {
                if let Some(mode) = chip_erase_mode {
                    pairs.push(format!("chip_erase_mode={mode}"));
                }
                if let Some(kind) = reset {
                    pairs.push(format!("reset={kind}"));
                }
                if let Some(verify) = verify {
                    pairs.push(format!("verify={verify}"));
                }
            }
            Self::McuBoot {
                mcu_end_state,
                net_core_upload_delay,
            } => {
                if let Some(state) = mcu_end_state {
                    pairs.push(format!("mcu_end_state={}", mcu_end_state_arg(*state)));
                }
                if let Some(delay) = net_core_upload_delay {
                    pairs.push(format!("net_core_upload_delay={delay}"));
                }
            }
            Self::NordicDfu { mcu_end_state } => {
                if let Some(state) = mcu_end_state {
                    pairs.push(format!("mcu_end_state={}", mcu_end_state_arg(*state)));
                }
            }
        }
        (!pairs.is_empty()).then(|| pairs.join(","))
    }
}

fn mcu_end_state_arg(state: McuState) -> &'static str {
    match state {
        McuState::Application => "NRFDL_MCU_STATE_APPLICATION",
        McuState::Programming => "NRFDL_MCU_STATE_PROGRAMMING",
    }
}

/// Result of `protection-get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatusResult {
    pub protection_status: ProtectionStatus,
    #[serde(default)]
    pub serial_number: Option<String>,
}

/// Address range of a firmware image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageLocation {
    pub address: u64,
    pub size: u64,
}

/// One image reported by `fw-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageInfo {
    pub image_type: Option<String>,
    pub image_location: Option<ImageLocation>,
    pub version: Option<DiscriminatedVersion>,
}

/// Result of `fw-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FwInfo {
    pub image_info_list: Vec<ImageInfo>,
}

/// Memory layout reported by `core-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreInfo {
    pub code_address: Option<u64>,
    pub code_page_size: Option<u64>,
    pub code_size: Option<u64>,
    pub uicr_address: Option<u64>,
    pub info_page_size: Option<u64>,
    pub code_ram_present: Option<bool>,
    pub code_ram_address: Option<u64>,
    pub data_ram_address: Option<u64>,
    pub ram_size: Option<u64>,
    pub qspi_present: Option<bool>,
    pub xip_address: Option<u64>,
    pub xip_size: Option<u64>,
    pub pin_reset_pin: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FirmwareReadResult {
    pub buffer: String,
}
