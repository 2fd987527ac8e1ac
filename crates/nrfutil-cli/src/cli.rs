//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use nrfutil_device::{
    ChipEraseMode, DeviceCore, DeviceTraits, FirmwareType, McuState, ProgrammingOptions,
    ProtectionLevel, ResetKind,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nrf-sandbox")]
#[command(author, version, about = "Device operations through a version-pinned nrfutil", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Application data directory holding the sandboxes
    #[arg(long, global = true, env = "NRF_SANDBOX_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// nrfutil-device version to use
    #[arg(long = "device-version", global = true, env = "NRF_SANDBOX_DEVICE_VERSION")]
    pub device_version: Option<String>,

    /// Ask nrfutil for trace logging and keep that preference
    #[arg(long, global = true)]
    pub tool_trace: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Target device and core shared by single-device commands
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Serial number of the device
    #[arg(short, long)]
    pub serial_number: String,

    /// Core of a multi-core device
    #[arg(long)]
    pub core: Option<CoreArg>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List connected devices
    List {
        /// Only list devices with these traits (comma-separated)
        #[arg(long, value_delimiter = ',')]
        traits: Vec<TraitArg>,

        /// Enumeration timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List connected devices and keep reporting arrivals and departures
    Watch {
        /// Only watch devices with these traits (comma-separated)
        #[arg(long, value_delimiter = ',')]
        traits: Vec<TraitArg>,
    },

    /// Program a .hex or .zip firmware file
    Program {
        #[command(flatten)]
        target: Target,

        /// Firmware file
        #[arg(short, long)]
        firmware: PathBuf,

        /// Erase strategy for J-Link programming
        #[arg(long)]
        chip_erase_mode: Option<EraseArg>,

        /// Reset after J-Link programming
        #[arg(long)]
        reset: Option<ResetArg>,
    },

    /// Erase the device
    Erase {
        #[command(flatten)]
        target: Target,
    },

    /// Recover a protected device
    Recover {
        #[command(flatten)]
        target: Target,
    },

    /// Reset the device
    Reset {
        #[command(flatten)]
        target: Target,

        /// Kind of reset
        #[arg(long)]
        kind: Option<ResetArg>,
    },

    /// Read the device firmware to a file
    Read {
        #[command(flatten)]
        target: Target,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Describe the firmware on the device
    FwInfo {
        #[command(flatten)]
        target: Target,
    },

    /// Describe the memory layout of a core
    CoreInfo {
        #[command(flatten)]
        target: Target,
    },

    /// Switch the MCU between application and programming mode
    McuState {
        #[command(flatten)]
        target: Target,

        /// State to switch to
        state: StateArg,
    },

    /// Readback protection
    Protection {
        #[command(subcommand)]
        action: ProtectionCommand,
    },

    /// Show the sandboxed module and core versions
    Version,

    /// Check the installed J-Link against the one the module expects
    Jlink,
}

#[derive(Subcommand)]
pub enum ProtectionCommand {
    /// Show the protection status
    Get {
        #[command(flatten)]
        target: Target,
    },

    /// Enable protection
    Set {
        #[command(flatten)]
        target: Target,

        /// Region to protect
        #[arg(long, default_value = "all")]
        level: LevelArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CoreArg {
    Application,
    Network,
    Modem,
}

impl From<CoreArg> for DeviceCore {
    fn from(core: CoreArg) -> Self {
        match core {
            CoreArg::Application => DeviceCore::Application,
            CoreArg::Network => DeviceCore::Network,
            CoreArg::Modem => DeviceCore::Modem,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResetArg {
    System,
    Hard,
    Debug,
    Pin,
}

impl From<ResetArg> for ResetKind {
    fn from(kind: ResetArg) -> Self {
        match kind {
            ResetArg::System => ResetKind::System,
            ResetArg::Hard => ResetKind::Hard,
            ResetArg::Debug => ResetKind::Debug,
            ResetArg::Pin => ResetKind::Pin,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EraseArg {
    All,
    None,
    Touched,
}

impl From<EraseArg> for ChipEraseMode {
    fn from(mode: EraseArg) -> Self {
        match mode {
            EraseArg::All => ChipEraseMode::All,
            EraseArg::None => ChipEraseMode::None,
            EraseArg::Touched => ChipEraseMode::RangesTouchedByFirmware,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LevelArg {
    All,
    SecureRegions,
    Region0,
    Region0Region1,
}

impl From<LevelArg> for ProtectionLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::All => ProtectionLevel::All,
            LevelArg::SecureRegions => ProtectionLevel::SecureRegions,
            LevelArg::Region0 => ProtectionLevel::Region0,
            LevelArg::Region0Region1 => ProtectionLevel::Region0Region1,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StateArg {
    Application,
    Programming,
}

impl From<StateArg> for McuState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Application => McuState::Application,
            StateArg::Programming => McuState::Programming,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TraitArg {
    Usb,
    NordicUsb,
    NordicDfu,
    SeggerUsb,
    Jlink,
    SerialPorts,
    Broken,
    McuBoot,
    Modem,
}

/// Fold trait names into a filter.
pub fn device_traits(traits: &[TraitArg]) -> DeviceTraits {
    traits.iter().fold(DeviceTraits::default(), |mut acc, t| {
        match t {
            TraitArg::Usb => acc.usb = true,
            TraitArg::NordicUsb => acc.nordic_usb = true,
            TraitArg::NordicDfu => acc.nordic_dfu = true,
            TraitArg::SeggerUsb => acc.segger_usb = true,
            TraitArg::Jlink => acc.jlink = true,
            TraitArg::SerialPorts => acc.serial_ports = true,
            TraitArg::Broken => acc.broken = true,
            TraitArg::McuBoot => acc.mcu_boot = true,
            TraitArg::Modem => acc.modem = true,
        }
        acc
    })
}

/// J-Link options for `program`, `None` when no flag was given.
pub fn jlink_options(
    chip_erase_mode: Option<EraseArg>,
    reset: Option<ResetArg>,
) -> Option<ProgrammingOptions> {
    if chip_erase_mode.is_none() && reset.is_none() {
        return None;
    }
    Some(ProgrammingOptions::Jlink {
        chip_erase_mode: chip_erase_mode.map(Into::into),
        reset: reset.map(Into::into),
        verify: None,
    })
}

/// Firmware container format from the file extension.
pub fn firmware_type(path: &std::path::Path) -> Option<FirmwareType> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "hex" => Some(FirmwareType::Hex),
        "zip" => Some(FirmwareType::Zip),
        _ => None,
    }
}
