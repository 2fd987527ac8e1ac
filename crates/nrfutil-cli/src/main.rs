//! nrf-sandbox entry point.
//!
//! Runs device operations through a version-pinned nrfutil installation.
//! Results are printed to stdout as JSON; logs go to stderr.
//!
//! ## Logging
//!
//! `RUST_LOG` selects what is shown. nrfutil's own log messages are
//! forwarded under the `nrfutil` target.

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{Cli, Commands, ProtectionCommand, Target};
use nrfutil_device::{
    DeviceClient, DeviceEvent, DeviceSandboxConfig, DeviceSandboxProvider, JsonFileSettings,
    ListOptions, NrfutilDeviceWithSerialnumber,
};
use nrfutil_sandbox::{jlink_compatibility, Progress, ProgressCallback};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(format!(
                    "nrfutil={default_level},nrfutil_sandbox={default_level},\
                     nrfutil_device={default_level},nrf_sandbox={default_level}"
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = DeviceSandboxConfig::from_env();
    if let Some(base_dir) = cli.base_dir.clone() {
        config.base_dir = base_dir;
    }
    if let Some(version) = cli.device_version.clone() {
        config.version = version;
    }
    tracing::debug!(?config, "Configuration loaded");

    let settings = JsonFileSettings::load(config.base_dir.join("settings.json"))?;
    let provider = DeviceSandboxProvider::new(config.sandbox_config()?, Arc::new(settings));
    if cli.tool_trace {
        provider.set_verbose_logging(true)?;
    }

    let sandbox = provider
        .sandbox_with_progress(Some(progress("install")))
        .await
        .context("failed to prepare the nrfutil sandbox")?;
    let client = DeviceClient::new(Arc::clone(&sandbox));

    match cli.command {
        Commands::List { traits, timeout_ms } => {
            let options = ListOptions {
                traits: cli::device_traits(&traits),
                hotplug: false,
                timeout_ms,
            };
            let task = client.list(options, print_event, |e| {
                tracing::warn!(error = %e, "Device listing error");
            })?;
            let code = task.closed().await;
            if code != Some(0) {
                bail!("device listing ended with exit code {code:?}");
            }
        }

        Commands::Watch { traits } => {
            let options = ListOptions {
                traits: cli::device_traits(&traits),
                hotplug: true,
                timeout_ms: None,
            };
            let task = client.list(options, print_event, |e| {
                tracing::warn!(error = %e, "Device watch error");
            })?;

            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Received interrupt, stopping watch");
                    task.stop();
                    task.closed().await;
                }
                code = task.closed() => {
                    tracing::info!(exit_code = ?code, "Device watch ended");
                }
            }
        }

        Commands::Program {
            target,
            firmware,
            chip_erase_mode,
            reset,
        } => {
            if cli::firmware_type(&firmware).is_none() {
                bail!("{} is neither a .hex nor a .zip file", firmware.display());
            }
            let options = cli::jlink_options(chip_erase_mode, reset);
            run_until_interrupted(client.program(
                &device(&target),
                &firmware,
                target.core.map(Into::into),
                options,
                Some(progress("program")),
            ))
            .await?;
            tracing::info!(firmware = %firmware.display(), "Programmed");
        }

        Commands::Erase { target } => {
            run_until_interrupted(client.erase(
                &device(&target),
                target.core.map(Into::into),
                Some(progress("erase")),
            ))
            .await?;
        }

        Commands::Recover { target } => {
            run_until_interrupted(client.recover(
                &device(&target),
                target.core.map(Into::into),
                Some(progress("recover")),
            ))
            .await?;
        }

        Commands::Reset { target, kind } => {
            client
                .reset(&device(&target), target.core.map(Into::into), kind.map(Into::into))
                .await?;
        }

        Commands::Read { target, output } => {
            let firmware = client
                .read_firmware(&device(&target), target.core.map(Into::into))
                .await?;
            tokio::fs::write(&output, &firmware)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            tracing::info!(bytes = firmware.len(), output = %output.display(), "Firmware read");
        }

        Commands::FwInfo { target } => {
            let info = client
                .fw_info(&device(&target), target.core.map(Into::into))
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::CoreInfo { target } => {
            let info = client
                .core_info(&device(&target), target.core.map(Into::into))
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::McuState { target, state } => {
            client
                .set_mcu_state(&device(&target), state.into(), target.core.map(Into::into))
                .await?;
        }

        Commands::Protection { action } => match action {
            ProtectionCommand::Get { target } => {
                let status = client
                    .get_protection_status(&device(&target), target.core.map(Into::into))
                    .await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            ProtectionCommand::Set { target, level } => {
                client
                    .set_protection_status(&device(&target), level.into(), target.core.map(Into::into))
                    .await?;
            }
        },

        Commands::Version => {
            let module = sandbox.get_module_version().await?;
            let core = sandbox.get_core_version().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "module": module, "core": core }))?
            );
        }

        Commands::Jlink => {
            let module = sandbox.get_module_version().await.ok();
            let compatibility = jlink_compatibility(module.as_ref(), Some(sandbox.version()));
            println!("{}", serde_json::to_string_pretty(&compatibility)?);
        }
    }

    Ok(())
}

fn device(target: &Target) -> NrfutilDeviceWithSerialnumber {
    NrfutilDeviceWithSerialnumber::new(target.serial_number.clone())
}

fn progress(step: &'static str) -> ProgressCallback {
    Box::new(move |p: &Progress| {
        tracing::info!(
            step,
            percent = p.progress_percentage,
            message = p.message.as_deref().unwrap_or_default(),
            "Progress"
        );
    })
}

fn print_event(event: DeviceEvent) {
    let line = match event {
        DeviceEvent::Arrived(device) => json!({ "event": "arrived", "device": device }),
        DeviceEvent::Left(id) => json!({ "event": "left", "id": id }),
    };
    println!("{line}");
}

/// Await `operation`, cancelling it on Ctrl-C.
async fn run_until_interrupted<T>(
    mut operation: nrfutil_sandbox::Operation<T, nrfutil_device::DeviceError>,
) -> anyhow::Result<T>
where
    T: Send + 'static,
{
    tokio::select! {
        result = &mut operation => Ok(result?),
        _ = signal::ctrl_c() => {
            tracing::info!("Received interrupt, cancelling");
            operation.cancel();
            let _ = operation.await;
            bail!("cancelled")
        }
    }
}
