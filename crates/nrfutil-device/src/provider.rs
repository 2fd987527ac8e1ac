//! The shared, lazily created device sandbox.
//!
//! ```text
//!   caller A ─┐
//!   caller B ─┼─► DeviceSandboxProvider::sandbox() ─► OnceCell ─► create once
//!   caller C ─┘                                        (A, B, C await the same init)
//! ```

use crate::client::DeviceClient;
use crate::error::Result;
use crate::settings::{tool_log_level, SettingsStore, VERBOSE_LOGGING_KEY};
use nrfutil_sandbox::{
    log_to_tracing, NrfutilSandbox, ProgressCallback, SandboxConfig, SandboxOverrides,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

/// Module name of nrfutil's device command.
pub const DEVICE_MODULE: &str = "device";

/// nrfutil-device version used when none is configured.
pub const DEFAULT_DEVICE_VERSION: &str = "2.7.16";

/// Where and how the device sandbox is installed.
#[derive(Debug, Clone)]
pub struct DeviceSandboxConfig {
    /// Application data directory.
    pub base_dir: PathBuf,
    /// Pinned nrfutil-device version.
    pub version: String,
    /// nrfutil executable.
    pub executable: PathBuf,
    /// Optional settings forwarded to nrfutil.
    pub overrides: SandboxOverrides,
}

impl DeviceSandboxConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `NRF_SANDBOX_BASE_DIR` | platform data directory |
    /// | `NRF_SANDBOX_DEVICE_VERSION` | [`DEFAULT_DEVICE_VERSION`] |
    /// | `NRF_SANDBOX_NRFUTIL` | `nrfutil` |
    ///
    /// The `NRFUTIL_*` overrides are read by [`SandboxOverrides::from_env`].
    pub fn from_env() -> Self {
        let base_dir = std::env::var("NRF_SANDBOX_BASE_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_base_dir);
        let version = std::env::var("NRF_SANDBOX_DEVICE_VERSION")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_VERSION.to_string());
        let executable = std::env::var("NRF_SANDBOX_NRFUTIL")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("nrfutil"));

        Self {
            base_dir,
            version,
            executable,
            overrides: SandboxOverrides::from_env(),
        }
    }

    /// Sandbox configuration for the device module.
    pub fn sandbox_config(&self) -> nrfutil_sandbox::Result<SandboxConfig> {
        SandboxConfig::builder()
            .base_dir(&self.base_dir)
            .module(DEVICE_MODULE)
            .version(&self.version)
            .executable(&self.executable)
            .overrides(self.overrides.clone())
            .build()
    }
}

/// Platform data directory of this application.
pub fn default_base_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "nordicsemi", "nrf-sandbox").map_or_else(
        || std::env::temp_dir().join("nrf-sandbox"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

/// Owns the device sandbox and creates it on first use.
///
/// Concurrent first callers share one initialisation. A failed
/// initialisation is not cached; the next call tries again.
pub struct DeviceSandboxProvider {
    config: SandboxConfig,
    settings: Arc<dyn SettingsStore>,
    sandbox: OnceCell<Arc<NrfutilSandbox>>,
}

impl std::fmt::Debug for DeviceSandboxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSandboxProvider")
            .field("config", &self.config)
            .field("initialized", &self.sandbox.initialized())
            .finish()
    }
}

impl DeviceSandboxProvider {
    /// Create a provider; nothing is installed until first use.
    pub fn new(config: SandboxConfig, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            config,
            settings,
            sandbox: OnceCell::new(),
        }
    }

    /// The prepared device sandbox.
    pub async fn sandbox(&self) -> Result<Arc<NrfutilSandbox>> {
        self.sandbox_with_progress(None).await
    }

    /// The prepared device sandbox, reporting install progress if this call
    /// performs the installation.
    pub async fn sandbox_with_progress(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Arc<NrfutilSandbox>> {
        let sandbox = self
            .sandbox
            .get_or_try_init(|| self.create(on_progress))
            .await?;
        Ok(Arc::clone(sandbox))
    }

    /// A device client over the prepared sandbox.
    pub async fn client(&self) -> Result<DeviceClient> {
        Ok(DeviceClient::new(self.sandbox().await?))
    }

    /// Persist the verbose-logging preference and apply it to the sandbox.
    pub fn set_verbose_logging(&self, verbose: bool) -> Result<()> {
        self.settings
            .set(VERBOSE_LOGGING_KEY, Value::Bool(verbose))?;
        if let Some(sandbox) = self.sandbox.get() {
            sandbox.set_log_level(Some(tool_log_level(self.settings.as_ref())));
        }
        Ok(())
    }

    async fn create(&self, on_progress: Option<ProgressCallback>) -> Result<Arc<NrfutilSandbox>> {
        let start = Instant::now();
        let sandbox = NrfutilSandbox::new(self.config.clone())?;

        // Lives as long as the sandbox.
        let _ = sandbox.on_logging(log_to_tracing);
        sandbox.set_log_level(Some(tool_log_level(self.settings.as_ref())));

        sandbox.prepare_sandbox(on_progress).await?;

        tracing::info!(
            module = %sandbox.module(),
            version = %sandbox.version(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Device sandbox ready"
        );
        Ok(Arc::new(sandbox))
    }
}
