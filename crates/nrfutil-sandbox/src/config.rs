//! Sandbox configuration and the child-process environment derived from it.

use crate::error::SandboxError;
use crate::protocol::LogLevel;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory below the base directory that holds all sandboxes.
pub const SANDBOXES_DIR: &str = "nrfutil-sandboxes";

/// Installation home of the sandboxed module.
pub const ENV_HOME: &str = "NRFUTIL_HOME";
/// Directory nrfutil looks for subcommand executables in.
pub const ENV_EXEC_PATH: &str = "NRFUTIL_EXEC_PATH";
/// Bootstrap configuration URL override.
pub const ENV_BOOTSTRAP_CONFIG_URL: &str = "NRFUTIL_BOOTSTRAP_CONFIG_URL";
/// Bootstrap tarball override.
pub const ENV_BOOTSTRAP_TARBALL_PATH: &str = "NRFUTIL_BOOTSTRAP_TARBALL_PATH";
/// Force the nrfdl plugin location.
pub const ENV_PLUGINS_DIR_FORCE_NRFDL_LOCATION: &str =
    "NRFUTIL_DEVICE_PLUGINS_DIR_FORCE_NRFDL_LOCATION";
/// Force the plugin directory to the nrfutil libdir.
pub const ENV_PLUGINS_DIR_FORCE_NRFUTIL_LIBDIR: &str =
    "NRFUTIL_DEVICE_PLUGINS_DIR_FORCE_NRFUTIL_LIBDIR";
/// Ignore missing subcommands instead of failing.
pub const ENV_IGNORE_MISSING_SUBCOMMAND: &str = "NRFUTIL_IGNORE_MISSING_SUBCOMMAND";
/// Tool log directive.
pub const ENV_LOG: &str = "NRFUTIL_LOG";
/// Package index URL override.
pub const ENV_PACKAGE_INDEX_URL: &str = "NRFUTIL_PACKAGE_INDEX_URL";

/// Optional settings forwarded to nrfutil as environment variables.
///
/// A setting that is `None` is removed from the child environment, even if
/// the host process has it set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxOverrides {
    /// `NRFUTIL_BOOTSTRAP_CONFIG_URL`
    pub bootstrap_config_url: Option<String>,
    /// `NRFUTIL_BOOTSTRAP_TARBALL_PATH`
    pub bootstrap_tarball_path: Option<PathBuf>,
    /// `NRFUTIL_DEVICE_PLUGINS_DIR_FORCE_NRFDL_LOCATION`
    pub plugins_dir_force_nrfdl_location: Option<PathBuf>,
    /// `NRFUTIL_DEVICE_PLUGINS_DIR_FORCE_NRFUTIL_LIBDIR`
    pub plugins_dir_force_nrfutil_libdir: Option<PathBuf>,
    /// `NRFUTIL_IGNORE_MISSING_SUBCOMMAND`
    pub ignore_missing_subcommand: Option<String>,
    /// `NRFUTIL_LOG`
    pub log: Option<String>,
    /// `NRFUTIL_PACKAGE_INDEX_URL`
    pub package_index_url: Option<String>,
}

impl SandboxOverrides {
    /// Read the overrides from the host environment.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `NRFUTIL_BOOTSTRAP_CONFIG_URL` | `bootstrap_config_url` |
    /// | `NRFUTIL_BOOTSTRAP_TARBALL_PATH` | `bootstrap_tarball_path` |
    /// | `NRFUTIL_DEVICE_PLUGINS_DIR_FORCE_NRFDL_LOCATION` | `plugins_dir_force_nrfdl_location` |
    /// | `NRFUTIL_DEVICE_PLUGINS_DIR_FORCE_NRFUTIL_LIBDIR` | `plugins_dir_force_nrfutil_libdir` |
    /// | `NRFUTIL_IGNORE_MISSING_SUBCOMMAND` | `ignore_missing_subcommand` |
    /// | `NRFUTIL_LOG` | `log` |
    /// | `NRFUTIL_PACKAGE_INDEX_URL` | `package_index_url` |
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            bootstrap_config_url: var(ENV_BOOTSTRAP_CONFIG_URL),
            bootstrap_tarball_path: var(ENV_BOOTSTRAP_TARBALL_PATH).map(PathBuf::from),
            plugins_dir_force_nrfdl_location: var(ENV_PLUGINS_DIR_FORCE_NRFDL_LOCATION)
                .map(PathBuf::from),
            plugins_dir_force_nrfutil_libdir: var(ENV_PLUGINS_DIR_FORCE_NRFUTIL_LIBDIR)
                .map(PathBuf::from),
            ignore_missing_subcommand: var(ENV_IGNORE_MISSING_SUBCOMMAND),
            log: var(ENV_LOG),
            package_index_url: var(ENV_PACKAGE_INDEX_URL),
        }
    }

    fn entries(&self) -> [(&'static str, Option<String>); 7] {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.to_string_lossy().into_owned());
        [
            (ENV_BOOTSTRAP_CONFIG_URL, self.bootstrap_config_url.clone()),
            (ENV_BOOTSTRAP_TARBALL_PATH, path(&self.bootstrap_tarball_path)),
            (
                ENV_PLUGINS_DIR_FORCE_NRFDL_LOCATION,
                path(&self.plugins_dir_force_nrfdl_location),
            ),
            (
                ENV_PLUGINS_DIR_FORCE_NRFUTIL_LIBDIR,
                path(&self.plugins_dir_force_nrfutil_libdir),
            ),
            (
                ENV_IGNORE_MISSING_SUBCOMMAND,
                self.ignore_missing_subcommand.clone(),
            ),
            (ENV_LOG, self.log.clone()),
            (ENV_PACKAGE_INDEX_URL, self.package_index_url.clone()),
        ]
    }
}

/// Environment applied to every nrfutil process of one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxEnv {
    set: BTreeMap<&'static str, String>,
    removed: Vec<&'static str>,
}

impl SandboxEnv {
    /// Derive the environment for a sandbox home directory.
    pub fn new(home: &Path, overrides: &SandboxOverrides) -> Self {
        let mut set = BTreeMap::new();
        set.insert(ENV_HOME, home.to_string_lossy().into_owned());
        set.insert(ENV_EXEC_PATH, home.join("bin").to_string_lossy().into_owned());

        let mut removed = Vec::new();
        for (name, value) in overrides.entries() {
            match value {
                Some(value) => {
                    set.insert(name, value);
                }
                None => removed.push(name),
            }
        }

        Self { set, removed }
    }

    /// Value of a variable in the child environment, if it is set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.set.get(name).map(String::as_str)
    }

    /// Variables set in the child environment.
    pub fn vars(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.set.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Variables removed from the child environment.
    pub fn removed(&self) -> &[&'static str] {
        &self.removed
    }

    /// Apply the environment to a command.
    pub fn apply(&self, command: &mut tokio::process::Command) {
        for name in &self.removed {
            command.env_remove(name);
        }
        command.envs(self.vars());
    }
}

/// Configuration of one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Application data directory the sandboxes live under.
    pub base_dir: PathBuf,
    /// Module name, e.g. `device`.
    pub module: String,
    /// Pinned module version, e.g. `2.1.1`.
    pub version: String,
    /// nrfutil executable (default: `nrfutil`, resolved through `PATH`).
    pub executable: PathBuf,
    /// Arguments placed before every invocation, for launchers and wrappers.
    pub executable_args: Vec<String>,
    /// Optional settings forwarded as environment variables.
    pub overrides: SandboxOverrides,
    /// Tool log level (`--log-level`), unset means nrfutil's default.
    pub log_level: Option<LogLevel>,
    /// Maximum time to wait for another process's install to finish.
    pub install_lock_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            module: String::new(),
            version: String::new(),
            executable: PathBuf::from("nrfutil"),
            executable_args: Vec::new(),
            overrides: SandboxOverrides::default(),
            log_level: None,
            install_lock_timeout: Duration::from_secs(300),
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Installation home: `<base_dir>/nrfutil-sandboxes/<module>/<version>`.
    pub fn home_dir(&self) -> PathBuf {
        self.base_dir
            .join(SANDBOXES_DIR)
            .join(&self.module)
            .join(&self.version)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(SandboxError::InvalidConfig("base_dir is required".into()));
        }
        if self.module.is_empty() {
            return Err(SandboxError::InvalidConfig("module is required".into()));
        }
        if self.version.is_empty() {
            return Err(SandboxError::InvalidConfig("version is required".into()));
        }
        if self.module.contains(['/', '\\']) || self.version.contains(['/', '\\']) {
            return Err(SandboxError::InvalidConfig(
                "module and version must not contain path separators".into(),
            ));
        }
        if self.executable.as_os_str().is_empty() {
            return Err(SandboxError::InvalidConfig("executable is required".into()));
        }
        Ok(())
    }
}

/// Builder for SandboxConfig.
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Set the base directory.
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_dir = path.into();
        self
    }

    /// Set the module name.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.config.module = module.into();
        self
    }

    /// Set the pinned module version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Set the nrfutil executable.
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.executable = path.into();
        self
    }

    /// Set arguments placed before every invocation.
    pub fn executable_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.executable_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the environment overrides.
    pub fn overrides(mut self, overrides: SandboxOverrides) -> Self {
        self.config.overrides = overrides;
        self
    }

    /// Set the tool log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = Some(level);
        self
    }

    /// Set how long to wait for another process's install.
    pub fn install_lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.install_lock_timeout = timeout;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<SandboxConfig, SandboxError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
