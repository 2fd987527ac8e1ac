//! One pinned, isolated installation of an nrfutil module.
//!
//! ```text
//!   NrfutilSandbox::new ──► prepare_sandbox ──────────────► spawn_subcommand (0..N)
//!                            │ create home                  spawn_background_subcommand
//!                            │ lock .install.lock           exec_subcommand
//!                            │ is_sandbox_installed?
//!                            └ install <module>=<version>
//! ```
//!
//! Every invocation runs with `NRFUTIL_HOME` pointing at
//! `<base_dir>/nrfutil-sandboxes/<module>/<version>`, so the module version
//! installed there is the one that answers.

use crate::background::BackgroundTask;
use crate::config::{SandboxConfig, SandboxEnv};
use crate::dependency::ModuleVersion;
use crate::error::{Result, SandboxError};
use crate::lock::InstallLock;
use crate::logging::{LogSubscribers, LogSubscription};
use crate::operation::Operation;
use crate::process::{
    DataCallback, ErrorCallback, EventSink, Invocation, ProgressCallback,
};
use crate::protocol::{Completion, LogLevel, LogMessage};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sandbox for one `(base_dir, module, version)`.
///
/// Share it behind an `Arc`; all methods take `&self` and any number of
/// commands may run concurrently.
#[derive(Debug)]
pub struct NrfutilSandbox {
    config: SandboxConfig,
    home: PathBuf,
    env: SandboxEnv,
    logs: LogSubscribers,
    log_level: RwLock<Option<LogLevel>>,
    installed: AtomicBool,
}

impl NrfutilSandbox {
    /// Create a sandbox. Nothing is installed until
    /// [`prepare_sandbox`](Self::prepare_sandbox) runs.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        let home = config.home_dir();
        let env = SandboxEnv::new(&home, &config.overrides);
        let log_level = RwLock::new(config.log_level);

        Ok(Self {
            config,
            home,
            env,
            logs: LogSubscribers::default(),
            log_level,
            installed: AtomicBool::new(false),
        })
    }

    /// Sandbox configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Module name.
    pub fn module(&self) -> &str {
        &self.config.module
    }

    /// Pinned module version.
    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// Installation home of this sandbox.
    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    /// Environment every child process runs with.
    pub fn env(&self) -> &SandboxEnv {
        &self.env
    }

    /// Subscribe to tool-side log messages of every command.
    pub fn on_logging<F>(&self, callback: F) -> LogSubscription
    where
        F: Fn(&LogMessage) + Send + Sync + 'static,
    {
        self.logs.subscribe(callback)
    }

    /// Set the `--log-level` passed to commands started from now on.
    pub fn set_log_level(&self, level: Option<LogLevel>) {
        *self.log_level.write().unwrap_or_else(PoisonError::into_inner) = level;
    }

    /// Current tool log level.
    pub fn log_level(&self) -> Option<LogLevel> {
        *self.log_level.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the sandbox home directory.
    pub async fn prepare_environment(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.home).await?;
        Ok(())
    }

    /// Manifest of the module installed in this sandbox.
    pub async fn get_module_version(&self) -> Result<ModuleVersion> {
        let args = vec![self.config.module.clone(), "--version".to_string()];
        self.query_version(args).await
    }

    /// Manifest of the nrfutil core executable.
    pub async fn get_core_version(&self) -> Result<ModuleVersion> {
        self.query_version(vec!["--version".to_string()]).await
    }

    async fn query_version(&self, args: Vec<String>) -> Result<ModuleVersion> {
        let label = args.join(" ");
        let info = Arc::new(Mutex::new(None));

        let mut sink = self.sink(None);
        let captured = Arc::clone(&info);
        sink.on_info = Some(Box::new(move |value| {
            *captured.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        }));

        let data = self.run(self.invocation(args), &mut sink).await?;
        let info = info.lock().unwrap_or_else(PoisonError::into_inner).take();

        let payload = info
            .or(data)
            .ok_or_else(|| SandboxError::MissingPayload {
                command: label.clone(),
            })?;
        decode(&label, Some(payload))
    }

    /// Whether the pinned version is installed in this sandbox.
    ///
    /// A version probe that fails for any reason, including a missing
    /// executable, counts as not installed.
    pub async fn is_sandbox_installed(&self) -> bool {
        if self.installed.load(Ordering::Acquire) {
            return true;
        }
        if !tokio::fs::try_exists(&self.home).await.unwrap_or(false) {
            return false;
        }

        match self.get_module_version().await {
            Ok(reported) if reported.version == self.config.version => {
                self.installed.store(true, Ordering::Release);
                true
            }
            Ok(reported) => {
                tracing::info!(
                    module = %self.config.module,
                    expected = %self.config.version,
                    installed = %reported.version,
                    "Sandbox holds a different module version"
                );
                false
            }
            Err(e) => {
                tracing::debug!(module = %self.config.module, error = %e, "Version probe failed, treating sandbox as not installed");
                false
            }
        }
    }

    /// Install the pinned module version into this sandbox.
    pub async fn install(&self, on_progress: Option<ProgressCallback>) -> Result<()> {
        let start = Instant::now();
        tracing::info!(
            module = %self.config.module,
            version = %self.config.version,
            home = %self.home.display(),
            "Installing nrfutil module"
        );

        let args = vec![
            "install".to_string(),
            format!("{}={}", self.config.module, self.config.version),
            "--force".to_string(),
        ];
        let mut sink = self.sink(on_progress);

        self.run(self.invocation(args), &mut sink)
            .await
            .map_err(|e| SandboxError::InstallFailed {
                module: self.config.module.clone(),
                version: self.config.version.clone(),
                source: Box::new(e),
            })?;

        self.installed.store(true, Ordering::Release);
        tracing::info!(
            module = %self.config.module,
            version = %self.config.version,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "nrfutil module installed"
        );
        Ok(())
    }

    /// Make sure the pinned version is installed, installing it if needed.
    ///
    /// Idempotent. Holds the cross-process install lock while checking and
    /// installing. A failed install leaves the sandbox uninstalled; calling
    /// again retries.
    pub async fn prepare_sandbox(&self, on_progress: Option<ProgressCallback>) -> Result<()> {
        self.prepare_environment().await?;
        if self.installed.load(Ordering::Acquire) {
            return Ok(());
        }

        let _lock = InstallLock::acquire(&self.home, self.config.install_lock_timeout).await?;
        if self.is_sandbox_installed().await {
            tracing::debug!(module = %self.config.module, version = %self.config.version, "Sandbox already installed");
            return Ok(());
        }
        self.install(on_progress).await
    }

    /// Run `<module> <command> [args]` and resolve with its `task_end` data.
    ///
    /// Does not prepare the sandbox.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_subcommand(
        &self,
        command: &str,
        args: Vec<String>,
        on_progress: Option<ProgressCallback>,
    ) -> Operation<Option<Value>> {
        let invocation = self.invocation(self.module_args(command, args));
        let mut sink = self.sink(on_progress);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        Operation::spawn(cancel, async move {
            invocation
                .spawn()?
                .drive(&mut sink, token)
                .await?
                .into_result()
        })
    }

    /// Like [`spawn_subcommand`](Self::spawn_subcommand), decoding the
    /// `task_end` data into `T`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_subcommand_as<T>(
        &self,
        command: &str,
        args: Vec<String>,
        on_progress: Option<ProgressCallback>,
    ) -> Operation<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let label = format!("{} {command}", self.config.module);
        self.spawn_subcommand(command, args, on_progress)
            .map(move |result| decode(&label, result?))
    }

    /// Run a command to completion without a cancellation handle.
    pub async fn exec_subcommand<T>(&self, command: &str, args: Vec<String>) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let label = format!("{} {command}", self.config.module);
        let invocation = self.invocation(self.module_args(command, args));
        let mut sink = self.sink(None);
        let data = self.run(invocation, &mut sink).await?;
        decode(&label, data)
    }

    /// Run a long-lived command, streaming data items to `on_data`.
    ///
    /// Each `info` event is delivered as it arrives. If the final `task_end`
    /// carries an array, its elements follow one by one; any other non-null
    /// payload is delivered as a single item. Malformed output lines and a
    /// failed close are reported to `on_error`, except after
    /// [`BackgroundTask::stop`].
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_background_subcommand(
        &self,
        command: &str,
        args: Vec<String>,
        on_data: DataCallback,
        on_error: ErrorCallback,
    ) -> Result<BackgroundTask> {
        let process = self
            .invocation(self.module_args(command, args))
            .spawn()?;

        let cancel = CancellationToken::new();
        let (task, notifier) = BackgroundTask::new(cancel.clone());

        let mut sink = self.sink(None);
        sink.on_info = Some(on_data);
        sink.on_malformed = Some(on_error);

        tokio::spawn(async move {
            let outcome = process.drive(&mut sink, cancel.clone()).await;
            let (Some(mut on_data), Some(mut on_error)) =
                (sink.on_info.take(), sink.on_malformed.take())
            else {
                notifier.close(None);
                return;
            };

            let exit_code = match outcome {
                Ok(outcome) => {
                    let exit_code = outcome.exit_code;
                    match outcome.completion {
                        Completion::Success(Some(Value::Array(items))) => {
                            items.into_iter().for_each(&mut on_data)
                        }
                        Completion::Success(Some(Value::Null) | None) => {}
                        Completion::Success(Some(item)) => on_data(item),
                        Completion::Failure(message) if !cancel.is_cancelled() => {
                            on_error(SandboxError::CommandFailed { exit_code, message })
                        }
                        Completion::Failure(_) => {}
                    }
                    exit_code
                }
                Err(e) => {
                    if !cancel.is_cancelled() {
                        on_error(e);
                    }
                    None
                }
            };

            notifier.close(exit_code);
        });

        Ok(task)
    }

    fn module_args(&self, command: &str, args: Vec<String>) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push(self.config.module.clone());
        full.push(command.to_string());
        full.extend(args);
        full
    }

    fn invocation(&self, args: Vec<String>) -> Invocation {
        let mut full = self.config.executable_args.clone();
        full.extend(args);
        full.push("--json".to_string());
        full.push("--log-output=stdout".to_string());
        if let Some(level) = self.log_level() {
            full.push("--log-level".to_string());
            full.push(level.as_arg().to_string());
        }

        Invocation {
            program: self.config.executable.clone(),
            args: full,
            env: self.env.clone(),
        }
    }

    fn sink(&self, on_progress: Option<ProgressCallback>) -> EventSink {
        EventSink {
            logs: self.logs.clone(),
            on_progress,
            ..Default::default()
        }
    }

    async fn run(&self, invocation: Invocation, sink: &mut EventSink) -> Result<Option<Value>> {
        invocation
            .spawn()?
            .drive(sink, CancellationToken::new())
            .await?
            .into_result()
    }
}

fn decode<T: DeserializeOwned>(command: &str, data: Option<Value>) -> Result<T> {
    serde_json::from_value(data.unwrap_or(Value::Null)).map_err(|source| SandboxError::Decode {
        command: command.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> NrfutilSandbox {
        let config = SandboxConfig::builder()
            .base_dir("/data/app")
            .module("device")
            .version("2.1.1")
            .executable("/usr/bin/nrfutil")
            .executable_args(["--launcher"])
            .build()
            .unwrap();
        NrfutilSandbox::new(config).unwrap()
    }

    #[test]
    fn test_invocation_args() {
        let sandbox = sandbox();
        let invocation =
            sandbox.invocation(sandbox.module_args("erase", vec!["--serial-number".into(), "123".into()]));

        assert_eq!(invocation.program, PathBuf::from("/usr/bin/nrfutil"));
        assert_eq!(
            invocation.args,
            vec![
                "--launcher",
                "device",
                "erase",
                "--serial-number",
                "123",
                "--json",
                "--log-output=stdout"
            ]
        );
    }

    #[test]
    fn test_log_level_is_appended() {
        let sandbox = sandbox();
        sandbox.set_log_level(Some(LogLevel::Trace));

        let invocation = sandbox.invocation(sandbox.module_args("reset", vec![]));
        assert!(invocation.args.ends_with(&["--log-level".to_string(), "trace".to_string()]));

        sandbox.set_log_level(None);
        let invocation = sandbox.invocation(sandbox.module_args("reset", vec![]));
        assert!(!invocation.args.contains(&"--log-level".to_string()));
    }

    #[test]
    fn test_home_and_env() {
        let sandbox = sandbox();
        assert_eq!(
            sandbox.home_dir(),
            Path::new("/data/app/nrfutil-sandboxes/device/2.1.1")
        );
        assert_eq!(
            sandbox.env().get(crate::config::ENV_EXEC_PATH),
            Some("/data/app/nrfutil-sandboxes/device/2.1.1/bin")
        );
    }

    #[test]
    fn test_decode_missing_data_as_option() {
        let value: Option<Value> = decode("device reset", None).unwrap();
        assert!(value.is_none());

        let err = decode::<ModuleVersion>("device --version", None).unwrap_err();
        assert!(matches!(err, SandboxError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::builder()
            .base_dir(dir.path())
            .module("device")
            .version("2.1.1")
            .executable(dir.path().join("does-not-exist"))
            .build()
            .unwrap();
        let sandbox = NrfutilSandbox::new(config).unwrap();
        sandbox.prepare_environment().await.unwrap();

        assert!(!sandbox.is_sandbox_installed().await);
    }
}
