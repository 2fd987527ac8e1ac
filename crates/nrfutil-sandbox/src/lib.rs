//! # nrfutil-sandbox
//!
//! Pinned, isolated installations of nrfutil modules, and typed access to
//! their JSON event stream.
//!
//! ## Overview
//!
//! An [`NrfutilSandbox`] owns one installation of one module at one version
//! under `<base_dir>/nrfutil-sandboxes/<module>/<version>`. It installs the
//! module on first use and runs commands against it in three ways:
//!
//! - [`NrfutilSandbox::exec_subcommand`]: run to completion and decode the result
//! - [`NrfutilSandbox::spawn_subcommand`]: a cancellable [`Operation`]
//! - [`NrfutilSandbox::spawn_background_subcommand`]: a streaming [`BackgroundTask`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use nrfutil_sandbox::{NrfutilSandbox, SandboxConfig};
//!
//! #[tokio::main]
//! async fn main() -> nrfutil_sandbox::Result<()> {
//!     let config = SandboxConfig::builder()
//!         .base_dir("/var/lib/my-app")
//!         .module("device")
//!         .version("2.1.1")
//!         .build()?;
//!
//!     let sandbox = NrfutilSandbox::new(config)?;
//!     sandbox.prepare_sandbox(None).await?;
//!
//!     let version = sandbox.get_module_version().await?;
//!     println!("{} {}", version.name, version.version);
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod config;
pub mod dependency;
pub mod error;
pub mod jlink;
pub mod lock;
pub mod logging;
pub mod operation;
mod process;
pub mod protocol;
pub mod sandbox;
pub mod version;

pub use background::{BackgroundTask, ClosedSubscription};
pub use config::{SandboxConfig, SandboxConfigBuilder, SandboxEnv, SandboxOverrides};
pub use dependency::{find_dependency, Dependency, ModuleVersion, Plugin, TopLevelDependency};
pub use error::{Result, SandboxError};
pub use jlink::{jlink_compatibility, JlinkCompatibility, JlinkVersionError};
pub use logging::{log_to_tracing, LogSubscription};
pub use operation::Operation;
pub use process::{DataCallback, ErrorCallback, ProgressCallback};
pub use protocol::{LogLevel, LogMessage, NrfutilEvent, Progress, TaskEnd};
pub use sandbox::NrfutilSandbox;
pub use version::{describe_version, version_to_string, DiscriminatedVersion, SemanticVersion};
