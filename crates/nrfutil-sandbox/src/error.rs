//! Error types for nrfutil-sandbox.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for nrfutil-sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while installing or running a sandboxed module.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The nrfutil process could not be started at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command line that was attempted
        command: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// A command ran but did not report success.
    #[error("{message}")]
    CommandFailed {
        /// Exit code, `None` if the process was terminated by a signal
        exit_code: Option<i32>,
        /// Composed diagnostic text (exit code, task_end message, stderr)
        message: String,
    },

    /// Installing the pinned module version failed.
    #[error("failed to install {module}={version}: {source}")]
    InstallFailed {
        /// Module name
        module: String,
        /// Pinned module version
        version: String,
        /// Failure of the underlying install command
        #[source]
        source: Box<SandboxError>,
    },

    /// Another process held the install lock for too long.
    #[error("install lock {path} still held after {waited:?}")]
    InstallLocked {
        /// Path of the lock file
        path: PathBuf,
        /// How long we waited before giving up
        waited: Duration,
    },

    /// The sandbox configuration is unusable.
    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    /// A result payload did not match the expected shape.
    #[error("unexpected payload from `{command}`: {source}")]
    Decode {
        /// Subcommand whose payload failed to decode
        command: String,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },

    /// A command succeeded but reported neither `info` nor `task_end` data.
    #[error("`{command}` did not report any data")]
    MissingPayload {
        /// Subcommand that was run
        command: String,
    },

    /// A line on stdout was not a valid event.
    #[error("malformed event line: {source}")]
    MalformedEvent {
        /// Offending line
        line: String,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// The task driving a process panicked or was aborted.
    #[error("process task failed: {0}")]
    TaskFailed(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Exit code of the failed process, when the error came from one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { exit_code, .. } => *exit_code,
            Self::InstallFailed { source, .. } => source.exit_code(),
            _ => None,
        }
    }
}
