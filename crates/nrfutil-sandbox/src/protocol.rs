//! nrfutil's line-delimited JSON event stream.
//!
//! With `--json --log-output=stdout` every stdout line is one object:
//!
//! ```text
//! {"type":"task_begin","data":{"task":{...}}}
//! {"type":"task_progress","data":{"task":{...},"progress":{"progressPercentage":50}}}
//! {"type":"log","data":{"level":"INFO","message":"...","timestamp":"..."}}
//! {"type":"info","data":{...}}
//! {"type":"task_end","data":{"task":{...},"result":"success","data":{...}}}
//! ```
//!
//! [`StreamDecoder`] turns lines into [`NrfutilEvent`]s and tracks whether the
//! process has reported its result yet.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A task nrfutil is working on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    /// Task identifier.
    pub id: String,
    /// Task name, e.g. `program`.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Task specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Progress report of a running task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Progress {
    /// Completion in percent.
    pub progress_percentage: f64,
    /// Progress message.
    pub message: Option<String>,
    /// Description of the current step.
    pub description: Option<String>,
    /// Name of the current step.
    pub name: Option<String>,
    /// Current step number.
    pub step: Option<u32>,
    /// Total number of steps.
    pub amount_of_steps: Option<u32>,
    /// Elapsed time in milliseconds.
    pub duration: Option<u64>,
}

/// Payload of a `task_begin` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskBegin {
    /// Task that started.
    pub task: Task,
}

/// Payload of a `task_progress` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Task the progress belongs to.
    #[serde(default)]
    pub task: Option<Task>,
    /// Progress report.
    pub progress: Progress,
}

/// Outcome reported by `task_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    /// Task completed.
    Success,
    /// Task failed.
    Fail,
}

/// Error details attached to a failed `task_end`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskError {
    /// Tool specific error code.
    pub code: i64,
    /// Error description.
    pub description: String,
}

/// Payload of a `task_end` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnd {
    /// Task that ended.
    #[serde(default)]
    pub task: Option<Task>,
    /// Success or failure.
    pub result: TaskResult,
    /// Summary message.
    #[serde(default)]
    pub message: Option<String>,
    /// Error details on failure.
    #[serde(default)]
    pub error: Option<TaskError>,
    /// Result data on success.
    #[serde(default)]
    pub data: Option<Value>,
}

impl TaskEnd {
    /// True if the task reported success.
    pub fn is_success(&self) -> bool {
        self.result == TaskResult::Success
    }
}

/// Severity of a tool-side log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Logging disabled.
    #[serde(alias = "off")]
    Off,
    /// Unrecoverable failure.
    #[serde(alias = "critical")]
    Critical,
    /// Error.
    #[serde(alias = "error")]
    Error,
    /// Warning.
    #[serde(alias = "warn")]
    Warn,
    /// Information.
    #[serde(alias = "info")]
    Info,
    /// Debug output.
    #[serde(alias = "debug")]
    Debug,
    /// Trace output.
    #[serde(alias = "trace")]
    Trace,
}

impl LogLevel {
    /// Value for nrfutil's `--log-level` argument.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Payload of a `log` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Timestamp as reported by the tool.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// One line of nrfutil output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NrfutilEvent {
    /// A task started.
    TaskBegin(TaskBegin),
    /// A task made progress.
    TaskProgress(TaskProgress),
    /// A task finished.
    TaskEnd(TaskEnd),
    /// A data item, e.g. a device found during enumeration.
    Info(Value),
    /// A log message from the tool.
    Log(LogMessage),
}

/// Decode a single output line.
pub fn parse_line(line: &str) -> Result<NrfutilEvent, serde_json::Error> {
    serde_json::from_str(line)
}

/// Whether a process has reported its result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultState {
    /// No `task_end` seen yet.
    AwaitingResult,
    /// A `task_end` was captured.
    Resolved(TaskEnd),
    /// The process closed without ever reporting a `task_end`.
    FailedNoResult,
}

/// How a process ended, as seen by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Exit code 0 and a successful `task_end`; carries its `data`.
    Success(Option<Value>),
    /// Anything else; carries the composed diagnostic text.
    Failure(String),
}

/// Per-process decoder for nrfutil's event stream.
#[derive(Debug)]
pub struct StreamDecoder {
    command: String,
    state: ResultState,
    malformed_lines: usize,
}

impl StreamDecoder {
    /// Create a decoder for the given command description (used in errors).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            state: ResultState::AwaitingResult,
            malformed_lines: 0,
        }
    }

    /// Current result state.
    pub fn state(&self) -> &ResultState {
        &self.state
    }

    /// Number of lines that could not be decoded.
    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }

    /// Decode one line and update the result state.
    ///
    /// Blank lines yield `Ok(None)`. Lines that are not valid events are
    /// counted and returned as errors; they never change the state.
    pub fn feed(&mut self, line: &str) -> Result<Option<NrfutilEvent>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let event = parse_line(line).inspect_err(|_| self.malformed_lines += 1)?;

        if let NrfutilEvent::TaskEnd(end) = &event {
            self.record_task_end(end);
        }

        Ok(Some(event))
    }

    // A failed task_end sticks: later successes must not mask it.
    fn record_task_end(&mut self, end: &TaskEnd) {
        match &self.state {
            ResultState::Resolved(previous) if !previous.is_success() => {}
            _ => self.state = ResultState::Resolved(end.clone()),
        }
    }

    /// Settle the process outcome once it has exited.
    ///
    /// `exit_code` is `None` when the process was killed by a signal.
    pub fn finish(&mut self, exit_code: Option<i32>, stderr: &str) -> Completion {
        if self.state == ResultState::AwaitingResult {
            self.state = ResultState::FailedNoResult;
        }

        match &self.state {
            ResultState::Resolved(end) if exit_code == Some(0) && end.is_success() => {
                Completion::Success(end.data.clone())
            }
            ResultState::Resolved(end) => Completion::Failure(self.compose_failure(
                exit_code,
                Some(end),
                stderr,
            )),
            ResultState::FailedNoResult | ResultState::AwaitingResult => {
                Completion::Failure(self.compose_failure(exit_code, None, stderr))
            }
        }
    }

    fn compose_failure(&self, exit_code: Option<i32>, end: Option<&TaskEnd>, stderr: &str) -> String {
        let mut message = match exit_code {
            Some(code) => format!("`{}` exited with code {code}", self.command),
            None => format!("`{}` was terminated by a signal", self.command),
        };

        match end {
            Some(end) => {
                if let Some(text) = end.message.as_deref().filter(|m| !m.is_empty()) {
                    message.push_str(&format!("\nMessage: {text}"));
                }
                if let Some(error) = &end.error {
                    message.push_str(&format!(
                        "\nError {}: {}",
                        error.code, error.description
                    ));
                }
            }
            None => message.push_str("\nThe process closed without reporting a result"),
        }

        let stderr = stderr.trim();
        if !stderr.is_empty() {
            message.push_str(&format!("\nstderr: {stderr}"));
        }
        message
    }
}
