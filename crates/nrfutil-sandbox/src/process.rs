//! Spawning nrfutil and driving its event stream.
//!
//! ```text
//!   spawn ──► stdout lines ──► StreamDecoder ──► EventSink
//!               │                                 ├─ log      → LogSubscribers
//!               │                                 ├─ progress → on_progress
//!               │                                 └─ info     → on_info
//!   cancel ─► start_kill
//!   wait ───► drain stdout ──► finish(exit code, stderr) ──► Completion
//! ```

use crate::config::SandboxEnv;
use crate::error::{Result, SandboxError};
use crate::logging::LogSubscribers;
use crate::protocol::{Completion, NrfutilEvent, Progress, StreamDecoder};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Callback receiving `task_progress` payloads.
pub type ProgressCallback = Box<dyn FnMut(&Progress) + Send>;
/// Callback receiving data items.
pub type DataCallback = Box<dyn FnMut(Value) + Send>;
/// Callback receiving non-fatal and terminal errors of a background task.
pub type ErrorCallback = Box<dyn FnMut(SandboxError) + Send>;

// Grandchildren may inherit the pipes and keep them open after nrfutil
// itself has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Fully resolved command line and environment of one process.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: SandboxEnv,
}

impl Invocation {
    /// Human readable command line for logs and errors.
    pub fn describe(&self) -> String {
        let mut text = self.program.display().to_string();
        for arg in &self.args {
            text.push(' ');
            text.push_str(arg);
        }
        text
    }

    /// Start the process.
    pub fn spawn(&self) -> Result<RunningProcess> {
        let description = self.describe();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.env.apply(&mut command);

        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            command: description.clone(),
            source,
        })?;
        tracing::debug!(command = %description, pid = ?child.id(), "Spawned nrfutil");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::TaskFailed("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::TaskFailed("stderr was not captured".into()))?;

        Ok(RunningProcess {
            child,
            stdout: OutputLines::new(stdout),
            stderr: tokio::spawn(collect_stderr(stderr)),
            decoder: StreamDecoder::new(description.clone()),
            description,
            started: Instant::now(),
        })
    }
}

async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    let mut reader = BufReader::new(stderr);
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "Failed to read nrfutil stderr");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Where decoded events go.
#[derive(Default)]
pub(crate) struct EventSink {
    pub logs: LogSubscribers,
    pub on_progress: Option<ProgressCallback>,
    pub on_info: Option<DataCallback>,
    pub on_malformed: Option<ErrorCallback>,
}

impl EventSink {
    fn handle_line(&mut self, decoder: &mut StreamDecoder, command: &str, line: &str) {
        tracing::trace!(command = %command, line = %line, "nrfutil output");

        match decoder.feed(line) {
            Ok(Some(event)) => self.dispatch(event),
            Ok(None) => {}
            Err(source) => {
                tracing::warn!(command = %command, error = %source, "Ignoring malformed nrfutil output line");
                if let Some(on_malformed) = self.on_malformed.as_mut() {
                    on_malformed(SandboxError::MalformedEvent {
                        line: line.to_string(),
                        source,
                    });
                }
            }
        }
    }

    fn dispatch(&mut self, event: NrfutilEvent) {
        match event {
            NrfutilEvent::Log(message) => self.logs.dispatch(&message),
            NrfutilEvent::TaskProgress(progress) => {
                if let Some(on_progress) = self.on_progress.as_mut() {
                    on_progress(&progress.progress);
                }
            }
            NrfutilEvent::Info(value) => {
                if let Some(on_info) = self.on_info.as_mut() {
                    on_info(value);
                }
            }
            NrfutilEvent::TaskBegin(begin) => {
                tracing::trace!(task = %begin.task.name, "Task started");
            }
            NrfutilEvent::TaskEnd(end) => {
                tracing::trace!(result = ?end.result, "Task ended");
            }
        }
    }
}

/// How a process ended.
#[derive(Debug)]
pub(crate) struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub completion: Completion,
}

impl ProcessOutcome {
    /// The `task_end` data on success, a [`SandboxError::CommandFailed`] otherwise.
    pub fn into_result(self) -> Result<Option<Value>> {
        match self.completion {
            Completion::Success(data) => Ok(data),
            Completion::Failure(message) => Err(SandboxError::CommandFailed {
                exit_code: self.exit_code,
                message,
            }),
        }
    }
}

/// Newline-delimited stdout reader.
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream.
/// Partially read lines stay in `buf`, so a pending `next_line` may be
/// dropped and called again.
struct OutputLines {
    reader: BufReader<ChildStdout>,
    buf: Vec<u8>,
}

impl OutputLines {
    fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(match String::from_utf8(line) {
            Ok(line) => line,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }))
    }
}

/// A spawned nrfutil process whose output has not been consumed yet.
pub(crate) struct RunningProcess {
    child: Child,
    stdout: OutputLines,
    stderr: JoinHandle<String>,
    decoder: StreamDecoder,
    description: String,
    started: Instant,
}

impl RunningProcess {
    /// Consume output until the process exits.
    ///
    /// Cancelling `cancel` sends a kill signal once; the process still
    /// settles through the normal exit path.
    pub async fn drive(mut self, sink: &mut EventSink, cancel: CancellationToken) -> Result<ProcessOutcome> {
        let mut kill_sent = false;
        let mut stdout_open = true;

        let status = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !kill_sent => {
                    kill_sent = true;
                    tracing::debug!(command = %self.description, "Cancelling nrfutil process");
                    if let Err(e) = self.child.start_kill() {
                        tracing::debug!(command = %self.description, error = %e, "Kill failed, process already gone");
                    }
                }

                line = self.stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => sink.handle_line(&mut self.decoder, &self.description, &line),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        tracing::warn!(command = %self.description, error = %e, "Failed to read nrfutil stdout");
                        stdout_open = false;
                    }
                },

                status = self.child.wait() => break status?,
            }
        };

        if stdout_open {
            let drain = async {
                while let Ok(Some(line)) = self.stdout.next_line().await {
                    sink.handle_line(&mut self.decoder, &self.description, &line);
                }
            };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                tracing::debug!(command = %self.description, "stdout still open after exit, not waiting further");
            }
        }

        let stderr = match tokio::time::timeout(DRAIN_TIMEOUT, &mut self.stderr).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        };

        let exit_code = status.code();
        let completion = self.decoder.finish(exit_code, &stderr);

        tracing::debug!(
            command = %self.description,
            exit_code = ?exit_code,
            success = matches!(completion, Completion::Success(_)),
            cancelled = kill_sent,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "nrfutil process closed"
        );

        Ok(ProcessOutcome {
            exit_code,
            completion,
        })
    }
}
