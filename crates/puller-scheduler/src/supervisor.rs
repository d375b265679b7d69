// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supervision of a single worker process.
//!
//! [`JobSupervisor::run`] spawns the worker, decodes the commands it writes
//! to stdout, captures its stderr and resolves once the process has exited
//! and every notification has been delivered.
//!
//! # Notification ordering
//!
//! A reader task decodes stdout and forwards commands over a channel. The
//! supervising task takes them one at a time and awaits each listener
//! callback before taking the next, so a listener never sees two events of
//! the same job at once. Finalization runs on the same task after the
//! channel has drained.
//!
//! # Termination
//!
//! ```text
//!   timeout / protocol violation / listener error
//!                     │
//!                     ▼
//!                  SIGINT ──── exit within grace ───► done
//!                     │
//!               grace elapsed
//!                     ▼
//!                  SIGKILL ─────────────────────────► done
//! ```
//!
//! The first termination reason wins and supersedes the OS exit status in
//! the final [`JobOutcome`].

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use puller_protocol::{CommandDecoder, ProtocolError, WorkerCommand};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// Default delay between SIGINT and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Failure reason used when a worker exits silently.
pub const UNREPORTED_EXIT_REASON: &str = "Process exited without reporting success or failure";

const READ_CHUNK_SIZE: usize = 8192;

/// Only the tail of a chatty worker's stderr is kept.
const MAX_STDERR_BYTES: usize = 1024 * 1024;

/// Errors that prevent supervision altogether.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The worker could not be started.
    #[error("failed to spawn worker {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the worker failed.
    #[error("IO error while supervising worker: {0}")]
    Io(#[from] std::io::Error),
}

/// Timing configuration for supervised workers.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Silence allowed between two worker commands
    pub inactivity_timeout: Duration,
    /// Delay between SIGINT and SIGKILL
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: crate::config::DEFAULT_WORKER_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// Program, arguments and extra environment of a worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerCommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Why the supervisor decided to terminate a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// No command arrived within the inactivity timeout.
    Timeout(Duration),
    /// The worker's output broke the protocol.
    Protocol(ProtocolError),
    /// A listener callback failed.
    Listener(String),
    /// Reading the worker's output failed.
    Read(String),
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Timeout(d) => {
                write!(f, "worker sent nothing for {}s", d.as_secs_f64())
            }
            TerminationReason::Protocol(e) => write!(f, "protocol violation: {}", e),
            TerminationReason::Listener(e) => write!(f, "notification failed: {}", e),
            TerminationReason::Read(e) => write!(f, "failed to read worker output: {}", e),
        }
    }
}

/// How the worker process ended at the OS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Normal exit with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
}

impl ProcessExit {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ProcessExit::Code(code),
            None => ProcessExit::Signal(status.signal().unwrap_or_default()),
        }
    }

    /// Exit code 0.
    pub fn is_clean(&self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, ProcessExit::Signal(_))
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exited with code {}", code),
            ProcessExit::Signal(sig) => match Signal::try_from(*sig) {
                Ok(signal) => write!(f, "killed by {}", signal),
                Err(_) => write!(f, "killed by signal {}", sig),
            },
        }
    }
}

/// Final result of one supervised job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The worker reported success and exited cleanly.
    Succeeded { revision_id: String },
    /// The worker reported failure (or exited cleanly without reporting).
    Failed {
        reason: String,
        diagnostic_id: String,
    },
    /// The worker went silent and was terminated.
    TimedOut,
    /// The worker crashed, broke the protocol, or a notification failed.
    ProcessError(String),
}

impl JobOutcome {
    /// Outcomes that need an unexpected-error report.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, JobOutcome::TimedOut | JobOutcome::ProcessError(_))
    }
}

/// Everything known once a supervised worker is gone.
#[derive(Debug, Clone)]
pub struct SupervisedExit {
    pub outcome: JobOutcome,
    pub exit: ProcessExit,
    /// Captured stderr (tail only for very chatty workers)
    pub stderr: String,
    pub termination: Option<TerminationReason>,
}

/// Receiver of worker lifecycle notifications.
///
/// Callbacks for one worker never overlap. An error returned from a
/// callback terminates the worker.
#[async_trait]
pub trait WorkerListener: Send + Sync {
    /// The worker has started mirroring.
    async fn started(&self) -> crate::error::Result<()>;

    /// The worker mirrored up to `revision_id`.
    async fn succeeded(&self, revision_id: &str) -> crate::error::Result<()>;

    /// The worker failed; `diagnostic_id` is the worker's own report id
    /// (empty when the failure was synthesized by the supervisor).
    async fn failed(&self, reason: &str, diagnostic_id: &str) -> crate::error::Result<()>;
}

#[derive(Debug)]
enum StreamEvent {
    Command(WorkerCommand),
    Violation(ProtocolError),
    ReadFailed(String),
}

/// Per-run mutable state of the supervising task.
struct RunState {
    /// Cleared once the process has been reaped
    pid: Option<Pid>,
    deadline: Instant,
    kill_at: Option<Instant>,
    reported: Option<JobOutcome>,
    termination: Option<TerminationReason>,
}

/// Spawns and watches worker processes.
#[derive(Debug, Clone, Default)]
pub struct JobSupervisor {
    config: SupervisorConfig,
}

impl JobSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run one worker to completion, notifying `listener` along the way.
    ///
    /// Fails only if the worker cannot be spawned or waited on; every
    /// other problem ends up in the returned [`SupervisedExit`].
    pub async fn run<L>(
        &self,
        command: &WorkerCommandLine,
        listener: &L,
    ) -> Result<SupervisedExit, SupervisorError>
    where
        L: WorkerListener + ?Sized,
    {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: command.program.display().to_string(),
                source,
            })?;

        let pid = child.id().map(|id| Pid::from_raw(id as i32));
        info!(program = %command.program.display(), pid = ?child.id(), "Spawned worker");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("worker stderr not captured"))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut stdout_task = tokio::spawn(read_commands(stdout, tx));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut stderr_task = tokio::spawn(read_stderr(stderr, Arc::clone(&stderr_buf)));

        let mut state = RunState {
            pid,
            deadline: Instant::now() + self.config.inactivity_timeout,
            kill_at: None,
            reported: None,
            termination: None,
        };
        let mut events_open = true;

        let status = loop {
            tokio::select! {
                biased;

                event = rx.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event, listener, &mut state).await,
                    None => events_open = false,
                },

                status = child.wait() => break status?,

                _ = sleep_until(state.deadline), if state.termination.is_none() => {
                    self.begin_termination(
                        &mut state,
                        TerminationReason::Timeout(self.config.inactivity_timeout),
                    );
                }

                _ = sleep_until(state.kill_at.unwrap_or(state.deadline)), if state.kill_at.is_some() => {
                    warn!(
                        pid = ?state.pid,
                        grace_secs = self.config.kill_grace.as_secs_f64(),
                        "Worker ignored SIGINT, sending SIGKILL"
                    );
                    state.kill_at = None;
                    send_signal(state.pid, Signal::SIGKILL);
                }
            }
        };

        let exit = ProcessExit::from_status(status);
        state.pid = None;
        state.kill_at = None;
        debug!(exit = %exit, "Worker exited");

        // Commands written just before exit are still in the pipe. A
        // grandchild holding the pipe open must not stall us forever.
        if tokio::time::timeout(self.config.kill_grace, &mut stdout_task)
            .await
            .is_err()
        {
            warn!("Worker stdout still open after exit, discarding the rest");
            stdout_task.abort();
        }
        while let Some(event) = rx.recv().await {
            self.handle_event(event, listener, &mut state).await;
        }

        if tokio::time::timeout(self.config.kill_grace, &mut stderr_task)
            .await
            .is_err()
        {
            stderr_task.abort();
        }
        let stderr_text = {
            let buf = stderr_buf.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&buf).into_owned()
        };

        if state.reported.is_none() {
            let reason = unreported_reason(&stderr_text, state.termination.as_ref(), exit);
            warn!(reason = %reason, exit = %exit, "Worker exited without reporting an outcome");
            if let Err(e) = listener.failed(&reason, "").await {
                if state.termination.is_none() {
                    state.termination = Some(TerminationReason::Listener(e.to_string()));
                } else {
                    warn!(error = %e, "Failed to deliver synthesized failure");
                }
            }
            state.reported = Some(JobOutcome::Failed {
                reason,
                diagnostic_id: String::new(),
            });
        }

        let outcome = match &state.termination {
            Some(TerminationReason::Timeout(_)) => JobOutcome::TimedOut,
            Some(reason) => JobOutcome::ProcessError(reason.to_string()),
            None if !exit.is_clean() => JobOutcome::ProcessError(exit.to_string()),
            None => state
                .reported
                .take()
                .unwrap_or_else(|| JobOutcome::ProcessError(UNREPORTED_EXIT_REASON.to_string())),
        };

        Ok(SupervisedExit {
            outcome,
            exit,
            stderr: stderr_text,
            termination: state.termination,
        })
    }

    async fn handle_event<L>(&self, event: StreamEvent, listener: &L, state: &mut RunState)
    where
        L: WorkerListener + ?Sized,
    {
        if state.termination.is_some() {
            debug!(event = ?event, "Discarding worker event during termination");
            return;
        }

        let command = match event {
            StreamEvent::Command(command) => command,
            StreamEvent::Violation(e) => {
                self.begin_termination(state, TerminationReason::Protocol(e));
                return;
            }
            StreamEvent::ReadFailed(e) => {
                self.begin_termination(state, TerminationReason::Read(e));
                return;
            }
        };

        debug!(command = %command.name(), "Worker command");
        state.deadline = Instant::now() + self.config.inactivity_timeout;

        let result = match command {
            WorkerCommand::StartMirroring => listener.started().await,
            WorkerCommand::ProgressMade => Ok(()),
            WorkerCommand::MirrorSucceeded { revision_id } => {
                let result = listener.succeeded(&revision_id).await;
                state.reported = Some(JobOutcome::Succeeded { revision_id });
                result
            }
            WorkerCommand::MirrorFailed {
                reason,
                diagnostic_id,
            } => {
                let result = listener.failed(&reason, &diagnostic_id).await;
                state.reported = Some(JobOutcome::Failed {
                    reason,
                    diagnostic_id,
                });
                result
            }
        };

        if let Err(e) = result {
            self.begin_termination(state, TerminationReason::Listener(e.to_string()));
        }
    }

    fn begin_termination(&self, state: &mut RunState, reason: TerminationReason) {
        if state.termination.is_some() {
            return;
        }
        warn!(pid = ?state.pid, reason = %reason, "Terminating worker");
        send_signal(state.pid, Signal::SIGINT);
        state.kill_at = Some(Instant::now() + self.config.kill_grace);
        state.termination = Some(reason);
    }
}

/// Failure reason for a worker that exited without reporting.
fn unreported_reason(
    stderr: &str,
    termination: Option<&TerminationReason>,
    exit: ProcessExit,
) -> String {
    if let Some(line) = last_line(stderr) {
        return line.to_string();
    }
    if let Some(reason) = termination {
        return reason.to_string();
    }
    if exit.is_clean() {
        UNREPORTED_EXIT_REASON.to_string()
    } else {
        format!("{} ({})", UNREPORTED_EXIT_REASON, exit)
    }
}

/// Last non-blank line of `text`.
pub fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|line| !line.is_empty())
}

fn send_signal(pid: Option<Pid>, sig: Signal) {
    let Some(pid) = pid else {
        return;
    };
    match signal::kill(pid, sig) {
        Ok(()) => debug!(pid = %pid, signal = %sig, "Sent signal to worker"),
        Err(Errno::ESRCH) => debug!(pid = %pid, signal = %sig, "Worker already exited"),
        Err(e) => warn!(pid = %pid, signal = %sig, error = %e, "Failed to signal worker"),
    }
}

async fn read_commands<R>(mut reader: R, tx: mpsc::UnboundedSender<StreamEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = CommandDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(StreamEvent::ReadFailed(e.to_string()));
                return;
            }
        };
        let fed = decoder.feed_with(&buf[..n], |command| {
            let _ = tx.send(StreamEvent::Command(command));
        });
        if let Err(e) = fed {
            let _ = tx.send(StreamEvent::Violation(e));
            return;
        }
    }
    if !decoder.is_at_boundary() {
        debug!("Worker output ended in the middle of a command");
    }
}

async fn read_stderr<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
                captured.extend_from_slice(&buf[..n]);
                if captured.len() > MAX_STDERR_BYTES {
                    let excess = captured.len() - MAX_STDERR_BYTES;
                    captured.drain(..excess);
                }
            }
            Err(e) => {
                debug!(error = %e, "Failed to read worker stderr");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("a\nb\n"), Some("b"));
        assert_eq!(last_line("Traceback\n  boom\n\n  \n"), Some("boom"));
        assert_eq!(last_line(""), None);
        assert_eq!(last_line("\n \n"), None);
    }

    #[test]
    fn test_unreported_reason_prefers_stderr() {
        let reason = unreported_reason(
            "warning\nValueError: bad url\n",
            Some(&TerminationReason::Timeout(Duration::from_secs(1))),
            ProcessExit::Code(1),
        );
        assert_eq!(reason, "ValueError: bad url");
    }

    #[test]
    fn test_unreported_reason_generic_for_clean_exit() {
        assert_eq!(
            unreported_reason("", None, ProcessExit::Code(0)),
            UNREPORTED_EXIT_REASON
        );
    }

    #[test]
    fn test_unreported_reason_mentions_abnormal_exit() {
        let reason = unreported_reason("", None, ProcessExit::Code(3));
        assert!(reason.starts_with(UNREPORTED_EXIT_REASON));
        assert!(reason.contains("code 3"));
    }

    #[test]
    fn test_process_exit_display() {
        assert_eq!(ProcessExit::Code(2).to_string(), "exited with code 2");
        assert_eq!(ProcessExit::Signal(9).to_string(), "killed by SIGKILL");
        assert!(ProcessExit::Code(0).is_clean());
        assert!(!ProcessExit::Signal(2).is_clean());
        assert!(ProcessExit::Signal(2).is_signal());
    }

    #[test]
    fn test_termination_reason_display() {
        let reason = TerminationReason::Protocol(ProtocolError::BadMessage("x".to_string()));
        assert!(reason.to_string().starts_with("protocol violation"));
        assert_eq!(
            TerminationReason::Timeout(Duration::from_millis(1500)).to_string(),
            "worker sent nothing for 1.5s"
        );
    }

    #[test]
    fn test_outcome_unexpected() {
        assert!(JobOutcome::TimedOut.is_unexpected());
        assert!(JobOutcome::ProcessError("x".to_string()).is_unexpected());
        assert!(
            !JobOutcome::Succeeded {
                revision_id: "r".to_string()
            }
            .is_unexpected()
        );
    }
}
