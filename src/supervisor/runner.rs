// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One SteamCMD invocation: spawn, stream, classify, watchdog.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use indexmap::IndexSet;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};

use crate::error::WorkshopError;

use super::classify::{classify, LineClass};
use super::script::write_script;
use super::stop::StopSignal;
use super::SupervisorState;

/// Capacity of the queue both pipe readers feed.
pub const LINE_QUEUE_CAPACITY: usize = 256;

/// How long to keep reading after exit when a grandchild still holds a pipe.
const DRAIN_GRACE: Duration = Duration::from_secs(3);

/// Unmatched output lines are forwarded here verbatim.
pub type ProgressSink = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: Stream,
    text: String,
}

/// How a single invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut,
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

/// Outcome of one invocation. Ids appear in the order their markers arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

fn spawn_reader<R>(reader: R, stream: Stream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(OutputLine { stream, text }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(?stream, "Output reader stopped: {}", e);
                    break;
                }
            }
        }
    });
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Tracks markers seen so far, restricted to the requested ids.
struct Markers<'a> {
    requested: &'a [String],
    succeeded: IndexSet<String>,
    failed: IndexSet<String>,
    sink: Option<&'a ProgressSink>,
    app_id: &'a str,
}

impl Markers<'_> {
    fn consume(&mut self, line: OutputLine) {
        match classify(&line.text) {
            LineClass::Success(id) if self.requested.contains(&id) => {
                tracing::info!(app_id = self.app_id, mod_id = %id, "SteamCMD downloaded item");
                self.failed.shift_remove(&id);
                self.succeeded.insert(id);
            }
            LineClass::Failure(id) if self.requested.contains(&id) => {
                tracing::warn!(app_id = self.app_id, mod_id = %id, "SteamCMD reported item failure");
                if !self.succeeded.contains(&id) {
                    self.failed.insert(id);
                }
            }
            _ => {
                tracing::debug!(target: "modfetch::steamcmd", stream = ?line.stream, "{}", line.text);
                if let Some(sink) = self.sink {
                    let _ = sink.send(line.text);
                }
            }
        }
    }
}

/// Run SteamCMD once for `mod_ids` and report per-item markers.
///
/// Errors are reserved for failures to start the tool; everything that
/// happens after spawn is folded into the returned [`RunReport`].
pub async fn run_once(
    tool_path: &Path,
    app_id: &str,
    mod_ids: &[String],
    timeout: Duration,
    sink: Option<&ProgressSink>,
    stop: &StopSignal,
    state: &watch::Sender<SupervisorState>,
) -> Result<RunReport, WorkshopError> {
    if stop.is_stopped() {
        return Err(WorkshopError::Cancelled);
    }

    state.send_replace(SupervisorState::Preparing);
    let script = write_script(app_id, mod_ids)?;

    let tool_dir = tool_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    state.send_replace(SupervisorState::Running);
    let mut child = Command::new(tool_path)
        .arg("+runscript")
        .arg(script.path())
        .current_dir(tool_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            tracing::error!(tool = %tool_path.display(), "Failed to start SteamCMD: {}", e);
            match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    WorkshopError::ToolUnavailable {
                        path: Some(tool_path.to_path_buf()),
                    }
                }
                _ => WorkshopError::ProcessFailure { code: None },
            }
        })?;

    let (tx, mut rx) = mpsc::channel::<OutputLine>(LINE_QUEUE_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, Stream::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, Stream::Stderr, tx.clone());
    }
    drop(tx);

    state.send_replace(SupervisorState::Streaming);
    tracing::info!(app_id, items = mod_ids.len(), pid = child.id(), "SteamCMD started");

    let mut markers = Markers {
        requested: mod_ids,
        succeeded: IndexSet::new(),
        failed: IndexSet::new(),
        sink,
        app_id,
    };

    let watchdog = sleep(timeout);
    tokio::pin!(watchdog);

    let mut exit: Option<std::io::Result<ExitStatus>> = None;
    let mut terminated: Option<RunStatus> = None;
    let mut pipes_closed = false;
    let mut drain_deadline: Option<Instant> = None;

    loop {
        if exit.is_some() && pipes_closed {
            break;
        }
        if terminated.is_none() && exit.is_none() && stop.is_stopped() {
            tracing::warn!(app_id, "Stop requested; terminating SteamCMD");
            terminated = Some(RunStatus::Cancelled);
            let _ = child.start_kill();
        }

        tokio::select! {
            line = rx.recv(), if !pipes_closed => match line {
                Some(line) => markers.consume(line),
                None => pipes_closed = true,
            },
            status = child.wait(), if exit.is_none() => {
                exit = Some(status);
                drain_deadline = Some(Instant::now() + DRAIN_GRACE);
            },
            _ = &mut watchdog, if terminated.is_none() && exit.is_none() => {
                tracing::warn!(app_id, timeout_secs = timeout.as_secs(), "SteamCMD exceeded its time budget; terminating");
                terminated = Some(RunStatus::TimedOut);
                let _ = child.start_kill();
            },
            _ = stop.stopped(), if terminated.is_none() && exit.is_none() => {},
            _ = sleep_until_opt(drain_deadline), if drain_deadline.is_some() && !pipes_closed => {
                // Take whatever is already buffered, then stop waiting on the pipes
                while let Ok(line) = rx.try_recv() {
                    markers.consume(line);
                }
                tracing::warn!(app_id, "SteamCMD output pipes still open after exit; abandoning readers");
                pipes_closed = true;
            },
        }
    }

    drop(script);

    let status = match (terminated, exit) {
        (Some(status), _) => status,
        (None, Some(Ok(exit))) if exit.success() => RunStatus::Succeeded,
        (None, Some(Ok(exit))) => RunStatus::Failed { code: exit.code() },
        (None, Some(Err(e))) => {
            tracing::error!(app_id, "Failed to wait for SteamCMD: {}", e);
            RunStatus::Failed { code: None }
        }
        (None, None) => RunStatus::Failed { code: None },
    };

    let report = RunReport {
        status,
        succeeded: markers.succeeded.into_iter().collect(),
        failed: markers.failed.into_iter().collect(),
    };
    tracing::info!(
        app_id,
        status = ?report.status,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "SteamCMD finished"
    );
    Ok(report)
}
