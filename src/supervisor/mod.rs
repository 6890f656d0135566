// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SteamCMD process supervision.
//!
//! A batch is one SteamCMD login that downloads several Workshop items:
//!
//! ```text
//! Idle ─▶ Preparing ─▶ Running ─▶ Streaming ─▶ Succeeded | Failed | TimedOut
//!          (script)    (spawn)    (stdout+stderr readers, watchdog)
//! ```
//!
//! The shared transient-state cleanup runs once before the first attempt
//! and once after the last. Items still missing after an attempt are
//! retried under the shared [`RetryPolicy`], with their own staging wiped
//! first so a partial download cannot pass a later existence check.

pub mod classify;
pub mod cleanup;
pub mod runner;
pub mod script;
pub mod stop;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexSet;
use tokio::sync::watch;

use crate::error::WorkshopError;
use crate::locks::resilient_lock;
use crate::retry::RetryPolicy;

pub use runner::{ProgressSink, RunReport, RunStatus, LINE_QUEUE_CAPACITY};
pub use stop::{stop_channel, StopHandle, StopSignal};

/// Default wall-clock budget for one SteamCMD invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Lifecycle of the supervisor, observable through [`ProcessSupervisor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Preparing,
    Running,
    Streaming,
    Succeeded,
    Failed,
    TimedOut,
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Result of a whole batch across all attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Status of the last invocation.
    pub status: RunStatus,
    pub attempts: u32,
    /// Ids with a success marker, in request order.
    pub succeeded: Vec<String>,
    /// Requested ids without a success marker, in request order.
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn item_succeeded(&self, mod_id: &str) -> bool {
        self.succeeded.iter().any(|id| id == mod_id)
    }
}

/// Something that can retrieve a batch of Workshop items for one game.
///
/// [`ProcessSupervisor`] is the SteamCMD implementation; the orchestrator
/// only depends on this trait.
#[async_trait]
pub trait BatchRetriever: Send + Sync {
    /// Fail fast with `ToolUnavailable` when the tool cannot run.
    fn check_available(&self) -> Result<(), WorkshopError>;

    /// Where a retrieved item's files are left.
    fn content_dir(&self, app_id: &str, mod_id: &str) -> PathBuf;

    async fn retrieve(
        &self,
        app_id: &str,
        mod_ids: &[String],
        sink: Option<ProgressSink>,
        stop: StopSignal,
    ) -> Result<BatchReport, WorkshopError>;
}

/// Tunables for [`ProcessSupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub tool_path: PathBuf,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl SupervisorConfig {
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Drives SteamCMD for one batch at a time.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    state: watch::Sender<SupervisorState>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self { config, state }
    }

    pub fn tool_path(&self) -> &Path {
        &self.config.tool_path
    }

    /// SteamCMD's install directory; its relative cache paths resolve here.
    pub fn tool_dir(&self) -> PathBuf {
        self.config
            .tool_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    async fn clean_shared(&self, app_id: &str) {
        let tool_dir = self.tool_dir();
        let app_id = app_id.to_string();
        if let Err(e) =
            tokio::task::spawn_blocking(move || cleanup::clean_transient(&tool_dir, &app_id)).await
        {
            tracing::warn!("SteamCMD cleanup task failed: {}", e);
        }
    }

    async fn wipe_staging(&self, app_id: &str, mod_ids: Vec<String>) {
        let tool_dir = self.tool_dir();
        let app_id = app_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            for mod_id in &mod_ids {
                cleanup::wipe_item_staging(&tool_dir, &app_id, mod_id);
            }
        })
        .await;
        if let Err(e) = result {
            tracing::warn!("Staging cleanup task failed: {}", e);
        }
    }

    /// Download `mod_ids` for `app_id`, retrying items that did not succeed.
    ///
    /// Only `ToolUnavailable` is returned as an error. Every other failure,
    /// including cancellation and timeouts, is reported in the
    /// [`BatchReport`].
    pub async fn download_batch(
        &self,
        app_id: &str,
        mod_ids: &[String],
        sink: Option<ProgressSink>,
        stop: StopSignal,
    ) -> Result<BatchReport, WorkshopError> {
        self.check_available()?;

        let requested: Vec<String> = mod_ids
            .iter()
            .cloned()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        let tool_path = std::fs::canonicalize(&self.config.tool_path)
            .unwrap_or_else(|_| self.config.tool_path.clone());

        self.clean_shared(app_id).await;

        let succeeded: Mutex<IndexSet<String>> = Mutex::new(IndexSet::new());
        let last_status: Mutex<RunStatus> = Mutex::new(RunStatus::Failed { code: None });
        let attempts_made: Mutex<u32> = Mutex::new(0);
        let label = format!("steamcmd:{}", app_id);

        let outcome = self
            .config
            .retry
            .run(&label, |attempt| {
                let (requested, succeeded, last_status, attempts_made) =
                    (&requested, &succeeded, &last_status, &attempts_made);
                let (tool_path, sink, stop) = (&tool_path, sink.as_ref(), &stop);
                async move {
                    if stop.is_stopped() {
                        *resilient_lock(last_status) = RunStatus::Cancelled;
                        return Err(WorkshopError::Cancelled);
                    }

                    let pending: Vec<String> = {
                        let done = resilient_lock(succeeded);
                        requested.iter().filter(|id| !done.contains(*id)).cloned().collect()
                    };

                    if attempt > 1 {
                        tracing::info!(app_id, attempt, items = pending.len(), "Retrying SteamCMD batch");
                        self.wipe_staging(app_id, pending.clone()).await;
                    }
                    *resilient_lock(attempts_made) = attempt;

                    let report = runner::run_once(
                        tool_path,
                        app_id,
                        &pending,
                        self.config.timeout,
                        sink,
                        stop,
                        &self.state,
                    )
                    .await?;

                    let all_done = {
                        let mut done = resilient_lock(succeeded);
                        done.extend(report.succeeded.iter().cloned());
                        requested.iter().all(|id| done.contains(id))
                    };
                    *resilient_lock(last_status) = report.status.clone();

                    match report.status {
                        RunStatus::Cancelled => Err(WorkshopError::Cancelled),
                        _ if all_done => Ok(()),
                        RunStatus::TimedOut => Err(WorkshopError::ProcessTimeout),
                        RunStatus::Failed { code } => Err(WorkshopError::ProcessFailure { code }),
                        RunStatus::Succeeded => Err(WorkshopError::ProcessFailure { code: None }),
                    }
                }
            })
            .await;

        self.clean_shared(app_id).await;

        if let Err(WorkshopError::ToolUnavailable { path }) = &outcome {
            self.state.send_replace(SupervisorState::Failed);
            return Err(WorkshopError::ToolUnavailable { path: path.clone() });
        }

        let succeeded = succeeded.into_inner().unwrap_or_else(|p| p.into_inner());
        let status = last_status.into_inner().unwrap_or_else(|p| p.into_inner());
        let attempts = attempts_made.into_inner().unwrap_or_else(|p| p.into_inner());

        let report = BatchReport {
            attempts,
            succeeded: requested.iter().filter(|id| succeeded.contains(*id)).cloned().collect(),
            failed: requested.iter().filter(|id| !succeeded.contains(*id)).cloned().collect(),
            status,
        };

        let final_state = match report.status {
            RunStatus::Succeeded => SupervisorState::Succeeded,
            RunStatus::TimedOut => SupervisorState::TimedOut,
            RunStatus::Failed { .. } | RunStatus::Cancelled => SupervisorState::Failed,
        };
        self.state.send_replace(final_state);

        if let Err(e) = outcome {
            tracing::warn!(
                app_id,
                attempts = report.attempts,
                failed = report.failed.len(),
                "SteamCMD batch incomplete: {}",
                e
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl BatchRetriever for ProcessSupervisor {
    fn check_available(&self) -> Result<(), WorkshopError> {
        if self.config.tool_path.is_file() {
            Ok(())
        } else {
            Err(WorkshopError::ToolUnavailable {
                path: Some(self.config.tool_path.clone()),
            })
        }
    }

    fn content_dir(&self, app_id: &str, mod_id: &str) -> PathBuf {
        cleanup::content_dir(&self.tool_dir(), app_id, mod_id)
    }

    async fn retrieve(
        &self,
        app_id: &str,
        mod_ids: &[String],
        sink: Option<ProgressSink>,
        stop: StopSignal,
    ) -> Result<BatchReport, WorkshopError> {
        self.download_batch(app_id, mod_ids, sink, stop).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_tool_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(SupervisorConfig::new(dir.path().join("steamcmd.sh")));
        assert!(matches!(
            supervisor.check_available(),
            Err(WorkshopError::ToolUnavailable { .. })
        ));
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[test]
    fn test_content_dir_is_under_tool_dir() {
        let supervisor = ProcessSupervisor::new(SupervisorConfig::new("/opt/steamcmd/steamcmd.sh"));
        assert_eq!(supervisor.tool_dir(), PathBuf::from("/opt/steamcmd"));
        assert_eq!(
            supervisor.content_dir("294100", "7"),
            PathBuf::from("/opt/steamcmd/steamapps/workshop/content/294100/7")
        );
    }

    #[tokio::test]
    async fn test_download_batch_without_tool_fails_fast() {
        let dir = TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(SupervisorConfig::new(dir.path().join("missing")));
        let result = supervisor
            .download_batch("42", &["1".to_string()], None, StopSignal::never())
            .await;
        assert!(matches!(result, Err(WorkshopError::ToolUnavailable { .. })));
        // Nothing was cleaned because nothing was attempted
        assert!(!dir.path().join("steamapps").exists());
    }
}
