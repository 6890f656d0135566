// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded-concurrency task pool.
//!
//! Every network fetch, filesystem scan and subprocess wait the pipeline
//! performs is submitted here instead of being awaited inline. At most
//! `concurrency` submitted tasks make progress at once; the rest wait for a
//! semaphore permit. A task that returns an error or panics is logged with
//! its label and reported through its own [`TaskHandle`]; the pool and the
//! other tasks keep running.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{watch, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};

use crate::locks::{resilient_read, resilient_write};

/// Default number of tasks allowed to run at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Why a submitted task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Submitted after `shutdown` was called.
    Rejected,
    /// The task returned an error.
    Failed(String),
    /// The task panicked.
    Panicked(String),
    /// The task was cancelled by `shutdown(false)`.
    Cancelled,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "task manager is shut down"),
            Self::Failed(msg) => write!(f, "task failed: {}", msg),
            Self::Panicked(msg) => write!(f, "task panicked: {}", msg),
            Self::Cancelled => write!(f, "task cancelled"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Handle to one submitted task.
pub struct TaskHandle<T> {
    label: String,
    inner: JoinHandle<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the task's outcome.
    pub async fn join(self) -> Result<T, TaskError> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TaskError::Cancelled),
            Err(e) => {
                let msg = panic_message(e.into_panic());
                tracing::error!(label = %self.label, "Task panicked: {}", msg);
                Err(TaskError::Panicked(msg))
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Inner {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    accepting: AtomicBool,
    next_id: AtomicU64,
    tasks: RwLock<HashMap<u64, (String, AbortHandle)>>,
    in_flight: watch::Sender<usize>,
}

/// Decrements the in-flight count however the task ends: return, panic, or abort.
struct InFlightGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        resilient_write(&self.inner.tasks).remove(&self.id);
        self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Fixed-size worker pool over the tokio runtime.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("concurrency", &self.inner.concurrency)
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl TaskManager {
    /// Create a pool running at most `concurrency` tasks at once (minimum 1).
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (in_flight, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(concurrency)),
                concurrency,
                accepting: AtomicBool::new(true),
                next_id: AtomicU64::new(0),
                tasks: RwLock::new(HashMap::new()),
                in_flight,
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Submitted tasks that have not finished yet, queued or running.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Labels of the tasks currently tracked.
    pub fn active_labels(&self) -> Vec<String> {
        resilient_read(&self.inner.tasks)
            .values()
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Submit an async task. Errors are logged with `label` and returned
    /// through the handle.
    pub fn submit<T, Fut>(&self, label: impl Into<String>, fut: Fut) -> TaskHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let label = label.into();

        if !self.is_accepting() {
            tracing::warn!(label = %label, "Rejected task submitted after shutdown");
            return TaskHandle {
                label,
                inner: tokio::spawn(async { Err(TaskError::Rejected) }),
            };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.in_flight.send_modify(|n| *n += 1);

        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        let semaphore = Arc::clone(&self.inner.semaphore);
        let task_label = label.clone();

        // Hold the table lock across spawn so the guard cannot remove the
        // entry before it is inserted.
        let mut tasks = resilient_write(&self.inner.tasks);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| TaskError::Cancelled)?;

            tracing::trace!(label = %task_label, "Task started");
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) => {
                    tracing::warn!(label = %task_label, "Task failed: {:#}", e);
                    Err(TaskError::Failed(format!("{:#}", e)))
                }
            }
        });
        tasks.insert(id, (label.clone(), handle.abort_handle()));
        drop(tasks);

        TaskHandle {
            label,
            inner: handle,
        }
    }

    /// Submit a blocking closure (filesystem scans, directory moves). It runs
    /// on tokio's blocking pool but still counts against the concurrency limit.
    pub fn submit_blocking<T, F>(&self, label: impl Into<String>, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit(label, async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    Err(anyhow::anyhow!("blocking task panicked: {}", panic_message(e.into_panic())))
                }
                Err(e) => Err(anyhow::anyhow!("blocking task cancelled: {}", e)),
            }
        })
    }

    /// Stop accepting work, then either wait for every outstanding task
    /// (`wait == true`) or cancel them. Safe to call more than once.
    pub async fn shutdown(&self, wait: bool) {
        if self.inner.accepting.swap(false, Ordering::SeqCst) {
            tracing::debug!(in_flight = self.in_flight(), wait, "Shutting down task manager");
        }

        if !wait {
            let handles: Vec<AbortHandle> = resilient_read(&self.inner.tasks)
                .values()
                .map(|(_, handle)| handle.clone())
                .collect();
            for handle in handles {
                handle.abort();
            }
        }

        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
