// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workshop download pipeline for modfetch
//!
//! This module turns queued Workshop ids into installed mods:
//! - A persistent, duplicate-free queue that survives restarts
//! - Single-level dependency expansion with optional confirmation
//! - One SteamCMD batch per game per drain
//! - Per-item relocation into the game's active mods root
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌─────────────────────┐
//! │ DownloadOrchestrator │────▶│ ModMetadataResolver │
//! │                      │     │ (dependencies)      │
//! └──────────┬───────────┘     └─────────────────────┘
//!            │ TaskManager
//!            ▼
//! ┌──────────────────────┐     ┌─────────────────────┐
//! │ BatchRetriever       │────▶│ ModStateStore       │
//! │ (ProcessSupervisor)  │     │ (relocation)        │
//! └──────────────────────┘     └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modfetch::download::{DownloadOrchestrator, QueueState};
//! use modfetch::mods::ModStateStore;
//! use modfetch::supervisor::{ProcessSupervisor, StopSignal, SupervisorConfig};
//! use modfetch::tasks::TaskManager;
//! use modfetch::workshop::{HttpPageSource, ModMetadataResolver, ResolverConfig, DEFAULT_REQUEST_TIMEOUT};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let tasks = TaskManager::default();
//! let source = Arc::new(HttpPageSource::new(DEFAULT_REQUEST_TIMEOUT)?);
//! let resolver = ModMetadataResolver::in_memory(source, tasks.clone(), ResolverConfig::default());
//! let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig::new("/opt/steamcmd/steamcmd.sh")));
//!
//! let orchestrator = DownloadOrchestrator::new(QueueState::in_memory(), resolver, supervisor, tasks);
//! orchestrator.register_game("294100", Arc::new(ModStateStore::new("/games/RimWorld/Mods")));
//!
//! orchestrator.enqueue("294100", "2003433312");
//! let report = orchestrator.drain(None, None, StopSignal::never()).await?;
//! println!("{} installed", report.installed().count());
//! # Ok(())
//! # }
//! ```

pub mod confirm;
pub mod orchestrator;
pub mod state;
pub mod transfer;
pub mod types;

// Re-export commonly used items
pub use confirm::{AcceptMissing, Confirm, ConfirmKind, ConfirmRequest};
pub use orchestrator::DownloadOrchestrator;
pub use state::QueueState;
pub use transfer::{load_export, save_export, ExportedMod, QueueExport};
pub use types::{
    DrainError, DrainReport, EnqueueResult, ItemOutcome, ItemState, QueueItem, StatusKind,
    StatusSink, StatusUpdate,
};
