// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! modfetch - Steam Workshop mod acquisition library
//!
//! Queue Workshop items, download them with SteamCMD, and keep each game's
//! mods directory split into enabled and archived mods.
//!
//! **Queue** -> **Dependency expansion** -> **SteamCMD batch** -> **Mods directory**
//!
//! # Core Modules
//!
//! - [`download`] - Persistent queue and the drain orchestrator
//! - [`workshop`] - Cached, rate-limited Workshop metadata
//! - [`supervisor`] - SteamCMD subprocess supervision
//! - [`mods`] - Enabled/archived mod inventory on disk
//! - [`cache`] - TTL cache persisted as JSON
//! - [`tasks`] - Bounded task pool
//! - [`retry`] - Shared retry policy
//! - [`games`] - Registered games
//! - [`config`] - Settings file
//! - [`error`] - Error categories and formatting utilities

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod games;
pub mod locks;
pub mod mods;
pub mod retry;
pub mod storage;
pub mod supervisor;
pub mod tasks;
pub mod types;
pub mod utils;
pub mod workshop;

// Re-export commonly used types from types module
pub use types::{DependencyInfo, ModMetadata, ModRecord};

// Re-export the pipeline components
pub use cache::TtlCache;
pub use download::{DownloadOrchestrator, QueueItem, StatusKind, StatusUpdate};
pub use error::WorkshopError;
pub use games::{GameProfile, GameRegistry};
pub use mods::ModStateStore;
pub use retry::RetryPolicy;
pub use supervisor::{BatchRetriever, ProcessSupervisor};
pub use tasks::TaskManager;
pub use workshop::ModMetadataResolver;
