// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Queue and drain types for Workshop downloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::WorkshopError;

/// One pending (game, mod) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Steam app id of the game
    pub game_id: String,
    /// Workshop item id
    pub mod_id: String,
    /// Mod whose dependency expansion added this item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_of: Option<String>,
    /// Whether this item's dependencies were already offered
    #[serde(default)]
    pub expanded: bool,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(game_id: impl Into<String>, mod_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            mod_id: mod_id.into(),
            dependency_of: None,
            expanded: false,
            added_at: Utc::now(),
        }
    }

    pub fn dependency(game_id: impl Into<String>, mod_id: impl Into<String>, parent: impl Into<String>) -> Self {
        let mut item = Self::new(game_id, mod_id);
        item.dependency_of = Some(parent.into());
        item
    }

    /// True if this item is the (game, mod) pair given.
    pub fn is(&self, game_id: &str, mod_id: &str) -> bool {
        self.game_id == game_id && self.mod_id == mod_id
    }
}

/// Per-item lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Queued,
    ResolvingDependencies,
    AwaitingConfirmation,
    Downloading,
    Verifying,
    Relocating,
    Installed,
    Failed { reason: String },
}

impl ItemState {
    /// Returns true if the item reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Installed | ItemState::Failed { .. })
    }
}

/// What the status stream reports for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Downloading,
    Success,
    Failed,
}

/// One event of the per-item status stream emitted while draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub game_id: String,
    pub mod_id: String,
    pub display_name: String,
    pub kind: StatusKind,
}

/// Receiver side is owned by whoever displays progress.
pub type StatusSink = mpsc::UnboundedSender<StatusUpdate>;

/// Terminal result of one drained item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub game_id: String,
    pub mod_id: String,
    pub display_name: String,
    pub state: ItemState,
}

impl ItemOutcome {
    pub fn is_installed(&self) -> bool {
        self.state == ItemState::Installed
    }
}

/// Everything a drain did, in request order per game.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl DrainReport {
    pub fn installed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.is_installed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.is_installed())
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, game_id: &str, mod_id: &str) -> Option<&ItemOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.game_id == game_id && o.mod_id == mod_id)
    }
}

/// Why a drain did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainError {
    /// The retrieval tool is missing; the queue is left untouched.
    ToolUnavailable(WorkshopError),
    /// Another drain on the same orchestrator is still running.
    AlreadyDraining,
}

impl fmt::Display for DrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainError::ToolUnavailable(e) => write!(f, "{}", e),
            DrainError::AlreadyDraining => write!(f, "A download batch is already running"),
        }
    }
}

impl std::error::Error for DrainError {}

/// Result of offering one (game, mod) pair to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Added,
    /// The pair was already queued; nothing changed.
    Duplicate,
    /// The mod id is not a Workshop id.
    Invalid,
}

impl EnqueueResult {
    pub fn is_added(&self) -> bool {
        matches!(self, EnqueueResult::Added)
    }
}
