// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent download queue.
//!
//! The queue is saved to disk after every mutation so an interrupted
//! session can be resumed at next start. An unreadable file is logged and
//! discarded rather than blocking startup.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::storage::{read_json, write_json_atomic};

use super::types::QueueItem;

/// Ordered, duplicate-free list of pending items.
#[derive(Debug, Clone, Default)]
pub struct QueueState {
    path: Option<PathBuf>,
    items: Vec<QueueItem>,
}

impl QueueState {
    /// A queue that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the queue persisted at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items: Vec<QueueItem> = match read_json::<Vec<QueueItem>>(&path) {
            Ok(Some(items)) => items,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Discarding unreadable queue: {:#}", e);
                Vec::new()
            }
        };

        let mut state = Self {
            path: Some(path),
            items: Vec::with_capacity(items.len()),
        };
        for item in items {
            if !state.contains(&item.game_id, &item.mod_id) {
                state.items.push(item);
            }
        }
        if !state.items.is_empty() {
            tracing::info!(count = state.items.len(), "Resumed pending download queue");
        }
        state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Save to disk. In-memory queues succeed without doing anything.
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => write_json_atomic(path, &self.items),
            None => Ok(()),
        }
    }

    /// Save, logging instead of failing. The in-memory queue stays
    /// authoritative for this session.
    pub fn save_best_effort(&self) {
        if let Err(e) = self.save() {
            tracing::warn!("Failed to persist download queue: {:#}", e);
        }
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, game_id: &str, mod_id: &str) -> bool {
        self.items.iter().any(|item| item.is(game_id, mod_id))
    }

    /// Append `item` unless its pair is already queued.
    pub fn push(&mut self, item: QueueItem) -> bool {
        if self.contains(&item.game_id, &item.mod_id) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn remove(&mut self, game_id: &str, mod_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| !item.is(game_id, mod_id));
        self.items.len() != before
    }

    /// Remove every pair present in `batch`; items queued since are kept.
    pub fn remove_batch(&mut self, batch: &[QueueItem]) {
        self.items
            .retain(|item| !batch.iter().any(|done| done.is(&item.game_id, &item.mod_id)));
    }

    pub fn mark_expanded(&mut self, game_id: &str, mod_id: &str) {
        if let Some(item) = self.items.iter_mut().find(|item| item.is(game_id, mod_id)) {
            item.expanded = true;
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_push_rejects_duplicate_pairs() {
        let mut queue = QueueState::in_memory();
        assert!(queue.push(QueueItem::new("42", "100")));
        assert!(!queue.push(QueueItem::new("42", "100")));
        assert!(queue.push(QueueItem::new("43", "100")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_persist_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        let mut queue = QueueState::load(&path);
        assert!(queue.is_empty());
        queue.push(QueueItem::new("42", "100"));
        queue.push(QueueItem::dependency("42", "200", "100"));
        queue.save().unwrap();

        let resumed = QueueState::load(&path);
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed.items()[1].dependency_of.as_deref(), Some("100"));
    }

    #[test]
    fn test_corrupt_queue_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "[{\"game_id\": ").unwrap();

        let queue = QueueState::load(&path);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_batch_keeps_newer_items() {
        let mut queue = QueueState::in_memory();
        queue.push(QueueItem::new("42", "100"));
        queue.push(QueueItem::new("42", "200"));
        let batch = queue.items().to_vec();
        queue.push(QueueItem::new("42", "300"));

        queue.remove_batch(&batch);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("42", "300"));
    }
}
