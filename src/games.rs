// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registered games and where their mods live.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::locks::{resilient_read, resilient_write};
use crate::storage::{read_json, write_json_atomic};
use crate::types::is_valid_mod_id;

/// A game whose mods modfetch manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    pub name: String,
    /// Steam app id; also the game id used by the download queue.
    pub steam_id: String,
    #[serde(default)]
    pub executable_path: Option<PathBuf>,
    /// Active root; disabled mods live in its `archive` subdirectory.
    pub mods_root: PathBuf,
}

impl GameProfile {
    pub fn new(name: impl Into<String>, steam_id: impl Into<String>, mods_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            steam_id: steam_id.into(),
            executable_path: None,
            mods_root: mods_root.into(),
        }
    }
}

/// Game profiles persisted to `games.json`.
#[derive(Debug)]
pub struct GameRegistry {
    path: PathBuf,
    games: RwLock<Vec<GameProfile>>,
}

impl GameRegistry {
    /// Load the registry at `path`. A missing file is an empty registry.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let games: Vec<GameProfile> = read_json(&path)?.unwrap_or_default();
        tracing::debug!(path = %path.display(), count = games.len(), "Loaded game registry");
        Ok(Self {
            path,
            games: RwLock::new(games),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, games: &[GameProfile]) -> Result<()> {
        write_json_atomic(&self.path, games)
    }

    /// Add a game, replacing any profile with the same Steam id.
    pub fn add(&self, profile: GameProfile) -> Result<()> {
        if !is_valid_mod_id(&profile.steam_id) {
            bail!("Invalid Steam app id: {}", profile.steam_id);
        }
        let mut games = resilient_write(&self.games);
        let mut updated = games.clone();
        match updated.iter_mut().find(|g| g.steam_id == profile.steam_id) {
            Some(existing) => *existing = profile,
            None => updated.push(profile),
        }
        self.persist(&updated)?;
        *games = updated;
        Ok(())
    }

    /// Remove a game by Steam id. Returns false if it was not registered.
    pub fn remove(&self, steam_id: &str) -> Result<bool> {
        let mut games = resilient_write(&self.games);
        let updated: Vec<GameProfile> = games.iter().filter(|g| g.steam_id != steam_id).cloned().collect();
        if updated.len() == games.len() {
            return Ok(false);
        }
        self.persist(&updated)?;
        *games = updated;
        Ok(true)
    }

    pub fn get(&self, steam_id: &str) -> Option<GameProfile> {
        resilient_read(&self.games).iter().find(|g| g.steam_id == steam_id).cloned()
    }

    pub fn list(&self) -> Vec<GameProfile> {
        resilient_read(&self.games).clone()
    }
}
