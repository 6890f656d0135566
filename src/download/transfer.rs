// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Queue export and import files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One queued mod in an export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedMod {
    pub mod_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
}

/// A shareable snapshot of one game's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueExport {
    pub game_steam_id: String,
    #[serde(default)]
    pub game_name: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub mods: Vec<ExportedMod>,
}

pub fn save_export(path: &Path, export: &QueueExport) -> Result<()> {
    let content = serde_json::to_string_pretty(export)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn load_export(path: &Path) -> Result<QueueExport> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a modfetch queue export", path.display()))
}
