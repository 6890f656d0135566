// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Canonical types used across modfetch.
//!
//! This module provides the record types shared by the resolver, the state
//! store and the orchestrator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base URL of a Workshop item page; the numeric id is appended.
pub const WORKSHOP_ITEM_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=";

/// Returns true if `id` is a well-formed Workshop id (non-empty, all ASCII digits).
pub fn is_valid_mod_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// Page URL of the Workshop item `id`.
pub fn workshop_url(id: &str) -> String {
    format!("{}{}", WORKSHOP_ITEM_URL, id)
}

/// Metadata scraped from a Workshop item page.
///
/// A record with `degraded == true` was synthesised after the fetch
/// exhausted its retries: title falls back to the id and author to
/// `"unknown"`, every other field is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModMetadata {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// "Updated" column of the page's stats table, verbatim.
    #[serde(default)]
    pub updated: Option<String>,
    /// "File Size" column of the page's stats table, verbatim.
    #[serde(default)]
    pub file_size: Option<String>,
    /// Source URL of the main preview image.
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub degraded: bool,
}

impl ModMetadata {
    /// The fallback record used when the Workshop could not be reached.
    pub fn degraded(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            author: "unknown".to_string(),
            description: None,
            tags: Vec::new(),
            dependencies: Vec::new(),
            updated: None,
            file_size: None,
            preview_url: None,
            degraded: true,
        }
    }
}

/// One entry of a dependency closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub id: String,
    pub name: String,
    pub already_installed: bool,
}

/// An installed mod, derived from a filesystem scan.
///
/// `enabled` is true exactly when `local_path` lies under the game's active
/// root, false when it lies under `<mods_root>/archive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModRecord {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    pub enabled: bool,
    pub local_path: PathBuf,
    pub install_date: Option<DateTime<Utc>>,
    pub local_update_date: Option<DateTime<Utc>>,
    pub remote_update_date: Option<String>,
    pub remote_file_size: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    pub size_bytes: u64,
    pub workshop_url: String,
}

impl ModRecord {
    /// A bare record for a directory that has not been enriched yet.
    pub fn new(id: impl Into<String>, local_path: PathBuf, enabled: bool) -> Self {
        let id = id.into();
        Self {
            title: format!("Mod ({})", id),
            author: "unknown".to_string(),
            description: None,
            tags: Vec::new(),
            dependencies: Vec::new(),
            enabled,
            local_path,
            install_date: None,
            local_update_date: None,
            remote_update_date: None,
            remote_file_size: None,
            preview_url: None,
            size_bytes: 0,
            workshop_url: workshop_url(&id),
            id,
        }
    }

    /// Copy Workshop-derived fields into this record.
    pub fn apply_metadata(&mut self, meta: &ModMetadata) {
        self.title = meta.title.clone();
        self.author = meta.author.clone();
        self.description = meta.description.clone();
        self.tags = dedup_preserving_order(meta.tags.iter().cloned());
        self.dependencies = meta.dependencies.clone();
        self.remote_update_date = meta.updated.clone();
        self.remote_file_size = meta.file_size.clone();
        self.preview_url = meta.preview_url.clone();
    }
}

/// Remove duplicates while keeping the first occurrence of each value.
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
