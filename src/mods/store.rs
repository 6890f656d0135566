// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Filesystem-backed inventory of a game's installed mods.
//!
//! The directory tree is the only source of truth. A mod is enabled when
//! its directory sits at the top level of `mods_root` and disabled when it
//! sits under `mods_root/archive`. Records are rebuilt from a scan and
//! only carry over Workshop-derived fields between scans.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::WorkshopError;
use crate::locks::{resilient_read, resilient_write};
use crate::tasks::{TaskError, TaskManager};
use crate::types::{is_valid_mod_id, ModMetadata, ModRecord};
use crate::utils::dir_size;

use super::fsops::{move_dir, remove_tree};

/// Name of the disabled partition under `mods_root`.
pub const ARCHIVE_DIR: &str = "archive";

/// Enabled/disabled state of one game's mods.
///
/// Callers serialise structural operations on the same mod id; the
/// internal lock only protects the record table itself.
#[derive(Debug)]
pub struct ModStateStore {
    mods_root: PathBuf,
    records: RwLock<IndexMap<String, ModRecord>>,
}

fn to_utc(time: io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

impl ModStateStore {
    pub fn new(mods_root: impl Into<PathBuf>) -> Self {
        Self {
            mods_root: mods_root.into(),
            records: RwLock::new(IndexMap::new()),
        }
    }

    pub fn active_root(&self) -> &Path {
        &self.mods_root
    }

    pub fn archive_root(&self) -> PathBuf {
        self.mods_root.join(ARCHIVE_DIR)
    }

    fn active_path(&self, mod_id: &str) -> PathBuf {
        self.mods_root.join(mod_id)
    }

    fn archive_path(&self, mod_id: &str) -> PathBuf {
        self.archive_root().join(mod_id)
    }

    /// Hidden sibling that holds the previous active copy during a reinstall.
    /// Dot-prefixed so scans never pick it up.
    fn replaced_path(&self, mod_id: &str) -> PathBuf {
        self.mods_root.join(format!(".{}.old", mod_id))
    }

    /// Build a record from what is on disk. Timestamps that cannot be read
    /// are left empty.
    fn record_from_disk(mod_id: &str, path: &Path, enabled: bool) -> ModRecord {
        let mut record = ModRecord::new(mod_id, path.to_path_buf(), enabled);
        match fs::metadata(path) {
            Ok(meta) => {
                record.install_date = to_utc(meta.created());
                record.local_update_date = to_utc(meta.modified());
            }
            Err(e) => {
                tracing::warn!(mod_id, path = %path.display(), "Could not read mod timestamps: {}", e);
            }
        }
        record.size_bytes = dir_size(path);
        record
    }

    fn scan_partition(&self, root: &Path, enabled: bool, found: &mut IndexMap<String, ModRecord>) {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(path = %root.display(), "Could not read mods directory: {}", e);
                return;
            }
        };

        let mut dirs: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        dirs.sort();

        for (name, path) in dirs {
            if name.starts_with('.') || (enabled && name == ARCHIVE_DIR) {
                continue;
            }
            if !is_valid_mod_id(&name) {
                tracing::warn!(path = %path.display(), "Skipping non-numeric mod directory");
                continue;
            }
            if found.contains_key(&name) {
                tracing::warn!(mod_id = %name, "Mod is present in both partitions; keeping the enabled copy");
                continue;
            }
            let record = Self::record_from_disk(&name, &path, enabled);
            found.insert(name, record);
        }
    }

    /// Rebuild the inventory from the filesystem and return it, enabled
    /// mods first. Metadata applied earlier survives for ids still present.
    pub fn scan(&self) -> Vec<ModRecord> {
        let mut found = IndexMap::new();
        self.scan_partition(&self.mods_root, true, &mut found);
        self.scan_partition(&self.archive_root(), false, &mut found);

        let mut records = resilient_write(&self.records);
        for (id, record) in found.iter_mut() {
            if let Some(previous) = records.get(id) {
                record.title = previous.title.clone();
                record.author = previous.author.clone();
                record.description = previous.description.clone();
                record.tags = previous.tags.clone();
                record.dependencies = previous.dependencies.clone();
                record.remote_update_date = previous.remote_update_date.clone();
                record.remote_file_size = previous.remote_file_size.clone();
                record.preview_url = previous.preview_url.clone();
            }
        }
        *records = found;

        tracing::debug!(mods_root = %self.mods_root.display(), count = records.len(), "Scanned mods");
        records.values().cloned().collect()
    }

    pub fn records(&self) -> Vec<ModRecord> {
        resilient_read(&self.records).values().cloned().collect()
    }

    pub fn get(&self, mod_id: &str) -> Option<ModRecord> {
        resilient_read(&self.records).get(mod_id).cloned()
    }

    /// Ids of every installed mod, enabled or not.
    pub fn installed_ids(&self) -> HashSet<String> {
        resilient_read(&self.records).keys().cloned().collect()
    }

    /// Fill a record's Workshop-derived fields. Returns false for unknown ids.
    pub fn apply_metadata(&self, mod_id: &str, meta: &ModMetadata) -> bool {
        match resilient_write(&self.records).get_mut(mod_id) {
            Some(record) => {
                record.apply_metadata(meta);
                true
            }
            None => false,
        }
    }

    /// Where `mod_id` currently lives, falling back to the disk when the
    /// record table has not seen it yet.
    fn locate(&self, mod_id: &str) -> Option<(PathBuf, bool)> {
        if let Some(record) = resilient_read(&self.records).get(mod_id) {
            return Some((record.local_path.clone(), record.enabled));
        }
        let active = self.active_path(mod_id);
        if active.is_dir() {
            return Some((active, true));
        }
        let archived = self.archive_path(mod_id);
        if archived.is_dir() {
            return Some((archived, false));
        }
        None
    }

    fn set_partition(&self, mod_id: &str, enabled: bool) -> Result<(), WorkshopError> {
        let (current, is_enabled) = self.locate(mod_id).ok_or_else(|| {
            WorkshopError::filesystem(self.archive_path(mod_id), "mod is not installed")
        })?;

        let target = if enabled {
            self.active_path(mod_id)
        } else {
            self.archive_path(mod_id)
        };

        if is_enabled == enabled && current == target {
            self.ensure_record(mod_id, &target, enabled);
            return Ok(());
        }

        let target_root = if enabled {
            self.mods_root.clone()
        } else {
            self.archive_root()
        };
        fs::create_dir_all(&target_root)
            .map_err(|e| WorkshopError::filesystem(&target_root, e))?;

        if target.exists() {
            return Err(WorkshopError::filesystem(&target, "destination already exists"));
        }

        move_dir(&current, &target).map_err(|e| {
            tracing::warn!(mod_id, enabled, "Failed to move mod: {:#}", e);
            WorkshopError::filesystem(&current, format!("{:#}", e))
        })?;

        let mut records = resilient_write(&self.records);
        match records.get_mut(mod_id) {
            Some(record) => {
                record.enabled = enabled;
                record.local_path = target;
            }
            None => {
                records.insert(mod_id.to_string(), Self::record_from_disk(mod_id, &target, enabled));
            }
        }
        tracing::info!(mod_id, enabled, "Moved mod");
        Ok(())
    }

    fn ensure_record(&self, mod_id: &str, path: &Path, enabled: bool) {
        let mut records = resilient_write(&self.records);
        if !records.contains_key(mod_id) {
            records.insert(mod_id.to_string(), Self::record_from_disk(mod_id, path, enabled));
        }
    }

    /// Move a disabled mod into the active root. Enabling an enabled mod
    /// succeeds without touching the disk.
    pub fn enable(&self, mod_id: &str) -> Result<(), WorkshopError> {
        self.set_partition(mod_id, true)
    }

    /// Move an enabled mod into the archive root.
    pub fn disable(&self, mod_id: &str) -> Result<(), WorkshopError> {
        self.set_partition(mod_id, false)
    }

    /// Delete a mod's directory and forget it. An already absent directory
    /// is a success.
    pub fn remove(&self, mod_id: &str) -> Result<(), WorkshopError> {
        let path = self
            .locate(mod_id)
            .map(|(path, _)| path)
            .unwrap_or_else(|| self.active_path(mod_id));

        remove_tree(&path).map_err(|e| {
            tracing::warn!(mod_id, path = %path.display(), "Failed to remove mod: {}", e);
            WorkshopError::filesystem(&path, e)
        })?;

        resilient_write(&self.records).shift_remove(mod_id);
        tracing::info!(mod_id, "Removed mod");
        Ok(())
    }

    /// Move an existing active copy out of the way. Returns where it went,
    /// or `None` when there was nothing to move.
    fn set_aside(&self, mod_id: &str, target: &Path) -> Result<Option<PathBuf>, WorkshopError> {
        if fs::symlink_metadata(target).is_err() {
            return Ok(None);
        }
        let aside = self.replaced_path(mod_id);
        // Leftover from an interrupted reinstall
        remove_tree(&aside).map_err(|e| WorkshopError::filesystem(&aside, e))?;
        fs::rename(target, &aside).map_err(|e| {
            tracing::warn!(mod_id, path = %target.display(), "Could not set aside installed copy: {}", e);
            WorkshopError::filesystem(target, e)
        })?;
        Ok(Some(aside))
    }

    fn restore(mod_id: &str, aside: &Path, target: &Path) {
        if let Err(e) = remove_tree(target) {
            tracing::warn!(mod_id, path = %target.display(), "Could not clear failed install: {}", e);
        }
        match fs::rename(aside, target) {
            Ok(()) => tracing::info!(mod_id, "Restored previous copy after failed install"),
            Err(e) => tracing::error!(
                mod_id,
                path = %aside.display(),
                "Could not restore previous copy: {}",
                e
            ),
        }
    }

    /// Relocate a freshly downloaded item from `source` into the active root.
    ///
    /// An existing active copy is replaced and an archived copy of the same
    /// id is deleted, so the id ends up in exactly one partition. If the
    /// move fails, the previous active copy and its record are kept.
    pub fn install_from(&self, mod_id: &str, source: &Path) -> Result<ModRecord, WorkshopError> {
        if !source.is_dir() {
            return Err(WorkshopError::filesystem(source, "downloaded content is missing"));
        }
        fs::create_dir_all(&self.mods_root)
            .map_err(|e| WorkshopError::filesystem(&self.mods_root, e))?;

        let target = self.active_path(mod_id);
        let replaced = self.set_aside(mod_id, &target)?;

        if let Err(e) = move_dir(source, &target) {
            tracing::warn!(mod_id, source = %source.display(), "Failed to relocate mod: {:#}", e);
            if let Some(aside) = &replaced {
                Self::restore(mod_id, aside, &target);
            }
            return Err(WorkshopError::filesystem(source, format!("{:#}", e)));
        }

        if let Some(aside) = replaced {
            if let Err(e) = remove_tree(&aside) {
                tracing::warn!(mod_id, path = %aside.display(), "Could not remove replaced copy: {}", e);
            }
        }

        let archived = self.archive_path(mod_id);
        if let Err(e) = remove_tree(&archived) {
            tracing::warn!(mod_id, path = %archived.display(), "Could not remove archived copy: {}", e);
        }

        let mut record = Self::record_from_disk(mod_id, &target, true);
        let mut records = resilient_write(&self.records);
        if let Some(previous) = records.get(mod_id) {
            record.title = previous.title.clone();
            record.author = previous.author.clone();
            record.description = previous.description.clone();
            record.tags = previous.tags.clone();
            record.dependencies = previous.dependencies.clone();
            record.preview_url = previous.preview_url.clone();
        }
        records.insert(mod_id.to_string(), record.clone());
        tracing::info!(mod_id, path = %target.display(), "Installed mod");
        Ok(record)
    }
}

/// A structural change to one installed mod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModChange {
    Enable,
    Disable,
    Remove,
}

impl ModChange {
    pub fn label(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Remove => "remove",
        }
    }

    pub fn apply(self, store: &ModStateStore, mod_id: &str) -> Result<(), WorkshopError> {
        match self {
            Self::Enable => store.enable(mod_id),
            Self::Disable => store.disable(mod_id),
            Self::Remove => store.remove(mod_id),
        }
    }

    /// Apply the change on the task pool's blocking threads.
    pub async fn run(
        self,
        tasks: &TaskManager,
        store: Arc<ModStateStore>,
        mod_id: &str,
    ) -> Result<(), TaskError> {
        let id = mod_id.to_string();
        tasks
            .submit_blocking(format!("mods:{}:{}", self.label(), mod_id), move || {
                self.apply(&store, &id).map_err(anyhow::Error::from)
            })
            .join()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_mod(root: &Path, id: &str) {
        let dir = root.join(id);
        fs::create_dir_all(dir.join("Defs")).unwrap();
        fs::write(dir.join("About.xml"), format!("<mod id=\"{}\"/>", id)).unwrap();
        fs::write(dir.join("Defs/things.xml"), vec![7u8; 64]).unwrap();
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect();
        files.sort();
        files
    }

    // ========================================================================
    // Scan
    // ========================================================================

    #[test]
    fn test_scan_partitions() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_mod(root, "100");
        make_mod(&root.join(ARCHIVE_DIR), "200");
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("notes")).unwrap();
        fs::write(root.join("readme.txt"), b"hi").unwrap();

        let store = ModStateStore::new(root);
        let records = store.scan();

        assert_eq!(records.len(), 2);
        let active = store.get("100").unwrap();
        assert!(active.enabled);
        assert_eq!(active.local_path, root.join("100"));
        assert!(active.size_bytes > 0);
        assert_eq!(active.title, "Mod (100)");

        let archived = store.get("200").unwrap();
        assert!(!archived.enabled);
        assert_eq!(archived.local_path, root.join("archive/200"));
        assert!(store.get("notes").is_none());
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ModStateStore::new(dir.path().join("missing"));
        assert!(store.scan().is_empty());
    }

    #[test]
    fn test_scan_keeps_applied_metadata() {
        let dir = TempDir::new().unwrap();
        make_mod(dir.path(), "100");
        let store = ModStateStore::new(dir.path());
        store.scan();

        let mut meta = ModMetadata::degraded("100");
        meta.title = "Roads".into();
        meta.tags = vec!["Map".into(), "Map".into()];
        assert!(store.apply_metadata("100", &meta));
        assert!(!store.apply_metadata("999", &meta));

        store.scan();
        let record = store.get("100").unwrap();
        assert_eq!(record.title, "Roads");
        assert_eq!(record.tags, vec!["Map".to_string()]);
    }

    // ========================================================================
    // Enable / disable / remove
    // ========================================================================

    #[test]
    fn test_enable_disable_round_trip_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_mod(&root.join(ARCHIVE_DIR), "300");
        let store = ModStateStore::new(root);
        store.scan();

        let before = snapshot(&root.join("archive/300"));

        store.enable("300").unwrap();
        let record = store.get("300").unwrap();
        assert!(record.enabled);
        assert_eq!(record.local_path, root.join("300"));
        assert!(!root.join("archive/300").exists());

        store.disable("300").unwrap();
        let record = store.get("300").unwrap();
        assert!(!record.enabled);
        assert_eq!(record.local_path, root.join("archive/300"));
        assert_eq!(snapshot(&root.join("archive/300")), before);
    }

    #[test]
    fn test_enable_already_enabled_is_noop() {
        let dir = TempDir::new().unwrap();
        make_mod(dir.path(), "100");
        let store = ModStateStore::new(dir.path());
        store.scan();

        store.enable("100").unwrap();
        assert!(dir.path().join("100/About.xml").exists());
        assert!(!dir.path().join(ARCHIVE_DIR).exists());
    }

    #[test]
    fn test_disable_creates_archive_root() {
        let dir = TempDir::new().unwrap();
        make_mod(dir.path(), "100");
        let store = ModStateStore::new(dir.path());

        // Not scanned yet: the store still finds it on disk
        store.disable("100").unwrap();
        assert!(dir.path().join("archive/100/About.xml").exists());
        assert!(!store.get("100").unwrap().enabled);
    }

    #[test]
    fn test_failed_move_leaves_record_unchanged() {
        let dir = TempDir::new().unwrap();
        make_mod(dir.path(), "100");
        // A file where the archive root should be blocks the move
        fs::write(dir.path().join(ARCHIVE_DIR), b"not a dir").unwrap();

        let store = ModStateStore::new(dir.path());
        store.scan();
        let before = store.get("100").unwrap();

        let err = store.disable("100").unwrap_err();
        assert!(matches!(err, WorkshopError::Filesystem { .. }));
        assert_eq!(store.get("100").unwrap(), before);
        assert!(dir.path().join("100/About.xml").exists());
    }

    #[test]
    fn test_enable_unknown_mod_fails() {
        let dir = TempDir::new().unwrap();
        let store = ModStateStore::new(dir.path());
        assert!(matches!(store.enable("42"), Err(WorkshopError::Filesystem { .. })));
    }

    #[test]
    fn test_remove_deletes_and_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        make_mod(&dir.path().join(ARCHIVE_DIR), "200");
        let store = ModStateStore::new(dir.path());
        store.scan();

        store.remove("200").unwrap();
        assert!(!dir.path().join("archive/200").exists());
        assert!(store.get("200").is_none());

        store.remove("200").unwrap();
        store.remove("999").unwrap();
    }

    // ========================================================================
    // Relocation
    // ========================================================================

    #[test]
    fn test_install_from_replaces_and_clears_archive() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("mods");
        make_mod(&root, "100");
        fs::write(root.join("100/stale.txt"), b"old").unwrap();
        make_mod(&root.join(ARCHIVE_DIR), "100");

        let download = dir.path().join("content");
        make_mod(&download, "100");

        let store = ModStateStore::new(&root);
        let record = store.install_from("100", &download.join("100")).unwrap();

        assert!(record.enabled);
        assert_eq!(record.local_path, root.join("100"));
        assert!(!root.join("100/stale.txt").exists());
        assert!(root.join("100/About.xml").exists());
        assert!(!root.join("archive/100").exists());
        assert!(!download.join("100").exists());
        assert!(store.installed_ids().contains("100"));
    }

    #[test]
    fn test_failed_install_keeps_previous_copy() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("mods");
        make_mod(&root, "100");
        // Content staged inside the installed copy vanishes once that copy
        // is set aside, so the move cannot complete
        make_mod(&root.join("100"), "incoming");

        let store = ModStateStore::new(&root);
        store.scan();
        let before = store.get("100").unwrap();
        let files = snapshot(&root.join("100"));

        let err = store.install_from("100", &root.join("100/incoming")).unwrap_err();
        assert!(matches!(err, WorkshopError::Filesystem { .. }));

        assert_eq!(snapshot(&root.join("100")), files);
        assert_eq!(store.get("100").unwrap(), before);
        assert!(!root.join(".100.old").exists());
        assert_eq!(store.scan().len(), 1);
    }

    #[test]
    fn test_install_from_clears_stale_replaced_copy() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("mods");
        make_mod(&root, "100");
        make_mod(&root, ".100.old");

        let download = dir.path().join("content");
        make_mod(&download, "100");

        let store = ModStateStore::new(&root);
        store.install_from("100", &download.join("100")).unwrap();

        assert!(root.join("100/About.xml").exists());
        assert!(!root.join(".100.old").exists());
    }

    #[test]
    fn test_install_from_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let store = ModStateStore::new(dir.path().join("mods"));
        let err = store.install_from("100", &dir.path().join("nothing")).unwrap_err();
        assert!(matches!(err, WorkshopError::Filesystem { .. }));
        assert!(store.get("100").is_none());
    }

    // ========================================================================
    // Changes on the task pool
    // ========================================================================

    #[tokio::test]
    async fn test_change_runs_on_task_pool() {
        let dir = TempDir::new().unwrap();
        make_mod(dir.path(), "100");
        let store = Arc::new(ModStateStore::new(dir.path()));
        store.scan();
        let tasks = TaskManager::new(2);

        ModChange::Disable.run(&tasks, Arc::clone(&store), "100").await.unwrap();
        assert!(dir.path().join("archive/100/About.xml").exists());
        assert!(!store.get("100").unwrap().enabled);

        ModChange::Enable.run(&tasks, Arc::clone(&store), "100").await.unwrap();
        assert!(store.get("100").unwrap().enabled);

        ModChange::Remove.run(&tasks, Arc::clone(&store), "100").await.unwrap();
        assert!(!dir.path().join("100").exists());
        assert!(store.get("100").is_none());
        assert_eq!(tasks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_change_failure_carries_store_error() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ModStateStore::new(dir.path()));
        let tasks = TaskManager::new(1);

        match ModChange::Enable.run(&tasks, store, "42").await {
            Err(TaskError::Failed(msg)) => assert!(msg.contains("not installed")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
