// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SteamCMD transient state.
//!
//! SteamCMD keeps partially downloaded items, app manifests and an app
//! cache next to its binary. Stale copies of those make it skip or wrongly
//! "validate" items, so they are cleared around each batch. The content
//! output directory (`steamapps/workshop/content`) is never touched here
//! except for the partial output of a single item being retried.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn workshop_dir(tool_dir: &Path) -> PathBuf {
    tool_dir.join("steamapps").join("workshop")
}

/// Where SteamCMD leaves a downloaded item.
pub fn content_dir(tool_dir: &Path, app_id: &str, mod_id: &str) -> PathBuf {
    workshop_dir(tool_dir).join("content").join(app_id).join(mod_id)
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_logged(path: &Path, failures: &mut usize) {
    if let Err(e) = remove_path(path) {
        *failures += 1;
        tracing::warn!(path = %path.display(), "Cleanup could not remove path: {}", e);
    }
}

/// Clear SteamCMD's shared transient state for `app_id`. Returns the number
/// of paths that could not be cleaned; failures are logged, never raised.
pub fn clean_transient(tool_dir: &Path, app_id: &str) -> usize {
    let mut failures = 0;
    let workshop = workshop_dir(tool_dir);

    remove_logged(&tool_dir.join("appcache"), &mut failures);
    remove_logged(&tool_dir.join("steamapps").join("libraryfolders.vdf"), &mut failures);
    remove_logged(&workshop.join(format!("appworkshop_{}.acf", app_id)), &mut failures);

    // Everything else under steamapps/workshop except the content output
    match fs::read_dir(&workshop) {
        Ok(entries) => {
            for entry in entries.flatten() {
                if entry.file_name() == "content" {
                    continue;
                }
                remove_logged(&entry.path(), &mut failures);
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            failures += 1;
            tracing::warn!(path = %workshop.display(), "Cleanup could not list directory: {}", e);
        }
    }

    let temp = workshop.join("temp");
    if let Err(e) = fs::create_dir_all(&temp) {
        failures += 1;
        tracing::warn!(path = %temp.display(), "Cleanup could not recreate temp directory: {}", e);
    }

    if failures == 0 {
        tracing::debug!(app_id, tool_dir = %tool_dir.display(), "Cleared SteamCMD transient state");
    }
    failures
}

/// Remove one item's staging and partial output before it is retried.
pub fn wipe_item_staging(tool_dir: &Path, app_id: &str, mod_id: &str) -> usize {
    let workshop = workshop_dir(tool_dir);
    let mut failures = 0;
    remove_logged(&workshop.join("downloads").join(app_id).join(mod_id), &mut failures);
    remove_logged(&workshop.join("temp").join(app_id).join(mod_id), &mut failures);
    remove_logged(&content_dir(tool_dir, app_id, mod_id), &mut failures);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_clean_transient_keeps_content() {
        let dir = TempDir::new().unwrap();
        let tool = dir.path();
        let workshop = tool.join("steamapps/workshop");

        touch(&workshop.join("content/42/100/mod.txt"));
        touch(&workshop.join("downloads/42/100/partial.bin"));
        touch(&workshop.join("temp/42/100/chunk"));
        touch(&workshop.join("appworkshop_42.acf"));
        touch(&workshop.join("appworkshop_7.acf"));
        touch(&tool.join("appcache/appinfo.vdf"));
        touch(&tool.join("steamapps/libraryfolders.vdf"));
        touch(&tool.join("steamcmd.sh"));

        assert_eq!(clean_transient(tool, "42"), 0);

        assert!(workshop.join("content/42/100/mod.txt").exists());
        assert!(!workshop.join("downloads").exists());
        assert!(workshop.join("temp").is_dir());
        assert_eq!(fs::read_dir(workshop.join("temp")).unwrap().count(), 0);
        assert!(!workshop.join("appworkshop_42.acf").exists());
        assert!(!workshop.join("appworkshop_7.acf").exists());
        assert!(!tool.join("appcache").exists());
        assert!(!tool.join("steamapps/libraryfolders.vdf").exists());
        assert!(tool.join("steamcmd.sh").exists());
    }

    #[test]
    fn test_clean_transient_on_fresh_install() {
        let dir = TempDir::new().unwrap();
        assert_eq!(clean_transient(dir.path(), "42"), 0);
        assert!(dir.path().join("steamapps/workshop/temp").is_dir());
    }

    #[test]
    fn test_wipe_item_staging_only_touches_that_item() {
        let dir = TempDir::new().unwrap();
        let tool = dir.path();
        let workshop = tool.join("steamapps/workshop");

        touch(&workshop.join("downloads/42/100/partial.bin"));
        touch(&workshop.join("content/42/100/half.txt"));
        touch(&workshop.join("content/42/200/done.txt"));

        assert_eq!(wipe_item_staging(tool, "42", "100"), 0);

        assert!(!workshop.join("downloads/42/100").exists());
        assert!(!content_dir(tool, "42", "100").exists());
        assert!(content_dir(tool, "42", "200").join("done.txt").exists());
    }
}
