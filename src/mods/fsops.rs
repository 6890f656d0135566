// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Directory moves that never leave a half-moved tree behind.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Remove a file or directory tree. A missing path is not an error.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Recursively copy `src` to `dst`. `dst` must not exist.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Unexpected path outside {}", src.display()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).with_context(|| format!("Failed to read link {}", src.display()))?;
    std::os::unix::fs::symlink(&link, dst)
        .with_context(|| format!("Failed to create link {}", dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))
}

/// Move the directory `src` to `dst`, which must not exist yet.
///
/// A plain rename is tried first. When that fails because the two paths are
/// on different filesystems, the tree is copied and the source deleted. A
/// failed copy removes whatever reached `dst`, so on error the source is
/// still complete and `dst` is absent. Once the copy is complete the move
/// counts as done; a source that cannot be deleted is only logged.
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let rename_err = match fs::rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if !src.is_dir() || dst.exists() {
        return Err(rename_err).with_context(|| {
            format!("Failed to move {} to {}", src.display(), dst.display())
        });
    }

    tracing::debug!(
        src = %src.display(),
        dst = %dst.display(),
        "Rename failed ({}); falling back to copy",
        rename_err
    );

    move_by_copy(src, dst, remove_tree)
}

fn move_by_copy(
    src: &Path,
    dst: &Path,
    remove_source: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<()> {
    if let Err(e) = copy_tree(src, dst) {
        if let Err(cleanup) = remove_tree(dst) {
            tracing::warn!(path = %dst.display(), "Could not remove partial copy: {}", cleanup);
        }
        return Err(e);
    }

    if let Err(e) = remove_source(src) {
        tracing::warn!(
            src = %src.display(),
            dst = %dst.display(),
            "Copied but could not remove the source; leaving it behind: {}",
            e
        );
    }
    Ok(())
}
