// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crash-safe JSON files.
//!
//! Every file modfetch persists (the pending queue, the game registry and
//! the metadata caches) goes through [`write_json_atomic`]: serialize, write
//! to `<file>.tmp`, fsync, then rename over the target while holding an
//! exclusive `fs2` lock on `<file>.lock`. A reader therefore only ever sees
//! the previous complete document or the new complete document.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default timeout for acquiring file locks (5 seconds)
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Path of the sidecar lock file guarding `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

/// Acquire an exclusive lock with timeout.
///
/// Returns the locked file handle on success, or an error if the timeout expires.
pub fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory for lock file: {:?}", parent))?;
    }

    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {:?}", path))?;

    let start = Instant::now();

    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(lock_file),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    bail!(
                        "Timed out waiting for exclusive lock on {:?} after {:?}. \
                         Another modfetch instance may be writing this file.",
                        path,
                        timeout
                    );
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to acquire exclusive lock on {:?}", path));
            }
        }
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_json_atomic_with_timeout(path, value, LOCK_TIMEOUT)
}

/// [`write_json_atomic`] with a custom lock timeout.
pub fn write_json_atomic_with_timeout<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    timeout: Duration,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    // Held across the rename so concurrent writers serialize
    let _lock_guard = acquire_exclusive_lock_with_timeout(&lock_path(path), timeout)?;

    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {:?}", path))?;

    {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

        temp_file
            .write_all(content.as_bytes())
            .with_context(|| "Failed to write to temp file")?;

        temp_file
            .sync_all()
            .with_context(|| "Failed to sync temp file to disk")?;
    }

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename temp file into place: {:?} -> {:?}",
            temp_path, path
        )
    })?;

    Ok(())
}

/// Read and parse a JSON file. A missing file yields `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_json() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("nested").join("queue.json");

        let mut value = BTreeMap::new();
        value.insert("42".to_string(), vec!["100".to_string()]);
        write_json_atomic(&path, &value).expect("write should succeed");

        let loaded: Option<BTreeMap<String, Vec<String>>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
        assert!(!path.with_extension("tmp").exists(), "temp file must be renamed away");
    }

    #[test]
    fn test_read_missing_is_none() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let loaded: Option<Vec<String>> = read_json(&temp_dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_read_malformed_is_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(read_json::<Vec<String>>(&path).is_err());
    }

    // ========================================================================
    // File locking tests
    // ========================================================================

    #[test]
    fn test_lock_acquisition_exclusive() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = temp_dir.path().join("test.lock");

        let lock1 = acquire_exclusive_lock_with_timeout(&lock_path, Duration::from_secs(1));
        assert!(lock1.is_ok(), "First exclusive lock should succeed");

        let lock2 = acquire_exclusive_lock_with_timeout(&lock_path, Duration::from_millis(100));
        assert!(lock2.is_err(), "Second exclusive lock should fail while first is held");

        drop(lock1);

        let lock3 = acquire_exclusive_lock_with_timeout(&lock_path, Duration::from_secs(1));
        assert!(lock3.is_ok(), "Lock should succeed after previous lock released");
    }

    #[test]
    fn test_lock_timeout_behavior() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let lock_path = temp_dir.path().join("timeout_test.lock");

        let _lock1 = acquire_exclusive_lock_with_timeout(&lock_path, Duration::from_secs(1))
            .expect("First lock should succeed");

        let start = Instant::now();
        let result = acquire_exclusive_lock_with_timeout(&lock_path, Duration::from_millis(200));
        let elapsed = start.elapsed();

        assert!(result.is_err(), "Lock should have timed out");
        assert!(
            elapsed >= Duration::from_millis(150),
            "Should have waited close to timeout duration, elapsed: {:?}",
            elapsed
        );

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Timed out"), "Error should mention timeout: {}", err_msg);
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = Arc::new(temp_dir.path().join("shared.json"));
        let successful = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let path = Arc::clone(&path);
                let successful = Arc::clone(&successful);
                thread::spawn(move || {
                    for i in 0..5 {
                        let doc = vec![format!("{}-{}", t, i); 16];
                        if write_json_atomic_with_timeout(&path, &doc, Duration::from_secs(10))
                            .is_ok()
                        {
                            successful.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert_eq!(successful.load(Ordering::SeqCst), 20);

        // Whatever write landed last, the file is a complete document
        let loaded: Vec<String> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 16);
        assert!(loaded.iter().all(|s| s == &loaded[0]));
    }
}
