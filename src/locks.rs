// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lock helpers that recover from poisoning.
//!
//! The queue, the caches and the task table are all shared behind
//! `std::sync` locks. A panic inside a pool task that happened to hold one of
//! those locks would otherwise poison it and take every later caller down
//! with it. These helpers log the event and hand back the guard anyway.
//!
//! ```no_run
//! use std::sync::RwLock;
//! use modfetch::locks::{resilient_read, resilient_write};
//!
//! let queue = RwLock::new(vec!["100".to_string()]);
//! resilient_write(&queue).push("200".to_string());
//! assert_eq!(resilient_read(&queue).len(), 2);
//! ```

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "modfetch::locks",
                event = "LOCK_POISONED_READ",
                "RwLock was poisoned during read acquisition. Recovering data; \
                 a task previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "modfetch::locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock was poisoned during write acquisition. Recovering data; \
                 a task previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a mutex, recovering from poisoning if necessary.
///
/// Used for state that is only ever mutated (the rate limiter's pacing
/// timestamp, the cache persist guard, a batch's marker sets).
#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "modfetch::locks",
                event = "LOCK_POISONED_MUTEX",
                "Mutex was poisoned. Recovering data."
            );
            poisoned.into_inner()
        }
    }
}
