// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Installed mods on disk.
//!
//! ```text
//! <mods_root>/
//! ├── 2003433312/        enabled
//! ├── 1874644848/        enabled
//! └── archive/
//!     └── 818773962/     disabled
//! ```

pub mod fsops;
pub mod store;

pub use store::{ModChange, ModStateStore, ARCHIVE_DIR};
