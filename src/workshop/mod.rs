// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Steam Workshop metadata.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐     ┌─────────────────┐
//! │ ModMetadataResolver │────▶│ TtlCache        │
//! │                     │     │ (details, coll.)│
//! └─────────┬───────────┘     └─────────────────┘
//!           │ TaskManager
//!           ▼
//! ┌─────────────────────┐     ┌─────────────────┐
//! │ RateLimiter +       │────▶│ PageSource      │
//! │ RetryPolicy         │     │ (reqwest)       │
//! └─────────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::collections::HashSet;
//! use std::sync::Arc;
//! use modfetch::tasks::TaskManager;
//! use modfetch::workshop::{HttpPageSource, ModMetadataResolver, ResolverConfig, DEFAULT_REQUEST_TIMEOUT};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let source = Arc::new(HttpPageSource::new(DEFAULT_REQUEST_TIMEOUT)?);
//! let resolver = ModMetadataResolver::in_memory(source, TaskManager::default(), ResolverConfig::default());
//!
//! if let Some(meta) = resolver.get_details("2003433312").await {
//!     println!("{} by {}", meta.title, meta.author);
//! }
//! let deps = resolver.get_dependency_closure("2003433312", &HashSet::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod parse;
pub mod resolver;

pub use client::{HttpPageSource, PageSource, RateLimiter, DEFAULT_REQUEST_TIMEOUT};
pub use resolver::{
    fallback_name, ModMetadataResolver, ResolverConfig, DEFAULT_METADATA_TTL,
    DEFAULT_REQUEST_INTERVAL,
};
