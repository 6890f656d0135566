// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cached, rate-limited Workshop metadata lookups.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::cache::TtlCache;
use crate::error::WorkshopError;
use crate::retry::RetryPolicy;
use crate::tasks::TaskManager;
use crate::types::{workshop_url, DependencyInfo, ModMetadata};

use super::client::{PageSource, RateLimiter};
use super::parse::{parse_collection, parse_item_page};

/// Default lifetime of cached metadata and collection listings.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(3600);

/// Default minimum spacing between Workshop requests.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for [`ModMetadataResolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub ttl: Duration,
    pub request_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_METADATA_TTL,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

struct ResolverInner {
    source: Arc<dyn PageSource>,
    details: Arc<TtlCache<ModMetadata>>,
    collections: Arc<TtlCache<Vec<String>>>,
    limiter: RateLimiter,
    config: ResolverConfig,
    tasks: TaskManager,
}

/// Resolves mod titles, authors, tags and dependencies from the Workshop.
///
/// Lookups go cache first. A miss is fetched through the task pool, paced by
/// the rate limiter and retried on transient failures. When the retries run
/// out the caller gets a degraded record instead of an error, and that record
/// is not cached, so the next lookup tries the network again.
#[derive(Clone)]
pub struct ModMetadataResolver {
    inner: Arc<ResolverInner>,
}

fn details_key(mod_id: &str) -> String {
    format!("details:{}", mod_id)
}

fn collection_key(collection_id: &str) -> String {
    format!("collection:{}", collection_id)
}

/// Display name for a dependency whose page could not be read.
pub fn fallback_name(mod_id: &str) -> String {
    format!("Mod ({})", mod_id)
}

impl ModMetadataResolver {
    pub fn new(
        source: Arc<dyn PageSource>,
        details: Arc<TtlCache<ModMetadata>>,
        collections: Arc<TtlCache<Vec<String>>>,
        tasks: TaskManager,
        config: ResolverConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                source,
                details,
                collections,
                limiter: RateLimiter::new(config.request_interval),
                config,
                tasks,
            }),
        }
    }

    /// Resolver with in-memory caches, mostly for tests and one-shot commands.
    pub fn in_memory(source: Arc<dyn PageSource>, tasks: TaskManager, config: ResolverConfig) -> Self {
        let details = Arc::new(TtlCache::in_memory(config.ttl));
        let collections = Arc::new(TtlCache::in_memory(config.ttl));
        Self::new(source, details, collections, tasks, config)
    }

    /// Cached metadata for `mod_id`, without touching the network.
    pub fn cached_details(&self, mod_id: &str) -> Option<ModMetadata> {
        self.inner.details.get(&details_key(mod_id))
    }

    /// Display name for `mod_id` from the cache, or the id itself.
    pub fn display_name(&self, mod_id: &str) -> String {
        self.cached_details(mod_id)
            .map(|meta| meta.title)
            .unwrap_or_else(|| mod_id.to_string())
    }

    /// Drop the cached details of one mod.
    pub fn invalidate(&self, mod_id: &str) -> bool {
        self.inner.details.invalidate(&details_key(mod_id))
    }

    /// Drop the cached member list of one collection.
    pub fn invalidate_collection(&self, collection_id: &str) -> bool {
        self.inner.collections.invalidate(&collection_key(collection_id))
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.inner.details.clear();
        self.inner.collections.clear();
    }

    /// Rate-limited fetch with retry. Runs on the caller's task.
    async fn fetch_page(&self, label: &str, url: &str) -> Result<String, WorkshopError> {
        let inner = &self.inner;
        inner
            .config
            .retry
            .run(label, |attempt| async move {
                inner.limiter.acquire().await;
                tracing::debug!(url, attempt, "Fetching Workshop page");
                inner.source.fetch(url).await
            })
            .await
    }

    async fn resolve_details(&self, mod_id: &str) -> Option<ModMetadata> {
        let key = details_key(mod_id);
        if let Some(meta) = self.inner.details.get(&key) {
            return Some(meta);
        }

        match self.fetch_page(&key, &workshop_url(mod_id)).await {
            Ok(html) => {
                let meta = parse_item_page(mod_id, &html);
                self.inner.details.set(key, meta.clone(), self.inner.config.ttl);
                Some(meta)
            }
            Err(WorkshopError::NotFound) => {
                tracing::info!(mod_id, "Workshop item not found");
                None
            }
            Err(e) => {
                tracing::warn!(mod_id, "Falling back to degraded metadata: {}", e);
                Some(ModMetadata::degraded(mod_id))
            }
        }
    }

    /// Metadata for one mod; `None` when the Workshop has no such item.
    pub async fn get_details(&self, mod_id: &str) -> Option<ModMetadata> {
        if let Some(meta) = self.cached_details(mod_id) {
            return Some(meta);
        }

        let this = self.clone();
        let id = mod_id.to_string();
        let handle = self
            .inner
            .tasks
            .submit(details_key(mod_id), async move { Ok(this.resolve_details(&id).await) });

        match handle.join().await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(mod_id, "Metadata lookup did not complete: {}", e);
                Some(ModMetadata::degraded(mod_id))
            }
        }
    }

    /// Metadata for several mods, fetched concurrently through the pool.
    ///
    /// Results come back in input order. One item's failure degrades only
    /// that item.
    pub async fn get_details_many(&self, mod_ids: &[String]) -> Vec<(String, Option<ModMetadata>)> {
        let handles: Vec<_> = mod_ids
            .iter()
            .map(|mod_id| {
                let this = self.clone();
                let id = mod_id.clone();
                let handle = self
                    .inner
                    .tasks
                    .submit(details_key(mod_id), async move { Ok(this.resolve_details(&id).await) });
                (mod_id.clone(), handle)
            })
            .collect();

        join_all(handles.into_iter().map(|(mod_id, handle)| async move {
            let meta = match handle.join().await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(mod_id = %mod_id, "Metadata lookup did not complete: {}", e);
                    Some(ModMetadata::degraded(&mod_id))
                }
            };
            (mod_id, meta)
        }))
        .await
    }

    /// Member ids of a Workshop collection, excluding the collection itself.
    pub async fn get_collection_members(
        &self,
        collection_id: &str,
    ) -> Result<Vec<String>, WorkshopError> {
        let key = collection_key(collection_id);
        if let Some(members) = self.inner.collections.get(&key) {
            return Ok(members);
        }

        let this = self.clone();
        let id = collection_id.to_string();
        let handle = self.inner.tasks.submit(key.clone(), async move {
            Ok(this.fetch_page(&collection_key(&id), &workshop_url(&id)).await)
        });

        let html = match handle.join().await {
            Ok(result) => result?,
            Err(e) => {
                return Err(WorkshopError::NetworkTransient(format!(
                    "collection lookup did not complete: {}",
                    e
                )))
            }
        };

        let members = parse_collection(collection_id, &html);
        self.inner
            .collections
            .set(key, members.clone(), self.inner.config.ttl);
        Ok(members)
    }

    /// Direct dependencies of `mod_id` with display names.
    ///
    /// Dependencies of dependencies are not followed. A page without a
    /// required-items section yields an empty list.
    pub async fn get_dependency_closure(
        &self,
        mod_id: &str,
        installed_ids: &HashSet<String>,
    ) -> Vec<DependencyInfo> {
        let dependencies = match self.get_details(mod_id).await {
            Some(meta) => meta.dependencies,
            None => return Vec::new(),
        };
        if dependencies.is_empty() {
            return Vec::new();
        }

        self.get_details_many(&dependencies)
            .await
            .into_iter()
            .map(|(id, meta)| {
                let name = meta
                    .filter(|m| !m.degraded)
                    .map(|m| m.title)
                    .unwrap_or_else(|| fallback_name(&id));
                DependencyInfo {
                    already_installed: installed_ids.contains(&id),
                    id,
                    name,
                }
            })
            .collect()
    }
}
