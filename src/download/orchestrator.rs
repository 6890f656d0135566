// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download orchestrator: queue, dependency expansion, batch drain.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use indexmap::IndexMap;

use crate::error::WorkshopError;
use crate::locks::{resilient_read, resilient_write};
use crate::mods::ModStateStore;
use crate::supervisor::{BatchReport, BatchRetriever, ProgressSink, RunStatus, StopSignal};
use crate::tasks::TaskManager;
use crate::types::{is_valid_mod_id, DependencyInfo};
use crate::workshop::ModMetadataResolver;

use super::confirm::{AcceptMissing, Confirm, ConfirmKind, ConfirmRequest};
use super::state::QueueState;
use super::transfer::{ExportedMod, QueueExport};
use super::types::{
    DrainError, DrainReport, EnqueueResult, ItemOutcome, ItemState, QueueItem, StatusKind,
    StatusSink, StatusUpdate,
};

type ItemKey = (String, String);

fn key(game_id: &str, mod_id: &str) -> ItemKey {
    (game_id.to_string(), mod_id.to_string())
}

/// Holds the drain slot; releasing it on drop covers early returns.
struct DrainSlot<'a>(&'a AtomicBool);

impl<'a> DrainSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the pending queue and turns it into installed mods.
///
/// Each game registered with [`DownloadOrchestrator::register_game`] gets
/// one SteamCMD batch per drain. Only one drain runs at a time.
pub struct DownloadOrchestrator {
    queue: RwLock<QueueState>,
    states: RwLock<HashMap<ItemKey, ItemState>>,
    stores: RwLock<HashMap<String, Arc<ModStateStore>>>,
    resolver: ModMetadataResolver,
    retriever: Arc<dyn BatchRetriever>,
    tasks: TaskManager,
    confirm: Arc<dyn Confirm>,
    draining: AtomicBool,
}

impl DownloadOrchestrator {
    pub fn new(
        queue: QueueState,
        resolver: ModMetadataResolver,
        retriever: Arc<dyn BatchRetriever>,
        tasks: TaskManager,
    ) -> Self {
        let states = queue
            .items()
            .iter()
            .map(|item| (key(&item.game_id, &item.mod_id), ItemState::Queued))
            .collect();
        Self {
            queue: RwLock::new(queue),
            states: RwLock::new(states),
            stores: RwLock::new(HashMap::new()),
            resolver,
            retriever,
            tasks,
            confirm: Arc::new(AcceptMissing),
            draining: AtomicBool::new(false),
        }
    }

    /// Replace the confirmation collaborator (default: [`AcceptMissing`]).
    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Associate a game id with the store that owns its mods directory.
    pub fn register_game(&self, game_id: impl Into<String>, store: Arc<ModStateStore>) {
        resilient_write(&self.stores).insert(game_id.into(), store);
    }

    pub fn store(&self, game_id: &str) -> Option<Arc<ModStateStore>> {
        resilient_read(&self.stores).get(game_id).cloned()
    }

    pub fn resolver(&self) -> &ModMetadataResolver {
        &self.resolver
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Ordered snapshot of the queue.
    pub fn queue(&self) -> Vec<QueueItem> {
        resilient_read(&self.queue).items().to_vec()
    }

    pub fn item_state(&self, game_id: &str, mod_id: &str) -> Option<ItemState> {
        resilient_read(&self.states).get(&key(game_id, mod_id)).cloned()
    }

    fn set_state(&self, game_id: &str, mod_id: &str, state: ItemState) {
        resilient_write(&self.states).insert(key(game_id, mod_id), state);
    }

    fn push(&self, item: QueueItem) -> EnqueueResult {
        if !is_valid_mod_id(&item.mod_id) {
            tracing::warn!(game_id = %item.game_id, mod_id = %item.mod_id, "Rejected invalid mod id");
            return EnqueueResult::Invalid;
        }
        let (game_id, mod_id) = (item.game_id.clone(), item.mod_id.clone());

        let mut queue = resilient_write(&self.queue);
        if !queue.push(item) {
            tracing::debug!(game_id = %game_id, mod_id = %mod_id, "Already queued");
            return EnqueueResult::Duplicate;
        }
        queue.save_best_effort();
        drop(queue);

        self.set_state(&game_id, &mod_id, ItemState::Queued);
        tracing::info!(game_id = %game_id, mod_id = %mod_id, "Queued mod");
        EnqueueResult::Added
    }

    /// Queue one mod for a game. Queuing the same pair twice is a no-op.
    pub fn enqueue(&self, game_id: &str, mod_id: &str) -> EnqueueResult {
        self.push(QueueItem::new(game_id, mod_id.trim()))
    }

    pub fn remove(&self, game_id: &str, mod_id: &str) -> bool {
        let mut queue = resilient_write(&self.queue);
        let removed = queue.remove(game_id, mod_id);
        if removed {
            queue.save_best_effort();
            drop(queue);
            resilient_write(&self.states).remove(&key(game_id, mod_id));
        }
        removed
    }

    pub fn clear(&self) {
        let mut queue = resilient_write(&self.queue);
        let items = queue.items().to_vec();
        queue.clear();
        queue.save_best_effort();
        drop(queue);

        let mut states = resilient_write(&self.states);
        for item in items {
            states.remove(&key(&item.game_id, &item.mod_id));
        }
    }

    fn installed_ids(&self, game_id: &str) -> HashSet<String> {
        self.store(game_id)
            .map(|store| store.installed_ids())
            .unwrap_or_default()
    }

    /// Ask the confirmation collaborator on a blocking worker.
    async fn ask(&self, request: ConfirmRequest) -> Vec<String> {
        if request.candidates.is_empty() {
            return Vec::new();
        }
        let confirm = Arc::clone(&self.confirm);
        let label = format!("confirm:{}", request.game_id);
        match self
            .tasks
            .submit_blocking(label, move || Ok(confirm.confirm(&request)))
            .join()
            .await
        {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Confirmation did not complete; adding nothing: {}", e);
                Vec::new()
            }
        }
    }

    /// Offer the direct dependencies of every queued item that has not been
    /// expanded yet, and queue the accepted ones. Returns the newly queued
    /// items.
    ///
    /// Items queued by this call are expanded on a later call, never in
    /// the same pass.
    pub async fn expand_dependencies(&self) -> Vec<QueueItem> {
        let pending: Vec<QueueItem> = self
            .queue()
            .into_iter()
            .filter(|item| !item.expanded)
            .collect();

        let mut added = Vec::new();
        for item in pending {
            let (game_id, mod_id) = (item.game_id.as_str(), item.mod_id.as_str());
            self.set_state(game_id, mod_id, ItemState::ResolvingDependencies);

            let installed = self.installed_ids(game_id);
            let queued: HashSet<String> = self
                .queue()
                .into_iter()
                .filter(|q| q.game_id == game_id)
                .map(|q| q.mod_id)
                .collect();

            let candidates: Vec<DependencyInfo> = self
                .resolver
                .get_dependency_closure(mod_id, &installed)
                .await
                .into_iter()
                .filter(|dep| !queued.contains(&dep.id))
                .collect();

            if !candidates.is_empty() {
                tracing::info!(game_id, mod_id, count = candidates.len(), "Found dependencies");
                self.set_state(game_id, mod_id, ItemState::AwaitingConfirmation);
                let accepted = self
                    .ask(ConfirmRequest {
                        game_id: game_id.to_string(),
                        kind: ConfirmKind::Dependencies {
                            parent_id: mod_id.to_string(),
                            parent_name: self.resolver.display_name(mod_id),
                        },
                        candidates: candidates.clone(),
                    })
                    .await;

                for dep in candidates.iter().filter(|c| accepted.contains(&c.id)) {
                    let dependency = QueueItem::dependency(game_id, dep.id.as_str(), mod_id);
                    if self.push(dependency.clone()).is_added() {
                        added.push(dependency);
                    }
                }
            }

            {
                let mut queue = resilient_write(&self.queue);
                queue.mark_expanded(game_id, mod_id);
                queue.save_best_effort();
            }
            if self.item_state(game_id, mod_id).map_or(true, |s| !s.is_terminal()) {
                self.set_state(game_id, mod_id, ItemState::Queued);
            }
        }
        added
    }

    /// Queue the members of a Workshop collection the confirmation
    /// collaborator accepts. Returns the ids actually added.
    pub async fn enqueue_collection(
        &self,
        game_id: &str,
        collection_id: &str,
    ) -> Result<Vec<String>, WorkshopError> {
        let members = self.resolver.get_collection_members(collection_id).await?;
        let installed = self.installed_ids(game_id);

        let candidates: Vec<DependencyInfo> = members
            .iter()
            .map(|id| DependencyInfo {
                id: id.clone(),
                name: self.resolver.display_name(id),
                already_installed: installed.contains(id),
            })
            .collect();
        tracing::info!(game_id, collection_id, members = candidates.len(), "Resolved collection");

        let accepted = self
            .ask(ConfirmRequest {
                game_id: game_id.to_string(),
                kind: ConfirmKind::Collection {
                    collection_id: collection_id.to_string(),
                },
                candidates,
            })
            .await;

        Ok(members
            .into_iter()
            .filter(|id| accepted.contains(id))
            .filter(|id| self.enqueue(game_id, id).is_added())
            .collect())
    }

    // ------------------------------------------------------------------
    // Export / import
    // ------------------------------------------------------------------

    /// Snapshot one game's queued items with whatever names are cached.
    pub fn export_queue(&self, game_id: &str, game_name: &str) -> QueueExport {
        let mods = self
            .queue()
            .into_iter()
            .filter(|item| item.game_id == game_id)
            .map(|item| {
                let cached = self.resolver.cached_details(&item.mod_id);
                ExportedMod {
                    name: cached
                        .as_ref()
                        .map(|m| m.title.clone())
                        .unwrap_or_else(|| item.mod_id.clone()),
                    author: cached.map(|m| m.author).unwrap_or_default(),
                    mod_id: item.mod_id,
                }
            })
            .collect();

        QueueExport {
            game_steam_id: game_id.to_string(),
            game_name: game_name.to_string(),
            exported_at: Utc::now(),
            mods,
        }
    }

    /// Queue every valid, not yet queued mod of an export. Returns how many
    /// were added.
    pub fn import_queue(&self, export: &QueueExport) -> usize {
        export
            .mods
            .iter()
            .filter(|m| self.enqueue(&export.game_steam_id, &m.mod_id).is_added())
            .count()
    }

    // ------------------------------------------------------------------
    // Drain
    // ------------------------------------------------------------------

    fn emit(&self, events: Option<&StatusSink>, game_id: &str, mod_id: &str, kind: StatusKind) {
        if let Some(events) = events {
            let _ = events.send(StatusUpdate {
                game_id: game_id.to_string(),
                mod_id: mod_id.to_string(),
                display_name: self.resolver.display_name(mod_id),
                kind,
            });
        }
    }

    fn finish(
        &self,
        events: Option<&StatusSink>,
        game_id: &str,
        mod_id: &str,
        state: ItemState,
    ) -> ItemOutcome {
        let kind = match state {
            ItemState::Installed => StatusKind::Success,
            _ => StatusKind::Failed,
        };
        if let ItemState::Failed { reason } = &state {
            tracing::warn!(game_id, mod_id, "Download failed: {}", reason);
        }
        self.set_state(game_id, mod_id, state.clone());
        self.emit(events, game_id, mod_id, kind);
        ItemOutcome {
            game_id: game_id.to_string(),
            mod_id: mod_id.to_string(),
            display_name: self.resolver.display_name(mod_id),
            state,
        }
    }

    /// Run the retriever for one game's batch through the task pool.
    async fn retrieve_batch(
        &self,
        game_id: &str,
        mod_ids: Vec<String>,
        progress: Option<ProgressSink>,
        stop: StopSignal,
    ) -> Result<BatchReport, String> {
        let retriever = Arc::clone(&self.retriever);
        let app_id = game_id.to_string();
        let handle = self.tasks.submit(format!("batch:{}", game_id), async move {
            Ok(retriever.retrieve(&app_id, &mod_ids, progress, stop).await)
        });

        match handle.join().await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Move one retrieved item into the game's active root.
    async fn relocate(&self, store: &Arc<ModStateStore>, game_id: &str, mod_id: &str) -> ItemState {
        self.set_state(game_id, mod_id, ItemState::Verifying);
        let source = self.retriever.content_dir(game_id, mod_id);
        if !source.is_dir() {
            return ItemState::Failed {
                reason: format!("downloaded content missing at {}", source.display()),
            };
        }

        self.set_state(game_id, mod_id, ItemState::Relocating);
        let store_for_task = Arc::clone(store);
        let id = mod_id.to_string();
        let moved = self
            .tasks
            .submit_blocking(format!("relocate:{}", mod_id), move || {
                store_for_task
                    .install_from(&id, &source)
                    .map_err(anyhow::Error::from)
            })
            .join()
            .await;

        match moved {
            Ok(_) => {
                if let Some(meta) = self.resolver.cached_details(mod_id).filter(|m| !m.degraded) {
                    store.apply_metadata(mod_id, &meta);
                }
                ItemState::Installed
            }
            Err(e) => ItemState::Failed {
                reason: format!("relocation failed: {}", e),
            },
        }
    }

    async fn drain_game(
        &self,
        game_id: &str,
        items: &[QueueItem],
        events: Option<&StatusSink>,
        progress: Option<ProgressSink>,
        stop: StopSignal,
    ) -> Vec<ItemOutcome> {
        let mod_ids: Vec<String> = items.iter().map(|item| item.mod_id.clone()).collect();

        let Some(store) = self.store(game_id) else {
            return mod_ids
                .iter()
                .map(|mod_id| {
                    self.finish(events, game_id, mod_id, ItemState::Failed {
                        reason: format!("game {} is not registered", game_id),
                    })
                })
                .collect();
        };

        for mod_id in &mod_ids {
            self.set_state(game_id, mod_id, ItemState::Downloading);
            self.emit(events, game_id, mod_id, StatusKind::Downloading);
        }
        tracing::info!(game_id, items = mod_ids.len(), "Starting download batch");

        let report = match self.retrieve_batch(game_id, mod_ids.clone(), progress, stop).await {
            Ok(report) => report,
            Err(reason) => {
                tracing::error!(game_id, "Download batch failed: {}", reason);
                return mod_ids
                    .iter()
                    .map(|mod_id| {
                        self.finish(events, game_id, mod_id, ItemState::Failed {
                            reason: reason.clone(),
                        })
                    })
                    .collect();
            }
        };

        let batch_reason = match &report.status {
            RunStatus::Succeeded => "no success marker from SteamCMD".to_string(),
            RunStatus::Failed { code: Some(code) } => format!("SteamCMD exited with status {}", code),
            RunStatus::Failed { code: None } => "SteamCMD failed".to_string(),
            RunStatus::TimedOut => "SteamCMD timed out".to_string(),
            RunStatus::Cancelled => "cancelled".to_string(),
        };

        let mut outcomes = Vec::with_capacity(mod_ids.len());
        for mod_id in &mod_ids {
            let state = if report.item_succeeded(mod_id) {
                self.relocate(&store, game_id, mod_id).await
            } else {
                ItemState::Failed {
                    reason: batch_reason.clone(),
                }
            };
            outcomes.push(self.finish(events, game_id, mod_id, state));
        }
        outcomes
    }

    /// Download everything queued, one retrieval batch per game.
    ///
    /// Each drained batch leaves the queue whatever its outcome; re-enqueue
    /// to retry. Batches for games not reached because of a stop request
    /// stay queued. Fails without touching the queue when the retrieval tool
    /// is unavailable or another drain is running.
    pub async fn drain(
        &self,
        events: Option<StatusSink>,
        progress: Option<ProgressSink>,
        stop: StopSignal,
    ) -> Result<DrainReport, DrainError> {
        let _slot = DrainSlot::acquire(&self.draining).ok_or(DrainError::AlreadyDraining)?;

        if resilient_read(&self.queue).is_empty() {
            return Ok(DrainReport::default());
        }
        self.retriever
            .check_available()
            .map_err(DrainError::ToolUnavailable)?;

        self.expand_dependencies().await;

        let mut batches: IndexMap<String, Vec<QueueItem>> = IndexMap::new();
        for item in self.queue() {
            batches.entry(item.game_id.clone()).or_default().push(item);
        }

        let mut report = DrainReport::default();
        for (game_id, items) in batches {
            if stop.is_stopped() {
                tracing::info!(game_id = %game_id, "Stop requested; leaving batch queued");
                for item in &items {
                    self.set_state(&item.game_id, &item.mod_id, ItemState::Queued);
                }
                continue;
            }

            let outcomes = self
                .drain_game(&game_id, &items, events.as_ref(), progress.clone(), stop.clone())
                .await;
            report.outcomes.extend(outcomes);

            let mut queue = resilient_write(&self.queue);
            queue.remove_batch(&items);
            queue.save_best_effort();
        }

        tracing::info!(
            installed = report.installed().count(),
            failed = report.failed().count(),
            "Drain finished"
        );
        Ok(report)
    }

    /// True while a drain holds the batch slot. Never blocks or disturbs
    /// a drain that is starting.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}
