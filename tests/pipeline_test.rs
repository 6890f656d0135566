// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end drain tests with a fake retriever and canned Workshop pages.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use modfetch::cache::TtlCache;
use modfetch::download::{
    DownloadOrchestrator, DrainError, ItemState, QueueState, StatusKind, StatusUpdate,
};
use modfetch::mods::ModStateStore;
use modfetch::retry::RetryPolicy;
use modfetch::supervisor::{
    stop_channel, BatchReport, BatchRetriever, ProgressSink, RunStatus, StopSignal,
};
use modfetch::tasks::TaskManager;
use modfetch::types::{workshop_url, ModMetadata};
use modfetch::workshop::{ModMetadataResolver, PageSource, ResolverConfig};
use modfetch::WorkshopError;

/// Serves pages by URL; anything else is a 404.
struct Pages(HashMap<String, String>);

impl Pages {
    fn empty() -> Arc<Self> {
        Arc::new(Self(HashMap::new()))
    }

    fn with(items: &[(&str, &str, &[&str])]) -> Arc<Self> {
        let pages = items
            .iter()
            .map(|(id, title, deps)| (workshop_url(id), item_page(title, deps)))
            .collect();
        Arc::new(Self(pages))
    }
}

#[async_trait]
impl PageSource for Pages {
    async fn fetch(&self, url: &str) -> Result<String, WorkshopError> {
        self.0.get(url).cloned().ok_or(WorkshopError::NotFound)
    }
}

fn item_page(title: &str, deps: &[&str]) -> String {
    let links: String = deps
        .iter()
        .map(|d| {
            format!(
                "<a href=\"https://steamcommunity.com/sharedfiles/filedetails/?id={}\">dep</a>",
                d
            )
        })
        .collect();
    format!(
        "<div class=\"workshopItemTitle\">{}</div>\
         <div class=\"friendBlockContent\">Author Name<br></div>\
         <div class=\"requiredItemsContainer\" id=\"RequiredItems\">{}</div>",
        title, links
    )
}

/// Writes content for the ids in `deliver` and reports them as succeeded.
struct FakeSteam {
    staging: PathBuf,
    deliver: HashSet<String>,
    status: RunStatus,
    delay: Duration,
}

impl FakeSteam {
    fn new(staging: PathBuf, deliver: &[&str]) -> Self {
        Self {
            staging,
            deliver: deliver.iter().map(|s| s.to_string()).collect(),
            status: RunStatus::Succeeded,
            delay: Duration::ZERO,
        }
    }

    fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl BatchRetriever for FakeSteam {
    fn check_available(&self) -> Result<(), WorkshopError> {
        Ok(())
    }

    fn content_dir(&self, app_id: &str, mod_id: &str) -> PathBuf {
        self.staging.join(app_id).join(mod_id)
    }

    async fn retrieve(
        &self,
        app_id: &str,
        mod_ids: &[String],
        _sink: Option<ProgressSink>,
        _stop: StopSignal,
    ) -> Result<BatchReport, WorkshopError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for id in mod_ids {
            if self.deliver.contains(id) {
                let dir = self.content_dir(app_id, id);
                fs::create_dir_all(dir.join("About")).unwrap();
                fs::write(dir.join("About").join("About.xml"), format!("<id>{}</id>", id)).unwrap();
                succeeded.push(id.clone());
            } else {
                failed.push(id.clone());
            }
        }
        Ok(BatchReport {
            status: self.status.clone(),
            attempts: 1,
            succeeded,
            failed,
        })
    }
}

struct Fixture {
    _dir: TempDir,
    mods_root: PathBuf,
    staging: PathBuf,
    tasks: TaskManager,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mods_root = dir.path().join("Mods");
        let staging = dir.path().join("steamapps").join("workshop").join("content");
        fs::create_dir_all(&mods_root).unwrap();
        Self {
            mods_root,
            staging,
            tasks: TaskManager::new(3),
            _dir: dir,
        }
    }

    fn resolver(&self, pages: Arc<Pages>) -> ModMetadataResolver {
        ModMetadataResolver::in_memory(pages, self.tasks.clone(), resolver_config())
    }

    fn orchestrator(&self, pages: Arc<Pages>, steam: FakeSteam) -> (DownloadOrchestrator, Arc<ModStateStore>) {
        let store = Arc::new(ModStateStore::new(&self.mods_root));
        let orch = DownloadOrchestrator::new(
            QueueState::in_memory(),
            self.resolver(pages),
            Arc::new(steam),
            self.tasks.clone(),
        );
        orch.register_game("42", Arc::clone(&store));
        (orch, store)
    }
}

fn resolver_config() -> ResolverConfig {
    ResolverConfig {
        ttl: Duration::from_secs(3600),
        request_interval: Duration::ZERO,
        retry: RetryPolicy::immediate(1),
    }
}

fn collect(mut rx: mpsc::UnboundedReceiver<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count(events: &[StatusUpdate], mod_id: &str, kind: StatusKind) -> usize {
    events
        .iter()
        .filter(|e| e.mod_id == mod_id && e.kind == kind)
        .count()
}

#[tokio::test]
async fn test_partial_batch_installs_only_delivered_items() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &["100"]);
    let (orch, store) = fx.orchestrator(Pages::empty(), steam);

    orch.enqueue("42", "100");
    orch.enqueue("42", "200");

    let (tx, rx) = mpsc::unbounded_channel();
    let report = orch.drain(Some(tx), None, StopSignal::never()).await.unwrap();
    let events = collect(rx);

    assert!(orch.queue().is_empty());
    assert!(fx.mods_root.join("100").join("About").join("About.xml").is_file());
    assert!(!fx.mods_root.join("200").exists());
    assert!(store.get("100").map_or(false, |r| r.enabled));
    assert!(store.get("200").is_none());

    assert_eq!(count(&events, "100", StatusKind::Success), 1);
    assert_eq!(count(&events, "100", StatusKind::Failed), 0);
    assert_eq!(count(&events, "200", StatusKind::Failed), 1);
    assert_eq!(count(&events, "200", StatusKind::Success), 0);

    assert!(report.outcome("42", "100").unwrap().is_installed());
    assert!(matches!(
        orch.item_state("42", "200"),
        Some(ItemState::Failed { .. })
    ));
    // Staging copy was moved, not copied
    assert!(!fx.staging.join("42").join("100").exists());
}

#[tokio::test]
async fn test_full_batch_installs_everything() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &["100", "200"]);
    let (orch, store) = fx.orchestrator(Pages::empty(), steam);

    orch.enqueue("42", "100");
    orch.enqueue("42", "200");
    let report = orch.drain(None, None, StopSignal::never()).await.unwrap();

    assert_eq!(report.installed().count(), 2);
    assert_eq!(report.failed().count(), 0);
    assert_eq!(store.installed_ids().len(), 2);
}

#[tokio::test]
async fn test_failed_process_without_markers_installs_nothing() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &[])
        .with_status(RunStatus::Failed { code: Some(8) });
    let (orch, store) = fx.orchestrator(Pages::empty(), steam);

    orch.enqueue("42", "100");
    orch.enqueue("42", "200");
    let report = orch.drain(None, None, StopSignal::never()).await.unwrap();

    assert_eq!(report.installed().count(), 0);
    assert_eq!(report.failed().count(), 2);
    assert!(store.records().is_empty());
    assert!(orch.queue().is_empty());
    match &report.outcome("42", "100").unwrap().state {
        ItemState::Failed { reason } => assert!(reason.contains('8')),
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_enqueue_downloads_once() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &["100"]);
    let (orch, _store) = fx.orchestrator(Pages::empty(), steam);

    assert!(orch.enqueue("42", "100").is_added());
    assert!(!orch.enqueue("42", "100").is_added());

    let (tx, rx) = mpsc::unbounded_channel();
    let report = orch.drain(Some(tx), None, StopSignal::never()).await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(count(&collect(rx), "100", StatusKind::Success), 1);
}

#[tokio::test]
async fn test_dependencies_join_the_batch_single_level() {
    let fx = Fixture::new();
    // 100 needs 300; 300 needs 400, which is only picked up by a later drain
    let pages = Pages::with(&[
        ("100", "Core Mod", &["300"][..]),
        ("300", "Library", &["400"][..]),
    ]);
    let steam = FakeSteam::new(fx.staging.clone(), &["100", "300", "400"]);
    let (orch, store) = fx.orchestrator(pages, steam);

    orch.enqueue("42", "100");
    let report = orch.drain(None, None, StopSignal::never()).await.unwrap();

    assert!(report.outcome("42", "100").unwrap().is_installed());
    assert!(report.outcome("42", "300").unwrap().is_installed());
    assert!(report.outcome("42", "400").is_none());
    assert!(store.get("300").is_some());
    assert_eq!(store.get("100").unwrap().title, "Core Mod");
}

#[tokio::test]
async fn test_installed_dependency_is_not_queued() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.mods_root.join("300")).unwrap();
    let pages = Pages::with(&[("100", "Core Mod", &["300"][..])]);
    let steam = FakeSteam::new(fx.staging.clone(), &["100", "300"]);
    let (orch, store) = fx.orchestrator(pages, steam);
    store.scan();

    orch.enqueue("42", "100");
    let report = orch.drain(None, None, StopSignal::never()).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcome("42", "300").is_none());
}

#[tokio::test]
async fn test_stop_before_drain_leaves_queue() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &["100"]);
    let (orch, _store) = fx.orchestrator(Pages::empty(), steam);
    orch.enqueue("42", "100");

    let (handle, stop) = stop_channel();
    handle.stop();
    let report = orch.drain(None, None, stop).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(orch.queue().len(), 1);
    assert_eq!(orch.item_state("42", "100"), Some(ItemState::Queued));
}

#[tokio::test]
async fn test_only_one_drain_at_a_time() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &["100"]).with_delay(Duration::from_millis(300));
    let (orch, _store) = fx.orchestrator(Pages::empty(), steam);
    orch.enqueue("42", "100");

    let (first, second) = tokio::join!(orch.drain(None, None, StopSignal::never()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.drain(None, None, StopSignal::never()).await
    });

    assert!(first.unwrap().outcome("42", "100").unwrap().is_installed());
    assert_eq!(second.unwrap_err(), DrainError::AlreadyDraining);
}

#[tokio::test]
async fn test_status_checks_do_not_block_a_drain() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &["100"]).with_delay(Duration::from_millis(300));
    let (orch, _store) = fx.orchestrator(Pages::empty(), steam);
    orch.enqueue("42", "100");
    assert!(!orch.is_draining());

    let (drained, seen_running) = tokio::join!(orch.drain(None, None, StopSignal::never()), async {
        let mut seen = false;
        for _ in 0..100 {
            seen |= orch.is_draining();
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        seen || orch.is_draining()
    });

    assert!(drained.unwrap().outcome("42", "100").unwrap().is_installed());
    assert!(seen_running);
    assert!(!orch.is_draining());
}

#[tokio::test]
async fn test_unregistered_game_items_fail() {
    let fx = Fixture::new();
    let steam = FakeSteam::new(fx.staging.clone(), &["100"]);
    let (orch, _store) = fx.orchestrator(Pages::empty(), steam);
    orch.enqueue("7", "100");

    let report = orch.drain(None, None, StopSignal::never()).await.unwrap();
    assert_eq!(report.failed().count(), 1);
    assert!(orch.queue().is_empty());
}

#[tokio::test]
async fn test_malformed_metadata_cache_still_resolves() {
    let dir = TempDir::new().unwrap();
    let details_path = dir.path().join("metadata.json");
    fs::write(&details_path, "{ this is not json").unwrap();

    let details: Arc<TtlCache<ModMetadata>> =
        Arc::new(TtlCache::open(&details_path, Duration::from_secs(60)));
    assert!(details.is_empty());
    let collections: Arc<TtlCache<Vec<String>>> =
        Arc::new(TtlCache::in_memory(Duration::from_secs(60)));

    let resolver = ModMetadataResolver::new(
        Pages::with(&[("100", "Core Mod", &[][..])]),
        Arc::clone(&details),
        collections,
        TaskManager::new(2),
        resolver_config(),
    );

    let meta = resolver.get_details("100").await.unwrap();
    assert_eq!(meta.title, "Core Mod");
    assert_eq!(meta.author, "Author Name");

    // The cache file is rewritten as valid JSON
    let reopened: TtlCache<ModMetadata> = TtlCache::open(&details_path, Duration::from_secs(60));
    assert_eq!(reopened.len(), 1);
}

#[tokio::test]
async fn test_persisted_queue_survives_restart() {
    let fx = Fixture::new();
    let dir = TempDir::new().unwrap();
    let queue_path = dir.path().join("queue.json");

    {
        let orch = DownloadOrchestrator::new(
            QueueState::load(&queue_path),
            fx.resolver(Pages::empty()),
            Arc::new(FakeSteam::new(fx.staging.clone(), &[])),
            fx.tasks.clone(),
        );
        orch.enqueue("42", "100");
        orch.enqueue("42", "200");
    }

    let restored = QueueState::load(&queue_path);
    assert_eq!(restored.len(), 2);
    assert!(restored.contains("42", "200"));
}
