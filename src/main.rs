// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use modfetch::cache::TtlCache;
use modfetch::config::{self, get_config_dir, Config, SETTABLE_KEYS};
use modfetch::download::{
    load_export, save_export, AcceptMissing, Confirm, ConfirmKind, ConfirmRequest, DrainError,
    DownloadOrchestrator, EnqueueResult, ItemState, QueueState, StatusKind, StatusUpdate,
};
use modfetch::error::{tool_unavailable_message, ErrorBuilder};
use modfetch::games::{GameProfile, GameRegistry};
use modfetch::mods::{ModChange, ModStateStore};
use modfetch::supervisor::{stop_channel, ProcessSupervisor, SupervisorConfig};
use modfetch::tasks::{TaskError, TaskManager};
use modfetch::utils::format_size;
use modfetch::workshop::{HttpPageSource, ModMetadataResolver, DEFAULT_REQUEST_TIMEOUT};
use modfetch::WorkshopError;

/// Exit codes following sysexits.h conventions
/// These provide meaningful exit status to calling processes and scripts
mod exit_codes {
    /// Success - operation completed successfully
    pub const SUCCESS: i32 = 0;
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Data error - invalid input data format
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - SteamCMD missing
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Temporary failure - try again later
    pub const TEMP_FAIL: i32 = 75;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

/// Spinner helpers for consistent progress indicators
mod spinner {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    /// Create a spinner with consistent styling
    pub fn create(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("\u{28FB}\u{28F9}\u{28FC}\u{28F8}\u{28FE}\u{28F6}\u{28F7}\u{28E7}\u{28CF}\u{28DF} ")
            .template("{spinner:.cyan} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    /// Finish spinner with success message
    pub fn finish_success(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("\x1b[32m[OK]\x1b[0m {}", message);
    }

    /// Finish spinner with warning message
    pub fn finish_warning(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("\x1b[33m[!]\x1b[0m {}", message);
    }

    /// Finish spinner with error message
    pub fn finish_error(spinner: &ProgressBar, message: &str) {
        spinner.finish_and_clear();
        println!("\x1b[31m[X]\x1b[0m {}", message);
    }
}

#[derive(Parser)]
#[command(name = "modfetch")]
#[command(author, version, about = "Download and manage Steam Workshop mods with SteamCMD")]
#[command(long_about = "Download and manage Steam Workshop mods with SteamCMD.\n\n\
    Register a game:   modfetch game add 294100 RimWorld ~/RimWorld/Mods\n\
    Queue a mod:       modfetch queue add 294100 2003433312\n\
    Download:          modfetch download\n\
    Disable a mod:     modfetch mods disable 294100 2003433312")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: only errors are logged
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: -v for info, -vv for debug logging
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the download queue
    ///
    /// Examples:
    ///   modfetch queue add 294100 2003433312 1874644848
    ///   modfetch queue list
    ///   modfetch queue export 294100 rimworld_queue.json
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Queue the members of a Workshop collection
    ///
    /// Examples:
    ///   modfetch collection 294100 1541305730
    ///   modfetch collection 294100 1541305730 --interactive
    Collection {
        /// Steam app id of the game
        game: String,
        /// Workshop id of the collection
        collection_id: String,
        /// Choose which members to queue
        #[arg(short, long)]
        interactive: bool,
    },

    /// Download everything queued
    ///
    /// Examples:
    ///   modfetch download
    ///   modfetch download --interactive
    #[command(alias = "dl")]
    Download {
        /// Choose which discovered dependencies to queue
        #[arg(short, long)]
        interactive: bool,
    },

    /// Show Workshop details and dependencies of a mod
    Info {
        mod_id: String,
        /// Game whose installed mods are checked for dependencies
        #[arg(long)]
        game: Option<String>,
    },

    /// Manage installed mods
    Mods {
        #[command(subcommand)]
        command: ModsCommands,
    },

    /// Manage registered games
    Game {
        #[command(subcommand)]
        command: GameCommands,
    },

    /// Configure settings
    ///
    /// Examples:
    ///   modfetch config show
    ///   modfetch config set-steamcmd ~/steamcmd/steamcmd.sh
    ///   modfetch config set max_attempts 5
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },

    /// Metadata cache operations
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Queue one or more mods for a game
    Add { game: String, mod_ids: Vec<String> },
    /// Show the queue
    List,
    /// Remove one mod from the queue
    Remove { game: String, mod_id: String },
    /// Empty the queue
    Clear,
    /// Write one game's queue to a file
    Export { game: String, output: PathBuf },
    /// Queue the mods listed in an export file
    Import { input: PathBuf },
}

#[derive(Subcommand)]
enum ModsCommands {
    /// List installed mods
    List {
        game: String,
        /// Fetch titles and authors from the Workshop
        #[arg(long)]
        refresh: bool,
    },
    /// Move an archived mod back into the mods directory
    Enable { game: String, mod_id: String },
    /// Move a mod into the archive
    Disable { game: String, mod_id: String },
    /// Delete a mod
    Remove { game: String, mod_id: String },
}

#[derive(Subcommand)]
enum GameCommands {
    /// Register a game (replaces an existing entry with the same id)
    Add {
        steam_id: String,
        name: String,
        mods_root: PathBuf,
        /// Game executable
        #[arg(long)]
        exe: Option<PathBuf>,
    },
    /// List registered games
    List,
    /// Forget a game (its mods stay on disk)
    Remove { steam_id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set the SteamCMD binary path
    SetSteamcmd { path: PathBuf },
    /// Set any setting by name
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Drop all cached metadata
    Clear,
    /// Drop the cached metadata of one mod or collection
    Invalidate { id: String },
}

/// Confirmation through an interactive multi-select.
struct PromptConfirm;

impl Confirm for PromptConfirm {
    fn confirm(&self, request: &ConfirmRequest) -> Vec<String> {
        let message = match &request.kind {
            ConfirmKind::Dependencies { parent_name, .. } => {
                format!("{} requires these mods. Queue them?", parent_name)
            }
            ConfirmKind::Collection { collection_id } => {
                format!("Queue which members of collection {}?", collection_id)
            }
        };

        let options: Vec<String> = request
            .candidates
            .iter()
            .map(|c| {
                if c.already_installed {
                    format!("{} ({}) [installed]", c.name, c.id)
                } else {
                    format!("{} ({})", c.name, c.id)
                }
            })
            .collect();
        let defaults: Vec<usize> = request
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.already_installed)
            .map(|(i, _)| i)
            .collect();

        match inquire::MultiSelect::new(&message, options)
            .with_default(&defaults)
            .raw_prompt()
        {
            Ok(selected) => selected
                .into_iter()
                .filter_map(|choice| request.candidates.get(choice.index))
                .map(|c| c.id.clone())
                .collect(),
            Err(e) => {
                tracing::warn!("Prompt cancelled: {}", e);
                Vec::new()
            }
        }
    }
}

/// Everything a command needs, built once per invocation.
struct App {
    config_dir: PathBuf,
    config: Config,
    tasks: TaskManager,
    registry: GameRegistry,
    resolver: ModMetadataResolver,
}

impl App {
    fn open() -> Result<Self> {
        let config_dir = get_config_dir()?;
        let config = Config::load_from(&config::config_path(&config_dir))?;
        let tasks = TaskManager::new(config.max_concurrency);
        let registry = GameRegistry::open(config::games_path(&config_dir))?;

        let resolver_config = config.resolver_config();
        let details = Arc::new(TtlCache::open(
            config::metadata_cache_path(&config_dir),
            resolver_config.ttl,
        ));
        let collections = Arc::new(TtlCache::open(
            config::collection_cache_path(&config_dir),
            resolver_config.ttl,
        ));
        let source = Arc::new(HttpPageSource::new(DEFAULT_REQUEST_TIMEOUT)?);
        let resolver =
            ModMetadataResolver::new(source, details, collections, tasks.clone(), resolver_config);

        Ok(Self {
            config_dir,
            config,
            tasks,
            registry,
            resolver,
        })
    }

    fn game(&self, steam_id: &str) -> Result<GameProfile> {
        self.registry.get(steam_id).with_context(|| {
            ErrorBuilder::new(format!("Game {} is not registered", steam_id))
                .fix(format!("Register it: modfetch game add {} <name> <mods-dir>", steam_id))
                .fix("List registered games: modfetch game list")
                .build()
        })
    }

    /// Scan a game's mods directory on the task pool.
    async fn scan(&self, store: &Arc<ModStateStore>) -> Result<()> {
        let store = Arc::clone(store);
        self.tasks
            .submit_blocking("scan", move || {
                store.scan();
                Ok(())
            })
            .join()
            .await
            .context("Failed to scan mods directory")
    }

    async fn orchestrator(&self, confirm: Arc<dyn Confirm>) -> Result<DownloadOrchestrator> {
        let supervisor_config = self
            .config
            .supervisor_config()
            .unwrap_or_else(|| SupervisorConfig::new(PathBuf::new()));
        let supervisor = Arc::new(ProcessSupervisor::new(supervisor_config));
        let queue = QueueState::load(config::queue_path(&self.config_dir));

        let orchestrator =
            DownloadOrchestrator::new(queue, self.resolver.clone(), supervisor, self.tasks.clone())
                .with_confirm(confirm);

        for game in self.registry.list() {
            let store = Arc::new(ModStateStore::new(&game.mods_root));
            self.scan(&store).await?;
            orchestrator.register_game(game.steam_id.clone(), store);
        }
        Ok(orchestrator)
    }
}

fn confirm_for(interactive: bool) -> Arc<dyn Confirm> {
    if interactive {
        Arc::new(PromptConfirm)
    } else {
        Arc::new(AcceptMissing)
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        tracing::Level::ERROR
    } else {
        match cli.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose > 1)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} Failed to create Tokio runtime: {}", "[X]".red(), e);
            std::process::exit(ERROR);
        }
    };

    let code = match runtime.block_on(run(cli.command)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "[X]".red(), e);
            ERROR
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Config { command } => handle_config(command.unwrap_or(ConfigCommands::Show)),
        Commands::Game { command } => handle_game(command),
        command => {
            let app = App::open()?;
            let code = match command {
                Commands::Queue { command } => handle_queue(&app, command).await?,
                Commands::Collection {
                    game,
                    collection_id,
                    interactive,
                } => handle_collection(&app, &game, &collection_id, interactive).await?,
                Commands::Download { interactive } => handle_download(&app, interactive).await?,
                Commands::Info { mod_id, game } => handle_info(&app, &mod_id, game.as_deref()).await?,
                Commands::Mods { command } => handle_mods(&app, command).await?,
                Commands::Cache { command } => handle_cache(&app, command),
                Commands::Config { .. } | Commands::Game { .. } => SUCCESS,
            };
            app.tasks.shutdown(true).await;
            Ok(code)
        }
    }
}

fn print_header(title: &str) {
    println!();
    println!("{}", format!("=== {} ===", title).bright_cyan().bold());
    println!();
}

// ============================================================================
// Queue
// ============================================================================

async fn handle_queue(app: &App, command: QueueCommands) -> Result<i32> {
    let orchestrator = app.orchestrator(Arc::new(AcceptMissing)).await?;

    match command {
        QueueCommands::Add { game, mod_ids } => {
            app.game(&game)?;
            if mod_ids.is_empty() {
                bail!("No mod ids given");
            }
            let mut invalid = 0;
            for mod_id in &mod_ids {
                match orchestrator.enqueue(&game, mod_id) {
                    EnqueueResult::Added => println!("{} Queued {}", "[✓]".green(), mod_id),
                    EnqueueResult::Duplicate => {
                        println!("{} {} is already queued", "[!]".yellow(), mod_id)
                    }
                    EnqueueResult::Invalid => {
                        invalid += 1;
                        println!("{} {} is not a Workshop id", "[X]".red(), mod_id)
                    }
                }
            }
            return Ok(if invalid > 0 { DATA_ERR } else { SUCCESS });
        }
        QueueCommands::List => {
            let queue = orchestrator.queue();
            print_header("Download Queue");
            if queue.is_empty() {
                println!("  {}", "(empty)".dimmed());
            }
            for item in &queue {
                let game = app
                    .registry
                    .get(&item.game_id)
                    .map(|g| g.name)
                    .unwrap_or_else(|| item.game_id.clone());
                let name = app.resolver.display_name(&item.mod_id);
                match &item.dependency_of {
                    Some(parent) => println!(
                        "  {:<12} {} {} {}",
                        item.mod_id.bold(),
                        name,
                        format!("[{}]", game).dimmed(),
                        format!("(dependency of {})", parent).dimmed()
                    ),
                    None => println!("  {:<12} {} {}", item.mod_id.bold(), name, format!("[{}]", game).dimmed()),
                }
            }
            println!();
        }
        QueueCommands::Remove { game, mod_id } => {
            if orchestrator.remove(&game, &mod_id) {
                println!("{} Removed {} from the queue", "[✓]".green(), mod_id);
            } else {
                println!("{} {} is not queued for {}", "[!]".yellow(), mod_id, game);
            }
        }
        QueueCommands::Clear => {
            let count = orchestrator.queue().len();
            orchestrator.clear();
            println!("{} Cleared {} queued mods", "[✓]".green(), count);
        }
        QueueCommands::Export { game, output } => {
            let profile = app.game(&game)?;
            let export = orchestrator.export_queue(&game, &profile.name);
            save_export(&output, &export)?;
            println!(
                "{} Exported {} mods to {}",
                "[✓]".green(),
                export.mods.len(),
                output.display()
            );
        }
        QueueCommands::Import { input } => {
            let export = load_export(&input)?;
            let added = orchestrator.import_queue(&export);
            println!(
                "{} Imported {} of {} mods for {}",
                "[✓]".green(),
                added,
                export.mods.len(),
                if export.game_name.is_empty() { &export.game_steam_id } else { &export.game_name }
            );
        }
    }
    Ok(SUCCESS)
}

async fn handle_collection(app: &App, game: &str, collection_id: &str, interactive: bool) -> Result<i32> {
    app.game(game)?;
    let orchestrator = app.orchestrator(confirm_for(interactive)).await?;

    let spinner = spinner::create(&format!("Reading collection {}...", collection_id));
    if interactive {
        spinner.disable_steady_tick();
    }

    match orchestrator.enqueue_collection(game, collection_id).await {
        Ok(added) => {
            spinner::finish_success(&spinner, &format!("Queued {} mods from collection {}", added.len(), collection_id));
            Ok(SUCCESS)
        }
        Err(WorkshopError::NotFound) => {
            spinner::finish_error(&spinner, &format!("Collection {} not found", collection_id));
            Ok(DATA_ERR)
        }
        Err(e) => {
            spinner::finish_error(&spinner, &format!("Could not read collection: {}", e));
            Ok(TEMP_FAIL)
        }
    }
}

// ============================================================================
// Download
// ============================================================================

async fn handle_download(app: &App, interactive: bool) -> Result<i32> {
    if app.config.steamcmd_path().is_none() {
        eprintln!("{}", tool_unavailable_message(None));
        return Ok(CONFIG);
    }

    let orchestrator = app.orchestrator(confirm_for(interactive)).await?;
    if orchestrator.queue().is_empty() {
        println!("{} Nothing queued", "[!]".yellow());
        return Ok(SUCCESS);
    }

    let (stop_handle, stop) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Stopping after the current step...", "[!]".yellow());
            stop_handle.stop();
        }
    });

    let spinner = spinner::create("Starting download...");
    if interactive {
        // Prompts and a ticking spinner fight over the terminal
        spinner.disable_steady_tick();
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StatusUpdate>();
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    let event_spinner = spinner.clone();
    let events = tokio::spawn(async move {
        while let Some(update) = event_rx.recv().await {
            match update.kind {
                StatusKind::Downloading => {
                    event_spinner.set_message(format!("Downloading {}...", update.display_name))
                }
                StatusKind::Success => event_spinner
                    .println(format!("{} {} ({})", "[✓]".green(), update.display_name, update.mod_id)),
                StatusKind::Failed => event_spinner
                    .println(format!("{} {} ({})", "[X]".red(), update.display_name, update.mod_id)),
            }
        }
    });
    let line_spinner = spinner.clone();
    let lines = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            let line = line.trim();
            if !line.is_empty() {
                line_spinner.set_message(line.chars().take(70).collect::<String>());
            }
        }
    });

    let result = orchestrator.drain(Some(event_tx), Some(line_tx), stop).await;
    let _ = events.await;
    let _ = lines.await;

    match result {
        Ok(report) => {
            let installed = report.installed().count();
            let failed: Vec<_> = report.failed().collect();
            if failed.is_empty() {
                spinner::finish_success(&spinner, &format!("Installed {} mods", installed));
                Ok(SUCCESS)
            } else {
                spinner::finish_warning(
                    &spinner,
                    &format!("Installed {} mods, {} failed", installed, failed.len()),
                );
                for outcome in failed {
                    if let ItemState::Failed { reason } = &outcome.state {
                        println!("    {} {}: {}", outcome.mod_id, outcome.display_name, reason.dimmed());
                    }
                }
                println!("  Re-queue failed mods with: modfetch queue add <game> <mod_id>");
                Ok(ERROR)
            }
        }
        Err(DrainError::ToolUnavailable(WorkshopError::ToolUnavailable { path })) => {
            spinner.finish_and_clear();
            eprintln!("{}", tool_unavailable_message(path.as_deref()));
            Ok(SERVICE_UNAVAILABLE)
        }
        Err(e) => {
            spinner::finish_error(&spinner, &e.to_string());
            Ok(TEMP_FAIL)
        }
    }
}

async fn handle_info(app: &App, mod_id: &str, game: Option<&str>) -> Result<i32> {
    let installed = match game {
        Some(game) => {
            let store = Arc::new(ModStateStore::new(app.game(game)?.mods_root));
            app.scan(&store).await?;
            store.installed_ids()
        }
        None => Default::default(),
    };

    let spinner = spinner::create(&format!("Fetching {}...", mod_id));
    let Some(meta) = app.resolver.get_details(mod_id).await else {
        spinner::finish_error(&spinner, &format!("Workshop item {} not found", mod_id));
        return Ok(DATA_ERR);
    };
    let dependencies = app.resolver.get_dependency_closure(mod_id, &installed).await;
    spinner.finish_and_clear();

    print_header(&meta.title);
    println!("  Id:        {}", meta.id);
    println!("  Author:    {}", meta.author);
    if let Some(updated) = &meta.updated {
        println!("  Updated:   {}", updated);
    }
    if let Some(size) = &meta.file_size {
        println!("  Size:      {}", size);
    }
    if let Some(preview) = &meta.preview_url {
        println!("  Preview:   {}", preview.dimmed());
    }
    if !meta.tags.is_empty() {
        println!("  Tags:      {}", meta.tags.join(", "));
    }
    if meta.degraded {
        println!("  {}", "(Workshop unreachable; details incomplete)".yellow());
    }
    if !dependencies.is_empty() {
        println!();
        println!("  Requires:");
        for dep in dependencies {
            let mark = if dep.already_installed { "[✓]".green() } else { "[ ]".normal() };
            println!("    {} {} ({})", mark, dep.name, dep.id);
        }
    }
    println!();
    Ok(SUCCESS)
}

// ============================================================================
// Mods
// ============================================================================

async fn handle_mods(app: &App, command: ModsCommands) -> Result<i32> {
    let (game, mod_id) = match &command {
        ModsCommands::List { game, .. } => (game.clone(), None),
        ModsCommands::Enable { game, mod_id }
        | ModsCommands::Disable { game, mod_id }
        | ModsCommands::Remove { game, mod_id } => (game.clone(), Some(mod_id.clone())),
    };
    let profile = app.game(&game)?;
    let store = Arc::new(ModStateStore::new(&profile.mods_root));
    app.scan(&store).await?;

    let change = match command {
        ModsCommands::List { refresh, .. } => {
            if refresh {
                let ids: Vec<String> = store.installed_ids().into_iter().collect();
                let spinner = spinner::create(&format!("Fetching details for {} mods...", ids.len()));
                for (id, meta) in app.resolver.get_details_many(&ids).await {
                    if let Some(meta) = meta.filter(|m| !m.degraded) {
                        store.apply_metadata(&id, &meta);
                    }
                }
                spinner.finish_and_clear();
            } else {
                for record in store.records() {
                    if let Some(meta) = app.resolver.cached_details(&record.id) {
                        store.apply_metadata(&record.id, &meta);
                    }
                }
            }
            print_mod_list(&profile, &store);
            return Ok(SUCCESS);
        }
        ModsCommands::Enable { .. } => ModChange::Enable,
        ModsCommands::Disable { .. } => ModChange::Disable,
        ModsCommands::Remove { .. } => ModChange::Remove,
    };

    let mod_id = mod_id.unwrap_or_default();
    let outcome = change.run(&app.tasks, Arc::clone(&store), &mod_id).await;

    match outcome {
        Ok(()) => {
            println!("{} Done: {}", "[✓]".green(), app.resolver.display_name(&mod_id));
            Ok(SUCCESS)
        }
        Err(TaskError::Failed(msg)) => {
            eprintln!("{} {} ({}): {}", "[X]".red(), mod_id, profile.name, msg);
            Ok(ERROR)
        }
        Err(e) => {
            eprintln!("{} {} ({}): {}", "[X]".red(), mod_id, profile.name, e);
            Ok(ERROR)
        }
    }
}

fn print_mod_list(profile: &GameProfile, store: &ModStateStore) {
    print_header(&format!("{} Mods", profile.name));
    let records = store.records();
    if records.is_empty() {
        println!("  {}", "(no mods installed)".dimmed());
    }
    for record in &records {
        let status = if record.enabled { "[on] ".green() } else { "[off]".dimmed() };
        println!(
            "  {} {:<12} {:<40} {}",
            status,
            record.id,
            record.title,
            format_size(record.size_bytes).dimmed()
        );
    }
    let enabled = records.iter().filter(|r| r.enabled).count();
    println!();
    println!("  {} enabled, {} archived", enabled, records.len() - enabled);
    println!("  Location: {}", store.active_root().display().to_string().dimmed());
    println!();
}

// ============================================================================
// Games, config, cache
// ============================================================================

fn handle_game(command: GameCommands) -> Result<i32> {
    let registry = GameRegistry::open(config::games_path(&get_config_dir()?))?;
    match command {
        GameCommands::Add {
            steam_id,
            name,
            mods_root,
            exe,
        } => {
            let mut profile = GameProfile::new(name.clone(), steam_id.clone(), mods_root);
            profile.executable_path = exe;
            registry.add(profile)?;
            println!("{} Registered {} ({})", "[✓]".green(), name, steam_id);
        }
        GameCommands::List => {
            print_header("Games");
            let games = registry.list();
            if games.is_empty() {
                println!("  {}", "(none registered)".dimmed());
            }
            for game in games {
                println!("  {:<10} {:<24} {}", game.steam_id.bold(), game.name, game.mods_root.display().to_string().dimmed());
            }
            println!();
        }
        GameCommands::Remove { steam_id } => {
            if registry.remove(&steam_id)? {
                println!("{} Removed game {}", "[✓]".green(), steam_id);
            } else {
                println!("{} Game {} is not registered", "[!]".yellow(), steam_id);
            }
        }
    }
    Ok(SUCCESS)
}

fn handle_config(command: ConfigCommands) -> Result<i32> {
    let path = config::config_path(&get_config_dir()?);
    let mut config = Config::load_from(&path)?;

    match command {
        ConfigCommands::Show => {
            print_header("modfetch Configuration");
            let steamcmd = config
                .steamcmd_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".dimmed().to_string());
            println!("  SteamCMD:          {}", steamcmd);
            println!("  Download timeout:  {}s", config.download_timeout_secs);
            println!("  Max attempts:      {}", config.max_attempts);
            println!("  Max concurrency:   {}", config.max_concurrency);
            println!("  Request interval:  {}ms", config.request_interval_ms);
            println!("  Metadata TTL:      {}s", config.metadata_ttl_secs);
            println!();
            println!("Config file: {}", path.display());
            println!();
        }
        ConfigCommands::SetSteamcmd { path: tool } => {
            if !tool.is_file() {
                eprintln!("{}", tool_unavailable_message(Some(tool.as_path())));
                return Ok(CONFIG);
            }
            config.steamcmd_path = Some(tool.clone());
            config.save_to(&path)?;
            println!("{} SteamCMD path set to: {}", "[✓]".green(), tool.display());
        }
        ConfigCommands::Set { key, value } => {
            if let Err(e) = config.set(&key, &value) {
                eprintln!("{} {}", "[X]".red(), e);
                eprintln!("    Valid keys: {}", SETTABLE_KEYS.join(", "));
                return Ok(CONFIG);
            }
            config.save_to(&path)?;
            println!("{} {} set to: {}", "[✓]".green(), key, value);
        }
    }
    Ok(SUCCESS)
}

fn handle_cache(app: &App, command: CacheCommands) -> i32 {
    match command {
        CacheCommands::Clear => {
            app.resolver.clear();
            println!("{} Cache cleared", "[✓]".green());
        }
        CacheCommands::Invalidate { id } => {
            let details = app.resolver.invalidate(&id);
            let collection = app.resolver.invalidate_collection(&id);
            if details || collection {
                println!("{} Dropped cached data for {}", "[✓]".green(), id);
            } else {
                println!("{} Nothing cached for {}", "[!]".yellow(), id);
            }
        }
    }
    SUCCESS
}
