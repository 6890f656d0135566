// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Settings file (`~/.modfetch/config.json`) and the paths derived from it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::supervisor::SupervisorConfig;
use crate::workshop::ResolverConfig;

/// Environment variable that overrides the configured SteamCMD path.
pub const STEAMCMD_ENV: &str = "MODFETCH_STEAMCMD";

/// Keys accepted by [`Config::set`].
pub const SETTABLE_KEYS: &[&str] = &[
    "steamcmd_path",
    "download_timeout_secs",
    "max_attempts",
    "max_concurrency",
    "request_interval_ms",
    "metadata_ttl_secs",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Path to `steamcmd.sh` / `steamcmd.exe`
    #[serde(default)]
    pub steamcmd_path: Option<PathBuf>,
    /// Wall-clock budget for one SteamCMD run (default: 1800)
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Attempts per fetch and per batch, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Worker pool size (default: 5)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Minimum gap between Workshop requests (default: 1000)
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    /// Metadata cache lifetime (default: 3600)
    #[serde(default = "default_metadata_ttl_secs")]
    pub metadata_ttl_secs: u64,
}

fn default_download_timeout_secs() -> u64 {
    1800
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_concurrency() -> usize {
    5
}

fn default_request_interval_ms() -> u64 {
    1000
}

fn default_metadata_ttl_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            steamcmd_path: None,
            download_timeout_secs: default_download_timeout_secs(),
            max_attempts: default_max_attempts(),
            max_concurrency: default_max_concurrency(),
            request_interval_ms: default_request_interval_ms(),
            metadata_ttl_secs: default_metadata_ttl_secs(),
        }
    }
}

/// `~/.modfetch`, created on first use.
pub fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let config_dir = home.join(".modfetch");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    }
    Ok(config_dir)
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.json")
}

pub fn metadata_cache_path(config_dir: &Path) -> PathBuf {
    config_dir.join("cache").join("metadata.json")
}

pub fn collection_cache_path(config_dir: &Path) -> PathBuf {
    config_dir.join("cache").join("collections.json")
}

pub fn queue_path(config_dir: &Path) -> PathBuf {
    config_dir.join("queue.json")
}

pub fn games_path(config_dir: &Path) -> PathBuf {
    config_dir.join("games.json")
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// SteamCMD path after applying the environment override.
    pub fn steamcmd_path(&self) -> Option<PathBuf> {
        match std::env::var_os(STEAMCMD_ENV) {
            Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
            _ => self.steamcmd_path.clone(),
        }
    }

    /// Update one setting from its textual form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, value))
        }

        match key {
            "steamcmd_path" => {
                self.steamcmd_path = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value.trim()))
                };
            }
            "download_timeout_secs" => self.download_timeout_secs = parse(key, value)?,
            "max_attempts" => {
                let attempts: u32 = parse(key, value)?;
                if attempts == 0 {
                    bail!("max_attempts must be at least 1");
                }
                self.max_attempts = attempts;
            }
            "max_concurrency" => {
                let n: usize = parse(key, value)?;
                if n == 0 {
                    bail!("max_concurrency must be at least 1");
                }
                self.max_concurrency = n;
            }
            "request_interval_ms" => self.request_interval_ms = parse(key, value)?,
            "metadata_ttl_secs" => self.metadata_ttl_secs = parse(key, value)?,
            other => bail!("Unknown setting '{}'. Valid keys: {}", other, SETTABLE_KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            ttl: Duration::from_secs(self.metadata_ttl_secs),
            request_interval: Duration::from_millis(self.request_interval_ms),
            retry: self.retry_policy(),
        }
    }

    /// Supervisor settings, or `None` when no SteamCMD path is known.
    pub fn supervisor_config(&self) -> Option<SupervisorConfig> {
        self.steamcmd_path().map(|path| SupervisorConfig {
            tool_path: path,
            timeout: Duration::from_secs(self.download_timeout_secs),
            retry: self.retry_policy(),
        })
    }
}
