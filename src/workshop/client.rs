// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP access to Workshop pages.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use crate::error::WorkshopError;

/// Browser User-Agent; the Workshop serves a reduced page to unknown agents.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can return the HTML of a Workshop URL.
///
/// The production implementation is [`HttpPageSource`]; tests substitute
/// canned pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, WorkshopError>;
}

/// Fetches pages with reqwest.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<String, WorkshopError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                WorkshopError::NetworkTransient("request timed out".to_string())
            } else if e.is_connect() {
                WorkshopError::NetworkTransient(format!("failed to connect: {}", e))
            } else {
                WorkshopError::NetworkTransient(e.to_string())
            }
        })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => {}
            404 => return Err(WorkshopError::NotFound),
            429 => return Err(WorkshopError::RateLimited),
            code => return Err(WorkshopError::HttpStatus(code)),
        }

        response
            .text()
            .await
            .map_err(|e| WorkshopError::NetworkTransient(format!("failed to read body: {}", e)))
    }
}

/// Enforces a minimum interval between consecutive requests, across all ids.
///
/// Callers queue on the mutex, so requests leave in arrival order spaced at
/// least `min_interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request may be sent.
    pub async fn acquire(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            if slot > Instant::now() {
                sleep_until(slot).await;
            }
        }
        *next_slot = Some(Instant::now() + self.min_interval);
    }
}
