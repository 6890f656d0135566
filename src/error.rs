// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Error categories and consistent error formatting for modfetch.
//!
//! [`WorkshopError`] names the failure classes the pipeline distinguishes
//! between: which ones are retried, which ones degrade, and which ones are
//! surfaced immediately. [`format_error`] and [`ErrorBuilder`] render
//! user-facing messages with possible causes and suggested fixes.

use std::fmt;
use std::path::PathBuf;

/// Issue tracker URL printed under every formatted error.
pub const ISSUES_URL: &str = "https://github.com/modfetch/modfetch/issues";

/// Failure categories of the acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkshopError {
    /// The retrieval tool binary is missing or misconfigured. Never retried.
    ToolUnavailable { path: Option<PathBuf> },
    /// Timeout, connection reset or similar transport hiccup.
    NetworkTransient(String),
    /// The Workshop answered 429.
    RateLimited,
    /// The Workshop page does not exist (removed or private item).
    NotFound,
    /// Any other unexpected HTTP status.
    HttpStatus(u16),
    /// The retrieval tool exited unsuccessfully or reported item failures.
    ProcessFailure { code: Option<i32> },
    /// The retrieval tool exceeded its wall-clock budget.
    ProcessTimeout,
    /// A stop signal was observed.
    Cancelled,
    /// A move, copy or delete failed. Never retried.
    Filesystem { path: PathBuf, reason: String },
    /// A persisted cache file could not be parsed.
    CacheCorruption { path: PathBuf, reason: String },
}

impl WorkshopError {
    /// Whether the shared retry policy should try again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTransient(_)
            | Self::RateLimited
            | Self::ProcessFailure { .. }
            | Self::ProcessTimeout => true,
            Self::HttpStatus(code) => *code >= 500,
            Self::ToolUnavailable { .. }
            | Self::NotFound
            | Self::Cancelled
            | Self::Filesystem { .. }
            | Self::CacheCorruption { .. } => false,
        }
    }

    /// Build a filesystem error from an io error and the path it concerned.
    pub fn filesystem(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Self::Filesystem {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for WorkshopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolUnavailable { path: Some(path) } => {
                write!(f, "SteamCMD not found at {}", path.display())
            }
            Self::ToolUnavailable { path: None } => write!(f, "SteamCMD path is not configured"),
            Self::NetworkTransient(msg) => write!(f, "Network error: {}", msg),
            Self::RateLimited => write!(f, "Rate limited by the Steam Workshop"),
            Self::NotFound => write!(f, "Workshop item not found"),
            Self::HttpStatus(code) => write!(f, "Workshop returned HTTP {}", code),
            Self::ProcessFailure { code: Some(code) } => {
                write!(f, "SteamCMD exited with status {}", code)
            }
            Self::ProcessFailure { code: None } => write!(f, "SteamCMD reported a failed download"),
            Self::ProcessTimeout => write!(f, "SteamCMD timed out"),
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Filesystem { path, reason } => {
                write!(f, "Filesystem error at {}: {}", path.display(), reason)
            }
            Self::CacheCorruption { path, reason } => {
                write!(f, "Cache file {} is corrupt: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for WorkshopError {}

/// Formats an error message with title, causes, fixes, and help link.
///
/// # Example
///
/// ```
/// use modfetch::error::format_error;
///
/// let error = format_error(
///     "SteamCMD not found",
///     &["SteamCMD is not installed", "Wrong path in config"],
///     &["Set the path: modfetch config set-steamcmd /opt/steamcmd/steamcmd.sh"],
/// );
/// assert!(error.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n\n", title));

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", ISSUES_URL));

    output
}

/// Builder for constructing formatted error messages.
///
/// ```
/// use modfetch::error::ErrorBuilder;
///
/// let error = ErrorBuilder::new("Game 294100 is not registered")
///     .cause("The game was never added")
///     .fix("Register it: modfetch game add ...")
///     .build();
/// assert!(error.contains("294100"));
/// ```
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    /// Create a new error builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    /// Add a possible cause.
    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Add a suggested fix.
    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    /// Build the formatted error message.
    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

/// The message printed when the retrieval tool cannot be found.
pub fn tool_unavailable_message(path: Option<&std::path::Path>) -> String {
    let title = match path {
        Some(p) => format!("SteamCMD not found at {}", p.display()),
        None => "SteamCMD path is not configured".to_string(),
    };
    ErrorBuilder::new(title)
        .cause("SteamCMD is not installed")
        .cause("The configured path points to a moved or deleted binary")
        .fix("Install SteamCMD: https://developer.valvesoftware.com/wiki/SteamCMD")
        .fix("Set the path: modfetch config set-steamcmd <path-to-steamcmd>")
        .fix("Or export MODFETCH_STEAMCMD=<path-to-steamcmd>")
        .build()
}
