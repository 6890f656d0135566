// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Confirmation of discovered dependencies and collection members.

use crate::types::DependencyInfo;

/// Why candidates are being offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmKind {
    /// Direct dependencies of `parent_id`.
    Dependencies { parent_id: String, parent_name: String },
    /// Members of a Workshop collection.
    Collection { collection_id: String },
}

/// A proposed list of mods to add to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub game_id: String,
    pub kind: ConfirmKind,
    pub candidates: Vec<DependencyInfo>,
}

/// Decides which proposed ids are queued.
///
/// Called from a blocking worker, so implementations may prompt.
pub trait Confirm: Send + Sync {
    /// Return the accepted subset of `request.candidates` ids.
    fn confirm(&self, request: &ConfirmRequest) -> Vec<String>;
}

/// Accepts every candidate that is not installed yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptMissing;

impl Confirm for AcceptMissing {
    fn confirm(&self, request: &ConfirmRequest) -> Vec<String> {
        request
            .candidates
            .iter()
            .filter(|c| !c.already_installed)
            .map(|c| c.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_missing_skips_installed() {
        let request = ConfirmRequest {
            game_id: "42".into(),
            kind: ConfirmKind::Collection {
                collection_id: "9".into(),
            },
            candidates: vec![
                DependencyInfo {
                    id: "1".into(),
                    name: "One".into(),
                    already_installed: false,
                },
                DependencyInfo {
                    id: "2".into(),
                    name: "Two".into(),
                    already_installed: true,
                },
            ],
        };
        assert_eq!(AcceptMissing.confirm(&request), vec!["1".to_string()]);
    }
}
