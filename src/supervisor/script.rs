// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SteamCMD run scripts.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::error::WorkshopError;

/// Script text for one batch: anonymous login, one download directive per
/// id in request order, then quit.
pub fn build_script(app_id: &str, mod_ids: &[String]) -> String {
    let mut script = String::new();
    script.push_str("@ShutdownOnFailedCommand 1\n");
    script.push_str("@NoPromptForPassword 1\n");
    script.push_str("login anonymous\n");
    for mod_id in mod_ids {
        script.push_str(&format!("workshop_download_item {} {} validate\n", app_id, mod_id));
    }
    script.push_str("quit\n");
    script
}

/// Write the script to a temp file that is deleted when dropped.
pub fn write_script(app_id: &str, mod_ids: &[String]) -> Result<NamedTempFile, WorkshopError> {
    let mut file = tempfile::Builder::new()
        .prefix("modfetch_")
        .suffix(".txt")
        .tempfile()
        .map_err(|e| WorkshopError::filesystem(std::env::temp_dir(), e))?;

    let written = file
        .write_all(build_script(app_id, mod_ids).as_bytes())
        .and_then(|_| file.flush());
    if let Err(e) = written {
        return Err(WorkshopError::filesystem(file.path(), e));
    }

    Ok(file)
}
