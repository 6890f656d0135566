// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-item outcome markers in SteamCMD output.

use once_cell::sync::Lazy;
use regex::Regex;

static SUCCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Success\. Downloaded item (\d+)").expect("valid regex"));

static FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:ERROR!|Failure\.|Failed to) Download item (\d+)").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Success(String),
    Failure(String),
    Other,
}

/// Classify one output line.
pub fn classify(line: &str) -> LineClass {
    if let Some(caps) = SUCCESS.captures(line) {
        return LineClass::Success(caps[1].to_string());
    }
    if let Some(caps) = FAILURE.captures(line) {
        return LineClass::Failure(caps[1].to_string());
    }
    LineClass::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_line() {
        assert_eq!(
            classify(r#"Success. Downloaded item 2003433312 to "/steamcmd/steamapps/workshop/content/294100/2003433312" (51342 bytes)"#),
            LineClass::Success("2003433312".to_string())
        );
    }

    #[test]
    fn test_failure_lines() {
        assert_eq!(
            classify("ERROR! Download item 1234 failed (Timeout)."),
            LineClass::Failure("1234".to_string())
        );
        assert_eq!(
            classify("Failure. Download item 55 failed (File Not Found)."),
            LineClass::Failure("55".to_string())
        );
        assert_eq!(
            classify("Failed to Download item 9"),
            LineClass::Failure("9".to_string())
        );
    }

    #[test]
    fn test_other_lines() {
        assert_eq!(classify("Logging in user 'anonymous' to Steam Public...OK"), LineClass::Other);
        assert_eq!(classify("Downloading item 1234 ..."), LineClass::Other);
        assert_eq!(classify(""), LineClass::Other);
    }
}
