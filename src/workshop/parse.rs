// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workshop page scraping.
//!
//! Steam renders item and collection pages server-side, so the fields we
//! need sit in a handful of stable `div`s. Elements are located with a regex
//! on the opening tag and then closed by counting nested `div`s, which keeps
//! extraction correct when a block contains child `div`s (the required-items
//! list always does).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{dedup_preserving_order, ModMetadata};

static DIV_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(/?)div\b[^>]*>").expect("valid regex"));

static TITLE_OPEN: Lazy<Regex> = Lazy::new(|| class_opener("workshopItemTitle"));
static AUTHOR_OPEN: Lazy<Regex> = Lazy::new(|| class_opener("friendBlockContent"));
static DESCRIPTION_OPEN: Lazy<Regex> = Lazy::new(|| class_opener("workshopItemDescription"));
static TAGS_OPEN: Lazy<Regex> = Lazy::new(|| class_opener("workshopTags"));
static STAT_LABEL_OPEN: Lazy<Regex> = Lazy::new(|| class_opener("detailsStatLeft"));
static STAT_VALUE_OPEN: Lazy<Regex> = Lazy::new(|| class_opener("detailsStatRight"));

static REQUIRED_ITEMS_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<div\b[^>]*\bid\s*=\s*["']RequiredItems["'][^>]*>"#).expect("valid regex")
});

static ANCHOR_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").expect("valid regex"));

static ITEM_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"filedetails/\?id=(\d+)").expect("valid regex"));

static COLLECTION_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sharedfiles/filedetails/\?id=(\d+)").expect("valid regex"));

static DESCRIPTION_POPUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"ShowFileDescriptionPopup\(\s*["'](\d+)["']\s*\)"#).expect("valid regex")
});

static IMG_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid regex"));

static IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\ssrc\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

/// Markers of the main preview image, most specific first.
static PREVIEW_MARKERS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r#"(?i)\sid\s*=\s*["']previewImage["']"#).expect("valid regex"),
        Regex::new(r#"(?i)\sclass\s*=\s*["'][^"']*\bworkshopItemPreviewImageMain\b"#)
            .expect("valid regex"),
        Regex::new(r#"(?i)\sclass\s*=\s*["'][^"']*\bworkshopItemPreviewImage\b"#)
            .expect("valid regex"),
    ]
});

static BREAK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").expect("valid regex"));

fn class_opener(class: &str) -> Regex {
    let pattern = format!(
        r#"(?i)<div\b[^>]*\bclass\s*=\s*["'][^"']*\b{}\b[^"']*["'][^>]*>"#,
        regex::escape(class)
    );
    Regex::new(&pattern).expect("valid regex")
}

/// Inner HTML of the `div` whose content starts at `content_start`.
fn div_inner(html: &str, content_start: usize) -> &str {
    let rest = &html[content_start..];
    let mut depth = 1usize;
    for caps in DIV_TAG.captures_iter(rest) {
        if caps.get(1).map_or(false, |m| m.as_str() == "/") {
            depth -= 1;
            if depth == 0 {
                if let Some(close) = caps.get(0) {
                    return &rest[..close.start()];
                }
            }
        } else {
            depth += 1;
        }
    }
    rest
}

/// Inner HTML of every `div` whose opening tag matches `opener`.
fn find_divs<'a>(html: &'a str, opener: &Regex) -> Vec<&'a str> {
    opener
        .find_iter(html)
        .map(|m| div_inner(html, m.end()))
        .collect()
}

fn first_div<'a>(html: &'a str, opener: &Regex) -> Option<&'a str> {
    opener.find(html).map(|m| div_inner(html, m.end()))
}

/// Decode the HTML entities Steam emits in user text.
pub fn decode_entities(text: &str) -> String {
    let decoded = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures| {
        let raw = &caps[1];
        let code = if let Some(hex) = raw.strip_prefix('x') {
            u32::from_str_radix(hex, 16).ok()
        } else {
            raw.parse::<u32>().ok()
        };
        code.and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });

    decoded
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Visible text of an HTML fragment on one line.
pub fn inline_text(fragment: &str) -> String {
    let text = decode_entities(&ANY_TAG.replace_all(fragment, " "));
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of an HTML fragment, keeping `<br>` line breaks.
pub fn block_text(fragment: &str) -> String {
    let with_breaks = BREAK_TAG.replace_all(fragment, "\n");
    let text = decode_entities(&ANY_TAG.replace_all(&with_breaks, ""));
    let lines: Vec<String> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    lines.join("\n").trim().to_string()
}

/// Parse a Workshop item page into metadata.
///
/// Missing fields fall back to defaults: title to the id, author to
/// `"unknown"`. A page without a required-items section has no dependencies.
pub fn parse_item_page(id: &str, html: &str) -> ModMetadata {
    let title = first_div(html, &TITLE_OPEN)
        .map(inline_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| id.to_string());

    // Name comes before the <br> and online-status span
    let author = first_div(html, &AUTHOR_OPEN)
        .map(|inner| inner.split('<').next().unwrap_or_default())
        .map(inline_text)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let description = first_div(html, &DESCRIPTION_OPEN)
        .map(block_text)
        .filter(|d| !d.is_empty());

    let tags = dedup_preserving_order(
        find_divs(html, &TAGS_OPEN)
            .into_iter()
            .flat_map(|block| {
                ANCHOR_TEXT
                    .captures_iter(block)
                    .map(|caps| inline_text(&caps[1]))
                    .collect::<Vec<_>>()
            })
            .filter(|tag| !tag.is_empty()),
    );

    let (updated, file_size) = parse_stats(html);

    ModMetadata {
        id: id.to_string(),
        title,
        author,
        description,
        tags,
        dependencies: parse_dependencies(id, html),
        updated,
        file_size,
        preview_url: parse_preview_image(html),
        degraded: false,
    }
}

/// Source of the item's main preview image, if the page has one.
pub fn parse_preview_image(html: &str) -> Option<String> {
    let images: Vec<&str> = IMG_TAG.find_iter(html).map(|m| m.as_str()).collect();
    PREVIEW_MARKERS.iter().find_map(|marker| {
        images
            .iter()
            .filter(|tag| marker.is_match(tag))
            .find_map(|tag| IMG_SRC.captures(tag))
            .map(|caps| decode_entities(caps[1].trim()))
            .filter(|url| !url.is_empty())
    })
}

/// Required item ids listed on an item page, excluding the item itself.
pub fn parse_dependencies(id: &str, html: &str) -> Vec<String> {
    let from_section: Vec<String> = first_div(html, &REQUIRED_ITEMS_OPEN)
        .map(|block| {
            ITEM_LINK
                .captures_iter(block)
                .map(|caps| caps[1].to_string())
                .collect()
        })
        .unwrap_or_default();

    let ids = if from_section.is_empty() {
        DESCRIPTION_POPUP
            .captures_iter(html)
            .map(|caps| caps[1].to_string())
            .collect()
    } else {
        from_section
    };

    dedup_preserving_order(ids.into_iter().filter(|dep| dep != id))
}

/// Member ids of a collection page, excluding the collection's own id.
pub fn parse_collection(collection_id: &str, html: &str) -> Vec<String> {
    dedup_preserving_order(
        COLLECTION_LINK
            .captures_iter(html)
            .map(|caps| caps[1].to_string())
            .filter(|id| id != collection_id),
    )
}

/// ("Updated", "File Size") values from the stats table, if present.
fn parse_stats(html: &str) -> (Option<String>, Option<String>) {
    let labels: Vec<String> = find_divs(html, &STAT_LABEL_OPEN)
        .into_iter()
        .map(|l| inline_text(l).to_lowercase())
        .collect();
    let values: Vec<String> = find_divs(html, &STAT_VALUE_OPEN)
        .into_iter()
        .map(inline_text)
        .collect();

    let mut updated = None;
    let mut file_size = None;
    for (label, value) in labels.iter().zip(values) {
        if label.starts_with("updated") {
            updated = Some(value);
        } else if label.starts_with("file size") {
            file_size = Some(value);
        }
    }
    (updated, file_size)
}
