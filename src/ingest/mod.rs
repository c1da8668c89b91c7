// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::collections::HashSet;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::ingest::types::{RawArticle, MAX_ITEMS_PER_SOURCE};

pub use providers::rss::RssFeedSource;
pub use types::{FeedSource, SourceDescriptor};

/// Upper bound on stored body length (characters).
pub const MAX_BODY_CHARS: usize = 2_000;

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (descriptions often carry <p>, <img>, <a>)
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_BODY_CHARS {
        out = out.chars().take(MAX_BODY_CHARS).collect();
    }

    out
}

/// Normalize, drop items without title or URL, dedupe by URL, cap the batch.
/// First occurrence of a URL wins; feed order is preserved.
pub fn prepare_articles(raw: Vec<RawArticle>) -> Vec<RawArticle> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = Vec::with_capacity(raw.len().min(MAX_ITEMS_PER_SOURCE));

    for mut a in raw {
        a.url = a.url.trim().to_string();
        a.title = normalize_text(&a.title);
        a.body = normalize_text(&a.body);
        if a.url.is_empty() || a.title.is_empty() {
            continue;
        }
        if !seen.insert(a.url.clone()) {
            continue;
        }
        keep.push(a);
        if keep.len() == MAX_ITEMS_PER_SOURCE {
            break;
        }
    }
    keep
}
