// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-source cap applied after parsing.
pub const MAX_ITEMS_PER_SOURCE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,     // e.g. "BBC Technology"
    pub endpoint: String, // feed URL
    #[serde(default = "default_category")]
    pub category: String, // e.g. "Technology"
}

fn default_category() -> String {
    "General".to_string()
}

impl SourceDescriptor {
    pub fn new(name: &str, endpoint: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            category: category.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub source: String,
    pub category: String,
    pub title: String,
    pub body: String, // "title. description" for RSS items
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// At most [`MAX_ITEMS_PER_SOURCE`] items; an empty feed is `Ok(vec![])`.
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<RawArticle>>;
    fn name(&self) -> &'static str;
}
