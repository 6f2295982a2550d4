//! Source Adapters (C6): one module per source type, all producing
//! `CandidateArticle`s the orchestrator hands to the smart filter.

pub mod page_monitor;
pub mod rss;
pub mod telegram_web;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::http::Fetcher;
use crate::models::{CandidateArticle, Source};

/// HTTP cache state carried forward so the next poll can send a
/// conditional GET; `None` means "nothing changed, no new items".
pub struct FetchOutcome {
    pub candidates: Vec<CandidateArticle>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, fetcher: &Fetcher, source: &Source) -> Result<FetchOutcome, SourceError>;
}

pub fn adapter_for(source_type: &str) -> Option<Box<dyn SourceAdapter>> {
    match source_type {
        "rss" | "atom" => Some(Box::new(rss::RssAdapter)),
        "telegram_web" => Some(Box::new(telegram_web::TelegramWebAdapter)),
        "page_monitor" => Some(Box::new(page_monitor::PageMonitorAdapter)),
        _ => None,
    }
}
