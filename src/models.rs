use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub source_type: String,
    pub enabled: bool,
    pub config: String,
    pub fetch_interval_seconds: i64,
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: i64,
    pub last_etag: Option<String>,
    pub last_modified_header: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    ProductPromotion,
    ServicePromotion,
    Sponsorship,
    Affiliate,
    Other,
}

/// A candidate produced by a source adapter before it has survived the
/// smart filter (C5) or gone through extraction/AI analysis.
#[derive(Debug, Clone)]
pub struct CandidateArticle {
    pub dedup_key: String,
    pub url: String,
    pub title: String,
    /// Body as the source adapter found it; may be empty (extraction needed)
    /// or short (RSS summary only).
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub media_files: Vec<MediaFile>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Article {
    pub id: i64,
    pub source_id: Option<i64>,
    pub url: String,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub optimized_title: Option<String>,
    pub hash_content: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub media_files: String,
    pub summary_processed: bool,
    pub category_processed: bool,
    pub ad_processed: bool,
    pub is_advertisement: bool,
    pub ad_confidence: f64,
    pub ad_type: Option<String>,
    pub ad_reasoning: Option<String>,
    pub ad_markers: String,
}

impl Article {
    pub fn media(&self) -> Vec<MediaFile> {
        serde_json::from_str(&self.media_files).unwrap_or_default()
    }

    pub fn ad_markers(&self) -> Vec<String> {
        serde_json::from_str(&self.ad_markers).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub color: String,
    pub description: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ArticleCategory {
    pub article_id: i64,
    pub category_id: i64,
    pub confidence: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryMapping {
    pub id: i64,
    pub ai_category: String,
    pub fixed_category: String,
    pub confidence_threshold: f64,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ExtractionPattern {
    pub id: i64,
    pub domain: String,
    pub selector_pattern: String,
    pub extraction_strategy: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub quality_score_avg: f64,
    pub discovered_by: String,
    pub is_stable: bool,
}

impl ExtractionPattern {
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DomainStability {
    pub domain: String,
    pub is_stable: bool,
    pub success_rate_7d: f64,
    pub success_rate_30d: f64,
    pub consecutive_successes: i64,
    pub consecutive_failures: i64,
    pub last_ai_analysis: Option<DateTime<Utc>>,
    pub needs_reanalysis: bool,
    pub ai_credits_saved: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleType {
    Daily,
    Hourly,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Hourly => "hourly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ScheduleType::Daily),
            "hourly" => Some(ScheduleType::Hourly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScheduleSetting {
    pub task_name: String,
    pub enabled: bool,
    pub schedule_type: String,
    pub hour: i64,
    pub minute: i64,
    pub weekdays: String,
    pub timezone: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub task_config: String,
}

impl ScheduleSetting {
    pub fn weekday_set(&self) -> Vec<u32> {
        serde_json::from_str(&self.weekdays).unwrap_or_else(|_| vec![1, 2, 3, 4, 5, 6, 7])
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DailySummary {
    pub id: i64,
    pub summary_date: String,
    pub category: String,
    pub summary_text: String,
    pub articles_count: i64,
}

#[derive(Debug, Clone, Default, FromRow)]
pub struct ProcessingStats {
    pub stat_date: String,
    pub sources_processed: i64,
    pub articles_ingested: i64,
    pub articles_deduped: i64,
    pub articles_extracted: i64,
    pub articles_ai_analyzed: i64,
    pub ai_calls_made: i64,
    pub ai_cache_hits: i64,
    pub extraction_failures: i64,
    pub errors_total: i64,
    pub cycle_duration_ms: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskQueueEntry {
    pub id: i64,
    pub task_name: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}
