//! Serializes writes per shard key (source id, domain, task name, ...) so
//! concurrent components updating the same row retry in an orderly queue
//! rather than racing sqlite's single-writer lock. Reads go straight
//! through the pool — its bounded size already caps read concurrency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::SourceConfig;
use crate::error::PersistenceError;
use crate::models::{
    Article, ArticleCategory, CandidateArticle, Category, CategoryMapping, DailySummary, DomainStability,
    ExtractionPattern, ProcessingStats, ScheduleSetting, Source, TaskQueueEntry,
};
use crate::persistence::store;

const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(20);

pub struct PersistenceQueue {
    pool: SqlitePool,
    shards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PersistenceQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            shards: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn shard(&self, key: &str) -> Arc<Mutex<()>> {
        let mut shards = self.shards.lock().await;
        shards.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Runs `op` holding the shard's write lock, retrying on sqlite's
    /// "database is locked" / "database table is locked" errors with
    /// exponential backoff before giving up.
    async fn with_retry<T, F, Fut>(&self, shard_key: &str, mut op: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let shard = self.shard(shard_key).await;
        let _guard = shard.lock().await;

        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_lock_contention(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = BASE_BACKOFF * 2u32.pow(attempt);
                    warn!(shard_key, attempt, ?delay, "retrying after lock contention");
                    tokio::time::sleep(delay).await;
                }
                Err(e) if is_lock_contention(&e) => {
                    return Err(PersistenceError::DeadlockRetryExhausted { attempts: attempt });
                }
                Err(e) => return Err(PersistenceError::Database(e)),
            }
        }
    }

    // ---- sources ----

    pub async fn upsert_source(&self, source: &SourceConfig) -> Result<i64, PersistenceError> {
        let pool = self.pool.clone();
        let source = source.clone();
        self.with_retry(&format!("source:{}", source.name), move || {
            let pool = pool.clone();
            let source = source.clone();
            async move { store::upsert_source(&pool, &source).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn list_enabled_sources(&self) -> Result<Vec<Source>, PersistenceError> {
        store::list_enabled_sources(&self.pool).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn mark_source_fetch_success(&self, id: i64) -> Result<(), PersistenceError> {
        self.with_retry(&format!("source_status:{id}"), || async {
            store::mark_source_fetch_success(&self.pool, id).await.map_err(sqlx_or_other)
        })
        .await
    }

    pub async fn update_source_cache(&self, id: i64, etag: Option<&str>, last_modified: Option<&str>) -> Result<(), PersistenceError> {
        let (etag, last_modified) = (etag.map(str::to_string), last_modified.map(str::to_string));
        self.with_retry(&format!("source_status:{id}"), move || {
            let (etag, last_modified) = (etag.clone(), last_modified.clone());
            async move { store::update_source_cache(&self.pool, id, etag.as_deref(), last_modified.as_deref()).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn mark_source_fetch_error(&self, id: i64, error: &str) -> Result<(), PersistenceError> {
        let error = error.to_string();
        self.with_retry(&format!("source_status:{id}"), || {
            let error = error.clone();
            async move { store::mark_source_fetch_error(&self.pool, id, &error).await.map_err(sqlx_or_other) }
        })
        .await
    }

    // ---- articles ----

    pub async fn upsert_article(
        &self,
        source_id: i64,
        candidate: &CandidateArticle,
        hash_content: &str,
    ) -> Result<Option<i64>, PersistenceError> {
        let candidate = candidate.clone();
        let hash_content = hash_content.to_string();
        self.with_retry("articles:write", move || {
            let candidate = candidate.clone();
            let hash_content = hash_content.clone();
            async move { store::upsert_article(&self.pool, source_id, &candidate, &hash_content).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn hash_content_seen_recently(&self, hash_content: &str, within: chrono::Duration) -> Result<bool, PersistenceError> {
        store::hash_content_seen_recently(&self.pool, hash_content, within).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn articles_needing_body(&self, limit: i64) -> Result<Vec<Article>, PersistenceError> {
        store::articles_needing_body(&self.pool, limit).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn articles_needing_ai(&self, limit: i64) -> Result<Vec<Article>, PersistenceError> {
        store::articles_needing_ai(&self.pool, limit).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn update_article_body(&self, id: i64, content: &str) -> Result<(), PersistenceError> {
        let content = content.to_string();
        self.with_retry(&format!("article:{id}"), move || {
            let content = content.clone();
            async move { store::update_article_body(&self.pool, id, &content).await.map_err(sqlx_or_other) }
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_article_analysis(
        &self,
        id: i64,
        optimized_title: &str,
        summary: &str,
        is_advertisement: bool,
        ad_confidence: f64,
        ad_type: Option<&str>,
        ad_reasoning: Option<&str>,
        ad_markers: &[String],
    ) -> Result<(), PersistenceError> {
        let optimized_title = optimized_title.to_string();
        let summary = summary.to_string();
        let ad_type = ad_type.map(str::to_string);
        let ad_reasoning = ad_reasoning.map(str::to_string);
        let ad_markers = ad_markers.to_vec();
        self.with_retry(&format!("article:{id}"), move || {
            let optimized_title = optimized_title.clone();
            let summary = summary.clone();
            let ad_type = ad_type.clone();
            let ad_reasoning = ad_reasoning.clone();
            let ad_markers = ad_markers.clone();
            async move {
                store::update_article_analysis(
                    &self.pool,
                    id,
                    &optimized_title,
                    &summary,
                    is_advertisement,
                    ad_confidence,
                    ad_type.as_deref(),
                    ad_reasoning.as_deref(),
                    &ad_markers,
                )
                .await
                .map_err(sqlx_or_other)
            }
        })
        .await
    }

    pub async fn mark_article_categorized(&self, id: i64) -> Result<(), PersistenceError> {
        self.with_retry(&format!("article:{id}"), || async {
            store::mark_article_categorized(&self.pool, id).await.map_err(sqlx_or_other)
        })
        .await
    }

    pub async fn feed_articles(
        &self,
        category: Option<&str>,
        since_hours: Option<i64>,
        hide_ads: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>, PersistenceError> {
        store::feed_articles(&self.pool, category, since_hours, hide_ads, limit, offset).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn search_articles(
        &self,
        q: &str,
        category: Option<&str>,
        since_hours: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Article>, PersistenceError> {
        store::search_articles(&self.pool, q, category, since_hours, limit).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    // ---- categories ----

    pub async fn list_categories(&self) -> Result<Vec<Category>, PersistenceError> {
        store::list_categories(&self.pool).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn upsert_category(&self, name: &str, display_name: &str, color: &str, description: &str) -> Result<i64, PersistenceError> {
        let (name, display_name, color, description) =
            (name.to_string(), display_name.to_string(), color.to_string(), description.to_string());
        self.with_retry("categories:write", move || {
            let (name, display_name, color, description) = (name.clone(), display_name.clone(), color.clone(), description.clone());
            async move { store::upsert_category(&self.pool, &name, &display_name, &color, &description).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn category_counts(&self) -> Result<Vec<(String, i64)>, PersistenceError> {
        store::category_counts(&self.pool).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn link_article_category(&self, article_id: i64, category_id: i64, confidence: f64) -> Result<(), PersistenceError> {
        self.with_retry(&format!("article:{article_id}"), || async {
            store::link_article_category(&self.pool, article_id, category_id, confidence).await.map_err(sqlx_or_other)
        })
        .await
    }

    pub async fn article_category_links(&self, article_id: i64) -> Result<Vec<ArticleCategory>, PersistenceError> {
        store::article_category_links(&self.pool, article_id).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    // ---- category mapping ----

    pub async fn lookup_category_mapping(&self, ai_category: &str) -> Result<Option<CategoryMapping>, PersistenceError> {
        store::lookup_category_mapping(&self.pool, ai_category).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn record_unmapped_label(&self, ai_category: &str, default_category: &str) -> Result<(), PersistenceError> {
        let (ai_category, default_category) = (ai_category.to_string(), default_category.to_string());
        self.with_retry("category_mapping:write", move || {
            let (ai_category, default_category) = (ai_category.clone(), default_category.clone());
            async move { store::record_unmapped_label(&self.pool, &ai_category, &default_category).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn record_mapping_usage(&self, ai_category: &str, fixed_category: &str) -> Result<(), PersistenceError> {
        let (ai_category, fixed_category) = (ai_category.to_string(), fixed_category.to_string());
        self.with_retry("category_mapping:write", move || {
            let (ai_category, fixed_category) = (ai_category.clone(), fixed_category.clone());
            async move { store::record_mapping_usage(&self.pool, &ai_category, &fixed_category).await.map_err(sqlx_or_other) }
        })
        .await
    }

    // ---- extraction memory ----

    pub async fn extraction_patterns_for_domain(&self, domain: &str) -> Result<Vec<ExtractionPattern>, PersistenceError> {
        store::extraction_patterns_for_domain(&self.pool, domain).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn record_extraction_attempt(
        &self,
        domain: &str,
        strategy: &str,
        selector: Option<&str>,
        success: bool,
        quality: f64,
        duration_ms: u64,
    ) -> Result<(), PersistenceError> {
        let (domain, strategy, selector) = (domain.to_string(), strategy.to_string(), selector.map(str::to_string));
        self.with_retry(&format!("domain:{domain}"), move || {
            let (domain, strategy, selector) = (domain.clone(), strategy.clone(), selector.clone());
            async move {
                store::record_extraction_attempt(&self.pool, &domain, &strategy, selector.as_deref(), success, quality, duration_ms)
                    .await
                    .map_err(sqlx_or_other)
            }
        })
        .await
    }

    pub async fn update_domain_stability(&self, domain: &str, success: bool) -> Result<(), PersistenceError> {
        let domain = domain.to_string();
        self.with_retry(&format!("domain:{domain}"), move || {
            let domain = domain.clone();
            async move { store::update_domain_stability(&self.pool, &domain, success).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn domain_stability(&self, domain: &str) -> Result<Option<DomainStability>, PersistenceError> {
        store::domain_stability(&self.pool, domain).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn mark_pattern_stable(&self, domain: &str, selector: &str, strategy: &str) -> Result<(), PersistenceError> {
        let (domain, selector, strategy) = (domain.to_string(), selector.to_string(), strategy.to_string());
        self.with_retry(&format!("domain:{domain}"), move || {
            let (domain, selector, strategy) = (domain.clone(), selector.clone(), strategy.clone());
            async move { store::mark_pattern_stable(&self.pool, &domain, &selector, &strategy).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn ai_selector_discovery_calls_today(&self) -> Result<u32, PersistenceError> {
        store::ai_selector_discovery_calls_today(&self.pool).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn credit_ai_savings(&self, domain: &str) -> Result<(), PersistenceError> {
        let domain = domain.to_string();
        self.with_retry(&format!("domain:{domain}"), move || {
            let domain = domain.clone();
            async move { store::credit_ai_savings(&self.pool, &domain).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn stamp_ai_analysis(&self, domain: &str) -> Result<(), PersistenceError> {
        let domain = domain.to_string();
        self.with_retry(&format!("domain:{domain}"), move || {
            let domain = domain.clone();
            async move { store::stamp_ai_analysis(&self.pool, &domain).await.map_err(sqlx_or_other) }
        })
        .await
    }

    // ---- ai usage ----

    pub async fn record_ai_usage(
        &self,
        call_kind: &str,
        cache_hit: bool,
        input_hash: &str,
        model: &str,
        tokens_estimate: i64,
        latency_ms: i64,
    ) -> Result<(), PersistenceError> {
        let (call_kind, input_hash, model) = (call_kind.to_string(), input_hash.to_string(), model.to_string());
        self.with_retry("ai_usage:write", move || {
            let (call_kind, input_hash, model) = (call_kind.clone(), input_hash.clone(), model.clone());
            async move {
                store::record_ai_usage(&self.pool, &call_kind, cache_hit, &input_hash, &model, tokens_estimate, latency_ms)
                    .await
                    .map_err(sqlx_or_other)
            }
        })
        .await
    }

    // ---- schedule settings ----

    pub async fn ensure_schedule(&self, task_name: &str, schedule_type: &str, hour: i64, minute: i64) -> Result<(), PersistenceError> {
        store::ensure_schedule(&self.pool, task_name, schedule_type, hour, minute).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleSetting>, PersistenceError> {
        store::list_schedules(&self.pool).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn get_schedule(&self, task_name: &str) -> Result<Option<ScheduleSetting>, PersistenceError> {
        store::get_schedule(&self.pool, task_name).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    /// Claims the task for running, returns `false` if it is already
    /// marked running (caller should treat this as "stuck or in flight").
    pub async fn try_claim_schedule(&self, task_name: &str) -> Result<bool, PersistenceError> {
        let task_name = task_name.to_string();
        self.with_retry(&format!("schedule:{task_name}"), move || {
            let task_name = task_name.clone();
            async move {
                let existing = store::get_schedule(&self.pool, &task_name).await.map_err(sqlx_or_other)?;
                let already_running = existing.as_ref().map(|s| s.is_running).unwrap_or(false);
                if already_running {
                    return Ok(false);
                }
                store::set_schedule_running(&self.pool, &task_name, true).await.map_err(sqlx_or_other)?;
                Ok(true)
            }
        })
        .await
    }

    pub async fn record_schedule_run(&self, task_name: &str, next_run: DateTime<Utc>) -> Result<(), PersistenceError> {
        let task_name = task_name.to_string();
        self.with_retry(&format!("schedule:{task_name}"), move || {
            let task_name = task_name.clone();
            async move { store::record_schedule_run(&self.pool, &task_name, next_run).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn force_clear_stuck(&self, task_name: &str) -> Result<(), PersistenceError> {
        let task_name = task_name.to_string();
        self.with_retry(&format!("schedule:{task_name}"), move || {
            let task_name = task_name.clone();
            async move { store::force_clear_stuck(&self.pool, &task_name).await.map_err(sqlx_or_other) }
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_schedule_settings(
        &self,
        task_name: &str,
        enabled: bool,
        hour: i64,
        minute: i64,
        weekdays: &str,
        timezone: &str,
    ) -> Result<(), PersistenceError> {
        let (task_name, weekdays, timezone) = (task_name.to_string(), weekdays.to_string(), timezone.to_string());
        self.with_retry(&format!("schedule:{task_name}"), move || {
            let (task_name, weekdays, timezone) = (task_name.clone(), weekdays.clone(), timezone.clone());
            async move {
                store::update_schedule_settings(&self.pool, &task_name, enabled, hour, minute, &weekdays, &timezone)
                    .await
                    .map_err(sqlx_or_other)
            }
        })
        .await
    }

    // ---- daily summaries ----

    pub async fn upsert_daily_summary(&self, date: &str, category: &str, text: &str, count: i64) -> Result<(), PersistenceError> {
        let (date, category, text) = (date.to_string(), category.to_string(), text.to_string());
        self.with_retry(&format!("summary:{date}"), move || {
            let (date, category, text) = (date.clone(), category.clone(), text.clone());
            async move { store::upsert_daily_summary(&self.pool, &date, &category, &text, count).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn daily_summaries_for_date(&self, date: &str) -> Result<Vec<DailySummary>, PersistenceError> {
        store::daily_summaries_for_date(&self.pool, date).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    // ---- processing stats ----

    pub async fn accumulate_processing_stats(&self, date: &str, delta: &ProcessingStats) -> Result<(), PersistenceError> {
        let date = date.to_string();
        let delta = delta.clone();
        self.with_retry(&format!("stats:{date}"), move || {
            let date = date.clone();
            let delta = delta.clone();
            async move { store::accumulate_processing_stats(&self.pool, &date, &delta).await.map_err(sqlx_or_other) }
        })
        .await
    }

    // ---- task queue ----

    pub async fn enqueue_task(&self, task_name: &str) -> Result<i64, PersistenceError> {
        let task_name = task_name.to_string();
        self.with_retry(&format!("task:{task_name}"), move || {
            let task_name = task_name.clone();
            async move { store::enqueue_task(&self.pool, &task_name).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn finish_task(&self, id: i64, success: bool, error: Option<&str>) -> Result<(), PersistenceError> {
        let error = error.map(str::to_string);
        self.with_retry(&format!("task_row:{id}"), move || {
            let error = error.clone();
            async move { store::finish_task(&self.pool, id, success, error.as_deref()).await.map_err(sqlx_or_other) }
        })
        .await
    }

    pub async fn recent_tasks(&self, task_name: &str, limit: i64) -> Result<Vec<TaskQueueEntry>, PersistenceError> {
        store::recent_tasks(&self.pool, task_name, limit).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    // ---- settings ----

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        store::get_setting(&self.pool, key).await.map_err(|e| PersistenceError::Database(sqlx_or_other(e)))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_retry(&format!("setting:{key}"), move || {
            let (key, value) = (key.clone(), value.clone());
            async move { store::set_setting(&self.pool, &key, &value).await.map_err(sqlx_or_other) }
        })
        .await
    }
}

fn is_lock_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}

fn sqlx_or_other(e: anyhow::Error) -> sqlx::Error {
    match e.downcast::<sqlx::Error>() {
        Ok(sqlx_err) => sqlx_err,
        Err(other) => sqlx::Error::Protocol(other.to_string()),
    }
}
