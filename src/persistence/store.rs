//! Raw `sqlx` queries against the schema in `migrations/`. Every function
//! here is a single round-trip; callers needing serialization or retry go
//! through `persistence::queue::PersistenceQueue` instead of calling these
//! directly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::config::SourceConfig;
use crate::models::{
    Article, ArticleCategory, CandidateArticle, Category, CategoryMapping, DailySummary, DomainStability,
    ExtractionPattern, ProcessingStats, ScheduleSetting, Source, TaskQueueEntry,
};

// ---- sources ----

pub async fn upsert_source(pool: &SqlitePool, source: &SourceConfig) -> Result<i64> {
    let enabled = source.enabled.unwrap_or(true);
    let url = source.url.clone().unwrap_or_default();
    let interval_secs = humantime::parse_duration(&source.poll_interval)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(1800);

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM sources WHERE name = ? AND url = ?")
        .bind(&source.name)
        .bind(&url)
        .fetch_optional(pool)
        .await
        .context("checking for existing source")?;

    if let Some((id,)) = existing {
        sqlx::query("UPDATE sources SET source_type = ?, enabled = ?, fetch_interval_seconds = ? WHERE id = ?")
            .bind(&source.source_type)
            .bind(enabled)
            .bind(interval_secs)
            .bind(id)
            .execute(pool)
            .await
            .context("updating source")?;
        Ok(id)
    } else {
        let result = sqlx::query(
            "INSERT INTO sources (name, url, source_type, enabled, fetch_interval_seconds) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&source.name)
        .bind(&url)
        .bind(&source.source_type)
        .bind(enabled)
        .bind(interval_secs)
        .execute(pool)
        .await
        .context("inserting source")?;
        Ok(result.last_insert_rowid())
    }
}

pub async fn list_enabled_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    sqlx::query_as("SELECT * FROM sources WHERE enabled = 1")
        .fetch_all(pool)
        .await
        .context("listing enabled sources")
}

pub async fn mark_source_fetch_success(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE sources SET last_fetch = strftime('%Y-%m-%dT%H:%M:%SZ', 'now'),
         last_success = strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), error_count = 0, last_error = NULL
         WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("marking source fetch success")?;
    Ok(())
}

pub async fn update_source_cache(pool: &SqlitePool, id: i64, etag: Option<&str>, last_modified: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE sources SET last_etag = COALESCE(?, last_etag), last_modified_header = COALESCE(?, last_modified_header) WHERE id = ?")
        .bind(etag)
        .bind(last_modified)
        .bind(id)
        .execute(pool)
        .await
        .context("updating source cache headers")?;
    Ok(())
}

pub async fn mark_source_fetch_error(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE sources SET last_fetch = strftime('%Y-%m-%dT%H:%M:%SZ', 'now'),
         error_count = error_count + 1, last_error = ? WHERE id = ?",
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("marking source fetch error")?;
    Ok(())
}

// ---- articles ----

/// Insert a candidate article, or refresh it in place if a page-monitor or
/// edited-in-place source republishes the same URL with different content.
/// Returns `None` when the URL already exists with an unchanged
/// `hash_content` — a true duplicate, not an error.
pub async fn upsert_article(pool: &SqlitePool, source_id: i64, candidate: &CandidateArticle, hash_content: &str) -> Result<Option<i64>> {
    let media = serde_json::to_string(&candidate.media_files).unwrap_or_else(|_| "[]".to_string());
    let published_at = candidate.published_at.unwrap_or_else(Utc::now);

    let result = sqlx::query(
        "INSERT INTO articles (source_id, url, title, content, hash_content, published_at, media_files)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (url) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            hash_content = excluded.hash_content,
            published_at = excluded.published_at,
            media_files = excluded.media_files,
            summary_processed = 0,
            category_processed = 0,
            ad_processed = 0
         WHERE articles.hash_content != excluded.hash_content",
    )
    .bind(source_id)
    .bind(&candidate.url)
    .bind(&candidate.title)
    .bind(&candidate.content)
    .bind(hash_content)
    .bind(published_at)
    .bind(media)
    .execute(pool)
    .await
    .context("upserting article")?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    let row: (i64,) = sqlx::query_as("SELECT id FROM articles WHERE url = ?")
        .bind(&candidate.url)
        .fetch_one(pool)
        .await
        .context("fetching id of upserted article")?;
    Ok(Some(row.0))
}

pub async fn hash_content_seen_recently(pool: &SqlitePool, hash_content: &str, within: chrono::Duration) -> Result<bool> {
    let cutoff = Utc::now() - within;
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM articles WHERE hash_content = ? AND fetched_at >= ? LIMIT 1",
    )
    .bind(hash_content)
    .bind(cutoff)
    .fetch_optional(pool)
    .await
    .context("checking hash_content recency")?;
    Ok(row.is_some())
}

pub async fn articles_needing_body(pool: &SqlitePool, limit: i64) -> Result<Vec<Article>> {
    sqlx::query_as("SELECT * FROM articles WHERE length(content) < 1 LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("listing articles needing body")
}

pub async fn articles_needing_ai(pool: &SqlitePool, limit: i64) -> Result<Vec<Article>> {
    sqlx::query_as(
        "SELECT * FROM articles WHERE ad_processed = 0 AND length(content) > 0 LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("listing articles needing AI analysis")
}

pub async fn update_article_body(pool: &SqlitePool, id: i64, content: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET content = ? WHERE id = ?")
        .bind(content)
        .bind(id)
        .execute(pool)
        .await
        .context("updating article body")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn update_article_analysis(
    pool: &SqlitePool,
    id: i64,
    optimized_title: &str,
    summary: &str,
    is_advertisement: bool,
    ad_confidence: f64,
    ad_type: Option<&str>,
    ad_reasoning: Option<&str>,
    ad_markers: &[String],
) -> Result<()> {
    let markers = serde_json::to_string(ad_markers).unwrap_or_else(|_| "[]".to_string());
    sqlx::query(
        "UPDATE articles SET optimized_title = ?, summary = ?, summary_processed = 1, ad_processed = 1,
         is_advertisement = ?, ad_confidence = ?, ad_type = ?, ad_reasoning = ?, ad_markers = ?
         WHERE id = ?",
    )
    .bind(optimized_title)
    .bind(summary)
    .bind(is_advertisement)
    .bind(ad_confidence)
    .bind(ad_type)
    .bind(ad_reasoning)
    .bind(markers)
    .bind(id)
    .execute(pool)
    .await
    .context("updating article analysis")?;
    Ok(())
}

pub async fn mark_article_categorized(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE articles SET category_processed = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("marking article categorized")?;
    Ok(())
}

pub async fn feed_articles(
    pool: &SqlitePool,
    category: Option<&str>,
    since_hours: Option<i64>,
    hide_ads: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Article>> {
    let mut sql = String::from("SELECT DISTINCT a.* FROM articles a");
    if category.is_some() {
        sql.push_str(" JOIN article_categories ac ON ac.article_id = a.id JOIN categories c ON c.id = ac.category_id");
    }
    sql.push_str(" WHERE 1 = 1");
    if category.is_some() {
        sql.push_str(" AND c.name = ?");
    }
    if since_hours.is_some() {
        sql.push_str(" AND a.published_at >= ?");
    }
    if hide_ads {
        sql.push_str(" AND a.is_advertisement = 0");
    }
    sql.push_str(" ORDER BY a.published_at DESC LIMIT ? OFFSET ?");

    let mut query = sqlx::query_as::<_, Article>(&sql);
    if let Some(c) = category {
        query = query.bind(c);
    }
    if let Some(hours) = since_hours {
        query = query.bind(Utc::now() - chrono::Duration::hours(hours));
    }
    query = query.bind(limit).bind(offset);

    query.fetch_all(pool).await.context("listing feed articles")
}

pub async fn search_articles(pool: &SqlitePool, q: &str, category: Option<&str>, since_hours: Option<i64>, limit: i64) -> Result<Vec<Article>> {
    let like = format!("%{q}%");
    let mut sql = String::from(
        "SELECT DISTINCT a.* FROM articles a",
    );
    if category.is_some() {
        sql.push_str(" JOIN article_categories ac ON ac.article_id = a.id JOIN categories c ON c.id = ac.category_id");
    }
    sql.push_str(" WHERE (a.title LIKE ? OR a.summary LIKE ? OR a.content LIKE ?)");
    if category.is_some() {
        sql.push_str(" AND c.name = ?");
    }
    if since_hours.is_some() {
        sql.push_str(" AND a.published_at >= ?");
    }
    sql.push_str(" ORDER BY a.published_at DESC LIMIT ?");

    let mut query = sqlx::query_as::<_, Article>(&sql).bind(&like).bind(&like).bind(&like);
    if let Some(c) = category {
        query = query.bind(c);
    }
    if let Some(hours) = since_hours {
        query = query.bind(Utc::now() - chrono::Duration::hours(hours));
    }
    query = query.bind(limit);

    query.fetch_all(pool).await.context("searching articles")
}

// ---- categories ----

pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<Category>> {
    sqlx::query_as("SELECT * FROM categories ORDER BY name").fetch_all(pool).await.context("listing categories")
}

pub async fn upsert_category(pool: &SqlitePool, name: &str, display_name: &str, color: &str, description: &str) -> Result<i64> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("checking for existing category")?;
    if let Some((id,)) = existing {
        return Ok(id);
    }
    let result = sqlx::query("INSERT INTO categories (name, display_name, color, description) VALUES (?, ?, ?, ?)")
        .bind(name)
        .bind(display_name)
        .bind(color)
        .bind(description)
        .execute(pool)
        .await
        .context("inserting category")?;
    Ok(result.last_insert_rowid())
}

pub async fn category_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT c.name, COUNT(ac.article_id) as n FROM categories c
         LEFT JOIN article_categories ac ON ac.category_id = c.id
         GROUP BY c.name ORDER BY c.name",
    )
    .fetch_all(pool)
    .await
    .context("counting categories")?;
    Ok(rows.into_iter().map(|r| (r.get("name"), r.get("n"))).collect())
}

pub async fn link_article_category(pool: &SqlitePool, article_id: i64, category_id: i64, confidence: f64) -> Result<()> {
    sqlx::query(
        "INSERT INTO article_categories (article_id, category_id, confidence) VALUES (?, ?, ?)
         ON CONFLICT (article_id, category_id) DO UPDATE SET confidence = excluded.confidence",
    )
    .bind(article_id)
    .bind(category_id)
    .bind(confidence)
    .execute(pool)
    .await
    .context("linking article category")?;
    Ok(())
}

pub async fn article_category_links(pool: &SqlitePool, article_id: i64) -> Result<Vec<ArticleCategory>> {
    sqlx::query_as("SELECT * FROM article_categories WHERE article_id = ? ORDER BY confidence DESC")
        .bind(article_id)
        .fetch_all(pool)
        .await
        .context("listing article category links")
}

// ---- category mapping ----

pub async fn lookup_category_mapping(pool: &SqlitePool, ai_category: &str) -> Result<Option<CategoryMapping>> {
    sqlx::query_as("SELECT * FROM category_mapping WHERE lower(ai_category) = lower(?) AND is_active = 1")
        .bind(ai_category)
        .fetch_optional(pool)
        .await
        .context("looking up category mapping")
}

/// Records a label the category engine couldn't map, inserted inactive so
/// it never auto-applies — an admin has to flip `is_active` before it's
/// used for resolution. Repeated occurrences just bump `usage_count`.
pub async fn record_unmapped_label(pool: &SqlitePool, ai_category: &str, default_category: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO category_mapping (ai_category, fixed_category, is_active, usage_count, last_used)
         VALUES (?, ?, 0, 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT (ai_category) DO UPDATE SET
            usage_count = usage_count + 1,
            last_used = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
    )
    .bind(ai_category)
    .bind(default_category)
    .execute(pool)
    .await
    .context("recording unmapped category label")?;
    Ok(())
}

pub async fn record_mapping_usage(pool: &SqlitePool, ai_category: &str, fixed_category: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO category_mapping (ai_category, fixed_category, usage_count, last_used)
         VALUES (?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT (ai_category) DO UPDATE SET
            usage_count = usage_count + 1,
            last_used = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
    )
    .bind(ai_category)
    .bind(fixed_category)
    .execute(pool)
    .await
    .context("recording category mapping usage")?;
    Ok(())
}

// ---- extraction memory ----

pub async fn extraction_patterns_for_domain(pool: &SqlitePool, domain: &str) -> Result<Vec<ExtractionPattern>> {
    sqlx::query_as("SELECT * FROM extraction_patterns WHERE domain = ?")
        .bind(domain)
        .fetch_all(pool)
        .await
        .context("listing extraction patterns")
}

pub async fn record_extraction_attempt(
    pool: &SqlitePool,
    domain: &str,
    strategy: &str,
    selector: Option<&str>,
    success: bool,
    quality: f64,
    duration_ms: u64,
) -> Result<()> {
    // The extraction memory layer only tracks attempts per-domain, not per-article;
    // the attempts table's `url` column is filled with the domain for traceability.
    sqlx::query(
        "INSERT INTO extraction_attempts (domain, url, strategy, success, quality_score, duration_ms)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(domain)
    .bind(domain)
    .bind(strategy)
    .bind(success)
    .bind(quality)
    .bind(duration_ms as i64)
    .execute(pool)
    .await
    .context("recording extraction attempt")?;

    if let Some(selector) = selector {
        sqlx::query(
            "INSERT INTO extraction_patterns (domain, selector_pattern, extraction_strategy, success_count, failure_count, quality_score_avg, discovered_by)
             VALUES (?, ?, ?, ?, ?, ?, 'heuristic')
             ON CONFLICT (domain, selector_pattern, extraction_strategy) DO UPDATE SET
                success_count = success_count + excluded.success_count,
                failure_count = failure_count + excluded.failure_count,
                quality_score_avg = (quality_score_avg * (success_count + failure_count) + excluded.quality_score_avg)
                    / (success_count + failure_count + 1)",
        )
        .bind(domain)
        .bind(selector)
        .bind(strategy)
        .bind(if success { 1 } else { 0 })
        .bind(if success { 0 } else { 1 })
        .bind(quality)
        .execute(pool)
        .await
        .context("upserting extraction pattern")?;
    }
    Ok(())
}

pub async fn mark_pattern_stable(pool: &SqlitePool, domain: &str, selector: &str, strategy: &str) -> Result<()> {
    sqlx::query(
        "UPDATE extraction_patterns SET is_stable = 1
         WHERE domain = ? AND selector_pattern = ? AND extraction_strategy = ?",
    )
    .bind(domain)
    .bind(selector)
    .bind(strategy)
    .execute(pool)
    .await
    .context("marking pattern stable")?;
    Ok(())
}

/// A strategy-1 (learned selector) hit against a stable domain is exactly
/// the extraction an AI selector-discovery call would otherwise have paid
/// for — count it as savings.
pub async fn credit_ai_savings(pool: &SqlitePool, domain: &str) -> Result<()> {
    sqlx::query("UPDATE domain_stability SET ai_credits_saved = ai_credits_saved + 1 WHERE domain = ?")
        .bind(domain)
        .execute(pool)
        .await
        .context("crediting ai savings")?;
    Ok(())
}

pub async fn stamp_ai_analysis(pool: &SqlitePool, domain: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO domain_stability (domain, last_ai_analysis)
         VALUES (?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT (domain) DO UPDATE SET last_ai_analysis = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
    )
    .bind(domain)
    .execute(pool)
    .await
    .context("stamping last AI analysis time")?;
    Ok(())
}

pub async fn domain_stability(pool: &SqlitePool, domain: &str) -> Result<Option<DomainStability>> {
    sqlx::query_as("SELECT * FROM domain_stability WHERE domain = ?")
        .bind(domain)
        .fetch_optional(pool)
        .await
        .context("fetching domain stability")
}

/// `is_stable` requires both a consecutive-success streak and a rolling
/// 7-day success rate above this threshold — matching
/// `extract::memory::STABILITY_SUCCESS_RATE`/`STABILITY_STREAK`.
const STABILITY_SUCCESS_RATE: f64 = 0.8;
const STABILITY_STREAK: i64 = 5;

async fn success_rate_since(pool: &SqlitePool, domain: &str, days: i64) -> Result<f64> {
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let row: (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(success), 0), COUNT(*) FROM extraction_attempts WHERE domain = ? AND created_at >= ?",
    )
    .bind(domain)
    .bind(cutoff)
    .fetch_one(pool)
    .await
    .context("computing domain success rate")?;
    let (successes, attempts) = row;
    Ok(if attempts == 0 { 0.0 } else { successes as f64 / attempts as f64 })
}

pub async fn update_domain_stability(pool: &SqlitePool, domain: &str, success: bool) -> Result<()> {
    let rate_7d = success_rate_since(pool, domain, 7).await?;
    let rate_30d = success_rate_since(pool, domain, 30).await?;

    sqlx::query(
        "INSERT INTO domain_stability (domain, consecutive_successes, consecutive_failures, success_rate_7d, success_rate_30d)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (domain) DO UPDATE SET
            consecutive_successes = CASE WHEN ? THEN consecutive_successes + 1 ELSE 0 END,
            consecutive_failures = CASE WHEN ? THEN 0 ELSE consecutive_failures + 1 END,
            success_rate_7d = ?,
            success_rate_30d = ?,
            needs_reanalysis = CASE
                WHEN ? AND consecutive_successes + 1 >= ? AND ? >= ? THEN 0
                WHEN NOT ? AND is_stable = 1 THEN 1
                ELSE needs_reanalysis
            END,
            is_stable = CASE
                WHEN ? AND consecutive_successes + 1 >= ? AND ? >= ? THEN 1
                WHEN NOT ? AND consecutive_failures + 1 >= 2 THEN 0
                ELSE is_stable
            END",
    )
    .bind(domain)
    .bind(if success { 1 } else { 0 })
    .bind(if success { 0 } else { 1 })
    .bind(rate_7d)
    .bind(rate_30d)
    // consecutive_successes / consecutive_failures CASEs
    .bind(success)
    .bind(success)
    // success_rate_7d / success_rate_30d
    .bind(rate_7d)
    .bind(rate_30d)
    // needs_reanalysis: clears on becoming stable, sets on failing while previously stable
    .bind(success)
    .bind(STABILITY_STREAK)
    .bind(rate_7d)
    .bind(STABILITY_SUCCESS_RATE)
    .bind(success)
    // is_stable: sets on streak+rate, clears on failure streak
    .bind(success)
    .bind(STABILITY_STREAK)
    .bind(rate_7d)
    .bind(STABILITY_SUCCESS_RATE)
    .bind(success)
    .execute(pool)
    .await
    .context("updating domain stability")?;
    Ok(())
}

pub async fn ai_selector_discovery_calls_today(pool: &SqlitePool) -> Result<u32> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM ai_usage_tracking WHERE call_kind = 'extract_selectors' AND created_at >= date('now')",
    )
    .fetch_one(pool)
    .await
    .context("counting ai selector discovery calls")?;
    Ok(row.0 as u32)
}

// ---- ai usage tracking ----

#[allow(clippy::too_many_arguments)]
pub async fn record_ai_usage(
    pool: &SqlitePool,
    call_kind: &str,
    cache_hit: bool,
    input_hash: &str,
    model: &str,
    tokens_estimate: i64,
    latency_ms: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ai_usage_tracking (call_kind, cache_hit, input_hash, model, tokens_estimate, latency_ms)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(call_kind)
    .bind(cache_hit)
    .bind(input_hash)
    .bind(model)
    .bind(tokens_estimate)
    .bind(latency_ms)
    .execute(pool)
    .await
    .context("recording ai usage")?;
    Ok(())
}

// ---- schedule settings ----

pub async fn ensure_schedule(pool: &SqlitePool, task_name: &str, schedule_type: &str, hour: i64, minute: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO schedule_settings (task_name, schedule_type, hour, minute) VALUES (?, ?, ?, ?)
         ON CONFLICT (task_name) DO NOTHING",
    )
    .bind(task_name)
    .bind(schedule_type)
    .bind(hour)
    .bind(minute)
    .execute(pool)
    .await
    .context("ensuring schedule setting")?;
    Ok(())
}

pub async fn list_schedules(pool: &SqlitePool) -> Result<Vec<ScheduleSetting>> {
    sqlx::query_as("SELECT * FROM schedule_settings").fetch_all(pool).await.context("listing schedules")
}

pub async fn get_schedule(pool: &SqlitePool, task_name: &str) -> Result<Option<ScheduleSetting>> {
    sqlx::query_as("SELECT * FROM schedule_settings WHERE task_name = ?")
        .bind(task_name)
        .fetch_optional(pool)
        .await
        .context("fetching schedule")
}

pub async fn set_schedule_running(pool: &SqlitePool, task_name: &str, running: bool) -> Result<()> {
    sqlx::query("UPDATE schedule_settings SET is_running = ? WHERE task_name = ?")
        .bind(running)
        .bind(task_name)
        .execute(pool)
        .await
        .context("setting schedule running flag")?;
    Ok(())
}

pub async fn record_schedule_run(pool: &SqlitePool, task_name: &str, next_run: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE schedule_settings SET last_run = strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), next_run = ?, is_running = 0
         WHERE task_name = ?",
    )
    .bind(next_run)
    .bind(task_name)
    .execute(pool)
    .await
    .context("recording schedule run")?;
    Ok(())
}

pub async fn force_clear_stuck(pool: &SqlitePool, task_name: &str) -> Result<()> {
    sqlx::query("UPDATE schedule_settings SET is_running = 0 WHERE task_name = ?")
        .bind(task_name)
        .execute(pool)
        .await
        .context("force-clearing stuck task")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn update_schedule_settings(
    pool: &SqlitePool,
    task_name: &str,
    enabled: bool,
    hour: i64,
    minute: i64,
    weekdays: &str,
    timezone: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE schedule_settings SET enabled = ?, hour = ?, minute = ?, weekdays = ?, timezone = ?
         WHERE task_name = ?",
    )
    .bind(enabled)
    .bind(hour)
    .bind(minute)
    .bind(weekdays)
    .bind(timezone)
    .bind(task_name)
    .execute(pool)
    .await
    .context("updating schedule settings")?;
    Ok(())
}

// ---- daily summaries ----

pub async fn upsert_daily_summary(pool: &SqlitePool, date: &str, category: &str, text: &str, count: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO daily_summaries (summary_date, category, summary_text, articles_count) VALUES (?, ?, ?, ?)
         ON CONFLICT (summary_date, category) DO UPDATE SET
            summary_text = excluded.summary_text, articles_count = excluded.articles_count",
    )
    .bind(date)
    .bind(category)
    .bind(text)
    .bind(count)
    .execute(pool)
    .await
    .context("upserting daily summary")?;
    Ok(())
}

pub async fn daily_summaries_for_date(pool: &SqlitePool, date: &str) -> Result<Vec<DailySummary>> {
    sqlx::query_as("SELECT * FROM daily_summaries WHERE summary_date = ? ORDER BY category")
        .bind(date)
        .fetch_all(pool)
        .await
        .context("listing daily summaries")
}

// ---- processing stats ----

pub async fn accumulate_processing_stats(pool: &SqlitePool, date: &str, delta: &ProcessingStats) -> Result<()> {
    sqlx::query(
        "INSERT INTO processing_stats (stat_date, sources_processed, articles_ingested, articles_deduped,
            articles_extracted, articles_ai_analyzed, ai_calls_made, ai_cache_hits, extraction_failures,
            errors_total, cycle_duration_ms)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (stat_date) DO UPDATE SET
            sources_processed = sources_processed + excluded.sources_processed,
            articles_ingested = articles_ingested + excluded.articles_ingested,
            articles_deduped = articles_deduped + excluded.articles_deduped,
            articles_extracted = articles_extracted + excluded.articles_extracted,
            articles_ai_analyzed = articles_ai_analyzed + excluded.articles_ai_analyzed,
            ai_calls_made = ai_calls_made + excluded.ai_calls_made,
            ai_cache_hits = ai_cache_hits + excluded.ai_cache_hits,
            extraction_failures = extraction_failures + excluded.extraction_failures,
            errors_total = errors_total + excluded.errors_total,
            cycle_duration_ms = cycle_duration_ms + excluded.cycle_duration_ms",
    )
    .bind(date)
    .bind(delta.sources_processed)
    .bind(delta.articles_ingested)
    .bind(delta.articles_deduped)
    .bind(delta.articles_extracted)
    .bind(delta.articles_ai_analyzed)
    .bind(delta.ai_calls_made)
    .bind(delta.ai_cache_hits)
    .bind(delta.extraction_failures)
    .bind(delta.errors_total)
    .bind(delta.cycle_duration_ms)
    .execute(pool)
    .await
    .context("accumulating processing stats")?;
    Ok(())
}

// ---- task queue ----

pub async fn enqueue_task(pool: &SqlitePool, task_name: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO task_queue (task_name, status, started_at) VALUES (?, 'running', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))")
        .bind(task_name)
        .execute(pool)
        .await
        .context("enqueuing task")?;
    Ok(result.last_insert_rowid())
}

pub async fn finish_task(pool: &SqlitePool, id: i64, success: bool, error: Option<&str>) -> Result<()> {
    sqlx::query(
        "UPDATE task_queue SET status = ?, finished_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), error = ? WHERE id = ?",
    )
    .bind(if success { "succeeded" } else { "failed" })
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("finishing task")?;
    Ok(())
}

pub async fn recent_tasks(pool: &SqlitePool, task_name: &str, limit: i64) -> Result<Vec<TaskQueueEntry>> {
    sqlx::query_as("SELECT * FROM task_queue WHERE task_name = ? ORDER BY id DESC LIMIT ?")
        .bind(task_name)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("listing recent tasks")
}

// ---- settings ----

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("fetching setting")?;
    Ok(row.map(|(v,)| v))
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await
        .context("setting value")?;
    Ok(())
}
