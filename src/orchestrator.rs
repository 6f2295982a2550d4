//! Orchestrator (C12): drives one full cycle — ingest, process, digest,
//! emit, account — tying together every other component. Grounded on the
//! prior `run_generation`'s "gather, retry-with-context, persist, emit,
//! update bookkeeping" shape, but restructured around the five-step cycle
//! this pipeline actually runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ai::AiClient;
use crate::category;
use crate::config::Config;
use crate::extract::{self, ExtractorDeps};
use crate::filter;
use crate::http::Fetcher;
use crate::models::{Article, ProcessingStats};
use crate::output::{DigestMessage, DigestSink, Page, PageBlock, PageSink};
use crate::persistence::PersistenceQueue;
use crate::sources;

/// Minimum number of same-day, same-category articles before a digest is
/// worth writing — a lone article doesn't need a roll-up.
const MIN_ARTICLES_PER_DIGEST: usize = 2;

/// How recently two candidates with the same `hash_content` can have been
/// seen before the later one is treated as a re-publish rather than a
/// fresh story.
const HASH_DEDUP_WINDOW: chrono::Duration = chrono::Duration::hours(48);

pub struct Orchestrator {
    pub queue: Arc<PersistenceQueue>,
    pub fetcher: Fetcher,
    pub ai: AiClient,
    pub extractor: ExtractorDeps,
    pub digest_sink: Arc<dyn DigestSink>,
    pub page_sink: Arc<dyn PageSink>,
    pub config: Config,
}

/// Outcome of one cycle, logged and folded into `processing_stats`.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub sources_processed: i64,
    pub articles_ingested: i64,
    pub articles_deduped: i64,
    pub articles_extracted: i64,
    pub articles_ai_analyzed: i64,
    pub ai_calls_made: i64,
    pub ai_cache_hits: i64,
    pub extraction_failures: i64,
    pub errors_total: i64,
}

impl Orchestrator {
    /// Runs one full cycle. Never returns an error for partial failures —
    /// those are counted in the report instead — only for conditions that
    /// make the whole cycle meaningless (e.g. the category taxonomy is
    /// unreadable).
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> anyhow::Result<CycleReport> {
        self.run(true, cancel).await
    }

    /// Runs ingest and AI analysis only, skipping digest generation and
    /// emission — the `news_processing` task.
    pub async fn run_processing_only(&self, cancel: &CancellationToken) -> anyhow::Result<CycleReport> {
        self.run(false, cancel).await
    }

    async fn run(&self, with_digest: bool, cancel: &CancellationToken) -> anyhow::Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        self.ingest(&mut report, cancel).await;
        self.process(&mut report, cancel).await;
        if with_digest {
            self.digest(&mut report, cancel).await;
        }

        let stats = ProcessingStats {
            stat_date: Utc::now().format("%Y-%m-%d").to_string(),
            sources_processed: report.sources_processed,
            articles_ingested: report.articles_ingested,
            articles_deduped: report.articles_deduped,
            articles_extracted: report.articles_extracted,
            articles_ai_analyzed: report.articles_ai_analyzed,
            ai_calls_made: report.ai_calls_made,
            ai_cache_hits: report.ai_cache_hits,
            extraction_failures: report.extraction_failures,
            errors_total: report.errors_total,
            cycle_duration_ms: started.elapsed().as_millis() as i64,
        };
        if let Err(e) = self.queue.accumulate_processing_stats(&stats.stat_date, &stats).await {
            warn!(error = %e, "failed to record processing stats for this cycle");
        }

        info!(
            sources = report.sources_processed,
            ingested = report.articles_ingested,
            analyzed = report.articles_ai_analyzed,
            duration_ms = started.elapsed().as_millis(),
            "cycle complete"
        );
        Ok(report)
    }

    /// Step 1: fetch every enabled source whose `fetch_interval_seconds`
    /// has elapsed since its last fetch, bounded in parallel, filter, and
    /// persist raw bodies. Per-source failures are logged and counted,
    /// never propagated — one broken feed must not stall the rest.
    async fn ingest(&self, report: &mut CycleReport, cancel: &CancellationToken) {
        let sources = match self.queue.list_enabled_sources().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to list enabled sources, skipping ingest");
                report.errors_total += 1;
                return;
            }
        };

        let now = Utc::now();
        let due: Vec<_> = sources
            .into_iter()
            .filter(|s| {
                let interval = chrono::Duration::seconds(s.fetch_interval_seconds.max(1));
                s.last_fetch.map(|t| now - t >= interval).unwrap_or(true)
            })
            .collect();

        let max_workers = self.config.core.max_workers.max(1) as usize;
        let permits = Arc::new(Semaphore::new(max_workers));
        let mut tasks = tokio::task::JoinSet::new();

        for source in due {
            let permits = permits.clone();
            let fetcher = self.fetcher.clone();
            let queue = self.queue.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.expect("semaphore never closed");
                ingest_one(&fetcher, &queue, &source, &cancel).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((sources_ok, ingested, deduped, errors)) => {
                    report.sources_processed += sources_ok;
                    report.articles_ingested += ingested;
                    report.articles_deduped += deduped;
                    report.errors_total += errors;
                }
                Err(e) => {
                    error!(error = %e, "ingest task panicked");
                    report.errors_total += 1;
                }
            }
        }
    }

    /// Step 2: extract bodies still missing, then run AI analysis and
    /// categorization on everything not yet processed. Bounded by the AI
    /// rate limit (the client's own token bucket), not a separate cap here.
    async fn process(&self, report: &mut CycleReport, cancel: &CancellationToken) {
        self.ensure_bodies(report, cancel).await;
        self.analyze(report, cancel).await;
    }

    async fn ensure_bodies(&self, report: &mut CycleReport, cancel: &CancellationToken) {
        let articles = match self.queue.articles_needing_body(200).await {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "failed to list articles needing a body");
                report.errors_total += 1;
                return;
            }
        };

        for article in articles {
            if cancel.is_cancelled() {
                return;
            }
            match self.extract_body(&article, cancel).await {
                Ok(true) => report.articles_extracted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(article_id = article.id, url = %article.url, error = %e, "body extraction failed");
                    report.extraction_failures += 1;
                }
            }
        }
    }

    async fn extract_body(&self, article: &Article, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let opts = crate::http::FetchOptions::default();
        let response = self.fetcher.fetch(&article.url, reqwest::header::HeaderMap::new(), &opts).await?;
        let html = String::from_utf8_lossy(&response.body).into_owned();

        let domain = url::Url::parse(&article.url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default();
        let started = Instant::now();
        match extract::extract(&self.extractor, &article.url, &html, &self.ai, &self.config.ai, cancel).await {
            Ok(extracted) => {
                self.queue.update_article_body(article.id, &extracted.body).await?;
                self.queue
                    .record_extraction_attempt(&domain, extracted.strategy.as_str(), extracted.selector.as_deref(), true, extracted.quality_score, started.elapsed().as_millis() as u64)
                    .await?;
                self.queue.update_domain_stability(&domain, true).await?;
                Ok(true)
            }
            Err(e) => {
                self.queue.record_extraction_attempt(&domain, "failed", None, false, 0.0, started.elapsed().as_millis() as u64).await?;
                self.queue.update_domain_stability(&domain, false).await?;
                Err(e.into())
            }
        }
    }

    async fn analyze(&self, report: &mut CycleReport, cancel: &CancellationToken) {
        let articles = match self.queue.articles_needing_ai(100).await {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "failed to list articles needing AI analysis");
                report.errors_total += 1;
                return;
            }
        };

        for article in articles {
            if cancel.is_cancelled() {
                return;
            }
            match self.analyze_one(&article, cancel).await {
                Ok(cache_hit) => {
                    report.articles_ai_analyzed += 1;
                    if cache_hit {
                        report.ai_cache_hits += 1;
                    }
                }
                Err(e) => {
                    warn!(article_id = article.id, error = %e, "AI analysis failed, will retry next cycle");
                    report.errors_total += 1;
                }
            }
            report.ai_calls_made += 1;
        }
    }

    async fn analyze_one(&self, article: &Article, cancel: &CancellationToken) -> anyhow::Result<bool> {
        let (analysis, cache_hit) =
            crate::ai::analyze_article(&self.ai, &self.config.ai, &article.title, &article.content, &self.config.category, cancel).await?;

        self.queue
            .update_article_analysis(
                article.id,
                &analysis.optimized_title,
                &analysis.summary,
                analysis.is_advertisement,
                analysis.ad_confidence,
                analysis.ad_type.as_deref(),
                analysis.ad_reasoning.as_deref(),
                &analysis.ad_markers,
            )
            .await?;

        let labels: Vec<(String, f64)> = analysis.categories.iter().map(|c| (c.name.clone(), c.confidence)).collect();
        let resolved = category::resolve_all(&self.queue, &labels, &self.config.core.default_category).await?;
        for r in &resolved {
            self.queue.link_article_category(article.id, r.category_id, r.confidence).await?;
        }
        self.queue.mark_article_categorized(article.id).await?;

        self.queue
            .record_ai_usage("analysis", cache_hit, &article.hash_content, &self.config.ai.summarization_model, 0, 0)
            .await?;

        Ok(cache_hit)
    }

    /// Steps 3-4: group today's categorized articles, write a digest per
    /// category with enough volume, and push the assembled result through
    /// the output sinks. No AI call happens here for the combined message —
    /// only the per-category `DailySummary` text is model-generated; the
    /// digest itself is assembly.
    async fn digest(&self, report: &mut CycleReport, cancel: &CancellationToken) {
        let today = Utc::now().format("%Y-%m-%d").to_string();

        let categories = match self.queue.list_categories().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to list categories, skipping digest");
                report.errors_total += 1;
                return;
            }
        };

        let mut blocks = Vec::new();
        let mut grouped: BTreeMap<String, Vec<Article>> = BTreeMap::new();

        let feed = match self.queue.feed_articles(None, Some(24), false, 500, 0).await {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "failed to load today's articles for digest");
                report.errors_total += 1;
                return;
            }
        };

        for article in feed {
            if !article.category_processed {
                continue;
            }
            let links = self.queue.article_category_links(article.id).await.unwrap_or_default();
            for link in links {
                if let Some(category) = categories.iter().find(|c| c.id == link.category_id) {
                    grouped.entry(category.name.clone()).or_default().push(article.clone());
                }
            }
        }

        for (category_name, articles) in &grouped {
            if articles.len() < MIN_ARTICLES_PER_DIGEST || cancel.is_cancelled() {
                continue;
            }

            let pairs: Vec<(String, String)> = articles
                .iter()
                .map(|a| (a.optimized_title.clone().unwrap_or_else(|| a.title.clone()), a.summary.clone().unwrap_or_default()))
                .collect();

            let (text, cache_hit) = match crate::ai::generate_digest(&self.ai, &self.config.ai, category_name, &pairs, cancel).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(category = %category_name, error = %e, "digest generation failed for category");
                    report.errors_total += 1;
                    continue;
                }
            };
            report.ai_calls_made += 1;
            if cache_hit {
                report.ai_cache_hits += 1;
            }

            if let Err(e) = self.queue.upsert_daily_summary(&today, category_name, &text, articles.len() as i64).await {
                warn!(category = %category_name, error = %e, "failed to persist daily summary");
            }

            blocks.push(PageBlock { heading: Some(category_name.clone()), text: text.clone() });

            if let Err(e) = self.digest_sink.send_digest(&DigestMessage { category: category_name.clone(), text }).await {
                warn!(category = %category_name, error = %e, "failed to send digest, will retry next cycle");
                report.errors_total += 1;
            }
        }

        if !blocks.is_empty() {
            let page = Page { title: format!("Daily digest — {today}"), blocks };
            if let Err(e) = self.page_sink.publish_page(&page).await {
                warn!(error = %e, "failed to publish digest page, will retry next cycle");
                report.errors_total += 1;
            }
        }
    }
}

/// Fetches and persists candidates for a single source. Returns
/// `(sources_processed, articles_ingested, articles_deduped, errors)`.
async fn ingest_one(
    fetcher: &Fetcher,
    queue: &PersistenceQueue,
    source: &crate::models::Source,
    cancel: &CancellationToken,
) -> (i64, i64, i64, i64) {
    if cancel.is_cancelled() {
        return (0, 0, 0, 0);
    }
    let Some(adapter) = sources::adapter_for(&source.source_type) else {
        warn!(source = %source.name, source_type = %source.source_type, "no adapter for source type");
        return (0, 0, 0, 0);
    };

    let outcome = match adapter.fetch(fetcher, source).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(source = %source.name, error = %e, "source fetch failed");
            if let Err(e) = queue.mark_source_fetch_error(source.id, &e.to_string()).await {
                error!(source = %source.name, error = %e, "failed to record source fetch error");
            }
            return (1, 0, 0, 1);
        }
    };

    let mut ingested = 0i64;
    let mut deduped = 0i64;

    for candidate in &outcome.candidates {
        if let Some(rejection) = filter::reject(candidate) {
            warn!(source = %source.name, url = %candidate.url, reason = rejection.as_str(), "candidate rejected by filter");
            deduped += 1;
            continue;
        }

        let hash = filter::hash_content(candidate);
        match queue.hash_content_seen_recently(&hash, HASH_DEDUP_WINDOW).await {
            Ok(true) => {
                deduped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "dedup lookup failed, proceeding to upsert anyway");
            }
        }

        match queue.upsert_article(source.id, candidate, &hash).await {
            Ok(Some(_)) => ingested += 1,
            Ok(None) => deduped += 1,
            Err(e) => error!(url = %candidate.url, error = %e, "failed to persist candidate"),
        }
    }

    if let Err(e) = queue.update_source_cache(source.id, outcome.etag.as_deref(), outcome.last_modified.as_deref()).await {
        warn!(source = %source.name, error = %e, "failed to update source cache headers");
    }
    if let Err(e) = queue.mark_source_fetch_success(source.id).await {
        warn!(source = %source.name, error = %e, "failed to mark source fetch success");
    }

    (1, ingested, deduped, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::memory::ExtractionMemory;
    use crate::extract::QualityGate;
    use crate::http::NullRenderer;
    use crate::output::RecordingSink;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_queue() -> Arc<PersistenceQueue> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::db::run_migrations(&pool).await;
        Arc::new(PersistenceQueue::new(pool))
    }

    #[tokio::test]
    async fn empty_cycle_on_fresh_db_reports_nothing_and_does_not_error() {
        let queue = test_queue().await;
        let config: Config = toml::from_str(
            "[core]\nversion = 1\ndefault_category = \"general\"\n\
             [[category]]\nname = \"general\"\ndisplay_name = \"General\"\n",
        )
        .expect("valid toml");
        let fetcher = Fetcher::new(4).unwrap();
        let ai = AiClient::new(config.ai.clone(), std::time::Duration::from_secs(3600));
        let memory = Arc::new(ExtractionMemory::new(queue.clone(), 0));
        let extractor = ExtractorDeps {
            memory,
            renderer: Arc::new(NullRenderer),
            gate: QualityGate { min_content_length: 200, max_content_length: 20_000 },
        };
        let sink = Arc::new(RecordingSink::default());

        let orchestrator = Orchestrator {
            queue: queue.clone(),
            fetcher,
            ai,
            extractor,
            digest_sink: sink.clone(),
            page_sink: sink.clone(),
            config,
        };

        let cancel = CancellationToken::new();
        let report = orchestrator.run_cycle(&cancel).await.unwrap();
        assert_eq!(report.sources_processed, 0);
        assert_eq!(report.articles_ingested, 0);
        assert!(sink.digests.lock().await.is_empty());
    }
}
