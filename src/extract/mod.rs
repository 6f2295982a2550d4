//! Multi-strategy content extraction (C3): given a URL and its HTML, return
//! a canonical article body or a typed failure. Strategies run in order
//! with early-exit on the first one to clear the quality gate.

mod strategies;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::AiClient;
use crate::config::AiConfig;
use crate::error::ExtractionError;
use crate::extract::memory::ExtractionMemory;
use crate::html_util;
use crate::http::Renderer;

pub mod memory;

pub use strategies::Strategy;

#[derive(Debug, Clone)]
pub struct ExtractedArticle {
    pub body: String,
    pub strategy: Strategy,
    pub selector: Option<String>,
    pub quality_score: f64,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    pub min_content_length: usize,
    pub max_content_length: usize,
}

impl QualityGate {
    /// Scores a body 0.0-1.0-ish (can exceed 1.0 slightly, callers only
    /// compare against a threshold). Penalizes short bodies, low
    /// letter-ratio, and ad-marker phrases.
    pub fn score(&self, body: &str) -> f64 {
        if body.len() < self.min_content_length {
            return 0.0;
        }
        let total_chars = body.chars().count();
        let letters = body.chars().filter(|c| c.is_alphabetic()).count();
        let letter_ratio = letters as f64 / total_chars.max(1) as f64;
        if letter_ratio < 0.6 {
            return 0.0;
        }
        let sentences = body.matches(['.', '!', '?']).count();
        let min_sentences = if body.len() < 600 { 2 } else { 4 };
        if sentences < min_sentences {
            return 0.0;
        }
        let ad_penalty = AD_MARKERS.iter().filter(|m| body.to_lowercase().contains(**m)).count() as f64 * 0.1;
        (letter_ratio + (sentences as f64 / 20.0).min(0.5) - ad_penalty).max(0.0)
    }

    pub fn passes(&self, body: &str) -> bool {
        self.score(body) > 0.0
    }

    /// Truncate at the end of the last complete sentence that fits within
    /// `max_content_length`.
    pub fn truncate(&self, body: &str) -> String {
        if body.len() <= self.max_content_length {
            return body.to_string();
        }
        let boundary = floor_char_boundary(body, self.max_content_length);
        let window = &body[..boundary];
        if let Some(idx) = window.rfind(['.', '!', '?']) {
            window[..=idx].to_string()
        } else {
            window.to_string()
        }
    }
}

/// Largest byte index `<= target` that lands on a UTF-8 char boundary —
/// `str::floor_char_boundary` without the nightly gate.
fn floor_char_boundary(body: &str, target: usize) -> usize {
    if target >= body.len() {
        return body.len();
    }
    (0..=target).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0)
}

const AD_MARKERS: &[&str] = &[
    "купи сейчас",
    "скидк",
    "промокод",
    "buy now",
    "limited offer",
    "click here to order",
];

pub struct ExtractorDeps {
    pub memory: Arc<ExtractionMemory>,
    pub renderer: Arc<dyn Renderer>,
    pub gate: QualityGate,
}

/// Run the strategy chain for a page whose HTML has already been fetched.
/// `render_html` is invoked lazily only if the headless strategy is reached,
/// and AI selector discovery only if every heuristic strategy has failed and
/// the domain's extraction memory says it's worth the call.
pub async fn extract(
    deps: &ExtractorDeps,
    url: &str,
    html: &str,
    ai: &AiClient,
    ai_config: &AiConfig,
    cancel: &CancellationToken,
) -> Result<ExtractedArticle, ExtractionError> {
    let domain = strategies::domain_of(url);

    // Strategy 1: learned selector
    if let Some(pattern) = deps.memory.best_pattern(&domain).await
        && let Some(body) = strategies::by_selector(html, &pattern.selector_pattern)
    {
        let score = deps.gate.score(&body);
        if score > 0.0 {
            deps.memory
                .record_attempt(&domain, "selector", Some(&pattern.selector_pattern), true, score, 0)
                .await;
            if pattern.is_stable {
                deps.memory.credit_ai_savings(&domain).await;
            }
            return Ok(finish(deps, &body, Strategy::LearnedSelector, Some(pattern.selector_pattern), score, html));
        }
        deps.memory
            .record_attempt(&domain, "selector", Some(&pattern.selector_pattern), false, score, 0)
            .await;
    }

    // Strategy 2: readability heuristic
    if let Some(body) = strategies::readability(html) {
        let score = deps.gate.score(&body);
        if score > 0.0 {
            deps.memory.record_attempt(&domain, "readability", None, true, score, 0).await;
            return Ok(finish(deps, &body, Strategy::Readability, None, score, html));
        }
        deps.memory.record_attempt(&domain, "readability", None, false, score, 0).await;
    }

    // Strategy 3: structured data
    if let Some(body) = strategies::structured_data(html) {
        let score = deps.gate.score(&body);
        if score > 0.0 {
            deps.memory
                .record_attempt(&domain, "structured_data", None, true, score, 0)
                .await;
            return Ok(finish(deps, &body, Strategy::StructuredData, None, score, html));
        }
        deps.memory
            .record_attempt(&domain, "structured_data", None, false, score, 0)
            .await;
    }

    // Strategy 4: prioritized CSS selector list
    for selector in strategies::CANDIDATE_SELECTORS {
        if let Some(body) = strategies::by_selector(html, selector) {
            let score = deps.gate.score(&body);
            if score > 0.0 {
                deps.memory.record_attempt(&domain, "css_list", Some(selector), true, score, 0).await;
                return Ok(finish(deps, &body, Strategy::CssList, Some((*selector).to_string()), score, html));
            }
            deps.memory.record_attempt(&domain, "css_list", Some(selector), false, score, 0).await;
        }
    }

    // Strategy 5: headless browser, only when worth it.
    if deps.memory.should_render(&domain).await {
        match deps.renderer.render(url, None, 15_000).await {
            Ok(rendered_html) => {
                if let Some(body) = strategies::readability(&rendered_html) {
                    let score = deps.gate.score(&body);
                    if score > 0.0 {
                        deps.memory.record_attempt(&domain, "render", None, true, score, 0).await;
                        return Ok(finish(deps, &body, Strategy::HeadlessRender, None, score, &rendered_html));
                    }
                }
                deps.memory.record_attempt(&domain, "render", None, false, 0.0, 0).await;
            }
            Err(e) => {
                debug!(url, error = %e, "headless render unavailable or failed");
            }
        }
    }

    // Strategy 6: AI-assisted selector discovery, only for domains that
    // have earned it (unstable, failing repeatedly, outside cooldown, budget left).
    if deps.memory.should_invoke_ai(&domain).await {
        deps.memory.record_ai_discovery_attempt(&domain).await;
        let excerpt: String = html.chars().take(8_000).collect();
        let input_hash = format!("{:x}", Sha256::digest(excerpt.as_bytes()));

        match crate::ai::discover_selectors(ai, ai_config, &domain, &excerpt, cancel).await {
            Ok((discovery, cache_hit)) => {
                deps.memory.record_ai_usage("extract_selectors", cache_hit, &input_hash, &ai_config.categorization_model).await;
                if let Some(selector) = discovery.selector.filter(|s| !s.trim().is_empty()) {
                    if let Some(body) = strategies::by_selector(html, &selector) {
                        let score = deps.gate.score(&body);
                        if score > 0.0 {
                            deps.memory.record_attempt(&domain, "ai_selector_discovery", Some(&selector), true, score, 0).await;
                            return Ok(finish(deps, &body, Strategy::AiSelectorDiscovery, Some(selector), score, html));
                        }
                        deps.memory.record_attempt(&domain, "ai_selector_discovery", Some(&selector), false, score, 0).await;
                    }
                }
            }
            Err(e) => {
                debug!(url, domain, error = %e, "AI selector discovery failed");
            }
        }
    }

    warn!(url, domain, "all extraction strategies exhausted");
    Err(ExtractionError::QualityFail {
        url: url.to_string(),
        reason: "no strategy produced a body passing the quality gate".to_string(),
    })
}

fn finish(
    deps: &ExtractorDeps,
    body: &str,
    strategy: Strategy,
    selector: Option<String>,
    score: f64,
    html: &str,
) -> ExtractedArticle {
    info!(strategy = ?strategy, score, "extraction succeeded");
    ExtractedArticle {
        body: deps.gate.truncate(body),
        strategy,
        selector,
        quality_score: score,
        published_at: strategies::published_date(html),
    }
}

/// Metadata-only pass, run regardless of which body strategy succeeded.
pub fn extract_published_date(html: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    strategies::published_date(html)
}

pub fn strip_html(html: &str) -> String {
    html_util::strip_html(html)
}
