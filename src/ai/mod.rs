//! AI analysis layer (C7): a rate-limited HTTP client plus the prompt
//! templates and tolerant wire types that turn a raw model response into a
//! structured `ArticleAnalysis`.

pub mod cache;
pub mod client;
pub mod prompts;
pub mod ratelimit;
pub mod types;

pub use client::AiClient;
pub use types::{ArticleAnalysis, SelectorDiscovery};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{AiConfig, CategoryConfig};
use crate::error::AiError;

/// Runs the combined summarization/ad-detection/categorization prompt and
/// parses the model's JSON reply. A response missing a required field gets
/// one retry with a stricter prompt before the call is reported as failed —
/// a malformed analysis should not silently become an empty one. Returns
/// the cache-hit flag alongside the analysis for usage accounting.
pub async fn analyze_article(
    client: &AiClient,
    config: &AiConfig,
    title: &str,
    content: &str,
    categories: &[CategoryConfig],
    cancel: &CancellationToken,
) -> Result<(ArticleAnalysis, bool), AiError> {
    let prompt = prompts::analysis_prompt(title, content, categories);
    let (raw, cache_hit) = client.generate_cached("analysis", &config.summarization_model, &prompt, cancel).await?;

    match parse_and_validate(&raw) {
        Ok(analysis) => Ok((analysis, cache_hit)),
        Err(first_error) => {
            warn!(error = %first_error, "AI analysis response missing required fields, retrying with stricter prompt");
            let strict_prompt = prompts::analysis_prompt_strict(title, content, categories);
            let (raw, cache_hit) = client.generate_cached("analysis", &config.summarization_model, &strict_prompt, cancel).await?;
            parse_and_validate(&raw)
                .map(|analysis| (analysis, cache_hit))
                .map_err(|last_error| AiError::ResponseParse { attempts: 2, last_error })
        }
    }
}

pub async fn generate_digest(
    client: &AiClient,
    config: &AiConfig,
    category: &str,
    articles: &[(String, String)],
    cancel: &CancellationToken,
) -> Result<(String, bool), AiError> {
    let prompt = prompts::digest_prompt(category, articles);
    client.generate_cached("digest", &config.digest_model, &prompt, cancel).await
}

/// Asks the model for a CSS selector that isolates the article body on
/// `domain`'s pages, for strategy 6 (AI-assisted selector discovery).
pub async fn discover_selectors(
    client: &AiClient,
    config: &AiConfig,
    domain: &str,
    html_excerpt: &str,
    cancel: &CancellationToken,
) -> Result<(SelectorDiscovery, bool), AiError> {
    let prompt = prompts::selector_discovery_prompt(domain, html_excerpt);
    let (raw, cache_hit) = client.generate_cached("extract_selectors", &config.categorization_model, &prompt, cancel).await?;
    let trimmed = strip_code_fence(&raw);
    let parsed: SelectorDiscovery = serde_json::from_str(trimmed)
        .map_err(|e| AiError::ResponseParse { attempts: 1, last_error: e.to_string() })?;
    Ok((parsed, cache_hit))
}

fn parse_analysis(raw: &str) -> Result<ArticleAnalysis, serde_json::Error> {
    let trimmed = strip_code_fence(raw);
    serde_json::from_str(trimmed)
}

/// Parses the analysis JSON and checks that the fields the pipeline can't
/// function without actually came back populated.
fn parse_and_validate(raw: &str) -> Result<ArticleAnalysis, String> {
    let analysis = parse_analysis(raw).map_err(|e| e.to_string())?;
    if analysis.summary.trim().is_empty() {
        return Err("missing required field: summary".to_string());
    }
    if analysis.categories.is_empty() {
        return Err("missing required field: categories".to_string());
    }
    Ok(analysis)
}

/// Models sometimes wrap JSON in a ```json fence despite instructions not
/// to; strip it rather than fail the parse.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let fenced = "```json\n{\"category\":\"tech\"}\n```";
        assert_eq!(strip_code_fence(fenced), "{\"category\":\"tech\"}");
    }

    #[test]
    fn parses_clean_json_without_fence() {
        let analysis = parse_analysis(r#"{"summary":"s","categories":[{"name":"tech","confidence":0.9}]}"#).unwrap();
        assert_eq!(analysis.categories[0].name, "tech");
    }

    #[test]
    fn validate_rejects_missing_summary() {
        let err = parse_and_validate(r#"{"categories":[{"name":"tech","confidence":0.9}]}"#).unwrap_err();
        assert!(err.contains("summary"));
    }

    #[test]
    fn validate_rejects_empty_categories() {
        let err = parse_and_validate(r#"{"summary":"s","categories":[]}"#).unwrap_err();
        assert!(err.contains("categories"));
    }
}
