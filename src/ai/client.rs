//! Direct HTTP client for the AI provider (C7). Generalizes the old
//! subprocess-invocation shape — spawn, `tokio::select!` over
//! timeout-vs-cancellation, capture output, retry on failure — onto a
//! `reqwest` call instead of a child process, since there is no longer a
//! CLI tool to shell out to.

use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ai::cache::AiCache;
use crate::ai::ratelimit::TokenBucket;
use crate::ai::types::{Content, GenerateRequest, GenerationConfig, Part, ProviderErrorBody, ResilientGenerateResponse};
use crate::config::AiConfig;
use crate::error::AiError;

pub struct AiClient {
    http: Client,
    config: AiConfig,
    limiter: TokenBucket,
    cache: AiCache,
}

impl AiClient {
    pub fn new(config: AiConfig, cache_ttl: Duration) -> Self {
        let limiter = TokenBucket::new(config.rps);
        let http = Client::builder()
            .user_agent("newsroom-aggregator/1")
            .build()
            .expect("building reqwest client");
        Self { http, config, limiter, cache: AiCache::new(cache_ttl) }
    }

    /// Checks the transparent response cache before spending a call.
    /// Returns `(response_text, cache_hit)`.
    pub async fn generate_cached(
        &self,
        call_kind: &str,
        model: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, bool), AiError> {
        let key = AiCache::key(call_kind, prompt);
        if let Some(cached) = self.cache.get(&key) {
            return Ok((cached, true));
        }
        let text = self.generate(model, prompt, cancel).await?;
        self.cache.put(key, text.clone());
        Ok((text, false))
    }

    /// Sends a single-turn prompt to `model` and returns the raw text of
    /// the first candidate. Retries transport/5xx failures up to
    /// `AiConfig.max_retries` times with exponential backoff; a
    /// `cancel`-triggered shutdown aborts the wait immediately.
    pub async fn generate(&self, model: &str, prompt: &str, cancel: &CancellationToken) -> Result<String, AiError> {
        let timeout = humantime::parse_duration(&self.config.timeout)
            .unwrap_or(Duration::from_secs(30));

        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;

            let request_fut = self.send_once(model, prompt, timeout);

            tokio::select! {
                result = request_fut => {
                    match result {
                        Ok(text) => return Ok(text),
                        Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                            attempt += 1;
                            let backoff = match &e {
                                AiError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
                                _ => Duration::from_millis(500) * 2u32.pow(attempt),
                            };
                            warn!(attempt, model, ?backoff, error = %e, "retrying AI request");
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = cancel.cancelled() => return Err(AiError::Cancelled),
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
                _ = cancel.cancelled() => return Err(AiError::Cancelled),
            }
        }
    }

    async fn send_once(&self, model: &str, prompt: &str, timeout: Duration) -> Result<String, AiError> {
        let endpoint = format!(
            "{}/models/{model}:generateContent",
            self.config.api_endpoint.trim_end_matches('/')
        );

        let body = GenerateRequest {
            model: model.to_string(),
            contents: vec![Content { role: "user".to_string(), parts: vec![Part { text: prompt.to_string() }] }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.2),
                response_mime_type: Some("application/json".to_string()),
            }),
        };

        let mut req = self.http.post(&endpoint).timeout(timeout).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.query(&[("key", key.as_str())]);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Provider("request timed out".to_string())
            } else {
                AiError::Transport { endpoint: endpoint.clone(), source: e }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(5);
            return Err(AiError::RateLimited { retry_after_secs: retry_after });
        }

        let raw = response.text().await.map_err(|e| AiError::Transport { endpoint: endpoint.clone(), source: e })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderErrorBody>(&raw)
                .map(|b| b.message().to_string())
                .unwrap_or_else(|_| raw.chars().take(500).collect());
            return Err(AiError::Provider(format!("{status}: {message}")));
        }

        let parsed: ResilientGenerateResponse = serde_json::from_str(&raw).map_err(|e| AiError::ResponseParse {
            attempts: 1,
            last_error: e.to_string(),
        })?;

        let text = parsed.first_text().ok_or_else(|| AiError::ResponseParse {
            attempts: 1,
            last_error: "response had no candidate text".to_string(),
        })?;

        debug!(model, chars = text.len(), "AI response received");
        Ok(text.to_string())
    }
}

fn is_retryable(e: &AiError) -> bool {
    matches!(e, AiError::Transport { .. } | AiError::RateLimited { .. } | AiError::Provider(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_cover_transport_and_rate_limit() {
        assert!(is_retryable(&AiError::RateLimited { retry_after_secs: 1 }));
        assert!(is_retryable(&AiError::Provider("500".to_string())));
        assert!(!is_retryable(&AiError::Cancelled));
    }
}
