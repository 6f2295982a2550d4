//! Bounded-concurrency HTTP fetching with retry/backoff, and the headless
//! render capability content extraction falls back to.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::SourceAuthConfig;
use crate::error::FetchError;

#[derive(Debug, Clone, Default)]
pub struct ConditionalHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub conditional: ConditionalHeaders,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            conditional: ConditionalHeaders::default(),
        }
    }
}

pub struct FetchResponse {
    pub status: reqwest::StatusCode,
    pub body: bytes::Bytes,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Shared outbound HTTP concern. Holds the connection pool and a global
/// concurrency cap; per-host limiting is left to the caller via separate
/// `Fetcher` instances or a wrapping semaphore, mirroring how the source
/// codebase built one `reqwest::Client` per fetch call but with pooling
/// added at this layer instead.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl Fetcher {
    pub fn new(global_concurrency: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("newsroom/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::TransientNetwork {
                url: "<client build>".to_string(),
                source: e,
            })?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(global_concurrency.max(1))),
        })
    }

    pub fn build_auth_headers(auth: &SourceAuthConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match auth.auth_type.as_str() {
            "basic" => {
                if let (Some(user), Some(pass)) = (&auth.username, &auth.password) {
                    use base64_lite::encode_basic;
                    if let Ok(val) = HeaderValue::from_str(&format!("Basic {}", encode_basic(user, pass))) {
                        headers.insert(reqwest::header::AUTHORIZATION, val);
                    }
                }
            }
            "bearer" => {
                if let Some(token) = &auth.token
                    && let Ok(val) = HeaderValue::from_str(&format!("Bearer {token}"))
                {
                    headers.insert(reqwest::header::AUTHORIZATION, val);
                }
            }
            "header" => {
                if let (Some(name), Some(value)) = (&auth.header_name, &auth.header_value)
                    && let (Ok(name), Ok(value)) = (name.parse::<reqwest::header::HeaderName>(), HeaderValue::from_str(value))
                {
                    headers.insert(name, value);
                }
            }
            _ => {}
        }
        headers
    }

    /// Fetch a URL with retry on transient failures. Retries use
    /// exponential backoff with jitter; permanent HTTP errors (4xx other
    /// than 429, and non-retryable 5xx after exhaustion) are returned
    /// immediately.
    pub async fn fetch(
        &self,
        url: &str,
        headers: HeaderMap,
        opts: &FetchOptions,
    ) -> Result<FetchResponse, FetchError> {
        let _permit = self.global_limit.acquire().await.map_err(|_| FetchError::Cancelled {
            url: url.to_string(),
        })?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut req_headers = headers.clone();
            req_headers.insert(USER_AGENT, HeaderValue::from_static(concat!("newsroom/", env!("CARGO_PKG_VERSION"))));
            if let Some(etag) = &opts.conditional.etag
                && let Ok(val) = HeaderValue::from_str(etag)
            {
                req_headers.insert(IF_NONE_MATCH, val);
            }
            if let Some(lm) = &opts.conditional.last_modified
                && let Ok(val) = HeaderValue::from_str(lm)
            {
                req_headers.insert(IF_MODIFIED_SINCE, val);
            }

            let result = self
                .client
                .get(url)
                .headers(req_headers)
                .timeout(opts.timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let etag = response
                        .headers()
                        .get("etag")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let last_modified = response
                        .headers()
                        .get("last-modified")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let status = response.status();

                    if status == reqwest::StatusCode::NOT_MODIFIED {
                        return Ok(FetchResponse {
                            status,
                            body: bytes::Bytes::new(),
                            etag,
                            last_modified,
                        });
                    }

                    if status.is_server_error() || status.as_u16() == 429 {
                        if attempt > opts.max_retries {
                            return Err(FetchError::PermanentHttp {
                                url: url.to_string(),
                                status: status.as_u16(),
                            });
                        }
                        backoff_sleep(attempt).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(FetchError::PermanentHttp {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }

                    let body = response.bytes().await.map_err(|e| FetchError::TransientNetwork {
                        url: url.to_string(),
                        source: e,
                    })?;
                    return Ok(FetchResponse { status, body, etag, last_modified });
                }
                Err(e) => {
                    if attempt > opts.max_retries {
                        return Err(FetchError::TransientNetwork {
                            url: url.to_string(),
                            source: e,
                        });
                    }
                    warn!(url, attempt, error = %e, "transient fetch error, retrying");
                    backoff_sleep(attempt).await;
                }
            }
        }
    }
}

async fn backoff_sleep(attempt: u32) {
    let base_ms = 200u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter_ms: u64 = rand::rng().random_range(0..=base_ms / 4 + 1);
    let delay = Duration::from_millis((base_ms + jitter_ms).min(15_000));
    debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
    tokio::time::sleep(delay).await;
}

/// Minimal basic-auth base64 encoder so the fetcher doesn't need a
/// dedicated base64 crate dependency just for one header.
mod base64_lite {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    pub fn encode_basic(user: &str, pass: &str) -> String {
        let input = format!("{user}:{pass}");
        let bytes = input.as_bytes();
        let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
        for chunk in bytes.chunks(3) {
            let b0 = chunk[0];
            let b1 = *chunk.get(1).unwrap_or(&0);
            let b2 = *chunk.get(2).unwrap_or(&0);
            let n = ((b0 as u32) << 16) | ((b1 as u32) << 8) | (b2 as u32);
            out.push(TABLE[((n >> 18) & 0x3f) as usize] as char);
            out.push(TABLE[((n >> 12) & 0x3f) as usize] as char);
            out.push(if chunk.len() > 1 { TABLE[((n >> 6) & 0x3f) as usize] as char } else { '=' });
            out.push(if chunk.len() > 2 { TABLE[(n & 0x3f) as usize] as char } else { '=' });
        }
        out
    }
}

/// Headless-render capability, used only by the content extractor's last
/// resort strategy. No real browser binary is vendored here; the default
/// implementation always reports unavailable so the extractor's strategy
/// chain degrades rather than failing to compile or panicking when no
/// renderer is wired up.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, wait_for_selector: Option<&str>, budget_ms: u64) -> Result<String, FetchError>;
}

pub struct NullRenderer;

#[async_trait::async_trait]
impl Renderer for NullRenderer {
    async fn render(&self, _url: &str, _wait_for_selector: Option<&str>, _budget_ms: u64) -> Result<String, FetchError> {
        Err(FetchError::RenderUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::base64_lite::encode_basic;

    #[test]
    fn basic_auth_matches_known_vector() {
        assert_eq!(encode_basic("Aladdin", "open sesame"), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }
}
