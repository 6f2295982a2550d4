use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Errors from the HTTP fetcher (C1). Distinguishes what's worth retrying
/// from what isn't.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient network error fetching {url}: {source}")]
    TransientNetwork { url: String, source: reqwest::Error },
    #[error("permanent HTTP error {status} fetching {url}")]
    PermanentHttp { url: String, status: u16 },
    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },
    #[error("headless rendering is not available in this build")]
    RenderUnavailable,
    #[error("render of {url} timed out after {budget_ms}ms")]
    RenderTimeout { url: String, budget_ms: u64 },
}

/// Errors from source adapters (C6) parsing feed/page content.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to parse feed from {url}: {message}")]
    FeedParse { url: String, message: String },
    #[error("failed to parse telegram preview page {url}: {message}")]
    TelegramParse { url: String, message: String },
    #[error("failed to parse monitored page {url}: {message}")]
    PageParse { url: String, message: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Errors from the content extractor (C3). Quality failures are not
/// exceptional — they're a normal strategy outcome — so callers match on
/// this rather than treating every variant as a hard error.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no content found at {0}")]
    NotFound(String),
    #[error("blocked with status {status} fetching {url}")]
    Blocked { url: String, status: u16 },
    #[error("extracted body was empty for {0}")]
    Empty(String),
    #[error("extracted body failed the quality gate for {url}: {reason}")]
    QualityFail { url: String, reason: String },
    #[error("extraction of {0} timed out")]
    Timeout(String),
}

/// Errors from the AI client (C7).
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI provider rate-limited the request, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("AI provider returned an error: {0}")]
    Provider(String),
    #[error("AI response did not parse after {attempts} attempts: {last_error}")]
    ResponseParse { attempts: u32, last_error: String },
    #[error("AI request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("AI request cancelled")]
    Cancelled,
}

/// Errors surfaced by the persistence queue (C9).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("deadlock retry exhausted after {attempts} attempts")]
    DeadlockRetryExhausted { attempts: u32 },
    #[error("persistence queue is shutting down")]
    QueueClosed,
}

/// Errors from the category engine (C8).
#[derive(Debug, Error)]
pub enum CategoryError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("default category '{0}' is not present in the taxonomy")]
    DefaultCategoryMissing(String),
}

/// Errors from the migration manager (C10). A failed migration halts the
/// manager but the application still starts in degraded mode.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {version} ({name}) failed: {source}")]
    Failed {
        version: i64,
        name: String,
        source: sqlx::Error,
    },
    #[error("migration bookkeeping table is corrupt: {0}")]
    Corrupt(String),
}
