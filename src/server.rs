//! HTTP boundary (C14, ambient per §4.14): thin `axum` handlers over the
//! persistence layer and the orchestrator. No templating, no admin screens,
//! no auth — those belong to the excluded UI/auth layers. Each handler is a
//! near-mechanical translation of a read or a trigger, in the same style
//! the teacher's `server.rs` used for its feed/article endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db;
use crate::orchestrator::Orchestrator;
use crate::persistence::PersistenceQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<PersistenceQueue>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/process/run", post(run_process))
        .route("/feed", get(feed))
        .route("/search", get(search))
        .route("/categories", get(categories))
        .route("/migrations/status", get(migrations_status))
        .route("/migrations/run", post(migrations_run))
        .route("/schedule/settings", get(schedule_settings))
        .route("/schedule/settings/{task}", put(update_schedule_setting))
        .with_state(state)
}

#[derive(Serialize)]
struct TaskHandle {
    task_id: i64,
}

/// Triggers one orchestrator cycle in the background and returns
/// immediately with a task handle; the cycle's outcome lands in
/// `processing_stats` and the `task_queue` row referenced here.
async fn run_process(State(state): State<AppState>) -> Response {
    let task_id = match state.queue.enqueue_task("news_processing").await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "failed to enqueue processing task");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to enqueue task").into_response();
        }
    };

    let queue = state.queue.clone();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let cancel = tokio_util::sync::CancellationToken::new();
        let outcome = orchestrator.run_cycle(&cancel).await;
        let (success, error) = match &outcome {
            Ok(report) => {
                info!(sources = report.sources_processed, ingested = report.articles_ingested, "on-demand cycle finished");
                (true, None)
            }
            Err(e) => (false, Some(e.to_string())),
        };
        if let Err(e) = queue.finish_task(task_id, success, error.as_deref()).await {
            warn!(error = %e, "failed to record task completion");
        }
    });

    (StatusCode::ACCEPTED, Json(TaskHandle { task_id })).into_response()
}

#[derive(Deserialize)]
struct FeedQuery {
    category: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    since_hours: Option<i64>,
    #[serde(default)]
    hide_ads: bool,
}

async fn feed(State(state): State<AppState>, Query(query): Query<FeedQuery>) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    match state
        .queue
        .feed_articles(query.category.as_deref(), query.since_hours, query.hide_ads, limit, offset)
        .await
    {
        Ok(articles) => Json(articles).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to query feed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    category: Option<String>,
    since_hours: Option<i64>,
    /// Accepted for forward compatibility; the underlying query is always
    /// ordered by recency since full-text relevance ranking is out of scope.
    #[allow(dead_code)]
    sort: Option<String>,
}

async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    if query.q.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "q must not be empty").into_response();
    }

    match state.queue.search_articles(&query.q, query.category.as_deref(), query.since_hours, 50).await {
        Ok(articles) => Json(articles).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to search articles");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

#[derive(Serialize)]
struct CategoryWithCount {
    name: String,
    display_name: String,
    color: String,
    article_count: i64,
}

async fn categories(State(state): State<AppState>) -> Response {
    let categories = match state.queue.list_categories().await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to list categories");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };
    let counts = state.queue.category_counts().await.unwrap_or_default();

    let result: Vec<CategoryWithCount> = categories
        .into_iter()
        .map(|c| {
            let article_count = counts.iter().find(|(name, _)| *name == c.name).map(|(_, n)| *n).unwrap_or(0);
            CategoryWithCount { name: c.name, display_name: c.display_name, color: c.color, article_count }
        })
        .collect();

    Json(result).into_response()
}

async fn migrations_status(State(state): State<AppState>) -> Response {
    let status = db::migration_status(state.queue.pool()).await;
    Json(status).into_response()
}

async fn migrations_run(State(state): State<AppState>) -> Response {
    let status = db::run_migrations(state.queue.pool()).await;
    Json(status).into_response()
}

async fn schedule_settings(State(state): State<AppState>) -> Response {
    match state.queue.list_schedules().await {
        Ok(s) => Json(s).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to list schedule settings");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

#[derive(Deserialize)]
struct ScheduleUpdate {
    enabled: bool,
    hour: i64,
    minute: i64,
    #[serde(default)]
    weekdays: Vec<u32>,
    #[serde(default = "default_timezone_field")]
    timezone: String,
}

fn default_timezone_field() -> String {
    "UTC".to_string()
}

async fn update_schedule_setting(State(state): State<AppState>, Path(task): Path<String>, Json(body): Json<ScheduleUpdate>) -> Response {
    if state.queue.get_schedule(&task).await.ok().flatten().is_none() {
        return (StatusCode::NOT_FOUND, format!("no schedule named '{task}'")).into_response();
    }

    let weekdays = serde_json::to_string(&body.weekdays).unwrap_or_else(|_| "[1,2,3,4,5,6,7]".to_string());
    match state.queue.update_schedule_settings(&task, body.enabled, body.hour, body.minute, &weekdays, &body.timezone).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(error = %e, task = %task, "failed to update schedule setting");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}
