use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ai::AiClient;
use crate::config::Config;
use crate::extract::{ExtractorDeps, QualityGate};
use crate::extract::memory::ExtractionMemory;
use crate::http::{Fetcher, NullRenderer};
use crate::orchestrator::Orchestrator;
use crate::output::RecordingSink;
use crate::persistence::PersistenceQueue;
use crate::{db, scheduler, server};

/// No config field names a daily cap for AI-assisted selector discovery;
/// this keeps it bounded without letting one unstable domain exhaust the
/// AI rate limit on its own.
const SELECTOR_DISCOVERY_DAILY_BUDGET: u32 = 20;

/// Builds the persistence layer and orchestrator from config: creates the
/// pool, applies migrations, syncs sources/categories/schedules, and wires
/// the fetcher/AI client/extractor/output sinks. Shared by the daemon's
/// main loop and the CLI's on-demand `run` subcommand.
pub async fn bootstrap(config: &Config) -> Result<(Arc<PersistenceQueue>, Arc<Orchestrator>)> {
    let pool = db::create_pool(config).await.context("creating database")?;
    let migration_status = db::run_migrations(&pool).await;
    if !migration_status.is_healthy() {
        tracing::warn!(?migration_status, "starting in degraded mode: not all migrations applied");
    }
    info!(db_path = %config.db_path().display(), "database ready");

    let queue = Arc::new(PersistenceQueue::new(pool));

    for source in &config.source {
        if let Err(e) = queue.upsert_source(source).await {
            tracing::warn!(source = %source.name, error = %e, "failed to sync source from config");
        }
    }
    for category in &config.category {
        if let Err(e) = queue.upsert_category(&category.name, &category.display_name, &category.color, &category.description).await {
            tracing::warn!(category = %category.name, error = %e, "failed to sync category from config");
        }
    }
    if let Err(e) = queue.ensure_schedule("news_processing", "hourly", 0, 0).await {
        tracing::warn!(error = %e, "failed to seed news_processing schedule");
    }
    if let Err(e) = queue.ensure_schedule("news_digest", "daily", 6, 0).await {
        tracing::warn!(error = %e, "failed to seed news_digest schedule");
    }
    info!("config synced to database");

    let fetcher = Fetcher::new(config.core.max_workers.max(1) as usize).context("building HTTP fetcher")?;
    let cache_ttl = humantime::parse_duration(&config.core.cache_ttl).unwrap_or(std::time::Duration::from_secs(24 * 3600));
    let ai = AiClient::new(config.ai.clone(), cache_ttl);
    let memory = Arc::new(ExtractionMemory::new(queue.clone(), SELECTOR_DISCOVERY_DAILY_BUDGET));
    let extractor = ExtractorDeps {
        memory,
        renderer: Arc::new(NullRenderer),
        gate: QualityGate {
            min_content_length: config.core.min_content_length as usize,
            max_content_length: config.core.max_content_length as usize,
        },
    };
    let sink = Arc::new(RecordingSink::default());

    let orchestrator = Arc::new(Orchestrator {
        queue: queue.clone(),
        fetcher,
        ai,
        extractor,
        digest_sink: sink.clone(),
        page_sink: sink,
        config: config.clone(),
    });

    Ok((queue, orchestrator))
}

pub async fn run(config: Config) -> Result<()> {
    let (queue, orchestrator) = bootstrap(&config).await?;
    let cancel = CancellationToken::new();

    let scheduler_concurrency = Arc::new(Semaphore::new(config.core.max_workers.max(1) as usize));
    let scheduler_handle = tokio::spawn(scheduler::scheduler_loop(
        queue.clone(),
        orchestrator.clone(),
        config.scheduler.clone(),
        config.core.timezone.clone(),
        scheduler_concurrency,
        cancel.clone(),
    ));

    let app_state = server::AppState { queue: queue.clone(), orchestrator: orchestrator.clone() };
    let router = server::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.core.listen_addr)
        .await
        .with_context(|| format!("binding to {}", config.core.listen_addr))?;

    info!(listen = %config.core.listen_addr, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = scheduler_handle.await;
        let _ = server_handle.await;
    })
    .await;

    queue.pool().close().await;
    info!("shutdown complete");

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
