use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Row, SqlitePool};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::MigrationError;

/// Ordered list of migrations. Each entry is (version, name, sql, is_needed).
/// Versions must be monotonically increasing. `is_needed` lets the manager
/// heal a database that already has some of a migration's effect applied by
/// some other means (e.g. restored from an older backup).
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
    is_needed: fn(&[String]) -> bool,
}

/// Every table `initial_schema.sql` creates. All of its `CREATE TABLE`
/// statements are `IF NOT EXISTS`, so re-running it is always safe — the
/// probe only needs to ask "is anything still missing", not "has this
/// exact migration run before" (a DB restored with only some tables, e.g.
/// from an older backup, must still get the rest created).
const MIGRATION_1_TABLES: &[&str] = &[
    "sources",
    "categories",
    "articles",
    "article_categories",
    "category_mapping",
    "extraction_patterns",
    "domain_stability",
    "extraction_attempts",
    "ai_usage_tracking",
    "schedule_settings",
    "settings",
    "daily_summaries",
    "processing_stats",
    "task_queue",
];

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: include_str!("../migrations/20260301_000001_initial_schema.sql"),
        is_needed: |tables| MIGRATION_1_TABLES.iter().any(|needed| !tables.iter().any(|t| t == needed)),
    },
    Migration {
        version: 2,
        name: "seed_default_category",
        sql: include_str!("../migrations/20260301_000002_seed_default_category.sql"),
        is_needed: |_tables| true,
    },
];

/// Outcome of startup migration. The application is allowed to start even
/// when this reports a failure — reads still work against whatever schema
/// version is present, and `/migrations/status` surfaces the gap.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    pub applied_versions: Vec<i64>,
    pub pending_versions: Vec<i64>,
    pub last_error: Option<String>,
}

impl MigrationStatus {
    pub fn is_healthy(&self) -> bool {
        self.pending_versions.is_empty() && self.last_error.is_none()
    }
}

pub async fn create_pool(config: &Config) -> Result<SqlitePool> {
    let db_path = config.db_path();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating data directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to database: {}", db_path.display()))?;

    info!(path = %db_path.display(), "database connected (WAL mode, foreign keys enabled)");

    Ok(pool)
}

/// Applies every pending migration. Never returns `Err` — a failed
/// migration is recorded in the returned status and the manager stops
/// applying further migrations, but the pool remains usable for reads.
pub async fn run_migrations(pool: &SqlitePool) -> MigrationStatus {
    if let Err(e) = ensure_bookkeeping_table(pool).await {
        error!(error = %e, "failed to create schema_migrations table");
        return MigrationStatus {
            applied_versions: Vec::new(),
            pending_versions: MIGRATIONS.iter().map(|m| m.version).collect(),
            last_error: Some(e.to_string()),
        };
    }

    let applied = match applied_versions(pool).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to read schema_migrations");
            return MigrationStatus {
                applied_versions: Vec::new(),
                pending_versions: MIGRATIONS.iter().map(|m| m.version).collect(),
                last_error: Some(e.to_string()),
            };
        }
    };

    let existing_tables = existing_table_names(pool).await.unwrap_or_default();

    let mut applied_versions = applied.clone();
    let mut last_error = None;
    let mut newly_applied = 0u32;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        if !(migration.is_needed)(&existing_tables) {
            info!(version = migration.version, name = migration.name, "migration not needed, marking applied");
            if let Err(e) = record_applied(pool, migration, "skipped: not needed").await {
                last_error = Some(e.to_string());
                break;
            }
            applied_versions.push(migration.version);
            continue;
        }

        match apply_migration(pool, migration).await {
            Ok(()) => {
                applied_versions.push(migration.version);
                newly_applied += 1;
                info!(version = migration.version, name = migration.name, "applied migration");
            }
            Err(e) => {
                error!(version = migration.version, name = migration.name, error = %e, "migration failed");
                last_error = Some(e.to_string());
                break;
            }
        }
    }

    let pending_versions: Vec<i64> = MIGRATIONS
        .iter()
        .map(|m| m.version)
        .filter(|v| !applied_versions.contains(v))
        .collect();

    if newly_applied == 0 && last_error.is_none() {
        info!("database schema up to date");
    }
    if !pending_versions.is_empty() {
        warn!(pending = ?pending_versions, "running in degraded mode: not all migrations applied");
    }

    MigrationStatus {
        applied_versions,
        pending_versions,
        last_error,
    }
}

/// Read-only status check — unlike `run_migrations`, never writes to the
/// database. Used by the `/migrations/status` endpoint so a status poll
/// can't itself trigger schema changes.
pub async fn migration_status(pool: &SqlitePool) -> MigrationStatus {
    let applied = match applied_versions(pool).await {
        Ok(v) => v,
        Err(e) => {
            return MigrationStatus {
                applied_versions: Vec::new(),
                pending_versions: MIGRATIONS.iter().map(|m| m.version).collect(),
                last_error: Some(e.to_string()),
            };
        }
    };
    let pending_versions = MIGRATIONS.iter().map(|m| m.version).filter(|v| !applied.contains(v)).collect();
    MigrationStatus {
        applied_versions: applied,
        pending_versions,
        last_error: None,
    }
}

async fn ensure_bookkeeping_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        )",
    )
    .await?;
    Ok(())
}

async fn applied_versions(pool: &SqlitePool) -> Result<Vec<i64>, sqlx::Error> {
    let rows = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<i64, _>("version")).collect())
}

async fn existing_table_names(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
}

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<(), MigrationError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| MigrationError::Failed { version: migration.version, name: migration.name.to_string(), source: e })?;

    tx.execute(migration.sql)
        .await
        .map_err(|e| MigrationError::Failed { version: migration.version, name: migration.name.to_string(), source: e })?;

    let checksum = checksum_of(migration.sql);
    sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(checksum)
        .execute(&mut *tx)
        .await
        .map_err(|e| MigrationError::Failed { version: migration.version, name: migration.name.to_string(), source: e })?;

    tx.commit()
        .await
        .map_err(|e| MigrationError::Failed { version: migration.version, name: migration.name.to_string(), source: e })?;

    Ok(())
}

async fn record_applied(pool: &SqlitePool, migration: &Migration, note: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(format!("{} ({note})", checksum_of(migration.sql)))
        .execute(pool)
        .await?;
    Ok(())
}

fn checksum_of(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn applies_all_migrations_on_fresh_db() {
        let pool = memory_pool().await;
        let status = run_migrations(&pool).await;
        assert!(status.is_healthy());
        assert_eq!(status.applied_versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let pool = memory_pool().await;
        run_migrations(&pool).await;
        let status = run_migrations(&pool).await;
        assert!(status.is_healthy());
        assert_eq!(status.applied_versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn heals_db_with_tables_already_present() {
        let pool = memory_pool().await;
        pool.execute("CREATE TABLE articles (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        pool.execute("CREATE TABLE sources (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        let status = run_migrations(&pool).await;
        assert!(status.is_healthy());

        let tables = existing_table_names(&pool).await.unwrap();
        for needed in MIGRATION_1_TABLES {
            assert!(tables.iter().any(|t| t == needed), "missing table {needed} after healing");
        }
    }
}
