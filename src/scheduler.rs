//! Scheduler (C11): a single cooperative loop that wakes on a fixed tick,
//! checks every enabled `ScheduleSetting` row, and dispatches due tasks to
//! the orchestrator. Reworked from the teacher's per-channel
//! `scheduler_loop` — in-flight tracking and stuck-recovery come from the
//! teacher, but schedules are DB-backed rows rather than config strings and
//! dispatch targets a fixed task set (`news_digest`, `news_processing`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::models::ScheduleSetting;
use crate::orchestrator::Orchestrator;
use crate::persistence::PersistenceQueue;

/// RAII guard that force-clears a task's `is_running` flag on drop so a
/// panicking task can't wedge the schedule forever.
struct RunningGuard {
    queue: Arc<PersistenceQueue>,
    task_name: String,
    cleared: bool,
}

impl RunningGuard {
    async fn finish(mut self, next_run: DateTime<Utc>) {
        self.cleared = true;
        if let Err(e) = self.queue.record_schedule_run(&self.task_name, next_run).await {
            warn!(task = %self.task_name, error = %e, "failed to record schedule run");
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if self.cleared {
            return;
        }
        let queue = self.queue.clone();
        let task_name = self.task_name.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.force_clear_stuck(&task_name).await {
                error!(task = %task_name, error = %e, "failed to clear running flag after task panic");
            }
        });
    }
}

/// Computes the next run time strictly after `after`, honoring weekday
/// restrictions and DST gaps (tries the next few candidate days rather than
/// failing when a local time doesn't exist).
fn next_run_after(setting: &ScheduleSetting, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(setting.hour.clamp(0, 23) as u32, setting.minute.clamp(0, 59) as u32, 0)?;
    let weekdays = setting.weekday_set();
    let after_local = after.with_timezone(&tz);
    let today = after_local.date_naive();

    for day_offset in 0..8i64 {
        let date = today + chrono::Duration::days(day_offset);
        let iso_weekday = date.weekday().number_from_monday();
        if !weekdays.is_empty() && !weekdays.contains(&iso_weekday) {
            continue;
        }
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > after_local {
                return Some(candidate.with_timezone(&Utc));
            }
        }
    }
    None
}

/// Resolves the per-task timeout: an explicit `timeout_seconds` in the
/// schedule row's `task_config` JSON wins, otherwise the scheduler-wide
/// `task_timeout_seconds`, capped by `stuck_hours` either way.
fn task_timeout_seconds(task_config: &str, config: &SchedulerConfig) -> i64 {
    let fallback = if config.task_timeout_seconds > 0 {
        config.task_timeout_seconds as i64
    } else {
        config.stuck_hours as i64 * 3600
    };
    let override_secs = serde_json::from_str::<serde_json::Value>(task_config)
        .ok()
        .and_then(|v| v.get("timeout_seconds").and_then(|t| t.as_i64()))
        .filter(|s| *s > 0);
    override_secs.unwrap_or(fallback).min(config.stuck_hours as i64 * 3600)
}

/// Dispatches a due task to the orchestrator. Returns once the task
/// finishes; the caller runs this inside a spawned task.
async fn dispatch(orchestrator: &Orchestrator, task_name: &str, cancel: &CancellationToken) {
    let outcome = match task_name {
        "news_digest" => orchestrator.run_cycle(cancel).await,
        "news_processing" => orchestrator.run_processing_only(cancel).await,
        other => {
            warn!(task = %other, "no dispatch target for ad hoc task, skipping");
            return;
        }
    };

    match outcome {
        Ok(report) => {
            info!(task = %task_name, sources = report.sources_processed, ingested = report.articles_ingested, "scheduled task complete");
        }
        Err(e) => {
            error!(task = %task_name, error = %e, "scheduled task failed");
        }
    }
}

/// Main scheduler loop. Wakes every `check_interval_seconds` and evaluates
/// all enabled schedules.
pub async fn scheduler_loop(
    queue: Arc<PersistenceQueue>,
    orchestrator: Arc<Orchestrator>,
    config: SchedulerConfig,
    timezone: String,
    concurrency: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    info!("scheduler started");

    let in_flight: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut ticks: u64 = 0;

    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            error!(tz = %timezone, "invalid timezone in config, scheduler cannot start");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(config.check_interval_seconds)) => {}
        }
        ticks += 1;

        let schedules = match queue.list_schedules().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to load schedules");
                continue;
            }
        };

        let now = Utc::now();

        for setting in &schedules {
            if !setting.enabled {
                continue;
            }

            if setting.is_running {
                let stuck_for = setting.last_run.map(|t| now.signed_duration_since(t)).unwrap_or_default();
                let timeout = task_timeout_seconds(&setting.task_config, &config);
                if ticks % 10 == 0 && stuck_for.num_seconds() > timeout {
                    warn!(task = %setting.task_name, "schedule stuck beyond timeout, force-clearing");
                    if let Err(e) = queue.force_clear_stuck(&setting.task_name).await {
                        error!(task = %setting.task_name, error = %e, "failed to force-clear stuck schedule");
                    }
                    // The dispatched task may still genuinely be running (not
                    // just a stale `is_running` flag) — cancel it too.
                    if let Some(token) = in_flight.lock().unwrap().get(&setting.task_name) {
                        token.cancel();
                    }
                }
                continue;
            }

            if in_flight.lock().unwrap().contains_key(&setting.task_name) {
                debug!(task = %setting.task_name, "task already in flight, skipping");
                continue;
            }

            let after = setting.last_run.unwrap_or(now);
            let Some(next_run) = next_run_after(setting, tz, after) else {
                continue;
            };
            if next_run > now {
                continue;
            }

            match queue.try_claim_schedule(&setting.task_name).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(task = %setting.task_name, error = %e, "failed to claim schedule");
                    continue;
                }
            }

            let timeout_secs = task_timeout_seconds(&setting.task_config, &config);
            let child_cancel = cancel.child_token();
            in_flight.lock().unwrap().insert(setting.task_name.clone(), child_cancel.clone());

            let queue = queue.clone();
            let orchestrator = orchestrator.clone();
            let concurrency = concurrency.clone();
            let task_name = setting.task_name.clone();
            let in_flight = in_flight.clone();

            tokio::spawn(async move {
                let _permit = match concurrency.acquire().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                let guard = RunningGuard { queue: queue.clone(), task_name: task_name.clone(), cleared: false };

                if !child_cancel.is_cancelled() {
                    tokio::select! {
                        _ = dispatch(&orchestrator, &task_name, &child_cancel) => {}
                        _ = tokio::time::sleep(Duration::from_secs(timeout_secs.max(1) as u64)) => {
                            warn!(task = %task_name, timeout_secs, "task exceeded its timeout, cancelling");
                            child_cancel.cancel();
                        }
                    }
                }

                let next = next_run_after_fallback(&queue, &task_name, tz).await.unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1));
                guard.finish(next).await;
                in_flight.lock().unwrap().remove(&task_name);
            });
        }
    }
}

/// Re-reads the row to recompute `next_run` from the post-dispatch state
/// (in case the setting was edited mid-run via `/schedule/settings`).
async fn next_run_after_fallback(queue: &PersistenceQueue, task_name: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let setting = queue.get_schedule(task_name).await.ok().flatten()?;
    next_run_after(&setting, tz, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(hour: i64, minute: i64, weekdays: &str) -> ScheduleSetting {
        ScheduleSetting {
            task_name: "news_digest".to_string(),
            enabled: true,
            schedule_type: "daily".to_string(),
            hour,
            minute,
            weekdays: weekdays.to_string(),
            timezone: "UTC".to_string(),
            last_run: None,
            next_run: None,
            is_running: false,
            task_config: "{}".to_string(),
        }
    }

    #[test]
    fn computes_next_tick_later_today() {
        let s = setting(8, 0, "[1,2,3,4,5,6,7]");
        let after: DateTime<Utc> = "2026-08-01T00:00:00Z".parse().unwrap();
        let next = next_run_after(&s, chrono_tz::UTC, after).unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "08:00");
        assert_eq!(next.date_naive(), after.date_naive());
    }

    #[test]
    fn skips_to_next_allowed_weekday() {
        // 2026-08-01 is a Saturday; restrict to Monday only.
        let s = setting(8, 0, "[1]");
        let after: DateTime<Utc> = "2026-08-01T09:00:00Z".parse().unwrap();
        let next = next_run_after(&s, chrono_tz::UTC, after).unwrap();
        assert_eq!(next.weekday().number_from_monday(), 1);
        assert!(next > after);
    }

    #[test]
    fn rolls_past_already_passed_time_today() {
        let s = setting(8, 0, "[1,2,3,4,5,6,7]");
        let after: DateTime<Utc> = "2026-08-01T09:00:00Z".parse().unwrap();
        let next = next_run_after(&s, chrono_tz::UTC, after).unwrap();
        assert!(next > after);
        assert_ne!(next.date_naive(), after.date_naive());
    }
}
