//! match-ingest — shared ingestion runner
//!
//! Wires one configured data source into the engine:
//!   1. Loads the task list from the store (TASK_QUERY), or synthesizes a
//!      single today-task for daily scrapes
//!   2. Starts N workers, each looping take → fetch → normalize → write
//!   3. Translates ctrl-c into a cooperative stop so in-flight writes finish
//!
//! Exit status: 0 on a clean drain, 1 if the run was interrupted.
//!
//! Run:
//!   SOURCE_URL='https://example.com/scores?date={}' \
//!   SOURCE_TABLE=football_match_schedule \
//!   SOURCE_KEY=id SOURCE_REFRESH=win_odds,draw_odds,lose_odds \
//!   cargo run --bin match-ingest

use std::env;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use ingest_engine::{DataSource, EngineConfig, Task, TaskQueue, WorkerPool};
use logger::{now_iso, EventLogger, RunSummaryEvent};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod json_source;
use json_source::JsonArraySource;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("=== matchfeed ingest runner ===");

    // Single instance lock
    let lock_file_path = env::temp_dir().join("matchfeed_ingest.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Another ingest run is already in progress! Exiting.");
            return Ok(());
        }
    };

    let config = EngineConfig::from_env();
    let source = Arc::new(JsonArraySource::from_env().context("source configuration")?);
    info!(
        "source `{}` → table `{}`, {} workers",
        source.name(),
        source.table(),
        config.worker_count
    );

    // Task list from the store, or the implicit daily task
    let tasks = Arc::new(TaskQueue::new());
    match env::var("TASK_QUERY") {
        Ok(sql) => {
            let conn = config.store.open()?;
            let n = tasks.load(&conn, &sql).context("load task list")?;
            info!("task list loaded: {} tasks", n);
        }
        Err(_) => {
            let date_format =
                env::var("TASK_DATE_FORMAT").unwrap_or_else(|_| "%Y-%m-%d".to_string());
            let task = Task::for_today(&date_format);
            info!("daily mode, task: {}", task.id);
            tasks.push(task);
        }
    }

    let events = EventLogger::new(&config.log_dir);
    let pool = WorkerPool::start(
        config.worker_count,
        tasks,
        source.clone(),
        config.store.clone(),
        config.retry,
        events.clone(),
    )?;

    // ctrl-c → cooperative stop broadcast; workers finish their in-flight task
    let cancel = pool.cancel_flag();
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, letting in-flight tasks finish");
                interrupted.store(true, Ordering::Relaxed);
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let summary = tokio::task::spawn_blocking(move || pool.join_all())
        .await
        .context("join worker pool")?;

    let was_interrupted = interrupted.load(Ordering::Relaxed);
    let _ = events.log(&RunSummaryEvent {
        ts: now_iso(),
        event: "RUN_SUMMARY",
        source: source.name().to_string(),
        workers: config.worker_count,
        tasks_done: summary.tasks_done,
        tasks_failed: summary.tasks_failed,
        records_written: summary.records_written,
        records_skipped: summary.records_skipped,
        interrupted: was_interrupted,
    });

    if was_interrupted {
        std::process::exit(1);
    }
    Ok(())
}
