//! Worker pool: N threads looping take → fetch → normalize → write.
//!
//! Every failure kind is absorbed at the worker boundary; nothing crosses
//! the pool except the aggregated run summary. Stop is cooperative — a
//! worker finishes its in-flight task before honoring the flag.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use logger::{now_iso, EventLogger, RecordSkippedEvent, TaskFailedEvent};
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::record::WritePolicy;
use crate::source::DataSource;
use crate::task::{Task, TaskQueue};
use crate::transport::{HttpTransport, RetryPolicy};
use crate::writer::{UpsertWriter, WriteError};

/// Store connection descriptor. Each worker opens its own connection.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: String,
}

impl StoreConfig {
    pub fn open(&self) -> Result<Connection> {
        let path = Path::new(&self.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).context("open sqlite db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        // concurrent workers share the file, not the connection
        conn.busy_timeout(Duration::from_secs(5)).ok();
        Ok(conn)
    }
}

/// Aggregate outcome of one run, summed across workers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks_done: u64,
    pub tasks_failed: u64,
    pub records_written: u64,
    pub records_skipped: u64,
    pub workers_aborted: u64,
}

impl RunSummary {
    fn absorb(&mut self, other: &RunSummary) {
        self.tasks_done += other.tasks_done;
        self.tasks_failed += other.tasks_failed;
        self.records_written += other.records_written;
        self.records_skipped += other.records_skipped;
        self.workers_aborted += other.workers_aborted;
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<RunSummary>>,
    cancel: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Launch `worker_count` threads against a shared task queue. Store
    /// connections are opened up front so a broken descriptor fails the
    /// start instead of every worker separately.
    pub fn start(
        worker_count: usize,
        tasks: Arc<TaskQueue>,
        source: Arc<dyn DataSource>,
        store: StoreConfig,
        retry: RetryPolicy,
        events: EventLogger,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(worker_count);

        for i in 0..worker_count {
            let name = format!("worker{}", i + 1);
            let writer =
                UpsertWriter::new(store.open()?, source.table(), source.policy().clone());
            let tasks = tasks.clone();
            let source = source.clone();
            let cancel = cancel.clone();
            let events = events.clone();
            let worker_name = name.clone();

            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || {
                    // the blocking client carries its own background runtime;
                    // build it on the thread it belongs to
                    let transport = match HttpTransport::new(retry) {
                        Ok(t) => t,
                        Err(e) => {
                            error!("{}: transport init failed: {}", worker_name, e);
                            return RunSummary {
                                workers_aborted: 1,
                                ..RunSummary::default()
                            };
                        }
                    };
                    Worker {
                        name: worker_name,
                        tasks,
                        source,
                        transport,
                        writer,
                        cancel,
                        events,
                        stats: RunSummary::default(),
                    }
                    .run()
                })
                .context("spawn worker thread")?;
            handles.push(handle);
        }

        info!("worker pool started: {} workers", worker_count);
        Ok(Self { handles, cancel })
    }

    /// Request cooperative termination. In-flight tasks finish; no write is
    /// aborted midway.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Shared cancel flag, for wiring up an interrupt handler.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Block until every worker has stopped, then return the summed stats.
    pub fn join_all(self) -> RunSummary {
        let mut summary = RunSummary::default();
        for handle in self.handles {
            match handle.join() {
                Ok(stats) => summary.absorb(&stats),
                Err(_) => {
                    error!("worker panicked");
                    summary.workers_aborted += 1;
                }
            }
        }
        info!(
            "run complete: {} tasks done, {} tasks failed, {} records written, {} record-level errors",
            summary.tasks_done,
            summary.tasks_failed,
            summary.records_written,
            summary.records_skipped
        );
        summary
    }
}

/// Task-level outcome inside a worker.
enum TaskError {
    /// Logged and counted; the worker moves on to its next task.
    Skipped(String),
    /// Store connectivity loss and the like; ends this worker's loop only.
    Fatal(String),
}

struct Worker {
    name: String,
    tasks: Arc<TaskQueue>,
    source: Arc<dyn DataSource>,
    transport: HttpTransport,
    writer: UpsertWriter,
    cancel: Arc<AtomicBool>,
    events: EventLogger,
    stats: RunSummary,
}

impl Worker {
    fn run(mut self) -> RunSummary {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!("{}: stop requested, exiting", self.name);
                break;
            }
            let Some(task) = self.tasks.take() else {
                debug!("{}: task source drained", self.name);
                break;
            };

            match self.process(&task) {
                Ok(()) => self.stats.tasks_done += 1,
                Err(TaskError::Skipped(reason)) => {
                    self.stats.tasks_failed += 1;
                    let _ = self.events.log(&TaskFailedEvent {
                        ts: now_iso(),
                        event: "TASK_FAILED",
                        source: self.source.name().to_string(),
                        task_id: task.id.clone(),
                        reason,
                    });
                }
                Err(TaskError::Fatal(reason)) => {
                    error!("{}: {}, abandoning run loop", self.name, reason);
                    self.stats.tasks_failed += 1;
                    self.stats.workers_aborted += 1;
                    let _ = self.events.log(&TaskFailedEvent {
                        ts: now_iso(),
                        event: "TASK_FAILED",
                        source: self.source.name().to_string(),
                        task_id: task.id.clone(),
                        reason,
                    });
                    break;
                }
            }
        }
        self.stats
    }

    fn process(&mut self, task: &Task) -> Result<(), TaskError> {
        let request = self.source.request(task);

        let response = self.transport.fetch(&request).map_err(|e| {
            warn!("{}: task {} abandoned: {}", self.name, task.id, e);
            TaskError::Skipped(e.to_string())
        })?;

        let records = self.source.normalize(task, &response).map_err(|e| {
            warn!("{}: task {} normalize failed: {:#}", self.name, task.id, e);
            TaskError::Skipped(format!("{e:#}"))
        })?;

        debug!(
            "{}: task {} yielded {} records",
            self.name,
            task.id,
            records.len()
        );

        for record in &records {
            match self.writer.write(record) {
                Ok(()) => self.stats.records_written += 1,
                Err(WriteError::Rejected(e)) => {
                    // duplicate keys are routine on insert-only reruns
                    match self.source.policy() {
                        WritePolicy::InsertOnly => {
                            debug!("{}: record skipped: {}", self.name, e)
                        }
                        WritePolicy::Upsert { .. } => {
                            warn!("{}: record rejected: {}", self.name, e)
                        }
                    }
                    self.skip_record(task, e.to_string());
                }
                Err(
                    e @ (WriteError::MissingRefreshField { .. }
                    | WriteError::MissingKeyField { .. }),
                ) => {
                    error!("{}: {}", self.name, e);
                    self.skip_record(task, e.to_string());
                }
                Err(WriteError::Fatal(e)) => {
                    return Err(TaskError::Fatal(format!("store failure: {e}")));
                }
            }
        }
        Ok(())
    }

    fn skip_record(&mut self, task: &Task, reason: String) {
        self.stats.records_skipped += 1;
        let _ = self.events.log(&RecordSkippedEvent {
            ts: now_iso(),
            event: "RECORD_SKIPPED",
            source: self.source.name().to_string(),
            table: self.writer.table().to_string(),
            task_id: task.id.clone(),
            reason,
        });
    }
}
