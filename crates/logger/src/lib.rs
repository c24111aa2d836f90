//! matchfeed — run event logger
//! JSONL event stream, one file per day

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Clone)]
pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event types ───────────────────────────────────────────────────────────────

/// A task abandoned after retry exhaustion, a normalize error or a store
/// failure.
#[derive(Serialize, Debug)]
pub struct TaskFailedEvent {
    pub ts:      String,
    pub event:   &'static str,   // "TASK_FAILED"
    pub source:  String,
    pub task_id: String,
    pub reason:  String,
}

/// A single record the store rejected (duplicate key on an insert-only
/// table, bad value type) or that failed statement construction.
#[derive(Serialize, Debug)]
pub struct RecordSkippedEvent {
    pub ts:      String,
    pub event:   &'static str,   // "RECORD_SKIPPED"
    pub source:  String,
    pub table:   String,
    pub task_id: String,
    pub reason:  String,
}

/// Per-run aggregate emitted once at shutdown.
#[derive(Serialize, Debug)]
pub struct RunSummaryEvent {
    pub ts:              String,
    pub event:           &'static str,   // "RUN_SUMMARY"
    pub source:          String,
    pub workers:         usize,
    pub tasks_done:      u64,
    pub tasks_failed:    u64,
    pub records_written: u64,
    pub records_skipped: u64,
    pub interrupted:     bool,
}
