//! Work items and the shared queue workers drain.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use rusqlite::types::Value;
use rusqlite::Connection;

/// One unit of fetch work. `id` is the lookup key substituted into the
/// source URL; `params` carries context joined back into the produced
/// records (e.g. the parent row key). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub params: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(id: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            id: id.into(),
            params,
        }
    }

    /// Degenerate daily-scrape task: the current local date is the whole
    /// work description.
    pub fn for_today(format: &str) -> Self {
        Task::new(Local::now().format(format).to_string())
    }
}

/// Bounded, drainable task source shared by all workers. `take` is atomic,
/// so no task is ever handed to two workers.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue holding exactly one task.
    pub fn single(task: Task) -> Self {
        let queue = Self::new();
        queue.push(task);
        queue
    }

    pub fn push(&self, task: Task) {
        self.lock().push_back(task);
    }

    /// Populate from a bulk read. The first selected column becomes the
    /// task id, any further columns become `params`. Call before workers
    /// start draining.
    pub fn load(&self, conn: &Connection, sql: &str) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();

        let tasks = stmt.query_map([], |row| {
            let mut fields = Vec::with_capacity(column_count);
            for i in 0..column_count {
                fields.push(column_text(row.get::<_, Value>(i)?));
            }
            Ok(fields)
        })?;

        let mut loaded = 0;
        let mut queue = self.lock();
        for task in tasks {
            let mut fields = task?;
            if fields.is_empty() {
                continue;
            }
            let id = fields.remove(0);
            queue.push_back(Task::with_params(id, fields));
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Non-blocking take; `None` signals exhaustion.
    pub fn take(&self) -> Option<Task> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        // a poisoning panic can't leave a VecDeque inconsistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn column_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(_) => String::new(),
    }
}
