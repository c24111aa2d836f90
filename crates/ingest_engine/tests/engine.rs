//! End-to-end runs of the worker pool against a loopback upstream and a
//! temp-file sqlite store.

mod common;

use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use common::spawn_http_stub;
use ingest_engine::{
    DataSource, FetchRequest, FetchResponse, HeaderProfile, Record, RetryPolicy, StoreConfig,
    Task, TaskQueue, WorkerPool, WritePolicy,
};
use logger::EventLogger;
use rusqlite::Connection;

/// Source that derives one record per task from the task itself:
/// `id` from the task id, `odds`/`home_name` from the params.
struct TestSource {
    base: String,
    policy: WritePolicy,
}

impl DataSource for TestSource {
    fn name(&self) -> &str {
        "test"
    }

    fn request(&self, task: &Task) -> FetchRequest {
        FetchRequest::get(format!("{}/fetch/{}", self.base, task.id), HeaderProfile::Json)
    }

    fn normalize(&self, task: &Task, response: &FetchResponse) -> anyhow::Result<Vec<Record>> {
        if !response.status.is_success() {
            bail!("upstream returned {}", response.status);
        }
        let mut record = Record::new();
        record.insert("id".into(), task.id.as_str().into());
        if let Some(odds) = task.params.first() {
            record.insert("odds".into(), odds.parse::<f64>()?.into());
        }
        if let Some(home) = task.params.get(1) {
            record.insert("home_name".into(), home.as_str().into());
        }
        Ok(vec![record])
    }

    fn table(&self) -> &str {
        "matches"
    }

    fn policy(&self) -> &WritePolicy {
        &self.policy
    }
}

fn upsert_on_odds() -> WritePolicy {
    WritePolicy::Upsert {
        key: vec!["id".to_string()],
        refresh: BTreeSet::from(["odds".to_string()]),
    }
}

fn temp_store(name: &str) -> StoreConfig {
    let path = std::env::temp_dir().join(format!("matchfeed_{name}_{}.db", std::process::id()));
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE matches (id TEXT PRIMARY KEY, odds REAL, home_name TEXT);")
        .unwrap();
    StoreConfig {
        path: path.to_string_lossy().into_owned(),
    }
}

fn events() -> EventLogger {
    EventLogger::new(std::env::temp_dir().join("matchfeed_engine_test_logs"))
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        retry_delay: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    }
}

fn row_count(store: &StoreConfig) -> i64 {
    let conn = Connection::open(&store.path).unwrap();
    conn.query_row("SELECT COUNT(*) FROM matches", [], |r| r.get(0))
        .unwrap()
}

#[test]
fn aba_scenario_refreshes_only_declared_fields() {
    let (addr, _) = spawn_http_stub("ok", None);
    let store = temp_store("aba");

    let tasks = Arc::new(TaskQueue::new());
    tasks.push(Task::with_params("A", vec!["1.5".into(), "first".into()]));
    tasks.push(Task::with_params("B", vec!["2.0".into(), "other".into()]));
    tasks.push(Task::with_params("A", vec!["1.8".into(), "second".into()]));

    let source = Arc::new(TestSource {
        base: format!("http://{addr}"),
        policy: upsert_on_odds(),
    });

    let pool =
        WorkerPool::start(1, tasks, source, store.clone(), fast_retry(), events()).unwrap();
    let summary = pool.join_all();

    assert_eq!(summary.tasks_done, 3);
    assert_eq!(summary.records_written, 3);
    assert_eq!(row_count(&store), 2);

    let conn = Connection::open(&store.path).unwrap();
    let (odds, home): (f64, String) = conn
        .query_row("SELECT odds, home_name FROM matches WHERE id = 'A'", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    // odds is refreshable: last processed value wins
    assert_eq!(odds, 1.8);
    // home_name is not: the first insert sticks
    assert_eq!(home, "first");
}

#[test]
fn concurrent_workers_process_each_task_exactly_once() {
    let (addr, _) = spawn_http_stub("ok", None);
    let store = temp_store("exactly_once");

    let tasks = Arc::new(TaskQueue::new());
    for i in 0..40 {
        tasks.push(Task::new(format!("task{i}")));
    }

    let source = Arc::new(TestSource {
        base: format!("http://{addr}"),
        policy: WritePolicy::InsertOnly,
    });

    let pool = WorkerPool::start(4, tasks.clone(), source, store.clone(), fast_retry(), events())
        .unwrap();
    let summary = pool.join_all();

    assert_eq!(summary.tasks_done, 40);
    assert_eq!(summary.tasks_failed, 0);
    assert_eq!(summary.records_written, 40);
    // insert-only + primary key: a task processed twice would have shown up
    // as a rejected duplicate
    assert_eq!(summary.records_skipped, 0);
    assert_eq!(row_count(&store), 40);
    assert!(tasks.is_empty());
}

#[test]
fn failed_task_does_not_stop_siblings() {
    let (addr, _) = spawn_http_stub("ok", Some("BAD"));
    let store = temp_store("failed_task");

    let tasks = Arc::new(TaskQueue::new());
    tasks.push(Task::with_params("GOOD", vec!["1.5".into()]));
    tasks.push(Task::with_params("BAD", vec!["2.0".into()]));
    tasks.push(Task::with_params("ALSO", vec!["3.0".into()]));

    let source = Arc::new(TestSource {
        base: format!("http://{addr}"),
        policy: upsert_on_odds(),
    });

    let pool =
        WorkerPool::start(1, tasks, source, store.clone(), fast_retry(), events()).unwrap();
    let summary = pool.join_all();

    assert_eq!(summary.tasks_done, 2);
    assert_eq!(summary.tasks_failed, 1);
    assert_eq!(row_count(&store), 2);
}

#[test]
fn unreachable_upstream_abandons_task_without_partial_write() {
    // grab a port, then close it so every connection is refused
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let store = temp_store("unreachable");

    let tasks = Arc::new(TaskQueue::new());
    tasks.push(Task::with_params("A", vec!["1.5".into()]));

    let source = Arc::new(TestSource {
        base: format!("http://{addr}"),
        policy: upsert_on_odds(),
    });

    let pool =
        WorkerPool::start(1, tasks, source, store.clone(), fast_retry(), events()).unwrap();
    let summary = pool.join_all();

    assert_eq!(summary.tasks_done, 0);
    assert_eq!(summary.tasks_failed, 1);
    assert_eq!(row_count(&store), 0);
}

#[test]
fn record_level_error_skips_the_record_and_keeps_the_worker() {
    let (addr, _) = spawn_http_stub("ok", None);
    let store = temp_store("record_error");

    let tasks = Arc::new(TaskQueue::new());
    tasks.push(Task::with_params("A", vec!["1.5".into()]));
    // no params: the record misses the declared refresh field `odds`
    tasks.push(Task::new("NO_ODDS"));

    let source = Arc::new(TestSource {
        base: format!("http://{addr}"),
        policy: upsert_on_odds(),
    });

    let pool =
        WorkerPool::start(1, tasks, source, store.clone(), fast_retry(), events()).unwrap();
    let summary = pool.join_all();

    assert_eq!(summary.tasks_done, 2);
    assert_eq!(summary.records_written, 1);
    assert_eq!(summary.records_skipped, 1);
    assert_eq!(row_count(&store), 1);
}

#[test]
fn stop_is_cooperative_and_accounts_for_every_task() {
    let (addr, _) = spawn_http_stub("ok", None);
    let store = temp_store("stop");

    let tasks = Arc::new(TaskQueue::new());
    for i in 0..100 {
        tasks.push(Task::new(format!("task{i}")));
    }

    let source = Arc::new(TestSource {
        base: format!("http://{addr}"),
        policy: WritePolicy::InsertOnly,
    });

    let pool = WorkerPool::start(2, tasks.clone(), source, store.clone(), fast_retry(), events())
        .unwrap();
    pool.stop();
    let summary = pool.join_all();

    // every task either completed fully or is still queued; none was lost
    // or aborted mid-write
    assert_eq!(summary.tasks_failed, 0);
    assert_eq!(
        summary.tasks_done + tasks.len() as u64,
        100,
        "tasks must be fully processed or left in the queue"
    );
    assert_eq!(row_count(&store), summary.tasks_done as i64);
}
