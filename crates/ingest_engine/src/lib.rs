//! matchfeed — shared ingestion engine
//!
//! The common machinery behind all scrapers: a bounded task queue drained
//! by N worker threads, each looping take → fetch → normalize → write.
//! Per-source payload extraction lives behind the [`DataSource`] trait;
//! the engine only moves records from the transport into the store.
//!
//! Delivery is at-least-once: the store's native upsert makes repeated
//! writes for the same key safe, refreshing only the fields the source
//! declares refreshable.

pub mod record;
pub mod source;
pub mod task;
pub mod transport;
pub mod worker;
pub mod writer;

use std::env;
use std::time::Duration;

pub use record::{FieldValue, Record, WritePolicy};
pub use source::DataSource;
pub use task::{Task, TaskQueue};
pub use transport::{
    FailureClass, FetchRequest, FetchResponse, HeaderProfile, HttpTransport, RetryPolicy,
    TransportError,
};
pub use worker::{RunSummary, StoreConfig, WorkerPool};
pub use writer::{UpsertWriter, WriteError};

/// Process-wide engine knobs, all externally supplied.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub retry: RetryPolicy,
    pub store: StoreConfig,
    pub log_dir: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let retry = RetryPolicy {
            max_retries: env_or("MATCHFEED_RETRY_ATTEMPTS", 4),
            retry_delay: Duration::from_secs(env_or("MATCHFEED_RETRY_DELAY_SECS", 3)),
            timeout: Duration::from_secs(env_or("MATCHFEED_TIMEOUT_SECS", 120)),
        };
        Self {
            worker_count: env_or("MATCHFEED_WORKERS", 1),
            retry,
            store: StoreConfig {
                path: env::var("MATCHFEED_DB").unwrap_or_else(|_| "data/matchfeed.db".to_string()),
            },
            log_dir: env::var("MATCHFEED_LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.retry.max_retries, 4);
        assert_eq!(cfg.retry.retry_delay, Duration::from_secs(3));
        assert_eq!(cfg.retry.timeout, Duration::from_secs(120));
        assert_eq!(cfg.worker_count, 1);
    }
}
