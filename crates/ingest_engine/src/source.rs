//! The per-source capability the engine depends on.

use crate::record::{Record, WritePolicy};
use crate::task::Task;
use crate::transport::{FetchRequest, FetchResponse};

/// One implementation per upstream data source, injected into the worker
/// pool. The engine never interprets payloads itself; it only moves them
/// from the transport through `normalize` into the writer.
pub trait DataSource: Send + Sync {
    /// Short name used in log lines and events.
    fn name(&self) -> &str;

    /// Build the request for one task (URL template substitution, header
    /// profile selection).
    fn request(&self, task: &Task) -> FetchRequest;

    /// Map a raw payload into zero or more records. A non-success HTTP
    /// status or an unparsable payload is an `Err`, which abandons the task
    /// without writing anything.
    fn normalize(&self, task: &Task, response: &FetchResponse) -> anyhow::Result<Vec<Record>>;

    /// Target table.
    fn table(&self) -> &str;

    /// Collision behaviour for the target table, fixed per source.
    fn policy(&self) -> &WritePolicy;
}
