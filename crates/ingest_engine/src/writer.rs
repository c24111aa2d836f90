//! Idempotent insert-or-update writes against a keyed table.
//!
//! Statement text is built once per record shape and reused; a record whose
//! field-name set differs from anything seen before gets its own cached
//! statement instead of silently reusing a stale one.

use std::collections::HashMap;

use rusqlite::{params_from_iter, Connection, ErrorCode};
use thiserror::Error;
use tracing::debug;

use crate::record::{Record, WritePolicy};

#[derive(Debug, Error)]
pub enum WriteError {
    /// The declared refresh set names a field the record does not carry.
    /// Source/engine mismatch, caught before any SQL runs.
    #[error("refresh field `{field}` missing from record for table `{table}`")]
    MissingRefreshField { table: String, field: String },
    /// The writer never synthesizes keys; a record must arrive with its key
    /// fields fully populated.
    #[error("key field `{field}` missing from record for table `{table}`")]
    MissingKeyField { table: String, field: String },
    /// The store rejected this one record (duplicate key on an insert-only
    /// table, value incompatible with the column type). Skip and continue.
    #[error("record rejected by store: {0}")]
    Rejected(rusqlite::Error),
    /// Connection loss, bad table name and the like. Ends the worker's run
    /// loop; the next scheduled invocation reconnects.
    #[error("store failure: {0}")]
    Fatal(rusqlite::Error),
}

pub struct UpsertWriter {
    conn: Connection,
    table: String,
    policy: WritePolicy,
    /// sorted field names → statement text
    statements: HashMap<Vec<String>, String>,
}

impl UpsertWriter {
    pub fn new(conn: Connection, table: impl Into<String>, policy: WritePolicy) -> Self {
        Self {
            conn,
            table: table.into(),
            policy,
            statements: HashMap::new(),
        }
    }

    /// Persist one record: first write for a key creates the row, a later
    /// collision refreshes exactly the policy's refresh fields. Atomicity
    /// comes from sqlite's native upsert, no read-modify-write here.
    pub fn write(&mut self, record: &Record) -> Result<(), WriteError> {
        let shape: Vec<String> = record.keys().cloned().collect();
        let sql = match self.statements.get(&shape) {
            Some(sql) => sql.clone(),
            None => {
                let sql = self.build_statement(record)?;
                debug!("statement for {}: {}", self.table, sql);
                self.statements.insert(shape, sql.clone());
                sql
            }
        };

        let mut stmt = self.conn.prepare_cached(&sql).map_err(classify)?;
        stmt.execute(params_from_iter(record.values()))
            .map_err(classify)?;
        Ok(())
    }

    fn build_statement(&self, record: &Record) -> Result<String, WriteError> {
        if let WritePolicy::Upsert { key, refresh } = &self.policy {
            for field in key {
                if !record.contains_key(field) {
                    return Err(WriteError::MissingKeyField {
                        table: self.table.clone(),
                        field: field.clone(),
                    });
                }
            }
            for field in refresh {
                if !record.contains_key(field) {
                    return Err(WriteError::MissingRefreshField {
                        table: self.table.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        let columns: Vec<&str> = record.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );

        if let WritePolicy::Upsert { key, refresh } = &self.policy {
            if refresh.is_empty() {
                sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", key.join(", ")));
            } else {
                let updates: Vec<String> = refresh
                    .iter()
                    .map(|f| format!("{f}=excluded.{f}"))
                    .collect();
                sql.push_str(&format!(
                    " ON CONFLICT({}) DO UPDATE SET {}",
                    key.join(", "),
                    updates.join(", ")
                ));
            }
        }

        Ok(sql)
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

fn classify(e: rusqlite::Error) -> WriteError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            // constraint: duplicate key on a pure-insert table, NOT NULL, CHECK
            // mismatch: value incompatible with a strict column type
            ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch => WriteError::Rejected(e),
            _ => WriteError::Fatal(e),
        },
        rusqlite::Error::ToSqlConversionFailure(_) => WriteError::Rejected(e),
        _ => WriteError::Fatal(e),
    }
}
