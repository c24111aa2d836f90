//! Canonical record model shared by all data sources.
//!
//! A record is a flat field-name → value map, already normalized by the
//! source. Field names double as column names; the sorted map order gives
//! the writer a deterministic statement-cache key.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

/// One column value. Sqlite type affinity does the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Null,
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Real(f)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One normalized entity ready for persistence.
pub type Record = BTreeMap<String, FieldValue>;

/// How a record lands in its table when the key already exists.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePolicy {
    /// Plain `INSERT`; a duplicate key is expected on reruns and skipped.
    InsertOnly,
    /// `INSERT .. ON CONFLICT(key) DO UPDATE SET f=excluded.f` for exactly
    /// the `refresh` fields. All other columns keep their first-insert
    /// values on every later collision.
    Upsert {
        key: Vec<String>,
        refresh: BTreeSet<String>,
    },
}
