//! Generic JSON-array source, configured entirely from the environment.
//!
//! The upstream payload must be a JSON array of flat objects (optionally
//! nested under SOURCE_POINTER, e.g. "/matches"). Scalar members become
//! record fields; nested structures are not flattened. Real per-source
//! extraction lives in its own DataSource impl, not here.

use std::collections::BTreeSet;
use std::env;

use anyhow::{anyhow, bail, Context, Result};
use ingest_engine::{
    DataSource, FetchRequest, FetchResponse, FieldValue, HeaderProfile, Record, Task, WritePolicy,
};
use serde_json::Value;
use tracing::debug;

pub struct JsonArraySource {
    name: String,
    /// `{}` is replaced with the task id.
    url_template: String,
    headers: HeaderProfile,
    /// JSON pointer to the array inside the payload; None means the payload
    /// is the array itself.
    pointer: Option<String>,
    table: String,
    policy: WritePolicy,
    /// Column that receives the task's first param (join back to a parent
    /// row, e.g. a foreign key).
    parent_field: Option<String>,
}

impl JsonArraySource {
    pub fn from_env() -> Result<Self> {
        let url_template = env::var("SOURCE_URL").context("SOURCE_URL not set")?;
        let table = env::var("SOURCE_TABLE").context("SOURCE_TABLE not set")?;

        let key = csv_list(env::var("SOURCE_KEY").ok());
        let refresh: BTreeSet<String> =
            csv_list(env::var("SOURCE_REFRESH").ok()).into_iter().collect();
        let policy = if key.is_empty() {
            if !refresh.is_empty() {
                bail!("SOURCE_REFRESH requires SOURCE_KEY");
            }
            WritePolicy::InsertOnly
        } else {
            WritePolicy::Upsert { key, refresh }
        };

        let headers = match env::var("SOURCE_HEADERS").as_deref() {
            Ok("html") => HeaderProfile::Html,
            _ => HeaderProfile::Json,
        };

        Ok(Self {
            name: env::var("SOURCE_NAME").unwrap_or_else(|_| table.clone()),
            url_template,
            headers,
            pointer: env::var("SOURCE_POINTER").ok(),
            table,
            policy,
            parent_field: env::var("SOURCE_PARENT_FIELD").ok(),
        })
    }
}

impl DataSource for JsonArraySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn request(&self, task: &Task) -> FetchRequest {
        FetchRequest::get(self.url_template.replace("{}", &task.id), self.headers)
    }

    fn normalize(&self, task: &Task, response: &FetchResponse) -> Result<Vec<Record>> {
        if !response.status.is_success() {
            bail!("upstream returned {}", response.status);
        }

        let payload: Value =
            serde_json::from_str(&response.body).context("payload is not JSON")?;
        let items = match &self.pointer {
            Some(p) => payload
                .pointer(p)
                .ok_or_else(|| anyhow!("nothing at pointer `{p}`"))?,
            None => &payload,
        };
        let items = items
            .as_array()
            .ok_or_else(|| anyhow!("payload is not a JSON array"))?;

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let Some(object) = item.as_object() else {
                debug!("skipping non-object array element for task {}", task.id);
                continue;
            };

            let mut record = Record::new();
            for (name, value) in object {
                let field = match value {
                    Value::String(s) => FieldValue::Text(s.clone()),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => FieldValue::Integer(i),
                        None => FieldValue::Real(n.as_f64().unwrap_or_default()),
                    },
                    Value::Bool(b) => FieldValue::Integer(*b as i64),
                    Value::Null => FieldValue::Null,
                    Value::Array(_) | Value::Object(_) => continue,
                };
                record.insert(name.clone(), field);
            }

            if let (Some(field), Some(parent)) = (&self.parent_field, task.params.first()) {
                record.insert(field.clone(), FieldValue::Text(parent.clone()));
            }

            records.push(record);
        }
        Ok(records)
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn policy(&self) -> &WritePolicy {
        &self.policy
    }
}

fn csv_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
