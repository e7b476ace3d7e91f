/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Typed view of one job document.
//!
//! A job document is the authoritative record for one unit of work:
//!
//! - `service` - the service namespace the job targets
//! - `type` - dispatch key into the worker registry
//! - `config` - arbitrary JSON handed to the worker
//! - `status` / `result` - terminal outcome, written once
//! - `updates` - append-only, key-ordered progress log
//!
//! Jobs are created by posting a document and then linking it under the
//! service's pending list. Because the link can appear before the document
//! body, [`Job::load`] re-reads once before declaring a document invalid.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{JobError, StoreError};
use crate::store::{paths, Store};

/// Terminal and non-terminal job states as stored on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Success,
    Failure,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a job's `updates` log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub status: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
}

/// Serialized form of an error persisted into a failed job's `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<SerializedError>>,
}

impl SerializedError {
    /// The JSON persisted as a failed job's `result`.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::json!({
            "name": self.name,
            "message": self.message,
        });
        if let Some(stack) = &self.stack {
            value["stack"] = Value::String(stack.clone());
        }
        if let Some(cause) = &self.cause {
            value["cause"] = cause.to_value();
        }
        value
    }
}

impl From<&JobError> for SerializedError {
    fn from(e: &JobError) -> Self {
        Self {
            name: e.name().to_string(),
            message: e.message().to_string(),
            stack: None,
            cause: e.cause().map(|cause| Box::new(SerializedError::from(cause))),
        }
    }
}

/// Typed view of one job document, loaded by its store identifier.
#[derive(Debug, Clone)]
pub struct Job {
    /// Store document identifier, e.g. `resources/<key>`.
    pub oid: String,
    pub service: String,
    pub job_type: String,
    pub config: Value,
    pub status: Option<JobStatus>,
    pub result: Option<Value>,
    /// Key-ordered update log; ULID keys sort in creation order.
    pub updates: BTreeMap<String, Update>,
    /// False when the document failed validation even after one re-read.
    pub is_job: bool,
    raw: Value,
}

impl Job {
    /// Loads a job document, re-reading once when validation fails.
    ///
    /// A missing document counts as a validation failure (the link may have
    /// appeared before the body); any other store error is transient and
    /// propagates so the job is retried at the next observation.
    pub async fn load(store: &dyn Store, oid: &str) -> Result<Self, StoreError> {
        let path = paths::resource(oid);
        let mut job = Self::read(store, oid, &path).await?;
        if !job.is_job {
            debug!(oid, "job document invalid, re-reading once");
            job = Self::read(store, oid, &path).await?;
        }
        Ok(job)
    }

    async fn read(store: &dyn Store, oid: &str, path: &str) -> Result<Self, StoreError> {
        match store.get(path).await {
            Ok(doc) => Ok(Self::from_document(oid, doc.data)),
            Err(StoreError::NotFound { .. }) => Ok(Self::from_document(oid, Value::Null)),
            Err(e) => Err(e),
        }
    }

    /// Builds the typed view from a raw document body.
    ///
    /// Validation requires `service`, `type`, and `config`; everything else
    /// is parsed leniently so a malformed update entry cannot poison a job.
    pub fn from_document(oid: impl Into<String>, raw: Value) -> Self {
        let service = raw
            .get("service")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let job_type = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let config = raw.get("config").cloned();
        let status = raw
            .get("status")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());
        let result = raw.get("result").cloned();

        let mut updates = BTreeMap::new();
        if let Some(map) = raw.get("updates").and_then(Value::as_object) {
            for (key, value) in map {
                match serde_json::from_value::<Update>(value.clone()) {
                    Ok(update) => {
                        updates.insert(key.clone(), update);
                    }
                    Err(e) => debug!(key = %key, error = %e, "skipping malformed update entry"),
                }
            }
        }

        let is_job = !service.is_empty() && !job_type.is_empty() && config.is_some();
        Self {
            oid: oid.into(),
            service,
            job_type,
            config: config.unwrap_or(Value::Null),
            status,
            result,
            updates,
            is_job,
            raw,
        }
    }

    /// The raw document body, for JSON-pointer resolution in reports.
    pub fn document(&self) -> &Value {
        &self.raw
    }

    /// Time of the newest update whose status matches, for re-filing
    /// already-terminal jobs under their original finish day.
    pub fn latest_update_time(&self, status: JobStatus) -> Option<DateTime<Utc>> {
        self.updates
            .values()
            .rev()
            .find(|u| u.status == status.as_str())
            .map(|u| u.time)
    }
}
