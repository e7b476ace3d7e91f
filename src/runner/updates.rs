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

//! Update logger: appends progress entries to a job's `updates` log.
//!
//! Four levels. `info` and `error` always post; `debug` and `trace` post only
//! when enabled on the service options. Every post is one append under a
//! fresh K-sortable key, so entries read back in call order.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::trace;

use crate::error::StoreError;
use crate::keys;
use crate::store::{paths, Store};

/// Verbosity of one update post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateLevel {
    Info,
    Debug,
    Trace,
    Error,
}

/// Posts update entries to one job's `updates` log.
#[derive(Clone)]
pub struct UpdateLogger {
    store: Arc<dyn Store>,
    job_path: String,
    debug_enabled: bool,
    trace_enabled: bool,
}

impl UpdateLogger {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        oid: &str,
        debug_enabled: bool,
        trace_enabled: bool,
    ) -> Self {
        Self {
            store,
            job_path: paths::resource(oid),
            debug_enabled,
            trace_enabled,
        }
    }

    /// Appends one update with the given status and meta.
    ///
    /// Disabled levels return without touching the store. Updates posted
    /// through one logger land under fresh ordered keys, so they never
    /// collide and sort in call order.
    pub async fn post(
        &self,
        level: UpdateLevel,
        status: &str,
        meta: Value,
    ) -> Result<(), StoreError> {
        match level {
            UpdateLevel::Debug if !self.debug_enabled => return Ok(()),
            UpdateLevel::Trace if !self.trace_enabled => return Ok(()),
            _ => {}
        }

        let key = keys::new_key();
        let path = format!("{}/updates/{key}", self.job_path);
        let entry = json!({
            "status": status,
            "time": Utc::now(),
            "meta": meta,
        });
        trace!(path = %path, status, "posting job update");
        self.store.put(&path, entry, None).await?;
        Ok(())
    }

    pub async fn info(&self, status: &str, meta: impl Into<Value>) -> Result<(), StoreError> {
        self.post(UpdateLevel::Info, status, meta.into()).await
    }

    pub async fn error(&self, status: &str, meta: impl Into<Value>) -> Result<(), StoreError> {
        self.post(UpdateLevel::Error, status, meta.into()).await
    }

    pub async fn debug(&self, status: &str, meta: impl Into<Value>) -> Result<(), StoreError> {
        self.post(UpdateLevel::Debug, status, meta.into()).await
    }

    pub async fn trace(&self, status: &str, meta: impl Into<Value>) -> Result<(), StoreError> {
        self.post(UpdateLevel::Trace, status, meta.into()).await
    }
}
