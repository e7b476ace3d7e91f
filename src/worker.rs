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

//! Worker definitions.
//!
//! A worker is the user-supplied function invoked for every job of one type.
//! Implement [`Work`] directly, or register an async closure through
//! [`Service::on_fn`](crate::service::Service::on_fn). Workers return the JSON
//! persisted as the job's `result` on success and a [`JobError`] on failure;
//! the error's kind tag selects the typed-failure day index.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobError;
use crate::job::Job;
use crate::runner::UpdateLogger;
use crate::store::Store;

/// User-supplied job handler for one job type.
#[async_trait]
pub trait Work: Send + Sync {
    /// Runs one job. The returned JSON becomes the job's `result`.
    async fn run(&self, job: &Job, ctx: &WorkContext) -> Result<Value, JobError>;
}

/// A registered worker: the handler plus its per-type timeout.
#[derive(Clone)]
pub struct WorkerEntry {
    pub work: Arc<dyn Work>,
    pub timeout: Duration,
}

/// Execution context handed to a worker alongside its job.
///
/// Exposes the job's identity, a store handle bound to the service's
/// credentials, and the update logger appending to the job's `updates` log.
#[derive(Clone)]
pub struct WorkContext {
    pub job_key: String,
    pub oid: String,
    pub store: Arc<dyn Store>,
    pub updates: UpdateLogger,
}

/// Adapts an async closure into a [`Work`] implementation.
pub(crate) struct FnWork<F> {
    f: F,
}

impl<F> FnWork<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Work for FnWork<F>
where
    F: Fn(Job, WorkContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, JobError>> + Send,
{
    async fn run(&self, job: &Job, ctx: &WorkContext) -> Result<Value, JobError> {
        (self.f)(job.clone(), ctx.clone()).await
    }
}
