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

//! Runner: drives exactly one job to a terminal state.
//!
//! A Runner is created when a pending entry is observed and terminates at
//! filing. It looks up the registered worker, executes it under the per-type
//! timeout, persists the terminal status and result, files the job into the
//! day-indexed success or failure list, deletes the pending entry, records
//! metrics, and invokes any finish reporters targeting the terminal status.
//!
//! Filing writes go to stable keys, so re-running `finish` with the same
//! inputs leaves the store unchanged; re-observation of an already-terminal
//! job short-circuits straight to filing.

mod updates;

pub use updates::{UpdateLevel, UpdateLogger};

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::job::{Job, JobStatus, SerializedError};
use crate::metrics;
use crate::service::ServiceShared;
use crate::store::{paths, tree};
use crate::worker::WorkContext;

/// Failure kind recorded when no worker is registered for the job's type.
pub const FAIL_KIND_NO_WORKER: &str = "no-worker";

/// Failure kind recorded when the worker exceeds its timeout.
pub const FAIL_KIND_TIMEOUT: &str = "timeout";

/// Per-job lifecycle driver.
pub(crate) struct Runner {
    shared: Arc<ServiceShared>,
    job_key: String,
    job: Job,
    updates: UpdateLogger,
    started: Instant,
}

impl Runner {
    pub(crate) fn new(shared: Arc<ServiceShared>, job_key: String, job: Job) -> Self {
        let updates = UpdateLogger::new(
            shared.store.clone(),
            &job.oid,
            shared.opts.debug_updates,
            shared.opts.trace_updates,
        );
        Self {
            shared,
            job_key,
            job,
            updates,
            started: Instant::now(),
        }
    }

    /// Drives the job to a terminal state and files it.
    ///
    /// Store errors during filing propagate; the pending entry survives and
    /// the next observation retries, so workers deployed against flaky
    /// storage must be idempotent.
    pub(crate) async fn run(self) -> Result<(), StoreError> {
        let service = self.shared.name.clone();
        let job_type = self.job.job_type.clone();
        metrics::adjust(&service, &job_type, metrics::JobState::Running, 1.0);

        // Re-observed terminal jobs go straight back through filing, keeping
        // their stored result and original finish day.
        if let Some(status) = self.job.status.filter(JobStatus::is_terminal) {
            debug!(
                key = %self.job_key,
                %status,
                "job already terminal, re-filing"
            );
            let time = self
                .job
                .latest_update_time(status)
                .unwrap_or_else(Utc::now);
            let result = self.job.result.clone().unwrap_or_else(|| json!({}));
            return self.finish(status, result, time, None).await;
        }

        if !self.job.is_job {
            warn!(key = %self.job_key, oid = %self.job.oid, "invalid job document");
            return self
                .finish(JobStatus::Failure, json!({}), Utc::now(), None)
                .await;
        }

        let worker = match self.shared.worker(&self.job.job_type) {
            Ok(worker) => worker,
            Err(e) => {
                warn!(key = %self.job_key, r#type = %self.job.job_type, "{e}");
                let err = SerializedError {
                    name: "NoWorkerError".to_string(),
                    message: e.to_string(),
                    stack: None,
                    cause: None,
                };
                return self
                    .finish(
                        JobStatus::Failure,
                        err.to_value(),
                        Utc::now(),
                        Some(FAIL_KIND_NO_WORKER),
                    )
                    .await;
            }
        };

        self.updates.info("started", "Runner started").await?;
        info!(
            service = %service,
            r#type = %job_type,
            key = %self.job_key,
            "Job state change: pending -> running"
        );

        let ctx = WorkContext {
            job_key: self.job_key.clone(),
            oid: self.job.oid.clone(),
            store: self.shared.store.clone(),
            updates: self.updates.clone(),
        };

        match tokio::time::timeout(worker.timeout, worker.work.run(&self.job, &ctx)).await {
            Ok(Ok(result)) => {
                self.finish(JobStatus::Success, result, Utc::now(), None)
                    .await
            }
            Ok(Err(e)) => {
                let kind = e.kind().map(str::to_string);
                self.finish(
                    JobStatus::Failure,
                    SerializedError::from(&e).to_value(),
                    Utc::now(),
                    kind.as_deref(),
                )
                .await
            }
            Err(_) => {
                // Dropping the timed-out future is our best-effort cancel;
                // updates the worker already posted persist.
                let err = SerializedError {
                    name: "TimeoutError".to_string(),
                    message: format!(
                        "job exceeded the {}s timeout for type '{}'",
                        worker.timeout.as_secs_f64(),
                        self.job.job_type
                    ),
                    stack: None,
                    cause: None,
                };
                self.finish(
                    JobStatus::Failure,
                    err.to_value(),
                    Utc::now(),
                    Some(FAIL_KIND_TIMEOUT),
                )
                .await
            }
        }
    }

    /// Files the job: terminal write, final update, day-index links, pending
    /// delete, metrics, finish reporters. Idempotent under re-invocation with
    /// the same inputs.
    async fn finish(
        &self,
        status: JobStatus,
        result: Value,
        time: DateTime<Utc>,
        fail_kind: Option<&str>,
    ) -> Result<(), StoreError> {
        debug_assert!(status.is_terminal());
        let store = self.shared.store.as_ref();
        let service_paths = &self.shared.paths;
        let job_path = paths::resource(&self.job.oid);

        store
            .put(
                &job_path,
                json!({ "status": status, "result": result }),
                None,
            )
            .await?;

        self.updates
            .info(status.as_str(), "Runner finished")
            .await?;

        let day = paths::day(&time);
        let list_path = match status {
            JobStatus::Success => service_paths.success_day(&day),
            _ => service_paths.failure_day(&day),
        };
        let link = json!({ "_id": self.job.oid });

        store.ensure(&list_path, tree::jobs_tree()).await?;
        store
            .put(
                &format!("{list_path}/{}", self.job_key),
                link.clone(),
                Some(tree::jobs_tree()),
            )
            .await?;

        if status == JobStatus::Failure {
            if let Some(kind) = fail_kind {
                let typed_path = service_paths.typed_failure_day(kind, &day);
                store.ensure(&typed_path, tree::jobs_tree()).await?;
                store
                    .put(
                        &format!("{typed_path}/{}", self.job_key),
                        link,
                        Some(tree::jobs_tree()),
                    )
                    .await?;
            }
        }

        store
            .delete(&service_paths.pending_entry(&self.job_key))
            .await?;

        let service = &self.shared.name;
        let job_type = &self.job.job_type;
        metrics::adjust(service, job_type, metrics::JobState::Queued, -1.0);
        metrics::adjust(service, job_type, metrics::JobState::Running, -1.0);
        metrics::adjust(service, job_type, metrics::JobState::from(status), 1.0);
        metrics::observe_job_time(service, job_type, status, self.started.elapsed().as_secs_f64());

        info!(
            service = %service,
            r#type = %job_type,
            key = %self.job_key,
            "Job state change: running -> {status}"
        );

        self.dispatch_reporters(status, &result, &format!("{list_path}/{}", self.job_key))
            .await;

        Ok(())
    }

    /// Invokes every finish reporter whose target status matches. Reporter
    /// failures are logged and never affect the already-filed job.
    async fn dispatch_reporters(&self, status: JobStatus, result: &Value, filed_path: &str) {
        let reporters = &self.shared.opts.finish_reporters;
        if reporters.is_empty() {
            return;
        }

        // Snapshot the finalized job for the reporters.
        let mut final_job = self.job.clone();
        final_job.status = Some(status);
        final_job.result = Some(result.clone());

        for reporter in reporters.iter().filter(|r| r.on == status) {
            let Some(handler) = self.shared.reporter_kind(&reporter.kind) else {
                error!(kind = %reporter.kind, "unknown finish reporter kind, skipping");
                continue;
            };
            if let Err(e) = handler
                .report(reporter, &final_job, filed_path, &self.job_key, status)
                .await
            {
                error!(
                    kind = %reporter.kind,
                    key = %self.job_key,
                    error = %e,
                    "finish reporter failed"
                );
            }
        }
    }
}
