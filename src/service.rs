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

//! Service: the public registration and lifecycle API.
//!
//! A service owns the store handle, the worker registry, the report registry,
//! and at most one active [`Queue`]. Typical use:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use oada_jobs::{MemoryStore, Service, ServiceConfig};
//!
//! # async fn example() -> Result<(), oada_jobs::ServiceError> {
//! let service = Service::new(ServiceConfig {
//!     name: "my-service".to_string(),
//!     store: Arc::new(MemoryStore::new()),
//!     concurrency: Some(5),
//!     opts: Default::default(),
//! });
//!
//! service.on_fn("basic", Duration::from_secs(10), |job, _ctx| async move {
//!     let _ = job.config;
//!     Ok(json!({"success": true}))
//! });
//!
//! service.start().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{JobError, ServiceError};
use crate::job::Job;
use crate::metrics;
use crate::queue::Queue;
use crate::report::{Report, ReportConfig};
use crate::reporter::{FinishHandler, FinishReporter, WebhookReporter, WEBHOOK_KIND};
use crate::store::{ServicePaths, Store};
use crate::worker::{FnWork, Work, WorkContext, WorkerEntry};

/// Concurrency used when the config does not set one; the remote client
/// default of one in-flight job at a time.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Options tuning a service's behavior.
#[derive(Clone, Default)]
pub struct ServiceOpts {
    /// Ordered post-terminal notifiers, dispatched after filing.
    pub finish_reporters: Vec<FinishReporter>,
    /// Do not dispatch pre-existing pending entries at startup; only react
    /// to new changes.
    pub skip_queue_on_startup: bool,
    /// Post `debug`-level job updates.
    pub debug_updates: bool,
    /// Post `trace`-level job updates.
    pub trace_updates: bool,
}

/// Construction parameters for a [`Service`].
#[derive(Clone)]
pub struct ServiceConfig {
    /// Service namespace under `/bookmarks/services`.
    pub name: String,
    /// Store handle; transports implementing [`Store`] accept
    /// [`ConnectionOptions`](crate::store::ConnectionOptions).
    pub store: Arc<dyn Store>,
    /// Bounded worker-pool size; defaults to [`DEFAULT_CONCURRENCY`].
    pub concurrency: Option<usize>,
    pub opts: ServiceOpts,
}

/// State shared between the service, its queue, and its runners.
pub(crate) struct ServiceShared {
    pub(crate) name: String,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) concurrency: usize,
    pub(crate) opts: ServiceOpts,
    pub(crate) paths: ServicePaths,
    workers: RwLock<HashMap<String, WorkerEntry>>,
    reporter_kinds: RwLock<HashMap<String, Arc<dyn FinishHandler>>>,
}

impl ServiceShared {
    /// Looks up the worker for a job type; fails when unregistered.
    pub(crate) fn worker(&self, job_type: &str) -> Result<WorkerEntry, ServiceError> {
        self.workers
            .read()
            .get(job_type)
            .cloned()
            .ok_or_else(|| ServiceError::NoWorker {
                job_type: job_type.to_string(),
            })
    }

    pub(crate) fn reporter_kind(&self, kind: &str) -> Option<Arc<dyn FinishHandler>> {
        self.reporter_kinds.read().get(kind).cloned()
    }
}

/// A microservice endpoint: registers workers, watches its pending list,
/// and runs its reports.
pub struct Service {
    shared: Arc<ServiceShared>,
    queue: Mutex<Option<Queue>>,
    reports: RwLock<HashMap<String, Arc<Report>>>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        metrics::describe_metrics();

        let paths = ServicePaths::new(&config.name);
        let shared = Arc::new(ServiceShared {
            name: config.name,
            store: config.store,
            concurrency: config.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            opts: config.opts,
            paths,
            workers: RwLock::new(HashMap::new()),
            reporter_kinds: RwLock::new(HashMap::new()),
        });
        shared
            .reporter_kinds
            .write()
            .insert(WEBHOOK_KIND.to_string(), Arc::new(WebhookReporter::new()));

        Self {
            shared,
            queue: Mutex::new(None),
            reports: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Registers a worker for a job type; replaces any existing registration.
    ///
    /// Initializes the metric series for this type so scrapes see zeroes
    /// before the first job. Registration while running is safe.
    pub fn on(&self, job_type: &str, timeout: Duration, work: Arc<dyn Work>) {
        metrics::zero_job_type(&self.shared.name, job_type);
        self.shared
            .workers
            .write()
            .insert(job_type.to_string(), WorkerEntry { work, timeout });
        info!(service = %self.shared.name, r#type = job_type, "worker registered");
    }

    /// Registers an async closure as the worker for a job type.
    pub fn on_fn<F, Fut>(&self, job_type: &str, timeout: Duration, f: F)
    where
        F: Fn(Job, WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        self.on(job_type, timeout, Arc::new(FnWork::new(f)));
    }

    /// Removes the worker for a job type.
    pub fn off(&self, job_type: &str) {
        if self.shared.workers.write().remove(job_type).is_some() {
            info!(service = %self.shared.name, r#type = job_type, "worker removed");
        }
    }

    /// The registered worker for a job type, or an error when there is none.
    pub fn worker(&self, job_type: &str) -> Result<WorkerEntry, ServiceError> {
        self.shared.worker(job_type)
    }

    /// Registers a finish-reporter kind handler under a name.
    pub fn register_reporter_kind(&self, kind: impl Into<String>, handler: Arc<dyn FinishHandler>) {
        self.shared.reporter_kinds.write().insert(kind.into(), handler);
    }

    /// Registers a report. Reports registered while the service runs begin
    /// at the next `start`.
    pub fn add_report(&self, config: ReportConfig) -> Result<Arc<Report>, ServiceError> {
        let report = Report::new(self.shared.clone(), config)?;
        self.reports
            .write()
            .insert(report.name().to_string(), report.clone());
        debug!(service = %self.shared.name, report = %report.name(), "report registered");
        Ok(report)
    }

    pub fn report(&self, name: &str) -> Option<Arc<Report>> {
        self.reports.read().get(name).cloned()
    }

    /// Starts the queue, then every registered report.
    ///
    /// At most one queue may be active; a second `start` without an
    /// intervening `stop` fails.
    pub async fn start(&self) -> Result<(), ServiceError> {
        {
            let mut slot = self.queue.lock().await;
            if slot.is_some() {
                return Err(ServiceError::AlreadyStarted {
                    service: self.shared.name.clone(),
                });
            }
            let queue = Queue::new(self.shared.clone());
            queue.start(self.shared.opts.skip_queue_on_startup).await?;
            *slot = Some(queue);
        }

        let reports: Vec<Arc<Report>> = self.reports.read().values().cloned().collect();
        for report in reports {
            report.start().await?;
        }

        info!(service = %self.shared.name, "service started");
        Ok(())
    }

    /// Stops the queue (draining in-flight Runners), then every report.
    pub async fn stop(&self) {
        let queue = self.queue.lock().await.take();
        if let Some(queue) = queue {
            queue.stop().await;
        }

        let reports: Vec<Arc<Report>> = self.reports.read().values().cloned().collect();
        for report in reports {
            report.stop().await;
        }
        info!(service = %self.shared.name, "service stopped");
    }
}
