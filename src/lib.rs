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

//! # oada-jobs
//!
//! A library for building microservices whose work is driven by jobs that
//! appear as documents in a remote, append-mostly hierarchical document
//! store. A process registers typed workers on a [`Service`]; the library
//! watches the pending-jobs list under the service's namespace, runs a worker
//! per job under a per-type timeout, records progress and results back into
//! the store, and files every finished job into a dated success or failure
//! index. Scheduled [`Report`]s listen to those indexes, emit one summary row
//! per job, and periodically mail the rows as a CSV via a downstream email
//! service.
//!
//! ## Guarantees
//!
//! Every observed job is driven to a terminal state and filed, and filing is
//! idempotent under re-observation. The store is the source of truth; this
//! library keeps no durable state of its own and does not promise
//! exactly-once execution. Running multiple processes against the same
//! namespace is a misconfiguration.
//!
//! ## Components
//!
//! - [`store`] - the [`Store`] capability trait, path layout, tree templates,
//!   and the in-memory backend
//! - [`Job`] / [`JobStatus`] - the typed view of one job document
//! - [`Service`] - worker registration and lifecycle
//! - [`Report`] / [`ReportConfig`] - scheduled aggregate reports
//! - [`FinishReporter`] - pluggable post-terminal notifiers
//!
//! Day indexes use UTC calendar days; this is fixed at configuration time
//! and never changes at runtime.

pub mod error;
pub mod job;
pub mod keys;
pub mod metrics;
pub mod report;
pub mod reporter;
pub mod service;
pub mod store;
pub mod worker;

mod queue;
mod runner;

pub use error::{JobError, ReportError, ReporterError, ServiceError, StoreError};
pub use job::{Job, JobStatus, SerializedError, Update};
pub use report::{
    Attachment, EmailAddress, EmailConfig, Report, ReportConfig, ReportState,
    ERROR_MAPPINGS_POINTER,
};
pub use reporter::{FinishHandler, FinishReporter, WebhookReporter, WEBHOOK_KIND};
pub use runner::{UpdateLevel, UpdateLogger, FAIL_KIND_NO_WORKER, FAIL_KIND_TIMEOUT};
pub use service::{Service, ServiceConfig, ServiceOpts, DEFAULT_CONCURRENCY};
pub use store::{
    Change, ChangeKind, ConnectionOptions, Document, MemoryStore, ServicePaths, Store, Watch,
    WatchId,
};
pub use worker::{Work, WorkContext, WorkerEntry};
