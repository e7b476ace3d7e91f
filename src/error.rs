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

//! Error types for the job lifecycle engine and report subsystem.
//!
//! Errors are split by the seam they cross:
//!
//! - [`StoreError`] - failures talking to the document store
//! - [`JobError`] - failures raised by user workers, carrying an optional
//!   failure-kind tag that drives typed failure filing
//! - [`ServiceError`] - registration and lifecycle failures on the service
//! - [`ReportError`] - report configuration and aggregation failures
//! - [`ReporterError`] - finish-reporter dispatch failures (logged, never fatal)

use thiserror::Error;

/// Errors returned by [`Store`](crate::store::Store) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document does not exist.
    #[error("document not found: {path}")]
    NotFound { path: String },

    /// The request failed in the transport or backend.
    #[error("store request failed for {path}: {message}")]
    Request { path: String, message: String },

    /// A document could not be serialized or deserialized.
    #[error("malformed document at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The referenced change subscription is not active.
    #[error("no such watch: {id}")]
    UnknownWatch { id: crate::store::WatchId },
}

/// Error raised by a user worker while running a job.
///
/// Carries the message persisted to the job's `result`, an optional
/// `kind` tag used for typed failure filing, and an optional cause chain.
/// Workers can construct one directly or convert from store errors with `?`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobError {
    name: String,
    message: String,
    kind: Option<String>,
    cause: Option<Box<JobError>>,
}

impl JobError {
    /// Creates a new worker error with the default name.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "JobError".to_string(),
            message: message.into(),
            kind: None,
            cause: None,
        }
    }

    /// Sets the failure-kind tag, which selects the typed-failure day index
    /// the job is mirrored into.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Overrides the error name recorded in the serialized result.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches an underlying cause.
    pub fn with_cause(mut self, cause: JobError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn cause(&self) -> Option<&JobError> {
        self.cause.as_deref()
    }
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        JobError::new(e.to_string()).with_name("StoreError")
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::new(e.to_string()).with_name("SerializationError")
    }
}

/// Errors surfaced through the [`Service`](crate::service::Service) API.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No worker is registered for the requested job type.
    #[error("no worker registered for job type '{job_type}'")]
    NoWorker { job_type: String },

    /// `start` was called while a queue is already active.
    #[error("service '{service}' already has an active queue")]
    AlreadyStarted { service: String },

    /// The initial read of the pending list failed; fatal to `start`.
    #[error("failed to read pending list at startup")]
    PendingUnavailable {
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Errors raised while configuring or aggregating a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The cron frequency could not be parsed (six fields, seconds first).
    #[error("invalid report frequency '{expression}': {source}")]
    InvalidFrequency {
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to render report CSV: {message}")]
    Csv { message: String },

    #[error("failed to serialize email job: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// Errors raised by finish-reporter handlers. Always logged, never fatal.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// A required reporter parameter is absent from `params`.
    #[error("finish reporter missing required param '{param}'")]
    MissingParam { param: &'static str },

    #[error("finish reporter request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}
