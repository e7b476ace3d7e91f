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

//! Metrics surface.
//!
//! Recorded through the `metrics` facade; the embedding process installs an
//! exporter. Names and labels are stable:
//!
//! - gauge `oada_jobs_total{service, type, state}` with
//!   `state ∈ {queued, running, success, failure}`
//! - histogram `job_times{service, type, status}` with
//!   `status ∈ {success, failure}`, in seconds
//!
//! Exporters should configure [`JOB_TIME_BUCKETS`] as the bucket boundaries
//! for `job_times` (e.g. `set_buckets_for_metric` on the Prometheus exporter).

use metrics::{describe_gauge, describe_histogram, gauge, histogram, Unit};

use crate::job::JobStatus;

/// Gauge counting jobs per service, type, and state.
pub const JOB_TOTALS: &str = "oada_jobs_total";

/// Histogram of job runtimes per service, type, and terminal status.
pub const JOB_TIMES: &str = "job_times";

/// Bucket boundaries for [`JOB_TIMES`], in seconds.
pub const JOB_TIME_BUCKETS: [f64; 20] = [
    1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0,
    16384.0, 32768.0, 65536.0, 131072.0, 262144.0, 524288.0,
];

/// Registers descriptions for the metrics this crate records.
pub fn describe_metrics() {
    describe_gauge!(
        JOB_TOTALS,
        "Number of jobs per service and type, by lifecycle state"
    );
    describe_histogram!(
        JOB_TIMES,
        Unit::Seconds,
        "Job runtime per service and type, by terminal status"
    );
}

/// Lifecycle states tracked by the [`JOB_TOTALS`] gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobState {
    Queued,
    Running,
    Success,
    Failure,
}

impl JobState {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl From<JobStatus> for JobState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Success => Self::Success,
            // Pending never reaches a terminal metric update.
            JobStatus::Pending | JobStatus::Failure => Self::Failure,
        }
    }
}

/// Initializes every label set for a newly registered job type at zero, so
/// scrapes see the series before the first job arrives.
pub(crate) fn zero_job_type(service: &str, job_type: &str) {
    for state in [
        JobState::Queued,
        JobState::Running,
        JobState::Success,
        JobState::Failure,
    ] {
        gauge!(
            JOB_TOTALS,
            "service" => service.to_owned(),
            "type" => job_type.to_owned(),
            "state" => state.as_str(),
        )
        .set(0.0);
    }
    for status in [JobStatus::Success, JobStatus::Failure] {
        // Creating the handle registers the series without recording a sample.
        let _ = histogram!(
            JOB_TIMES,
            "service" => service.to_owned(),
            "type" => job_type.to_owned(),
            "status" => status.as_str(),
        );
    }
}

pub(crate) fn adjust(service: &str, job_type: &str, state: JobState, delta: f64) {
    gauge!(
        JOB_TOTALS,
        "service" => service.to_owned(),
        "type" => job_type.to_owned(),
        "state" => state.as_str(),
    )
    .increment(delta);
}

pub(crate) fn observe_job_time(service: &str, job_type: &str, status: JobStatus, seconds: f64) {
    histogram!(
        JOB_TIMES,
        "service" => service.to_owned(),
        "type" => job_type.to_owned(),
        "status" => status.as_str(),
    )
    .record(seconds);
}
