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

//! Store path layout for one service namespace.
//!
//! The layout is a bit-stable contract; services write and read these exact
//! paths:
//!
//! ```text
//! /bookmarks/services/<svc>/jobs/pending/<jobKey>
//! /bookmarks/services/<svc>/jobs/success/day-index/<d>/<k>
//! /bookmarks/services/<svc>/jobs/failure/day-index/<d>/<k>
//! /bookmarks/services/<svc>/jobs/typed-failure/<kind>/day-index/<d>/<k>
//! /bookmarks/services/<svc>/jobs/reports/<name>/day-index/<d>/<k>
//! ```
//!
//! `<d>` is `YYYY-MM-DD` in UTC. The choice of UTC is fixed at configuration
//! time and never changes at runtime.

use chrono::{DateTime, Utc};

/// Formats a timestamp as its UTC calendar day, `YYYY-MM-DD`.
pub fn day(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d").to_string()
}

/// Path builders rooted at one service's jobs namespace.
#[derive(Debug, Clone)]
pub struct ServicePaths {
    service: String,
    base: String,
}

impl ServicePaths {
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        let base = format!("/bookmarks/services/{service}/jobs");
        Self { service, base }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// The jobs container for this service.
    pub fn jobs(&self) -> &str {
        &self.base
    }

    /// The pending-jobs list.
    pub fn pending(&self) -> String {
        format!("{}/pending", self.base)
    }

    /// One entry in the pending list.
    pub fn pending_entry(&self, job_key: &str) -> String {
        format!("{}/pending/{job_key}", self.base)
    }

    /// The success subtree (watched by reports).
    pub fn success(&self) -> String {
        format!("{}/success", self.base)
    }

    /// The failure subtree (watched by reports).
    pub fn failure(&self) -> String {
        format!("{}/failure", self.base)
    }

    /// The typed-failure subtree (watched by reports).
    pub fn typed_failure(&self) -> String {
        format!("{}/typed-failure", self.base)
    }

    /// The success day index for one calendar day.
    pub fn success_day(&self, day: &str) -> String {
        format!("{}/success/day-index/{day}", self.base)
    }

    /// The failure day index for one calendar day.
    pub fn failure_day(&self, day: &str) -> String {
        format!("{}/failure/day-index/{day}", self.base)
    }

    /// The typed-failure day index for one failure kind and day.
    pub fn typed_failure_day(&self, kind: &str, day: &str) -> String {
        format!("{}/typed-failure/{kind}/day-index/{day}", self.base)
    }

    /// One report's day index for one calendar day.
    pub fn report_day(&self, report: &str, day: &str) -> String {
        format!("{}/reports/{report}/day-index/{day}", self.base)
    }

    /// One report's container.
    pub fn report(&self, report: &str) -> String {
        format!("{}/reports/{report}", self.base)
    }
}

/// The absolute path of a document given its store identifier.
pub fn resource(oid: &str) -> String {
    format!("/{oid}")
}
