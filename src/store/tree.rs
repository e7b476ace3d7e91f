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

//! Container tree templates for lazy path materialization.
//!
//! A tree mirrors the path structure under `/bookmarks` and records the media
//! type of each container level. `*` matches any segment (service names, day
//! keys, failure kinds, report names). [`Store::ensure`](super::Store) walks a
//! tree to create missing intermediate containers with the right `_type`; it
//! never overwrites existing content.

use once_cell::sync::Lazy;
use serde_json::{json, Value};

pub const BOOKMARKS_TYPE: &str = "application/vnd.oada.bookmarks.1+json";
pub const SERVICES_TYPE: &str = "application/vnd.oada.services.1+json";
pub const SERVICE_TYPE: &str = "application/vnd.oada.service.1+json";
pub const JOBS_TYPE: &str = "application/vnd.oada.service.jobs.1+json";
pub const JOB_TYPE: &str = "application/vnd.oada.service.job.1+json";
pub const REPORTS_TYPE: &str = "application/vnd.oada.service.reports.1+json";
pub const REPORT_TYPE: &str = "application/vnd.oada.service.report.1+json";

static JOBS_TREE: Lazy<Value> = Lazy::new(|| {
    json!({
        "bookmarks": {
            "_type": BOOKMARKS_TYPE,
            "services": {
                "_type": SERVICES_TYPE,
                "*": {
                    "_type": SERVICE_TYPE,
                    "jobs": {
                        "_type": JOBS_TYPE,
                        "pending": { "_type": JOBS_TYPE },
                        "success": {
                            "_type": JOBS_TYPE,
                            "day-index": { "*": { "_type": JOBS_TYPE } }
                        },
                        "failure": {
                            "_type": JOBS_TYPE,
                            "day-index": { "*": { "_type": JOBS_TYPE } }
                        },
                        "typed-failure": {
                            "_type": JOBS_TYPE,
                            "*": {
                                "_type": JOBS_TYPE,
                                "day-index": { "*": { "_type": JOBS_TYPE } }
                            }
                        },
                        "reports": {
                            "_type": REPORTS_TYPE,
                            "*": {
                                "_type": REPORT_TYPE,
                                "day-index": { "*": { "_type": REPORT_TYPE } }
                            }
                        }
                    }
                }
            }
        }
    })
});

/// The full jobs-namespace template: pending list, success/failure day
/// indexes, typed-failure mirrors, and report day indexes for any service.
pub fn jobs_tree() -> &'static Value {
    &JOBS_TREE
}

/// Resolves a path (as segments, without the leading slash) against a tree
/// template, falling back to `*` children where no literal segment matches.
pub fn lookup<'a>(tree: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = tree;
    for segment in segments {
        let children = node.as_object()?;
        node = children
            .get(*segment)
            .or_else(|| children.get("*"))?;
    }
    Some(node)
}

/// The media type a tree template declares for a path, if any.
pub fn media_type<'a>(tree: &'a Value, segments: &[&str]) -> Option<&'a str> {
    lookup(tree, segments)?.get("_type")?.as_str()
}
