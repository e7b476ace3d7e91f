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

//! Scheduled aggregate reports.
//!
//! A report listens to the filed-job indexes of its service and emits one row
//! per completed job into its own day-indexed collection. A cron timer (six
//! fields, seconds precision) periodically aggregates the rows between two
//! watermarks into a CSV and submits an email-send job to a downstream email
//! service.
//!
//! State machine: `idle -> running -> stopped`. Only `running` consumes
//! change events and fires the timer.

mod aggregate;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ReportError;
use crate::job::{Job, JobStatus};
use crate::service::ServiceShared;
use crate::store::{tree, ChangeKind, WatchId, META_KEYS};

/// Pseudo-pointer in `job_mappings` that resolves through `error_mappings`
/// instead of the job document.
pub const ERROR_MAPPINGS_POINTER: &str = "errorMappings";

/// Callback producing the email template a report's aggregation fills in.
pub type EmailTemplateFn = Arc<dyn Fn() -> EmailConfig + Send + Sync>;

/// User predicate selecting which finished jobs produce rows.
pub type JobFilter = Arc<dyn Fn(&Job) -> bool + Send + Sync>;

/// Configuration for one report.
#[derive(Clone)]
pub struct ReportConfig {
    pub name: String,
    /// Six-field cron expression, seconds first.
    pub frequency: String,
    /// Service namespace the email-send job is posted into.
    pub email_service: String,
    pub email: EmailTemplateFn,
    /// Ordered `(column, JSON pointer)` pairs; the pointer
    /// [`ERROR_MAPPINGS_POINTER`] resolves through `error_mappings`.
    pub job_mappings: Vec<(String, String)>,
    pub error_mappings: HashMap<String, String>,
    /// When set, only jobs of these types produce rows.
    pub types: Option<Vec<String>>,
    pub filter: Option<JobFilter>,
    /// Send an email even when the window holds zero rows.
    pub send_empty: bool,
}

/// Recipient of a report email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAddress {
    pub name: String,
    pub email: String,
}

/// One attachment on a report email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(rename = "type")]
    pub content_type: String,
    /// Base64-encoded body.
    pub content: String,
}

/// The `config` of the email-send job posted downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub from: String,
    pub to: EmailAddress,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Lifecycle state of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    Idle,
    Running,
    Stopped,
}

/// A registered report: filed-job watches plus a cron timer.
pub struct Report {
    pub(crate) shared: Arc<ServiceShared>,
    pub(crate) config: ReportConfig,
    schedule: Schedule,
    state: parking_lot::Mutex<ReportState>,
    last_cron: parking_lot::Mutex<DateTime<Utc>>,
    shutdown: watch::Sender<bool>,
    watch_ids: parking_lot::Mutex<Vec<WatchId>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Report {
    pub(crate) fn new(
        shared: Arc<ServiceShared>,
        config: ReportConfig,
    ) -> Result<Arc<Self>, ReportError> {
        let schedule =
            Schedule::from_str(&config.frequency).map_err(|source| ReportError::InvalidFrequency {
                expression: config.frequency.clone(),
                source,
            })?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            shared,
            config,
            schedule,
            state: parking_lot::Mutex::new(ReportState::Idle),
            last_cron: parking_lot::Mutex::new(Utc::now()),
            shutdown,
            watch_ids: parking_lot::Mutex::new(Vec::new()),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ReportState {
        *self.state.lock()
    }

    /// Starts the filed-job watches and the cron timer.
    pub async fn start(self: &Arc<Self>) -> Result<(), ReportError> {
        {
            let mut state = self.state.lock();
            match *state {
                ReportState::Idle => *state = ReportState::Running,
                other => {
                    warn!(report = %self.config.name, ?other, "report not idle, ignoring start");
                    return Ok(());
                }
            }
        }

        let shared = &self.shared;
        let store = shared.store.clone();
        store
            .ensure(&shared.paths.report(&self.config.name), tree::jobs_tree())
            .await?;

        // Watch the filed-job subtrees: success, failure, and the typed
        // failure mirror (which carries the failure kind in its path). All
        // events funnel into one emitter task so the rows for a job's typed
        // and untyped filings never interleave.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RowEvent>();
        let sources = [
            (shared.paths.success(), JobStatus::Success, false),
            (shared.paths.failure(), JobStatus::Failure, false),
            (shared.paths.typed_failure(), JobStatus::Failure, true),
        ];
        for (path, status, typed) in sources {
            store.ensure(&path, tree::jobs_tree()).await?;
            let watch = store.watch(&path, None).await?;
            self.watch_ids.lock().push(watch.id);

            let name = self.config.name.clone();
            let tx = event_tx.clone();
            let mut shutdown = self.shutdown.subscribe();
            let mut changes = watch.changes;
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        change = changes.recv() => match change {
                            Some(change) if change.kind == ChangeKind::Merge => {
                                let _ = tx.send(RowEvent {
                                    status,
                                    typed,
                                    body: change.body,
                                });
                            }
                            Some(_) => {}
                            None => {
                                if !*shutdown.borrow() {
                                    error!(
                                        report = %name,
                                        "filed-job subscription collapsed; restart required"
                                    );
                                }
                                break;
                            }
                        }
                    }
                }
            });
            self.tasks.lock().push(handle);
        }
        drop(event_tx);

        let report = Arc::clone(self);
        let emitter = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                report
                    .handle_change(event.status, event.typed, &event.body)
                    .await;
            }
        });
        self.tasks.lock().push(emitter);

        *self.last_cron.lock() = Utc::now();
        self.tasks.lock().push(self.spawn_cron());

        info!(
            report = %self.config.name,
            frequency = %self.config.frequency,
            "report started"
        );
        Ok(())
    }

    fn spawn_cron(self: &Arc<Self>) -> JoinHandle<()> {
        let report = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(fire) = report.schedule.after(&now).next() else {
                    warn!(report = %report.config.name, "cron schedule has no future fire times");
                    break;
                };
                let wait = (fire - now).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(wait) => {
                        let window_start = *report.last_cron.lock();
                        match report.aggregate(window_start, fire).await {
                            Ok(rows) => {
                                debug!(report = %report.config.name, rows, "cron window aggregated");
                                *report.last_cron.lock() = fire;
                            }
                            // Watermark stays put so the window retries next fire.
                            Err(e) => error!(
                                report = %report.config.name,
                                error = %e,
                                "report aggregation failed"
                            ),
                        }
                    }
                }
            }
        })
    }

    /// Stops the watches and the timer; an in-flight cron handler completes.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != ReportState::Running {
                return;
            }
            *state = ReportState::Stopped;
        }
        let _ = self.shutdown.send(true);

        let ids: Vec<WatchId> = self.watch_ids.lock().drain(..).collect();
        for id in ids {
            if let Err(e) = self.shared.store.unwatch(id).await {
                warn!(report = %self.config.name, error = %e, "failed to unsubscribe watch");
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!(report = %self.config.name, "report stopped");
    }

    async fn handle_change(&self, status: JobStatus, typed: bool, body: &Value) {
        for item in collect_items(body, typed) {
            if let Err(e) = self
                .emit_row(status, item.kind.as_deref(), &item.date, &item.key, &item.link)
                .await
            {
                warn!(
                    report = %self.config.name,
                    key = %item.key,
                    error = %e,
                    "failed to emit report row"
                );
            }
        }
    }

    /// Writes the row for one filed job, applying the type and user filters.
    async fn emit_row(
        &self,
        status: JobStatus,
        fail_kind: Option<&str>,
        date: &str,
        key: &str,
        link: &Value,
    ) -> Result<(), ReportError> {
        let Some(oid) = link.get("_id").and_then(Value::as_str) else {
            debug!(key, "filed entry carries no link, ignoring");
            return Ok(());
        };
        let store = self.shared.store.as_ref();
        let job = Job::load(store, oid).await?;

        if let Some(types) = &self.config.types {
            if !types.iter().any(|t| *t == job.job_type) {
                return Ok(());
            }
        }
        if let Some(filter) = &self.config.filter {
            if !filter(&job) {
                return Ok(());
            }
        }

        let day_path = self.shared.paths.report_day(&self.config.name, date);
        let row_path = format!("{day_path}/{key}");

        // A typed failure is mirrored into both indexes. The typed event owns
        // the row; the untyped one only fills in when no row exists yet.
        if status == JobStatus::Failure && fail_kind.is_none() && store.exists(&row_path).await? {
            return Ok(());
        }

        let row = build_row(
            &self.config.job_mappings,
            &self.config.error_mappings,
            &job,
            status,
            fail_kind,
        );
        store.ensure(&day_path, tree::jobs_tree()).await?;
        store.put(&row_path, row, Some(tree::jobs_tree())).await?;
        debug!(report = %self.config.name, key, date, "report row written");
        Ok(())
    }
}

/// One merge body from a filed-job watch, funneled to the emitter task.
struct RowEvent {
    status: JobStatus,
    typed: bool,
    body: Value,
}

/// One filed-job item found in a change body.
struct FiledItem {
    kind: Option<String>,
    date: String,
    key: String,
    link: Value,
}

/// Extracts `(failKind?, date, jobKey, link)` tuples from a merge body on a
/// filed-job subtree. Typed bodies nest one level deeper, keyed by kind.
fn collect_items(body: &Value, typed: bool) -> Vec<FiledItem> {
    let mut items = Vec::new();
    if typed {
        let Some(kinds) = body.as_object() else {
            return items;
        };
        for (kind, node) in kinds {
            if META_KEYS.contains(&kind.as_str()) {
                continue;
            }
            day_index_items(node, Some(kind), &mut items);
        }
    } else {
        day_index_items(body, None, &mut items);
    }
    items
}

fn day_index_items(node: &Value, kind: Option<&str>, out: &mut Vec<FiledItem>) {
    let Some(days) = node.get("day-index").and_then(Value::as_object) else {
        return;
    };
    for (date, entries) in days {
        if META_KEYS.contains(&date.as_str()) {
            continue;
        }
        let Some(entries) = entries.as_object() else {
            continue;
        };
        for (key, link) in entries {
            if META_KEYS.contains(&key.as_str()) {
                continue;
            }
            out.push(FiledItem {
                kind: kind.map(str::to_string),
                date: date.clone(),
                key: key.clone(),
                link: link.clone(),
            });
        }
    }
}

/// Builds one report row from the column mappings.
///
/// Ordinary pointers resolve against the job document with RFC 6901
/// semantics, `""` for missing values. The [`ERROR_MAPPINGS_POINTER`] column
/// resolves `success` for successes and the failure kind (`unknown` when the
/// failure carries none) for failures, with fixed fallbacks.
pub(crate) fn build_row(
    job_mappings: &[(String, String)],
    error_mappings: &HashMap<String, String>,
    job: &Job,
    status: JobStatus,
    fail_kind: Option<&str>,
) -> Value {
    let mut row = Map::new();
    for (column, pointer) in job_mappings {
        let value = if pointer == ERROR_MAPPINGS_POINTER {
            match status {
                JobStatus::Success => error_mappings
                    .get("success")
                    .cloned()
                    .unwrap_or_else(|| "Success".to_string()),
                _ => error_mappings
                    .get(fail_kind.unwrap_or("unknown"))
                    .cloned()
                    .unwrap_or_else(|| "Other Error".to_string()),
            }
        } else {
            stringify(job.document().pointer(pointer))
        };
        row.insert(column.clone(), Value::String(value));
    }
    Value::Object(row)
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
