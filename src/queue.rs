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

//! Queue: watches one service's pending-jobs list and dispatches Runners.
//!
//! The change-stream consumer is a detached task that never blocks, drops, or
//! reorders events: submissions flow through an unbounded channel into a
//! dispatcher that acquires a semaphore permit before spawning each Runner,
//! bounding concurrency without back-pressuring the subscription. On startup
//! the pre-existing pending entries take the same dispatch path as live
//! merges unless skipped.
//!
//! The consumer loop exiting without a shutdown signal means the subscription
//! collapsed; that is logged as an error and should be treated as a restart
//! condition, never as normal termination.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::job::Job;
use crate::metrics;
use crate::runner::Runner;
use crate::service::ServiceShared;
use crate::store::{tree, ChangeKind, WatchId, META_KEYS};

/// One observed pending entry: its key and the linked job document.
struct JobRef {
    key: String,
    oid: String,
}

/// Per-service pending-list consumer with a bounded executor.
pub(crate) struct Queue {
    shared: Arc<ServiceShared>,
    id: Uuid,
    shutdown: watch::Sender<bool>,
    watch_id: parking_lot::Mutex<Option<WatchId>>,
    consumer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Queue {
    pub(crate) fn new(shared: Arc<ServiceShared>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared,
            id: Uuid::new_v4(),
            shutdown,
            watch_id: parking_lot::Mutex::new(None),
            consumer: parking_lot::Mutex::new(None),
            dispatcher: parking_lot::Mutex::new(None),
        }
    }

    /// Starts watching the pending list.
    ///
    /// Failure of the initial read is fatal; transient errors on individual
    /// jobs afterwards never stop the queue.
    pub(crate) async fn start(&self, skip_existing: bool) -> Result<(), ServiceError> {
        let shared = &self.shared;
        let store = shared.store.clone();
        let pending = shared.paths.pending();

        for path in [
            pending.clone(),
            shared.paths.success(),
            shared.paths.failure(),
        ] {
            store.ensure(&path, tree::jobs_tree()).await?;
        }

        let doc = store
            .get(&pending)
            .await
            .map_err(|source| ServiceError::PendingUnavailable { source })?;
        let watch = store.watch(&pending, Some(doc.rev)).await?;
        *self.watch_id.lock() = Some(watch.id);

        info!(
            service = %shared.name,
            queue = %self.id,
            rev = doc.rev,
            concurrency = shared.concurrency,
            "queue started"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<JobRef>();

        // Change-stream consumer: a detached task feeding the dispatcher.
        let consumer_tx = tx.clone();
        let mut consumer_shutdown = self.shutdown.subscribe();
        let mut changes = watch.changes;
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = consumer_shutdown.changed() => {
                        if changed.is_err() || *consumer_shutdown.borrow() {
                            break;
                        }
                    }
                    change = changes.recv() => match change {
                        Some(change) => match change.kind {
                            ChangeKind::Merge => enqueue_body(&consumer_tx, &change.body),
                            ChangeKind::Delete => {
                                debug!(rev = change.rev, "ignoring delete change on pending list");
                            }
                        },
                        None => {
                            if !*consumer_shutdown.borrow() {
                                error!("pending change subscription collapsed; restart required");
                            }
                            break;
                        }
                    }
                }
            }
        });
        *self.consumer.lock() = Some(consumer);

        // Dispatcher: bounded-concurrency executor over the submission channel.
        let semaphore = Arc::new(Semaphore::new(shared.concurrency));
        let concurrency = shared.concurrency;
        let dispatcher_shared = shared.clone();
        let mut dispatcher_shutdown = self.shutdown.subscribe();
        let dispatcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = dispatcher_shutdown.changed() => {
                        if changed.is_err() || *dispatcher_shutdown.borrow() {
                            break;
                        }
                    }
                    job = rx.recv() => match job {
                        Some(job_ref) => {
                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                break;
                            };
                            // Stop may have been signaled while waiting for a slot.
                            if *dispatcher_shutdown.borrow() {
                                break;
                            }
                            let shared = dispatcher_shared.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                run_one(shared, job_ref).await;
                            });
                        }
                        None => break,
                    }
                }
            }
            // Drain: wait for every in-flight Runner before reporting stopped.
            let _ = semaphore.acquire_many(concurrency as u32).await;
        });
        *self.dispatcher.lock() = Some(dispatcher);

        if skip_existing {
            info!(service = %shared.name, "skipping pre-existing pending entries");
        } else {
            enqueue_body(&tx, &doc.data);
        }

        Ok(())
    }

    /// Unsubscribes and drains in-flight Runners before returning.
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let watch_id = self.watch_id.lock().take();
        if let Some(id) = watch_id {
            if let Err(e) = self.shared.store.unwatch(id).await {
                warn!(queue = %self.id, error = %e, "failed to unsubscribe pending watch");
            }
        }

        let consumer = self.consumer.lock().take();
        if let Some(handle) = consumer {
            let _ = handle.await;
        }
        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }
        info!(service = %self.shared.name, queue = %self.id, "queue stopped");
    }
}

/// Dispatches every linked entry of one change body or initial snapshot.
fn enqueue_body(tx: &UnboundedSender<JobRef>, body: &Value) {
    let Some(entries) = body.as_object() else {
        warn!("ignoring malformed pending change body");
        return;
    };
    for (key, entry) in entries {
        if META_KEYS.contains(&key.as_str()) {
            continue;
        }
        match entry.get("_id").and_then(Value::as_str) {
            Some(oid) => {
                let _ = tx.send(JobRef {
                    key: key.clone(),
                    oid: oid.to_string(),
                });
            }
            None => debug!(key = %key, "pending entry carries no link, ignoring"),
        }
    }
}

/// Loads the job document and runs it; errors are logged and the pending
/// entry is left in place for the next observation.
async fn run_one(shared: Arc<ServiceShared>, job_ref: JobRef) {
    match Job::load(shared.store.as_ref(), &job_ref.oid).await {
        Ok(job) => {
            metrics::adjust(&shared.name, &job.job_type, metrics::JobState::Queued, 1.0);
            let runner = Runner::new(shared, job_ref.key.clone(), job);
            if let Err(e) = runner.run().await {
                error!(
                    key = %job_ref.key,
                    error = %e,
                    "job filing failed; entry remains pending for retry"
                );
            }
        }
        Err(e) => {
            error!(
                key = %job_ref.key,
                oid = %job_ref.oid,
                error = %e,
                "failed to load job document; entry remains pending for retry"
            );
        }
    }
}
