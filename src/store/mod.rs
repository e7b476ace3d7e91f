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

//! Store client abstraction.
//!
//! The job engine talks to a remote, append-mostly hierarchical document
//! store exclusively through the [`Store`] trait: document reads and writes,
//! change subscriptions on a document, and idempotent materialization of
//! container paths from a tree template. The wire protocol and authentication
//! live in external transport crates; this crate ships [`MemoryStore`], an
//! in-process backend used by tests and examples.

mod memory;
pub mod paths;
pub mod tree;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use paths::ServicePaths;

/// Identifier of an active change subscription.
pub type WatchId = Uuid;

/// A document read from the store: its body and the revision it was read at.
#[derive(Debug, Clone)]
pub struct Document {
    pub data: Value,
    pub rev: u64,
}

/// What a change event did to the watched document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Merge,
    Delete,
}

/// One change event on a watched document.
///
/// The body is the delta relative to the watched path. The core only
/// consumes `merge` bodies; `delete` and malformed bodies are logged and
/// ignored by consumers.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub body: Value,
    /// Revision of the document after this change.
    pub rev: u64,
}

/// An active change subscription and its event stream.
///
/// The channel is unbounded: the store side never drops or reorders events,
/// and consumers apply back-pressure by provisioning concurrency, not by
/// blocking the stream.
pub struct Watch {
    pub id: WatchId,
    pub changes: mpsc::UnboundedReceiver<Change>,
}

/// Connection parameters accepted by external store transports.
///
/// This crate does not implement the wire protocol; transports expose a
/// constructor taking these options and hand back an `Arc<dyn Store>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub domain: String,
    pub token: String,
}

/// Capability set the job engine requires from a document store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Checks that a document exists.
    async fn head(&self, path: &str) -> Result<(), StoreError>;

    /// Reads a document and the revision it was read at.
    async fn get(&self, path: &str) -> Result<Document, StoreError>;

    /// Merges `data` into the document at `path`, creating missing parents.
    ///
    /// When `tree` is given, created containers take their media types from
    /// the template. Returns the post-write revision.
    async fn put(&self, path: &str, data: Value, tree: Option<&Value>) -> Result<u64, StoreError>;

    /// Creates a new document under `path` and returns its location.
    async fn post(&self, path: &str, data: Value) -> Result<String, StoreError>;

    /// Deletes the document (or key) at `path`.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Subscribes to changes on the document at `path`.
    ///
    /// With `from_rev`, changes after that revision are replayed before live
    /// events so no change between read and subscribe is lost.
    async fn watch(&self, path: &str, from_rev: Option<u64>) -> Result<Watch, StoreError>;

    /// Tears down a change subscription.
    async fn unwatch(&self, id: WatchId) -> Result<(), StoreError>;

    /// Idempotently creates `path` and its intermediate containers following
    /// the media types in `tree`. Existing content is never overwritten.
    async fn ensure(&self, path: &str, tree: &Value) -> Result<(), StoreError>;

    /// Whether a document exists, treating only `NotFound` as absence.
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        match self.head(path).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Keys the store manages on every document; never job data.
pub const META_KEYS: [&str; 4] = ["_id", "_rev", "_meta", "_type"];

/// Splits a store path into segments, ignoring empty ones.
pub(crate) fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
