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

//! In-process [`Store`] backend.
//!
//! Holds the whole document tree as one JSON value behind a mutex, with a
//! global revision counter, a change log for `from_rev` replay, and per-watch
//! fan-out of nested merge bodies. Intended for tests and examples; a real
//! deployment points the service at a remote store through a transport crate.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::{segments, tree, Change, ChangeKind, Document, Store, Watch, WatchId};
use crate::error::StoreError;
use crate::keys;

struct WatchEntry {
    segments: Vec<String>,
    tx: mpsc::UnboundedSender<Change>,
}

struct LoggedChange {
    rev: u64,
    segments: Vec<String>,
    kind: ChangeKind,
    data: Value,
}

struct Inner {
    root: Value,
    rev: u64,
    // Retained for the life of the store so watches can replay from any rev.
    log: Vec<LoggedChange>,
    watches: HashMap<WatchId, WatchEntry>,
}

/// In-memory document store with change subscriptions.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                root: Value::Object(Map::new()),
                rev: 0,
                log: Vec::new(),
                watches: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve<'a>(root: &'a Value, segs: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object()?.get(seg)?;
    }
    Some(node)
}

fn deep_merge(dst: &mut Value, src: &Value) {
    match (dst.as_object_mut(), src.as_object()) {
        (Some(dst_map), Some(src_map)) => {
            for (key, value) in src_map {
                match dst_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        dst_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        _ => *dst = src.clone(),
    }
}

/// Wraps a value in nested single-key objects for each path segment.
fn nest(rel: &[String], value: Value) -> Value {
    rel.iter().rev().fold(value, |acc, seg| {
        let mut map = Map::new();
        map.insert(seg.clone(), acc);
        Value::Object(map)
    })
}

fn is_prefix(prefix: &[String], full: &[String]) -> bool {
    full.len() >= prefix.len() && prefix == &full[..prefix.len()]
}

/// Builds the change body a watcher at `watch_segs` sees for a change at
/// `change_segs`, or `None` when the change is outside the watched subtree.
fn body_for(
    watch_segs: &[String],
    change_segs: &[String],
    kind: ChangeKind,
    data: &Value,
) -> Option<Value> {
    if is_prefix(watch_segs, change_segs) {
        let rel = &change_segs[watch_segs.len()..];
        return Some(nest(rel, data.clone()));
    }
    // A write above the watched node covers it when the body reaches down to it.
    if is_prefix(change_segs, watch_segs) && kind == ChangeKind::Merge {
        let rel = &watch_segs[change_segs.len()..];
        let mut node = data;
        for seg in rel {
            node = node.as_object()?.get(seg)?;
        }
        return Some(node.clone());
    }
    None
}

impl Inner {
    fn record(&mut self, segs: Vec<String>, kind: ChangeKind, data: Value) -> u64 {
        self.rev += 1;
        let rev = self.rev;

        let mut dead = Vec::new();
        for (id, watch) in &self.watches {
            if let Some(body) = body_for(&watch.segments, &segs, kind, &data) {
                let change = Change { kind, body, rev };
                if watch.tx.send(change).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.watches.remove(&id);
        }

        self.log.push(LoggedChange {
            rev,
            segments: segs,
            kind,
            data,
        });
        rev
    }

    /// Creates missing parents of `segs`, taking `_type` from the template.
    fn materialize(
        &mut self,
        segs: &[String],
        template: Option<&Value>,
    ) -> Result<&mut Value, StoreError> {
        let mut node = &mut self.root;
        for depth in 0..segs.len() {
            let seg = &segs[depth];
            let map = node.as_object_mut().ok_or_else(|| StoreError::Request {
                path: format!("/{}", segs[..depth].join("/")),
                message: "not a container".to_string(),
            })?;
            let media_type = template.and_then(|tree| {
                let prefix: Vec<&str> = segs[..=depth].iter().map(String::as_str).collect();
                tree::media_type(tree, &prefix)
            });
            node = map.entry(seg.clone()).or_insert_with(|| {
                let mut child = Map::new();
                if let Some(media_type) = media_type {
                    child.insert("_type".to_string(), Value::String(media_type.to_string()));
                }
                Value::Object(child)
            });
        }
        Ok(node)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn head(&self, path: &str) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        match resolve(&inner.root, &segments(path)) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    async fn get(&self, path: &str) -> Result<Document, StoreError> {
        let inner = self.inner.lock();
        let data = resolve(&inner.root, &segments(path))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })?;
        Ok(Document {
            data,
            rev: inner.rev,
        })
    }

    async fn put(&self, path: &str, data: Value, tree: Option<&Value>) -> Result<u64, StoreError> {
        let segs = segments(path);
        if segs.is_empty() {
            return Err(StoreError::Request {
                path: path.to_string(),
                message: "cannot put the root".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        let target = inner.materialize(&segs, tree)?;
        deep_merge(target, &data);
        let rev = inner.record(segs, ChangeKind::Merge, data);
        trace!(path, rev, "memory store put");
        Ok(rev)
    }

    async fn post(&self, path: &str, data: Value) -> Result<String, StoreError> {
        let mut segs = segments(path);
        let key = keys::new_key();
        segs.push(key);
        let location = format!("/{}", segs.join("/"));

        let mut inner = self.inner.lock();
        let target = inner.materialize(&segs, None)?;
        *target = data.clone();
        inner.record(segs, ChangeKind::Merge, data);
        trace!(location = %location, "memory store post");
        Ok(location)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let segs = segments(path);
        let Some((leaf, parent_segs)) = segs.split_last() else {
            return Err(StoreError::Request {
                path: path.to_string(),
                message: "cannot delete the root".to_string(),
            });
        };
        let mut inner = self.inner.lock();
        let removed = resolve_mut(&mut inner.root, parent_segs)
            .and_then(Value::as_object_mut)
            .map(|map| map.remove(leaf).is_some())
            .unwrap_or(false);
        // Deleting an absent key is a no-op, matching the store's semantics.
        if removed {
            inner.record(segs, ChangeKind::Delete, Value::Null);
        }
        Ok(())
    }

    async fn watch(&self, path: &str, from_rev: Option<u64>) -> Result<Watch, StoreError> {
        let watch_segs = segments(path);
        let (tx, changes) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut inner = self.inner.lock();
        if let Some(from) = from_rev {
            for logged in inner.log.iter().filter(|c| c.rev > from) {
                if let Some(body) =
                    body_for(&watch_segs, &logged.segments, logged.kind, &logged.data)
                {
                    let _ = tx.send(Change {
                        kind: logged.kind,
                        body,
                        rev: logged.rev,
                    });
                }
            }
        }
        inner.watches.insert(
            id,
            WatchEntry {
                segments: watch_segs,
                tx,
            },
        );
        Ok(Watch { id, changes })
    }

    async fn unwatch(&self, id: WatchId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner
            .watches
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::UnknownWatch { id })
    }

    async fn ensure(&self, path: &str, tree: &Value) -> Result<(), StoreError> {
        let segs = segments(path);
        let mut inner = self.inner.lock();
        // Container scaffolding only; no change events for lazily created levels.
        inner.materialize(&segs, Some(tree))?;
        Ok(())
    }
}

fn resolve_mut<'a>(root: &'a mut Value, segs: &[String]) -> Option<&'a mut Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object_mut()?.get_mut(seg)?;
    }
    Some(node)
}
