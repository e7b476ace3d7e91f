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

//! Job lifecycle: discovery, execution, timeout enforcement, and filing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use oada_jobs::{JobError, MemoryStore, ServiceOpts, ServicePaths, Store};

use crate::fixtures::{
    filed_job, filed_oid, link_pending, post_document, post_job, test_service, wait_for, SERVICE,
};

#[tokio::test]
async fn success_job_is_filed_and_removed_from_pending() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({"success": true}))
    });

    let (key, _oid) = post_job(store.as_ref(), SERVICE, "basic", json!({"do": "success"})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    let pending_entry = paths.pending_entry(&key);
    wait_for("pending entry removal", || {
        let store = store.clone();
        let path = pending_entry.clone();
        async move { !store.exists(&path).await.unwrap() }
    })
    .await;

    let job = filed_job(store.as_ref(), &paths.success(), &key)
        .await
        .expect("job filed under success day index");
    assert_eq!(job["status"], "success");
    assert_eq!(job["result"], json!({"success": true}));

    // The failure index never saw it.
    assert!(filed_oid(store.as_ref(), &paths.failure(), &key).await.is_none());

    service.stop().await;
}

#[tokio::test]
async fn worker_error_files_failure_with_message() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |job, _ctx| async move {
        if job.config["do"] == "fail" {
            return Err(JobError::new("nope"));
        }
        Ok(json!({"success": true}))
    });

    let (key, _oid) = post_job(store.as_ref(), SERVICE, "basic", json!({"do": "fail"})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    wait_for("failure filing", || {
        let store = store.clone();
        let root = paths.failure();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    let job = filed_job(store.as_ref(), &paths.failure(), &key).await.unwrap();
    assert_eq!(job["status"], "failure");
    assert_eq!(job["result"]["message"], "nope");
    assert!(!store.exists(&paths.pending_entry(&key)).await.unwrap());

    service.stop().await;
}

#[tokio::test]
async fn invalid_job_document_is_filed_as_failure() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({}))
    });

    let (key, _oid) =
        post_document(store.as_ref(), SERVICE, json!({"thisis": "not a valid job"})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    wait_for("invalid job filed as failure", || {
        let store = store.clone();
        let root = paths.failure();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    let job = filed_job(store.as_ref(), &paths.failure(), &key).await.unwrap();
    assert_eq!(job["status"], "failure");
    assert_eq!(job["result"], json!({}));

    service.stop().await;
}

#[tokio::test]
async fn missing_worker_files_failure_with_kind() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    // No worker registered for "unhandled".

    let (key, _oid) = post_job(store.as_ref(), SERVICE, "unhandled", json!({})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    let typed_root = format!("{}/no-worker", paths.typed_failure());
    wait_for("typed no-worker filing", || {
        let store = store.clone();
        let root = typed_root.clone();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    let job = filed_job(store.as_ref(), &paths.failure(), &key).await.unwrap();
    assert_eq!(job["status"], "failure");
    assert_eq!(job["result"]["name"], "NoWorkerError");

    service.stop().await;
}

#[tokio::test]
async fn slow_worker_times_out() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("slow", Duration::from_millis(200), |_job, _ctx| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!({"never": "returned"}))
    });

    let (key, _oid) = post_job(store.as_ref(), SERVICE, "slow", json!({})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    let typed_root = format!("{}/timeout", paths.typed_failure());
    wait_for("timeout filing", || {
        let store = store.clone();
        let root = typed_root.clone();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    let job = filed_job(store.as_ref(), &paths.failure(), &key).await.unwrap();
    assert_eq!(job["status"], "failure");
    assert_eq!(job["result"]["name"], "TimeoutError");

    service.stop().await;
}

#[tokio::test]
async fn worker_failure_kind_mirrors_into_typed_index() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("flaky", Duration::from_secs(5), |_job, _ctx| async {
        Err(JobError::new("flaked").with_kind("flaky-kind"))
    });

    let (key, oid) = post_job(store.as_ref(), SERVICE, "flaky", json!({})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    let typed_root = format!("{}/flaky-kind", paths.typed_failure());
    wait_for("typed failure mirror", || {
        let store = store.clone();
        let root = typed_root.clone();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    // Mirrored in both indexes, pointing at the same document.
    let untyped = filed_oid(store.as_ref(), &paths.failure(), &key).await.unwrap();
    let typed = filed_oid(store.as_ref(), &typed_root, &key).await.unwrap();
    assert_eq!(untyped, oid);
    assert_eq!(typed, oid);

    service.stop().await;
}

#[tokio::test]
async fn worker_result_round_trips() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    let result = json!({"nested": {"list": [1, 2, 3]}, "flag": true, "note": "done"});
    let returned = result.clone();
    service.on_fn("echo", Duration::from_secs(5), move |_job, _ctx| {
        let returned = returned.clone();
        async move { Ok(returned) }
    });

    let (key, _oid) = post_job(store.as_ref(), SERVICE, "echo", json!({})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    wait_for("echo job filed", || {
        let store = store.clone();
        let root = paths.success();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    let job = filed_job(store.as_ref(), &paths.success(), &key).await.unwrap();
    assert_eq!(job["result"], result);

    service.stop().await;
}

#[tokio::test]
async fn reobserved_terminal_job_refiles_idempotently() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({"success": true}))
    });

    let (key, oid) = post_job(store.as_ref(), SERVICE, "basic", json!({})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    wait_for("first filing", || {
        let store = store.clone();
        let root = paths.success();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    // Re-link the same terminal job under pending; the Runner short-circuits
    // back through filing without re-running the worker.
    link_pending(store.as_ref(), SERVICE, &key, &oid).await;
    wait_for("re-observed entry removed again", || {
        let store = store.clone();
        let path = paths.pending_entry(&key);
        async move { !store.exists(&path).await.unwrap() }
    })
    .await;

    let job = filed_job(store.as_ref(), &paths.success(), &key).await.unwrap();
    assert_eq!(job["status"], "success");
    assert_eq!(job["result"], json!({"success": true}), "result unchanged");
    assert!(filed_oid(store.as_ref(), &paths.failure(), &key).await.is_none());

    service.stop().await;
}

#[tokio::test]
async fn updates_log_records_lifecycle_in_order() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("chatty", Duration::from_secs(5), |_job, ctx| async move {
        ctx.updates.info("working", json!({"step": 1})).await?;
        Ok(json!({}))
    });

    let (key, oid) = post_job(store.as_ref(), SERVICE, "chatty", json!({})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    wait_for("chatty job filed", || {
        let store = store.clone();
        let root = paths.success();
        let key = key.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    let doc = store.get(&format!("/{oid}/updates")).await.unwrap();
    let entries = doc.data.as_object().unwrap();
    let mut keys: Vec<&String> = entries.keys().collect();
    keys.sort();
    let statuses: Vec<&str> = keys
        .iter()
        .map(|k| entries[k.as_str()]["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["started", "working", "success"]);

    service.stop().await;
}

#[tokio::test]
async fn skip_queue_on_startup_leaves_existing_entries() {
    let store = Arc::new(MemoryStore::new());
    let opts = ServiceOpts {
        skip_queue_on_startup: true,
        ..Default::default()
    };
    let service = test_service(store.clone(), opts);
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({}))
    });

    let (existing, _oid) = post_job(store.as_ref(), SERVICE, "basic", json!({})).await;
    service.start().await.unwrap();

    // A job posted after start still runs.
    let (fresh, _oid) = post_job(store.as_ref(), SERVICE, "basic", json!({})).await;
    let paths = ServicePaths::new(SERVICE);
    wait_for("fresh job filed", || {
        let store = store.clone();
        let root = paths.success();
        let key = fresh.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    // The pre-existing entry was never dispatched.
    assert!(store.exists(&paths.pending_entry(&existing)).await.unwrap());
    assert!(filed_oid(store.as_ref(), &paths.success(), &existing).await.is_none());

    service.stop().await;
}

#[tokio::test]
async fn stop_drains_in_flight_runners() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("slowish", Duration::from_secs(5), |_job, _ctx| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!({"done": true}))
    });

    let (key, oid) = post_job(store.as_ref(), SERVICE, "slowish", json!({})).await;
    service.start().await.unwrap();

    // Wait until the Runner has actually started the worker.
    wait_for("runner started", || {
        let store = store.clone();
        let path = format!("/{oid}/updates");
        async move {
            store
                .get(&path)
                .await
                .map(|d| !d.data.as_object().map(|m| m.is_empty()).unwrap_or(true))
                .unwrap_or(false)
        }
    })
    .await;

    // Stop must wait for the in-flight Runner to file the job.
    service.stop().await;

    let paths = ServicePaths::new(SERVICE);
    let job = filed_job(store.as_ref(), &paths.success(), &key)
        .await
        .expect("in-flight job completed during stop");
    assert_eq!(job["status"], "success");
    assert!(!store.exists(&paths.pending_entry(&key)).await.unwrap());
}

#[tokio::test]
async fn dangling_pending_link_does_not_stop_the_queue() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({}))
    });

    // A pending entry whose link points at nothing is filed as an invalid
    // failure; the queue keeps consuming.
    let key = oada_jobs::keys::new_key();
    link_pending(store.as_ref(), SERVICE, &key, "resources/does-not-exist").await;

    service.start().await.unwrap();

    let (good, _oid) = post_job(store.as_ref(), SERVICE, "basic", json!({})).await;
    let paths = ServicePaths::new(SERVICE);
    wait_for("later job still processed", || {
        let store = store.clone();
        let root = paths.success();
        let key = good.clone();
        async move { filed_oid(store.as_ref(), &root, &key).await.is_some() }
    })
    .await;

    service.stop().await;
}

#[tokio::test]
async fn finish_reporter_receives_terminal_jobs() {
    use async_trait::async_trait;
    use oada_jobs::{FinishHandler, FinishReporter, Job, JobStatus, ReporterError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, JobStatus)>>,
    }

    #[async_trait]
    impl FinishHandler for Recorder {
        async fn report(
            &self,
            _reporter: &FinishReporter,
            _job: &Job,
            _filed_path: &str,
            job_key: &str,
            status: JobStatus,
        ) -> Result<(), ReporterError> {
            self.seen.lock().unwrap().push((job_key.to_string(), status));
            Ok(())
        }
    }

    let store = Arc::new(MemoryStore::new());
    let opts = ServiceOpts {
        finish_reporters: vec![FinishReporter {
            on: JobStatus::Failure,
            kind: "recorder".to_string(),
            params: json!({}),
        }],
        ..Default::default()
    };
    let service = test_service(store.clone(), opts);
    let recorder = Arc::new(Recorder::default());
    service.register_reporter_kind("recorder", recorder.clone());

    service.on_fn("mixed", Duration::from_secs(5), |job, _ctx| async move {
        if job.config["do"] == "fail" {
            return Err(JobError::new("boom"));
        }
        Ok(json!({}))
    });

    let (ok_key, _) = post_job(store.as_ref(), SERVICE, "mixed", json!({"do": "ok"})).await;
    let (bad_key, _) = post_job(store.as_ref(), SERVICE, "mixed", json!({"do": "fail"})).await;
    service.start().await.unwrap();

    let paths = ServicePaths::new(SERVICE);
    wait_for("both jobs filed", || {
        let store = store.clone();
        let success = paths.success();
        let failure = paths.failure();
        let ok_key = ok_key.clone();
        let bad_key = bad_key.clone();
        async move {
            filed_oid(store.as_ref(), &success, &ok_key).await.is_some()
                && filed_oid(store.as_ref(), &failure, &bad_key).await.is_some()
        }
    })
    .await;
    service.stop().await;

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(bad_key, JobStatus::Failure)]);
}
