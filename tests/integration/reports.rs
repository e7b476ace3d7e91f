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

//! Reports: row emission per finished job and cron-driven email aggregation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;

use oada_jobs::{
    EmailAddress, EmailConfig, JobError, MemoryStore, ReportConfig, ServiceOpts, ServicePaths,
    Store, ERROR_MAPPINGS_POINTER,
};

use crate::fixtures::{
    filed_oid, pending_entries, post_job, report_row, test_service, wait_for, SERVICE,
};

const EMAIL_SERVICE: &str = "email-service";

/// A report over the standard three-column mapping used by these tests.
fn report_config(frequency: &str, send_empty: bool) -> ReportConfig {
    ReportConfig {
        name: "r".to_string(),
        frequency: frequency.to_string(),
        email_service: EMAIL_SERVICE.to_string(),
        email: Arc::new(|| EmailConfig {
            from: "jobs@example.org".to_string(),
            to: EmailAddress {
                name: "Operators".to_string(),
                email: "ops@example.org".to_string(),
            },
            subject: "Job report".to_string(),
            text: Some("Rows attached.".to_string()),
            attachments: Vec::new(),
        }),
        job_mappings: vec![
            ("One".to_string(), "/config/first".to_string()),
            ("Two".to_string(), "/config/second".to_string()),
            ("Status".to_string(), ERROR_MAPPINGS_POINTER.to_string()),
        ],
        error_mappings: HashMap::from([
            ("success".to_string(), "OK".to_string()),
            ("unknown".to_string(), "Other".to_string()),
            ("flaky-kind".to_string(), "Flaky".to_string()),
        ]),
        types: None,
        filter: None,
        send_empty,
    }
}

/// A cron expression that never fires during a test run (Jan 1, midnight).
const YEARLY: &str = "0 0 0 1 1 *";

#[tokio::test]
async fn success_job_produces_mapped_row() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({"success": true}))
    });
    service.add_report(report_config(YEARLY, false)).unwrap();
    service.start().await.unwrap();

    let (key, _oid) = post_job(
        store.as_ref(),
        SERVICE,
        "basic",
        json!({"first": "a", "second": "b"}),
    )
    .await;

    wait_for("success report row", || {
        let store = store.clone();
        let key = key.clone();
        async move { report_row(store.as_ref(), SERVICE, "r", &key).await.is_some() }
    })
    .await;

    let row = report_row(store.as_ref(), SERVICE, "r", &key).await.unwrap();
    assert_eq!(row, json!({"One": "a", "Two": "b", "Status": "OK"}));

    service.stop().await;
}

#[tokio::test]
async fn failure_with_unknown_kind_maps_through_unknown() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Err(JobError::new("nope"))
    });
    service.add_report(report_config(YEARLY, false)).unwrap();
    service.start().await.unwrap();

    let (key, _oid) = post_job(
        store.as_ref(),
        SERVICE,
        "basic",
        json!({"first": "x", "second": "y"}),
    )
    .await;

    wait_for("failure report row", || {
        let store = store.clone();
        let key = key.clone();
        async move { report_row(store.as_ref(), SERVICE, "r", &key).await.is_some() }
    })
    .await;

    let row = report_row(store.as_ref(), SERVICE, "r", &key).await.unwrap();
    assert_eq!(row, json!({"One": "x", "Two": "y", "Status": "Other"}));

    service.stop().await;
}

#[tokio::test]
async fn typed_failure_row_wins_over_untyped_mirror() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("flaky", Duration::from_secs(5), |_job, _ctx| async {
        Err(JobError::new("flaked").with_kind("flaky-kind"))
    });
    service.add_report(report_config(YEARLY, false)).unwrap();
    service.start().await.unwrap();

    let (key, _oid) = post_job(
        store.as_ref(),
        SERVICE,
        "flaky",
        json!({"first": "x", "second": "y"}),
    )
    .await;

    wait_for("typed failure row has mapped status", || {
        let store = store.clone();
        let key = key.clone();
        async move {
            report_row(store.as_ref(), SERVICE, "r", &key)
                .await
                .map(|row| row["Status"] == "Flaky")
                .unwrap_or(false)
        }
    })
    .await;

    service.stop().await;
}

#[tokio::test]
async fn type_filter_drops_other_jobs() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("wanted", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({}))
    });
    service.on_fn("ignored", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({}))
    });
    let mut config = report_config(YEARLY, false);
    config.types = Some(vec!["wanted".to_string()]);
    service.add_report(config).unwrap();
    service.start().await.unwrap();

    let (wanted, _) = post_job(store.as_ref(), SERVICE, "wanted", json!({"first": "w"})).await;
    let (ignored, _) = post_job(store.as_ref(), SERVICE, "ignored", json!({"first": "i"})).await;

    let paths = ServicePaths::new(SERVICE);
    wait_for("both jobs filed", || {
        let store = store.clone();
        let root = paths.success();
        let wanted = wanted.clone();
        let ignored = ignored.clone();
        async move {
            filed_oid(store.as_ref(), &root, &wanted).await.is_some()
                && filed_oid(store.as_ref(), &root, &ignored).await.is_some()
        }
    })
    .await;

    wait_for("wanted row written", || {
        let store = store.clone();
        let key = wanted.clone();
        async move { report_row(store.as_ref(), SERVICE, "r", &key).await.is_some() }
    })
    .await;
    assert!(report_row(store.as_ref(), SERVICE, "r", &ignored).await.is_none());

    service.stop().await;
}

#[tokio::test]
async fn cron_fire_posts_email_job_with_csv_attachment() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.on_fn("basic", Duration::from_secs(5), |_job, _ctx| async {
        Ok(json!({"success": true}))
    });
    // Fire every second so the test observes an aggregation quickly.
    service.add_report(report_config("* * * * * *", false)).unwrap();
    service.start().await.unwrap();

    // Posted after start so the row key falls inside the cron window.
    let (key, _oid) = post_job(
        store.as_ref(),
        SERVICE,
        "basic",
        json!({"first": "a", "second": "b"}),
    )
    .await;

    wait_for("row written", || {
        let store = store.clone();
        let key = key.clone();
        async move { report_row(store.as_ref(), SERVICE, "r", &key).await.is_some() }
    })
    .await;

    wait_for("email job linked downstream", || {
        let store = store.clone();
        async move { !pending_entries(store.as_ref(), EMAIL_SERVICE).await.is_empty() }
    })
    .await;

    let entries = pending_entries(store.as_ref(), EMAIL_SERVICE).await;
    let oid = entries[0].1["_id"].as_str().unwrap();
    let email_job = store.get(&format!("/{oid}")).await.unwrap().data;

    assert_eq!(email_job["service"], EMAIL_SERVICE);
    assert_eq!(email_job["type"], "email");
    assert_eq!(email_job["config"]["subject"], "Job report");
    assert_eq!(email_job["config"]["to"]["email"], "ops@example.org");

    let attachment = &email_job["config"]["attachments"][0];
    assert_eq!(attachment["type"], "text/csv");
    let csv = BASE64.decode(attachment["content"].as_str().unwrap()).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert!(csv.starts_with("One,Two,Status\n"), "unexpected CSV: {csv}");
    assert!(csv.contains("a,b,OK"));

    service.stop().await;
}

#[tokio::test]
async fn empty_window_sends_nothing_by_default() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.add_report(report_config("* * * * * *", false)).unwrap();
    service.start().await.unwrap();

    // Let the cron fire a couple of times with zero rows.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(pending_entries(store.as_ref(), EMAIL_SERVICE).await.is_empty());

    service.stop().await;
}

#[tokio::test]
async fn empty_window_sends_when_send_empty_is_set() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    service.add_report(report_config("* * * * * *", true)).unwrap();
    service.start().await.unwrap();

    wait_for("empty report email", || {
        let store = store.clone();
        async move { !pending_entries(store.as_ref(), EMAIL_SERVICE).await.is_empty() }
    })
    .await;

    let entries = pending_entries(store.as_ref(), EMAIL_SERVICE).await;
    let oid = entries[0].1["_id"].as_str().unwrap();
    let email_job = store.get(&format!("/{oid}")).await.unwrap().data;
    let csv = BASE64
        .decode(email_job["config"]["attachments"][0]["content"].as_str().unwrap())
        .unwrap();
    assert_eq!(String::from_utf8(csv).unwrap(), "One,Two,Status\n");

    service.stop().await;
}

#[tokio::test]
async fn invalid_frequency_is_rejected_at_registration() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store.clone(), ServiceOpts::default());
    let result = service.add_report(report_config("not a cron", false));
    assert!(result.is_err());
}
