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

//! Finish reporters: pluggable post-terminal notifiers.
//!
//! A reporter configuration names a terminal status to fire on, a kind, and
//! kind-specific params. Kinds are an open set: handlers register on the
//! service under a kind name and the Runner dispatches through that table
//! after filing. Reporter failures are logged and never affect the job.
//!
//! One kind ships built in: [`WebhookReporter`] POSTs a chat-channel block
//! payload to `params.url`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ReporterError;
use crate::job::{Job, JobStatus};

/// Kind name of the built-in chat-channel webhook reporter.
pub const WEBHOOK_KIND: &str = "webhook";

/// One configured finish reporter.
#[derive(Debug, Clone)]
pub struct FinishReporter {
    /// Terminal status this reporter fires on.
    pub on: JobStatus,
    /// Handler kind, resolved through the service's dispatch table.
    pub kind: String,
    /// Kind-specific parameters, e.g. `{"url": "https://..."}`.
    pub params: Value,
}

/// Handler invoked for every finished job matching a reporter's status.
#[async_trait]
pub trait FinishHandler: Send + Sync {
    async fn report(
        &self,
        reporter: &FinishReporter,
        job: &Job,
        filed_path: &str,
        job_key: &str,
        status: JobStatus,
    ) -> Result<(), ReporterError>;
}

/// Chat-channel webhook reporter.
///
/// POSTs `{blocks: [...], attachments: [{blocks: [...]}]}` to the URL in the
/// reporter's params. The transport beyond this payload is the receiving
/// chat service's concern.
pub struct WebhookReporter {
    client: reqwest::Client,
}

impl WebhookReporter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Builds the block payload for one finalized job.
    pub fn payload(job: &Job, filed_path: &str, job_key: &str, status: JobStatus) -> Value {
        let headline = match status {
            JobStatus::Success => format!("Job {job_key} succeeded"),
            _ => format!("Job {job_key} failed"),
        };
        let result = job
            .result
            .as_ref()
            .and_then(|r| serde_json::to_string_pretty(r).ok())
            .unwrap_or_default();

        json!({
            "blocks": [{
                "type": "section",
                "text": { "type": "mrkdwn", "text": headline },
            }],
            "attachments": [{
                "blocks": [{
                    "type": "section",
                    "fields": [
                        { "type": "mrkdwn", "text": format!("*Service:* {}", job.service) },
                        { "type": "mrkdwn", "text": format!("*Type:* {}", job.job_type) },
                        { "type": "mrkdwn", "text": format!("*Filed at:* {filed_path}") },
                        { "type": "mrkdwn", "text": format!("*Result:*\n```{result}```") },
                    ],
                }],
            }],
        })
    }
}

impl Default for WebhookReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FinishHandler for WebhookReporter {
    async fn report(
        &self,
        reporter: &FinishReporter,
        job: &Job,
        filed_path: &str,
        job_key: &str,
        status: JobStatus,
    ) -> Result<(), ReporterError> {
        let url = reporter
            .params
            .get("url")
            .and_then(Value::as_str)
            .ok_or(ReporterError::MissingParam { param: "url" })?;

        let payload = Self::payload(job, filed_path, job_key, status);
        debug!(url, job_key, "posting finish webhook");
        self.client
            .post(url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
