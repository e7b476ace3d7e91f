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

//! Cron-window aggregation: rows -> CSV -> email-send job.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{Attachment, Report};
use crate::error::{ReportError, StoreError};
use crate::keys;
use crate::store::{tree, ServicePaths, META_KEYS};

impl Report {
    /// Aggregates the rows in `[window_start, window_end)` and posts the
    /// email-send job downstream. Returns the number of rows included.
    pub(crate) async fn aggregate(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<usize, ReportError> {
        let rows = self.collect_rows(window_start, window_end).await?;
        if rows.is_empty() && !self.config.send_empty {
            debug!(report = %self.config.name, "no rows in window, skipping email");
            return Ok(0);
        }

        let csv = render_csv(&self.config.job_mappings, &rows)?;
        let content = BASE64.encode(csv.as_bytes());

        let mut email = (self.config.email)();
        if email.attachments.is_empty() {
            email.attachments.push(Attachment {
                filename: format!("{}-{}.csv", self.config.name, window_end.format("%Y-%m-%d")),
                content_type: "text/csv".to_string(),
                content: String::new(),
            });
        }
        email.attachments[0].content = content;

        let email_job = json!({
            "service": self.config.email_service,
            "type": "email",
            "config": serde_json::to_value(&email)?,
        });

        let store = self.shared.store.as_ref();
        let location = store.post("/resources", email_job).await?;
        let oid = location.trim_start_matches('/').to_string();

        let downstream = ServicePaths::new(&self.config.email_service);
        let key = keys::new_key();
        store.ensure(&downstream.pending(), tree::jobs_tree()).await?;
        store
            .put(
                &downstream.pending_entry(&key),
                json!({ "_id": oid }),
                Some(tree::jobs_tree()),
            )
            .await?;

        info!(
            report = %self.config.name,
            rows = rows.len(),
            email_service = %self.config.email_service,
            "report email job posted"
        );
        Ok(rows.len())
    }

    /// Reads the day indexes overlapping the window, in day order, keeping
    /// entries whose key timestamp lies before midnight of the day after
    /// their index date (late-write exclusion).
    async fn collect_rows(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<(String, Map<String, Value>)>, ReportError> {
        let mut rows = Vec::new();
        if window_end <= window_start {
            return Ok(rows);
        }

        let store = self.shared.store.as_ref();
        let mut day = window_start.date_naive();
        let last_day = (window_end - chrono::Duration::nanoseconds(1)).date_naive();

        while day <= last_day {
            let day_str = day.format("%Y-%m-%d").to_string();
            let path = self.shared.paths.report_day(&self.config.name, &day_str);
            let next_midnight = day
                .succ_opt()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc());

            match store.get(&path).await {
                Ok(doc) => {
                    if let (Some(entries), Some(midnight)) = (doc.data.as_object(), next_midnight) {
                        let mut day_rows: Vec<(String, Map<String, Value>)> = entries
                            .iter()
                            .filter(|(key, _)| !META_KEYS.contains(&key.as_str()))
                            .filter_map(|(key, value)| {
                                let ts = keys::timestamp(key)?;
                                if ts >= midnight {
                                    return None;
                                }
                                Some((key.clone(), value.as_object()?.clone()))
                            })
                            .collect();
                        day_rows.sort_by(|a, b| a.0.cmp(&b.0));
                        rows.extend(day_rows);
                    }
                }
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(rows)
    }
}

/// Renders rows to CSV. The header is the column names in mapping order;
/// cells missing from a row render empty.
pub(crate) fn render_csv(
    job_mappings: &[(String, String)],
    rows: &[(String, Map<String, Value>)],
) -> Result<String, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let header: Vec<&str> = job_mappings.iter().map(|(column, _)| column.as_str()).collect();
    writer.write_record(&header).map_err(csv_error)?;

    for (_key, row) in rows {
        let record: Vec<String> = job_mappings
            .iter()
            .map(|(column, _)| cell(row.get(column.as_str())))
            .collect();
        writer.write_record(&record).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ReportError::Csv {
            message: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| ReportError::Csv {
        message: e.to_string(),
    })
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_error(e: csv::Error) -> ReportError {
    ReportError::Csv {
        message: e.to_string(),
    }
}
