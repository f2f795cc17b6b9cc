// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Tasks integration for sync work.
//!
//! Every unit of work (daily sync, intraday sync, subscribe, unsubscribe)
//! is an HTTP task delivered back to `/tasks/*`. Tasks can carry a schedule
//! time, which is how rate-limit backoff and intraday staggering are done.
//!
//! Uses the official google-cloud-tasks-v2 SDK.

use crate::error::AppError;
use crate::error::Result;
use crate::models::ResourceCategory;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use validator::Validate;

const MAX_CONCURRENT_TASKS: usize = 100;

/// Payload for a daily series sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DailySyncPayload {
    #[validate(length(min = 1, max = 64))]
    pub external_user_id: String,
    pub category: ResourceCategory,
    #[validate(length(min = 1, max = 128))]
    pub resource: String,
    /// Single day to fetch; absent means the configured default period.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Payload for one day of intraday data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct IntradaySyncPayload {
    #[validate(length(min = 1, max = 64))]
    pub external_user_id: String,
    pub category: ResourceCategory,
    #[validate(length(min = 1, max = 128))]
    pub resource: String,
    pub date: NaiveDate,
    /// Account timezone offset from UTC, in hours (e.g. -5.0)
    #[validate(range(min = -14.0, max = 14.0))]
    pub utc_offset_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SubscribePayload {
    #[validate(length(min = 1, max = 64))]
    pub external_user_id: String,
    /// Falls back to `FITBIT_SUBSCRIBER_ID` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub subscriber_id: Option<String>,
}

/// Unlinking deletes the stored credential before this task runs, so the
/// token may travel with the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UnsubscribePayload {
    #[validate(length(min = 1, max = 64))]
    pub external_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub subscriber_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub access_secret: Option<String>,
}

/// A unit of work to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncTask {
    Daily(DailySyncPayload),
    Intraday(IntradaySyncPayload),
    Subscribe(SubscribePayload),
    Unsubscribe(UnsubscribePayload),
}

impl SyncTask {
    /// Route that handles this task.
    pub fn endpoint(&self) -> &'static str {
        match self {
            SyncTask::Daily(_) => "/tasks/daily-sync",
            SyncTask::Intraday(_) => "/tasks/intraday-sync",
            SyncTask::Subscribe(_) => "/tasks/subscribe",
            SyncTask::Unsubscribe(_) => "/tasks/unsubscribe",
        }
    }

    pub fn body(&self) -> Result<Vec<u8>> {
        let body = match self {
            SyncTask::Daily(p) => serde_json::to_vec(p),
            SyncTask::Intraday(p) => serde_json::to_vec(p),
            SyncTask::Subscribe(p) => serde_json::to_vec(p),
            SyncTask::Unsubscribe(p) => serde_json::to_vec(p),
        };
        body.map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))
    }
}

/// Enqueues tasks for later delivery.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Enqueue `task` to run no earlier than `delay` from now.
    async fn dispatch(&self, task: SyncTask, delay: Duration) -> Result<()>;
}

/// Result of a batch dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    pub queued: u32,
    pub failed: u32,
}

impl DispatchResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }

    pub fn is_partial_failure(&self) -> bool {
        self.queued > 0 && self.failed > 0
    }
}

/// Dispatch `tasks`, the i-th one delayed by `i * stagger`.
///
/// Failures are logged and counted, never propagated.
pub async fn dispatch_staggered(
    dispatcher: &dyn TaskDispatcher,
    tasks: Vec<SyncTask>,
    stagger: Duration,
) -> DispatchResult {
    let queued = AtomicU32::new(0);
    let failed = AtomicU32::new(0);

    stream::iter(tasks.into_iter().enumerate())
        .for_each_concurrent(MAX_CONCURRENT_TASKS, |(i, task)| {
            let queued = &queued;
            let failed = &failed;
            async move {
                let delay = stagger.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
                let endpoint = task.endpoint();
                match dispatcher.dispatch(task, delay).await {
                    Ok(()) => {
                        queued.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(endpoint, error = %e, "Failed to queue task");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        })
        .await;

    DispatchResult {
        queued: queued.into_inner(),
        failed: failed.into_inner(),
    }
}

/// Cloud Tasks client wrapper.
pub struct CloudTasksDispatcher {
    project_id: String,
    location: String,
    queue_name: String,
    /// Public base URL tasks are delivered to
    service_url: String,
}

impl CloudTasksDispatcher {
    pub fn new(project_id: &str, region: &str, service_url: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: region.to_string(),
            queue_name: crate::config::SYNC_QUEUE_NAME.to_string(),
            service_url: service_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TaskDispatcher for CloudTasksDispatcher {
    async fn dispatch(&self, task: SyncTask, delay: Duration) -> Result<()> {
        use google_cloud_tasks_v2::client::CloudTasks;
        use google_cloud_tasks_v2::model::{HttpRequest, OidcToken, Task};

        let client = CloudTasks::builder()
            .build()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks client error: {}", e)))?;

        let queue_path = format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue_name
        );

        let http_request = HttpRequest::default()
            .set_url(format!("{}{}", self.service_url, task.endpoint()))
            .set_http_method("POST")
            .set_body(axum::body::Bytes::from(task.body()?))
            .set_headers(std::collections::HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]))
            .set_oidc_token(
                OidcToken::default()
                    .set_service_account_email(format!(
                        "fitbit-sync@{}.iam.gserviceaccount.com",
                        self.project_id
                    ))
                    .set_audience(self.service_url.clone()),
            );

        let mut cloud_task = Task::default().set_http_request(http_request);
        if !delay.is_zero() {
            let delay = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
            let run_at = chrono::Utc::now().timestamp().saturating_add(delay);
            cloud_task =
                cloud_task.set_schedule_time(google_cloud_wkt::Timestamp::clamp(run_at, 0));
        }

        client
            .create_task()
            .set_parent(queue_path)
            .set_task(cloud_task)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks create error: {}", e)))?;

        tracing::debug!(
            endpoint = task.endpoint(),
            delay_secs = delay.as_secs(),
            "Queued task"
        );
        Ok(())
    }
}
