// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task handler routes for Cloud Tasks callbacks.
//!
//! These endpoints are called by Cloud Tasks, not directly by users.
//! Status codes drive the queue: 2xx acknowledges the task, 5xx makes
//! Cloud Tasks retry it. Permanent failures are acknowledged so they are
//! not retried.

use crate::middleware::require_tasks_queue;
use crate::services::sync::TaskOutcome;
use crate::services::tasks::{
    DailySyncPayload, IntradaySyncPayload, SubscribePayload, SyncTask, UnsubscribePayload,
};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    middleware,
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use validator::Validate;

/// Task handler routes (called by Cloud Tasks).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/daily-sync", post(daily_sync))
        .route("/tasks/intraday-sync", post(intraday_sync))
        .route("/tasks/subscribe", post(subscribe))
        .route("/tasks/unsubscribe", post(unsubscribe))
        .route_layer(middleware::from_fn(require_tasks_queue))
}

/// Body returned to the queue (useful in Cloud Tasks logs).
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

type TaskResult = (StatusCode, Json<TaskResponse>);

async fn daily_sync(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DailySyncPayload>, JsonRejection>,
) -> TaskResult {
    let payload = match accept(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    tracing::info!(
        user = %payload.external_user_id,
        category = %payload.category,
        resource = %payload.resource,
        date = ?payload.date,
        "Daily sync task received"
    );

    let outcome = state.engine.daily_sync(&payload).await;
    settle(&state, outcome, SyncTask::Daily(payload)).await
}

async fn intraday_sync(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IntradaySyncPayload>, JsonRejection>,
) -> TaskResult {
    let payload = match accept(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    tracing::info!(
        user = %payload.external_user_id,
        category = %payload.category,
        resource = %payload.resource,
        date = %payload.date,
        "Intraday sync task received"
    );

    let outcome = state.engine.intraday_sync(&payload).await;
    settle(&state, outcome, SyncTask::Intraday(payload)).await
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubscribePayload>, JsonRejection>,
) -> TaskResult {
    let payload = match accept(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let outcome = state.subscriptions.subscribe(&payload).await;
    settle(&state, outcome, SyncTask::Subscribe(payload)).await
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UnsubscribePayload>, JsonRejection>,
) -> TaskResult {
    let payload = match accept(payload) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let outcome = state.subscriptions.unsubscribe(&payload).await;
    settle(&state, outcome, SyncTask::Unsubscribe(payload)).await
}

/// Map a task outcome to the queue response.
///
/// A rate-limited task is re-enqueued with the provider's delay and the
/// current delivery acknowledged. If re-enqueueing fails, 503 lets Cloud
/// Tasks retry with its own backoff instead.
async fn settle(state: &AppState, outcome: TaskOutcome, task: SyncTask) -> TaskResult {
    match outcome {
        TaskOutcome::Committed { records } => {
            respond(StatusCode::OK, "committed", Some(records), None)
        }
        TaskOutcome::Skipped { reason } => respond(
            StatusCode::OK,
            "skipped",
            None,
            Some(reason.as_str().to_string()),
        ),
        TaskOutcome::Retry { after } => match state.tasks.dispatch(task, after).await {
            Ok(()) => respond(
                StatusCode::OK,
                "rescheduled",
                None,
                Some(format!("retry in {}s", after.as_secs())),
            ),
            Err(e) => {
                tracing::error!(error = %e, "Failed to reschedule rate-limited task");
                respond(StatusCode::SERVICE_UNAVAILABLE, "retry", None, None)
            }
        },
        TaskOutcome::Rejected { reason } => {
            respond(StatusCode::OK, "rejected", None, Some(reason))
        }
    }
}

/// Decode and validate a task body.
///
/// A body that fails to decode (unknown category, missing field) or to
/// validate is acknowledged as rejected.
fn accept<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, TaskResult> {
    let Json(payload) = payload.map_err(|e| invalid_payload(e.body_text()))?;
    payload
        .validate()
        .map_err(|e| invalid_payload(e.to_string()))?;
    Ok(payload)
}

fn invalid_payload(detail: String) -> TaskResult {
    tracing::error!(error = %detail, "Rejected task with invalid payload");
    respond(StatusCode::OK, "rejected", None, Some(detail))
}

fn respond(
    status: StatusCode,
    outcome: &'static str,
    records: Option<usize>,
    detail: Option<String>,
) -> TaskResult {
    (
        status,
        Json(TaskResponse {
            outcome,
            records,
            detail,
        }),
    )
}
