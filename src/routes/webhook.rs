// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for Fitbit push notifications.

use crate::models::ResourceCategory;
use crate::services::tasks::{dispatch_staggered, DailySyncPayload, SyncTask};
use crate::AppState;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/{uuid}", get(verify).post(handle_notifications))
}

/// Fitbit subscriber verification query params.
#[derive(Deserialize)]
struct VerifyParams {
    verify: Option<String>,
}

/// Verify the subscriber endpoint (GET).
///
/// Fitbit calls twice: once with the correct code (expects 204) and once
/// with a wrong one (expects 404).
async fn verify(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(params): Query<VerifyParams>,
) -> StatusCode {
    if uuid != state.config.webhook_path_uuid {
        tracing::warn!(
            received_uuid = %uuid,
            "Security Alert: Webhook path UUID mismatch (verify)"
        );
        return StatusCode::NOT_FOUND;
    }

    match (&params.verify, &state.config.verification_code) {
        (Some(received), Some(expected)) if received == expected => {
            tracing::info!("Subscriber endpoint verified");
            StatusCode::NO_CONTENT
        }
        _ => {
            tracing::info!("Subscriber verification code mismatch");
            StatusCode::NOT_FOUND
        }
    }
}

/// One entry of a Fitbit notification batch.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Notification {
    collection_type: String,
    date: NaiveDate,
    owner_id: String,
    #[serde(default)]
    subscription_id: Option<String>,
}

/// Handle a notification batch (POST).
///
/// Always answers 204 once the path matches: Fitbit disables subscribers
/// that respond slowly or with errors.
async fn handle_notifications(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    if uuid != state.config.webhook_path_uuid {
        tracing::warn!(
            received_uuid = %uuid,
            "Security Alert: Webhook path UUID mismatch (notifications)"
        );
        return StatusCode::NOT_FOUND;
    }

    let notifications: Vec<Notification> = match serde_json::from_value(payload) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse notification batch");
            return StatusCode::NO_CONTENT;
        }
    };

    let tasks = sync_tasks_for(&state, &notifications);
    let result = dispatch_staggered(state.tasks.as_ref(), tasks, Duration::ZERO).await;

    tracing::info!(
        notifications = notifications.len(),
        queued = result.queued,
        failed = result.failed,
        "Notification batch handled"
    );
    StatusCode::NO_CONTENT
}

/// A dated daily sync for every catalog resource in each notified collection.
fn sync_tasks_for(state: &AppState, notifications: &[Notification]) -> Vec<SyncTask> {
    let mut tasks = Vec::new();
    for notification in notifications {
        let Some(category) = ResourceCategory::from_collection(&notification.collection_type)
        else {
            tracing::debug!(
                collection = %notification.collection_type,
                owner_id = %notification.owner_id,
                subscription_id = ?notification.subscription_id,
                "Ignoring notification for unsupported collection"
            );
            continue;
        };

        tasks.extend(state.catalog.in_category(category).map(|resource| {
            SyncTask::Daily(DailySyncPayload {
                external_user_id: notification.owner_id.clone(),
                category,
                resource: resource.resource.clone(),
                date: Some(notification.date),
            })
        }));
    }
    tasks
}
