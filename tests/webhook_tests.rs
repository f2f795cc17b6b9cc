// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscriber verification and notification fan-out.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use fitbit_sync::models::ResourceCategory;
use fitbit_sync::services::tasks::SyncTask;
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

mod common;
use common::{date, Harness, USER};

const WEBHOOK: &str = "/webhook/test-webhook-uuid";

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_verify_with_correct_code() {
    let h = Harness::with_defaults().await;
    let (app, _) = h.app();

    let response = app
        .oneshot(get(&format!("{}?verify=test_verification_code", WEBHOOK)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_verify_with_wrong_or_missing_code() {
    let h = Harness::with_defaults().await;
    let (app, _) = h.app();

    let response = app
        .clone()
        .oneshot(get(&format!("{}?verify=nope", WEBHOOK)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get(WEBHOOK)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_path_uuid_not_found() {
    let h = Harness::with_defaults().await;
    let (app, _) = h.app();

    let response = app
        .clone()
        .oneshot(get("/webhook/guess?verify=test_verification_code"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post("/webhook/guess", "[]".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(h.tasks.take().is_empty());
}

#[tokio::test]
async fn test_notification_queues_dated_sync_per_category_resource() {
    let h = Harness::with_defaults().await;
    let (app, _) = h.app();

    let batch = json!([
        {
            "collectionType": "body",
            "date": "2015-12-04",
            "ownerId": USER,
            "ownerType": "user",
            "subscriptionId": "7"
        },
        {
            "collectionType": "userRevokedAccess",
            "date": "2015-12-04",
            "ownerId": USER,
            "ownerType": "user",
            "subscriptionId": "7"
        }
    ]);

    let response = app.oneshot(post(WEBHOOK, batch.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let dispatched = h.tasks.take();
    let expected = h.catalog.in_category(ResourceCategory::Body).count();
    assert_eq!(dispatched.len(), expected);

    let mut resources: Vec<String> = dispatched
        .iter()
        .map(|(task, delay)| {
            assert_eq!(*delay, Duration::ZERO);
            let SyncTask::Daily(payload) = task else {
                panic!("expected daily sync, got {:?}", task);
            };
            assert_eq!(payload.external_user_id, USER);
            assert_eq!(payload.category, ResourceCategory::Body);
            assert_eq!(payload.date, Some(date(2015, 12, 4)));
            payload.resource.clone()
        })
        .collect();
    resources.sort();
    assert_eq!(resources, vec!["bmi", "fat", "weight"]);
}

#[tokio::test]
async fn test_malformed_notification_still_acknowledged() {
    let h = Harness::with_defaults().await;
    let (app, _) = h.app();

    let response = app
        .oneshot(post(WEBHOOK, json!({"not": "a list"}).to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(h.tasks.take().is_empty());
}
