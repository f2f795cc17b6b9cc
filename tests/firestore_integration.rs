// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running.
//! Start it with `gcloud emulators firestore start` and set FIRESTORE_EMULATOR_HOST.

use chrono::{TimeZone, Utc};
use fitbit_sync::db::{LockStore, SyncStore};
use fitbit_sync::models::{Credential, Observation, ResourceCategory, ResourceType};
use std::time::Duration;

mod common;
use common::test_db;

/// Generate a unique id for test isolation.
fn unique_id() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}

#[tokio::test]
async fn test_credential_roundtrip() {
    require_emulator!();

    let db = test_db().await;
    let external = format!("EXT{}", unique_id());
    let credential = Credential {
        local_user_id: 42,
        external_user_id: external.clone(),
        access_token: "token".to_string(),
        access_secret: "secret".to_string(),
    };

    db.put_credential(&credential).await.unwrap();
    assert_eq!(db.credentials_for(&external).await.unwrap(), vec![credential]);

    db.delete_credential(&external).await.unwrap();
    assert!(db.credentials_for(&external).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_commit_observations_upserts_by_natural_key() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_id();
    let steps = ResourceType::new(ResourceCategory::Activity, "steps", true);
    let at = Utc.with_ymd_and_hms(2015, 12, 4, 13, 30, 0).unwrap();

    let first = vec![
        Observation::new(user_id, &steps, at, "12".to_string(), true),
        Observation::new(user_id, &steps, at, "830".to_string(), false),
    ];
    assert_eq!(db.commit_observations(&first).await.unwrap(), 2);

    let again = vec![Observation::new(user_id, &steps, at, "15".to_string(), true)];
    assert_eq!(db.commit_observations(&again).await.unwrap(), 1);

    let rows = db
        .observations_for_user(user_id, "activities-steps")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let fine = db.get_observation(&again[0].key()).await.unwrap().unwrap();
    assert_eq!(fine.value, "15");
}

#[tokio::test]
async fn test_lock_is_exclusive_until_deleted() {
    require_emulator!();

    let db = test_db().await;
    let key = format!("daily_sync-lock-EXT{}-activities/steps-ALL", unique_id());

    assert!(db.add(&key, Duration::from_secs(300)).await.unwrap());
    assert!(!db.add(&key, Duration::from_secs(300)).await.unwrap());

    db.delete(&key).await.unwrap();
    assert!(db.add(&key, Duration::from_secs(300)).await.unwrap());
    db.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_expired_lock_is_taken_over() {
    require_emulator!();

    let db = test_db().await;
    let key = format!("intraday_sync-lock-EXT{}-activities/steps-2015-12-04", unique_id());

    assert!(db.add(&key, Duration::from_millis(10)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(db.add(&key, Duration::from_secs(300)).await.unwrap());
    db.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_takeover_of_expired_lock_has_one_winner() {
    require_emulator!();

    let db = test_db().await;
    for round in 0..5 {
        let key = format!(
            "daily_sync-lock-EXT{}-activities/steps-ALL-{}",
            unique_id(),
            round
        );

        assert!(db.add(&key, Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (a, b) = tokio::join!(
            db.add(&key, Duration::from_secs(300)),
            db.add(&key, Duration::from_secs(300))
        );
        // A transaction aborted by contention counts as not holding the lock.
        let winners = [a.unwrap_or(false), b.unwrap_or(false)]
            .iter()
            .filter(|won| **won)
            .count();
        assert_eq!(winners, 1, "round {}: expected exactly one lock holder", round);

        // The winner's lock stays live.
        assert!(!db.add(&key, Duration::from_secs(300)).await.unwrap());
        db.delete(&key).await.unwrap();
    }
}
