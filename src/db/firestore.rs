// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Credentials (linked Fitbit accounts)
//! - Observations (time series values, keyed by natural key)
//! - Fetch locks (create-if-absent documents with an expiry)

use crate::db::{collections, LockStore, SyncStore};
use crate::error::AppError;
use crate::models::{Credential, Observation, ObservationKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

/// Stored fetch lock document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FetchLockRecord {
    key: String,
    /// Also the field targeted by the collection's TTL policy.
    expires_at: DateTime<Utc>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn get_lock(&self, doc_id: &str) -> Result<Option<FetchLockRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::FETCH_LOCKS)
            .obj()
            .one(doc_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Replace an expired lock document with `record`.
    ///
    /// The read happens inside the transaction, so if another task replaces
    /// the same document first, this commit fails and the lock is reported
    /// as held.
    async fn take_over_expired_lock(
        &self,
        doc_id: &str,
        record: &FetchLockRecord,
    ) -> Result<bool, AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<FetchLockRecord> = client
            .clone_with_consistency_selector(firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ))
            .fluent()
            .select()
            .by_id_in(collections::FETCH_LOCKS)
            .obj()
            .one(doc_id)
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to read lock in transaction: {}", e))
            })?;

        if matches!(&current, Some(existing) if existing.expires_at > Utc::now()) {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        client
            .fluent()
            .update()
            .in_col(collections::FETCH_LOCKS)
            .document_id(doc_id)
            .object(record)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add lock to transaction: {}", e))
            })?;

        match transaction.commit().await {
            Ok(_) => {
                tracing::debug!(key = %record.key, "Took over expired fetch lock");
                Ok(true)
            }
            Err(e) => match self.get_lock(doc_id).await? {
                // Lost the race to another takeover.
                Some(existing) if existing.expires_at > Utc::now() => {
                    tracing::debug!(
                        key = %record.key,
                        error = %e,
                        "Fetch lock taken over concurrently"
                    );
                    Ok(false)
                }
                _ => Err(AppError::Database(format!("Transaction commit failed: {}", e))),
            },
        }
    }
}

/// Lock keys contain `/` (resource paths), which Firestore ids may not.
fn lock_document_id(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

#[async_trait]
impl SyncStore for FirestoreDb {
    // ─── Credential Operations ───────────────────────────────────

    async fn credentials_for(&self, external_user_id: &str) -> Result<Vec<Credential>, AppError> {
        let credential: Option<Credential> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(external_user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(credential.into_iter().collect())
    }

    async fn put_credential(&self, credential: &Credential) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::CREDENTIALS)
            .document_id(&credential.external_user_id)
            .object(credential)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete_credential(&self, external_user_id: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::CREDENTIALS)
            .document_id(external_user_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Observation Operations ──────────────────────────────────

    /// Write all observations in a single Firestore transaction.
    ///
    /// Not chunked into batches: a task's observations land together or not
    /// at all, since a partial write would be reported as failed and retried.
    async fn commit_observations(&self, observations: &[Observation]) -> Result<usize, AppError> {
        let client = self.get_client()?;

        // A transaction may write each document only once; last value wins.
        let by_id: BTreeMap<String, &Observation> = observations
            .iter()
            .map(|o| (o.key().document_id(), o))
            .collect();

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for (doc_id, observation) in &by_id {
            client
                .fluent()
                .update()
                .in_col(collections::OBSERVATIONS)
                .document_id(doc_id)
                .object(*observation)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!(
                        "Failed to add observation to transaction: {}",
                        e
                    ))
                })?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        tracing::debug!(count = by_id.len(), "Observations committed");
        Ok(by_id.len())
    }

    async fn get_observation(
        &self,
        key: &ObservationKey,
    ) -> Result<Option<Observation>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::OBSERVATIONS)
            .obj()
            .one(&key.document_id())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn observations_for_user(
        &self,
        user_id: u64,
        resource_key: &str,
    ) -> Result<Vec<Observation>, AppError> {
        let resource_key = resource_key.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::OBSERVATIONS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    q.field("resource_type").eq(resource_key.clone()),
                ])
            })
            .order_by([("timestamp", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl LockStore for FirestoreDb {
    /// Insert the lock document; Firestore rejects the insert if it exists.
    ///
    /// The TTL policy deletes expired documents lazily, so a conflicting
    /// document may already be expired. In that case it is replaced inside a
    /// transaction that read it, and a concurrent takeover aborts one side.
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let client = self.get_client()?;
        let doc_id = lock_document_id(key);
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid lock TTL: {}", e)))?;
        let record = FetchLockRecord {
            key: key.to_string(),
            expires_at: Utc::now() + ttl,
        };

        let inserted: Result<FetchLockRecord, _> = client
            .fluent()
            .insert()
            .into(collections::FETCH_LOCKS)
            .document_id(&doc_id)
            .object(&record)
            .execute()
            .await;

        match inserted {
            Ok(_) => Ok(true),
            Err(firestore::errors::FirestoreError::DataConflictError(_)) => {
                self.take_over_expired_lock(&doc_id, &record).await
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::FETCH_LOCKS)
            .document_id(lock_document_id(key))
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
