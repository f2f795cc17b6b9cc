//! Database layer: storage seams plus Firestore and in-memory backends.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::{MemoryLockStore, MemoryStore};

use crate::error::AppError;
use crate::models::{Credential, Observation, ObservationKey};
use async_trait::async_trait;
use std::time::Duration;

/// Collection names as constants.
pub mod collections {
    /// Linked accounts (keyed by external user id)
    pub const CREDENTIALS: &str = "credentials";
    /// Time series values (keyed by natural key)
    pub const OBSERVATIONS: &str = "observations";
    /// Short-lived fetch locks (keyed by url-encoded lock key)
    pub const FETCH_LOCKS: &str = "fetch_locks";
}

/// Durable storage for credentials and observations.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// All credentials linked to an external account id.
    async fn credentials_for(&self, external_user_id: &str) -> Result<Vec<Credential>, AppError>;

    /// Create or replace a credential.
    async fn put_credential(&self, credential: &Credential) -> Result<(), AppError>;

    /// Remove a credential (account unlink).
    async fn delete_credential(&self, external_user_id: &str) -> Result<(), AppError>;

    /// Upsert a batch of observations atomically: either every row is
    /// written or none is. Rows sharing a natural key collapse to the last
    /// one in the batch. Returns the number of distinct rows written.
    async fn commit_observations(&self, observations: &[Observation]) -> Result<usize, AppError>;

    async fn get_observation(&self, key: &ObservationKey)
        -> Result<Option<Observation>, AppError>;

    /// Observations for one user and resource, oldest first.
    async fn observations_for_user(
        &self,
        user_id: u64,
        resource_key: &str,
    ) -> Result<Vec<Observation>, AppError>;
}

/// Shared store with atomic create-if-absent and expiry.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create `key` with the given time to live unless a live entry exists.
    /// Returns whether the key was created.
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;
}
