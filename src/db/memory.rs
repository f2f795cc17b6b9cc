// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Process-local storage backends.
//!
//! Used by tests and by single-instance local runs (`STORAGE_BACKEND=memory`).

use crate::db::{LockStore, SyncStore};
use crate::error::AppError;
use crate::models::{Credential, Observation, ObservationKey};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory credential and observation store.
#[derive(Default)]
pub struct MemoryStore {
    credentials: DashMap<String, Credential>,
    observations: Mutex<HashMap<ObservationKey, Observation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored observations.
    pub fn observation_count(&self) -> usize {
        self.observations.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// Snapshot of every stored observation.
    pub fn all_observations(&self) -> Vec<Observation> {
        self.observations
            .lock()
            .map(|o| o.values().cloned().collect())
            .unwrap_or_default()
    }

    fn observations(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ObservationKey, Observation>>, AppError> {
        self.observations
            .lock()
            .map_err(|_| AppError::Database("observation map poisoned".to_string()))
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn credentials_for(&self, external_user_id: &str) -> Result<Vec<Credential>, AppError> {
        Ok(self
            .credentials
            .get(external_user_id)
            .map(|c| vec![c.clone()])
            .unwrap_or_default())
    }

    async fn put_credential(&self, credential: &Credential) -> Result<(), AppError> {
        self.credentials
            .insert(credential.external_user_id.clone(), credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, external_user_id: &str) -> Result<(), AppError> {
        self.credentials.remove(external_user_id);
        Ok(())
    }

    async fn commit_observations(&self, observations: &[Observation]) -> Result<usize, AppError> {
        let mut stored = self.observations()?;
        let mut written = HashSet::new();
        for observation in observations {
            let key = observation.key();
            written.insert(key.clone());
            stored.insert(key, observation.clone());
        }
        Ok(written.len())
    }

    async fn get_observation(
        &self,
        key: &ObservationKey,
    ) -> Result<Option<Observation>, AppError> {
        Ok(self.observations()?.get(key).cloned())
    }

    async fn observations_for_user(
        &self,
        user_id: u64,
        resource_key: &str,
    ) -> Result<Vec<Observation>, AppError> {
        let mut rows: Vec<Observation> = self
            .observations()?
            .values()
            .filter(|o| o.user_id == user_id && o.resource_type == resource_key)
            .cloned()
            .collect();
        rows.sort_by_key(|o| (o.timestamp, o.intraday));
        Ok(rows)
    }
}

/// In-memory lock store with per-key expiry.
#[derive(Default)]
pub struct MemoryLockStore {
    entries: DashMap<String, Instant>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live (unexpired) entry exists for `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so check-and-set is atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    Ok(false)
                } else {
                    entry.insert(now + ttl);
                    Ok(true)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceCategory, ResourceType};
    use chrono::{TimeZone, Utc};

    fn steps() -> ResourceType {
        ResourceType::new(ResourceCategory::Activity, "steps", true)
    }

    #[tokio::test]
    async fn lock_add_is_exclusive_until_deleted() {
        let locks = MemoryLockStore::new();
        let ttl = Duration::from_secs(300);

        assert!(locks.add("k", ttl).await.unwrap());
        assert!(!locks.add("k", ttl).await.unwrap());
        assert!(locks.add("other", ttl).await.unwrap());

        locks.delete("k").await.unwrap();
        assert!(locks.add("k", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let locks = MemoryLockStore::new();

        assert!(locks.add("k", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!locks.is_held("k"));
        assert!(locks.add("k", Duration::from_secs(300)).await.unwrap());
        assert!(locks.is_held("k"));
    }

    #[tokio::test]
    async fn commit_collapses_rows_with_the_same_key() {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2015, 12, 4, 0, 0, 0).unwrap();

        let written = store
            .commit_observations(&[
                Observation::new(1, &steps(), at, "10".to_string(), false),
                Observation::new(1, &steps(), at, "20".to_string(), false),
                Observation::new(1, &steps(), at, "30".to_string(), true),
            ])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.observation_count(), 2);
        let daily = Observation::new(1, &steps(), at, String::new(), false).key();
        assert_eq!(
            store.get_observation(&daily).await.unwrap().unwrap().value,
            "20"
        );
    }

    #[tokio::test]
    async fn credentials_round_trip() {
        let store = MemoryStore::new();
        let credential = Credential {
            local_user_id: 1,
            external_user_id: "ABC".to_string(),
            access_token: "token".to_string(),
            access_secret: "secret".to_string(),
        };

        store.put_credential(&credential).await.unwrap();
        assert_eq!(store.credentials_for("ABC").await.unwrap(), vec![credential]);

        store.delete_credential("ABC").await.unwrap();
        assert!(store.credentials_for("ABC").await.unwrap().is_empty());
    }
}
