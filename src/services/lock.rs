// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fetch locks: short-lived advisory locks that keep two tasks from
//! fetching the same user/resource/window at once.

use crate::db::LockStore;
use crate::error::AppError;
use crate::models::ResourceType;
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Locks expire on their own after five minutes.
pub const LOCK_EXPIRE: Duration = Duration::from_secs(300);

/// Lock scope for daily series fetches.
pub const DAILY_SCOPE: &str = "daily_sync";

/// Lock scope for intraday fetches.
pub const INTRADAY_SCOPE: &str = "intraday_sync";

/// Composite lock key, e.g. `daily_sync-lock-22BWRX-activities/steps-ALL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// `date = None` locks the whole default window (`ALL`).
    pub fn new(
        scope: &str,
        external_user_id: &str,
        resource: &ResourceType,
        date: Option<NaiveDate>,
    ) -> Self {
        let window = match date {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => "ALL".to_string(),
        };
        Self(format!(
            "{}-lock-{}-{}-{}",
            scope, external_user_id, resource, window
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Acquires and releases fetch locks in a shared [`LockStore`].
#[derive(Clone)]
pub struct FetchLockManager {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl FetchLockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_ttl(store, LOCK_EXPIRE)
    }

    pub fn with_ttl(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Try to take the lock. `false` means another task holds it.
    pub async fn acquire(&self, key: &LockKey) -> Result<bool, AppError> {
        let acquired = self.store.add(key.as_str(), self.ttl).await?;
        if !acquired {
            tracing::debug!(lock = %key, "Fetch lock already held");
        }
        Ok(acquired)
    }

    /// Release early. Failures only cost the remaining expiry time.
    pub async fn release(&self, key: &LockKey) {
        if let Err(e) = self.store.delete(key.as_str()).await {
            tracing::warn!(lock = %key, error = %e, "Failed to release fetch lock");
        }
    }
}
