// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod catalog;
pub mod fitbit;
pub mod lock;
pub mod subscription;
pub mod sync;
pub mod tasks;

pub use catalog::ResourceCatalog;
pub use fitbit::{FitbitApi, FitbitClient};
pub use lock::{FetchLockManager, LockKey};
pub use subscription::SubscriptionManager;
pub use sync::{SkipReason, SyncEngine, SyncSettings, TaskOutcome};
pub use tasks::{CloudTasksDispatcher, SyncTask, TaskDispatcher};
