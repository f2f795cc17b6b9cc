// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! fitbit-sync: keep a local copy of Fitbit time series data
//!
//! This crate provides a Cloud Tasks driven service that fetches daily and
//! intraday Fitbit series for linked accounts and stores them idempotently.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::{ResourceCatalog, SubscriptionManager, SyncEngine, TaskDispatcher};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub catalog: Arc<ResourceCatalog>,
    pub engine: SyncEngine,
    pub subscriptions: SubscriptionManager,
    pub tasks: Arc<dyn TaskDispatcher>,
}
