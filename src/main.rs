// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! fitbit-sync API Server
//!
//! Receives Fitbit push notifications and Cloud Tasks callbacks, and keeps
//! a local copy of each linked account's time series data.

use fitbit_sync::{
    config::{Config, StorageBackend},
    db::{FirestoreDb, LockStore, MemoryLockStore, MemoryStore, SyncStore},
    services::{
        CloudTasksDispatcher, FetchLockManager, FitbitApi, FitbitClient, ResourceCatalog,
        SubscriptionManager, SyncEngine, SyncSettings, TaskDispatcher,
    },
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting fitbit-sync API");

    // Load resource catalog
    let catalog = match &config.resource_catalog_path {
        Some(path) => {
            tracing::info!(path = %path, "Loading resource catalog");
            ResourceCatalog::load_from_file(path)?
        }
        None => ResourceCatalog::default(),
    };
    tracing::info!(
        count = catalog.resources().len(),
        intraday = catalog.intraday_capable().count(),
        "Resource catalog ready"
    );
    let catalog = Arc::new(catalog);

    // Initialize storage
    let (store, lock_store): (Arc<dyn SyncStore>, Arc<dyn LockStore>) =
        match config.storage_backend {
            StorageBackend::Firestore => {
                let db = Arc::new(FirestoreDb::new(&config.gcp_project_id).await?);
                let store: Arc<dyn SyncStore> = db.clone();
                let locks: Arc<dyn LockStore> = db;
                (store, locks)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                let store: Arc<dyn SyncStore> = Arc::new(MemoryStore::new());
                let locks: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
                (store, locks)
            }
        };

    let fitbit: Arc<dyn FitbitApi> = Arc::new(FitbitClient::new(&config.fitbit_api_url));

    // Initialize Cloud Tasks dispatcher
    let tasks: Arc<dyn TaskDispatcher> = Arc::new(CloudTasksDispatcher::new(
        &config.gcp_project_id,
        &config.gcp_region,
        &config.api_url,
    ));
    tracing::info!(
        project = %config.gcp_project_id,
        "Cloud Tasks dispatcher initialized"
    );

    let engine = SyncEngine::new(
        store.clone(),
        fitbit.clone(),
        FetchLockManager::new(lock_store),
        catalog.clone(),
        tasks.clone(),
        SyncSettings::from(&config),
    );
    let subscriptions = SubscriptionManager::new(store, fitbit)
        .with_default_subscriber(config.subscriber_id.clone());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        catalog,
        engine,
        subscriptions,
        tasks,
    });

    // Build router
    let app = fitbit_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fitbit_sync=debug"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
