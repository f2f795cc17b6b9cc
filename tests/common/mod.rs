// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::NaiveDate;
use fitbit_sync::config::Config;
use fitbit_sync::db::{FirestoreDb, MemoryLockStore, MemoryStore, SyncStore};
use fitbit_sync::error::AppError;
use fitbit_sync::models::{Credential, ResourceType};
use fitbit_sync::routes::create_router;
use fitbit_sync::services::fitbit::{
    ApiSubscription, FitbitApi, IntradaySample, IntradaySeries, QueryWindow, SeriesPoint,
};
use fitbit_sync::services::tasks::{SyncTask, TaskDispatcher};
use fitbit_sync::services::{
    FetchLockManager, ResourceCatalog, SubscriptionManager, SyncEngine, SyncSettings,
};
use fitbit_sync::AppState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// External id of the seeded test account.
#[allow(dead_code)]
pub const USER: &str = "22BWRX";

/// Local id of the seeded test account.
#[allow(dead_code)]
pub const LOCAL_USER: u64 = 7;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[allow(dead_code)]
pub fn point(date_time: &str, value: &str) -> SeriesPoint {
    SeriesPoint {
        date_time: date_time.to_string(),
        value: value.to_string(),
    }
}

#[allow(dead_code)]
pub fn minute_series(samples: &[(&str, &str)]) -> IntradaySeries {
    IntradaySeries {
        dataset_type: "minute".to_string(),
        dataset_interval: Some(1),
        dataset: samples
            .iter()
            .map(|(time, value)| IntradaySample {
                time: time.to_string(),
                value: value.to_string(),
            })
            .collect(),
    }
}

/// Scripted failure for one resource path (or "profile").
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum MockBehavior {
    RateLimited(u64),
    BadRequest,
    Fail,
}

impl MockBehavior {
    fn to_error(&self) -> AppError {
        match self {
            MockBehavior::RateLimited(secs) => AppError::RateLimited {
                retry_after_secs: *secs,
            },
            MockBehavior::BadRequest => AppError::FitbitBadRequest("{\"errors\":[]}".to_string()),
            MockBehavior::Fail => AppError::FitbitApi("HTTP 500: boom".to_string()),
        }
    }
}

/// Pauses `fetch_series` until released, to hold a task mid-flight.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory stand-in for the Fitbit API.
#[derive(Default)]
pub struct FakeFitbitApi {
    series: Mutex<HashMap<String, Vec<SeriesPoint>>>,
    intraday: Mutex<HashMap<(String, NaiveDate), IntradaySeries>>,
    failures: Mutex<HashMap<String, MockBehavior>>,
    offset_millis: Mutex<i64>,
    gate: Mutex<Option<Arc<Gate>>>,
    pub windows: Mutex<Vec<QueryWindow>>,
    pub series_calls: AtomicUsize,
    pub intraday_calls: AtomicUsize,
    pub subscriptions: Mutex<Vec<ApiSubscription>>,
    /// (subscription id, subscriber id, access token)
    pub created: Mutex<Vec<(String, String, String)>>,
    pub deleted: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeFitbitApi {
    pub fn set_series(&self, path: &str, points: Vec<SeriesPoint>) {
        self.series.lock().unwrap().insert(path.to_string(), points);
    }

    pub fn set_intraday(&self, path: &str, date: NaiveDate, series: IntradaySeries) {
        self.intraday
            .lock()
            .unwrap()
            .insert((path.to_string(), date), series);
    }

    /// Make calls for `path` fail; "profile" targets the offset lookup and
    /// "subscriptions" the subscription endpoints.
    pub fn fail(&self, path: &str, behavior: MockBehavior) {
        self.failures
            .lock()
            .unwrap()
            .insert(path.to_string(), behavior);
    }

    pub fn set_offset_millis(&self, millis: i64) {
        *self.offset_millis.lock().unwrap() = millis;
    }

    pub fn install_gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn clear_gate(&self) {
        *self.gate.lock().unwrap() = None;
    }

    fn check(&self, path: &str) -> Result<(), AppError> {
        match self.failures.lock().unwrap().get(path) {
            Some(behavior) => Err(behavior.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FitbitApi for FakeFitbitApi {
    async fn fetch_series(
        &self,
        _credential: &Credential,
        resource: &ResourceType,
        window: &QueryWindow,
    ) -> Result<Vec<SeriesPoint>, AppError> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(window.clone());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.check(&resource.path())?;
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(&resource.path())
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_intraday(
        &self,
        _credential: &Credential,
        resource: &ResourceType,
        date: NaiveDate,
    ) -> Result<IntradaySeries, AppError> {
        self.intraday_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&resource.path())?;
        Ok(self
            .intraday
            .lock()
            .unwrap()
            .get(&(resource.path(), date))
            .cloned()
            .unwrap_or_else(|| minute_series(&[])))
    }

    async fn fetch_profile_offset(&self, _credential: &Credential) -> Result<i64, AppError> {
        self.check("profile")?;
        Ok(*self.offset_millis.lock().unwrap())
    }

    async fn create_subscription(
        &self,
        credential: &Credential,
        subscription_id: &str,
        subscriber_id: &str,
    ) -> Result<(), AppError> {
        self.check("subscriptions")?;
        self.created.lock().unwrap().push((
            subscription_id.to_string(),
            subscriber_id.to_string(),
            credential.access_token.clone(),
        ));
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<ApiSubscription>, AppError> {
        self.check("subscriptions")?;
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn delete_subscription(
        &self,
        _credential: &Credential,
        subscription: &ApiSubscription,
    ) -> Result<(), AppError> {
        self.check("subscriptions")?;
        self.deleted
            .lock()
            .unwrap()
            .push(subscription.subscription_id.clone());
        Ok(())
    }
}

/// Records dispatched tasks instead of calling Cloud Tasks.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub dispatched: Mutex<Vec<(SyncTask, Duration)>>,
    pub fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingDispatcher {
    pub fn take(&self) -> Vec<(SyncTask, Duration)> {
        std::mem::take(&mut *self.dispatched.lock().unwrap())
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: SyncTask, delay: Duration) -> Result<(), AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("queue unavailable")));
        }
        self.dispatched.lock().unwrap().push((task, delay));
        Ok(())
    }
}

/// Engine wired to in-memory fakes, with one linked account.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub locks: Arc<MemoryLockStore>,
    pub api: Arc<FakeFitbitApi>,
    pub tasks: Arc<RecordingDispatcher>,
    pub catalog: Arc<ResourceCatalog>,
    pub engine: SyncEngine,
    pub subscriptions: SubscriptionManager,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new(settings: SyncSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(MemoryLockStore::new());
        let api = Arc::new(FakeFitbitApi::default());
        let tasks = Arc::new(RecordingDispatcher::default());
        let catalog = Arc::new(ResourceCatalog::default());

        store
            .put_credential(&Credential {
                local_user_id: LOCAL_USER,
                external_user_id: USER.to_string(),
                access_token: "token-abc".to_string(),
                access_secret: "secret-abc".to_string(),
            })
            .await
            .unwrap();

        let engine = SyncEngine::new(
            store.clone(),
            api.clone(),
            FetchLockManager::new(locks.clone()),
            catalog.clone(),
            tasks.clone(),
            settings,
        );
        let subscriptions = SubscriptionManager::new(store.clone(), api.clone())
            .with_default_subscriber(Config::default().subscriber_id);

        Self {
            store,
            locks,
            api,
            tasks,
            catalog,
            engine,
            subscriptions,
        }
    }

    pub async fn with_defaults() -> Self {
        Self::new(SyncSettings::default()).await
    }

    /// Router over this harness with the test config.
    pub fn app(&self) -> (axum::Router, Arc<AppState>) {
        let state = Arc::new(AppState {
            config: Config::default(),
            catalog: self.catalog.clone(),
            engine: self.engine.clone(),
            subscriptions: self.subscriptions.clone(),
            tasks: self.tasks.clone(),
        });
        (create_router(state.clone()), state)
    }
}
