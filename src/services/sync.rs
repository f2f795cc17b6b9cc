// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync engine: daily and intraday time series retrieval.
//!
//! Daily sync workflow:
//! 1. Resolve the resource type from the catalog
//! 2. Take the fetch lock (skip if another task holds it)
//! 3. Fetch the series for every linked credential
//! 4. Commit all observations at once
//! 5. Queue intraday tasks for each returned day (if enabled)
//!
//! Intraday sync fetches one day of minute data, converts the local sample
//! times to UTC with the account offset and commits them the same way.

use crate::config::Config;
use crate::db::SyncStore;
use crate::error::AppError;
use crate::models::{Credential, Observation, ResourceType};
use crate::services::catalog::ResourceCatalog;
use crate::services::fitbit::{FitbitApi, QueryWindow, SeriesPoint, MINUTE_DATASET};
use crate::services::lock::{FetchLockManager, LockKey, DAILY_SCOPE, INTRADAY_SCOPE};
use crate::services::tasks::{
    dispatch_staggered, DailySyncPayload, IntradaySyncPayload, SyncTask, TaskDispatcher,
};
use crate::time_utils;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Period requested when none is configured: the full history.
pub const FULL_HISTORY_PERIOD: &str = "max";

/// Per-user guards serializing credential use within this instance.
pub type CredentialGuards = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Deployment-wide sync behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub default_period: Option<String>,
    pub get_intraday: bool,
    pub save_intraday_zero_values: bool,
    pub intraday_stagger: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_period: None,
            get_intraday: false,
            save_intraday_zero_values: false,
            intraday_stagger: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_period: config.default_period.clone(),
            get_intraday: config.get_intraday,
            save_intraday_zero_values: config.save_intraday_zero_values,
            intraday_stagger: Duration::from_secs(config.intraday_stagger_secs),
        }
    }
}

/// Why a task finished without writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another task holds the fetch lock
    AlreadyInProgress,
    /// No linked account for the user
    NoCredentials,
    /// The provider has no data for this resource (floors/elevation)
    ExpectedAbsence,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyInProgress => "already_in_progress",
            SkipReason::NoCredentials => "no_credentials",
            SkipReason::ExpectedAbsence => "expected_absence",
        }
    }
}

/// How a sync task ended. The queue adapter maps this to ack/reschedule.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Committed { records: usize },
    Skipped { reason: SkipReason },
    /// Rate limited; run the same task again after `after`
    Retry { after: Duration },
    /// Permanent failure; do not retry
    Rejected { reason: String },
}

/// Control flow after a provider error on one credential.
enum FetchFailure {
    /// Tolerated; move on to the next credential
    Absent,
    Stop(TaskOutcome),
}

/// Resources that legitimately return 400 for accounts without the sensor.
pub fn is_expected_absence(resource: &ResourceType) -> bool {
    resource.resource.contains("elevation") || resource.resource.contains("floors")
}

/// Daily and intraday sync over injected store, provider, locks and queue.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    api: Arc<dyn FitbitApi>,
    locks: FetchLockManager,
    catalog: Arc<ResourceCatalog>,
    tasks: Arc<dyn TaskDispatcher>,
    settings: SyncSettings,
    credential_guards: CredentialGuards,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn SyncStore>,
        api: Arc<dyn FitbitApi>,
        locks: FetchLockManager,
        catalog: Arc<ResourceCatalog>,
        tasks: Arc<dyn TaskDispatcher>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            api,
            locks,
            catalog,
            tasks,
            settings,
            credential_guards: Arc::new(DashMap::new()),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Fetch a daily series and store it.
    pub async fn daily_sync(&self, payload: &DailySyncPayload) -> TaskOutcome {
        let Some(resource) = self
            .catalog
            .get(payload.category, &payload.resource)
            .cloned()
        else {
            return configuration_error(format!(
                "Unknown resource type {}/{}",
                payload.category, payload.resource
            ));
        };

        let key = LockKey::new(
            DAILY_SCOPE,
            &payload.external_user_id,
            &resource,
            payload.date,
        );
        if let Some(outcome) = self.try_lock(&key).await {
            return outcome;
        }

        let outcome = self.run_daily(payload, &resource).await;
        self.finish(&key, &outcome).await;

        tracing::info!(
            user = %payload.external_user_id,
            resource = %resource,
            date = ?payload.date,
            outcome = ?outcome,
            "Daily sync finished"
        );
        outcome
    }

    async fn run_daily(&self, payload: &DailySyncPayload, resource: &ResourceType) -> TaskOutcome {
        let window = match payload.date {
            Some(date) => QueryWindow::Day(date),
            None => QueryWindow::Period(
                self.settings
                    .default_period
                    .clone()
                    .unwrap_or_else(|| FULL_HISTORY_PERIOD.to_string()),
            ),
        };
        let fan_out_enabled = self.settings.get_intraday && resource.intraday_support;

        let guard = self.credential_guard(&payload.external_user_id);
        let held = guard.lock().await;

        let credentials = match self.load_credentials(&payload.external_user_id).await {
            Ok(credentials) => credentials,
            Err(outcome) => return outcome,
        };

        let mut observations = Vec::new();
        let mut intraday_tasks = Vec::new();
        let mut absences = 0;

        for credential in &credentials {
            let points = match self.api.fetch_series(credential, resource, &window).await {
                Ok(points) => points,
                Err(e) => match classify(resource, &credential.external_user_id, e) {
                    FetchFailure::Absent => {
                        absences += 1;
                        continue;
                    }
                    FetchFailure::Stop(outcome) => return outcome,
                },
            };

            if fan_out_enabled {
                match self.api.fetch_profile_offset(credential).await {
                    Ok(millis) => intraday_tasks.extend(self.intraday_tasks_for(
                        credential,
                        &points,
                        time_utils::offset_hours_from_millis(millis),
                    )),
                    Err(e) => match classify(resource, &credential.external_user_id, e) {
                        FetchFailure::Absent => {}
                        FetchFailure::Stop(outcome) => return outcome,
                    },
                }
            }

            for point in points {
                let Some(timestamp) = time_utils::parse_series_date(&point.date_time) else {
                    tracing::warn!(
                        resource = %resource,
                        date_time = %point.date_time,
                        "Skipping series point with unparseable date"
                    );
                    continue;
                };
                observations.push(Observation::new(
                    credential.local_user_id,
                    resource,
                    timestamp,
                    point.value,
                    false,
                ));
            }
        }

        if observations.is_empty() && absences > 0 {
            return TaskOutcome::Skipped {
                reason: SkipReason::ExpectedAbsence,
            };
        }

        let outcome = self.commit(&observations).await;
        drop(held);

        if matches!(outcome, TaskOutcome::Committed { .. }) && !intraday_tasks.is_empty() {
            let result = dispatch_staggered(
                self.tasks.as_ref(),
                intraday_tasks,
                self.settings.intraday_stagger,
            )
            .await;
            if result.is_complete_success() {
                tracing::debug!(queued = result.queued, "Queued intraday tasks");
            } else {
                tracing::warn!(
                    queued = result.queued,
                    failed = result.failed,
                    "Some intraday tasks could not be queued"
                );
            }
        }

        outcome
    }

    /// One intraday task per returned day per intraday-capable resource.
    fn intraday_tasks_for(
        &self,
        credential: &Credential,
        points: &[SeriesPoint],
        utc_offset_hours: f64,
    ) -> Vec<SyncTask> {
        let mut tasks = Vec::new();
        for point in points {
            let Ok(date) = NaiveDate::parse_from_str(&point.date_time, "%Y-%m-%d") else {
                continue;
            };
            for intraday_resource in self.catalog.intraday_capable() {
                tasks.push(SyncTask::Intraday(IntradaySyncPayload {
                    external_user_id: credential.external_user_id.clone(),
                    category: intraday_resource.category,
                    resource: intraday_resource.resource.clone(),
                    date,
                    utc_offset_hours,
                }));
            }
        }
        tasks
    }

    /// Fetch one day of minute data and store it.
    pub async fn intraday_sync(&self, payload: &IntradaySyncPayload) -> TaskOutcome {
        let Some(resource) = self
            .catalog
            .get(payload.category, &payload.resource)
            .cloned()
        else {
            return configuration_error(format!(
                "Unknown resource type {}/{}",
                payload.category, payload.resource
            ));
        };
        if !resource.intraday_support {
            return configuration_error(format!(
                "Resource type {} does not support intraday data",
                resource
            ));
        }
        let Some(offset) = time_utils::fixed_offset_from_hours(payload.utc_offset_hours) else {
            return configuration_error(format!(
                "Invalid UTC offset {}",
                payload.utc_offset_hours
            ));
        };

        let key = LockKey::new(
            INTRADAY_SCOPE,
            &payload.external_user_id,
            &resource,
            Some(payload.date),
        );
        if let Some(outcome) = self.try_lock(&key).await {
            return outcome;
        }

        let outcome = self.run_intraday(payload, &resource, offset).await;
        self.finish(&key, &outcome).await;

        tracing::info!(
            user = %payload.external_user_id,
            resource = %resource,
            date = %payload.date,
            outcome = ?outcome,
            "Intraday sync finished"
        );
        outcome
    }

    async fn run_intraday(
        &self,
        payload: &IntradaySyncPayload,
        resource: &ResourceType,
        offset: chrono::FixedOffset,
    ) -> TaskOutcome {
        let guard = self.credential_guard(&payload.external_user_id);
        let _held = guard.lock().await;

        let credentials = match self.load_credentials(&payload.external_user_id).await {
            Ok(credentials) => credentials,
            Err(outcome) => return outcome,
        };

        let mut observations = Vec::new();
        let mut absences = 0;

        for credential in &credentials {
            let series = match self
                .api
                .fetch_intraday(credential, resource, payload.date)
                .await
            {
                Ok(series) => series,
                Err(e) => match classify(resource, &credential.external_user_id, e) {
                    FetchFailure::Absent => {
                        absences += 1;
                        continue;
                    }
                    FetchFailure::Stop(outcome) => return outcome,
                },
            };

            if series.dataset_type != MINUTE_DATASET {
                return configuration_error(format!(
                    "Intraday dataset for {} has type {}, expected {}",
                    resource, series.dataset_type, MINUTE_DATASET
                ));
            }

            for sample in series.dataset {
                if !self.settings.save_intraday_zero_values && is_zero(&sample.value) {
                    continue;
                }
                let Some(time) = time_utils::parse_time_of_day(&sample.time) else {
                    tracing::warn!(
                        resource = %resource,
                        time = %sample.time,
                        "Skipping intraday sample with unparseable time"
                    );
                    continue;
                };
                observations.push(Observation::new(
                    credential.local_user_id,
                    resource,
                    time_utils::local_to_utc(payload.date, time, offset),
                    sample.value,
                    true,
                ));
            }
        }

        if observations.is_empty() && absences > 0 {
            return TaskOutcome::Skipped {
                reason: SkipReason::ExpectedAbsence,
            };
        }

        self.commit(&observations).await
    }

    fn credential_guard(&self, external_user_id: &str) -> Arc<Mutex<()>> {
        self.credential_guards
            .entry(external_user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_credentials(&self, external_user_id: &str) -> Result<Vec<Credential>, TaskOutcome> {
        match self.store.credentials_for(external_user_id).await {
            Ok(credentials) if credentials.is_empty() => {
                tracing::debug!(user = %external_user_id, "No linked credentials");
                Err(TaskOutcome::Skipped {
                    reason: SkipReason::NoCredentials,
                })
            }
            Ok(credentials) => Ok(credentials),
            Err(e) => {
                tracing::error!(user = %external_user_id, error = %e, "Failed to load credentials");
                Err(TaskOutcome::Rejected {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn commit(&self, observations: &[Observation]) -> TaskOutcome {
        if observations.is_empty() {
            return TaskOutcome::Committed { records: 0 };
        }
        match self.store.commit_observations(observations).await {
            Ok(records) => TaskOutcome::Committed { records },
            Err(e) => {
                tracing::error!(error = %e, "Failed to commit observations");
                TaskOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// `None` when the lock was taken; otherwise the outcome to return.
    async fn try_lock(&self, key: &LockKey) -> Option<TaskOutcome> {
        match self.locks.acquire(key).await {
            Ok(true) => None,
            Ok(false) => Some(TaskOutcome::Skipped {
                reason: SkipReason::AlreadyInProgress,
            }),
            Err(e) => {
                tracing::error!(lock = %key, error = %e, "Failed to acquire fetch lock");
                Some(TaskOutcome::Rejected {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Release the lock unless the task was rejected.
    ///
    /// A rate-limited task is released too, so its rescheduled copy can run.
    async fn finish(&self, key: &LockKey, outcome: &TaskOutcome) {
        if !matches!(outcome, TaskOutcome::Rejected { .. }) {
            self.locks.release(key).await;
        }
    }
}

fn configuration_error(reason: String) -> TaskOutcome {
    tracing::error!(reason = %reason, "Sync task misconfigured");
    TaskOutcome::Rejected { reason }
}

fn classify(resource: &ResourceType, external_user_id: &str, err: AppError) -> FetchFailure {
    match err {
        AppError::RateLimited { retry_after_secs } => {
            tracing::warn!(
                user = %external_user_id,
                resource = %resource,
                retry_after_secs,
                "Rate limited, rescheduling"
            );
            FetchFailure::Stop(TaskOutcome::Retry {
                after: Duration::from_secs(retry_after_secs),
            })
        }
        AppError::FitbitBadRequest(body) if is_expected_absence(resource) => {
            tracing::debug!(
                user = %external_user_id,
                resource = %resource,
                body = %body,
                "No data for resource on this account"
            );
            FetchFailure::Absent
        }
        other => {
            tracing::error!(
                user = %external_user_id,
                resource = %resource,
                error = %other,
                "Fitbit request failed"
            );
            FetchFailure::Stop(TaskOutcome::Rejected {
                reason: other.to_string(),
            })
        }
    }
}

/// Exactly zero; unparseable values are kept.
fn is_zero(value: &str) -> bool {
    value.trim().parse::<f64>().is_ok_and(|v| v == 0.0)
}
