// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit Web API client.
//!
//! Handles:
//! - Daily time series for a period or a single day
//! - Minute-level intraday series for one day
//! - Profile timezone offset
//! - Push subscription management
//! - Rate limit (429) and bad request (400) detection

use crate::error::AppError;
use crate::models::{Credential, ResourceType};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Used when a 429 carries no usable backoff header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Intraday detail level requested from Fitbit.
pub const INTRADAY_DETAIL: &str = "1min";

/// Dataset type Fitbit reports for minute-level data.
pub const MINUTE_DATASET: &str = "minute";

/// Date range for a time series request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryWindow {
    /// Period ending today, e.g. "30d" or "max"
    Period(String),
    /// A single calendar day
    Day(NaiveDate),
}

impl QueryWindow {
    /// The `{base-date}/{period|end-date}` part of the URL.
    pub fn path_segment(&self) -> String {
        match self {
            QueryWindow::Period(period) => format!("today/{}", period),
            QueryWindow::Day(date) => {
                let day = date.format("%Y-%m-%d");
                format!("{}/{}", day, day)
            }
        }
    }
}

/// One value of a daily time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
}

/// Intraday dataset for one resource and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntradaySeries {
    pub dataset_type: String,
    #[serde(default)]
    pub dataset_interval: Option<u32>,
    #[serde(default)]
    pub dataset: Vec<IntradaySample>,
}

/// One intraday sample, timestamped in the account's local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradaySample {
    /// Local time of day, e.g. "08:30:00"
    pub time: String,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
}

/// A push subscription as listed by Fitbit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSubscription {
    pub owner_id: String,
    pub subscriber_id: String,
    pub subscription_id: String,
    #[serde(default)]
    pub collection_type: Option<String>,
    #[serde(default)]
    pub owner_type: Option<String>,
}

/// Values arrive as strings in series responses and as numbers in intraday ones.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar value, got {}",
            other
        ))),
    }
}

/// Operations the sync engine needs from Fitbit.
#[async_trait]
pub trait FitbitApi: Send + Sync {
    async fn fetch_series(
        &self,
        credential: &Credential,
        resource: &ResourceType,
        window: &QueryWindow,
    ) -> Result<Vec<SeriesPoint>, AppError>;

    async fn fetch_intraday(
        &self,
        credential: &Credential,
        resource: &ResourceType,
        date: NaiveDate,
    ) -> Result<IntradaySeries, AppError>;

    /// The account's `offsetFromUTCMillis`.
    async fn fetch_profile_offset(&self, credential: &Credential) -> Result<i64, AppError>;

    async fn create_subscription(
        &self,
        credential: &Credential,
        subscription_id: &str,
        subscriber_id: &str,
    ) -> Result<(), AppError>;

    async fn list_subscriptions(
        &self,
        credential: &Credential,
    ) -> Result<Vec<ApiSubscription>, AppError>;

    async fn delete_subscription(
        &self,
        credential: &Credential,
        subscription: &ApiSubscription,
    ) -> Result<(), AppError>;
}

/// Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    base_url: String,
}

impl FitbitClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn user_url(&self, credential: &Credential, rest: &str) -> String {
        format!(
            "{}/1/user/{}/{}",
            self.base_url,
            urlencoding::encode(&credential.external_user_id),
            rest
        )
    }

    /// Subscription endpoints act on the token owner (`-`).
    fn subscription_url(&self, subscription_id: Option<&str>) -> String {
        match subscription_id {
            Some(id) => format!(
                "{}/1/user/-/apiSubscriptions/{}.json",
                self.base_url,
                urlencoding::encode(id)
            ),
            None => format!("{}/1/user/-/apiSubscriptions.json", self.base_url),
        }
    }

    /// Generic GET request with JSON response.
    async fn get_json(&self, url: &str, credential: &Credential) -> Result<Value, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|e| AppError::FitbitApi(e.to_string()))?;

        check_response_json(response).await
    }
}

#[async_trait]
impl FitbitApi for FitbitClient {
    async fn fetch_series(
        &self,
        credential: &Credential,
        resource: &ResourceType,
        window: &QueryWindow,
    ) -> Result<Vec<SeriesPoint>, AppError> {
        let url = self.user_url(
            credential,
            &format!("{}/date/{}.json", resource.path(), window.path_segment()),
        );
        let body = self.get_json(&url, credential).await?;
        parse_series(&body, resource)
    }

    async fn fetch_intraday(
        &self,
        credential: &Credential,
        resource: &ResourceType,
        date: NaiveDate,
    ) -> Result<IntradaySeries, AppError> {
        let url = self.user_url(
            credential,
            &format!(
                "{}/date/{}/1d/{}.json",
                resource.path(),
                date.format("%Y-%m-%d"),
                INTRADAY_DETAIL
            ),
        );
        let body = self.get_json(&url, credential).await?;
        parse_intraday(&body, resource)
    }

    async fn fetch_profile_offset(&self, credential: &Credential) -> Result<i64, AppError> {
        let url = self.user_url(credential, "profile.json");
        let body = self.get_json(&url, credential).await?;
        parse_profile_offset(&body)
    }

    async fn create_subscription(
        &self,
        credential: &Credential,
        subscription_id: &str,
        subscriber_id: &str,
    ) -> Result<(), AppError> {
        let response = self
            .http
            .post(self.subscription_url(Some(subscription_id)))
            .bearer_auth(&credential.access_token)
            .header("X-Fitbit-Subscriber-Id", subscriber_id)
            .send()
            .await
            .map_err(|e| AppError::FitbitApi(e.to_string()))?;

        check_response(response).await
    }

    async fn list_subscriptions(
        &self,
        credential: &Credential,
    ) -> Result<Vec<ApiSubscription>, AppError> {
        let body = self
            .get_json(&self.subscription_url(None), credential)
            .await?;
        parse_subscriptions(&body)
    }

    async fn delete_subscription(
        &self,
        credential: &Credential,
        subscription: &ApiSubscription,
    ) -> Result<(), AppError> {
        let response = self
            .http
            .delete(self.subscription_url(Some(&subscription.subscription_id)))
            .bearer_auth(&credential.access_token)
            .header("X-Fitbit-Subscriber-Id", &subscription.subscriber_id)
            .send()
            .await
            .map_err(|e| AppError::FitbitApi(e.to_string()))?;

        check_response(response).await
    }
}

/// Check response status and return error if not successful.
async fn check_response(response: reqwest::Response) -> Result<(), AppError> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(error_from_response(response).await)
}

/// Check response and parse JSON body.
async fn check_response_json(response: reqwest::Response) -> Result<Value, AppError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| AppError::FitbitApi(format!("JSON parse error: {}", e)))
}

async fn error_from_response(response: reqwest::Response) -> AppError {
    let status = response.status();
    let retry_after_secs = retry_after_secs(response.headers());
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        429 => {
            tracing::warn!(retry_after_secs, "Fitbit rate limit hit (429)");
            AppError::RateLimited { retry_after_secs }
        }
        400 => AppError::FitbitBadRequest(body),
        _ => AppError::FitbitApi(format!("HTTP {}: {}", status, body)),
    }
}

/// Backoff hint from a 429: `Retry-After`, then `Fitbit-Rate-Limit-Reset`.
pub fn retry_after_secs(headers: &HeaderMap) -> u64 {
    ["retry-after", "fitbit-rate-limit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Extract `{"activities-steps": [...]}` for the requested resource.
pub fn parse_series(body: &Value, resource: &ResourceType) -> Result<Vec<SeriesPoint>, AppError> {
    let key = resource.key();
    let series = body
        .get(&key)
        .ok_or_else(|| AppError::FitbitApi(format!("Response is missing `{}`", key)))?;
    serde_json::from_value(series.clone())
        .map_err(|e| AppError::FitbitApi(format!("Malformed `{}` series: {}", key, e)))
}

/// Extract `{"activities-steps-intraday": {...}}` for the requested resource.
pub fn parse_intraday(body: &Value, resource: &ResourceType) -> Result<IntradaySeries, AppError> {
    let key = format!("{}-intraday", resource.key());
    let series = body
        .get(&key)
        .ok_or_else(|| AppError::FitbitApi(format!("Response is missing `{}`", key)))?;
    serde_json::from_value(series.clone())
        .map_err(|e| AppError::FitbitApi(format!("Malformed `{}` dataset: {}", key, e)))
}

pub fn parse_profile_offset(body: &Value) -> Result<i64, AppError> {
    body.pointer("/user/offsetFromUTCMillis")
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::FitbitApi("Profile is missing offsetFromUTCMillis".to_string()))
}

pub fn parse_subscriptions(body: &Value) -> Result<Vec<ApiSubscription>, AppError> {
    let list = body
        .get("apiSubscriptions")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    serde_json::from_value(list)
        .map_err(|e| AppError::FitbitApi(format!("Malformed subscription list: {}", e)))
}
