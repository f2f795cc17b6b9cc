// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit push subscription management.

use crate::db::SyncStore;
use crate::error::AppError;
use crate::models::Credential;
use crate::services::fitbit::FitbitApi;
use crate::services::sync::{SkipReason, TaskOutcome};
use crate::services::tasks::{SubscribePayload, UnsubscribePayload};
use std::sync::Arc;

/// Creates and removes push subscriptions for linked accounts.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn SyncStore>,
    api: Arc<dyn FitbitApi>,
    default_subscriber: Option<String>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn SyncStore>, api: Arc<dyn FitbitApi>) -> Self {
        Self {
            store,
            api,
            default_subscriber: None,
        }
    }

    /// Subscriber id used when a task payload does not name one.
    pub fn with_default_subscriber(mut self, subscriber_id: Option<String>) -> Self {
        self.default_subscriber = subscriber_id;
        self
    }

    fn subscriber_for<'a>(&'a self, requested: &'a Option<String>) -> Result<&'a str, AppError> {
        requested
            .as_deref()
            .or(self.default_subscriber.as_deref())
            .ok_or_else(|| {
                AppError::Configuration(
                    "No subscriber id in task and FITBIT_SUBSCRIBER_ID is unset".to_string(),
                )
            })
    }

    /// Subscribe every credential of the account. The subscription id is the
    /// local user id, so notifications map straight back to the owner.
    pub async fn subscribe(&self, payload: &SubscribePayload) -> TaskOutcome {
        let subscriber_id = match self.subscriber_for(&payload.subscriber_id) {
            Ok(id) => id,
            Err(e) => return rejected(&payload.external_user_id, "subscribe", e),
        };
        let credentials = match self.store.credentials_for(&payload.external_user_id).await {
            Ok(credentials) => credentials,
            Err(e) => return rejected(&payload.external_user_id, "subscribe", e),
        };
        if credentials.is_empty() {
            tracing::debug!(user = %payload.external_user_id, "No credentials to subscribe");
            return TaskOutcome::Skipped {
                reason: SkipReason::NoCredentials,
            };
        }

        for credential in &credentials {
            let subscription_id = credential.local_user_id.to_string();
            if let Err(e) = self
                .api
                .create_subscription(credential, &subscription_id, subscriber_id)
                .await
            {
                return rejected(&payload.external_user_id, "subscribe", e);
            }
        }

        tracing::info!(
            user = %payload.external_user_id,
            subscriber_id,
            count = credentials.len(),
            "Subscribed to notifications"
        );
        TaskOutcome::Committed {
            records: credentials.len(),
        }
    }

    /// Delete this account's subscriptions for `subscriber_id`.
    pub async fn unsubscribe(&self, payload: &UnsubscribePayload) -> TaskOutcome {
        let subscriber_id = match self.subscriber_for(&payload.subscriber_id) {
            Ok(id) => id,
            Err(e) => return rejected(&payload.external_user_id, "unsubscribe", e),
        };
        let credential = match (&payload.access_token, &payload.access_secret) {
            (Some(token), Some(secret)) => {
                Credential::detached(&payload.external_user_id, token, secret)
            }
            _ => match self.store.credentials_for(&payload.external_user_id).await {
                Ok(credentials) => match credentials.into_iter().next() {
                    Some(credential) => credential,
                    None => {
                        return rejected(
                            &payload.external_user_id,
                            "unsubscribe",
                            AppError::NotFound(format!(
                                "No credentials for {}",
                                payload.external_user_id
                            )),
                        )
                    }
                },
                Err(e) => return rejected(&payload.external_user_id, "unsubscribe", e),
            },
        };

        let subscriptions = match self.api.list_subscriptions(&credential).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => return rejected(&payload.external_user_id, "unsubscribe", e),
        };

        let mut deleted = 0;
        for subscription in subscriptions.iter().filter(|s| {
            s.owner_id == payload.external_user_id && s.subscriber_id == subscriber_id
        }) {
            if let Err(e) = self.api.delete_subscription(&credential, subscription).await {
                return rejected(&payload.external_user_id, "unsubscribe", e);
            }
            deleted += 1;
        }

        tracing::info!(
            user = %payload.external_user_id,
            subscriber_id,
            deleted,
            "Unsubscribed from notifications"
        );
        TaskOutcome::Committed { records: deleted }
    }
}

fn rejected(external_user_id: &str, operation: &str, err: AppError) -> TaskOutcome {
    tracing::error!(
        user = %external_user_id,
        operation,
        error = %err,
        "Subscription task failed"
    );
    TaskOutcome::Rejected {
        reason: err.to_string(),
    }
}
