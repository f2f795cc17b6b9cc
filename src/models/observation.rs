// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Time series observations and their natural key.

use crate::models::ResourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored time series value.
///
/// Identity is `(user_id, resource_type, timestamp, intraday)`; writing the
/// same key again replaces `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Local user id (owner)
    pub user_id: u64,
    /// Resource storage key, e.g. "activities-steps"
    pub resource_type: String,
    /// Sample instant in UTC
    pub timestamp: DateTime<Utc>,
    /// Value as reported by Fitbit
    pub value: String,
    /// Minute-level sample rather than a daily total
    pub intraday: bool,
    /// When this row was last written (RFC 3339)
    pub updated_at: String,
}

impl Observation {
    pub fn new(
        user_id: u64,
        resource_type: &ResourceType,
        timestamp: DateTime<Utc>,
        value: String,
        intraday: bool,
    ) -> Self {
        Self {
            user_id,
            resource_type: resource_type.key(),
            timestamp,
            value,
            intraday,
            updated_at: crate::time_utils::format_utc_rfc3339(Utc::now()),
        }
    }

    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            user_id: self.user_id,
            resource_type: self.resource_type.clone(),
            timestamp: self.timestamp,
            intraday: self.intraday,
        }
    }
}

/// Natural key of an observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    pub user_id: u64,
    pub resource_type: String,
    pub timestamp: DateTime<Utc>,
    pub intraday: bool,
}

impl ObservationKey {
    /// Deterministic document id so upserts land on the same document.
    pub fn document_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.user_id,
            self.resource_type,
            self.timestamp.timestamp(),
            if self.intraday { "intraday" } else { "daily" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(intraday: bool) -> ObservationKey {
        ObservationKey {
            user_id: 7,
            resource_type: "activities-steps".to_string(),
            timestamp: Utc.with_ymd_and_hms(2015, 12, 4, 13, 30, 0).unwrap(),
            intraday,
        }
    }

    #[test]
    fn document_id_is_stable() {
        assert_eq!(key(false).document_id(), "7_activities-steps_1449235800_daily");
        assert_eq!(key(false).document_id(), key(false).document_id());
    }

    #[test]
    fn granularity_is_part_of_the_key() {
        assert_ne!(key(true).document_id(), key(false).document_id());
        assert_ne!(key(true), key(false));
    }
}
