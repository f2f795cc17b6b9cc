// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fitbit time series resource types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level grouping of Fitbit time series resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceCategory {
    #[serde(rename = "foods", alias = "nutrition")]
    Nutrition,
    #[serde(rename = "activities", alias = "activity")]
    Activity,
    #[serde(rename = "sleep")]
    Sleep,
    #[serde(rename = "body")]
    Body,
}

impl ResourceCategory {
    /// Path segment used by the Fitbit API (and by notification `collectionType`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Nutrition => "foods",
            ResourceCategory::Activity => "activities",
            ResourceCategory::Sleep => "sleep",
            ResourceCategory::Body => "body",
        }
    }

    /// Parse a Fitbit collection name.
    pub fn from_collection(name: &str) -> Option<Self> {
        match name {
            "foods" => Some(ResourceCategory::Nutrition),
            "activities" => Some(ResourceCategory::Activity),
            "sleep" => Some(ResourceCategory::Sleep),
            "body" => Some(ResourceCategory::Body),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetchable time series resource, e.g. `activities/steps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub category: ResourceCategory,
    /// Resource name within the category (may contain `/`, e.g. "tracker/steps")
    pub resource: String,
    /// Whether Fitbit serves minute-level data for this resource
    #[serde(default)]
    pub intraday_support: bool,
}

impl ResourceType {
    pub fn new(category: ResourceCategory, resource: &str, intraday_support: bool) -> Self {
        Self {
            category,
            resource: resource.to_string(),
            intraday_support,
        }
    }

    /// API path, e.g. "activities/steps".
    pub fn path(&self) -> String {
        format!("{}/{}", self.category.as_str(), self.resource)
    }

    /// Key used in API response bodies and in storage, e.g. "activities-steps".
    pub fn key(&self) -> String {
        self.path().replace('/', "-")
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
