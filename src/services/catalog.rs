// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Resource catalog: the registry of time series resources we know how to fetch.

use crate::models::{ResourceCategory, ResourceType};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::models::ResourceCategory::{Activity, Body, Nutrition, Sleep};

/// Built-in resources: (category, resource, intraday support).
const BUILTIN_RESOURCES: &[(ResourceCategory, &str, bool)] = &[
    (Nutrition, "log/caloriesIn", false),
    (Nutrition, "log/water", false),
    (Activity, "calories", true),
    (Activity, "caloriesBMR", false),
    (Activity, "steps", true),
    (Activity, "distance", true),
    (Activity, "floors", true),
    (Activity, "elevation", true),
    (Activity, "minutesSedentary", false),
    (Activity, "minutesLightlyActive", false),
    (Activity, "minutesFairlyActive", false),
    (Activity, "minutesVeryActive", false),
    (Activity, "activityCalories", false),
    (Activity, "tracker/calories", false),
    (Activity, "tracker/steps", false),
    (Activity, "tracker/distance", false),
    (Activity, "tracker/floors", false),
    (Activity, "tracker/elevation", false),
    (Activity, "tracker/minutesSedentary", false),
    (Activity, "tracker/minutesLightlyActive", false),
    (Activity, "tracker/minutesFairlyActive", false),
    (Activity, "tracker/minutesVeryActive", false),
    (Activity, "tracker/activityCalories", false),
    (Sleep, "startTime", false),
    (Sleep, "timeInBed", false),
    (Sleep, "minutesAsleep", false),
    (Sleep, "awakeningsCount", false),
    (Sleep, "minutesAwake", false),
    (Sleep, "minutesToFallAsleep", false),
    (Sleep, "minutesAfterWakeup", false),
    (Sleep, "efficiency", false),
    (Body, "bmi", false),
    (Body, "fat", false),
    (Body, "weight", false),
];

/// Read-only registry of resource types, shared by all tasks.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    resources: Vec<ResourceType>,
}

impl Default for ResourceCatalog {
    fn default() -> Self {
        let resources = BUILTIN_RESOURCES
            .iter()
            .map(|(category, resource, intraday)| ResourceType::new(*category, resource, *intraday))
            .collect();
        Self { resources }
    }
}

impl ResourceCatalog {
    /// Build a catalog, rejecting duplicate `(category, resource)` pairs.
    pub fn new(resources: Vec<ResourceType>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for resource in &resources {
            if !seen.insert((resource.category, resource.resource.as_str())) {
                return Err(CatalogError::Duplicate(resource.path()));
            }
        }
        Ok(Self { resources })
    }

    /// Load the catalog from a JSON file (an array of resource types).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let json_data =
            fs::read_to_string(path.as_ref()).map_err(|e| CatalogError::IoError(e.to_string()))?;
        Self::load_from_json(&json_data)
    }

    /// Load the catalog from a JSON string.
    pub fn load_from_json(json_data: &str) -> Result<Self, CatalogError> {
        let resources: Vec<ResourceType> = serde_json::from_str(json_data)
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;
        let catalog = Self::new(resources)?;
        tracing::info!(count = catalog.resources.len(), "Loaded resource catalog");
        Ok(catalog)
    }

    pub fn resources(&self) -> &[ResourceType] {
        &self.resources
    }

    /// Look up a resource type by category and name.
    pub fn get(&self, category: ResourceCategory, resource: &str) -> Option<&ResourceType> {
        self.resources
            .iter()
            .find(|r| r.category == category && r.resource == resource)
    }

    /// All resource types that serve minute-level data.
    pub fn intraday_capable(&self) -> impl Iterator<Item = &ResourceType> {
        self.resources.iter().filter(|r| r.intraday_support)
    }

    /// All resource types in a category.
    pub fn in_category(&self, category: ResourceCategory) -> impl Iterator<Item = &ResourceType> {
        self.resources.iter().filter(move |r| r.category == category)
    }
}

/// Errors from catalog loading.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read file: {0}")]
    IoError(String),

    #[error("Failed to parse resource catalog: {0}")]
    ParseError(String),

    #[error("Duplicate resource type: {0}")]
    Duplicate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_intraday_resources() {
        let catalog = ResourceCatalog::default();
        let mut intraday: Vec<String> = catalog.intraday_capable().map(|r| r.path()).collect();
        intraday.sort();
        assert_eq!(
            intraday,
            vec![
                "activities/calories",
                "activities/distance",
                "activities/elevation",
                "activities/floors",
                "activities/steps",
            ]
        );
    }

    #[test]
    fn builtin_catalog_has_no_duplicates() {
        let catalog = ResourceCatalog::default();
        assert!(ResourceCatalog::new(catalog.resources().to_vec()).is_ok());
    }

    #[test]
    fn lookup_by_category_and_name() {
        let catalog = ResourceCatalog::default();
        assert!(catalog.get(ResourceCategory::Activity, "steps").is_some());
        assert!(catalog.get(ResourceCategory::Body, "steps").is_none());
        assert_eq!(catalog.in_category(ResourceCategory::Body).count(), 3);
    }

    #[test]
    fn load_from_json_rejects_duplicates() {
        let json = r#"[
            {"category": "activities", "resource": "steps", "intraday_support": true},
            {"category": "activities", "resource": "steps"}
        ]"#;
        assert!(matches!(
            ResourceCatalog::load_from_json(json),
            Err(CatalogError::Duplicate(_))
        ));
    }

    #[test]
    fn load_from_json_defaults_intraday_support() {
        let json = r#"[{"category": "body", "resource": "weight"}]"#;
        let catalog = ResourceCatalog::load_from_json(json).unwrap();
        assert!(!catalog.resources()[0].intraday_support);
    }
}
