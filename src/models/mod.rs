// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credential;
pub mod observation;
pub mod resource;

pub use credential::Credential;
pub use observation::{Observation, ObservationKey};
pub use resource::{ResourceCategory, ResourceType};
