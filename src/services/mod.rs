// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod calories;
pub mod dedup;
pub mod orchestrator;
pub mod route;

pub use calories::{CalorieEngine, CalorieEstimate, EnvironmentalConditions};
pub use dedup::{DedupOutcome, DeduplicationEngine};
pub use orchestrator::IngestionOrchestrator;
