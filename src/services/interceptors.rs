//! Stats interceptors
//!
//! Six hooks, one per (entity kind, operation), each wrapping one engine
//! step. They never fail the record write: the step's result is logged and
//! tallied here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::error::StatsError;
use crate::interceptor::{Interceptor, InterceptorRegistry, Operation};
use crate::resources::Resource;

use super::stats_service::{Outcome, StatsEngine};

/// Running count of hook outcomes
#[derive(Debug, Default)]
pub struct OutcomeTally {
    applied: AtomicU64,
    unchanged: AtomicU64,
    skipped: AtomicU64,
    staging_misses: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TallySnapshot {
    pub applied: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub staging_misses: u64,
    pub failures: u64,
}

impl OutcomeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            staging_misses: self.staging_misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Log and count the result of one engine step
    fn record(&self, hook: &'static str, resource: &Resource, result: Result<Outcome, StatsError>) {
        let id = resource.id();
        match result {
            Ok(Outcome::Applied(changes)) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                trace!(hook, id = ?id, changes, "Counters updated");
            }
            Ok(Outcome::Unchanged) => {
                self.unchanged.fetch_add(1, Ordering::Relaxed);
                trace!(hook, id = ?id, "No counter change");
            }
            Ok(Outcome::Skipped(reason)) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(hook, id = ?id, reason = %reason, "Record not counted");
            }
            Err(e @ StatsError::StagingMiss { .. }) => {
                self.staging_misses.fetch_add(1, Ordering::Relaxed);
                warn!(hook, error = %e, "Caching failure");
            }
            Err(e) if e.is_store_failure() => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(hook, id = ?id, error = %e, "Counter store failure");
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(hook, id = ?id, error = %e, "Failed to update counters");
            }
        }
    }

    /// Log and count a Before hook failure
    fn record_staging(&self, hook: &'static str, result: Result<(), StatsError>) {
        if let Err(e) = result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(hook, error = %e, "Failed to stage record");
        }
    }
}

// ============================================================================
// Patient hooks
// ============================================================================

/// Counts a new patient
pub struct PatientCreateInterceptor {
    engine: Arc<StatsEngine>,
    tally: Arc<OutcomeTally>,
}

impl PatientCreateInterceptor {
    pub fn new(engine: Arc<StatsEngine>, tally: Arc<OutcomeTally>) -> Self {
        Self { engine, tally }
    }
}

impl Interceptor for PatientCreateInterceptor {
    fn name(&self) -> &'static str {
        "patient_create"
    }

    fn before(&self, _resource: &Resource) {}

    fn after(&self, resource: &Resource) {
        if let Some(record) = resource.as_patient() {
            self.tally.record(self.name(), resource, self.engine.patient_created(record));
        }
    }
}

/// Stages the pre-image, then moves the patient between localities
pub struct PatientUpdateInterceptor {
    engine: Arc<StatsEngine>,
    tally: Arc<OutcomeTally>,
}

impl PatientUpdateInterceptor {
    pub fn new(engine: Arc<StatsEngine>, tally: Arc<OutcomeTally>) -> Self {
        Self { engine, tally }
    }
}

impl Interceptor for PatientUpdateInterceptor {
    fn name(&self) -> &'static str {
        "patient_update"
    }

    fn before(&self, resource: &Resource) {
        if let Some(record) = resource.as_patient() {
            self.tally.record_staging(self.name(), self.engine.stage_patient(record));
        }
    }

    fn after(&self, resource: &Resource) {
        if let Some(record) = resource.as_patient() {
            self.tally.record(self.name(), resource, self.engine.patient_updated(record));
        }
    }
}

pub struct PatientDeleteInterceptor {
    engine: Arc<StatsEngine>,
    tally: Arc<OutcomeTally>,
}

impl PatientDeleteInterceptor {
    pub fn new(engine: Arc<StatsEngine>, tally: Arc<OutcomeTally>) -> Self {
        Self { engine, tally }
    }
}

impl Interceptor for PatientDeleteInterceptor {
    fn name(&self) -> &'static str {
        "patient_delete"
    }

    fn before(&self, _resource: &Resource) {}

    fn after(&self, resource: &Resource) {
        if let Some(record) = resource.as_patient() {
            self.tally.record(self.name(), resource, self.engine.patient_deleted(record));
        }
    }
}

// ============================================================================
// Condition hooks
// ============================================================================

pub struct ConditionCreateInterceptor {
    engine: Arc<StatsEngine>,
    tally: Arc<OutcomeTally>,
}

impl ConditionCreateInterceptor {
    pub fn new(engine: Arc<StatsEngine>, tally: Arc<OutcomeTally>) -> Self {
        Self { engine, tally }
    }
}

impl Interceptor for ConditionCreateInterceptor {
    fn name(&self) -> &'static str {
        "condition_create"
    }

    fn before(&self, _resource: &Resource) {}

    fn after(&self, resource: &Resource) {
        if let Some(record) = resource.as_condition() {
            self.tally.record(self.name(), resource, self.engine.condition_created(record));
        }
    }
}

/// Decrements a condition's case when it becomes abated
pub struct ConditionUpdateInterceptor {
    engine: Arc<StatsEngine>,
    tally: Arc<OutcomeTally>,
}

impl ConditionUpdateInterceptor {
    pub fn new(engine: Arc<StatsEngine>, tally: Arc<OutcomeTally>) -> Self {
        Self { engine, tally }
    }
}

impl Interceptor for ConditionUpdateInterceptor {
    fn name(&self) -> &'static str {
        "condition_update"
    }

    fn before(&self, resource: &Resource) {
        if let Some(record) = resource.as_condition() {
            self.tally.record_staging(self.name(), self.engine.stage_condition(record));
        }
    }

    fn after(&self, resource: &Resource) {
        if let Some(record) = resource.as_condition() {
            self.tally.record(self.name(), resource, self.engine.condition_updated(record));
        }
    }
}

pub struct ConditionDeleteInterceptor {
    engine: Arc<StatsEngine>,
    tally: Arc<OutcomeTally>,
}

impl ConditionDeleteInterceptor {
    pub fn new(engine: Arc<StatsEngine>, tally: Arc<OutcomeTally>) -> Self {
        Self { engine, tally }
    }
}

impl Interceptor for ConditionDeleteInterceptor {
    fn name(&self) -> &'static str {
        "condition_delete"
    }

    fn before(&self, _resource: &Resource) {}

    fn after(&self, resource: &Resource) {
        if let Some(record) = resource.as_condition() {
            self.tally.record(self.name(), resource, self.engine.condition_deleted(record));
        }
    }
}

/// Register all six stats interceptors
pub fn register_stats_interceptors(
    registry: &mut InterceptorRegistry,
    engine: Arc<StatsEngine>,
    tally: Arc<OutcomeTally>,
) {
    registry.register(
        Operation::Create,
        Arc::new(PatientCreateInterceptor::new(engine.clone(), tally.clone())),
    );
    registry.register(
        Operation::Create,
        Arc::new(ConditionCreateInterceptor::new(engine.clone(), tally.clone())),
    );
    registry.register(
        Operation::Update,
        Arc::new(PatientUpdateInterceptor::new(engine.clone(), tally.clone())),
    );
    registry.register(
        Operation::Update,
        Arc::new(ConditionUpdateInterceptor::new(engine.clone(), tally.clone())),
    );
    registry.register(
        Operation::Delete,
        Arc::new(PatientDeleteInterceptor::new(engine.clone(), tally.clone())),
    );
    registry.register(
        Operation::Delete,
        Arc::new(ConditionDeleteInterceptor::new(engine, tally)),
    );
}
