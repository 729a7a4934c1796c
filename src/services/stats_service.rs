//! Stats service - the aggregation engine
//!
//! Turns patient and condition notifications into ledger deltas. Each step
//! classifies the record, resolves its geography, applies the signed delta to
//! the subdivision and its region, and publishes the change on the event bus.
//!
//! Steps return an explicit [`Outcome`]. Ineligible records are
//! `Outcome::Skipped`, never errors; only staging misses, store failures and
//! unknown keys come back as `Err`.

use std::sync::Arc;

use serde::Serialize;

use crate::classify::{
    classify_observation, classify_subject, is_abated, subject_id, ObservationEligibility, Sex,
    SkipReason, SubjectEligibility,
};
use crate::db::{CounterLedger, SexDelta};
use crate::error::StatsError;
use crate::geo::{Gazetteer, Placement};
use crate::reference::DiseaseCatalog;
use crate::resources::{kinds, Condition, Patient};
use crate::staging::StagingCache;
use crate::subjects::SubjectLookup;

use super::events::{EventBus, StatsEvent};

/// What an engine step did to the counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Number of ledger calls made (each moves a subdivision and its region)
    Applied(usize),
    /// Eligible record, but nothing to change
    Unchanged,
    Skipped(SkipReason),
}

/// Pre-images held between the Before and After hooks of updates
#[derive(Default)]
pub struct Staging {
    pub patients: StagingCache<Patient>,
    pub conditions: StagingCache<Condition>,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Staged records still waiting for their After call
    pub fn pending(&self) -> usize {
        self.patients.len() + self.conditions.len()
    }
}

/// Where and as whom a subject is counted
type SubjectPlacement = Result<(Placement, Sex), SkipReason>;

/// Aggregation engine
pub struct StatsEngine {
    ledger: CounterLedger,
    gazetteer: Arc<Gazetteer>,
    catalog: Arc<DiseaseCatalog>,
    subjects: Arc<dyn SubjectLookup>,
    staging: Arc<Staging>,
    events: Arc<EventBus>,
}

impl StatsEngine {
    pub fn new(
        ledger: CounterLedger,
        gazetteer: Arc<Gazetteer>,
        catalog: Arc<DiseaseCatalog>,
        subjects: Arc<dyn SubjectLookup>,
        staging: Arc<Staging>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            ledger,
            gazetteer,
            catalog,
            subjects,
            staging,
            events,
        }
    }

    pub fn ledger(&self) -> &CounterLedger {
        &self.ledger
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // =========================================================================
    // Patients
    // =========================================================================

    pub fn patient_created(&self, patient: &Patient) -> Result<Outcome, StatsError> {
        self.count_patient(patient, 1)
    }

    pub fn patient_deleted(&self, patient: &Patient) -> Result<Outcome, StatsError> {
        self.count_patient(patient, -1)
    }

    /// Before hook of a patient update
    pub fn stage_patient(&self, before: &Patient) -> Result<(), StatsError> {
        let id = before
            .id
            .as_deref()
            .ok_or(StatsError::Unstageable { kind: kinds::PATIENT })?;
        self.staging.patients.stage(id, before.clone());
        Ok(())
    }

    /// After hook of a patient update.
    ///
    /// Only a move between localities is counted. A sex change with the same
    /// locality leaves the counters alone.
    pub fn patient_updated(&self, after: &Patient) -> Result<Outcome, StatsError> {
        let id = after
            .id
            .as_deref()
            .ok_or(StatsError::Unstageable { kind: kinds::PATIENT })?;
        let before = self
            .staging
            .patients
            .take_staged(id)
            .ok_or_else(|| StatsError::StagingMiss {
                kind: kinds::PATIENT,
                id: id.to_string(),
            })?;

        let (old_sex, old_locality, new_sex, new_locality) =
            match (classify_subject(&before), classify_subject(after)) {
                (
                    SubjectEligibility::Usable { sex: old_sex, locality: old_locality },
                    SubjectEligibility::Usable { sex: new_sex, locality: new_locality },
                ) => (old_sex, old_locality, new_sex, new_locality),
                (SubjectEligibility::Unusable(reason), _) | (_, SubjectEligibility::Unusable(reason)) => {
                    return Ok(Outcome::Skipped(reason));
                }
            };

        if old_locality == new_locality {
            return Ok(Outcome::Unchanged);
        }

        let mut applied = 0;
        // A side that never resolved was never counted
        if let Some(placement) = self.gazetteer.resolve(old_locality) {
            self.population_delta(placement, SexDelta::decrement(old_sex))?;
            applied += 1;
        }
        if let Some(placement) = self.gazetteer.resolve(new_locality) {
            self.population_delta(placement, SexDelta::increment(new_sex))?;
            applied += 1;
        }

        Ok(match applied {
            0 => Outcome::Unchanged,
            n => Outcome::Applied(n),
        })
    }

    fn count_patient(&self, patient: &Patient, step: i64) -> Result<Outcome, StatsError> {
        let (placement, sex) = match self.place_subject(patient) {
            Ok(found) => found,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };
        self.population_delta(&placement, SexDelta { sex, step })?;
        Ok(Outcome::Applied(1))
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    pub fn condition_created(&self, condition: &Condition) -> Result<Outcome, StatsError> {
        self.count_condition(condition, 1)
    }

    /// A deleted condition that was already abated was removed from the
    /// counts when it resolved, so it is skipped here.
    pub fn condition_deleted(&self, condition: &Condition) -> Result<Outcome, StatsError> {
        self.count_condition(condition, -1)
    }

    /// Before hook of a condition update
    pub fn stage_condition(&self, before: &Condition) -> Result<(), StatsError> {
        let id = before
            .id
            .as_deref()
            .ok_or(StatsError::Unstageable { kind: kinds::CONDITION })?;
        self.staging.conditions.stage(id, before.clone());
        Ok(())
    }

    /// After hook of a condition update.
    ///
    /// Decrements once, on the active to abated transition. Abated to active
    /// is not counted again.
    pub fn condition_updated(&self, after: &Condition) -> Result<Outcome, StatsError> {
        let id = after
            .id
            .as_deref()
            .ok_or(StatsError::Unstageable { kind: kinds::CONDITION })?;
        let before = self
            .staging
            .conditions
            .take_staged(id)
            .ok_or_else(|| StatsError::StagingMiss {
                kind: kinds::CONDITION,
                id: id.to_string(),
            })?;

        let disease_key = match classify_observation(&before, &self.catalog) {
            ObservationEligibility::Countable { disease_key, .. } => disease_key,
            ObservationEligibility::NotCountable(_) => return Ok(Outcome::Unchanged),
        };
        if !is_abated(after) {
            return Ok(Outcome::Unchanged);
        }

        let (placement, sex) = match self.place_condition_subject(after)? {
            Ok(found) => found,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };
        self.disease_delta(&placement, disease_key, SexDelta::decrement(sex))?;
        Ok(Outcome::Applied(1))
    }

    fn count_condition(&self, condition: &Condition, step: i64) -> Result<Outcome, StatsError> {
        let disease_key = match classify_observation(condition, &self.catalog) {
            ObservationEligibility::Countable { disease_key, .. } => disease_key,
            ObservationEligibility::NotCountable(reason) => return Ok(Outcome::Skipped(reason)),
        };

        let (placement, sex) = match self.place_condition_subject(condition)? {
            Ok(found) => found,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };
        self.disease_delta(&placement, disease_key, SexDelta { sex, step })?;
        Ok(Outcome::Applied(1))
    }

    // =========================================================================
    // Geography
    // =========================================================================

    fn place_subject(&self, patient: &Patient) -> SubjectPlacement {
        match classify_subject(patient) {
            SubjectEligibility::Usable { sex, locality } => self
                .gazetteer
                .resolve(locality)
                .map(|placement| (placement.clone(), sex))
                .ok_or_else(|| SkipReason::UnresolvedLocality(locality.to_string())),
            SubjectEligibility::Unusable(reason) => Err(reason),
        }
    }

    /// Look up the condition's patient and place it. Lookup failures are
    /// errors; a missing patient is a skip.
    fn place_condition_subject(&self, condition: &Condition) -> Result<SubjectPlacement, StatsError> {
        let id = match subject_id(condition) {
            Some(id) => id,
            None => return Ok(Err(SkipReason::MissingSubject)),
        };
        let resource_type = condition
            .subject
            .as_ref()
            .and_then(|s| s.referenced_type())
            .unwrap_or(kinds::PATIENT);

        let patient = match self.subjects.get(id, resource_type)? {
            Some(patient) => patient,
            None => return Ok(Err(SkipReason::SubjectNotFound(id.to_string()))),
        };
        Ok(self.place_subject(&patient))
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    fn population_delta(&self, placement: &Placement, delta: SexDelta) -> Result<(), StatsError> {
        self.ledger.apply_population_delta(placement, delta)?;
        self.events.emit(StatsEvent::PopulationChanged {
            placement: placement.clone(),
            sex: delta.sex,
            step: delta.step,
        });
        Ok(())
    }

    fn disease_delta(
        &self,
        placement: &Placement,
        disease_key: &str,
        delta: SexDelta,
    ) -> Result<(), StatsError> {
        self.ledger.apply_disease_case_delta(placement, disease_key, delta)?;
        self.events.emit(StatsEvent::DiseaseCasesChanged {
            placement: placement.clone(),
            disease_key: disease_key.to_string(),
            sex: delta.sex,
            step: delta.step,
        });
        Ok(())
    }

    /// Zero every counter
    pub fn reset(&self) -> Result<usize, StatsError> {
        let rows = self.ledger.reset()?;
        self.events.emit(StatsEvent::CountersReset { rows });
        Ok(rows)
    }
}
