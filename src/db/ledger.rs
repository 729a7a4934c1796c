//! Counter ledger
//!
//! Owns every mutation of the population and disease-case counters. A delta
//! always moves a subdivision row and its parent region row together, inside
//! one IMMEDIATE transaction, so either both rows change or neither does.
//! Each row is changed by a single `UPDATE ... SET col = col + ?` statement;
//! concurrent deltas to the same row serialize on the SQLite write lock and
//! never work from a stale in-memory copy.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use serde::Serialize;
use tracing::{debug, warn};

use super::diesel_schema::{
    region_disease_facts, region_stats, subdivision_disease_facts, subdivision_stats,
};
use super::models::{RegionDiseaseFacts, RegionStats, SubdivisionDiseaseFacts, SubdivisionStats};
use super::Database;
use crate::classify::Sex;
use crate::error::StatsError;
use crate::geo::Placement;

/// Tolerance used by [`CounterLedger::audit`] when comparing densities
const DENSITY_EPSILON: f64 = 1e-9;

/// Level of a counter row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Region,
    Subdivision,
}

impl Scope {
    fn population_table(&self) -> &'static str {
        match self {
            Scope::Region => "region_stats",
            Scope::Subdivision => "subdivision_stats",
        }
    }

    fn disease_table(&self) -> &'static str {
        match self {
            Scope::Region => "region_disease_facts",
            Scope::Subdivision => "subdivision_disease_facts",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Region => f.write_str("region"),
            Scope::Subdivision => f.write_str("subdivision"),
        }
    }
}

/// A signed unit change to one sex bucket (and the total)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SexDelta {
    pub sex: Sex,
    pub step: i64,
}

impl SexDelta {
    pub fn increment(sex: Sex) -> Self {
        Self { sex, step: 1 }
    }

    pub fn decrement(sex: Sex) -> Self {
        Self { sex, step: -1 }
    }

    /// Column deltas as `(total, male, female)`
    pub fn columns(&self) -> (i64, i64, i64) {
        match self.sex {
            Sex::Male => (self.step, self.step, 0),
            Sex::Female => (self.step, 0, self.step),
        }
    }
}

/// Population counter row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationCounter {
    pub scope: Scope,
    pub key: String,
    pub area: f64,
    pub total: i64,
    pub male: i64,
    pub female: i64,
    pub per_area: f64,
}

impl From<RegionStats> for PopulationCounter {
    fn from(row: RegionStats) -> Self {
        Self {
            scope: Scope::Region,
            key: row.region_key,
            area: row.area,
            total: row.pop,
            male: row.pop_male,
            female: row.pop_female,
            per_area: row.pop_per_area,
        }
    }
}

impl From<SubdivisionStats> for PopulationCounter {
    fn from(row: SubdivisionStats) -> Self {
        Self {
            scope: Scope::Subdivision,
            key: row.subdivision_key,
            area: row.area,
            total: row.pop,
            male: row.pop_male,
            female: row.pop_female,
            per_area: row.pop_per_area,
        }
    }
}

/// Disease case counter row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiseaseCaseCounter {
    pub scope: Scope,
    pub key: String,
    pub disease_key: String,
    pub total: i64,
    pub male: i64,
    pub female: i64,
}

impl From<RegionDiseaseFacts> for DiseaseCaseCounter {
    fn from(row: RegionDiseaseFacts) -> Self {
        Self {
            scope: Scope::Region,
            key: row.region_key,
            disease_key: row.disease_key,
            total: row.cases,
            male: row.cases_male,
            female: row.cases_female,
        }
    }
}

impl From<SubdivisionDiseaseFacts> for DiseaseCaseCounter {
    fn from(row: SubdivisionDiseaseFacts) -> Self {
        Self {
            scope: Scope::Subdivision,
            key: row.subdivision_key,
            disease_key: row.disease_key,
            total: row.cases,
            male: row.cases_male,
            female: row.cases_female,
        }
    }
}

/// Every counter row at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub population: Vec<PopulationCounter>,
    pub disease_cases: Vec<DiseaseCaseCounter>,
}

/// A counter row that breaks one of the ledger invariants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvariantViolation {
    pub scope: Scope,
    pub key: String,
    pub disease_key: Option<String>,
    pub detail: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.disease_key {
            Some(disease) => write!(f, "{} {} disease {}: {}", self.scope, self.key, disease, self.detail),
            None => write!(f, "{} {}: {}", self.scope, self.key, self.detail),
        }
    }
}

const UPDATE_SUBDIVISION_POPULATION: &str = r#"
UPDATE subdivision_stats
SET pop = pop + ?,
    pop_male = pop_male + ?,
    pop_female = pop_female + ?,
    pop_per_area = CASE WHEN area > 0 THEN CAST(pop + ? AS REAL) / area ELSE 0.0 END
WHERE subdivision_key = ? AND region_key = ?
"#;

const UPDATE_REGION_POPULATION: &str = r#"
UPDATE region_stats
SET pop = pop + ?,
    pop_male = pop_male + ?,
    pop_female = pop_female + ?,
    pop_per_area = CASE WHEN area > 0 THEN CAST(pop + ? AS REAL) / area ELSE 0.0 END
WHERE region_key = ?
"#;

/// Atomic counter mutations and reads
#[derive(Clone)]
pub struct CounterLedger {
    db: Database,
}

impl CounterLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Apply a population delta to a subdivision and its parent region.
    ///
    /// Density is recomputed in the same statement from the post-update total
    /// (SQLite evaluates every SET expression against the pre-update row, so
    /// `pop + ?` is the new total).
    pub fn apply_population_delta(
        &self,
        placement: &Placement,
        delta: SexDelta,
    ) -> Result<(), StatsError> {
        let (total, male, female) = delta.columns();

        self.db.with_conn(|conn| {
            conn.immediate_transaction::<_, StatsError, _>(|conn| {
                let rows = diesel::sql_query(UPDATE_SUBDIVISION_POPULATION)
                    .bind::<BigInt, _>(total)
                    .bind::<BigInt, _>(male)
                    .bind::<BigInt, _>(female)
                    .bind::<BigInt, _>(total)
                    .bind::<Text, _>(placement.subdivision_key.as_str())
                    .bind::<Text, _>(placement.region_key.as_str())
                    .execute(conn)?;
                expect_one_row(rows, Scope::Subdivision.population_table(), &placement.subdivision_key)?;

                let rows = diesel::sql_query(UPDATE_REGION_POPULATION)
                    .bind::<BigInt, _>(total)
                    .bind::<BigInt, _>(male)
                    .bind::<BigInt, _>(female)
                    .bind::<BigInt, _>(total)
                    .bind::<Text, _>(placement.region_key.as_str())
                    .execute(conn)?;
                expect_one_row(rows, Scope::Region.population_table(), &placement.region_key)?;

                Ok(())
            })
        })?;

        debug!(
            placement = %placement,
            sex = %delta.sex,
            step = delta.step,
            "Applied population delta"
        );
        Ok(())
    }

    /// Apply a disease case delta to a subdivision and its parent region.
    ///
    /// The placement's region must be the subdivision's parent.
    pub fn apply_disease_case_delta(
        &self,
        placement: &Placement,
        disease_key: &str,
        delta: SexDelta,
    ) -> Result<(), StatsError> {
        let (total, male, female) = delta.columns();

        self.db.with_conn(|conn| {
            conn.immediate_transaction::<_, StatsError, _>(|conn| {
                // Same parent check as the population statement
                let parented: i64 = subdivision_stats::table
                    .filter(subdivision_stats::subdivision_key.eq(placement.subdivision_key.as_str()))
                    .filter(subdivision_stats::region_key.eq(placement.region_key.as_str()))
                    .count()
                    .get_result(conn)?;
                expect_one_row(
                    parented as usize,
                    Scope::Subdivision.population_table(),
                    &placement.subdivision_key,
                )?;

                use subdivision_disease_facts::dsl as sdf;
                let rows = diesel::update(
                    sdf::subdivision_disease_facts
                        .find((placement.subdivision_key.as_str(), disease_key)),
                )
                .set((
                    sdf::cases.eq(sdf::cases + total),
                    sdf::cases_male.eq(sdf::cases_male + male),
                    sdf::cases_female.eq(sdf::cases_female + female),
                ))
                .execute(conn)?;
                expect_one_row(
                    rows,
                    Scope::Subdivision.disease_table(),
                    &format!("{}/{}", placement.subdivision_key, disease_key),
                )?;

                use region_disease_facts::dsl as rdf;
                let rows = diesel::update(
                    rdf::region_disease_facts.find((placement.region_key.as_str(), disease_key)),
                )
                .set((
                    rdf::cases.eq(rdf::cases + total),
                    rdf::cases_male.eq(rdf::cases_male + male),
                    rdf::cases_female.eq(rdf::cases_female + female),
                ))
                .execute(conn)?;
                expect_one_row(
                    rows,
                    Scope::Region.disease_table(),
                    &format!("{}/{}", placement.region_key, disease_key),
                )?;

                Ok(())
            })
        })?;

        debug!(
            placement = %placement,
            disease = %disease_key,
            sex = %delta.sex,
            step = delta.step,
            "Applied disease case delta"
        );
        Ok(())
    }

    /// Zero every counter. Returns the number of rows touched.
    pub fn reset(&self) -> Result<usize, StatsError> {
        let rows = self.db.with_conn(|conn| {
            conn.immediate_transaction::<_, StatsError, _>(|conn| {
                let mut rows = diesel::update(region_stats::table)
                    .set((
                        region_stats::pop.eq(0),
                        region_stats::pop_male.eq(0),
                        region_stats::pop_female.eq(0),
                        region_stats::pop_per_area.eq(0.0),
                    ))
                    .execute(conn)?;
                rows += diesel::update(subdivision_stats::table)
                    .set((
                        subdivision_stats::pop.eq(0),
                        subdivision_stats::pop_male.eq(0),
                        subdivision_stats::pop_female.eq(0),
                        subdivision_stats::pop_per_area.eq(0.0),
                    ))
                    .execute(conn)?;
                rows += diesel::update(region_disease_facts::table)
                    .set((
                        region_disease_facts::cases.eq(0),
                        region_disease_facts::cases_male.eq(0),
                        region_disease_facts::cases_female.eq(0),
                    ))
                    .execute(conn)?;
                rows += diesel::update(subdivision_disease_facts::table)
                    .set((
                        subdivision_disease_facts::cases.eq(0),
                        subdivision_disease_facts::cases_male.eq(0),
                        subdivision_disease_facts::cases_female.eq(0),
                    ))
                    .execute(conn)?;
                Ok(rows)
            })
        })?;

        warn!(rows, "Reset all counters to zero");
        Ok(rows)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn population(&self, scope: Scope, key: &str) -> Result<Option<PopulationCounter>, StatsError> {
        self.db.with_conn(|conn| {
            let counter = match scope {
                Scope::Region => region_stats::table
                    .find(key)
                    .select(RegionStats::as_select())
                    .first(conn)
                    .optional()?
                    .map(PopulationCounter::from),
                Scope::Subdivision => subdivision_stats::table
                    .find(key)
                    .select(SubdivisionStats::as_select())
                    .first(conn)
                    .optional()?
                    .map(PopulationCounter::from),
            };
            Ok(counter)
        })
    }

    pub fn disease_cases(
        &self,
        scope: Scope,
        key: &str,
        disease_key: &str,
    ) -> Result<Option<DiseaseCaseCounter>, StatsError> {
        self.db.with_conn(|conn| {
            let counter = match scope {
                Scope::Region => region_disease_facts::table
                    .find((key, disease_key))
                    .select(RegionDiseaseFacts::as_select())
                    .first(conn)
                    .optional()?
                    .map(DiseaseCaseCounter::from),
                Scope::Subdivision => subdivision_disease_facts::table
                    .find((key, disease_key))
                    .select(SubdivisionDiseaseFacts::as_select())
                    .first(conn)
                    .optional()?
                    .map(DiseaseCaseCounter::from),
            };
            Ok(counter)
        })
    }

    /// All counter rows, regions first, ordered by key
    pub fn snapshot(&self) -> Result<Snapshot, StatsError> {
        self.db.with_conn(|conn| {
            conn.transaction::<_, StatsError, _>(|conn| {
                let mut population: Vec<PopulationCounter> = region_stats::table
                    .order(region_stats::region_key.asc())
                    .select(RegionStats::as_select())
                    .load(conn)?
                    .into_iter()
                    .map(PopulationCounter::from)
                    .collect();
                population.extend(
                    subdivision_stats::table
                        .order(subdivision_stats::subdivision_key.asc())
                        .select(SubdivisionStats::as_select())
                        .load(conn)?
                        .into_iter()
                        .map(PopulationCounter::from),
                );

                let mut disease_cases: Vec<DiseaseCaseCounter> = region_disease_facts::table
                    .order((
                        region_disease_facts::region_key.asc(),
                        region_disease_facts::disease_key.asc(),
                    ))
                    .select(RegionDiseaseFacts::as_select())
                    .load(conn)?
                    .into_iter()
                    .map(DiseaseCaseCounter::from)
                    .collect();
                disease_cases.extend(
                    subdivision_disease_facts::table
                        .order((
                            subdivision_disease_facts::subdivision_key.asc(),
                            subdivision_disease_facts::disease_key.asc(),
                        ))
                        .select(SubdivisionDiseaseFacts::as_select())
                        .load(conn)?
                        .into_iter()
                        .map(DiseaseCaseCounter::from),
                );

                Ok(Snapshot { population, disease_cases })
            })
        })
    }

    /// Parent region of every subdivision counter row
    fn subdivision_parents(&self) -> Result<Vec<(String, String)>, StatsError> {
        self.db.with_conn(|conn| {
            Ok(subdivision_stats::table
                .select((subdivision_stats::subdivision_key, subdivision_stats::region_key))
                .load::<(String, String)>(conn)?)
        })
    }

    /// Check every row against the additive and density invariants, and every
    /// region against the sum of its subdivisions.
    ///
    /// Read-only; an empty result means the ledger is consistent.
    pub fn audit(&self) -> Result<Vec<InvariantViolation>, StatsError> {
        let snapshot = self.snapshot()?;
        let parents: std::collections::HashMap<String, String> =
            self.subdivision_parents()?.into_iter().collect();
        let mut violations = Vec::new();

        for row in &snapshot.population {
            if row.total != row.male + row.female {
                violations.push(InvariantViolation {
                    scope: row.scope,
                    key: row.key.clone(),
                    disease_key: None,
                    detail: format!("total {} != male {} + female {}", row.total, row.male, row.female),
                });
            }
            if row.total < 0 || row.male < 0 || row.female < 0 {
                violations.push(InvariantViolation {
                    scope: row.scope,
                    key: row.key.clone(),
                    disease_key: None,
                    detail: "negative population".to_string(),
                });
            }
            let expected = if row.area > 0.0 { row.total as f64 / row.area } else { 0.0 };
            if (row.per_area - expected).abs() > DENSITY_EPSILON * expected.abs().max(1.0) {
                violations.push(InvariantViolation {
                    scope: row.scope,
                    key: row.key.clone(),
                    disease_key: None,
                    detail: format!("density {} != {} / {}", row.per_area, row.total, row.area),
                });
            }
        }

        for row in &snapshot.disease_cases {
            if row.total != row.male + row.female {
                violations.push(InvariantViolation {
                    scope: row.scope,
                    key: row.key.clone(),
                    disease_key: Some(row.disease_key.clone()),
                    detail: format!("total {} != male {} + female {}", row.total, row.male, row.female),
                });
            }
            if row.total < 0 || row.male < 0 || row.female < 0 {
                violations.push(InvariantViolation {
                    scope: row.scope,
                    key: row.key.clone(),
                    disease_key: Some(row.disease_key.clone()),
                    detail: "negative case count".to_string(),
                });
            }
        }

        violations.extend(fan_out_violations(&snapshot, &parents));

        if !violations.is_empty() {
            warn!(count = violations.len(), "Counter audit found invariant violations");
        }
        Ok(violations)
    }
}

fn expect_one_row(rows: usize, table: &'static str, key: &str) -> Result<(), StatsError> {
    if rows == 0 {
        return Err(StatsError::UnknownKey {
            table,
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Regions whose counters differ from the sum over their subdivisions
fn fan_out_violations(
    snapshot: &Snapshot,
    parents: &std::collections::HashMap<String, String>,
) -> Vec<InvariantViolation> {
    use std::collections::HashMap;

    let mut population_sums: HashMap<&str, (i64, i64, i64)> = HashMap::new();
    for row in snapshot.population.iter().filter(|r| r.scope == Scope::Subdivision) {
        if let Some(region) = parents.get(&row.key) {
            let sum = population_sums.entry(region.as_str()).or_default();
            sum.0 += row.total;
            sum.1 += row.male;
            sum.2 += row.female;
        }
    }

    let mut case_sums: HashMap<(&str, &str), (i64, i64, i64)> = HashMap::new();
    for row in snapshot.disease_cases.iter().filter(|r| r.scope == Scope::Subdivision) {
        if let Some(region) = parents.get(&row.key) {
            let sum = case_sums
                .entry((region.as_str(), row.disease_key.as_str()))
                .or_default();
            sum.0 += row.total;
            sum.1 += row.male;
            sum.2 += row.female;
        }
    }

    let mut violations = Vec::new();
    for row in snapshot.population.iter().filter(|r| r.scope == Scope::Region) {
        let sum = population_sums.get(row.key.as_str()).copied().unwrap_or_default();
        if sum != (row.total, row.male, row.female) {
            violations.push(InvariantViolation {
                scope: Scope::Region,
                key: row.key.clone(),
                disease_key: None,
                detail: format!(
                    "population ({}, {}, {}) != subdivision sum ({}, {}, {})",
                    row.total, row.male, row.female, sum.0, sum.1, sum.2
                ),
            });
        }
    }
    for row in snapshot.disease_cases.iter().filter(|r| r.scope == Scope::Region) {
        let sum = case_sums
            .get(&(row.key.as_str(), row.disease_key.as_str()))
            .copied()
            .unwrap_or_default();
        if sum != (row.total, row.male, row.female) {
            violations.push(InvariantViolation {
                scope: Scope::Region,
                key: row.key.clone(),
                disease_key: Some(row.disease_key.clone()),
                detail: format!(
                    "cases ({}, {}, {}) != subdivision sum ({}, {}, {})",
                    row.total, row.male, row.female, sum.0, sum.1, sum.2
                ),
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Disease, Region, Subdivision};
    use crate::db::reference::seed_reference;
    use crate::reference::ReferenceData;

    fn ledger() -> CounterLedger {
        let db = Database::open_in_memory().unwrap();
        let reference = ReferenceData {
            regions: vec![Region {
                region_key: "R".into(),
                state_key: "25".into(),
                name: "Region".into(),
                area: 400.0,
            }],
            subdivisions: vec![
                Subdivision { subdivision_key: "S1".into(), region_key: "R".into(), name: "One".into(), area: 100.0 },
                Subdivision { subdivision_key: "S2".into(), region_key: "R".into(), name: "Two".into(), area: 3.0 },
            ],
            diseases: vec![Disease {
                disease_key: "D".into(),
                name: "Diabetes".into(),
                code_system: "http://snomed.info/sct".into(),
                code: "44054006".into(),
            }],
        };
        db.with_conn(|conn| seed_reference(conn, &reference)).unwrap();
        CounterLedger::new(db)
    }

    #[test]
    fn test_population_delta_moves_both_rows() {
        let ledger = ledger();
        let s1 = Placement::new("S1", "R");

        ledger.apply_population_delta(&s1, SexDelta::increment(Sex::Male)).unwrap();
        ledger.apply_population_delta(&s1, SexDelta::increment(Sex::Female)).unwrap();
        ledger.apply_population_delta(&s1, SexDelta::increment(Sex::Male)).unwrap();

        let sub = ledger.population(Scope::Subdivision, "S1").unwrap().unwrap();
        assert_eq!((sub.total, sub.male, sub.female), (3, 2, 1));
        assert_eq!(sub.per_area, 3.0 / 100.0);

        let region = ledger.population(Scope::Region, "R").unwrap().unwrap();
        assert_eq!((region.total, region.male, region.female), (3, 2, 1));
        assert_eq!(region.per_area, 3.0 / 400.0);

        assert!(ledger.audit().unwrap().is_empty());
    }

    #[test]
    fn test_density_uses_post_update_total() {
        let ledger = ledger();
        let s2 = Placement::new("S2", "R");

        ledger.apply_population_delta(&s2, SexDelta::increment(Sex::Female)).unwrap();
        ledger.apply_population_delta(&s2, SexDelta::increment(Sex::Female)).unwrap();
        ledger.apply_population_delta(&s2, SexDelta::decrement(Sex::Female)).unwrap();

        let sub = ledger.population(Scope::Subdivision, "S2").unwrap().unwrap();
        assert_eq!(sub.total, 1);
        assert_eq!(sub.per_area, 1.0 / 3.0);
    }

    #[test]
    fn test_disease_delta() {
        let ledger = ledger();
        let s1 = Placement::new("S1", "R");

        ledger.apply_disease_case_delta(&s1, "D", SexDelta::increment(Sex::Male)).unwrap();
        ledger.apply_disease_case_delta(&s1, "D", SexDelta::increment(Sex::Female)).unwrap();
        ledger.apply_disease_case_delta(&s1, "D", SexDelta::decrement(Sex::Male)).unwrap();

        for scope_key in [(Scope::Subdivision, "S1"), (Scope::Region, "R")] {
            let row = ledger.disease_cases(scope_key.0, scope_key.1, "D").unwrap().unwrap();
            assert_eq!((row.total, row.male, row.female), (1, 0, 1));
        }
        let untouched = ledger.disease_cases(Scope::Subdivision, "S2", "D").unwrap().unwrap();
        assert_eq!(untouched.total, 0);
    }

    #[test]
    fn test_unknown_keys_are_errors() {
        let ledger = ledger();

        let err = ledger
            .apply_population_delta(&Placement::new("S9", "R"), SexDelta::increment(Sex::Male))
            .unwrap_err();
        assert!(matches!(err, StatsError::UnknownKey { table: "subdivision_stats", .. }));

        // Subdivision exists but under a different parent
        let err = ledger
            .apply_population_delta(&Placement::new("S1", "X"), SexDelta::increment(Sex::Male))
            .unwrap_err();
        assert!(matches!(err, StatsError::UnknownKey { .. }));

        let err = ledger
            .apply_disease_case_delta(&Placement::new("S1", "R"), "nope", SexDelta::increment(Sex::Male))
            .unwrap_err();
        assert!(matches!(err, StatsError::UnknownKey { table: "subdivision_disease_facts", .. }));

        let snapshot = ledger.snapshot().unwrap();
        assert!(snapshot.population.iter().all(|r| r.total == 0));
    }

    #[test]
    fn test_disease_delta_requires_parent_region() {
        let db = Database::open_in_memory().unwrap();
        let region = |key: &str| Region {
            region_key: key.into(),
            state_key: "25".into(),
            name: format!("Region {}", key),
            area: 400.0,
        };
        let reference = ReferenceData {
            regions: vec![region("R"), region("Q")],
            subdivisions: vec![
                Subdivision { subdivision_key: "S1".into(), region_key: "R".into(), name: "One".into(), area: 100.0 },
            ],
            diseases: vec![Disease {
                disease_key: "D".into(),
                name: "Diabetes".into(),
                code_system: "http://snomed.info/sct".into(),
                code: "44054006".into(),
            }],
        };
        db.with_conn(|conn| seed_reference(conn, &reference)).unwrap();
        let ledger = CounterLedger::new(db);

        let err = ledger
            .apply_disease_case_delta(&Placement::new("S1", "Q"), "D", SexDelta::increment(Sex::Female))
            .unwrap_err();
        assert!(matches!(err, StatsError::UnknownKey { table: "subdivision_stats", .. }));

        let snapshot = ledger.snapshot().unwrap();
        assert!(snapshot.disease_cases.iter().all(|r| r.total == 0));
        assert!(ledger.audit().unwrap().is_empty());
    }

    #[test]
    fn test_failed_region_update_rolls_back_subdivision() {
        let ledger = ledger();
        ledger
            .database()
            .with_conn(|conn| {
                diesel::sql_query("DELETE FROM region_stats WHERE region_key = 'R'").execute(conn)?;
                Ok(())
            })
            .unwrap();

        let err = ledger
            .apply_population_delta(&Placement::new("S1", "R"), SexDelta::increment(Sex::Male))
            .unwrap_err();
        assert!(matches!(err, StatsError::UnknownKey { table: "region_stats", .. }));

        let sub = ledger.population(Scope::Subdivision, "S1").unwrap().unwrap();
        assert_eq!(sub.total, 0);
    }

    #[test]
    fn test_reset_and_audit() {
        let ledger = ledger();
        let s1 = Placement::new("S1", "R");
        ledger.apply_population_delta(&s1, SexDelta::increment(Sex::Male)).unwrap();
        ledger.apply_disease_case_delta(&s1, "D", SexDelta::increment(Sex::Male)).unwrap();

        // Break the fan-out by hand
        ledger
            .database()
            .with_conn(|conn| {
                diesel::sql_query("UPDATE region_stats SET pop = pop + 1, pop_male = pop_male + 1")
                    .execute(conn)?;
                Ok(())
            })
            .unwrap();
        let violations = ledger.audit().unwrap();
        assert!(violations.iter().any(|v| v.scope == Scope::Region && v.detail.contains("subdivision sum")));
        assert!(violations.iter().any(|v| v.detail.contains("density")));

        // 1 region + 2 subdivisions + 1 region facts + 2 subdivision facts
        assert_eq!(ledger.reset().unwrap(), 6);
        assert!(ledger.audit().unwrap().is_empty());
        let region = ledger.population(Scope::Region, "R").unwrap().unwrap();
        assert_eq!(region.total, 0);
    }
}
