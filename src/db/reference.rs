//! Seeding and loading of reference rows
//!
//! Seeding inserts the reference rows and one zeroed counter row for every
//! subdivision, region, (subdivision, disease) and (region, disease). Rows
//! that already exist are left alone, so seeding twice is harmless.

use diesel::prelude::*;
use tracing::info;

use super::diesel_schema::{
    diseases, region_disease_facts, region_stats, regions, subdivision_disease_facts,
    subdivision_stats, subdivisions,
};
use super::models::{
    Disease, NewRegionDiseaseFacts, NewRegionStats, NewSubdivisionDiseaseFacts,
    NewSubdivisionStats, Region, Subdivision,
};
use crate::error::StatsError;
use crate::reference::ReferenceData;

/// Counts of rows inserted by [`seed_reference`]
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SeedResult {
    pub regions: usize,
    pub subdivisions: usize,
    pub diseases: usize,
    pub counter_rows: usize,
}

/// Insert reference data and zeroed counter rows in one transaction
pub fn seed_reference(
    conn: &mut SqliteConnection,
    reference: &ReferenceData,
) -> Result<SeedResult, StatsError> {
    reference.validate()?;

    let result = conn.immediate_transaction::<_, StatsError, _>(|conn| {
        let mut result = SeedResult::default();

        for region in &reference.regions {
            result.regions += diesel::insert_or_ignore_into(regions::table)
                .values(region)
                .execute(conn)?;
            result.counter_rows += diesel::insert_or_ignore_into(region_stats::table)
                .values(NewRegionStats {
                    region_key: &region.region_key,
                    area: region.area,
                })
                .execute(conn)?;
        }

        for subdivision in &reference.subdivisions {
            result.subdivisions += diesel::insert_or_ignore_into(subdivisions::table)
                .values(subdivision)
                .execute(conn)?;
            result.counter_rows += diesel::insert_or_ignore_into(subdivision_stats::table)
                .values(NewSubdivisionStats {
                    subdivision_key: &subdivision.subdivision_key,
                    region_key: &subdivision.region_key,
                    area: subdivision.area,
                })
                .execute(conn)?;
        }

        for disease in &reference.diseases {
            result.diseases += diesel::insert_or_ignore_into(diseases::table)
                .values(disease)
                .execute(conn)?;

            for region in &reference.regions {
                result.counter_rows += diesel::insert_or_ignore_into(region_disease_facts::table)
                    .values(NewRegionDiseaseFacts {
                        region_key: &region.region_key,
                        disease_key: &disease.disease_key,
                    })
                    .execute(conn)?;
            }
            for subdivision in &reference.subdivisions {
                result.counter_rows +=
                    diesel::insert_or_ignore_into(subdivision_disease_facts::table)
                        .values(NewSubdivisionDiseaseFacts {
                            subdivision_key: &subdivision.subdivision_key,
                            disease_key: &disease.disease_key,
                        })
                        .execute(conn)?;
            }
        }

        Ok(result)
    })?;

    info!(
        regions = result.regions,
        subdivisions = result.subdivisions,
        diseases = result.diseases,
        counter_rows = result.counter_rows,
        "Seeded reference data"
    );
    Ok(result)
}

/// Read all reference rows back out of the database
pub fn load_reference(conn: &mut SqliteConnection) -> Result<ReferenceData, StatsError> {
    let regions = regions::table
        .order(regions::region_key.asc())
        .select(Region::as_select())
        .load(conn)?;
    let subdivisions = subdivisions::table
        .order(subdivisions::subdivision_key.asc())
        .select(Subdivision::as_select())
        .load(conn)?;
    let diseases = diseases::table
        .order(diseases::disease_key.asc())
        .select(Disease::as_select())
        .load(conn)?;

    Ok(ReferenceData {
        regions,
        subdivisions,
        diseases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn sample() -> ReferenceData {
        ReferenceData {
            regions: vec![Region {
                region_key: "017".into(),
                state_key: "25".into(),
                name: "Middlesex County".into(),
                area: 817.82,
            }],
            subdivisions: vec![Subdivision {
                subdivision_key: "04615".into(),
                region_key: "017".into(),
                name: "Bedford".into(),
                area: 13.7,
            }],
            diseases: vec![Disease {
                disease_key: "1".into(),
                name: "Diabetes".into(),
                code_system: "http://snomed.info/sct".into(),
                code: "44054006".into(),
            }],
        }
    }

    #[test]
    fn test_seed_then_load_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let reference = sample();

        let first = db.with_conn(|conn| seed_reference(conn, &reference)).unwrap();
        assert_eq!(first.regions, 1);
        assert_eq!(first.subdivisions, 1);
        // region + subdivision stats, plus one facts row each for the disease
        assert_eq!(first.counter_rows, 4);

        let loaded = db.with_conn(load_reference).unwrap();
        assert_eq!(loaded, reference);
    }

    #[test]
    fn test_seed_twice_inserts_nothing_new() {
        let db = Database::open_in_memory().unwrap();
        let reference = sample();

        db.with_conn(|conn| seed_reference(conn, &reference)).unwrap();
        let second = db.with_conn(|conn| seed_reference(conn, &reference)).unwrap();
        assert_eq!(second, SeedResult::default());
    }
}
