//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Reference rows (regions, subdivisions, diseases) are also the on-disk shape
//! of the reference data file, so they derive serde as well.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Reference Models
// ============================================================================

/// County-equivalent region
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = regions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Region {
    pub region_key: String,
    pub state_key: String,
    pub name: String,
    pub area: f64,
}

/// Town-equivalent subdivision of a region
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = subdivisions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Subdivision {
    pub subdivision_key: String,
    pub region_key: String,
    pub name: String,
    pub area: f64,
}

/// Mapping from a coded condition to a tracked disease
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = diseases)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Disease {
    pub disease_key: String,
    pub name: String,
    /// Empty in a reference file means "use the configured default"
    #[serde(default)]
    pub code_system: String,
    pub code: String,
}

// ============================================================================
// Counter Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = region_stats)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RegionStats {
    pub region_key: String,
    pub area: f64,
    pub pop: i64,
    pub pop_male: i64,
    pub pop_female: i64,
    pub pop_per_area: f64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = region_stats)]
pub struct NewRegionStats<'a> {
    pub region_key: &'a str,
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = subdivision_stats)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubdivisionStats {
    pub subdivision_key: String,
    pub region_key: String,
    pub area: f64,
    pub pop: i64,
    pub pop_male: i64,
    pub pop_female: i64,
    pub pop_per_area: f64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subdivision_stats)]
pub struct NewSubdivisionStats<'a> {
    pub subdivision_key: &'a str,
    pub region_key: &'a str,
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = region_disease_facts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RegionDiseaseFacts {
    pub region_key: String,
    pub disease_key: String,
    pub cases: i64,
    pub cases_male: i64,
    pub cases_female: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = region_disease_facts)]
pub struct NewRegionDiseaseFacts<'a> {
    pub region_key: &'a str,
    pub disease_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = subdivision_disease_facts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubdivisionDiseaseFacts {
    pub subdivision_key: String,
    pub disease_key: String,
    pub cases: i64,
    pub cases_male: i64,
    pub cases_female: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subdivision_disease_facts)]
pub struct NewSubdivisionDiseaseFacts<'a> {
    pub subdivision_key: &'a str,
    pub disease_key: &'a str,
}
