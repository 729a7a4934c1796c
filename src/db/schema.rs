//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::StatsError;

/// Schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), StatsError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, StatsError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), StatsError> {
    diesel::sql_query("DELETE FROM schema_version").execute(conn)?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)?;
    Ok(())
}

fn create_tables(conn: &mut SqliteConnection) -> Result<(), StatsError> {
    conn.batch_execute(REFERENCE_SCHEMA)?;
    conn.batch_execute(COUNTER_SCHEMA)?;
    conn.batch_execute(INDEXES_SCHEMA)?;
    Ok(())
}

/// Immutable geographic and disease reference data
const REFERENCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS regions (
    region_key TEXT PRIMARY KEY NOT NULL,
    state_key TEXT NOT NULL,
    name TEXT NOT NULL,
    area REAL NOT NULL CHECK (area > 0)
);

CREATE TABLE IF NOT EXISTS subdivisions (
    subdivision_key TEXT PRIMARY KEY NOT NULL,
    region_key TEXT NOT NULL,
    name TEXT NOT NULL,
    area REAL NOT NULL CHECK (area > 0),
    FOREIGN KEY (region_key) REFERENCES regions(region_key)
);

-- Condition code -> tracked disease
CREATE TABLE IF NOT EXISTS diseases (
    disease_key TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    code_system TEXT NOT NULL,
    code TEXT NOT NULL,
    UNIQUE (code_system, code)
);
"#;

/// Counter rows, created at seed time and only ever updated afterwards
const COUNTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS region_stats (
    region_key TEXT PRIMARY KEY NOT NULL,
    area REAL NOT NULL,
    pop INTEGER NOT NULL DEFAULT 0,
    pop_male INTEGER NOT NULL DEFAULT 0,
    pop_female INTEGER NOT NULL DEFAULT 0,
    pop_per_area REAL NOT NULL DEFAULT 0,
    FOREIGN KEY (region_key) REFERENCES regions(region_key)
);

CREATE TABLE IF NOT EXISTS subdivision_stats (
    subdivision_key TEXT PRIMARY KEY NOT NULL,
    region_key TEXT NOT NULL,
    area REAL NOT NULL,
    pop INTEGER NOT NULL DEFAULT 0,
    pop_male INTEGER NOT NULL DEFAULT 0,
    pop_female INTEGER NOT NULL DEFAULT 0,
    pop_per_area REAL NOT NULL DEFAULT 0,
    FOREIGN KEY (subdivision_key) REFERENCES subdivisions(subdivision_key)
);

CREATE TABLE IF NOT EXISTS region_disease_facts (
    region_key TEXT NOT NULL,
    disease_key TEXT NOT NULL,
    cases INTEGER NOT NULL DEFAULT 0,
    cases_male INTEGER NOT NULL DEFAULT 0,
    cases_female INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (region_key, disease_key),
    FOREIGN KEY (region_key) REFERENCES regions(region_key),
    FOREIGN KEY (disease_key) REFERENCES diseases(disease_key)
);

CREATE TABLE IF NOT EXISTS subdivision_disease_facts (
    subdivision_key TEXT NOT NULL,
    disease_key TEXT NOT NULL,
    cases INTEGER NOT NULL DEFAULT 0,
    cases_male INTEGER NOT NULL DEFAULT 0,
    cases_female INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (subdivision_key, disease_key),
    FOREIGN KEY (subdivision_key) REFERENCES subdivisions(subdivision_key),
    FOREIGN KEY (disease_key) REFERENCES diseases(disease_key)
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_subdivisions_name ON subdivisions(name);
CREATE INDEX IF NOT EXISTS idx_subdivisions_region ON subdivisions(region_key);
CREATE INDEX IF NOT EXISTS idx_subdivision_stats_region ON subdivision_stats(region_key);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }
}
