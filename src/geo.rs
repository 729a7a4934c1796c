//! Geographic resolver
//!
//! Maps a locality name (a patient's city) to the subdivision and region it
//! belongs to, and a region to its parent state. Lookups are exact string
//! matches against the reference data and never touch the database; the
//! gazetteer is built once and shared read-only between threads.

use std::collections::HashMap;

use serde::Serialize;

use crate::reference::ReferenceData;

/// Where a subject is counted: a subdivision and its parent region
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Placement {
    pub subdivision_key: String,
    pub region_key: String,
}

impl Placement {
    pub fn new(subdivision_key: impl Into<String>, region_key: impl Into<String>) -> Self {
        Self {
            subdivision_key: subdivision_key.into(),
            region_key: region_key.into(),
        }
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.region_key, self.subdivision_key)
    }
}

/// Immutable locality and region lookup tables
#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    by_locality: HashMap<String, Placement>,
    region_states: HashMap<String, String>,
    undefined_key: String,
}

impl Gazetteer {
    /// Build lookup tables from reference data.
    ///
    /// When two subdivisions share a name the one with the lowest key wins.
    pub fn from_reference(reference: &ReferenceData, undefined_key: &str) -> Self {
        let mut subdivisions: Vec<_> = reference.subdivisions.iter().collect();
        subdivisions.sort_by(|a, b| a.subdivision_key.cmp(&b.subdivision_key));

        let mut by_locality = HashMap::with_capacity(subdivisions.len());
        for subdivision in subdivisions {
            by_locality
                .entry(subdivision.name.clone())
                .or_insert_with(|| Placement::new(&subdivision.subdivision_key, &subdivision.region_key));
        }

        let region_states = reference
            .regions
            .iter()
            .map(|r| (r.region_key.clone(), r.state_key.clone()))
            .collect();

        Self {
            by_locality,
            region_states,
            undefined_key: undefined_key.to_string(),
        }
    }

    /// Resolve a locality to its placement.
    ///
    /// `None` covers an empty name, an unknown name, and a name mapped to the
    /// reserved undefined key alike.
    pub fn resolve(&self, locality: &str) -> Option<&Placement> {
        if locality.is_empty() {
            return None;
        }
        self.by_locality
            .get(locality)
            .filter(|p| !p.subdivision_key.is_empty() && p.subdivision_key != self.undefined_key)
    }

    /// Parent state of a region
    pub fn state_for_region(&self, region_key: &str) -> Option<&str> {
        self.region_states.get(region_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_locality.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_locality.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Region, Subdivision};

    fn subdivision(key: &str, region: &str, name: &str) -> Subdivision {
        Subdivision {
            subdivision_key: key.into(),
            region_key: region.into(),
            name: name.into(),
            area: 10.0,
        }
    }

    fn gazetteer() -> Gazetteer {
        let reference = ReferenceData {
            regions: vec![
                Region { region_key: "025".into(), state_key: "25".into(), name: "Suffolk".into(), area: 58.15 },
                Region { region_key: "017".into(), state_key: "25".into(), name: "Middlesex".into(), area: 817.82 },
            ],
            subdivisions: vec![
                subdivision("07000", "025", "Boston"),
                subdivision("04615", "017", "Bedford"),
                subdivision("00000", "017", "County subdivisions not defined"),
                subdivision("99999", "017", "Boston"),
            ],
            diseases: vec![],
        };
        Gazetteer::from_reference(&reference, "00000")
    }

    #[test]
    fn test_resolve_known_locality() {
        let gaz = gazetteer();
        let placement = gaz.resolve("Bedford").unwrap();
        assert_eq!(placement, &Placement::new("04615", "017"));
        assert_eq!(gaz.state_for_region(&placement.region_key), Some("25"));
    }

    #[test]
    fn test_not_found_cases_are_indistinguishable() {
        let gaz = gazetteer();
        assert_eq!(gaz.resolve(""), None);
        assert_eq!(gaz.resolve("Atlantis"), None);
        assert_eq!(gaz.resolve("County subdivisions not defined"), None);
    }

    #[test]
    fn test_exact_match_only() {
        let gaz = gazetteer();
        assert_eq!(gaz.resolve("boston"), None);
        assert_eq!(gaz.resolve("Bost"), None);
        assert_eq!(gaz.resolve("  Boston "), None);
        assert_eq!(gaz.resolve("Bedford\t"), None);
    }

    #[test]
    fn test_duplicate_name_takes_lowest_key() {
        let gaz = gazetteer();
        assert_eq!(gaz.resolve("Boston").unwrap().subdivision_key, "07000");
    }
}
