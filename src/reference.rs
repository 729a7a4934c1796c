//! Reference data: regions, subdivisions and tracked diseases
//!
//! Reference data is read from a TOML file at `init` time, validated, and
//! seeded into the database. At startup it is read back from the database and
//! turned into the in-memory lookup tables ([`crate::geo::Gazetteer`] and
//! [`DiseaseCatalog`]).
//!
//! ```toml
//! [[regions]]
//! region_key = "025"
//! state_key = "25"
//! name = "Suffolk County"
//! area = 58.15
//!
//! [[subdivisions]]
//! subdivision_key = "07000"
//! region_key = "025"
//! name = "Boston"
//! area = 48.34
//!
//! [[diseases]]
//! disease_key = "1"
//! name = "Diabetes"
//! code = "44054006"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::models::{Disease, Region, Subdivision};
use crate::error::StatsError;
use crate::resources::Condition;

/// Full set of reference rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub subdivisions: Vec<Subdivision>,
    #[serde(default)]
    pub diseases: Vec<Disease>,
}

impl ReferenceData {
    /// Load reference data from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StatsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, StatsError> {
        Ok(toml::from_str(content)?)
    }

    /// Fill in `code_system` on disease mappings that left it blank
    pub fn with_default_code_system(mut self, code_system: &str) -> Self {
        for disease in &mut self.diseases {
            if disease.code_system.trim().is_empty() {
                disease.code_system = code_system.to_string();
            }
        }
        self
    }

    /// Check keys are unique, parents exist and areas are positive
    pub fn validate(&self) -> Result<(), StatsError> {
        let mut region_keys = HashSet::new();
        for region in &self.regions {
            if region.region_key.is_empty() {
                return Err(StatsError::InvalidReference("region with empty key".into()));
            }
            if !region_keys.insert(region.region_key.as_str()) {
                return Err(StatsError::InvalidReference(format!(
                    "duplicate region key {}",
                    region.region_key
                )));
            }
            check_area("region", &region.region_key, region.area)?;
        }

        let mut subdivision_keys = HashSet::new();
        for subdivision in &self.subdivisions {
            if subdivision.subdivision_key.is_empty() {
                return Err(StatsError::InvalidReference("subdivision with empty key".into()));
            }
            if !subdivision_keys.insert(subdivision.subdivision_key.as_str()) {
                return Err(StatsError::InvalidReference(format!(
                    "duplicate subdivision key {}",
                    subdivision.subdivision_key
                )));
            }
            if !region_keys.contains(subdivision.region_key.as_str()) {
                return Err(StatsError::InvalidReference(format!(
                    "subdivision {} names unknown region {}",
                    subdivision.subdivision_key, subdivision.region_key
                )));
            }
            check_area("subdivision", &subdivision.subdivision_key, subdivision.area)?;
        }

        let mut disease_keys = HashSet::new();
        let mut codes = HashSet::new();
        for disease in &self.diseases {
            if !disease_keys.insert(disease.disease_key.as_str()) {
                return Err(StatsError::InvalidReference(format!(
                    "duplicate disease key {}",
                    disease.disease_key
                )));
            }
            if disease.code_system.is_empty() || disease.code.is_empty() {
                return Err(StatsError::InvalidReference(format!(
                    "disease {} has no code system or code",
                    disease.disease_key
                )));
            }
            if !codes.insert((disease.code_system.as_str(), disease.code.as_str())) {
                return Err(StatsError::InvalidReference(format!(
                    "code {}|{} mapped twice",
                    disease.code_system, disease.code
                )));
            }
        }

        Ok(())
    }
}

fn check_area(kind: &str, key: &str, area: f64) -> Result<(), StatsError> {
    if area.is_finite() && area > 0.0 {
        Ok(())
    } else {
        Err(StatsError::InvalidReference(format!(
            "{} {} has non-positive area {}",
            kind, key, area
        )))
    }
}

// ============================================================================
// Disease Catalog
// ============================================================================

/// In-memory condition code → disease key lookup
#[derive(Debug, Clone, Default)]
pub struct DiseaseCatalog {
    by_code: HashMap<(String, String), String>,
}

impl DiseaseCatalog {
    pub fn new(diseases: &[Disease]) -> Self {
        let by_code = diseases
            .iter()
            .map(|d| ((d.code_system.clone(), d.code.clone()), d.disease_key.clone()))
            .collect();
        Self { by_code }
    }

    pub fn from_reference(reference: &ReferenceData) -> Self {
        Self::new(&reference.diseases)
    }

    /// Disease key for a single coded value
    pub fn lookup(&self, system: &str, code: &str) -> Option<&str> {
        self.by_code
            .get(&(system.to_string(), code.to_string()))
            .map(String::as_str)
    }

    /// Disease key for the first coding of the condition that has a mapping
    pub fn disease_for(&self, condition: &Condition) -> Option<&str> {
        let found = condition.codings().iter().find_map(|coding| {
            match (coding.system.as_deref(), coding.code.as_deref()) {
                (Some(system), Some(code)) => self.lookup(system, code),
                _ => None,
            }
        });
        if found.is_none() {
            debug!(condition = ?condition.id, "No tracked disease for condition codes");
        }
        found
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SNOMED_CODE_SYSTEM;
    use crate::resources::{CodeableConcept, Coding};

    const SAMPLE: &str = r#"
        [[regions]]
        region_key = "025"
        state_key = "25"
        name = "Suffolk County"
        area = 58.15

        [[subdivisions]]
        subdivision_key = "07000"
        region_key = "025"
        name = "Boston"
        area = 48.34

        [[diseases]]
        disease_key = "1"
        name = "Diabetes"
        code = "44054006"
    "#;

    fn coding(system: &str, code: &str) -> Coding {
        Coding { system: Some(system.into()), code: Some(code.into()), display: None }
    }

    #[test]
    fn test_parse_and_validate() {
        let data = ReferenceData::from_toml(SAMPLE)
            .unwrap()
            .with_default_code_system(SNOMED_CODE_SYSTEM);
        data.validate().unwrap();
        assert_eq!(data.regions.len(), 1);
        assert_eq!(data.subdivisions[0].name, "Boston");
        assert_eq!(data.diseases[0].code_system, SNOMED_CODE_SYSTEM);
    }

    #[test]
    fn test_validate_rejects_orphan_subdivision() {
        let mut data = ReferenceData::from_toml(SAMPLE)
            .unwrap()
            .with_default_code_system(SNOMED_CODE_SYSTEM);
        data.subdivisions[0].region_key = "999".into();
        assert!(matches!(data.validate(), Err(StatsError::InvalidReference(_))));
    }

    #[test]
    fn test_validate_rejects_zero_area() {
        let mut data = ReferenceData::from_toml(SAMPLE)
            .unwrap()
            .with_default_code_system(SNOMED_CODE_SYSTEM);
        data.regions[0].area = 0.0;
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_validate_requires_code_system() {
        let data = ReferenceData::from_toml(SAMPLE).unwrap();
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_catalog_picks_first_mapped_coding() {
        let data = ReferenceData::from_toml(SAMPLE)
            .unwrap()
            .with_default_code_system(SNOMED_CODE_SYSTEM);
        let catalog = DiseaseCatalog::from_reference(&data);

        let condition = Condition {
            code: Some(CodeableConcept {
                coding: vec![
                    coding("http://hl7.org/fhir/sid/icd-10", "E11"),
                    coding(SNOMED_CODE_SYSTEM, "44054006"),
                ],
                text: None,
            }),
            ..Default::default()
        };
        assert_eq!(catalog.disease_for(&condition), Some("1"));

        let untracked = Condition {
            code: Some(CodeableConcept {
                coding: vec![coding(SNOMED_CODE_SYSTEM, "00000000")],
                text: None,
            }),
            ..Default::default()
        };
        assert_eq!(catalog.disease_for(&untracked), None);
        assert_eq!(catalog.disease_for(&Condition::default()), None);
    }
}
