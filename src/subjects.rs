//! Subject lookup
//!
//! Conditions carry only a reference to their patient, so the engine asks a
//! [`SubjectLookup`] for the patient record to find its locality and sex.

use dashmap::DashMap;

use crate::error::StatsError;
use crate::resources::{kinds, Patient};

/// Read access to the primary record store's patients
pub trait SubjectLookup: Send + Sync {
    /// Fetch a subject by id and resource type. `Ok(None)` means not found,
    /// including when the type is not one the store holds.
    fn get(&self, id: &str, resource_type: &str) -> Result<Option<Patient>, StatsError>;
}

/// Patient directory held in memory
#[derive(Debug, Default)]
pub struct InMemorySubjects {
    patients: DashMap<String, Patient>,
}

impl InMemorySubjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a patient. Patients without an id are ignored.
    pub fn put(&self, patient: Patient) -> Option<Patient> {
        let id = patient.id.clone()?;
        self.patients.insert(id, patient)
    }

    pub fn remove(&self, id: &str) -> Option<Patient> {
        self.patients.remove(id).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

impl SubjectLookup for InMemorySubjects {
    fn get(&self, id: &str, resource_type: &str) -> Result<Option<Patient>, StatsError> {
        if resource_type != kinds::PATIENT {
            return Ok(None);
        }
        Ok(self.patients.get(id).map(|p| p.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let subjects = InMemorySubjects::new();
        subjects.put(Patient {
            id: Some("p1".into()),
            gender: Some("female".into()),
            address: vec![],
        });
        assert_eq!(subjects.len(), 1);

        let found = subjects.get("p1", kinds::PATIENT).unwrap().unwrap();
        assert_eq!(found.gender.as_deref(), Some("female"));
        assert!(subjects.get("p2", kinds::PATIENT).unwrap().is_none());
        assert!(subjects.get("p1", "Group").unwrap().is_none());

        subjects.remove("p1");
        assert!(subjects.is_empty());
    }

    #[test]
    fn test_patient_without_id_is_ignored() {
        let subjects = InMemorySubjects::new();
        assert!(subjects.put(Patient::default()).is_none());
        assert!(subjects.is_empty());
    }
}
