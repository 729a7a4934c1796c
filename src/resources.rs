//! Clinical record types received from the record server
//!
//! These are the FHIR-shaped subsets of `Patient` and `Condition` that the
//! statistics need. Unknown fields are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Resource kind names as they appear in `resourceType` and references
pub mod kinds {
    pub const PATIENT: &str = "Patient";
    pub const CONDITION: &str = "Condition";
}

/// Any resource the record server may broadcast to interceptors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    Patient(Patient),
    Condition(Condition),
    /// Every other resource type; interceptors ignore these
    #[serde(other)]
    Other,
}

impl Resource {
    /// Resource type name, `"Other"` for unrecognized kinds
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Patient(_) => kinds::PATIENT,
            Resource::Condition(_) => kinds::CONDITION,
            Resource::Other => "Other",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::Patient(p) => p.id.as_deref(),
            Resource::Condition(c) => c.id.as_deref(),
            Resource::Other => None,
        }
    }

    pub fn as_patient(&self) -> Option<&Patient> {
        match self {
            Resource::Patient(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_condition(&self) -> Option<&Condition> {
        match self {
            Resource::Condition(c) => Some(c),
            _ => None,
        }
    }
}

impl From<Patient> for Resource {
    fn from(patient: Patient) -> Self {
        Resource::Patient(patient)
    }
}

impl From<Condition> for Resource {
    fn from(condition: Condition) -> Self {
        Resource::Condition(condition)
    }
}

// ============================================================================
// Patient
// ============================================================================

/// Demographic subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
}

impl Patient {
    /// Locality (city of the first address), if present and non-empty
    pub fn locality(&self) -> Option<&str> {
        self.address
            .first()
            .and_then(|a| a.city.as_deref())
            .filter(|city| !city.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

// ============================================================================
// Condition
// ============================================================================

/// Clinical observation about a subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    // abatement[x]: presence of any one of these marks the condition resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abatement_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abatement_age: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abatement_boolean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abatement_period: Option<Period>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abatement_range: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abatement_string: Option<String>,
}

impl Condition {
    /// All codings of the condition code, in document order
    pub fn codings(&self) -> &[Coding] {
        self.code.as_ref().map(|c| c.coding.as_slice()).unwrap_or(&[])
    }
}

/// Reference to another resource, e.g. `Patient/123`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    /// Reference to a patient by id
    pub fn patient(id: &str) -> Self {
        Self {
            reference: Some(format!("{}/{}", kinds::PATIENT, id)),
            resource_type: Some(kinds::PATIENT.to_string()),
            display: None,
        }
    }

    /// Split `[base/]Type/id[/_history/v]` into its type and id
    fn parts(&self) -> Option<(Option<&str>, &str)> {
        let raw = self.reference.as_deref()?.trim();
        let raw = match raw.find("/_history/") {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        match raw.rsplit_once('/') {
            Some((prefix, id)) if !id.is_empty() => {
                let kind = prefix.rsplit('/').next().filter(|k| !k.is_empty());
                Some((kind, id))
            }
            Some(_) => None,
            None if !raw.is_empty() => Some((None, raw)),
            None => None,
        }
    }

    /// Id of the referenced resource
    pub fn referenced_id(&self) -> Option<&str> {
        self.parts().map(|(_, id)| id)
    }

    /// Type of the referenced resource: explicit `type`, else parsed from the reference
    pub fn referenced_type(&self) -> Option<&str> {
        self.resource_type
            .as_deref()
            .or_else(|| self.parts().and_then(|(kind, _)| kind))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Quantity>,
}
