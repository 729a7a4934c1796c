//! Eligibility classifier
//!
//! Pure, total functions that decide whether a record can be counted. A
//! failed classification is not an error: it carries a [`SkipReason`] that
//! the engine logs before moving on.

use serde::Serialize;
use thiserror::Error;

use crate::reference::DiseaseCatalog;
use crate::resources::{Condition, Patient};

/// The two recognized sex buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Parse a record's gender value. Only `male` and `female` are accepted;
    /// there is no default, no case folding and no whitespace stripping.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "male" => Some(Sex::Male),
            "female" => Some(Sex::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }
}

impl std::fmt::Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record does not contribute to any counter
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum SkipReason {
    #[error("no address locality")]
    MissingAddress,

    #[error("unrecognized sex {0:?}")]
    InvalidSex(Option<String>),

    #[error("locality {0:?} does not resolve to a subdivision")]
    UnresolvedLocality(String),

    #[error("condition is abated")]
    Abated,

    #[error("condition has no subject reference")]
    MissingSubject,

    #[error("subject {0} not found")]
    SubjectNotFound(String),

    #[error("condition code is not a tracked disease")]
    UntrackedDisease,
}

/// Result of classifying a demographic subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectEligibility<'a> {
    Usable { sex: Sex, locality: &'a str },
    Unusable(SkipReason),
}

/// Classify a patient: it needs a locality and a recognized sex
pub fn classify_subject(patient: &Patient) -> SubjectEligibility<'_> {
    let locality = match patient.locality() {
        Some(locality) => locality,
        None => return SubjectEligibility::Unusable(SkipReason::MissingAddress),
    };

    match patient.gender.as_deref().and_then(Sex::parse) {
        Some(sex) => SubjectEligibility::Usable { sex, locality },
        None => SubjectEligibility::Unusable(SkipReason::InvalidSex(patient.gender.clone())),
    }
}

/// Result of classifying a clinical observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationEligibility<'a> {
    Countable { disease_key: &'a str, subject_id: &'a str },
    NotCountable(SkipReason),
}

/// True when any abatement field is present
pub fn is_abated(condition: &Condition) -> bool {
    condition.abatement_date_time.is_some()
        || condition.abatement_age.is_some()
        || condition.abatement_boolean.is_some()
        || condition.abatement_period.is_some()
        || condition.abatement_range.is_some()
        || condition
            .abatement_string
            .as_deref()
            .is_some_and(|s| !s.is_empty())
}

/// Id of the patient a condition is about
pub fn subject_id(condition: &Condition) -> Option<&str> {
    condition
        .subject
        .as_ref()
        .and_then(|s| s.referenced_id())
        .filter(|id| !id.is_empty())
}

/// Classify a condition: active, about a subject, and mapped to a disease
pub fn classify_observation<'a>(
    condition: &'a Condition,
    catalog: &'a DiseaseCatalog,
) -> ObservationEligibility<'a> {
    if is_abated(condition) {
        return ObservationEligibility::NotCountable(SkipReason::Abated);
    }

    let subject_id = match subject_id(condition) {
        Some(id) => id,
        None => return ObservationEligibility::NotCountable(SkipReason::MissingSubject),
    };

    match catalog.disease_for(condition) {
        Some(disease_key) => ObservationEligibility::Countable { disease_key, subject_id },
        None => ObservationEligibility::NotCountable(SkipReason::UntrackedDisease),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Disease;
    use crate::resources::{Address, CodeableConcept, Coding, Period, Quantity, Range, Reference};

    const SNOMED: &str = "http://snomed.info/sct";

    fn patient(city: Option<&str>, gender: Option<&str>) -> Patient {
        Patient {
            id: Some("p1".into()),
            gender: gender.map(String::from),
            address: city
                .map(|c| vec![Address { city: Some(c.into()), ..Default::default() }])
                .unwrap_or_default(),
        }
    }

    fn catalog() -> DiseaseCatalog {
        DiseaseCatalog::new(&[Disease {
            disease_key: "1".into(),
            name: "Diabetes".into(),
            code_system: SNOMED.into(),
            code: "44054006".into(),
        }])
    }

    fn diabetes() -> Condition {
        Condition {
            id: Some("c1".into()),
            subject: Some(Reference::patient("p1")),
            code: Some(CodeableConcept {
                coding: vec![Coding {
                    system: Some(SNOMED.into()),
                    code: Some("44054006".into()),
                    display: None,
                }],
                text: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_sex_parse() {
        assert_eq!(Sex::parse("male"), Some(Sex::Male));
        assert_eq!(Sex::parse("female"), Some(Sex::Female));
        assert_eq!(Sex::parse("other"), None);
        assert_eq!(Sex::parse("unknown"), None);
        assert_eq!(Sex::parse("Male"), None);
        assert_eq!(Sex::parse(""), None);
        assert_eq!(Sex::parse(" male"), None);
        assert_eq!(Sex::parse("female\n"), None);
    }

    #[test]
    fn test_classify_subject() {
        assert_eq!(
            classify_subject(&patient(Some("Boston"), Some("male"))),
            SubjectEligibility::Usable { sex: Sex::Male, locality: "Boston" }
        );
        assert_eq!(
            classify_subject(&patient(None, Some("male"))),
            SubjectEligibility::Unusable(SkipReason::MissingAddress)
        );
        assert_eq!(
            classify_subject(&patient(Some(""), Some("female"))),
            SubjectEligibility::Unusable(SkipReason::MissingAddress)
        );
        assert_eq!(
            classify_subject(&patient(Some("Boston"), Some("other"))),
            SubjectEligibility::Unusable(SkipReason::InvalidSex(Some("other".into())))
        );
        assert_eq!(
            classify_subject(&patient(Some("Boston"), None)),
            SubjectEligibility::Unusable(SkipReason::InvalidSex(None))
        );
    }

    #[test]
    fn test_any_abatement_field_marks_resolved() {
        let catalog = catalog();
        let mut variants = Vec::new();

        let mut c = diabetes();
        c.abatement_date_time = Some("2020-01-01".into());
        variants.push(c);
        let mut c = diabetes();
        c.abatement_age = Some(Quantity { value: Some(42.0), unit: Some("a".into()) });
        variants.push(c);
        let mut c = diabetes();
        c.abatement_range = Some(Range { low: Some(Quantity::default()), high: None });
        variants.push(c);
        let mut c = diabetes();
        c.abatement_boolean = Some(false);
        variants.push(c);
        let mut c = diabetes();
        c.abatement_period = Some(Period::default());
        variants.push(c);
        let mut c = diabetes();
        c.abatement_string = Some("resolved after treatment".into());
        variants.push(c);

        for condition in &variants {
            assert!(is_abated(condition));
            assert_eq!(
                classify_observation(condition, &catalog),
                ObservationEligibility::NotCountable(SkipReason::Abated)
            );
        }
    }

    #[test]
    fn test_empty_abatement_string_is_not_abatement() {
        let mut c = diabetes();
        c.abatement_string = Some(String::new());
        assert!(!is_abated(&c));
    }

    #[test]
    fn test_classify_observation() {
        let catalog = catalog();
        assert_eq!(
            classify_observation(&diabetes(), &catalog),
            ObservationEligibility::Countable { disease_key: "1", subject_id: "p1" }
        );

        let mut no_subject = diabetes();
        no_subject.subject = None;
        assert_eq!(
            classify_observation(&no_subject, &catalog),
            ObservationEligibility::NotCountable(SkipReason::MissingSubject)
        );

        let mut untracked = diabetes();
        untracked.code = Some(CodeableConcept {
            coding: vec![Coding { system: Some(SNOMED.into()), code: Some("00000000".into()), display: None }],
            text: None,
        });
        assert_eq!(
            classify_observation(&untracked, &catalog),
            ObservationEligibility::NotCountable(SkipReason::UntrackedDisease)
        );
    }
}
