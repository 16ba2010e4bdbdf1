//! Patients, their user accounts and master/slave relations.

use chrono::NaiveDate;
use clinic_types::{NonEmptyText, PatientId, RelationId, UserId};
use serde::{Deserialize, Serialize};

/// A user account; the receiver of push events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: NonEmptyText,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

/// Name, birth date and gender of a patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub last_name: NonEmptyText,
    pub first_name: NonEmptyText,
    #[serde(default)]
    pub middle_name: Option<NonEmptyText>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Gender,
}

impl PatientProfile {
    /// `Last First Middle`, skipping the middle name when absent.
    pub fn full_name(&self) -> String {
        match &self.middle_name {
            Some(middle) => format!("{} {} {}", self.last_name, self.first_name, middle),
            None => format!("{} {}", self.last_name, self.first_name),
        }
    }

    /// Two profiles describe the same person when names and birth date match,
    /// ignoring letter case.
    pub fn same_person_as(&self, other: &PatientProfile) -> bool {
        fn eq(a: &NonEmptyText, b: &NonEmptyText) -> bool {
            a.as_str().to_lowercase() == b.as_str().to_lowercase()
        }
        let middle_eq = match (&self.middle_name, &other.middle_name) {
            (Some(a), Some(b)) => eq(a, b),
            (None, None) => true,
            _ => false,
        };
        eq(&self.last_name, &other.last_name)
            && eq(&self.first_name, &other.first_name)
            && middle_eq
            && self.birth_date == other.birth_date
    }
}

/// A clinical subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub profile: PatientProfile,
    /// Owning user account, if the patient has one.
    pub user: Option<UserId>,
    /// `true` for patients known to the clinic, `false` for self-registered ones.
    pub is_confirmed: bool,
}

impl Patient {
    pub fn full_name(&self) -> String {
        self.profile.full_name()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Child,
    Parent,
    Spouse,
    Other,
}

/// Directed edge from a master patient to a dependent (slave) patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub master: PatientId,
    pub slave: PatientId,
    pub relation_type: RelationType,
    /// Grants the master the right to create and manage the slave's appointments.
    pub can_update_slave_appointments: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(last: &str, first: &str, birth: Option<NaiveDate>) -> PatientProfile {
        PatientProfile {
            last_name: NonEmptyText::new(last).unwrap(),
            first_name: NonEmptyText::new(first).unwrap(),
            middle_name: None,
            birth_date: birth,
            gender: Gender::Unknown,
        }
    }

    #[test]
    fn test_full_name_without_middle_name() {
        assert_eq!(profile("Ivanova", "Anna", None).full_name(), "Ivanova Anna");
    }

    #[test]
    fn test_same_person_ignores_case() {
        let birth = NaiveDate::from_ymd_opt(2015, 6, 1);
        assert!(profile("Ivanova", "Anna", birth).same_person_as(&profile("IVANOVA", "anna", birth)));
        assert!(!profile("Ivanova", "Anna", birth).same_person_as(&profile("Ivanova", "Anna", None)));
    }
}
