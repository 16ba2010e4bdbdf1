//! Doctors, clinic branches and the service catalogue.

use clinic_types::{DoctorId, NonEmptyText, ServiceId, SubsidiaryId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub full_name: NonEmptyText,
    /// Patients may pick exact time slots of this doctor.
    pub is_timeslots_available_for_patient: bool,
    /// Suppressed from every patient-facing view.
    pub is_totally_hidden: bool,
    /// Service account; hidden from doctor listings but may still own slots.
    pub is_fake: bool,
}

/// A clinic branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsidiary {
    pub id: SubsidiaryId,
    pub title: NonEmptyText,
    pub address: NonEmptyText,
}

/// Catalogue entry; services form a tree through `parent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub title: NonEmptyText,
    #[serde(default)]
    pub parent: Option<ServiceId>,
}
