//! Appointment entity and its status lattice.
//!
//! Status membership questions ("is this active?", "may a patient see it?") are answered
//! from the derivation tables on [`AppointmentStatus`] only; call sites never build their
//! own status lists.

use crate::interval::Interval;
use crate::CoreResult;
use chrono::{DateTime, Utc};
use clinic_types::{AppointmentId, DoctorId, NonEmptyText, PatientId, ServiceId, SubsidiaryId};
use serde::{Deserialize, Serialize};

// ============================================================================
// STATUS LATTICE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Hidden,
    OnModeration,
    Rejected,
    Planned,
    CanceledByModerator,
    CanceledByPatient,
    CanceledByDoctor,
    CancelRequestByPatient,
    PatientArrived,
    OnAppointment,
    AwaitingPayment,
    Finished,
    Missed,
}

use AppointmentStatus::*;

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 13] = [
        Hidden,
        OnModeration,
        Rejected,
        Planned,
        CanceledByModerator,
        CanceledByPatient,
        CanceledByDoctor,
        CancelRequestByPatient,
        PatientArrived,
        OnAppointment,
        AwaitingPayment,
        Finished,
        Missed,
    ];

    pub const ACTIVE: [AppointmentStatus; 6] = [
        OnModeration,
        Planned,
        PatientArrived,
        OnAppointment,
        AwaitingPayment,
        CancelRequestByPatient,
    ];

    pub const ARCHIVED: [AppointmentStatus; 6] = [
        Rejected,
        CanceledByModerator,
        CanceledByPatient,
        CanceledByDoctor,
        Finished,
        Missed,
    ];

    pub const CANCELLED: [AppointmentStatus; 3] =
        [CanceledByDoctor, CanceledByModerator, CanceledByPatient];

    /// Everything except `HIDDEN` and `CANCELED_BY_PATIENT`.
    pub const VISIBLE_FOR_PATIENT: [AppointmentStatus; 11] = [
        OnModeration,
        Rejected,
        Planned,
        CanceledByModerator,
        CanceledByDoctor,
        CancelRequestByPatient,
        PatientArrived,
        OnAppointment,
        AwaitingPayment,
        Finished,
        Missed,
    ];

    /// Statuses the reconciliation tasks move to `FINISHED` once time has passed.
    pub const FINISHABLE: [AppointmentStatus; 4] =
        [Planned, PatientArrived, AwaitingPayment, OnAppointment];

    /// Numeric code shared with the MIS.
    pub fn code(self) -> u8 {
        match self {
            Hidden => 0,
            OnModeration => 1,
            Rejected => 2,
            Planned => 10,
            CanceledByModerator => 20,
            CanceledByPatient => 21,
            CanceledByDoctor => 22,
            CancelRequestByPatient => 23,
            PatientArrived => 30,
            OnAppointment => 40,
            AwaitingPayment => 50,
            Finished => 60,
            Missed => 70,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Hidden => "HIDDEN",
            OnModeration => "ON_MODERATION",
            Rejected => "REJECTED",
            Planned => "PLANNED",
            CanceledByModerator => "CANCELED_BY_MODERATOR",
            CanceledByPatient => "CANCELED_BY_PATIENT",
            CanceledByDoctor => "CANCELED_BY_DOCTOR",
            CancelRequestByPatient => "CANCEL_REQUEST_BY_PATIENT",
            PatientArrived => "PATIENT_ARRIVED",
            OnAppointment => "ON_APPOINTMENT",
            AwaitingPayment => "AWAITING_PAYMENT",
            Finished => "FINISHED",
            Missed => "MISSED",
        }
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    /// Archived statuses are terminal.
    pub fn is_archived(self) -> bool {
        Self::ARCHIVED.contains(&self)
    }

    pub fn is_cancelled(self) -> bool {
        Self::CANCELLED.contains(&self)
    }

    pub fn is_visible_for_patient(self) -> bool {
        Self::VISIBLE_FOR_PATIENT.contains(&self)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreatedByType {
    Patient,
    Doctor,
    Administrator,
}

// ============================================================================
// INTEGRATION DATA
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraSubsidiaryInfo {
    pub subsidiary_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_request_id: Option<i64>,
}

/// MIS identifiers of an appointment:
/// `{extra_subsidiary_info: [{subsidiary_id, patient_id?, appointment_request_id?}]}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentIntegrationData {
    #[serde(default)]
    pub extra_subsidiary_info: Vec<ExtraSubsidiaryInfo>,
}

impl AppointmentIntegrationData {
    /// Decodes the opaque storage blob.
    pub fn from_blob(blob: &[u8]) -> CoreResult<Self> {
        if blob.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(blob)?)
    }

    pub fn to_blob(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// MIS appointment-request id recorded for `subsidiary_id`, if any.
    pub fn request_id_for(&self, subsidiary_id: i64) -> Option<i64> {
        self.extra_subsidiary_info
            .iter()
            .find(|info| info.subsidiary_id == subsidiary_id)
            .and_then(|info| info.appointment_request_id)
    }
}

// ============================================================================
// APPOINTMENT
// ============================================================================

/// A booked or requested encounter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    /// The subject of the encounter.
    pub patient: PatientId,
    /// Who booked it: the patient or one of their masters.
    pub author_patient: PatientId,
    pub doctor: Option<DoctorId>,
    pub service: Option<ServiceId>,
    pub subsidiary: Option<SubsidiaryId>,
    pub reason_text: Option<NonEmptyText>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub is_for_whole_day: bool,
    /// Price in minor currency units.
    pub price: Option<i64>,
    pub status: AppointmentStatus,
    pub created_by_type: CreatedByType,
    #[serde(default)]
    pub integration_data: AppointmentIntegrationData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Present only when both ends are known.
    pub fn interval(&self) -> Option<Interval> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(Interval::new(start, end)),
            _ => None,
        }
    }

    /// The duplicate-booking key `(patient, doctor, service, subsidiary, start, end)`.
    pub fn uniqueness_key(&self) -> AppointmentKey {
        AppointmentKey {
            patient: self.patient,
            doctor: self.doctor,
            service: self.service,
            subsidiary: self.subsidiary,
            start: self.start,
            end: self.end,
        }
    }

    pub fn has_creation_data(&self) -> bool {
        self.doctor.is_some() || self.service.is_some() || self.reason_text.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AppointmentKey {
    pub patient: PatientId,
    pub doctor: Option<DoctorId>,
    pub service: Option<ServiceId>,
    pub subsidiary: Option<SubsidiaryId>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

// ============================================================================
// STATUS HISTORY
// ============================================================================

/// Who caused a status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Patient(PatientId),
    Moderator,
    Integration,
    Task(String),
}

/// Append-only record of one status change; creation has `from = None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub appointment: AppointmentId,
    pub from: Option<AppointmentStatus>,
    pub to: AppointmentStatus,
    pub at: DateTime<Utc>,
    pub actor: Actor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_archived_partition_non_hidden() {
        for status in AppointmentStatus::ALL {
            let buckets = [status.is_active(), status.is_archived(), status == Hidden];
            assert_eq!(buckets.iter().filter(|b| **b).count(), 1, "{status}");
        }
    }

    #[test]
    fn test_codes_round_trip() {
        for status in AppointmentStatus::ALL {
            assert_eq!(AppointmentStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(AppointmentStatus::from_code(3), None);
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&CancelRequestByPatient).unwrap();
        assert_eq!(json, "\"CANCEL_REQUEST_BY_PATIENT\"");
        assert_eq!(CancelRequestByPatient.to_string(), "CANCEL_REQUEST_BY_PATIENT");
    }

    #[test]
    fn test_patient_visibility_excludes_hidden_and_self_cancel() {
        assert!(!Hidden.is_visible_for_patient());
        assert!(!CanceledByPatient.is_visible_for_patient());
        assert!(CanceledByModerator.is_visible_for_patient());
    }

    #[test]
    fn test_integration_data_lookup() {
        let data: AppointmentIntegrationData = serde_json::from_str(
            r#"{"extra_subsidiary_info":[{"subsidiary_id":3,"appointment_request_id":99}]}"#,
        )
        .unwrap();
        assert_eq!(data.request_id_for(3), Some(99));
        assert_eq!(data.request_id_for(4), None);
    }
}
