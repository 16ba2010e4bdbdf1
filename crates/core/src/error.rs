//! Error taxonomy for the clinic core.
//!
//! Every failure the core can report is a [`CoreError`] variant. Variants fall into one of
//! three caller-visible kinds (see [`ErrorKind`]): validation problems with the request,
//! state/resource conflicts, and transient environmental failures. Patient-facing callers
//! receive the stable [`CoreError::code`] plus a human [`CoreError::title`] through
//! [`ApiErrors`]; nothing validation- or state-related is ever reported as internal.

use crate::appointment::AppointmentStatus;
use clinic_types::{PatientId, TimeSlotId};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    #[error("one of doctor, service or reason text is required")]
    MissingCreationData,
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("invalid date `{parameter}`: {reason}")]
    BadDate { parameter: String, reason: String },
    #[error("invalid filter `{parameter}`: {reason}")]
    BadFilter { parameter: String, reason: String },
    #[error("invalid field `{parameter}`: {reason}")]
    BadField { parameter: String, reason: String },
    #[error("booking for related patients is disabled")]
    RelatedPatientsDisabled,
    #[error("patient has no related patients")]
    NoRelatedPatients,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{} validation errors", .0.len())]
    Multiple(Vec<CoreError>),

    // ------------------------------------------------------------------
    // State / resource
    // ------------------------------------------------------------------
    #[error(
        "wrong status {}: expected one of [{}]",
        current.name(),
        expected.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    )]
    WrongStatus {
        current: AppointmentStatus,
        expected: Vec<AppointmentStatus>,
    },
    #[error("actor is not allowed to manage this appointment")]
    WrongOwner,
    #[error("time slot {0} not found")]
    SlotNotFound(TimeSlotId),
    #[error("time slot {0} is already busy")]
    SlotBusy(TimeSlotId),
    #[error("doctor has no free time slots in the requested window")]
    NoDoctorFreeSlots,
    #[error("requested time is already taken by another appointment")]
    TimeBusyByAppointment,
    #[error("doctor does not accept bookings of exact time slots")]
    TimeslotsDisabledForDoctor,
    #[error("patient already has an appointment request for this doctor today")]
    AlreadyHasAppointmentToday,
    #[error("unexpected merge: {0}")]
    UnexpectedMerge(String),
    #[error("cannot approve appointment: {0}")]
    ApproveError(String),
    #[error("patient {0} is not related to the caller")]
    NotRelated(PatientId),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("relation between these patients already exists")]
    DuplicateRelation,
    #[error("a related patient with the same name and birth date already exists")]
    DuplicateRelatedPatient,
    #[error("an identical appointment already exists")]
    DuplicateAppointment,

    // ------------------------------------------------------------------
    // Transient / environmental
    // ------------------------------------------------------------------
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Coarse classification used by transports to pick a status code and by callers to decide
/// whether a retry is meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    NotFound,
    Transient,
    Internal,
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn wrong_status(current: AppointmentStatus, expected: &[AppointmentStatus]) -> Self {
        Self::WrongStatus {
            current,
            expected: expected.to_vec(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCreationData
            | Self::InvalidInterval(_)
            | Self::BadDate { .. }
            | Self::BadFilter { .. }
            | Self::BadField { .. }
            | Self::RelatedPatientsDisabled
            | Self::NoRelatedPatients
            | Self::InvalidInput(_)
            | Self::Multiple(_) => ErrorKind::Validation,
            Self::NotFound { .. } | Self::SlotNotFound(_) => ErrorKind::NotFound,
            Self::Transient(_) | Self::Io(_) => ErrorKind::Transient,
            Self::Serialization(_) => ErrorKind::Internal,
            _ => ErrorKind::State,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCreationData => "missing_creation_data",
            Self::InvalidInterval(_) => "invalid_interval",
            Self::BadDate { .. } => "bad_date",
            Self::BadFilter { .. } => "bad_filter",
            Self::BadField { .. } => "bad_field",
            Self::RelatedPatientsDisabled => "related_patients_disabled",
            Self::NoRelatedPatients => "no_related_patients",
            Self::InvalidInput(_) => "invalid_input",
            Self::Multiple(_) => "multiple_errors",
            Self::WrongStatus { .. } => "wrong_status",
            Self::WrongOwner => "wrong_owner",
            Self::SlotNotFound(_) => "slot_not_found",
            Self::SlotBusy(_) => "slot_busy",
            Self::NoDoctorFreeSlots => "no_doctor_free_slots",
            Self::TimeBusyByAppointment => "time_busy_by_appointment",
            Self::TimeslotsDisabledForDoctor => "timeslots_disabled_for_doctor",
            Self::AlreadyHasAppointmentToday => "already_has_appointment_today",
            Self::UnexpectedMerge(_) => "unexpected_merge",
            Self::ApproveError(_) => "approve_error",
            Self::NotRelated(_) => "not_related",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateRelation => "duplicate_relation",
            Self::DuplicateRelatedPatient => "duplicate_related_patient",
            Self::DuplicateAppointment => "duplicate_appointment",
            Self::Transient(_) | Self::Io(_) => "transient",
            Self::Serialization(_) => "internal",
        }
    }

    /// Human-readable title shown to patients.
    ///
    /// Transient and internal failures get a generic title so no storage detail leaks out.
    pub fn title(&self) -> String {
        match self.kind() {
            ErrorKind::Transient => "Service is temporarily unavailable, try again later".into(),
            ErrorKind::Internal => "Internal error".into(),
            _ => {
                let mut title = self.to_string();
                if let Some(first) = title.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                title
            }
        }
    }

    /// Request parameter the error refers to, when there is one.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::InvalidInterval(_) => Some("end"),
            Self::BadDate { parameter, .. }
            | Self::BadFilter { parameter, .. }
            | Self::BadField { parameter, .. } => Some(parameter.as_str()),
            Self::RelatedPatientsDisabled | Self::NoRelatedPatients => Some("target_patient_id"),
            Self::SlotNotFound(_) | Self::SlotBusy(_) | Self::TimeslotsDisabledForDoctor => {
                Some("time_slot_id")
            }
            Self::NoDoctorFreeSlots | Self::TimeBusyByAppointment => Some("start"),
            _ => None,
        }
    }
}

// ============================================================================
// PATIENT-FACING REPRESENTATION
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorSource {
    pub parameter: String,
}

/// One patient-facing error entry: `{code, title, source?: {parameter}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub code: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

impl From<&CoreError> for ApiError {
    fn from(err: &CoreError) -> Self {
        Self {
            code: err.code().to_string(),
            title: err.title(),
            source: err.parameter().map(|parameter| ErrorSource {
                parameter: parameter.to_string(),
            }),
        }
    }
}

/// Accumulated error response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiErrors {
    pub errors: Vec<ApiError>,
}

impl From<&CoreError> for ApiErrors {
    fn from(err: &CoreError) -> Self {
        let errors = match err {
            CoreError::Multiple(inner) => inner.iter().map(ApiError::from).collect(),
            single => vec![ApiError::from(single)],
        };
        Self { errors }
    }
}

/// Collects validation errors and reports them together.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<CoreError>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CoreError) {
        self.errors.push(err);
    }

    /// `Ok(())` when nothing was collected, the lone error when one was, and
    /// [`CoreError::Multiple`] otherwise.
    pub fn finish(mut self) -> CoreResult<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(CoreError::Multiple(self.errors)),
        }
    }
}
