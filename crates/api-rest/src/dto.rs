//! Wire types of the REST API.
//!
//! Identifiers and instants travel as strings (UUIDs and RFC 3339). Request bodies and query
//! strings are parsed into core types here so that malformed input is reported in the same
//! `{"errors": [...]}` shape as every other validation failure.

use chrono::{DateTime, NaiveDate, Utc};
use clinic_core::appointment::{Appointment, CreatedByType};
use clinic_core::error::{ApiErrors, ErrorCollector};
use clinic_core::patient::{Gender, Patient, PatientProfile, RelationType};
use clinic_core::portal::{
    AppointmentFilters, Page, PageRequest, RelatedPatient, RelatedPatientInput, TimeslotFilters,
};
use clinic_core::timeslot::TimeSlot;
use clinic_core::workflow::AppointmentRequest;
use clinic_core::{CoreError, CoreResult};
use clinic_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// PARSING HELPERS
// ============================================================================

fn bad_field(parameter: &str, reason: impl Into<String>) -> CoreError {
    CoreError::BadField {
        parameter: parameter.into(),
        reason: reason.into(),
    }
}

/// Parses an optional identifier, recording a failure against `parameter`.
fn parse_opt<T: FromStr>(
    errors: &mut ErrorCollector,
    parameter: &str,
    raw: Option<&str>,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(bad_field(parameter, format!("`{raw}` is not a valid identifier")));
            None
        }
    }
}

/// Parses a comma-separated list (`a,b,c`); blank entries are skipped.
fn parse_list<T: FromStr>(
    errors: &mut ErrorCollector,
    parameter: &str,
    raw: Option<&str>,
) -> Vec<T> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let mut values = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match part.parse() {
            Ok(value) => values.push(value),
            Err(_) => errors.push(CoreError::BadFilter {
                parameter: parameter.into(),
                reason: format!("`{part}` is not a valid value"),
            }),
        }
    }
    values
}

fn parse_instant(
    errors: &mut ErrorCollector,
    parameter: &str,
    raw: Option<&str>,
) -> Option<DateTime<Utc>> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(value) => Some(value.with_timezone(&Utc)),
        Err(_) => {
            errors.push(CoreError::BadDate {
                parameter: parameter.into(),
                reason: format!("`{raw}` is not an RFC 3339 timestamp"),
            });
            None
        }
    }
}

fn parse_date(
    errors: &mut ErrorCollector,
    parameter: &str,
    raw: Option<&str>,
) -> Option<NaiveDate> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(CoreError::BadDate {
                parameter: parameter.into(),
                reason: format!("`{raw}` is not a YYYY-MM-DD date"),
            });
            None
        }
    }
}

/// Reads a snake_case enum value through its serde representation.
fn parse_enum<T: serde::de::DeserializeOwned>(
    errors: &mut ErrorCollector,
    parameter: &str,
    raw: &str,
) -> Option<T> {
    match serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase())) {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(bad_field(parameter, format!("unknown value `{raw}`")));
            None
        }
    }
}

fn required_text(
    errors: &mut ErrorCollector,
    parameter: &str,
    raw: &str,
) -> Option<NonEmptyText> {
    match NonEmptyText::new(raw) {
        Ok(text) => Some(text),
        Err(_) => {
            errors.push(bad_field(parameter, "cannot be empty"));
            None
        }
    }
}

fn format_instant(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn created_by_name(value: CreatedByType) -> &'static str {
    match value {
        CreatedByType::Patient => "PATIENT",
        CreatedByType::Doctor => "DOCTOR",
        CreatedByType::Administrator => "ADMINISTRATOR",
    }
}

fn gender_name(value: Gender) -> &'static str {
    match value {
        Gender::Male => "male",
        Gender::Female => "female",
        Gender::Unknown => "unknown",
    }
}

fn relation_name(value: RelationType) -> &'static str {
    match value {
        RelationType::Child => "child",
        RelationType::Parent => "parent",
        RelationType::Spouse => "spouse",
        RelationType::Other => "other",
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorSourceRes {
    pub parameter: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub code: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSourceRes>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorsRes {
    pub errors: Vec<ErrorRes>,
}

impl From<ApiErrors> for ErrorsRes {
    fn from(value: ApiErrors) -> Self {
        Self {
            errors: value
                .errors
                .into_iter()
                .map(|e| ErrorRes {
                    code: e.code,
                    title: e.title,
                    source: e.source.map(|s| ErrorSourceRes {
                        parameter: s.parameter,
                    }),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppointmentRes {
    pub id: String,
    pub patient_id: String,
    pub author_patient_id: String,
    pub doctor_id: Option<String>,
    pub service_id: Option<String>,
    pub subsidiary_id: Option<String>,
    pub reason_text: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub is_for_whole_day: bool,
    /// Minor currency units.
    pub price: Option<i64>,
    pub status: String,
    pub status_code: u8,
    pub created_by_type: String,
    pub created_at: String,
}

impl From<&Appointment> for AppointmentRes {
    fn from(a: &Appointment) -> Self {
        Self {
            id: a.id.to_string(),
            patient_id: a.patient.to_string(),
            author_patient_id: a.author_patient.to_string(),
            doctor_id: a.doctor.map(|id| id.to_string()),
            service_id: a.service.map(|id| id.to_string()),
            subsidiary_id: a.subsidiary.map(|id| id.to_string()),
            reason_text: a.reason_text.as_ref().map(|t| t.to_string()),
            start: a.start.map(format_instant),
            end: a.end.map(format_instant),
            is_for_whole_day: a.is_for_whole_day,
            price: a.price,
            status: a.status.name().to_string(),
            status_code: a.status.code(),
            created_by_type: created_by_name(a.created_by_type).to_string(),
            created_at: format_instant(a.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppointmentPageRes {
    pub items: Vec<AppointmentRes>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl From<Page<Appointment>> for AppointmentPageRes {
    fn from(page: Page<Appointment>) -> Self {
        Self {
            items: page.items.iter().map(AppointmentRes::from).collect(),
            total: page.total,
            offset: page.offset,
            limit: page.limit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimeSlotRes {
    pub id: String,
    pub doctor_id: String,
    pub subsidiary_id: String,
    pub start: String,
    pub end: String,
    pub duration_minutes: i64,
}

impl From<&TimeSlot> for TimeSlotRes {
    fn from(s: &TimeSlot) -> Self {
        Self {
            id: s.id.to_string(),
            doctor_id: s.doctor.to_string(),
            subsidiary_id: s.subsidiary.to_string(),
            start: format_instant(s.start),
            end: format_instant(s.end),
            duration_minutes: s.duration().num_minutes(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimeSlotsRes {
    pub timeslots: Vec<TimeSlotRes>,
}

/// Local dates (`YYYY-MM-DD`) with at least one bookable slot.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimeSlotDatesRes {
    pub dates: Vec<String>,
}

impl From<Vec<NaiveDate>> for TimeSlotDatesRes {
    fn from(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates: dates
                .into_iter()
                .map(|d| d.format(DATE_FORMAT).to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PatientRes {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub birth_date: Option<String>,
    pub gender: String,
    pub is_confirmed: bool,
}

impl From<&Patient> for PatientRes {
    fn from(p: &Patient) -> Self {
        Self {
            id: p.id.to_string(),
            last_name: p.profile.last_name.to_string(),
            first_name: p.profile.first_name.to_string(),
            middle_name: p.profile.middle_name.as_ref().map(|t| t.to_string()),
            birth_date: p
                .profile
                .birth_date
                .map(|d| d.format(DATE_FORMAT).to_string()),
            gender: gender_name(p.profile.gender).to_string(),
            is_confirmed: p.is_confirmed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RelatedPatientRes {
    pub relation_id: String,
    pub relation_type: String,
    pub can_update_slave_appointments: bool,
    pub patient: PatientRes,
}

impl From<&RelatedPatient> for RelatedPatientRes {
    fn from(r: &RelatedPatient) -> Self {
        Self {
            relation_id: r.relation_id.to_string(),
            relation_type: relation_name(r.relation_type).to_string(),
            can_update_slave_appointments: r.can_update_slave_appointments,
            patient: PatientRes::from(&r.patient),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RelatedPatientsRes {
    pub related_patients: Vec<RelatedPatientRes>,
}

// ============================================================================
// REQUESTS
// ============================================================================

/// Booking request. Either `time_slot_id` or a `start`/`end` window may be given.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CreateAppointmentReq {
    pub time_slot_id: Option<String>,
    /// RFC 3339 timestamp.
    pub start: Option<String>,
    /// RFC 3339 timestamp.
    pub end: Option<String>,
    pub subsidiary_id: Option<String>,
    pub service_id: Option<String>,
    pub doctor_id: Option<String>,
    pub reason_text: Option<String>,
    /// Book for a related patient instead of the caller.
    pub target_patient_id: Option<String>,
}

impl CreateAppointmentReq {
    pub fn into_request(self) -> CoreResult<AppointmentRequest> {
        let mut errors = ErrorCollector::new();
        let request = AppointmentRequest {
            time_slot_id: parse_opt(&mut errors, "time_slot_id", self.time_slot_id.as_deref()),
            start: parse_instant(&mut errors, "start", self.start.as_deref()),
            end: parse_instant(&mut errors, "end", self.end.as_deref()),
            subsidiary_id: parse_opt(&mut errors, "subsidiary_id", self.subsidiary_id.as_deref()),
            service_id: parse_opt(&mut errors, "service_id", self.service_id.as_deref()),
            doctor_id: parse_opt(&mut errors, "doctor_id", self.doctor_id.as_deref()),
            reason_text: NonEmptyText::from_optional(self.reason_text),
            target_patient_id: parse_opt(
                &mut errors,
                "target_patient_id",
                self.target_patient_id.as_deref(),
            ),
        };
        errors.finish()?;
        Ok(request)
    }
}

/// Profile of a dependent patient plus how they relate to the caller.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct RelatedPatientReq {
    pub last_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    /// `YYYY-MM-DD`.
    pub birth_date: Option<String>,
    /// `male`, `female` or `unknown`.
    pub gender: Option<String>,
    /// `child`, `parent`, `spouse` or `other`.
    pub relation_type: String,
}

impl RelatedPatientReq {
    pub fn into_input(self) -> CoreResult<RelatedPatientInput> {
        let mut errors = ErrorCollector::new();
        let last_name = required_text(&mut errors, "last_name", &self.last_name);
        let first_name = required_text(&mut errors, "first_name", &self.first_name);
        let birth_date = parse_date(&mut errors, "birth_date", self.birth_date.as_deref());
        let gender = match self.gender.as_deref().map(str::trim) {
            None | Some("") => Some(Gender::Unknown),
            Some(raw) => parse_enum(&mut errors, "gender", raw),
        };
        let relation_type = parse_enum(&mut errors, "relation_type", &self.relation_type);
        errors.finish()?;

        match (last_name, first_name, gender, relation_type) {
            (Some(last_name), Some(first_name), Some(gender), Some(relation_type)) => {
                Ok(RelatedPatientInput {
                    profile: PatientProfile {
                        last_name,
                        first_name,
                        middle_name: NonEmptyText::from_optional(self.middle_name),
                        birth_date,
                        gender,
                    },
                    relation_type,
                })
            }
            _ => Err(CoreError::InvalidInput("incomplete related patient".into())),
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct ListAppointmentsParams {
    /// Comma-separated doctor ids.
    pub doctor_ids: Option<String>,
    /// Comma-separated subsidiary ids.
    pub subsidiary_ids: Option<String>,
    /// Comma-separated service ids.
    pub service_ids: Option<String>,
    pub only_active: bool,
    pub only_archived: bool,
    pub only_future: bool,
    pub only_past: bool,
    /// Comma-separated numeric status codes.
    pub status_codes: Option<String>,
    pub related_patient_id: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ListAppointmentsParams {
    pub fn into_filters(self) -> CoreResult<(AppointmentFilters, PageRequest)> {
        let mut errors = ErrorCollector::new();
        let filters = AppointmentFilters {
            doctor_ids: parse_list(&mut errors, "doctor_ids", self.doctor_ids.as_deref()),
            subsidiary_ids: parse_list(
                &mut errors,
                "subsidiary_ids",
                self.subsidiary_ids.as_deref(),
            ),
            service_ids: parse_list(&mut errors, "service_ids", self.service_ids.as_deref()),
            only_active: self.only_active,
            only_archived: self.only_archived,
            only_future: self.only_future,
            only_past: self.only_past,
            status_codes: parse_list(&mut errors, "status_codes", self.status_codes.as_deref()),
            related_patient_id: parse_opt(
                &mut errors,
                "related_patient_id",
                self.related_patient_id.as_deref(),
            ),
        };
        errors.finish()?;
        Ok((
            filters,
            PageRequest {
                offset: self.offset,
                limit: self.limit,
            },
        ))
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct TimeslotParams {
    pub doctor_id: Option<String>,
    pub subsidiary_id: Option<String>,
    /// First local date to include, `YYYY-MM-DD`.
    pub start_date: Option<String>,
}

impl TimeslotParams {
    pub fn into_filters(self) -> CoreResult<TimeslotFilters> {
        let mut errors = ErrorCollector::new();
        let filters = TimeslotFilters {
            doctor_id: parse_opt(&mut errors, "doctor_id", self.doctor_id.as_deref()),
            subsidiary_id: parse_opt(&mut errors, "subsidiary_id", self.subsidiary_id.as_deref()),
            start_date: parse_date(&mut errors, "start_date", self.start_date.as_deref()),
        };
        errors.finish()?;
        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_types::DoctorId;

    #[test]
    fn test_list_params_parse_comma_separated_values() {
        let doctor = DoctorId::new();
        let params = ListAppointmentsParams {
            doctor_ids: Some(format!("{doctor}, ")),
            status_codes: Some("1,10".into()),
            limit: Some(5),
            ..Default::default()
        };
        let (filters, page) = params.into_filters().unwrap();
        assert_eq!(filters.doctor_ids, vec![doctor]);
        assert_eq!(filters.status_codes, vec![1, 10]);
        assert_eq!(page.limit, Some(5));
    }

    #[test]
    fn test_list_params_collect_every_bad_value() {
        let params = ListAppointmentsParams {
            doctor_ids: Some("nope".into()),
            status_codes: Some("x".into()),
            ..Default::default()
        };
        let err = params.into_filters().unwrap_err();
        let CoreError::Multiple(inner) = err else {
            panic!("expected multiple errors");
        };
        let parameters: Vec<_> = inner.iter().filter_map(|e| e.parameter()).collect();
        assert_eq!(parameters, vec!["doctor_ids", "status_codes"]);
    }

    #[test]
    fn test_create_request_reports_bad_start() {
        let req = CreateAppointmentReq {
            start: Some("tomorrow".into()),
            reason_text: Some("  ".into()),
            ..Default::default()
        };
        let err = req.into_request().unwrap_err();
        assert_eq!(err.code(), "bad_date");
        assert_eq!(err.parameter(), Some("start"));
    }

    #[test]
    fn test_related_patient_request_parses_enums() {
        let req = RelatedPatientReq {
            last_name: "Ivanova".into(),
            first_name: "Anna".into(),
            birth_date: Some("2015-04-01".into()),
            relation_type: "Child".into(),
            ..Default::default()
        };
        let input = req.into_input().unwrap();
        assert_eq!(input.relation_type, RelationType::Child);
        assert_eq!(input.profile.gender, Gender::Unknown);
        assert_eq!(
            input.profile.birth_date,
            NaiveDate::from_ymd_opt(2015, 4, 1)
        );
    }

    #[test]
    fn test_related_patient_request_requires_names() {
        let req = RelatedPatientReq {
            relation_type: "friend".into(),
            ..Default::default()
        };
        let err = req.into_input().unwrap_err();
        assert!(matches!(err, CoreError::Multiple(ref e) if e.len() == 3));
    }
}
