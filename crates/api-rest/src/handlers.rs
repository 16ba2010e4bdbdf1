//! HTTP handlers of the patient-facing API.
//!
//! Every handler parses its input into core types first and then runs the core call on the
//! blocking pool through [`AppState::run`].

use crate::caller::Caller;
use crate::dto::{
    AppointmentPageRes, AppointmentRes, CreateAppointmentReq, ErrorsRes, HealthRes,
    ListAppointmentsParams, RelatedPatientReq, RelatedPatientRes, RelatedPatientsRes,
    TimeSlotDatesRes, TimeSlotRes, TimeSlotsRes, TimeslotParams,
};
use crate::error::ApiFailure;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use clinic_core::CoreError;
use std::str::FromStr;

/// Parses a path identifier; anything malformed cannot exist.
fn path_id<T: FromStr>(entity: &'static str, raw: &str) -> Result<T, ApiFailure> {
    raw.trim()
        .parse()
        .map_err(|_| ApiFailure(CoreError::not_found(entity, raw)))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used by monitoring and load balancers; it does not touch the store.
#[axum::debug_handler]
pub async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Clinic REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/appointments",
    params(
        ("x-patient-id" = String, Header, description = "Calling patient"),
        ListAppointmentsParams,
    ),
    responses(
        (status = 200, description = "Appointments visible to the caller", body = AppointmentPageRes),
        (status = 400, description = "Invalid filters", body = ErrorsRes),
        (status = 401, description = "Caller not identified", body = ErrorsRes),
        (status = 409, description = "Filtered patient is not related to the caller", body = ErrorsRes)
    )
)]
/// List the caller's appointments, newest first
///
/// Includes the appointments of related patients the caller may manage.
///
/// # Errors
/// Returns `400 Bad Request` if a filter value cannot be parsed or mutually exclusive flags are
/// combined, and `409 Conflict` if `related_patient_id` is not a dependent of the caller.
#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(params): Query<ListAppointmentsParams>,
) -> Result<Json<AppointmentPageRes>, ApiFailure> {
    let (filters, page) = params.into_filters()?;
    let page = state
        .run(move |portal| portal.list_appointments(caller, &filters, page))
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    post,
    path = "/appointments",
    params(("x-patient-id" = String, Header, description = "Calling patient")),
    request_body = CreateAppointmentReq,
    responses(
        (status = 201, description = "Appointment request created", body = AppointmentRes),
        (status = 400, description = "Invalid request", body = ErrorsRes),
        (status = 404, description = "Time slot not found", body = ErrorsRes),
        (status = 409, description = "Requested time is not available", body = ErrorsRes)
    )
)]
/// Request a new appointment
///
/// The appointment starts in `ON_MODERATION` and is forwarded to the MIS.
///
/// # Errors
/// Returns `409 Conflict` if the slot is busy, the doctor has no free slots in the window or the
/// patient already asked this doctor today.
#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateAppointmentReq>,
) -> Result<(StatusCode, Json<AppointmentRes>), ApiFailure> {
    let request = req.into_request()?;
    let created = state
        .run(move |portal| portal.create_appointment(caller, request))
        .await?;
    Ok((StatusCode::CREATED, Json(AppointmentRes::from(&created))))
}

#[utoipa::path(
    get,
    path = "/appointments/{id}",
    params(
        ("x-patient-id" = String, Header, description = "Calling patient"),
        ("id" = String, Path, description = "Appointment id"),
    ),
    responses(
        (status = 200, description = "Appointment", body = AppointmentRes),
        (status = 404, description = "Not visible to the caller", body = ErrorsRes)
    )
)]
#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<AppointmentRes>, ApiFailure> {
    let id = path_id("appointment", &id)?;
    let appointment = state
        .run(move |portal| portal.appointment(caller, id))
        .await?;
    Ok(Json(AppointmentRes::from(&appointment)))
}

#[utoipa::path(
    delete,
    path = "/appointments/{id}",
    params(
        ("x-patient-id" = String, Header, description = "Calling patient"),
        ("id" = String, Path, description = "Appointment id"),
    ),
    responses(
        (status = 200, description = "Appointment cancelled", body = AppointmentRes),
        (status = 403, description = "Caller may not manage this appointment", body = ErrorsRes),
        (status = 409, description = "Status does not allow cancelling", body = ErrorsRes)
    )
)]
/// Cancel an appointment on behalf of the caller
///
/// Linked time slots stay busy; the MIS adapter releases them.
#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<AppointmentRes>, ApiFailure> {
    let id = path_id("appointment", &id)?;
    let cancelled = state
        .run(move |portal| portal.cancel_appointment(caller, id))
        .await?;
    Ok(Json(AppointmentRes::from(&cancelled)))
}

#[utoipa::path(
    get,
    path = "/timeslots",
    params(TimeslotParams),
    responses(
        (status = 200, description = "Bookable time slots", body = TimeSlotsRes),
        (status = 400, description = "Invalid filters", body = ErrorsRes)
    )
)]
#[axum::debug_handler]
pub async fn list_timeslots(
    State(state): State<AppState>,
    Query(params): Query<TimeslotParams>,
) -> Result<Json<TimeSlotsRes>, ApiFailure> {
    let filters = params.into_filters()?;
    let slots = state
        .run(move |portal| portal.available_timeslots(filters))
        .await?;
    Ok(Json(TimeSlotsRes {
        timeslots: slots.iter().map(TimeSlotRes::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/timeslots/dates",
    params(TimeslotParams),
    responses(
        (status = 200, description = "Local dates with bookable slots", body = TimeSlotDatesRes),
        (status = 400, description = "Invalid filters", body = ErrorsRes)
    )
)]
#[axum::debug_handler]
pub async fn list_timeslot_dates(
    State(state): State<AppState>,
    Query(params): Query<TimeslotParams>,
) -> Result<Json<TimeSlotDatesRes>, ApiFailure> {
    let filters = params.into_filters()?;
    let dates = state
        .run(move |portal| {
            portal.available_timeslot_dates(filters.doctor_id, filters.subsidiary_id)
        })
        .await?;
    Ok(Json(dates.into()))
}

#[utoipa::path(
    get,
    path = "/related-patients",
    params(("x-patient-id" = String, Header, description = "Calling patient")),
    responses(
        (status = 200, description = "Dependents of the caller", body = RelatedPatientsRes),
        (status = 400, description = "Related patients are disabled", body = ErrorsRes)
    )
)]
#[axum::debug_handler]
pub async fn list_related_patients(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<RelatedPatientsRes>, ApiFailure> {
    let related = state
        .run(move |portal| portal.related_patients(caller))
        .await?;
    Ok(Json(RelatedPatientsRes {
        related_patients: related.iter().map(RelatedPatientRes::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/related-patients",
    params(("x-patient-id" = String, Header, description = "Calling patient")),
    request_body = RelatedPatientReq,
    responses(
        (status = 201, description = "Related patient created", body = RelatedPatientRes),
        (status = 400, description = "Invalid profile", body = ErrorsRes),
        (status = 409, description = "Same person already related", body = ErrorsRes)
    )
)]
/// Register a dependent patient of the caller
///
/// The new patient is unconfirmed and has no user account of their own.
#[axum::debug_handler]
pub async fn create_related_patient(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<RelatedPatientReq>,
) -> Result<(StatusCode, Json<RelatedPatientRes>), ApiFailure> {
    let input = req.into_input()?;
    let created = state
        .run(move |portal| portal.create_related_patient(caller, input))
        .await?;
    Ok((StatusCode::CREATED, Json(RelatedPatientRes::from(&created))))
}

#[utoipa::path(
    put,
    path = "/related-patients/{id}",
    params(
        ("x-patient-id" = String, Header, description = "Calling patient"),
        ("id" = String, Path, description = "Related patient id"),
    ),
    request_body = RelatedPatientReq,
    responses(
        (status = 200, description = "Related patient updated", body = RelatedPatientRes),
        (status = 400, description = "Invalid profile", body = ErrorsRes),
        (status = 409, description = "Not related to the caller", body = ErrorsRes)
    )
)]
#[axum::debug_handler]
pub async fn update_related_patient(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(req): Json<RelatedPatientReq>,
) -> Result<Json<RelatedPatientRes>, ApiFailure> {
    let slave = path_id("patient", &id)?;
    let input = req.into_input()?;
    let updated = state
        .run(move |portal| portal.update_related_patient(caller, slave, input))
        .await?;
    Ok(Json(RelatedPatientRes::from(&updated)))
}

#[utoipa::path(
    delete,
    path = "/related-patients/{id}",
    params(
        ("x-patient-id" = String, Header, description = "Calling patient"),
        ("id" = String, Path, description = "Related patient id"),
    ),
    responses(
        (status = 204, description = "Relation removed"),
        (status = 409, description = "Not related to the caller", body = ErrorsRes)
    )
)]
/// Remove the relation to a dependent patient
///
/// The patient record and its appointments are kept.
#[axum::debug_handler]
pub async fn delete_related_patient(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiFailure> {
    let slave = path_id("patient", &id)?;
    state
        .run(move |portal| portal.delete_related_patient(caller, slave))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
