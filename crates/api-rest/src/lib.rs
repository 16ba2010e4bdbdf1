//! # API REST
//!
//! REST API implementation for the clinic's patient portal.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, request deadlines)
//!
//! The core is synchronous; handlers hand each call to the blocking pool. A call whose write
//! would commit after the configured request timeout is rolled back and reported as transient.

#![warn(rust_2018_idioms)]

pub mod caller;
pub mod dto;
pub mod error;
pub mod handlers;

use axum::routing::get;
use axum::Router;
use clinic_core::{store, CoreError, CoreResult, PatientPortal};
use error::ApiFailure;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state for the REST API server
///
/// Cloned into every handler; the portal itself shares the store and collaborators.
#[derive(Clone)]
pub struct AppState {
    portal: PatientPortal,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(portal: PatientPortal) -> Self {
        let request_timeout = portal.workflow().config().request_timeout();
        Self {
            portal,
            request_timeout,
        }
    }

    pub fn portal(&self) -> &PatientPortal {
        &self.portal
    }

    /// Runs a core call on the blocking pool under the request deadline.
    ///
    /// The deadline is enforced at commit time: a write transaction that would land after it is
    /// discarded, so a request reported as failed never leaves a change behind.
    ///
    /// # Errors
    /// Returns [`CoreError::Transient`] when the deadline passes before the commit or the task
    /// panics; core errors are passed through.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ApiFailure>
    where
        F: FnOnce(&PatientPortal) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let portal = self.portal.clone();
        let deadline = Instant::now() + self.request_timeout;
        let task = tokio::task::spawn_blocking(move || {
            store::with_commit_deadline(deadline, || f(&portal))
        });
        match task.await {
            Ok(result) => result.map_err(ApiFailure::from),
            Err(join_err) => Err(ApiFailure(CoreError::Transient(format!(
                "request task failed: {join_err}"
            )))),
        }
    }

    #[cfg(test)]
    fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::list_appointments,
        handlers::create_appointment,
        handlers::get_appointment,
        handlers::cancel_appointment,
        handlers::list_timeslots,
        handlers::list_timeslot_dates,
        handlers::list_related_patients,
        handlers::create_related_patient,
        handlers::update_related_patient,
        handlers::delete_related_patient,
    ),
    components(schemas(
        dto::HealthRes,
        dto::ErrorSourceRes,
        dto::ErrorRes,
        dto::ErrorsRes,
        dto::AppointmentRes,
        dto::AppointmentPageRes,
        dto::CreateAppointmentReq,
        dto::TimeSlotRes,
        dto::TimeSlotsRes,
        dto::TimeSlotDatesRes,
        dto::PatientRes,
        dto::RelatedPatientRes,
        dto::RelatedPatientsRes,
        dto::RelatedPatientReq,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/appointments",
            get(handlers::list_appointments).post(handlers::create_appointment),
        )
        .route(
            "/appointments/:id",
            get(handlers::get_appointment).delete(handlers::cancel_appointment),
        )
        .route("/timeslots", get(handlers::list_timeslots))
        .route("/timeslots/dates", get(handlers::list_timeslot_dates))
        .route(
            "/related-patients",
            get(handlers::list_related_patients).post(handlers::create_related_patient),
        )
        .route(
            "/related-patients/:id",
            axum::routing::put(handlers::update_related_patient)
                .delete(handlers::delete_related_patient),
        )
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
