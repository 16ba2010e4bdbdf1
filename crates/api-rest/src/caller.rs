//! Identification of the calling patient.
//!
//! Authentication happens upstream; the gateway forwards the authenticated patient in the
//! `x-patient-id` header.

use crate::dto::{ErrorRes, ErrorsRes};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use clinic_types::PatientId;

pub const PATIENT_HEADER: &str = "x-patient-id";

/// The patient on whose behalf the request is made.
#[derive(Clone, Copy, Debug)]
pub struct Caller(pub PatientId);

#[derive(Debug)]
pub struct MissingCaller;

impl IntoResponse for MissingCaller {
    fn into_response(self) -> Response {
        let body = ErrorsRes {
            errors: vec![ErrorRes {
                code: "not_authenticated".into(),
                title: format!("Header `{PATIENT_HEADER}` with a patient id is required"),
                source: None,
            }],
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = MissingCaller;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(PATIENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .map(Caller)
            .ok_or(MissingCaller)
    }
}
