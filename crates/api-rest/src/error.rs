//! Mapping of core errors onto HTTP responses.

use crate::dto::ErrorsRes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use clinic_core::{ApiErrors, CoreError, ErrorKind};

/// A failed request: the core error plus the status it is reported with.
#[derive(Debug)]
pub struct ApiFailure(pub CoreError);

impl ApiFailure {
    pub fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (CoreError::WrongOwner, _) => StatusCode::FORBIDDEN,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::State) => StatusCode::CONFLICT,
            (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Transient) => StatusCode::SERVICE_UNAVAILABLE,
            (_, ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiFailure {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "request failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.code(), "request rejected");
        }
        let body = ErrorsRes::from(ApiErrors::from(&self.0));
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::AppointmentStatus;

    #[test]
    fn test_status_follows_error_kind() {
        let cases = [
            (CoreError::MissingCreationData, StatusCode::BAD_REQUEST),
            (
                CoreError::wrong_status(
                    AppointmentStatus::Finished,
                    &[AppointmentStatus::Planned],
                ),
                StatusCode::CONFLICT,
            ),
            (CoreError::WrongOwner, StatusCode::FORBIDDEN),
            (
                CoreError::not_found("appointment", "x"),
                StatusCode::NOT_FOUND,
            ),
            (
                CoreError::Transient("db".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiFailure(err).status(), expected);
        }
    }
}
