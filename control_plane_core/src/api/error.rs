//! API errors.
//!
//! Every failure is answered with a failed [`Envelope`] and a status code
//! derived from the [`ControlPlaneError`] kind.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use control_plane_shared_types::{ControlPlaneError, Envelope};

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(flatten)]
    envelope: Envelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
}

#[derive(Debug)]
pub struct ApiError(pub ControlPlaneError);

impl ApiError {
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self(ControlPlaneError::Validation(message.into()))
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ControlPlaneError::Validation(_) => StatusCode::BAD_REQUEST,
            ControlPlaneError::InvalidTransition { .. } | ControlPlaneError::OperationInProgress(_) => {
                StatusCode::CONFLICT
            }
            ControlPlaneError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControlPlaneError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ControlPlaneError::ProvisioningFailure { .. } | ControlPlaneError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ControlPlaneError> for ApiError {
    fn from(err: ControlPlaneError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation_error(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = %status, error = %self.0, "Request failed");
        }

        let exit_code = match &self.0 {
            ControlPlaneError::ProvisioningFailure { exit_code, .. } => *exit_code,
            _ => None,
        };
        let body = ErrorBody {
            envelope: Envelope::from(&self.0),
            exit_code,
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = Result<T, ApiError>;
