use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

use crate::access::AccessDenied;
use crate::gating::{AssociationError, GatingError};
use crate::lifecycle::{LifecycleError, SummaryError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.message, "request failed");
        }
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<AccessDenied> for AppError {
    fn from(value: AccessDenied) -> Self {
        AppError::forbidden(value.to_string())
    }
}

impl From<LifecycleError> for AppError {
    fn from(value: LifecycleError) -> Self {
        match value {
            LifecycleError::Forbidden(denied) => AppError::from(denied),
            LifecycleError::NotFound => AppError::not_found(),
            LifecycleError::Validation(message) => AppError::bad_request(message),
            LifecycleError::Gating(err) => AppError::from(err),
            LifecycleError::Database(err) => AppError::from(err),
            other @ (LifecycleError::InvalidState(_)
            | LifecycleError::AlreadyAcknowledged
            | LifecycleError::AlreadyRated) => AppError::bad_request(other.to_string()),
        }
    }
}

impl From<GatingError> for AppError {
    fn from(value: GatingError) -> Self {
        match value {
            GatingError::AcknowledgmentRequired { .. } => AppError::forbidden(value.to_string()),
            GatingError::Declined | GatingError::StaleProcedures | GatingError::Incomplete => {
                AppError::bad_request(value.to_string())
            }
            GatingError::Database(err) => AppError::from(err),
        }
    }
}

impl From<AssociationError> for AppError {
    fn from(value: AssociationError) -> Self {
        match value {
            AssociationError::ForeignHardware(_) => AppError::bad_request(value.to_string()),
            AssociationError::Database(err) => AppError::from(err),
        }
    }
}

impl From<SummaryError> for AppError {
    fn from(value: SummaryError) -> Self {
        match value {
            SummaryError::NotFound => AppError::not_found(),
            SummaryError::NotClosed => AppError::bad_request(value.to_string()),
            SummaryError::Generator(_) => AppError::bad_gateway(value.to_string()),
            SummaryError::Database(err) => AppError::from(err),
            SummaryError::Unavailable(message) => AppError::internal(message),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
