use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::problem::ProblemDetails;
use crate::{services::delivery::DeliveryError, store::StoreError};

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = self.details {
            problem = problem.with_details(details);
        }
        problem.into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "store failure");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_unavailable",
            "the message store could not complete the request",
        )
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        let reason = err.reason();
        match err {
            DeliveryError::AuthenticationFailed => Self::unauthorized(reason),
            DeliveryError::RecipientNotFound(handle) => {
                Self::not_found("recipient_not_found", reason).with_details(json!({ "handle": handle }))
            }
            DeliveryError::NotAMember(group_id) => {
                Self::forbidden("not_a_member", reason).with_details(json!({ "groupId": group_id }))
            }
            DeliveryError::EmptyMessage => Self::bad_request("empty_message", reason),
            DeliveryError::AmbiguousTarget => Self::bad_request("ambiguous_target", reason),
            DeliveryError::MessageNotFound(id) => {
                Self::not_found("message_not_found", reason).with_details(json!({ "messageId": id }))
            }
            DeliveryError::Store(store) => Self::from(store),
        }
    }
}
