use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Client-side view of an API error body.
///
/// The server answers failures with `application/problem+json`; this type
/// keeps the fields a client acts on and ignores the rest.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `recipient_not_found`.
    #[serde(default)]
    pub code: Option<String>,
    /// Human readable reason, shown next to the composer.
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            status: None,
        }
    }

    /// `true` when retrying the same request cannot succeed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Some(400..=499))
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, self.status) {
            (Some(code), Some(status)) => write!(f, "{} ({code}, {status})", self.message),
            (Some(code), None) => write!(f, "{} ({code})", self.message),
            (None, _) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ErrorResponse {}
