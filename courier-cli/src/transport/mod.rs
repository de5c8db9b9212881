//! Client side of the delivery core.
//!
//! [`TransportAdapter`] prefers the WebSocket and falls back to polling the
//! REST endpoint whenever the socket is down. Everything either path
//! returns is merged into one [`MessageLog`] keyed by message id, so a
//! message seen by both paths is shown once.

pub mod adapter;
pub mod merge;
pub mod rest;
pub mod socket;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub use adapter::{SendTicket, TransportAdapter, TransportEvent};
pub use merge::{LocalId, LogEntry, MergeOutcome, MessageLog, PendingTarget, Placeholder};
pub use rest::RestTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no acknowledgement before the delivery timeout")]
    DeliveryTimeout,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    Socket(Box<tungstenite::Error>),
    #[error("server rejected the request ({status}): {reason}")]
    Rejected { status: u16, reason: String },
    #[error("{0}")]
    Delivery(String),
    #[error("invalid server address: {0}")]
    Url(#[from] url::ParseError),
    #[error("transport closed")]
    Closed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
                reason: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("handshake refused")
                    .to_string(),
            },
            other => Self::Socket(Box::new(other)),
        }
    }
}

impl TransportError {
    /// Credential problems are terminal; retrying cannot help.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rejected { status: 401, .. })
    }
}

/// Which path currently carries traffic. Passive status only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    WebSocket,
    Polling,
    Disconnected,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::WebSocket => "websocket",
            Self::Polling => "polling",
            Self::Disconnected => "disconnected",
        })
    }
}
