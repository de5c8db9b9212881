use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use metrics::counter;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    auth::token::extract_token,
    http::error::ApiError,
    realtime::session::ConnectionSession,
    services::delivery::DeliveryError,
    store::Authenticator,
};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Browsers cannot set headers on the upgrade request.
    pub token: Option<String>,
}

fn reject(reason: &'static str) -> Response {
    counter!("courier_sessions_rejected_total", "reason" => reason).increment(1);
    ApiError::from(DeliveryError::AuthenticationFailed).into_response()
}

/// `GET /api/ws`. The credential is checked before the upgrade so a rejected
/// client gets a plain `401` and presence is never touched.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let Some(token) = extract_token(&headers, params.token.as_deref()) else {
        return reject("missing_token");
    };

    let user = match state.store.authenticate(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => return reject("invalid_token"),
        Err(err) => {
            warn!(error = %err, "credential lookup failed");
            return ApiError::from(err).into_response();
        }
    };

    info!(user_id = %user.id, handle = %user.handle, "websocket upgrade accepted");
    let session = ConnectionSession::new(user, state.router.clone(), &state.config.realtime);
    upgrade.on_upgrade(move |socket| session.run(socket))
}
