use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tracing::{debug, instrument};

use crate::{
    app_state::AppState,
    auth::token::extract_token,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    store::Authenticator,
};

/// Resolves the bearer credential and records the caller on the request
/// context. Requests without a valid token stop here with `401`.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let token = extract_token(request.headers(), None)
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let user = state
        .store
        .authenticate(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid or expired token"))?;
    debug!(user_id = %user.id, "request authenticated");

    match request.extensions_mut().get_mut::<RequestContext>() {
        Some(context) => context.user = Some(user),
        None => {
            request.extensions_mut().insert(RequestContext {
                request_id: String::new(),
                user: Some(user),
            });
        }
    }

    Ok(next.run(request).await)
}
