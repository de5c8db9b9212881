use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    routing::get,
};
use shared::models::{OnlineStatus, OnlineUsersResponse};

use crate::{
    app_state::AppState,
    http::{error::AppResult, problem::ProblemDetails},
    middleware::request_context::RequestContext,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/online", get(online_users))
        .route("/users/{handle}/online", get(online_status))
}

#[utoipa::path(
    get,
    path = "/api/users/online",
    responses(
        (status = 200, description = "Users with a live connection", body = OnlineUsersResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ProblemDetails)
    ),
    tag = "Presence"
)]
pub async fn online_users(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<OnlineUsersResponse>> {
    context.require_user()?;
    Ok(Json(OnlineUsersResponse {
        users: state.hub().online_users(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/users/{handle}/online",
    params(("handle" = String, Path, description = "Handle to look up")),
    responses(
        (status = 200, description = "Presence of the handle; unknown handles are offline", body = OnlineStatus),
        (status = 401, description = "Missing or invalid bearer token", body = ProblemDetails)
    ),
    tag = "Presence"
)]
pub async fn online_status(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(handle): Path<String>,
) -> AppResult<Json<OnlineStatus>> {
    context.require_user()?;
    let user = state.store.find_by_handle(handle.trim()).await?;

    Ok(Json(OnlineStatus {
        user_id: user.as_ref().map(|u| u.id),
        is_online: user.as_ref().is_some_and(|u| state.hub().is_online(u.id)),
        handle,
    }))
}
