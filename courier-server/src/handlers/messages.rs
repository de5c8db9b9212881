//! REST fallback for sending and fetching messages when the WebSocket is
//! unavailable.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use shared::models::{
    HistoryQuery, HistoryResponse, PollQuery, PollResponse, SendMessageRequest,
    SendMessageResponse,
};
use tracing::instrument;

use crate::{
    app_state::AppState,
    http::{error::AppResult, problem::ProblemDetails},
    middleware::request_context::RequestContext,
    services::delivery::Sender,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages", post(send_message).get(history))
        .route("/messages/poll", get(poll_messages))
}

#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message persisted and routed", body = SendMessageResponse),
        (status = 400, description = "Empty message or ambiguous target", body = ProblemDetails),
        (status = 401, description = "Missing or invalid bearer token", body = ProblemDetails),
        (status = 403, description = "Sender is not a member of the group", body = ProblemDetails),
        (status = 404, description = "Recipient not found", body = ProblemDetails),
        (status = 500, description = "Store failure", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(skip_all, fields(request_id = %context.request_id))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<SendMessageResponse>)> {
    let user = context.require_user()?;
    let message = state.router.send(Sender::http(user), request).await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message: "Message sent".to_string(),
            data: message,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/messages/poll",
    params(PollQuery),
    responses(
        (status = 200, description = "Direct messages newer than the watermark", body = PollResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(skip_all, fields(request_id = %context.request_id))]
pub async fn poll_messages(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<PollQuery>,
) -> AppResult<Json<PollResponse>> {
    let user = context.require_user()?;
    let messages = state.router.poll(user, query.since).await?;

    Ok(Json(PollResponse {
        messages,
        timestamp: Utc::now(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/messages",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Conversation history, oldest first", body = HistoryResponse),
        (status = 400, description = "Both or neither of peer and groupId given", body = ProblemDetails),
        (status = 403, description = "Caller is not a member of the group", body = ProblemDetails),
        (status = 404, description = "Peer not found", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(skip_all, fields(request_id = %context.request_id))]
pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<HistoryResponse>> {
    let user = context.require_user()?;
    let messages = state.router.history(user, &query).await?;

    Ok(Json(HistoryResponse {
        messages,
        timestamp: Utc::now(),
    }))
}
