#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    Attachment, DeliveryStatus, HistoryResponse, Message, MessageTarget, OnlineStatus,
    OnlineUsersResponse, PollResponse, SendMessageRequest, SendMessageResponse, UserSummary,
};
use utoipa::OpenApi;

use crate::http::problem::ProblemDetails;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Courier API",
        version = "1.0.0",
        description = "HTTP fallback and presence endpoints of the Courier delivery core. Live delivery uses the WebSocket at /api/ws."
    ),
    paths(
        crate::handlers::messages::send_message,
        crate::handlers::messages::poll_messages,
        crate::handlers::messages::history,
        crate::handlers::users::online_users,
        crate::handlers::users::online_status,
    ),
    components(
        schemas(
            Attachment,
            DeliveryStatus,
            HistoryResponse,
            Message,
            MessageTarget,
            OnlineStatus,
            OnlineUsersResponse,
            PollResponse,
            ProblemDetails,
            SendMessageRequest,
            SendMessageResponse,
            UserSummary,
        )
    ),
    tags(
        (name = "Messages", description = "Send, poll and history"),
        (name = "Presence", description = "Who is connected")
    )
)]
pub struct ApiDoc;
