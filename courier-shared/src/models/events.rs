//! WebSocket event vocabulary.
//!
//! Every frame is a JSON text frame shaped `{"event": "<name>", "data": {...}}`
//! in both directions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Attachment, Message, OnlineStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectSendPayload {
    pub content: String,
    pub receiver_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Opaque client correlation id echoed back on `message_sent` and
    /// `message_error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupSendPayload {
    pub content: String,
    pub group_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectTypingPayload {
    pub receiver_handle: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CheckOnlinePayload {
    pub handle: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PingPayload {}

/// Frames a client may send once its session is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendDirect(DirectSendPayload),
    SendGroup(GroupSendPayload),
    TypingStart(DirectTypingPayload),
    TypingStop(DirectTypingPayload),
    GroupTypingStart(GroupRef),
    GroupTypingStop(GroupRef),
    JoinGroup(GroupRef),
    LeaveGroup(GroupRef),
    CheckOnline(CheckOnlinePayload),
    MessageDelivered(MessageRef),
    Ping(PingPayload),
}

impl ClientEvent {
    /// Wire name of the event, used as the dispatch key.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendDirect(_) => "send_direct",
            Self::SendGroup(_) => "send_group",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::GroupTypingStart(_) => "group_typing_start",
            Self::GroupTypingStop(_) => "group_typing_stop",
            Self::JoinGroup(_) => "join_group",
            Self::LeaveGroup(_) => "leave_group",
            Self::CheckOnline(_) => "check_online",
            Self::MessageDelivered(_) => "message_delivered",
            Self::Ping(_) => "ping",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub handle: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupTypingIndicator {
    pub handle: String,
    pub group_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: Uuid,
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupPresenceNotice {
    pub user_id: Uuid,
    pub handle: String,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageErrorPayload {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

/// The authoritative record echoed to its sender, tagged with the
/// `clientRef` of the send that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub server_time: DateTime<Utc>,
}

/// Frames the server pushes to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageSent(SentMessage),
    NewMessage(Message),
    MessageDelivered(MessageRef),
    TypingIndicator(TypingIndicator),
    GroupTypingIndicator(GroupTypingIndicator),
    UserOnline(PresenceNotice),
    UserOffline(PresenceNotice),
    OnlineStatus(OnlineStatus),
    GroupUserOnline(GroupPresenceNotice),
    GroupUserOffline(GroupPresenceNotice),
    MessageError(MessageErrorPayload),
    Pong(PongPayload),
}

impl ServerEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent(_) => "message_sent",
            Self::NewMessage(_) => "new_message",
            Self::MessageDelivered(_) => "message_delivered",
            Self::TypingIndicator(_) => "typing_indicator",
            Self::GroupTypingIndicator(_) => "group_typing_indicator",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::OnlineStatus(_) => "online_status",
            Self::GroupUserOnline(_) => "group_user_online",
            Self::GroupUserOffline(_) => "group_user_offline",
            Self::MessageError(_) => "message_error",
            Self::Pong(_) => "pong",
        }
    }

    pub fn sent(message: Message, client_ref: Option<String>) -> Self {
        Self::MessageSent(SentMessage {
            message,
            client_ref,
        })
    }

    pub fn error(reason: impl Into<String>, client_ref: Option<String>) -> Self {
        Self::MessageError(MessageErrorPayload {
            reason: reason.into(),
            client_ref,
        })
    }
}
