use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{AmbiguousTarget, Attachment, Message};

/// Conversation addressed by handle (direct) or group id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationTarget {
    Direct(String),
    Group(Uuid),
}

impl ConversationTarget {
    /// Blank handles count as absent.
    ///
    /// # Errors
    /// Returns [`AmbiguousTarget`] unless exactly one side is present.
    pub fn from_parts(
        handle: Option<&str>,
        group_id: Option<Uuid>,
    ) -> Result<Self, AmbiguousTarget> {
        let handle = handle.map(str::trim).filter(|h| !h.is_empty());
        match (handle, group_id) {
            (Some(handle), None) => Ok(Self::Direct(handle.to_string())),
            (None, Some(group_id)) => Ok(Self::Group(group_id)),
            _ => Err(AmbiguousTarget),
        }
    }
}

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl SendMessageRequest {
    /// # Errors
    /// Returns [`AmbiguousTarget`] when both or neither target is set.
    pub fn target(&self) -> Result<ConversationTarget, AmbiguousTarget> {
        ConversationTarget::from_parts(self.receiver_handle.as_deref(), self.group_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageResponse {
    pub message: String,
    pub data: Message,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PollQuery {
    /// Watermark; only messages created strictly after it are returned.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PollResponse {
    pub messages: Vec<Message>,
    /// Server time of the poll, usable as the next watermark.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Handle of the other participant of a direct conversation.
    #[serde(default)]
    pub peer: Option<String>,
    #[serde(default)]
    pub group_id: Option<Uuid>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    /// # Errors
    /// Returns [`AmbiguousTarget`] when both or neither target is set.
    pub fn target(&self) -> Result<ConversationTarget, AmbiguousTarget> {
        ConversationTarget::from_parts(self.peer.as_deref(), self.group_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    pub timestamp: DateTime<Utc>,
}
