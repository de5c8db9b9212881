use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivery state of a persisted message.
///
/// A message starts as [`DeliveryStatus::Sent`] and flips to
/// [`DeliveryStatus::Delivered`] at most once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
}

impl DeliveryStatus {
    /// Canonical representation used by the persistence layer.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SENT" => Ok(Self::Sent),
            "DELIVERED" => Ok(Self::Delivered),
            _ => Err("unknown delivery status"),
        }
    }
}

/// Descriptor of an uploaded file referenced by a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// Returned when a message names both a receiver and a group, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a message must target exactly one of a receiver or a group")]
pub struct AmbiguousTarget;

/// Where a message is addressed. Exactly one of receiver or group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageTarget {
    Direct {
        #[serde(rename = "receiverId")]
        receiver_id: Uuid,
    },
    Group {
        #[serde(rename = "groupId")]
        group_id: Uuid,
    },
}

impl MessageTarget {
    /// Builds a target from two nullable columns.
    ///
    /// # Errors
    /// Returns [`AmbiguousTarget`] when both or neither are set.
    pub fn from_parts(
        receiver_id: Option<Uuid>,
        group_id: Option<Uuid>,
    ) -> Result<Self, AmbiguousTarget> {
        match (receiver_id, group_id) {
            (Some(receiver_id), None) => Ok(Self::Direct { receiver_id }),
            (None, Some(group_id)) => Ok(Self::Group { group_id }),
            _ => Err(AmbiguousTarget),
        }
    }

    #[must_use]
    pub fn receiver_id(&self) -> Option<Uuid> {
        match self {
            Self::Direct { receiver_id } => Some(*receiver_id),
            Self::Group { .. } => None,
        }
    }

    #[must_use]
    pub fn group_id(&self) -> Option<Uuid> {
        match self {
            Self::Group { group_id } => Some(*group_id),
            Self::Direct { .. } => None,
        }
    }
}

/// A persisted chat message as it travels over every transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned identifier.
    pub id: Uuid,

    /// Trimmed message text, empty only when an attachment is present.
    #[serde(rename = "content")]
    pub body: String,

    pub created_at: DateTime<Utc>,

    pub sender_id: Uuid,

    pub sender_handle: String,

    #[serde(flatten)]
    pub target: MessageTarget,

    pub status: DeliveryStatus,

    pub delivered_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Message {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    /// Applies the single allowed status transition. Returns `false` when the
    /// message was already delivered, leaving `delivered_at` untouched.
    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_delivered() {
            return false;
        }
        self.status = DeliveryStatus::Delivered;
        self.delivered_at = Some(at);
        true
    }
}

/// A send carries something worth persisting: text or an attachment.
#[must_use]
pub fn has_payload(body: &str, attachment: Option<&Attachment>) -> bool {
    !body.trim().is_empty() || attachment.is_some()
}
