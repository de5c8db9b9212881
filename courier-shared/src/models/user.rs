use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identity of a chat participant as seen by the delivery core.
///
/// Both fields are owned by the user directory and never change while a
/// session is open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    /// Unique display name used to address direct messages.
    pub handle: String,
}

impl UserSummary {
    #[must_use]
    pub fn new(id: Uuid, handle: impl Into<String>) -> Self {
        Self {
            id,
            handle: handle.into(),
        }
    }
}

/// Response body of `GET /api/users/online`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct OnlineUsersResponse {
    pub users: Vec<UserSummary>,
}

/// Presence answer for a single handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatus {
    /// `None` when the handle does not belong to any user.
    pub user_id: Option<Uuid>,
    pub handle: String,
    pub is_online: bool,
}
