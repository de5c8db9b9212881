//! Persistence seams of the delivery core.
//!
//! The core writes messages and reads users, group memberships and bearer
//! credentials, one trait per concern. [`Store`] bundles them for the
//! application state.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Attachment, Message, MessageTarget, UserSummary};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored message {id} is malformed: {reason}")]
    Corrupt { id: Uuid, reason: &'static str },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A validated message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: UserSummary,
    pub body: String,
    pub target: MessageTarget,
    pub attachment: Option<Attachment>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message with status `SENT`; id and `created_at` are assigned here.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Conditional `SENT -> DELIVERED` flip. Returns the updated record only
    /// when this call performed the transition.
    async fn mark_delivered(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError>;

    /// Batch form of [`MessageStore::mark_delivered`] executed as one update.
    /// Returns the records that actually transitioned.
    async fn mark_many_delivered(
        &self,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Direct messages addressed to `receiver_id` created after `since`,
    /// oldest first, at most `limit`.
    async fn direct_since(
        &self,
        receiver_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;

    /// Both directions of a direct conversation, oldest first.
    async fn direct_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError>;

    async fn group_history(
        &self,
        group_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_handle(&self, handle: &str) -> Result<Option<UserSummary>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserSummary>, StoreError>;
}

#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;
    async fn groups_for(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolves an opaque bearer token. `None` means unknown, expired or revoked.
    async fn authenticate(&self, token: &str) -> Result<Option<UserSummary>, StoreError>;
}

/// Everything the delivery core reads and writes.
pub trait Store: MessageStore + UserDirectory + GroupDirectory + Authenticator {}

impl<T> Store for T where T: MessageStore + UserDirectory + GroupDirectory + Authenticator {}

/// Rebuilds the domain message from nullable columns.
pub(crate) struct MessageParts {
    pub id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: Uuid,
    pub sender_handle: String,
    pub receiver_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub status: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attachment: Option<Attachment>,
}

impl TryFrom<MessageParts> for Message {
    type Error = StoreError;

    fn try_from(parts: MessageParts) -> Result<Self, Self::Error> {
        let target = MessageTarget::from_parts(parts.receiver_id, parts.group_id).map_err(|_| {
            StoreError::Corrupt {
                id: parts.id,
                reason: "message must have exactly one of receiver or group",
            }
        })?;
        let status = parts.status.parse().map_err(|reason| StoreError::Corrupt {
            id: parts.id,
            reason,
        })?;

        Ok(Message {
            id: parts.id,
            body: parts.body,
            created_at: parts.created_at,
            sender_id: parts.sender_id,
            sender_handle: parts.sender_handle,
            target,
            status,
            delivered_at: parts.delivered_at,
            attachment: parts.attachment,
        })
    }
}
