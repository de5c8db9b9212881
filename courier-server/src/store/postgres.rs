use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Attachment, Message, UserSummary};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use super::{
    Authenticator, GroupDirectory, MessageParts, MessageStore, NewMessage, StoreError,
    UserDirectory,
};
use crate::auth::token::hash_token;

const MESSAGE_COLUMNS: &str = "m.id,
       m.content,
       m.created_at,
       m.sender_id,
       u.handle AS sender_handle,
       m.receiver_id,
       m.group_id,
       m.status,
       m.delivered_at,
       m.attachment_url,
       m.attachment_filename,
       m.attachment_mime_type,
       m.attachment_size_bytes";

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    sender_id: Uuid,
    sender_handle: String,
    receiver_id: Option<Uuid>,
    group_id: Option<Uuid>,
    status: String,
    delivered_at: Option<DateTime<Utc>>,
    attachment_url: Option<String>,
    attachment_filename: Option<String>,
    attachment_mime_type: Option<String>,
    attachment_size_bytes: Option<i64>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let attachment = match (
            row.attachment_url,
            row.attachment_filename,
            row.attachment_mime_type,
            row.attachment_size_bytes,
        ) {
            (Some(url), Some(filename), Some(mime_type), Some(size_bytes)) => Some(Attachment {
                url,
                filename,
                mime_type,
                size_bytes,
            }),
            _ => None,
        };

        Message::try_from(MessageParts {
            id: row.id,
            body: row.content,
            created_at: row.created_at,
            sender_id: row.sender_id,
            sender_handle: row.sender_handle,
            receiver_id: row.receiver_id,
            group_id: row.group_id,
            status: row.status,
            delivered_at: row.delivered_at,
            attachment,
        })
    }
}

fn into_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>, StoreError> {
    rows.into_iter().map(Message::try_from).collect()
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    handle: String,
}

impl From<UserRow> for UserSummary {
    fn from(row: UserRow) -> Self {
        UserSummary::new(row.id, row.handle)
    }
}

/// Postgres-backed store. Tables live in the `courier` schema created by the
/// bootstrap scripts.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgStore {
    #[instrument(skip(self, message), fields(sender_id = %message.sender.id))]
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let attachment = message.attachment.as_ref();
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "WITH inserted AS (
                 INSERT INTO courier.messages
                     (content, sender_id, receiver_id, group_id,
                      attachment_url, attachment_filename, attachment_mime_type, attachment_size_bytes)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING *
             )
             SELECT {MESSAGE_COLUMNS}
             FROM inserted m
             JOIN courier.users u ON u.id = m.sender_id"
        ))
        .bind(&message.body)
        .bind(message.sender.id)
        .bind(message.target.receiver_id())
        .bind(message.target.group_id())
        .bind(attachment.map(|a| a.url.as_str()))
        .bind(attachment.map(|a| a.filename.as_str()))
        .bind(attachment.map(|a| a.mime_type.as_str()))
        .bind(attachment.map(|a| a.size_bytes))
        .fetch_one(&self.pool)
        .await?;

        Message::try_from(row)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM courier.messages m
             JOIN courier.users u ON u.id = m.sender_id
             WHERE m.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Message::try_from)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn mark_delivered(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        Ok(self.mark_many_delivered(&[id], at).await?.pop())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn mark_many_delivered(
        &self,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "WITH updated AS (
                 UPDATE courier.messages
                 SET status = 'DELIVERED', delivered_at = $2
                 WHERE id = ANY($1) AND status = 'SENT'
                 RETURNING *
             )
             SELECT {MESSAGE_COLUMNS}
             FROM updated m
             JOIN courier.users u ON u.id = m.sender_id
             ORDER BY m.created_at ASC"
        ))
        .bind(ids)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn direct_since(
        &self,
        receiver_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM courier.messages m
             JOIN courier.users u ON u.id = m.sender_id
             WHERE m.receiver_id = $1
               AND ($2::timestamptz IS NULL OR m.created_at > $2)
             ORDER BY m.created_at ASC
             LIMIT $3"
        ))
        .bind(receiver_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn direct_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM courier.messages m
             JOIN courier.users u ON u.id = m.sender_id
             WHERE ((m.sender_id = $1 AND m.receiver_id = $2)
                 OR (m.sender_id = $2 AND m.receiver_id = $1))
               AND ($3::timestamptz IS NULL OR m.created_at > $3)
             ORDER BY m.created_at ASC"
        ))
        .bind(user_id)
        .bind(peer_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn group_history(
        &self,
        group_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM courier.messages m
             JOIN courier.users u ON u.id = m.sender_id
             WHERE m.group_id = $1
               AND ($2::timestamptz IS NULL OR m.created_at > $2)
             ORDER BY m.created_at ASC"
        ))
        .bind(group_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        into_messages(rows)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1 FROM courier.messages LIMIT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_by_handle(&self, handle: &str) -> Result<Option<UserSummary>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, handle FROM courier.users WHERE handle = $1",
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserSummary::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserSummary>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, handle FROM courier.users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(UserSummary::from))
    }
}

#[async_trait]
impl GroupDirectory for PgStore {
    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let member = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                 SELECT 1 FROM courier.group_members
                 WHERE group_id = $1 AND user_id = $2
             )",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(member)
    }

    async fn groups_for(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let groups = sqlx::query_scalar::<_, Uuid>(
            "SELECT group_id FROM courier.group_members WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }
}

#[async_trait]
impl Authenticator for PgStore {
    #[instrument(skip(self, token))]
    async fn authenticate(&self, token: &str) -> Result<Option<UserSummary>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.handle
             FROM courier.sessions s
             JOIN courier.users u ON u.id = s.user_id
             WHERE s.token_hash = $1
               AND s.revoked_at IS NULL
               AND (s.expires_at IS NULL OR s.expires_at > now())",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserSummary::from))
    }
}
