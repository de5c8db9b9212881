use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use metrics::counter;
use shared::models::{
    AmbiguousTarget, Attachment, ConversationTarget, HistoryQuery, Message, MessageRef,
    MessageTarget, SendMessageRequest, ServerEvent, UserSummary, has_payload,
};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    realtime::{
        ConnectionHandle,
        hub::{DeliveryHub, DirectRoute},
        rooms::RoomId,
    },
    store::{NewMessage, Store, StoreError},
};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("recipient not found: {0}")]
    RecipientNotFound(String),
    #[error("not a member of group {0}")]
    NotAMember(Uuid),
    #[error("message needs content or an attachment")]
    EmptyMessage,
    #[error("a message must target exactly one of a receiver or a group")]
    AmbiguousTarget,
    #[error("message not found: {0}")]
    MessageNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AmbiguousTarget> for DeliveryError {
    fn from(_: AmbiguousTarget) -> Self {
        Self::AmbiguousTarget
    }
}

impl DeliveryError {
    /// Text sent back in `message_error`. Store details never leave the server.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "Authentication failed",
            Self::RecipientNotFound(_) => "Recipient not found",
            Self::NotAMember(_) => "Not a member of this group",
            Self::EmptyMessage => "Message content or attachment required",
            Self::AmbiguousTarget => "Specify either a receiver or a group, not both",
            Self::MessageNotFound(_) => "Message not found",
            Self::Store(_) => "Failed to send message",
        }
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// This acknowledgement performed the transition.
    Delivered(Message),
    AlreadyDelivered,
}

/// The sending user and, for socket sends, the connection that issued the
/// send. Confirmations go back over that connection even if a newer one has
/// since replaced it in presence.
#[derive(Debug, Clone, Copy)]
pub struct Sender<'a> {
    pub user: &'a UserSummary,
    pub connection: Option<&'a ConnectionHandle>,
    /// Correlation id of the send, echoed on `message_sent`.
    pub client_ref: Option<&'a str>,
}

impl<'a> Sender<'a> {
    #[must_use]
    pub fn http(user: &'a UserSummary) -> Self {
        Self {
            user,
            connection: None,
            client_ref: None,
        }
    }

    #[must_use]
    pub fn socket(connection: &'a ConnectionHandle) -> Self {
        Self {
            user: connection.user(),
            connection: Some(connection),
            client_ref: None,
        }
    }

    #[must_use]
    pub fn with_client_ref(self, client_ref: Option<&'a str>) -> Self {
        Self { client_ref, ..self }
    }

    fn sent(&self, message: &Message) -> ServerEvent {
        ServerEvent::sent(message.clone(), self.client_ref.map(str::to_string))
    }

    fn echo(&self, hub: &DeliveryHub, event: ServerEvent) {
        match self.connection {
            Some(connection) => {
                connection.push(event);
            }
            None => {
                hub.notify_user(self.user.id, event);
            }
        }
    }
}

fn validated_body(body: &str, attachment: Option<&Attachment>) -> DeliveryResult<String> {
    let body = body.trim();
    if has_payload(body, attachment) {
        Ok(body.to_string())
    } else {
        Err(DeliveryError::EmptyMessage)
    }
}

fn delivered_notice(message_id: Uuid) -> ServerEvent {
    ServerEvent::MessageDelivered(MessageRef { message_id })
}

/// Turns validated sends into persisted messages and live pushes.
///
/// The store insert is always awaited before any push, and presence is
/// consulted only after it returns.
#[derive(Clone)]
pub struct DeliveryRouter {
    store: Arc<dyn Store>,
    hub: Arc<DeliveryHub>,
    poll_batch_limit: i64,
}

impl fmt::Debug for DeliveryRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryRouter")
            .field("poll_batch_limit", &self.poll_batch_limit)
            .finish_non_exhaustive()
    }
}

impl DeliveryRouter {
    pub fn new(store: Arc<dyn Store>, hub: Arc<DeliveryHub>, poll_batch_limit: i64) -> Self {
        Self {
            store,
            hub,
            poll_batch_limit,
        }
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<DeliveryHub> {
        &self.hub
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[instrument(
        name = "delivery.send_direct",
        skip(self, sender, body, attachment),
        fields(sender_id = %sender.user.id),
        err
    )]
    pub async fn send_direct(
        &self,
        sender: Sender<'_>,
        receiver_handle: &str,
        body: &str,
        attachment: Option<Attachment>,
    ) -> DeliveryResult<Message> {
        let receiver_handle = receiver_handle.trim();
        let receiver = self
            .store
            .find_by_handle(receiver_handle)
            .await?
            .ok_or_else(|| DeliveryError::RecipientNotFound(receiver_handle.to_string()))?;
        let body = validated_body(body, attachment.as_ref())?;

        let message = self
            .store
            .insert_message(NewMessage {
                sender: sender.user.clone(),
                body,
                target: MessageTarget::Direct {
                    receiver_id: receiver.id,
                },
                attachment,
            })
            .await?;
        counter!("courier_messages_sent_total", "kind" => "direct").increment(1);

        sender.echo(&self.hub, sender.sent(&message));

        match self.hub.route_direct(receiver.id, &message) {
            DirectRoute::Pushed => Ok(self.settle_pushed(sender, message).await),
            DirectRoute::Queued => {
                counter!("courier_messages_queued_total").increment(1);
                debug!(message_id = %message.id, receiver_id = %receiver.id, "receiver offline, queued");
                Ok(message)
            }
        }
    }

    /// Flips a pushed direct message to delivered. The receiver may have
    /// acknowledged first, in which case the notice already went out.
    async fn settle_pushed(&self, sender: Sender<'_>, message: Message) -> Message {
        match self.store.mark_delivered(message.id, Utc::now()).await {
            Ok(Some(updated)) => {
                counter!("courier_messages_delivered_total", "path" => "push").increment(1);
                sender.echo(&self.hub, delivered_notice(updated.id));
                updated
            }
            Ok(None) => match self.store.find_message(message.id).await {
                Ok(Some(current)) => current,
                Ok(None) | Err(_) => message,
            },
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "could not mark pushed message delivered");
                message
            }
        }
    }

    #[instrument(
        name = "delivery.send_group",
        skip(self, sender, body, attachment),
        fields(sender_id = %sender.user.id),
        err
    )]
    pub async fn send_group(
        &self,
        sender: Sender<'_>,
        group_id: Uuid,
        body: &str,
        attachment: Option<Attachment>,
    ) -> DeliveryResult<Message> {
        if !self.store.is_member(group_id, sender.user.id).await? {
            return Err(DeliveryError::NotAMember(group_id));
        }
        let body = validated_body(body, attachment.as_ref())?;

        let message = self
            .store
            .insert_message(NewMessage {
                sender: sender.user.clone(),
                body,
                target: MessageTarget::Group { group_id },
                attachment,
            })
            .await?;
        counter!("courier_messages_sent_total", "kind" => "group").increment(1);

        sender.echo(&self.hub, sender.sent(&message));
        let reached = self.hub.broadcast(
            RoomId::Group(group_id),
            &ServerEvent::NewMessage(message.clone()),
            None,
        );
        debug!(message_id = %message.id, reached, "group message broadcast");

        match self.store.mark_delivered(message.id, Utc::now()).await {
            Ok(Some(updated)) => {
                counter!("courier_messages_delivered_total", "path" => "fanout").increment(1);
                sender.echo(&self.hub, delivered_notice(updated.id));
                Ok(updated)
            }
            Ok(None) => Ok(message),
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "could not mark group message delivered");
                Ok(message)
            }
        }
    }

    /// Entry point of the REST fallback.
    pub async fn send(
        &self,
        sender: Sender<'_>,
        request: SendMessageRequest,
    ) -> DeliveryResult<Message> {
        let target = request.target()?;
        let SendMessageRequest {
            content,
            attachment,
            ..
        } = request;

        match target {
            ConversationTarget::Direct(handle) => {
                self.send_direct(sender, &handle, &content, attachment).await
            }
            ConversationTarget::Group(group_id) => {
                self.send_group(sender, group_id, &content, attachment).await
            }
        }
    }

    /// Idempotent receiver acknowledgement of a direct message.
    #[instrument(name = "delivery.ack", skip(self, receiver), fields(user_id = %receiver.id), err)]
    pub async fn acknowledge_delivery(
        &self,
        receiver: &UserSummary,
        message_id: Uuid,
    ) -> DeliveryResult<AckOutcome> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .filter(|m| m.target.receiver_id() == Some(receiver.id))
            .ok_or(DeliveryError::MessageNotFound(message_id))?;

        if message.is_delivered() {
            return Ok(AckOutcome::AlreadyDelivered);
        }

        match self.store.mark_delivered(message_id, Utc::now()).await? {
            Some(updated) => {
                counter!("courier_messages_delivered_total", "path" => "ack").increment(1);
                self.hub
                    .notify_user(updated.sender_id, delivered_notice(updated.id));
                Ok(AckOutcome::Delivered(updated))
            }
            None => Ok(AckOutcome::AlreadyDelivered),
        }
    }

    /// Marks messages flushed from the pending queue as delivered and tells
    /// their senders.
    pub async fn confirm_flushed(&self, flushed: &[Message]) -> DeliveryResult<Vec<Message>> {
        let ids: Vec<Uuid> = flushed.iter().map(|m| m.id).collect();
        let updated = self.store.mark_many_delivered(&ids, Utc::now()).await?;
        for message in &updated {
            counter!("courier_messages_delivered_total", "path" => "flush").increment(1);
            self.hub
                .notify_user(message.sender_id, delivered_notice(message.id));
        }
        Ok(updated)
    }

    /// Direct messages to `user` newer than `since`, marked delivered as a
    /// side effect.
    #[instrument(name = "delivery.poll", skip(self, user), fields(user_id = %user.id), err)]
    pub async fn poll(
        &self,
        user: &UserSummary,
        since: Option<DateTime<Utc>>,
    ) -> DeliveryResult<Vec<Message>> {
        let messages = self
            .store
            .direct_since(user.id, since, self.poll_batch_limit)
            .await?;

        let pending: Vec<Uuid> = messages
            .iter()
            .filter(|m| !m.is_delivered())
            .map(|m| m.id)
            .collect();
        if pending.is_empty() {
            return Ok(messages);
        }

        let updated = self.store.mark_many_delivered(&pending, Utc::now()).await?;
        self.hub.discard_pending(user.id, &pending);

        let mut updated: HashMap<Uuid, Message> =
            updated.into_iter().map(|m| (m.id, m)).collect();
        for message in updated.values() {
            counter!("courier_messages_delivered_total", "path" => "poll").increment(1);
            self.hub
                .notify_user(message.sender_id, delivered_notice(message.id));
        }

        Ok(messages
            .into_iter()
            .map(|m| updated.remove(&m.id).unwrap_or(m))
            .collect())
    }

    /// Conversation with a peer or a group, oldest first.
    pub async fn history(
        &self,
        user: &UserSummary,
        query: &HistoryQuery,
    ) -> DeliveryResult<Vec<Message>> {
        match query.target()? {
            ConversationTarget::Direct(handle) => {
                let peer = self
                    .store
                    .find_by_handle(&handle)
                    .await?
                    .ok_or_else(|| DeliveryError::RecipientNotFound(handle.clone()))?;
                Ok(self
                    .store
                    .direct_conversation(user.id, peer.id, query.since)
                    .await?)
            }
            ConversationTarget::Group(group_id) => {
                if !self.store.is_member(group_id, user.id).await? {
                    return Err(DeliveryError::NotAMember(group_id));
                }
                Ok(self.store.group_history(group_id, query.since).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::testing::{drain, handle_for};
    use crate::store::{MemoryStore, MessageStore};
    use shared::models::DeliveryStatus;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Arc<DeliveryHub>,
        router: DeliveryRouter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(DeliveryHub::new());
        let router = DeliveryRouter::new(store.clone(), hub.clone(), 50);
        Fixture { store, hub, router }
    }

    fn names(events: &[ServerEvent]) -> Vec<&'static str> {
        events.iter().map(ServerEvent::name).collect()
    }

    #[tokio::test]
    async fn online_receiver_gets_push_and_sender_gets_notice() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        let bob = f.store.add_user("bob");
        let (alice_conn, mut alice_rx) = handle_for(&alice);
        let (bob_conn, mut bob_rx) = handle_for(&bob);
        f.hub.connect(&alice_conn, &[]);
        f.hub.connect(&bob_conn, &[]);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let message = f
            .router
            .send_direct(Sender::socket(&alice_conn), "bob", "hi", None)
            .await
            .unwrap();

        assert_eq!(message.status, DeliveryStatus::Delivered);
        assert!(message.delivered_at.is_some());

        let bob_events = drain(&mut bob_rx);
        assert!(matches!(
            bob_events.as_slice(),
            [ServerEvent::NewMessage(m)] if m.body == "hi"
        ));
        assert_eq!(
            names(&drain(&mut alice_rx)),
            ["message_sent", "message_delivered"]
        );
    }

    #[tokio::test]
    async fn offline_receiver_is_queued_and_stays_sent() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        let bob = f.store.add_user("bob");

        let message = f
            .router
            .send_direct(Sender::http(&alice), "bob", "hi", None)
            .await
            .unwrap();

        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(f.hub.pending_for(bob.id), 1);

        let (bob_conn, _bob_rx) = handle_for(&bob);
        let connected = f.hub.connect(&bob_conn, &[]);
        let confirmed = f.router.confirm_flushed(&connected.flushed).await.unwrap();
        assert_eq!(confirmed.len(), 1);

        let stored = f.store.find_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn validation_failures_persist_nothing() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        f.store.add_user("bob");
        let group_id = f.store.create_group(&[]);

        let err = f
            .router
            .send_direct(Sender::http(&alice), "nobody", "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::RecipientNotFound(handle) if handle == "nobody"));

        let err = f
            .router
            .send_direct(Sender::http(&alice), "bob", "   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::EmptyMessage));

        let err = f
            .router
            .send_group(Sender::http(&alice), group_id, "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::NotAMember(id) if id == group_id));

        let err = f
            .router
            .send(
                Sender::http(&alice),
                SendMessageRequest {
                    content: "hi".to_string(),
                    receiver_handle: Some("bob".to_string()),
                    group_id: Some(group_id),
                    attachment: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::AmbiguousTarget));

        assert_eq!(f.store.message_count(), 0);
    }

    #[tokio::test]
    async fn attachment_only_message_is_accepted() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        f.store.add_user("bob");

        let attachment = Attachment {
            url: "/uploads/cat.png".to_string(),
            filename: "cat.png".to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 1024,
        };
        let message = f
            .router
            .send_direct(Sender::http(&alice), "bob", "", Some(attachment.clone()))
            .await
            .unwrap();
        assert_eq!(message.body, "");
        assert_eq!(message.attachment, Some(attachment));
    }

    #[tokio::test]
    async fn group_send_reaches_only_connected_members_and_is_delivered() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        let bob = f.store.add_user("bob");
        let carol = f.store.add_user("carol");
        let group_id = f.store.create_group(&[alice.id, bob.id, carol.id]);

        let (alice_conn, mut alice_rx) = handle_for(&alice);
        f.hub.connect(&alice_conn, &[group_id]);

        let message = f
            .router
            .send_group(Sender::socket(&alice_conn), group_id, "hello G", None)
            .await
            .unwrap();

        assert_eq!(message.status, DeliveryStatus::Delivered);
        assert_eq!(f.hub.pending_for(bob.id), 0);
        assert_eq!(f.hub.pending_for(carol.id), 0);
        assert_eq!(
            names(&drain(&mut alice_rx)),
            ["message_sent", "new_message", "message_delivered"]
        );
    }

    #[tokio::test]
    async fn acknowledgement_is_idempotent() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        let bob = f.store.add_user("bob");
        let (alice_conn, mut alice_rx) = handle_for(&alice);
        f.hub.connect(&alice_conn, &[]);

        let message = f
            .router
            .send_direct(Sender::http(&alice), "bob", "hi", None)
            .await
            .unwrap();
        drain(&mut alice_rx);

        let first = f.router.acknowledge_delivery(&bob, message.id).await.unwrap();
        let AckOutcome::Delivered(delivered) = first else {
            panic!("first ack should deliver");
        };
        assert_eq!(names(&drain(&mut alice_rx)), ["message_delivered"]);

        let second = f.router.acknowledge_delivery(&bob, message.id).await.unwrap();
        assert_eq!(second, AckOutcome::AlreadyDelivered);
        assert!(drain(&mut alice_rx).is_empty());

        let stored = f.store.find_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.delivered_at, delivered.delivered_at);
    }

    #[tokio::test]
    async fn only_the_receiver_can_acknowledge() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        f.store.add_user("bob");
        let message = f
            .router
            .send_direct(Sender::http(&alice), "bob", "hi", None)
            .await
            .unwrap();

        let err = f
            .router
            .acknowledge_delivery(&alice, message.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn poll_marks_delivered_and_discards_queue() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        let bob = f.store.add_user("bob");

        let first = f
            .router
            .send_direct(Sender::http(&alice), "bob", "one", None)
            .await
            .unwrap();
        f.router
            .send_direct(Sender::http(&alice), "bob", "two", None)
            .await
            .unwrap();

        let polled = f.router.poll(&bob, None).await.unwrap();
        assert_eq!(polled.len(), 2);
        assert!(polled.iter().all(Message::is_delivered));
        assert_eq!(f.hub.pending_for(bob.id), 0);

        let newer = f.router.poll(&bob, Some(first.created_at)).await.unwrap();
        let bodies: Vec<_> = newer.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["two"]);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_generic_error() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        f.store.add_user("bob");
        f.store.set_fail_writes(true);

        let err = f
            .router
            .send_direct(Sender::http(&alice), "bob", "hi", None)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "Failed to send message");
    }

    #[tokio::test]
    async fn history_requires_membership_for_groups() {
        let f = fixture();
        let alice = f.store.add_user("alice");
        let bob = f.store.add_user("bob");
        let group_id = f.store.create_group(&[alice.id]);

        f.router
            .send_direct(Sender::http(&alice), "bob", "to bob", None)
            .await
            .unwrap();
        f.router
            .send_direct(Sender::http(&bob), "alice", "to alice", None)
            .await
            .unwrap();

        let query = HistoryQuery {
            peer: Some("alice".to_string()),
            ..HistoryQuery::default()
        };
        let conversation = f.router.history(&bob, &query).await.unwrap();
        let bodies: Vec<_> = conversation.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["to bob", "to alice"]);

        let query = HistoryQuery {
            group_id: Some(group_id),
            ..HistoryQuery::default()
        };
        assert!(matches!(
            f.router.history(&bob, &query).await,
            Err(DeliveryError::NotAMember(_))
        ));
    }
}
