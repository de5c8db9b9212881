use std::time::Duration;

use axum::{
    body::Bytes,
    extract::ws::{Message as Frame, WebSocket},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use shared::{
    config::server::RealtimeConfig,
    models::{
        ClientEvent, GroupPresenceNotice, GroupTypingIndicator, OnlineStatus, PongPayload,
        ServerEvent, TypingIndicator, UserSummary,
    },
};
use thiserror::Error;
use tokio::{sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ConnectionHandle, rooms::RoomId};
use crate::services::delivery::{DeliveryError, DeliveryRouter, Sender};

/// Lifecycle of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade in progress; no application frames are read.
    Connecting,
    /// Credential resolved; presence, rooms and queue flush are being set up.
    Authenticated,
    Active,
    Disconnected,
}

impl SessionState {
    /// Forward-only transitions. Any live state may drop to `Disconnected`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Authenticated)
                | (Self::Authenticated, Self::Active)
                | (
                    Self::Connecting | Self::Authenticated | Self::Active,
                    Self::Disconnected
                )
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("session cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Handles client events for one connection. Cloned into the connection's
/// event worker.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    handle: ConnectionHandle,
    router: DeliveryRouter,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(handle: ConnectionHandle, router: DeliveryRouter) -> Self {
        Self { handle, router }
    }

    fn user(&self) -> &UserSummary {
        self.handle.user()
    }

    /// Runs one event and reports any failure back on this connection.
    pub async fn handle_event(&self, event: ClientEvent) {
        let name = event.name();
        let client_ref = client_ref(&event);

        if let Err(err) = self.dispatch(event).await {
            warn!(
                event = name,
                user_id = %self.user().id,
                connection_id = %self.handle.id(),
                error = %err,
                "event handler failed"
            );
            self.handle
                .push(ServerEvent::error(err.reason(), client_ref));
        }
    }

    /// Event name to handler table.
    pub async fn dispatch(&self, event: ClientEvent) -> Result<(), DeliveryError> {
        match event {
            ClientEvent::SendDirect(payload) => {
                let sender =
                    Sender::socket(&self.handle).with_client_ref(payload.client_ref.as_deref());
                self.router
                    .send_direct(
                        sender,
                        &payload.receiver_handle,
                        &payload.content,
                        payload.attachment,
                    )
                    .await?;
                Ok(())
            }
            ClientEvent::SendGroup(payload) => {
                let sender =
                    Sender::socket(&self.handle).with_client_ref(payload.client_ref.as_deref());
                self.router
                    .send_group(
                        sender,
                        payload.group_id,
                        &payload.content,
                        payload.attachment,
                    )
                    .await?;
                Ok(())
            }
            ClientEvent::TypingStart(payload) => self.typing(&payload.receiver_handle, true).await,
            ClientEvent::TypingStop(payload) => self.typing(&payload.receiver_handle, false).await,
            ClientEvent::GroupTypingStart(group) => {
                self.group_typing(group.group_id, true);
                Ok(())
            }
            ClientEvent::GroupTypingStop(group) => {
                self.group_typing(group.group_id, false);
                Ok(())
            }
            ClientEvent::JoinGroup(group) => self.join_group(group.group_id).await,
            ClientEvent::LeaveGroup(group) => {
                self.leave_group(group.group_id);
                Ok(())
            }
            ClientEvent::CheckOnline(payload) => self.check_online(payload.handle).await,
            ClientEvent::MessageDelivered(reference) => {
                self.router
                    .acknowledge_delivery(self.user(), reference.message_id)
                    .await?;
                Ok(())
            }
            ClientEvent::Ping(_) => {
                self.handle.push(ServerEvent::Pong(PongPayload {
                    server_time: Utc::now(),
                }));
                Ok(())
            }
        }
    }

    /// Unknown receivers are ignored; typing is best effort.
    async fn typing(&self, receiver_handle: &str, is_typing: bool) -> Result<(), DeliveryError> {
        let Some(receiver) = self
            .router
            .store()
            .find_by_handle(receiver_handle.trim())
            .await?
        else {
            return Ok(());
        };

        self.router.hub().notify_user(
            receiver.id,
            ServerEvent::TypingIndicator(TypingIndicator {
                handle: self.user().handle.clone(),
                is_typing,
            }),
        );
        Ok(())
    }

    fn group_typing(&self, group_id: Uuid, is_typing: bool) {
        let room = RoomId::Group(group_id);
        let hub = self.router.hub();
        if !hub.is_joined(room, self.handle.id()) {
            return;
        }

        hub.broadcast(
            room,
            &ServerEvent::GroupTypingIndicator(GroupTypingIndicator {
                handle: self.user().handle.clone(),
                group_id,
                is_typing,
            }),
            Some(self.handle.id()),
        );
    }

    async fn join_group(&self, group_id: Uuid) -> Result<(), DeliveryError> {
        if !self
            .router
            .store()
            .is_member(group_id, self.user().id)
            .await?
        {
            return Err(DeliveryError::NotAMember(group_id));
        }

        let room = RoomId::Group(group_id);
        let hub = self.router.hub();
        hub.join_room(room, &self.handle);
        hub.broadcast(
            room,
            &ServerEvent::GroupUserOnline(self.group_notice(group_id)),
            Some(self.handle.id()),
        );
        debug!(user_id = %self.user().id, %room, "joined room");
        Ok(())
    }

    fn leave_group(&self, group_id: Uuid) {
        let room = RoomId::Group(group_id);
        let hub = self.router.hub();
        if hub.leave_room(room, self.handle.id()) {
            hub.broadcast(
                room,
                &ServerEvent::GroupUserOffline(self.group_notice(group_id)),
                None,
            );
            debug!(user_id = %self.user().id, %room, "left room");
        }
    }

    fn group_notice(&self, group_id: Uuid) -> GroupPresenceNotice {
        GroupPresenceNotice {
            user_id: self.user().id,
            handle: self.user().handle.clone(),
            group_id,
        }
    }

    async fn check_online(&self, handle: String) -> Result<(), DeliveryError> {
        let user = self.router.store().find_by_handle(handle.trim()).await?;
        let status = OnlineStatus {
            user_id: user.as_ref().map(|u| u.id),
            is_online: user
                .as_ref()
                .is_some_and(|u| self.router.hub().is_online(u.id)),
            handle,
        };
        self.handle.push(ServerEvent::OnlineStatus(status));
        Ok(())
    }
}

fn client_ref(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::SendDirect(payload) => payload.client_ref.clone(),
        ClientEvent::SendGroup(payload) => payload.client_ref.clone(),
        _ => None,
    }
}

/// Server side of one authenticated WebSocket connection.
#[derive(Debug)]
pub struct ConnectionSession {
    state: SessionState,
    dispatcher: EventDispatcher,
    outbound: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl ConnectionSession {
    /// Starts in `Connecting`; the caller has already resolved the bearer
    /// credential to `user`.
    #[must_use]
    pub fn new(user: UserSummary, router: DeliveryRouter, realtime: &RealtimeConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: SessionState::Connecting,
            dispatcher: EventDispatcher::new(ConnectionHandle::new(user, tx), router),
            outbound: Some(rx),
            ping_interval: Duration::from_secs(realtime.ping_interval_secs),
            ping_timeout: Duration::from_secs(realtime.ping_timeout_secs),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.dispatcher.handle
    }

    /// # Errors
    /// Returns [`InvalidTransition`] for anything but a forward step.
    pub fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if self.state.can_advance_to(next) {
            self.state = next;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    /// Registers presence, joins rooms and drains the pending queue onto this
    /// connection, then confirms the flushed messages in the store.
    ///
    /// # Errors
    /// Fails before any hub mutation when group memberships cannot be read.
    pub async fn establish(&mut self) -> Result<(), DeliveryError> {
        self.advance(SessionState::Authenticated)
            .map_err(|_| DeliveryError::AuthenticationFailed)?;

        let router = &self.dispatcher.router;
        let handle = &self.dispatcher.handle;
        let groups = router.store().groups_for(handle.user().id).await?;

        let connected = router.hub().connect(handle, &groups);
        if let Some(previous) = connected.superseded {
            debug!(
                user_id = %handle.user().id,
                previous = %previous.id(),
                "newer connection supersedes previous one"
            );
        }
        if !connected.flushed.is_empty() {
            if let Err(err) = router.confirm_flushed(&connected.flushed).await {
                warn!(user_id = %handle.user().id, error = %err, "could not confirm flushed messages");
            }
        }

        self.advance(SessionState::Active)
            .map_err(|_| DeliveryError::AuthenticationFailed)
    }

    /// Leaves the hub. Idempotent.
    pub fn close(&mut self) {
        if self.advance(SessionState::Disconnected).is_err() {
            return;
        }
        let handle = &self.dispatcher.handle;
        if let Some(user) = self.dispatcher.router.hub().disconnect(handle) {
            info!(user_id = %user.id, handle = %user.handle, "user offline");
        }
    }

    fn on_text(&self, text: &str, events: &mpsc::UnboundedSender<ClientEvent>) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => {
                if events.send(event).is_err() {
                    debug!(connection_id = %self.handle().id(), "event worker gone");
                }
            }
            Err(err) => {
                debug!(connection_id = %self.handle().id(), error = %err, "malformed frame");
                self.handle()
                    .push(ServerEvent::error("Malformed event", None));
            }
        }
    }

    /// Drives the connection until the peer leaves, the socket fails or the
    /// keep-alive deadline passes.
    pub async fn run(mut self, socket: WebSocket) {
        let Some(outbound) = self.outbound.take() else {
            return;
        };
        let (sink, mut stream) = socket.split();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_frames(
            sink,
            outbound,
            self.ping_interval,
            cancel.clone(),
        ));

        match self.establish().await {
            Ok(()) => {
                info!(
                    user_id = %self.handle().user().id,
                    connection_id = %self.handle().id(),
                    "session active"
                );
                let (events, queue) = mpsc::unbounded_channel();
                let worker = tokio::spawn(process_events(self.dispatcher.clone(), queue));
                self.read_frames(&mut stream, &cancel, &events).await;
                drop(events);
                if let Err(err) = worker.await {
                    debug!(error = %err, "event worker ended abnormally");
                }
            }
            Err(err) => {
                warn!(user_id = %self.handle().user().id, error = %err, "session setup failed");
                self.handle().push(ServerEvent::error(err.reason(), None));
            }
        }

        self.close();
        cancel.cancel();
        if let Err(err) = writer.await {
            debug!(error = %err, "writer task ended abnormally");
        }
    }

    async fn read_frames(
        &self,
        stream: &mut futures_util::stream::SplitStream<WebSocket>,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) {
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = timeout(self.ping_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    info!(connection_id = %self.handle().id(), "keep-alive timeout");
                    break;
                }
                Ok(None) | Ok(Some(Ok(Frame::Close(_)))) => break,
                Ok(Some(Err(err))) => {
                    debug!(connection_id = %self.handle().id(), error = %err, "socket error");
                    break;
                }
                Ok(Some(Ok(Frame::Text(text)))) => self.on_text(text.as_str(), events),
                Ok(Some(Ok(Frame::Binary(_)))) => {
                    self.handle()
                        .push(ServerEvent::error("Binary frames are not supported", None));
                }
                // Any frame counts as liveness; axum answers pings itself.
                Ok(Some(Ok(Frame::Ping(_) | Frame::Pong(_)))) => {}
            }
        }
    }
}

/// Runs a connection's events one at a time in arrival order. Other
/// connections have their own worker, so a slow handler only delays the
/// connection that sent the event.
async fn process_events(
    dispatcher: EventDispatcher,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
) {
    while let Some(event) = events.recv().await {
        dispatcher.handle_event(event).await;
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Frame>,
    mut outbound: mpsc::UnboundedReceiver<ServerEvent>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            event = outbound.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(json) => Frame::Text(json.into()),
                    Err(err) => {
                        warn!(event = event.name(), error = %err, "could not encode event");
                        continue;
                    }
                },
                None => break,
            },
            _ = ticker.tick() => Frame::Ping(Bytes::new()),
        };

        if sink.send(frame).await.is_err() {
            cancel.cancel();
            return;
        }
    }

    if let Err(err) = sink.send(Frame::Close(None)).await {
        debug!(error = %err, "close frame not sent");
    }
}
