use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use shared::{
    config::client::ClientConfig,
    models::{
        Attachment, CheckOnlinePayload, ClientEvent, DirectSendPayload, DirectTypingPayload,
        GroupPresenceNotice, GroupRef, GroupSendPayload, GroupTypingIndicator, Message,
        MessageRef, OnlineStatus, PresenceNotice, SendMessageRequest, ServerEvent,
        TypingIndicator,
    },
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    ConnectionKind, TransportError,
    merge::{LocalId, LogEntry, MessageLog, PendingTarget},
    rest::RestTransport,
    socket::{self, SocketLink},
};

/// What the adapter reports to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A record was added to the log or changed in it.
    Message(Message),
    Delivered(Uuid),
    SendFailed {
        local_id: LocalId,
        content: String,
        reason: String,
    },
    Typing(TypingIndicator),
    GroupTyping(GroupTypingIndicator),
    UserOnline(PresenceNotice),
    UserOffline(PresenceNotice),
    OnlineStatus(OnlineStatus),
    GroupUserOnline(GroupPresenceNotice),
    GroupUserOffline(GroupPresenceNotice),
    /// A `message_error` not tied to one of our sends.
    Error(String),
    Connection(ConnectionKind),
}

type Handler = Arc<dyn Fn(TransportEvent) + Send + Sync>;
type Inbound = mpsc::UnboundedReceiver<ServerEvent>;

/// Handle on a send in progress. The placeholder is already in the log.
#[derive(Debug)]
pub struct SendTicket {
    pub local_id: LocalId,
    outcome: oneshot::Receiver<Result<Message, TransportError>>,
}

impl SendTicket {
    /// Waits for the authoritative record.
    ///
    /// # Errors
    /// Returns the failure that ended the send, or
    /// [`TransportError::Closed`] when the adapter was unmounted first.
    pub async fn outcome(self) -> Result<Message, TransportError> {
        self.outcome.await.unwrap_or(Err(TransportError::Closed))
    }
}

struct InFlight {
    local_id: LocalId,
    responder: oneshot::Sender<Result<Message, String>>,
}

struct Shared {
    config: ClientConfig,
    token: String,
    rest: RestTransport,
    cancel: CancellationToken,
    handler: RwLock<Option<Handler>>,
    kind: watch::Sender<ConnectionKind>,
    link: Mutex<Option<SocketLink>>,
    log: Mutex<MessageLog>,
    inflight: Mutex<Vec<InFlight>>,
    /// Newest `createdAt` seen in a poll response. Only polls move it, since
    /// they are the only source that returns every record addressed to us.
    watermark: Mutex<DateTime<Utc>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One client's view of the delivery core. Sends go over the socket when it
/// is up and over REST otherwise; receives come from pushes or polling, and
/// both feed the same deduplicating log.
pub struct TransportAdapter {
    shared: Arc<Shared>,
    supervisor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("kind", &self.connection_kind())
            .finish_non_exhaustive()
    }
}

impl TransportAdapter {
    /// Tries the WebSocket handshake once. On failure the adapter keeps
    /// going: polling starts after the connect-error grace and reconnects
    /// continue in the background.
    ///
    /// # Errors
    /// Returns an error for an invalid server URL or a refused credential.
    pub async fn mount<F>(
        config: ClientConfig,
        token: impl Into<String>,
        handler: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        let token = token.into();
        let handler: Handler = Arc::new(handler);
        let rest = RestTransport::new(&config, token.clone())?;
        let (kind, _) = watch::channel(ConnectionKind::Disconnected);
        let shared = Arc::new(Shared {
            config,
            token,
            rest,
            cancel: CancellationToken::new(),
            handler: RwLock::new(Some(handler)),
            kind,
            link: Mutex::new(None),
            log: Mutex::new(MessageLog::new()),
            inflight: Mutex::new(Vec::new()),
            watermark: Mutex::new(Utc::now()),
        });

        let first = match shared.open_socket().await {
            Ok(connected) => Some(shared.attach(connected)),
            Err(err) if err.is_unauthorized() => return Err(err),
            Err(err) => {
                warn!(error = %err, "websocket unavailable; polling will take over");
                None
            }
        };

        let supervisor = tokio::spawn(Arc::clone(&shared).supervise(first));
        Ok(Self {
            shared,
            supervisor: Some(supervisor),
        })
    }

    #[must_use]
    pub fn connection_kind(&self) -> ConnectionKind {
        *self.shared.kind.borrow()
    }

    /// Resolves once the connection kind satisfies `ready`, or the adapter stops.
    pub async fn wait_for(&self, ready: impl Fn(ConnectionKind) -> bool) -> ConnectionKind {
        let mut changes = self.shared.kind.subscribe();
        let outcome = tokio::select! {
            () = self.shared.cancel.cancelled() => None,
            result = changes.wait_for(|kind| ready(*kind)) => result.ok().map(|kind| *kind),
        };
        outcome.unwrap_or_else(|| self.connection_kind())
    }

    /// Snapshot of the log in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<LogEntry> {
        lock(&self.shared.log).entries()
    }

    pub fn send_message(
        &self,
        body: &str,
        receiver_handle: &str,
        attachment: Option<Attachment>,
    ) -> SendTicket {
        let request = SendMessageRequest {
            content: body.to_string(),
            receiver_handle: Some(receiver_handle.to_string()),
            group_id: None,
            attachment,
        };
        self.start_send(request, PendingTarget::Direct(receiver_handle.to_string()))
    }

    pub fn send_group_message(
        &self,
        body: &str,
        group_id: Uuid,
        attachment: Option<Attachment>,
    ) -> SendTicket {
        let request = SendMessageRequest {
            content: body.to_string(),
            receiver_handle: None,
            group_id: Some(group_id),
            attachment,
        };
        self.start_send(request, PendingTarget::Group(group_id))
    }

    fn start_send(&self, request: SendMessageRequest, target: PendingTarget) -> SendTicket {
        let local_id = lock(&self.shared.log).add_pending(&request.content, target.clone());
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let cancel = shared.cancel.clone();
            let outcome = tokio::select! {
                () = cancel.cancelled() => Err(TransportError::Closed),
                outcome = shared.deliver(local_id, request, &target) => outcome,
            };
            let _ = tx.send(outcome);
        });

        SendTicket {
            local_id,
            outcome: rx,
        }
    }

    pub fn typing_start(&self, receiver_handle: &str) -> bool {
        self.forward(ClientEvent::TypingStart(DirectTypingPayload {
            receiver_handle: receiver_handle.to_string(),
        }))
    }

    pub fn typing_stop(&self, receiver_handle: &str) -> bool {
        self.forward(ClientEvent::TypingStop(DirectTypingPayload {
            receiver_handle: receiver_handle.to_string(),
        }))
    }

    pub fn group_typing_start(&self, group_id: Uuid) -> bool {
        self.forward(ClientEvent::GroupTypingStart(GroupRef { group_id }))
    }

    pub fn group_typing_stop(&self, group_id: Uuid) -> bool {
        self.forward(ClientEvent::GroupTypingStop(GroupRef { group_id }))
    }

    pub fn join_group(&self, group_id: Uuid) -> bool {
        self.forward(ClientEvent::JoinGroup(GroupRef { group_id }))
    }

    pub fn leave_group(&self, group_id: Uuid) -> bool {
        self.forward(ClientEvent::LeaveGroup(GroupRef { group_id }))
    }

    pub fn check_online(&self, handle: &str) -> bool {
        self.forward(ClientEvent::CheckOnline(CheckOnlinePayload {
            handle: handle.to_string(),
        }))
    }

    /// Socket-only events are dropped while disconnected. Returns whether
    /// the event went out.
    fn forward(&self, event: ClientEvent) -> bool {
        let name = event.name();
        let sent = self.shared.send_over_socket(event);
        if !sent {
            debug!(event = name, "not connected; dropping event");
        }
        sent
    }

    /// Closes the live socket as if the network had dropped it. Recovery
    /// then runs exactly as for a real loss.
    pub fn drop_connection(&self) {
        if let Some(link) = lock(&self.shared.link).as_ref() {
            link.close();
        }
    }

    /// Tears everything down. No handler call starts after this begins.
    pub async fn unmount(mut self) {
        self.shared.silence();
        self.shared.cancel.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(err) = supervisor.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "transport supervisor ended abnormally");
                }
            }
        }
        info!("transport unmounted");
    }
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        self.shared.silence();
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = handler.as_ref() {
            handler(event);
        }
    }

    /// Waits for callbacks already running, then detaches the handler.
    fn silence(&self) {
        self.handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_kind(&self, kind: ConnectionKind) {
        let changed = self.kind.send_if_modified(|current| {
            if *current == kind {
                false
            } else {
                *current = kind;
                true
            }
        });
        if changed {
            info!(%kind, "connection changed");
            self.emit(TransportEvent::Connection(kind));
        }
    }

    fn send_over_socket(&self, event: ClientEvent) -> bool {
        lock(&self.link)
            .as_ref()
            .is_some_and(|link| link.send(event).is_ok())
    }

    async fn open_socket(&self) -> Result<(SocketLink, Inbound), TransportError> {
        socket::connect(&self.config, &self.token, self.cancel.child_token()).await
    }

    /// Alternates between a live socket and recovery until unmounted.
    /// Makes `connected` the live link and hands back its inbound stream.
    fn attach(&self, (link, inbound): (SocketLink, Inbound)) -> Inbound {
        *lock(&self.link) = Some(link);
        self.set_kind(ConnectionKind::WebSocket);
        inbound
    }

    async fn supervise(self: Arc<Self>, mut live: Option<Inbound>) {
        let mut grace = self.config.connect_error_grace();
        loop {
            if let Some(inbound) = live.take() {
                self.pump(inbound).await;
                if let Some(link) = lock(&self.link).take() {
                    link.close();
                }
                if self.cancel.is_cancelled() {
                    return;
                }
                self.set_kind(ConnectionKind::Disconnected);
                grace = self.config.grace_delay();
            }

            let recovered = tokio::select! {
                () = self.cancel.cancelled() => None,
                recovered = self.reconnect() => recovered,
                () = self.poll_after(grace) => None,
            };
            match recovered {
                Some(connected) => live = Some(self.attach(connected)),
                None => return,
            }
        }
    }

    /// Never resolves once attempts are exhausted, leaving polling in charge.
    async fn reconnect(&self) -> Option<(SocketLink, Inbound)> {
        let policy = &self.config.reconnect;
        for attempt in 0..policy.attempts {
            sleep(policy.delay_for(attempt)).await;
            match self.open_socket().await {
                Ok(connected) => {
                    info!(attempt, "websocket re-established");
                    return Some(connected);
                }
                Err(err) if err.is_unauthorized() => {
                    warn!(error = %err, "credential refused; giving up on the websocket");
                    break;
                }
                Err(err) => debug!(attempt, error = %err, "reconnect attempt failed"),
            }
        }
        std::future::pending().await
    }

    async fn poll_after(&self, grace: std::time::Duration) {
        sleep(grace).await;
        self.set_kind(ConnectionKind::Polling);
        loop {
            self.poll_once().await;
            sleep(self.config.poll_interval()).await;
        }
    }

    #[instrument(skip_all)]
    async fn poll_once(&self) {
        let since = *lock(&self.watermark);
        match self.rest.poll(Some(since)).await {
            Ok(response) => {
                if let Some(newest) = response.messages.iter().map(|m| m.created_at).max() {
                    let mut watermark = lock(&self.watermark);
                    *watermark = (*watermark).max(newest);
                }
                for message in response.messages {
                    self.record(message, None);
                }
            }
            Err(err) => warn!(error = %err, "poll failed"),
        }
    }

    async fn pump(&self, mut inbound: Inbound) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                event = inbound.recv() => match event {
                    Some(event) => self.on_server_event(event),
                    None => return,
                },
            }
        }
    }

    fn on_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::MessageSent(sent) => {
                let local_id = sent.client_ref.as_deref().and_then(LocalId::parse);
                if let Some(entry) = local_id.and_then(|id| self.take_inflight(id)) {
                    let _ = entry.responder.send(Ok(sent.message.clone()));
                }
                self.record(sent.message, local_id);
            }
            ServerEvent::NewMessage(message) => {
                let acknowledge = message.target.receiver_id().is_some() && !message.is_delivered();
                let id = message.id;
                self.record(message, None);
                if acknowledge {
                    self.send_over_socket(ClientEvent::MessageDelivered(MessageRef {
                        message_id: id,
                    }));
                }
            }
            ServerEvent::MessageDelivered(reference) => {
                let updated = lock(&self.log).mark_delivered(reference.message_id, Utc::now());
                if updated {
                    self.emit(TransportEvent::Delivered(reference.message_id));
                }
            }
            ServerEvent::MessageError(payload) => {
                let local_id = payload.client_ref.as_deref().and_then(LocalId::parse);
                let responder = local_id.and_then(|id| self.take_inflight(id));
                match responder {
                    Some(entry) => {
                        let _ = entry.responder.send(Err(payload.reason));
                    }
                    None => self.emit(TransportEvent::Error(payload.reason)),
                }
            }
            ServerEvent::TypingIndicator(indicator) => self.emit(TransportEvent::Typing(indicator)),
            ServerEvent::GroupTypingIndicator(indicator) => {
                self.emit(TransportEvent::GroupTyping(indicator));
            }
            ServerEvent::UserOnline(notice) => self.emit(TransportEvent::UserOnline(notice)),
            ServerEvent::UserOffline(notice) => self.emit(TransportEvent::UserOffline(notice)),
            ServerEvent::OnlineStatus(status) => self.emit(TransportEvent::OnlineStatus(status)),
            ServerEvent::GroupUserOnline(notice) => {
                self.emit(TransportEvent::GroupUserOnline(notice));
            }
            ServerEvent::GroupUserOffline(notice) => {
                self.emit(TransportEvent::GroupUserOffline(notice));
            }
            ServerEvent::Pong(_) => {}
        }
    }

    fn take_inflight(&self, local_id: LocalId) -> Option<InFlight> {
        let mut inflight = lock(&self.inflight);
        let index = inflight.iter().position(|f| f.local_id == local_id)?;
        Some(inflight.remove(index))
    }

    /// Merges a record and reports changes. Only a record tagged with its
    /// local id replaces a placeholder.
    fn record(&self, message: Message, local_id: Option<LocalId>) {
        let outcome = {
            let mut log = lock(&self.log);
            match local_id {
                Some(local_id) => log.confirm(local_id, message.clone()),
                None => log.merge(message.clone()),
            }
        };
        if outcome.changed() {
            self.emit(TransportEvent::Message(message));
        }
    }

    fn fail(&self, local_id: LocalId, reason: &str) {
        let placeholder = lock(&self.log).fail(local_id);
        let content = placeholder.map(|p| p.body).unwrap_or_default();
        self.emit(TransportEvent::SendFailed {
            local_id,
            content,
            reason: reason.to_string(),
        });
    }

    /// Socket first with a bounded wait for the echo; REST once otherwise.
    #[instrument(skip_all, fields(local_id = %local_id))]
    async fn deliver(
        &self,
        local_id: LocalId,
        request: SendMessageRequest,
        target: &PendingTarget,
    ) -> Result<Message, TransportError> {
        match self.deliver_over_socket(local_id, &request, target).await {
            Ok(message) => return Ok(message),
            Err(TransportError::Delivery(reason)) => {
                self.fail(local_id, &reason);
                return Err(TransportError::Delivery(reason));
            }
            Err(err) => debug!(error = %err, "falling back to REST"),
        }

        match self.rest.send(&request).await {
            Ok(message) => {
                self.record(message.clone(), Some(local_id));
                Ok(message)
            }
            Err(err) => {
                self.fail(local_id, &err.to_string());
                Err(err)
            }
        }
    }

    async fn deliver_over_socket(
        &self,
        local_id: LocalId,
        request: &SendMessageRequest,
        target: &PendingTarget,
    ) -> Result<Message, TransportError> {
        let client_ref = Some(local_id.to_string());
        let event = match target {
            PendingTarget::Direct(handle) => ClientEvent::SendDirect(DirectSendPayload {
                content: request.content.clone(),
                receiver_handle: handle.clone(),
                attachment: request.attachment.clone(),
                client_ref,
            }),
            PendingTarget::Group(group_id) => ClientEvent::SendGroup(GroupSendPayload {
                content: request.content.clone(),
                group_id: *group_id,
                attachment: request.attachment.clone(),
                client_ref,
            }),
        };

        let (tx, rx) = oneshot::channel();
        lock(&self.inflight).push(InFlight {
            local_id,
            responder: tx,
        });

        if !self.send_over_socket(event) {
            self.take_inflight(local_id);
            return Err(TransportError::Closed);
        }

        match timeout(self.config.ack_timeout(), rx).await {
            Ok(Ok(Ok(message))) => Ok(message),
            Ok(Ok(Err(reason))) => Err(TransportError::Delivery(reason)),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.take_inflight(local_id);
                Err(TransportError::DeliveryTimeout)
            }
        }
    }
}
