//! In-process server plus adapter helpers for client tests.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message as Frame, WebSocketUpgrade},
    },
    response::Response,
    routing::{get, post},
};
use chrono::Utc;
use cli::transport::{ConnectionKind, TransportAdapter, TransportError, TransportEvent};
use server::{
    server::{create_app_router, create_app_state, metrics_handle, serve_until},
    store::MemoryStore,
};
use shared::{
    config::{
        client::{ClientConfig, ReconnectPolicy},
        server::{Config, Profile},
    },
    models::{
        ClientEvent, DeliveryStatus, Message, MessageTarget, PollResponse, SendMessageRequest,
        SendMessageResponse, ServerEvent, UserSummary,
    },
};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub http: reqwest::Client,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub struct TestUser {
    pub summary: UserSummary,
    pub token: String,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let app = create_app_router(create_app_state(store.clone(), config), metrics_handle());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            serve_until(listener, app, async move { stop.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            store,
            http: reqwest::Client::new(),
            shutdown,
        }
    }

    pub fn user(&self, handle: &str) -> TestUser {
        let summary = self.store.add_user(handle);
        let token = self.store.issue_token(summary.id);
        TestUser { summary, token }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn config(&self) -> ClientConfig {
        fast_config(self.base_url())
    }

    pub async fn mount(&self, user: &TestUser) -> (TransportAdapter, Events) {
        self.mount_with(self.config(), user).await.unwrap()
    }

    pub async fn mount_with(
        &self,
        config: ClientConfig,
        user: &TestUser,
    ) -> Result<(TransportAdapter, Events), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = TransportAdapter::mount(config, user.token.clone(), move |event| {
            let _ = tx.send(event);
        })
        .await?;
        Ok((adapter, Events { rx }))
    }

    pub async fn is_online(&self, viewer: &TestUser, handle: &str) -> bool {
        let body: serde_json::Value = self
            .http
            .get(format!("http://{}/api/users/{handle}/online", self.addr))
            .bearer_auth(&viewer.token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["isOnline"].as_bool().unwrap()
    }

    pub async fn wait_online(&self, viewer: &TestUser, handle: &str, expected: bool) {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        while self.is_online(viewer, handle).await != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "{handle} never became online={expected}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Sends over REST, bypassing any adapter.
    pub async fn send_rest(&self, from: &TestUser, to: &str, content: &str) -> serde_json::Value {
        let response = self
            .http
            .post(format!("http://{}/api/messages", self.addr))
            .bearer_auth(&from.token)
            .json(&serde_json::json!({ "content": content, "receiverHandle": to }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success(), "{}", response.status());
        let body: serde_json::Value = response.json().await.unwrap();
        body["data"].clone()
    }
}

/// Short timings so fallback paths run inside a test's patience.
pub fn fast_config(server_url: String) -> ClientConfig {
    ClientConfig {
        server_url,
        token: None,
        ack_timeout_ms: 1_000,
        grace_delay_ms: 200,
        connect_error_grace_ms: 200,
        poll_interval_ms: 100,
        reconnect: ReconnectPolicy {
            attempts: 3,
            delay_ms: 100,
            max_delay_ms: 400,
        },
    }
}

pub fn direct_message(from: &str, body: &str) -> Message {
    Message {
        id: Uuid::new_v4(),
        body: body.to_string(),
        created_at: Utc::now(),
        sender_id: Uuid::new_v4(),
        sender_handle: from.to_string(),
        target: MessageTarget::Direct {
            receiver_id: Uuid::new_v4(),
        },
        status: DeliveryStatus::Sent,
        delivered_at: None,
        attachment: None,
    }
}

#[derive(Clone, Default)]
struct Silence {
    socket_sends: Arc<AtomicUsize>,
    rest_sends: Arc<AtomicUsize>,
    on_send: Option<Message>,
}

/// Accepts sockets and REST calls but never confirms a socket send, so every
/// send over the socket runs into the acknowledgement timeout. When
/// `on_send` is set, that record is pushed as `new_message` each time a send
/// frame arrives.
pub struct SilentServer {
    pub addr: SocketAddr,
    state: Silence,
    shutdown: CancellationToken,
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl SilentServer {
    pub async fn start(on_send: Option<Message>) -> Self {
        let state = Silence {
            on_send,
            ..Silence::default()
        };
        let app = Router::new()
            .route("/api/ws", get(silent_socket))
            .route("/api/messages", post(silent_send))
            .route("/api/messages/poll", get(silent_poll))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn config(&self) -> ClientConfig {
        fast_config(format!("http://{}/", self.addr))
    }

    pub async fn mount(&self) -> (TransportAdapter, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = TransportAdapter::mount(self.config(), "token", move |event| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();
        (adapter, Events { rx })
    }

    pub fn socket_sends(&self) -> usize {
        self.state.socket_sends.load(Ordering::SeqCst)
    }

    pub fn rest_sends(&self) -> usize {
        self.state.rest_sends.load(Ordering::SeqCst)
    }
}

async fn silent_socket(State(state): State<Silence>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |mut socket| async move {
        while let Some(Ok(frame)) = socket.recv().await {
            let Frame::Text(text) = frame else { continue };
            let Ok(ClientEvent::SendDirect(_) | ClientEvent::SendGroup(_)) =
                serde_json::from_str::<ClientEvent>(text.as_str())
            else {
                continue;
            };
            state.socket_sends.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &state.on_send {
                let event = ServerEvent::NewMessage(message.clone());
                let text = serde_json::to_string(&event).unwrap();
                if socket.send(Frame::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn silent_send(
    State(state): State<Silence>,
    Json(request): Json<SendMessageRequest>,
) -> Json<SendMessageResponse> {
    state.rest_sends.fetch_add(1, Ordering::SeqCst);
    let mut message = direct_message("me", request.content.trim());
    if let Some(group_id) = request.group_id {
        message.target = MessageTarget::Group { group_id };
    }
    message.attachment = request.attachment;
    Json(SendMessageResponse {
        message: "Message sent".to_string(),
        data: message,
    })
}

async fn silent_poll() -> Json<PollResponse> {
    Json(PollResponse {
        messages: Vec::new(),
        timestamp: Utc::now(),
    })
}

pub struct Events {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Events {
    /// First event matching `pick`; earlier ones are discarded.
    pub async fn expect<T>(&mut self, mut pick: impl FnMut(&TransportEvent) -> Option<T>) -> T {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = tokio::time::timeout(remaining, self.rx.recv())
                .await
                .expect("expected transport event never arrived")
                .expect("adapter went away");
            if let Some(value) = pick(&event) {
                return value;
            }
        }
    }

    pub async fn connection(&mut self, kind: ConnectionKind) {
        self.expect(|event| (*event == TransportEvent::Connection(kind)).then_some(()))
            .await;
    }

    /// Everything currently queued.
    pub fn drain(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
