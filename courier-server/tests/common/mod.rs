//! Spins up a real server on an ephemeral port backed by `MemoryStore`.
#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use server::{
    server::{create_app_router, create_app_state, metrics_handle, serve_until},
    store::MemoryStore,
};
use shared::{
    config::server::{Config, Profile},
    models::{ClientEvent, PingPayload, ServerEvent, UserSummary},
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message as Frame, client::IntoClientRequest, http::HeaderValue},
};
use tokio_util::sync::CancellationToken;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

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

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Opens a socket and waits until the session is active.
    pub async fn connect(&self, user: &TestUser) -> Client {
        let mut client = self.try_connect(Some(&user.token)).await.unwrap();
        client.ready().await;
        client
    }

    pub async fn try_connect(&self, token: Option<&str>) -> Result<Client, tungstenite::Error> {
        let mut request = format!("ws://{}/api/ws", self.addr)
            .into_client_request()
            .unwrap();
        if let Some(token) = token {
            request.headers_mut().insert(
                "authorization",
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
        }
        let (ws, _) = connect_async(request).await?;
        Ok(Client {
            ws,
            buffered: Vec::new(),
        })
    }

    pub async fn is_online(&self, viewer: &TestUser, handle: &str) -> bool {
        let body: serde_json::Value = self
            .http
            .get(self.url(&format!("/api/users/{handle}/online")))
            .bearer_auth(&viewer.token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["isOnline"].as_bool().unwrap()
    }

    /// Presence changes land asynchronously after a socket closes.
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

    pub async fn post_json(
        &self,
        user: &TestUser,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or_default())
    }

    pub async fn get_json(
        &self,
        user: &TestUser,
        path: &str,
        query: &[(&str, String)],
    ) -> (StatusCode, serde_json::Value) {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&user.token)
            .query(query)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or_default())
    }
}

pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    buffered: Vec<ServerEvent>,
}

impl Client {
    pub async fn emit(&mut self, event: &ClientEvent) {
        let text = serde_json::to_string(event).unwrap();
        self.ws.send(Frame::text(text)).await.unwrap();
    }

    pub async fn emit_raw(&mut self, text: &str) {
        self.ws.send(Frame::text(text.to_string())).await.unwrap();
    }

    async fn read(&mut self, timeout: Duration) -> Option<ServerEvent> {
        if !self.buffered.is_empty() {
            return Some(self.buffered.remove(0));
        }
        loop {
            let frame = tokio::time::timeout(timeout, self.ws.next()).await.ok()??;
            match frame.unwrap() {
                Frame::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
                Frame::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Next frame, whatever it is.
    pub async fn next_event(&mut self) -> ServerEvent {
        self.read(EVENT_TIMEOUT)
            .await
            .expect("no event before timeout")
    }

    /// Next frame matching `pick`; presence chatter and other frames are
    /// kept for later reads.
    pub async fn expect<T>(&mut self, mut pick: impl FnMut(&ServerEvent) -> Option<T>) -> T {
        if let Some(index) = self.buffered.iter().position(|e| pick(e).is_some()) {
            let event = self.buffered.remove(index);
            return pick(&event).unwrap();
        }
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let mut rest = std::mem::take(&mut self.buffered);
            let event = self.read(remaining).await.expect("expected event never arrived");
            self.buffered.append(&mut rest);
            if let Some(value) = pick(&event) {
                return value;
            }
            self.buffered.push(event);
        }
    }

    /// Asserts no frame matching `pick` arrives within `window`.
    pub async fn expect_none(&mut self, window: Duration, pick: impl Fn(&ServerEvent) -> bool) {
        assert!(!self.buffered.iter().any(&pick), "unexpected buffered event");
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.read(remaining).await {
                Some(event) => assert!(!pick(&event), "unexpected event {event:?}"),
                None => return,
            }
        }
    }

    /// Round-trips a ping, so the session is past `establish`.
    pub async fn ready(&mut self) {
        self.emit(&ClientEvent::Ping(PingPayload {})).await;
        self.expect(|event| matches!(event, ServerEvent::Pong(_)).then_some(()))
            .await;
    }

    pub async fn close(mut self) {
        self.ws.close(None).await.ok();
        while let Some(Ok(_)) = self.ws.next().await {}
    }
}
