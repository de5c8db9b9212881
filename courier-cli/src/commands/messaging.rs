use std::{io::Write, time::Duration};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use shared::config::client::ClientConfig;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::require_token;
use crate::transport::{ConnectionKind, TransportAdapter, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Direct(String),
    Group(Uuid),
}

/// Sends one message and prints the stored record as JSON.
///
/// # Errors
/// Fails when the server refuses the credential or the message.
pub async fn send(
    config: ClientConfig,
    recipient: Recipient,
    content: &str,
    out: &mut impl Write,
) -> Result<()> {
    let token = require_token(&config)?;
    let adapter = TransportAdapter::mount(config, token, |event| {
        debug!(?event, "transport event");
    })
    .await
    .context("failed to connect")?;

    let ticket = match &recipient {
        Recipient::Direct(handle) => adapter.send_message(content, handle, None),
        Recipient::Group(group_id) => adapter.send_group_message(content, *group_id, None),
    };
    let outcome = ticket.outcome().await;
    adapter.unmount().await;

    let message = outcome.context("message was not sent")?;
    writeln!(out, "{}", serde_json::to_string(&message)?)?;
    Ok(())
}

/// Prints every transport event as one JSON line until Ctrl-C or `limit`.
///
/// # Errors
/// Fails when the server refuses the credential.
pub async fn listen(config: ClientConfig, groups: &[Uuid], limit: Option<Duration>) -> Result<()> {
    let token = require_token(&config)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let adapter = TransportAdapter::mount(config, token, move |event| {
        let _ = tx.send(event);
    })
    .await
    .context("failed to connect")?;

    let stop = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(stop);

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            () = &mut stop => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                // Rooms are per connection, so every fresh socket rejoins.
                if event == TransportEvent::Connection(ConnectionKind::WebSocket) {
                    for group_id in groups {
                        adapter.join_group(*group_id);
                    }
                }
                writeln!(stdout, "{}", describe(&event))?;
            }
        }
    }

    adapter.unmount().await;
    info!("listener stopped");
    Ok(())
}

/// `{"event": ..., "data": ...}`, mirroring the socket's own framing.
#[must_use]
pub fn describe(event: &TransportEvent) -> Value {
    let (name, data) = match event {
        TransportEvent::Message(message) => ("message", json!(message)),
        TransportEvent::Delivered(id) => ("delivered", json!({ "messageId": id })),
        TransportEvent::SendFailed {
            local_id,
            content,
            reason,
        } => (
            "send_failed",
            json!({ "localId": local_id.to_string(), "content": content, "reason": reason }),
        ),
        TransportEvent::Typing(indicator) => ("typing_indicator", json!(indicator)),
        TransportEvent::GroupTyping(indicator) => ("group_typing_indicator", json!(indicator)),
        TransportEvent::UserOnline(notice) => ("user_online", json!(notice)),
        TransportEvent::UserOffline(notice) => ("user_offline", json!(notice)),
        TransportEvent::OnlineStatus(status) => ("online_status", json!(status)),
        TransportEvent::GroupUserOnline(notice) => ("group_user_online", json!(notice)),
        TransportEvent::GroupUserOffline(notice) => ("group_user_offline", json!(notice)),
        TransportEvent::Error(reason) => ("error", json!({ "reason": reason })),
        TransportEvent::Connection(kind) => ("connection", json!({ "kind": kind.to_string() })),
    };
    json!({ "event": name, "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::PresenceNotice;

    #[test]
    fn describe_uses_socket_framing() {
        let value = describe(&TransportEvent::Connection(ConnectionKind::Polling));
        assert_eq!(value, json!({ "event": "connection", "data": { "kind": "polling" } }));

        let user_id = Uuid::new_v4();
        let value = describe(&TransportEvent::UserOnline(PresenceNotice {
            user_id,
            handle: "bob".to_string(),
        }));
        assert_eq!(value["event"], "user_online");
        assert_eq!(value["data"]["handle"], "bob");
        assert_eq!(value["data"]["userId"], user_id.to_string());
    }

    #[tokio::test]
    async fn send_without_token_fails_fast() {
        let config = ClientConfig::default();
        let err = send(config, Recipient::Direct("bob".into()), "hi", &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no token"));
    }
}
