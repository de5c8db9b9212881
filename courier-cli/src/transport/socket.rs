use futures_util::{SinkExt, StreamExt};
use shared::{
    config::client::ClientConfig,
    models::{ClientEvent, ServerEvent},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message as Frame, client::IntoClientRequest, http::HeaderValue},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::TransportError;

/// Sender side of one live WebSocket. Inbound frames arrive on the receiver
/// returned by [`connect`], which closes when the socket does.
#[derive(Debug, Clone)]
pub struct SocketLink {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    closed: CancellationToken,
}

impl SocketLink {
    /// # Errors
    /// Returns [`TransportError::Closed`] once the socket is gone.
    pub fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound.send(event).map_err(|_| TransportError::Closed)
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Performs the handshake with a bearer credential and starts the reader
/// and writer tasks. Both stop when `closed` is cancelled or the peer goes away.
///
/// # Errors
/// Returns [`TransportError::Rejected`] when the server refuses the
/// credential, or [`TransportError::Socket`] for network failures.
pub async fn connect(
    config: &ClientConfig,
    token: &str,
    closed: CancellationToken,
) -> Result<(SocketLink, mpsc::UnboundedReceiver<ServerEvent>), TransportError> {
    let mut request = config.websocket_url()?.as_str().into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
        TransportError::Rejected {
            status: 401,
            reason: "token is not a valid header value".to_string(),
        }
    })?;
    request.headers_mut().insert("authorization", bearer);

    let (stream, _) = connect_async(request).await?;
    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let writer_closed = closed.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_closed.cancelled() => break,
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "failed to encode client event");
                            continue;
                        }
                    };
                    if sink.send(Frame::text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
        writer_closed.cancel();
    });

    let reader_closed = closed.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = reader_closed.cancelled() => break,
                frame = source.next() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                if inbound_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!(error = %err, "ignoring malformed server frame"),
                        }
                    }
                    Some(Ok(Frame::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket read failed");
                        break;
                    }
                }
            }
        }
        reader_closed.cancel();
    });

    Ok((
        SocketLink {
            outbound: outbound_tx,
            closed,
        },
        inbound_rx,
    ))
}
