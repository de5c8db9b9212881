//! In-process real-time state: who is connected, what waits for them, and
//! which rooms each connection has joined.

pub mod hub;
pub mod presence;
pub mod queue;
pub mod rooms;
pub mod session;

use shared::models::{ServerEvent, UserSummary};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Cheap, cloneable sender side of one live WebSocket connection.
///
/// Pushing never awaits, so it is safe while the hub lock is held. Frames
/// reach the socket in push order through the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: UserSummary,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(user: UserSummary, outbound: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            outbound,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn user(&self) -> &UserSummary {
        &self.user
    }

    /// Queues a frame for the writer task. `false` once the writer is gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.outbound.send(event).is_ok()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
