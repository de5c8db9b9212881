use std::sync::{Mutex, MutexGuard, PoisonError};

use metrics::gauge;
use shared::models::{Message, PresenceNotice, ServerEvent, UserSummary};
use tracing::debug;
use uuid::Uuid;

use super::{
    ConnectionHandle, ConnectionId,
    presence::PresenceRegistry,
    queue::PendingQueue,
    rooms::{RoomId, RoomTable},
};

#[derive(Debug, Default)]
struct HubState {
    presence: PresenceRegistry,
    queue: PendingQueue,
    rooms: RoomTable,
}

impl HubState {
    fn announce(&self, event: &ServerEvent, except: ConnectionId) {
        for handle in self.presence.handles().filter(|h| h.id() != except) {
            handle.push(event.clone());
        }
    }

    fn record_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("courier_connections_active").set(self.presence.len() as f64);
    }
}

/// Result of admitting a new connection.
#[derive(Debug)]
pub struct Connected {
    /// Previous connection of the same user, no longer addressed directly.
    pub superseded: Option<ConnectionHandle>,
    /// Queued messages already pushed to the new connection, oldest first.
    pub flushed: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectRoute {
    Pushed,
    Queued,
}

/// Owner of presence, pending queue and room state.
///
/// Every method takes the lock once and never awaits while holding it, so
/// each compound decision (online check then push or enqueue, register then
/// join then flush) is observed atomically by every other connection.
#[derive(Debug, Default)]
pub struct DeliveryHub {
    state: Mutex<HubState>,
}

impl DeliveryHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers presence, joins the personal and group rooms, drains the
    /// pending queue onto the connection and announces the user online.
    pub fn connect(&self, handle: &ConnectionHandle, groups: &[Uuid]) -> Connected {
        let user = handle.user();
        let mut state = self.lock();

        let superseded = state.presence.register(handle.clone());
        state.rooms.join(RoomId::User(user.id), handle);
        for group_id in groups {
            state.rooms.join(RoomId::Group(*group_id), handle);
        }

        let mut flushed = Vec::new();
        for message in state.queue.flush(user.id) {
            if handle.push(ServerEvent::NewMessage(message.clone())) {
                flushed.push(message);
            } else {
                state.queue.enqueue(user.id, message);
            }
        }

        state.announce(
            &ServerEvent::UserOnline(PresenceNotice {
                user_id: user.id,
                handle: user.handle.clone(),
            }),
            handle.id(),
        );
        state.record_gauge();

        debug!(
            user_id = %user.id,
            connection_id = %handle.id(),
            flushed = flushed.len(),
            superseded = superseded.is_some(),
            "connection registered"
        );

        Connected {
            superseded,
            flushed,
        }
    }

    /// Drops the connection from every room and from presence. Returns the
    /// user when this connection was the one serving them, after announcing
    /// them offline.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> Option<UserSummary> {
        let mut state = self.lock();
        state.rooms.leave_all(handle.id());

        let went_offline = state.presence.unregister(handle.id()).is_some();
        state.record_gauge();
        if !went_offline {
            return None;
        }

        let user = handle.user().clone();
        state.announce(
            &ServerEvent::UserOffline(PresenceNotice {
                user_id: user.id,
                handle: user.handle.clone(),
            }),
            handle.id(),
        );
        Some(user)
    }

    /// Pushes to the receiver's live connection, or queues when there is none.
    pub fn route_direct(&self, receiver_id: Uuid, message: &Message) -> DirectRoute {
        let mut state = self.lock();
        let pushed = state
            .presence
            .handle_for(receiver_id)
            .is_some_and(|handle| handle.push(ServerEvent::NewMessage(message.clone())));

        if pushed {
            DirectRoute::Pushed
        } else {
            state.queue.enqueue(receiver_id, message.clone());
            DirectRoute::Queued
        }
    }

    /// Sends to the user's current connection. `false` when offline.
    pub fn notify_user(&self, user_id: Uuid, event: ServerEvent) -> bool {
        self.lock()
            .presence
            .handle_for(user_id)
            .is_some_and(|handle| handle.push(event))
    }

    pub fn broadcast(&self, room: RoomId, event: &ServerEvent, except: Option<ConnectionId>) -> usize {
        self.lock().rooms.broadcast(room, event, except)
    }

    pub fn join_room(&self, room: RoomId, handle: &ConnectionHandle) -> bool {
        self.lock().rooms.join(room, handle)
    }

    pub fn leave_room(&self, room: RoomId, connection_id: ConnectionId) -> bool {
        self.lock().rooms.leave(room, connection_id)
    }

    #[must_use]
    pub fn is_joined(&self, room: RoomId, connection_id: ConnectionId) -> bool {
        self.lock().rooms.contains(room, connection_id)
    }

    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.lock().presence.is_online(user_id)
    }

    #[must_use]
    pub fn online_users(&self) -> Vec<UserSummary> {
        self.lock().presence.online_users()
    }

    #[must_use]
    pub fn pending_for(&self, user_id: Uuid) -> usize {
        self.lock().queue.len_for(user_id)
    }

    /// Forgets queued messages the user already fetched another way.
    pub fn discard_pending(&self, user_id: Uuid, ids: &[Uuid]) {
        self.lock().queue.discard(user_id, ids);
    }
}
