use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use shared::models::ServerEvent;
use uuid::Uuid;

use super::{ConnectionHandle, ConnectionId};

/// Broadcast scope a connection can join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Personal room of one user.
    User(Uuid),
    Group(Uuid),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Connection membership per room. Not persisted; rebuilt as sessions join.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<RoomId, HashMap<ConnectionId, ConnectionHandle>>,
    joined: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomTable {
    /// Returns `false` when the connection was already in the room.
    pub fn join(&mut self, room: RoomId, handle: &ConnectionHandle) -> bool {
        self.joined.entry(handle.id()).or_default().insert(room);
        self.rooms
            .entry(room)
            .or_default()
            .insert(handle.id(), handle.clone())
            .is_none()
    }

    /// Returns `false` when the connection was not in the room.
    pub fn leave(&mut self, room: RoomId, connection_id: ConnectionId) -> bool {
        if let Some(rooms) = self.joined.get_mut(&connection_id) {
            rooms.remove(&room);
            if rooms.is_empty() {
                self.joined.remove(&connection_id);
            }
        }
        self.remove_member(room, connection_id)
    }

    pub fn leave_all(&mut self, connection_id: ConnectionId) {
        for room in self.joined.remove(&connection_id).unwrap_or_default() {
            self.remove_member(room, connection_id);
        }
    }

    fn remove_member(&mut self, room: RoomId, connection_id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(&room) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            self.rooms.remove(&room);
        }
        removed
    }

    /// Pushes `event` to every member except `except`. Returns the number of
    /// connections that accepted the frame.
    pub fn broadcast(
        &self,
        room: RoomId,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        self.rooms.get(&room).map_or(0, |members| {
            members
                .values()
                .filter(|handle| Some(handle.id()) != except)
                .filter(|handle| handle.push(event.clone()))
                .count()
        })
    }

    #[must_use]
    pub fn contains(&self, room: RoomId, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(&room)
            .is_some_and(|members| members.contains_key(&connection_id))
    }

    #[must_use]
    pub fn member_count(&self, room: RoomId) -> usize {
        self.rooms.get(&room).map_or(0, HashMap::len)
    }
}
