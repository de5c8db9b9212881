use std::collections::HashMap;

use shared::models::UserSummary;
use uuid::Uuid;

use super::{ConnectionHandle, ConnectionId};

/// Maps each online user to the one connection currently serving them.
///
/// Last connection wins: registering supersedes any previous handle for the
/// same user, and a late unregister for a superseded connection leaves the
/// newer entry alone.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_user: HashMap<Uuid, ConnectionHandle>,
    by_connection: HashMap<ConnectionId, Uuid>,
}

impl PresenceRegistry {
    /// Returns the superseded handle, if any.
    pub fn register(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user().id;
        self.by_connection.insert(handle.id(), user_id);
        self.by_user.insert(user_id, handle)
    }

    /// Returns the user id only when this call took the user offline.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Uuid> {
        let user_id = self.by_connection.remove(&connection_id)?;
        let current = self.by_user.get(&user_id)?;
        if current.id() != connection_id {
            return None;
        }
        self.by_user.remove(&user_id);
        Some(user_id)
    }

    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.by_user.contains_key(&user_id)
    }

    #[must_use]
    pub fn handle_for(&self, user_id: Uuid) -> Option<&ConnectionHandle> {
        self.by_user.get(&user_id)
    }

    pub fn handles(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.by_user.values()
    }

    #[must_use]
    pub fn online_users(&self) -> Vec<UserSummary> {
        let mut users: Vec<_> = self.by_user.values().map(|h| h.user().clone()).collect();
        users.sort_by(|a, b| a.handle.cmp(&b.handle));
        users
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}
