use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::models::{DeliveryStatus, Message, UserSummary};
use uuid::Uuid;

use super::{
    Authenticator, GroupDirectory, MessageStore, NewMessage, StoreError, UserDirectory,
};
use crate::auth::token::{hash_token, new_token};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserSummary>,
    handles: HashMap<String, Uuid>,
    groups: HashMap<Uuid, HashSet<Uuid>>,
    tokens: HashMap<Vec<u8>, Uuid>,
    /// Insertion order equals `created_at` order.
    messages: Vec<Message>,
    fail_writes: bool,
}

impl MemoryState {
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.messages.last() {
            Some(last) if last.created_at >= now => last.created_at + Duration::microseconds(1),
            _ => now,
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            Err(StoreError::Unavailable("writes disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Process-local store used by tests and `store.backend = "memory"`.
///
/// Seeding helpers stand in for the registration and group-management
/// surfaces the delivery core does not own.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // Every mutation is a single insert or field update.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn add_user(&self, handle: &str) -> UserSummary {
        let user = UserSummary::new(Uuid::new_v4(), handle);
        let mut state = self.lock();
        state.handles.insert(handle.to_string(), user.id);
        state.users.insert(user.id, user.clone());
        user
    }

    /// Issues a bearer token for `user_id` and returns it in clear text.
    pub fn issue_token(&self, user_id: Uuid) -> String {
        let token = new_token();
        self.lock().tokens.insert(hash_token(&token), user_id);
        token
    }

    pub fn revoke_token(&self, token: &str) {
        self.lock().tokens.remove(&hash_token(token));
    }

    pub fn create_group(&self, members: &[Uuid]) -> Uuid {
        let group_id = Uuid::new_v4();
        self.lock()
            .groups
            .insert(group_id, members.iter().copied().collect());
        group_id
    }

    pub fn add_member(&self, group_id: Uuid, user_id: Uuid) {
        self.lock().groups.entry(group_id).or_default().insert(user_id);
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }
}

fn after(since: Option<DateTime<Utc>>) -> impl Fn(&&Message) -> bool {
    move |message| since.is_none_or(|since| message.created_at > since)
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut state = self.lock();
        state.check_writable()?;

        let record = Message {
            id: Uuid::new_v4(),
            body: message.body,
            created_at: state.next_timestamp(),
            sender_id: message.sender.id,
            sender_handle: message.sender.handle,
            target: message.target,
            status: DeliveryStatus::Sent,
            delivered_at: None,
            attachment: message.attachment,
        };
        state.messages.push(record.clone());
        Ok(record)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn mark_delivered(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        let mut state = self.lock();
        state.check_writable()?;
        Ok(state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .and_then(|message| message.mark_delivered(at).then(|| message.clone())))
    }

    async fn mark_many_delivered(
        &self,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut state = self.lock();
        state.check_writable()?;
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        Ok(state
            .messages
            .iter_mut()
            .filter(|m| wanted.contains(&m.id))
            .filter_map(|message| message.mark_delivered(at).then(|| message.clone()))
            .collect())
    }

    async fn direct_since(
        &self,
        receiver_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.target.receiver_id() == Some(receiver_id))
            .filter(after(since))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn direct_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| {
                let receiver = m.target.receiver_id();
                (m.sender_id == user_id && receiver == Some(peer_id))
                    || (m.sender_id == peer_id && receiver == Some(user_id))
            })
            .filter(after(since))
            .cloned()
            .collect())
    }

    async fn group_history(
        &self,
        group_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.target.group_id() == Some(group_id))
            .filter(after(since))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_handle(&self, handle: &str) -> Result<Option<UserSummary>, StoreError> {
        let state = self.lock();
        Ok(state
            .handles
            .get(handle)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserSummary>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }
}

#[async_trait]
impl GroupDirectory for MemoryStore {
    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .groups
            .get(&group_id)
            .is_some_and(|members| members.contains(&user_id)))
    }

    async fn groups_for(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .lock()
            .groups
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(group_id, _)| *group_id)
            .collect())
    }
}

#[async_trait]
impl Authenticator for MemoryStore {
    async fn authenticate(&self, token: &str) -> Result<Option<UserSummary>, StoreError> {
        let state = self.lock();
        Ok(state
            .tokens
            .get(&hash_token(token))
            .and_then(|id| state.users.get(id))
            .cloned())
    }
}
