use std::collections::{HashMap, VecDeque};

use shared::models::Message;
use uuid::Uuid;

/// Direct messages waiting for an offline recipient, FIFO per user.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: HashMap<Uuid, VecDeque<Message>>,
}

impl PendingQueue {
    pub fn enqueue(&mut self, user_id: Uuid, message: Message) {
        self.entries.entry(user_id).or_default().push_back(message);
    }

    /// Drains every pending message for `user_id` in enqueue order.
    pub fn flush(&mut self, user_id: Uuid) -> Vec<Message> {
        self.entries
            .remove(&user_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Drops entries already handed over by another path.
    pub fn discard(&mut self, user_id: Uuid, ids: &[Uuid]) {
        if let Some(queue) = self.entries.get_mut(&user_id) {
            queue.retain(|message| !ids.contains(&message.id));
            if queue.is_empty() {
                self.entries.remove(&user_id);
            }
        }
    }

    #[must_use]
    pub fn len_for(&self, user_id: Uuid) -> usize {
        self.entries.get(&user_id).map_or(0, VecDeque::len)
    }
}
