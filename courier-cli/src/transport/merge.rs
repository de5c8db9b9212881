use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use shared::models::Message;
use uuid::Uuid;

/// Client-side id of an optimistic placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

impl LocalId {
    /// Inverse of `Display`, used to match the `clientRef` the server echoes
    /// on `message_sent` and `message_error`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        value.strip_prefix("local-")?.parse().ok().map(Self)
    }
}

/// Who an unconfirmed send was addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingTarget {
    Direct(String),
    Group(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub local_id: LocalId,
    pub body: String,
    pub target: PendingTarget,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Pending(Placeholder),
    Confirmed(Message),
}

impl LogEntry {
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Pending(placeholder) => placeholder.created_at,
            Self::Confirmed(message) => message.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl MergeOutcome {
    #[must_use]
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// The conversation as the user sees it: confirmed records keyed by id plus
/// placeholders for sends still in flight.
#[derive(Debug, Default)]
pub struct MessageLog {
    confirmed: HashMap<Uuid, Message>,
    pending: Vec<Placeholder>,
    next_local: u64,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pending(&mut self, body: &str, target: PendingTarget) -> LocalId {
        self.next_local += 1;
        let local_id = LocalId(self.next_local);
        self.pending.push(Placeholder {
            local_id,
            body: body.trim().to_string(),
            target,
            created_at: Utc::now(),
        });
        local_id
    }

    /// Upsert by id. A record never moves back from delivered to sent.
    pub fn merge(&mut self, message: Message) -> MergeOutcome {
        match self.confirmed.get_mut(&message.id) {
            None => {
                self.confirmed.insert(message.id, message);
                MergeOutcome::Inserted
            }
            Some(existing) if *existing == message => MergeOutcome::Unchanged,
            Some(existing) if existing.is_delivered() && !message.is_delivered() => {
                MergeOutcome::Unchanged
            }
            Some(existing) => {
                *existing = message;
                MergeOutcome::Updated
            }
        }
    }

    /// Replaces the placeholder `local_id` with its authoritative record.
    pub fn confirm(&mut self, local_id: LocalId, message: Message) -> MergeOutcome {
        self.pending.retain(|p| p.local_id != local_id);
        self.merge(message)
    }

    /// Drops a failed placeholder and hands back its content for a retry.
    pub fn fail(&mut self, local_id: LocalId) -> Option<Placeholder> {
        let index = self.pending.iter().position(|p| p.local_id == local_id)?;
        Some(self.pending.remove(index))
    }

    /// `true` when the record existed and was still unconfirmed.
    pub fn mark_delivered(&mut self, id: Uuid, at: DateTime<Utc>) -> bool {
        self.confirmed
            .get_mut(&id)
            .is_some_and(|message| message.mark_delivered(at))
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.confirmed.get(&id)
    }

    #[must_use]
    pub fn pending(&self) -> &[Placeholder] {
        &self.pending
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display order: by creation time, never by arrival.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        let mut entries: Vec<LogEntry> = self
            .confirmed
            .values()
            .cloned()
            .map(LogEntry::Confirmed)
            .chain(self.pending.iter().cloned().map(LogEntry::Pending))
            .collect();
        entries.sort_by_key(LogEntry::created_at);
        entries
    }
}
