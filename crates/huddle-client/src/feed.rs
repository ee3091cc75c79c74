use chrono::{DateTime, Utc};
use uuid::Uuid;

use huddle_types::models::MessageRecord;

/// Identifier for a not-yet-confirmed outgoing message. Provisional ids
/// live in their own namespace, so they can never collide with (or be
/// mistaken for) a server-issued message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvisionalId(u64);

/// A locally rendered message awaiting its server-confirmed counterpart.
#[derive(Debug, Clone)]
pub struct ProvisionalMessage {
    pub id: ProvisionalId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FeedEntry {
    Provisional(ProvisionalMessage),
    Confirmed(MessageRecord),
}

/// The chat timeline as one client sees it, including its own in-flight
/// sends.
///
/// Reconciliation matches a confirmed own-message against the *oldest*
/// pending provisional entry. That is exact, not heuristic: the gateway
/// preserves per-sender broadcast order, so one client's confirmations
/// arrive in the order it sent. Two racing sends each reconcile their own
/// entry; clearing every provisional on any incoming message (which loses
/// a still-in-flight sibling) is precisely what this avoids.
pub struct ChatFeed {
    self_id: Uuid,
    entries: Vec<FeedEntry>,
    next_provisional: u64,
}

impl ChatFeed {
    pub fn new(self_id: Uuid) -> Self {
        Self {
            self_id,
            entries: Vec::new(),
            next_provisional: 0,
        }
    }

    /// Replace the confirmed timeline with a fetched history page
    /// (newest-first, as the REST endpoint returns it). Pending
    /// provisional entries survive at the tail.
    pub fn load_history(&mut self, newest_first: Vec<MessageRecord>) {
        let mut entries: Vec<FeedEntry> = newest_first
            .into_iter()
            .rev()
            .map(FeedEntry::Confirmed)
            .collect();
        entries.extend(
            self.entries
                .drain(..)
                .filter(|e| matches!(e, FeedEntry::Provisional(_))),
        );
        self.entries = entries;
    }

    /// Render a provisional entry for an outgoing send and return its id.
    pub fn begin_send(&mut self, content: &str) -> ProvisionalId {
        let id = ProvisionalId(self.next_provisional);
        self.next_provisional += 1;
        self.entries.push(FeedEntry::Provisional(ProvisionalMessage {
            id,
            content: content.to_string(),
            sent_at: Utc::now(),
        }));
        id
    }

    /// Merge an incoming new-message broadcast.
    ///
    /// Duplicate deliveries of an already-present id are discarded. A
    /// confirmed message from this client replaces its oldest pending
    /// provisional; everything else appends.
    pub fn apply_new_message(&mut self, record: MessageRecord) {
        if self.contains_confirmed(record.id) {
            return;
        }

        if record.sender.id == self.self_id {
            if let Some(pos) = self
                .entries
                .iter()
                .position(|e| matches!(e, FeedEntry::Provisional(_)))
            {
                self.entries[pos] = FeedEntry::Confirmed(record);
                return;
            }
        }

        self.entries.push(FeedEntry::Confirmed(record));
    }

    /// Merge a pinned-state broadcast: replace the matching confirmed
    /// entry in place. Unknown ids are ignored (the message fell outside
    /// the loaded history page).
    pub fn apply_pinned(&mut self, record: MessageRecord) {
        for entry in &mut self.entries {
            if let FeedEntry::Confirmed(existing) = entry {
                if existing.id == record.id {
                    *existing = record;
                    return;
                }
            }
        }
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }

    /// Number of sends still awaiting confirmation.
    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, FeedEntry::Provisional(_)))
            .count()
    }

    fn contains_confirmed(&self, id: Uuid) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, FeedEntry::Confirmed(m) if m.id == id))
    }
}
