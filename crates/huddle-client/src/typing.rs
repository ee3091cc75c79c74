use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// How long a typing entry survives without a fresh start event. Stop
/// events normally clear entries sooner; the TTL covers a stop that never
/// arrives (dropped connection mid-keystroke).
pub const TYPING_TTL: Duration = Duration::from_secs(3);

/// Quiet period after the last keystroke before a stop is auto-emitted.
pub const QUIET_WINDOW: Duration = Duration::from_secs(1);

struct TypingEntry {
    user_id: Uuid,
    expires_at: Instant,
}

/// Receiver-side "who is typing" aggregation: a set keyed by display name,
/// each entry expiring independently.
pub struct TypingRoster {
    self_id: Uuid,
    entries: HashMap<String, TypingEntry>,
}

impl TypingRoster {
    pub fn new(self_id: Uuid) -> Self {
        Self {
            self_id,
            entries: HashMap::new(),
        }
    }

    /// Merge a user-typing event. Events for this client's own user id are
    /// ignored — another device of the same account is not "someone
    /// typing" worth showing.
    pub fn observe_start(&mut self, user_id: Uuid, user_name: &str, now: Instant) {
        if user_id == self.self_id {
            return;
        }
        self.entries.insert(user_name.to_string(), TypingEntry {
            user_id,
            expires_at: now + TYPING_TTL,
        });
    }

    /// Merge a stopped-typing event. Stop events carry only the user id,
    /// so entries are matched on it.
    pub fn observe_stop(&mut self, user_id: Uuid) {
        self.entries.retain(|_, e| e.user_id != user_id);
    }

    /// Names currently typing, sorted for stable rendering. Prunes entries
    /// whose TTL lapsed.
    pub fn active(&mut self, now: Instant) -> Vec<String> {
        self.entries.retain(|_, e| e.expires_at > now);
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Sender-side debounce for typing indicators.
///
/// Every non-empty input change emits a start and re-arms one pending
/// quiet deadline — rapid keystrokes coalesce into a single stop timer
/// rather than stacking one per keystroke. Clearing the input or sending
/// the message stops immediately.
pub struct TypingNotifier {
    deadline: Option<Instant>,
}

impl Default for TypingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingNotifier {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Call on every input change; returns the signal to emit, if any.
    pub fn on_input(&mut self, text: &str, now: Instant) -> Option<TypingSignal> {
        if text.trim().is_empty() {
            self.deadline = None;
            Some(TypingSignal::Stop)
        } else {
            self.deadline = Some(now + QUIET_WINDOW);
            Some(TypingSignal::Start)
        }
    }

    /// Call periodically; emits one stop when the quiet window lapses.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    /// The message went out: cancel the pending deadline and stop at once.
    pub fn on_send(&mut self) -> TypingSignal {
        self.deadline = None;
        TypingSignal::Stop
    }
}
