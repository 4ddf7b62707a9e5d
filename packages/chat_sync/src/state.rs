use std::collections::HashMap;

use crate::conversation_store::ConversationStore;
use crate::history::HistoryStatus;
use crate::listeners::ListenerTable;
use crate::message::UserId;
use crate::notifications::NotificationTracker;

/// Everything the router, the send path and the history loader mutate.
/// Held behind a single lock per session.
#[derive(Debug, Default)]
pub struct SyncState {
    pub conversations: ConversationStore,
    pub notifications: NotificationTracker,
    pub listeners: ListenerTable,
    pub history: HashMap<UserId, HistoryStatus>,
    generation: u64,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped by every [`reset`](Self::reset). Work started against one
    /// generation must not land in the next.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sign-out reset. Listener registrations survive; they are owned by
    /// the views that made them.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.conversations.clear();
        self.notifications.reset();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Identity, Message, Partner};
    use chrono::Utc;

    #[test]
    fn reset_clears_conversations_and_bumps_generation() {
        let mut state = SyncState::new();
        let bob = UserId::new("bob");
        let msg = Message::compose(
            &Identity::new("me", "Me"),
            &Partner::new("bob", "Bob"),
            "hi",
            Utc::now(),
        );
        state.conversations.append_if_new(&bob, msg);
        state.notifications.mark_unread(&bob);
        let listener = state.listeners.register();

        let before = state.generation();
        state.reset();

        assert_eq!(state.generation(), before + 1);
        assert_eq!(state.conversations.len(&bob), 0);
        assert_eq!(state.notifications.count(), 0);
        assert!(state.listeners.unregister(listener.id));
    }
}
