//! Per-partner message collections with de-duplication and history merge.
//!
//! Entries are append-only and oldest first. The only operation that may
//! reorder a conversation is a history merge, which re-sorts the union of
//! known and fetched messages by timestamp.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::message::{DedupKey, Message, UserId};

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<Message>,
    keys: HashSet<DedupKey>,
    seeded: bool,
}

impl Conversation {
    fn push_if_new(&mut self, message: Message) -> bool {
        if !self.keys.insert(message.dedup_key()) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<UserId, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` to the conversation with `partner` unless an entry
    /// with the same (sender, timestamp, content) is already there.
    /// Returns whether it was inserted.
    pub fn append_if_new(&mut self, partner: &UserId, message: Message) -> bool {
        self.conversations
            .entry(partner.clone())
            .or_default()
            .push_if_new(message)
    }

    /// Seed a conversation from persisted history.
    ///
    /// Into an empty conversation the history is taken as-is (minus
    /// duplicates within it). If live or optimistic entries got there first,
    /// the two are merged by de-duplication key and stably re-sorted by
    /// timestamp, even when history adds nothing; nothing already known is
    /// ever dropped. Returns the number
    /// of entries added.
    pub fn seed_history(&mut self, partner: &UserId, history: Vec<Message>) -> usize {
        let convo = self.conversations.entry(partner.clone()).or_default();
        let had_entries = !convo.messages.is_empty();

        let mut added = 0;
        for message in history {
            if convo.push_if_new(message) {
                added += 1;
            }
        }

        if had_entries {
            convo.messages.sort_by_key(|m| m.timestamp);
        }
        convo.seeded = true;

        debug!(%partner, added, merged = had_entries, "seeded conversation history");
        added
    }

    /// Ordered snapshot of the conversation with `partner`.
    pub fn get(&self, partner: &UserId) -> Vec<Message> {
        self.conversations
            .get(partner)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, partner: &UserId) -> usize {
        self.conversations
            .get(partner)
            .map(|c| c.messages.len())
            .unwrap_or(0)
    }

    /// Whether history has been seeded for `partner` at least once.
    pub fn is_seeded(&self, partner: &UserId) -> bool {
        self.conversations
            .get(partner)
            .is_some_and(|c| c.seeded)
    }

    /// Partners with at least one stored message, sorted.
    pub fn partners(&self) -> Vec<UserId> {
        let mut partners: Vec<UserId> = self
            .conversations
            .iter()
            .filter(|(_, c)| !c.messages.is_empty())
            .map(|(p, _)| p.clone())
            .collect();
        partners.sort();
        partners
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn msg(from: &str, to: &str, content: &str, at: i64) -> Message {
        Message {
            sender_id: UserId::new(from),
            recipient_id: UserId::new(to),
            sender_display_name: from.to_uppercase(),
            recipient_display_name: to.to_uppercase(),
            content: content.to_string(),
            timestamp: t(at),
        }
    }

    fn contents(store: &ConversationStore, partner: &str) -> Vec<String> {
        store
            .get(&UserId::new(partner))
            .into_iter()
            .map(|m| m.content)
            .collect()
    }

    #[test]
    fn append_keeps_arrival_order() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        // Out-of-order timestamps still keep arrival order on plain append.
        assert!(store.append_if_new(&b, msg("b", "a", "second", 2)));
        assert!(store.append_if_new(&b, msg("b", "a", "first", 1)));
        assert_eq!(contents(&store, "b"), vec!["second", "first"]);
    }

    #[test]
    fn duplicate_append_is_a_no_op() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        assert!(store.append_if_new(&b, msg("a", "b", "hi", 1)));
        assert!(!store.append_if_new(&b, msg("a", "b", "hi", 1)));
        assert_eq!(store.len(&b), 1);
    }

    #[test]
    fn same_content_different_time_is_distinct() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        assert!(store.append_if_new(&b, msg("a", "b", "hi", 1)));
        assert!(store.append_if_new(&b, msg("a", "b", "hi", 2)));
        assert!(store.append_if_new(&b, msg("b", "a", "hi", 2)));
        assert_eq!(store.len(&b), 3);
    }

    #[test]
    fn display_names_do_not_affect_identity() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        let mut renamed = msg("a", "b", "hi", 1);
        renamed.sender_display_name = "someone else".into();
        assert!(store.append_if_new(&b, msg("a", "b", "hi", 1)));
        assert!(!store.append_if_new(&b, renamed));
    }

    #[test]
    fn seed_into_empty_conversation() {
        let mut store = ConversationStore::new();
        let a = UserId::new("a");
        let added = store.seed_history(&a, vec![msg("a", "b", "hi", 1)]);
        assert_eq!(added, 1);
        assert_eq!(contents(&store, "a"), vec!["hi"]);
        assert!(store.is_seeded(&a));
    }

    #[test]
    fn seed_drops_duplicates_within_history() {
        let mut store = ConversationStore::new();
        let a = UserId::new("a");
        let added = store.seed_history(
            &a,
            vec![msg("a", "b", "hi", 1), msg("a", "b", "hi", 1), msg("b", "a", "yo", 2)],
        );
        assert_eq!(added, 2);
    }

    #[test]
    fn seed_merges_with_live_messages() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        // Live message and an optimistic send arrive before history.
        store.append_if_new(&b, msg("b", "a", "live", 5));
        store.append_if_new(&b, msg("a", "b", "mine", 6));

        let added = store.seed_history(
            &b,
            vec![
                msg("a", "b", "old", 1),
                msg("b", "a", "older reply", 2),
                msg("b", "a", "live", 5),
            ],
        );

        assert_eq!(added, 2);
        assert_eq!(
            contents(&store, "b"),
            vec!["old", "older reply", "live", "mine"]
        );
    }

    #[test]
    fn reseeding_never_loses_messages() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        store.seed_history(&b, vec![msg("b", "a", "one", 1)]);
        store.append_if_new(&b, msg("a", "b", "two", 3));

        // Reload after reconnect: history now contains a message sent during
        // the outage, and everything else we already had.
        let added = store.seed_history(
            &b,
            vec![
                msg("b", "a", "one", 1),
                msg("b", "a", "during outage", 2),
                msg("a", "b", "two", 3),
            ],
        );
        assert_eq!(added, 1);
        assert_eq!(contents(&store, "b"), vec!["one", "during outage", "two"]);
    }

    #[test]
    fn merge_sorts_even_when_history_adds_nothing() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        // Sender clocks disagree with arrival order.
        store.append_if_new(&b, msg("b", "a", "later", 5));
        store.append_if_new(&b, msg("a", "b", "earlier", 1));

        let added = store.seed_history(&b, vec![msg("a", "b", "earlier", 1)]);

        assert_eq!(added, 0);
        assert_eq!(contents(&store, "b"), vec!["earlier", "later"]);
    }

    #[test]
    fn merge_sort_is_stable_for_equal_timestamps() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        store.append_if_new(&b, msg("b", "a", "x", 5));
        store.append_if_new(&b, msg("a", "b", "y", 5));
        store.seed_history(&b, vec![msg("b", "a", "early", 1)]);
        assert_eq!(contents(&store, "b"), vec!["early", "x", "y"]);
    }

    #[test]
    fn partners_are_isolated() {
        let mut store = ConversationStore::new();
        store.append_if_new(&UserId::new("b"), msg("a", "b", "to b", 1));
        store.append_if_new(&UserId::new("c"), msg("a", "c", "to c", 1));
        store.seed_history(&UserId::new("d"), vec![]);
        assert_eq!(store.partners(), vec![UserId::new("b"), UserId::new("c")]);
        assert_eq!(contents(&store, "b"), vec!["to b"]);
        assert!(store.get(&UserId::new("zzz")).is_empty());
    }

    #[test]
    fn clear_forgets_everything() {
        let mut store = ConversationStore::new();
        let b = UserId::new("b");
        store.seed_history(&b, vec![msg("b", "a", "one", 1)]);
        store.clear();
        assert_eq!(store.len(&b), 0);
        assert!(!store.is_seeded(&b));
    }
}
