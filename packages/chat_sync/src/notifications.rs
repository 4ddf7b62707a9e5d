//! Unread tracking, decoupled from which conversation is open.
//!
//! The active partner and the unread set live in one struct so selecting a
//! partner and clearing its unread mark happen in the same `&mut` call.

use std::collections::BTreeSet;

use crate::message::UserId;

#[derive(Debug, Default)]
pub struct NotificationTracker {
    active: Option<UserId>,
    unread: BTreeSet<UserId>,
}

impl NotificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `partner` as having unseen messages. No-op for the active
    /// partner. Returns whether the set changed.
    pub fn mark_unread(&mut self, partner: &UserId) -> bool {
        if self.active.as_ref() == Some(partner) {
            return false;
        }
        self.unread.insert(partner.clone())
    }

    pub fn clear(&mut self, partner: &UserId) -> bool {
        self.unread.remove(partner)
    }

    /// Switch the open conversation, clearing the new partner's unread mark.
    pub fn set_active(&mut self, partner: Option<UserId>) {
        if let Some(p) = &partner {
            self.unread.remove(p);
        }
        self.active = partner;
    }

    pub fn active(&self) -> Option<&UserId> {
        self.active.as_ref()
    }

    pub fn is_unread(&self, partner: &UserId) -> bool {
        self.unread.contains(partner)
    }

    pub fn count(&self) -> usize {
        self.unread.len()
    }

    /// Sorted snapshot of partners with unseen messages.
    pub fn unread(&self) -> Vec<UserId> {
        self.unread.iter().cloned().collect()
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.unread.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> UserId {
        UserId::new(s)
    }

    #[test]
    fn mark_and_count() {
        let mut t = NotificationTracker::new();
        assert!(t.mark_unread(&id("b")));
        assert!(!t.mark_unread(&id("b")));
        assert!(t.mark_unread(&id("c")));
        assert_eq!(t.count(), 2);
        assert_eq!(t.unread(), vec![id("b"), id("c")]);
    }

    #[test]
    fn active_partner_is_never_unread() {
        let mut t = NotificationTracker::new();
        t.set_active(Some(id("b")));
        assert!(!t.mark_unread(&id("b")));
        assert!(!t.is_unread(&id("b")));
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn selecting_clears_unread() {
        let mut t = NotificationTracker::new();
        t.mark_unread(&id("b"));
        t.mark_unread(&id("c"));
        t.set_active(Some(id("b")));
        assert_eq!(t.active(), Some(&id("b")));
        assert_eq!(t.unread(), vec![id("c")]);
    }

    #[test]
    fn leaving_a_partner_allows_new_unread() {
        let mut t = NotificationTracker::new();
        t.set_active(Some(id("b")));
        t.set_active(Some(id("c")));
        assert!(t.mark_unread(&id("b")));
        t.set_active(None);
        assert!(t.mark_unread(&id("c")));
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn clear_and_reset() {
        let mut t = NotificationTracker::new();
        t.mark_unread(&id("b"));
        assert!(t.clear(&id("b")));
        assert!(!t.clear(&id("b")));
        t.set_active(Some(id("x")));
        t.mark_unread(&id("c"));
        t.reset();
        assert_eq!(t.active(), None);
        assert_eq!(t.count(), 0);
    }
}
