//! Inbound fan-out: parse, store, mark unread, notify listeners.

use tracing::{debug, warn};

use crate::error::FrameError;
use crate::message::{Message, UserId};
use crate::state::SyncState;
use crate::stomp::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered {
        partner: UserId,
        marked_unread: bool,
        listeners: usize,
    },
    /// Already known by (sender, timestamp, content); nothing changed.
    Duplicate { partner: UserId },
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    local: UserId,
}

impl MessageRouter {
    pub fn new(local: UserId) -> Self {
        Self { local }
    }

    pub fn local(&self) -> &UserId {
        &self.local
    }

    /// Route one MESSAGE frame. Malformed payloads are logged and dropped.
    pub fn on_frame(&self, state: &mut SyncState, frame: &Frame) -> Option<RouteOutcome> {
        match self.route(state, &frame.body) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    error = %e,
                    destination = frame.get("destination").unwrap_or("?"),
                    message_id = frame.get("message-id").unwrap_or("?"),
                    "dropping malformed chat frame"
                );
                None
            }
        }
    }

    pub fn route(&self, state: &mut SyncState, raw: &str) -> Result<RouteOutcome, FrameError> {
        let message = Message::parse(raw)?;
        Ok(self.deliver(state, message))
    }

    pub fn deliver(&self, state: &mut SyncState, message: Message) -> RouteOutcome {
        let partner = message.counterpart(&self.local).clone();

        if !state
            .conversations
            .append_if_new(&partner, message.clone())
        {
            debug!(%partner, "duplicate delivery ignored");
            return RouteOutcome::Duplicate { partner };
        }

        // Our own messages (another device, or a broker echo that raced
        // ahead of the optimistic insert) are never unseen.
        let marked_unread =
            message.sender_id != self.local && state.notifications.mark_unread(&partner);
        let listeners = state.listeners.notify(&message);

        debug!(%partner, marked_unread, listeners, "message delivered");
        RouteOutcome::Delivered {
            partner,
            marked_unread,
            listeners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::Command;

    fn router() -> MessageRouter {
        MessageRouter::new(UserId::new("me"))
    }

    fn payload(from: &str, to: &str, content: &str, ts: &str) -> String {
        serde_json::json!({
            "senderId": from,
            "recipientId": to,
            "senderDisplayName": from,
            "recipientDisplayName": to,
            "content": content,
            "timestamp": ts,
        })
        .to_string()
    }

    #[test]
    fn inbound_goes_to_sender_conversation() {
        let mut state = SyncState::new();
        let outcome = router()
            .route(&mut state, &payload("bob", "me", "hi", "2024-05-01T12:00:00Z"))
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                partner: UserId::new("bob"),
                marked_unread: true,
                listeners: 0,
            }
        );
        assert_eq!(state.conversations.len(&UserId::new("bob")), 1);
        assert!(state.notifications.is_unread(&UserId::new("bob")));
    }

    #[test]
    fn active_partner_is_not_marked_but_listener_is_called() {
        let mut state = SyncState::new();
        state.notifications.set_active(Some(UserId::new("bob")));
        let mut listener = state.listeners.register();

        router()
            .route(&mut state, &payload("bob", "me", "hi", "2024-05-01T12:00:00Z"))
            .unwrap();

        assert_eq!(state.notifications.count(), 0);
        assert_eq!(listener.messages.try_recv().unwrap().content, "hi");
    }

    #[test]
    fn listener_called_for_inactive_partner_too() {
        let mut state = SyncState::new();
        state.notifications.set_active(Some(UserId::new("carol")));
        let mut listener = state.listeners.register();

        router()
            .route(&mut state, &payload("bob", "me", "hi", "2024-05-01T12:00:00Z"))
            .unwrap();

        assert!(state.notifications.is_unread(&UserId::new("bob")));
        assert!(listener.messages.try_recv().is_ok());
    }

    #[test]
    fn duplicate_is_a_complete_no_op() {
        let mut state = SyncState::new();
        let raw = payload("bob", "me", "hi", "2024-05-01T12:00:00Z");
        router().route(&mut state, &raw).unwrap();
        state.notifications.clear(&UserId::new("bob"));
        let mut listener = state.listeners.register();

        let outcome = router().route(&mut state, &raw).unwrap();

        assert!(matches!(outcome, RouteOutcome::Duplicate { .. }));
        assert_eq!(state.conversations.len(&UserId::new("bob")), 1);
        assert_eq!(state.notifications.count(), 0);
        assert!(listener.messages.try_recv().is_err());
    }

    #[test]
    fn self_echo_files_under_recipient_without_unread() {
        let mut state = SyncState::new();
        let outcome = router()
            .route(&mut state, &payload("me", "bob", "sent elsewhere", "2024-05-01T12:00:00Z"))
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                partner: UserId::new("bob"),
                marked_unread: false,
                listeners: 0,
            }
        );
        assert_eq!(state.notifications.count(), 0);
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let mut state = SyncState::new();
        let frame = Frame::new(Command::Message).with_body("{not json");
        assert_eq!(router().on_frame(&mut state, &frame), None);

        let frame = Frame::new(Command::Message).with_body(r#"{"senderId":"bob"}"#);
        assert_eq!(router().on_frame(&mut state, &frame), None);
        assert!(state.conversations.partners().is_empty());
    }
}
