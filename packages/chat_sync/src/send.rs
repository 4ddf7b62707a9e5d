//! Outgoing messages.
//!
//! A send is checked and composed up front, published on the live link, and
//! only then appended to the local conversation. Any failure before the
//! publish leaves the store untouched, and a send that straddles a sign-out
//! never lands in the next session's store.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::connection::{ConnectionState, ConnectionStatus, Link};
use crate::error::SendError;
use crate::message::{Identity, Message, Partner};
use crate::state::SyncState;
use crate::stomp::{Frame, PUBLISH_DESTINATION};

/// A checked, composed send that has not been published yet.
#[derive(Debug)]
pub struct PreparedSend {
    pub link: Link,
    pub message: Message,
    pub frame: Frame,
}

/// Validate a send and build its frame. Connection is checked before
/// content.
pub fn prepare(
    identity: Option<&Identity>,
    status: ConnectionStatus,
    partner: &Partner,
    content: &str,
    now: DateTime<Utc>,
) -> Result<PreparedSend, SendError> {
    let identity = identity.ok_or(SendError::NotSignedIn)?;
    let link = match status {
        ConnectionStatus {
            state: ConnectionState::Connected,
            link: Some(link),
        } if !link.is_closed() => link,
        _ => return Err(SendError::NotConnected),
    };
    if content.trim().is_empty() {
        return Err(SendError::EmptyContent);
    }

    let message = Message::compose(identity, partner, content, now);
    let json = serde_json::to_string(&message).map_err(|e| SendError::Encode(e.to_string()))?;
    let frame = Frame::send_json(PUBLISH_DESTINATION, json);
    Ok(PreparedSend {
        link,
        message,
        frame,
    })
}

impl PreparedSend {
    /// Publish, then record the message locally.
    ///
    /// `generation` is the [`SyncState::generation`] observed before the
    /// send was prepared. If the state has been reset since, the message is
    /// not recorded and the send reports [`SendError::NotSignedIn`].
    pub async fn publish(
        self,
        state: &tokio::sync::Mutex<SyncState>,
        generation: u64,
    ) -> Result<Message, SendError> {
        self.link
            .send(self.frame)
            .await
            .map_err(|_| SendError::NotConnected)?;

        let mut state = state.lock().await;
        if state.generation() != generation {
            debug!(
                partner = %self.message.recipient_id,
                epoch = self.link.epoch(),
                "session ended during send, not recorded"
            );
            return Err(SendError::NotSignedIn);
        }
        let inserted = state
            .conversations
            .append_if_new(&self.message.recipient_id, self.message.clone());
        debug!(
            partner = %self.message.recipient_id,
            epoch = self.link.epoch(),
            inserted,
            "message sent"
        );
        Ok(self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::UserId;
    use crate::stomp::Command;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::sync::{Mutex, mpsc};

    fn me() -> Identity {
        Identity::new("me", "Me")
    }

    fn bob() -> Partner {
        Partner::new("bob", "Bob")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn connected() -> (ConnectionStatus, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(4);
        (
            ConnectionStatus {
                state: ConnectionState::Connected,
                link: Some(Link::for_test(1, tx)),
            },
            rx,
        )
    }

    #[test]
    fn rejects_when_not_connected() {
        let status = ConnectionStatus::default();
        assert_eq!(
            prepare(Some(&me()), status, &bob(), "hi", now()).unwrap_err(),
            SendError::NotConnected
        );
    }

    #[test]
    fn rejects_connecting_state() {
        let (mut status, _rx) = connected();
        status.state = ConnectionState::Connecting;
        assert_eq!(
            prepare(Some(&me()), status, &bob(), "hi", now()).unwrap_err(),
            SendError::NotConnected
        );
    }

    #[test]
    fn rejects_blank_content() {
        let (status, _rx) = connected();
        assert_eq!(
            prepare(Some(&me()), status, &bob(), "  \n\t", now()).unwrap_err(),
            SendError::EmptyContent
        );
    }

    #[test]
    fn rejects_without_identity() {
        let (status, _rx) = connected();
        assert_eq!(
            prepare(None, status, &bob(), "hi", now()).unwrap_err(),
            SendError::NotSignedIn
        );
    }

    #[tokio::test]
    async fn publishes_then_appends() {
        let (status, mut rx) = connected();
        let state = Mutex::new(SyncState::new());

        let sent = prepare(Some(&me()), status, &bob(), "hello", now())
            .unwrap()
            .publish(&state, 0)
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.get("destination"), Some(PUBLISH_DESTINATION));
        assert_eq!(Message::parse(&frame.body).unwrap(), sent);

        let state = state.lock().await;
        assert_eq!(state.conversations.get(&UserId::new("bob")), vec![sent]);
        assert_eq!(state.notifications.count(), 0);
    }

    #[tokio::test]
    async fn closed_link_leaves_store_untouched() {
        let (status, rx) = connected();
        let prepared = prepare(Some(&me()), status, &bob(), "hello", now()).unwrap();
        drop(rx);

        let state = Mutex::new(SyncState::new());
        assert_eq!(
            prepared.publish(&state, 0).await.unwrap_err(),
            SendError::NotConnected
        );
        assert_eq!(state.lock().await.conversations.len(&UserId::new("bob")), 0);
    }

    #[tokio::test]
    async fn sign_out_between_publish_and_append_is_not_recorded() {
        let (status, mut rx) = connected();
        let state = Arc::new(Mutex::new(SyncState::new()));
        let generation = state.lock().await.generation();
        let prepared = prepare(Some(&me()), status, &bob(), "hello", now()).unwrap();

        // Hold the lock so the send parks after publishing, before recording.
        let mut guard = state.lock().await;
        let send = tokio::spawn({
            let state = state.clone();
            async move { prepared.publish(&state, generation).await }
        });
        assert_eq!(rx.recv().await.unwrap().command, Command::Send);

        guard.reset();
        drop(guard);

        assert_eq!(send.await.unwrap().unwrap_err(), SendError::NotSignedIn);
        assert_eq!(state.lock().await.conversations.len(&UserId::new("bob")), 0);
    }
}
