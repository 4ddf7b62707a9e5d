//! The one inbound subscription per signed-in identity.
//!
//! The registry is driven by connection transitions and identity changes and
//! answers with the SUBSCRIBE/UNSUBSCRIBE frames the caller must put on the
//! current link. It never sends anything itself.

use tracing::{debug, info};
use uuid::Uuid;

use crate::message::UserId;
use crate::stomp::Frame;

/// Canonical private address for `identity`.
pub fn private_destination(identity: &UserId) -> String {
    format!("/user/{identity}/private")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    pub identity: UserId,
    /// Connection epoch the subscription was created on.
    pub epoch: u64,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    identity: Option<UserId>,
    /// Epoch of the live connection, if any.
    connected: Option<u64>,
    active: Option<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    pub fn active(&self) -> Option<&Subscription> {
        self.active.as_ref()
    }

    /// Connection `epoch` reached Connected.
    ///
    /// Idempotent for the same epoch. A newer epoch tears down whatever
    /// subscription is still recorded before creating its own. Without a
    /// known identity the subscription is deferred until
    /// [`set_identity`](Self::set_identity).
    pub fn on_connected(&mut self, epoch: u64) -> Vec<Frame> {
        let mut frames = Vec::new();

        if let Some(active) = &self.active {
            if active.epoch == epoch {
                debug!(epoch, id = %active.id, "already subscribed on this connection");
                return frames;
            }
            frames.extend(self.teardown());
        }

        self.connected = Some(epoch);
        match self.identity.clone() {
            Some(identity) => frames.push(self.create(identity, epoch)),
            None => debug!(epoch, "identity unknown, deferring subscription"),
        }
        frames
    }

    /// The connection went away.
    pub fn on_disconnected(&mut self) -> Option<Frame> {
        self.connected = None;
        self.teardown()
    }

    /// Bind (or unbind, with `None`) the local identity.
    pub fn set_identity(&mut self, identity: Option<UserId>) -> Vec<Frame> {
        if self.identity == identity {
            return Vec::new();
        }

        let mut frames: Vec<Frame> = self.teardown().into_iter().collect();
        self.identity = identity.clone();

        if let (Some(identity), Some(epoch)) = (identity, self.connected) {
            frames.push(self.create(identity, epoch));
        }
        frames
    }

    /// Whether a MESSAGE on `epoch` for `subscription_id` belongs to the
    /// live subscription.
    pub fn accepts(&self, epoch: u64, subscription_id: Option<&str>) -> bool {
        match (&self.active, subscription_id) {
            (Some(active), Some(id)) => active.epoch == epoch && active.id == id,
            _ => false,
        }
    }

    fn create(&mut self, identity: UserId, epoch: u64) -> Frame {
        let sub = Subscription {
            id: format!("sub-{}", Uuid::new_v4()),
            destination: private_destination(&identity),
            identity,
            epoch,
        };
        info!(destination = %sub.destination, id = %sub.id, epoch, "subscribing");
        let frame = Frame::subscribe(&sub.id, &sub.destination);
        self.active = Some(sub);
        frame
    }

    fn teardown(&mut self) -> Option<Frame> {
        let sub = self.active.take()?;
        info!(destination = %sub.destination, id = %sub.id, epoch = sub.epoch, "unsubscribing");
        Some(Frame::unsubscribe(&sub.id))
    }
}
