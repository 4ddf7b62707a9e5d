//! The single consumer of connection events.
//!
//! Owns the [`SubscriptionRegistry`] and the current [`Link`], so every
//! subscribe/unsubscribe decision and every inbound MESSAGE is handled in
//! the order the connection produced them. Routed messages mutate the shared
//! [`SyncState`] under its lock.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{ConnectionEvent, DisconnectReason, Link};
use crate::message::UserId;
use crate::router::MessageRouter;
use crate::state::SyncState;
use crate::stomp::Frame;
use crate::subscription::SubscriptionRegistry;

pub(crate) enum EngineCommand {
    /// Bind or clear the local identity. Clearing also resets the state.
    /// Acknowledged once applied.
    SetIdentity {
        identity: Option<UserId>,
        respond_to: oneshot::Sender<()>,
    },
}

pub(crate) struct SyncEngine {
    state: Arc<Mutex<SyncState>>,
    registry: SubscriptionRegistry,
    router: Option<MessageRouter>,
    link: Option<Link>,
}

impl SyncEngine {
    pub fn new(state: Arc<Mutex<SyncState>>) -> Self {
        Self {
            state,
            registry: SubscriptionRegistry::new(),
            router: None,
            link: None,
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut commands: mpsc::Receiver<EngineCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => self.on_command(command).await,
                Some(event) = events.recv() => self.on_event(event).await,
                else => break,
            }
        }
        debug!("sync engine stopped");
    }

    async fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetIdentity {
                identity,
                respond_to,
            } => {
                let frames = self.registry.set_identity(identity.clone());
                self.send_all(frames).await;
                self.router = identity.map(MessageRouter::new);
                if self.router.is_none() {
                    self.state.lock().await.reset();
                    info!("session state cleared");
                }
                let _ = respond_to.send(());
            }
        }
    }

    async fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connecting { attempt } => debug!(attempt, "connecting"),
            ConnectionEvent::Connected(link) => {
                let frames = self.registry.on_connected(link.epoch());
                self.link = Some(link);
                self.send_all(frames).await;
            }
            ConnectionEvent::Frame { epoch, frame } => {
                if !self.registry.accepts(epoch, frame.get("subscription")) {
                    debug!(
                        epoch,
                        subscription = frame.get("subscription").unwrap_or("?"),
                        "dropping frame for inactive subscription"
                    );
                    return;
                }
                let Some(router) = &self.router else {
                    return;
                };
                let mut state = self.state.lock().await;
                router.on_frame(&mut state, &frame);
            }
            ConnectionEvent::Disconnected { epoch, reason } => {
                let current = self.link.as_ref().map(Link::epoch);
                if epoch.is_some() && current.is_some() && epoch != current {
                    debug!(?epoch, ?current, "ignoring disconnect of an older connection");
                    return;
                }
                if let Some(frame) = self.registry.on_disconnected() {
                    // Only reaches the broker on an orderly sign-out.
                    if matches!(reason, DisconnectReason::SignedOut) {
                        self.send_all(vec![frame]).await;
                    }
                }
                self.link = None;
                debug!(?reason, "connection down");
            }
        }
    }

    async fn send_all(&self, frames: Vec<Frame>) {
        let Some(link) = &self.link else {
            return;
        };
        for frame in frames {
            if let Err(e) = link.send(frame).await {
                debug!(error = %e, epoch = link.epoch(), "link closed, frame not sent");
                break;
            }
        }
    }
}
