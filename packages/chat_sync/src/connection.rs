//! ConnectionManager: the broker connection lifecycle.
//!
//! One background task per signed-in identity runs the loop
//!
//! ```text
//! Connecting (fetch credential, open pipe, CONNECT)
//!   -> Connected (CONNECTED received, frames pumped to the engine)
//!   -> Disconnected (transport failure) -> fixed delay -> Connecting ...
//! ```
//!
//! A credential refusal ends the loop without retry. `disconnect()` cancels
//! the loop wherever it is, including a pending reconnect delay.
//!
//! Transitions and inbound MESSAGE frames go out, in order, on a single
//! `mpsc` channel so exactly one consumer sees them serialized. The current
//! state is also published on a `watch` channel for the send path and views.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth::CredentialSource;
use crate::error::{AuthError, TransportError};
use crate::message::{Identity, UserId};
use crate::stomp::{Command, Frame, HeartBeat};
use crate::transport::{FramePipe, Transport};

/// Fixed delay between a transport failure and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Heartbeat interval advertised in both directions.
pub const DEFAULT_HEARTBEAT_MS: u64 = 4000;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Virtual host sent in CONNECT.
    pub host: String,
    pub reconnect_delay: Duration,
    pub heart_beat: HeartBeat,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heart_beat: HeartBeat {
                outgoing_ms: DEFAULT_HEARTBEAT_MS,
                incoming_ms: DEFAULT_HEARTBEAT_MS,
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Outbound handle to one established connection.
#[derive(Debug, Clone)]
pub struct Link {
    epoch: u64,
    outbound: mpsc::Sender<Frame>,
}

impl Link {
    /// Monotonic id of the connection this link belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queue a frame for the broker. Does not wait for any acknowledgement.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn for_test(epoch: u64, outbound: mpsc::Sender<Frame>) -> Self {
        Self { epoch, outbound }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Present exactly when `state` is `Connected`.
    pub link: Option<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Socket or broker failure; another attempt follows after `retry_in`.
    Transport { error: String, retry_in: Duration },
    /// Credential refused. No retry.
    AuthLost(String),
    /// Explicit `disconnect()`.
    SignedOut,
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Connecting { attempt: u32 },
    Connected(Link),
    /// An inbound MESSAGE frame received on connection `epoch`.
    Frame { epoch: u64, frame: Frame },
    Disconnected {
        epoch: Option<u64>,
        reason: DisconnectReason,
    },
}

enum AttemptError {
    Auth(AuthError),
    Transport(TransportError),
}

struct Shared<T, C> {
    transport: T,
    credentials: Arc<C>,
    config: ConnectionConfig,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::Sender<ConnectionEvent>,
    epochs: AtomicU64,
}

struct Running {
    identity: UserId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ConnectionManager<T, C> {
    shared: Arc<Shared<T, C>>,
    running: Mutex<Option<Running>>,
}

impl<T: Transport, C: CredentialSource> ConnectionManager<T, C> {
    /// Create a manager and the receiver for its event stream.
    pub fn new(
        transport: T,
        credentials: Arc<C>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(ConnectionStatus::default());
        let manager = Self {
            shared: Arc::new(Shared {
                transport,
                credentials,
                config,
                status,
                events,
                epochs: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
        };
        (manager, events_rx)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.borrow().state
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Start connecting as `identity`.
    ///
    /// A no-op while a loop for the same identity is alive. A loop for a
    /// different identity is torn down first.
    pub async fn connect(&self, identity: &Identity) {
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_ref() {
            if current.identity == identity.id && !current.task.is_finished() {
                debug!(identity = %identity.id, "connection loop already running");
                return;
            }
        }
        if let Some(previous) = running.take() {
            self.stop(previous).await;
        }

        let cancel = CancellationToken::new();
        let span = info_span!("connection", identity = %identity.id);
        let task = tokio::spawn(run(self.shared.clone(), cancel.clone()).instrument(span));
        *running = Some(Running {
            identity: identity.id.clone(),
            cancel,
            task,
        });
    }

    /// Tear the connection down unconditionally, cancelling any pending
    /// reconnect. Returns once the loop has stopped.
    pub async fn disconnect(&self) {
        let previous = self.running.lock().await.take();
        match previous {
            Some(previous) => self.stop(previous).await,
            None => self.shared.publish(ConnectionState::Disconnected, None),
        }
    }

    async fn stop(&self, running: Running) {
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "connection task ended abnormally");
        }

        let epoch = self.shared.status.borrow().link.as_ref().map(Link::epoch);
        self.shared.publish(ConnectionState::Disconnected, None);
        let _ = self
            .shared
            .events
            .send(ConnectionEvent::Disconnected {
                epoch,
                reason: DisconnectReason::SignedOut,
            })
            .await;
        info!(identity = %running.identity, "disconnected from chat broker");
    }
}

impl<T, C> Drop for ConnectionManager<T, C> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

impl<T: Transport, C: CredentialSource> Shared<T, C> {
    fn publish(&self, state: ConnectionState, link: Option<Link>) {
        self.status.send_replace(ConnectionStatus { state, link });
    }

    /// Send an event unless cancelled first. Returns false if the loop
    /// should stop.
    async fn emit(&self, cancel: &CancellationToken, event: ConnectionEvent) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    /// Fresh credential, fresh pipe, STOMP handshake.
    async fn establish(&self) -> Result<(Link, mpsc::Receiver<Frame>), AttemptError> {
        let credential = self.credentials.fetch().await.map_err(AttemptError::Auth)?;

        let FramePipe {
            outbound,
            mut inbound,
        } = self
            .transport
            .open()
            .await
            .map_err(AttemptError::Transport)?;

        let connect = Frame::connect(
            &self.config.host,
            credential.bearer(),
            self.config.heart_beat,
        );
        outbound
            .send(connect)
            .await
            .map_err(|_| AttemptError::Transport(TransportError::Closed))?;

        let reply = match tokio::time::timeout(self.config.connect_timeout, inbound.recv()).await {
            Err(_) => {
                return Err(AttemptError::Transport(TransportError::HandshakeTimeout(
                    self.config.connect_timeout,
                )));
            }
            Ok(None) => return Err(AttemptError::Transport(TransportError::Closed)),
            Ok(Some(frame)) => frame,
        };

        match reply.command {
            Command::Connected => {}
            Command::Error => {
                return Err(AttemptError::Auth(AuthError::Refused(reply.error_message())));
            }
            other => {
                return Err(AttemptError::Transport(TransportError::UnexpectedFrame(
                    other.as_str(),
                )));
            }
        }

        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((Link { epoch, outbound }, inbound))
    }

    /// Forward MESSAGE frames until the connection fails.
    async fn pump(&self, epoch: u64, mut inbound: mpsc::Receiver<Frame>) -> TransportError {
        while let Some(frame) = inbound.recv().await {
            match frame.command {
                Command::Message => {
                    if self
                        .events
                        .send(ConnectionEvent::Frame { epoch, frame })
                        .await
                        .is_err()
                    {
                        return TransportError::Closed;
                    }
                }
                Command::Error => return TransportError::Broker(frame.error_message()),
                other => debug!(command = %other, "ignoring frame"),
            }
        }
        TransportError::Closed
    }
}

async fn run<T: Transport, C: CredentialSource>(
    shared: Arc<Shared<T, C>>,
    cancel: CancellationToken,
) {
    let delay = shared.config.reconnect_delay;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        shared.publish(ConnectionState::Connecting, None);
        if !shared
            .emit(&cancel, ConnectionEvent::Connecting { attempt })
            .await
        {
            return;
        }

        let established = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = shared.establish() => result,
        };

        let (error, epoch) = match established {
            Ok((link, inbound)) => {
                attempt = 0;
                let epoch = link.epoch();
                info!(epoch, "connected to chat broker");
                shared.publish(ConnectionState::Connected, Some(link.clone()));
                if !shared
                    .emit(&cancel, ConnectionEvent::Connected(link.clone()))
                    .await
                {
                    let _ = link.outbound.try_send(Frame::disconnect());
                    return;
                }

                let error = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = link.outbound.try_send(Frame::disconnect());
                        return;
                    }
                    error = shared.pump(epoch, inbound) => error,
                };
                (error, Some(epoch))
            }
            Err(AttemptError::Auth(e)) => {
                warn!(error = %e, "credential refused, not retrying");
                shared.publish(ConnectionState::Disconnected, None);
                let _ = shared
                    .emit(
                        &cancel,
                        ConnectionEvent::Disconnected {
                            epoch: None,
                            reason: DisconnectReason::AuthLost(e.to_string()),
                        },
                    )
                    .await;
                return;
            }
            Err(AttemptError::Transport(e)) => (e, None),
        };

        warn!(error = %error, attempt, retry_in = ?delay, "chat connection failed");
        shared.publish(ConnectionState::Disconnected, None);
        let event = ConnectionEvent::Disconnected {
            epoch,
            reason: DisconnectReason::Transport {
                error: error.to_string(),
                retry_in: delay,
            },
        };
        if !shared.emit(&cancel, event).await {
            return;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
