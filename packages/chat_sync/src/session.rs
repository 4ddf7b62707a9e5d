//! The session facade: one explicitly constructed [`ChatSession`] owns the
//! connection, the sync engine and the shared state. Views talk to it
//! through cloneable [`ChatHandle`]s.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::auth::CredentialSource;
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus};
use crate::engine::{EngineCommand, SyncEngine};
use crate::error::{ApiError, AuthError, SendError};
use crate::history::{HistoryLoads, HistoryStatus};
use crate::listeners::{Listener, ListenerId};
use crate::message::{Identity, Message, Partner, UserId};
use crate::send;
use crate::state::SyncState;
use crate::transport::Transport;

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection: ConnectionConfig,
    /// Base URL of the REST collaborators, without trailing slash.
    pub api_base_url: String,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            api_base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

struct Inner<T, C> {
    connection: ConnectionManager<T, C>,
    api: ChatApi<C>,
    state: Arc<Mutex<SyncState>>,
    identity: RwLock<Option<Identity>>,
    engine: mpsc::Sender<EngineCommand>,
    history: Mutex<HistoryLoads>,
    /// Serializes sign-in and sign-out.
    lifecycle: Mutex<()>,
    cancel: CancellationToken,
}

impl<T, C> Drop for Inner<T, C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owner of a running session.
pub struct ChatSession<T, C> {
    handle: ChatHandle<T, C>,
    engine: JoinHandle<()>,
}

impl<T: Transport, C: CredentialSource> ChatSession<T, C> {
    /// Build the session and spawn its engine. Nothing connects until
    /// [`ChatHandle::sign_in`].
    pub fn start(transport: T, credentials: C, config: SessionConfig) -> Result<Self, ApiError> {
        let credentials = Arc::new(credentials);
        let (connection, events) =
            ConnectionManager::new(transport, credentials.clone(), config.connection);
        let api = ChatApi::new(config.api_base_url, credentials, config.request_timeout)?;

        let state = Arc::new(Mutex::new(SyncState::new()));
        let cancel = CancellationToken::new();
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let engine = tokio::spawn(SyncEngine::new(state.clone()).run(
            events,
            commands_rx,
            cancel.clone(),
        ));

        let inner = Inner {
            connection,
            api,
            state,
            identity: RwLock::new(None),
            engine: commands,
            history: Mutex::new(HistoryLoads::new(cancel.child_token())),
            lifecycle: Mutex::new(()),
            cancel,
        };
        Ok(Self {
            handle: ChatHandle {
                inner: Arc::new(inner),
            },
            engine,
        })
    }

    pub fn handle(&self) -> ChatHandle<T, C> {
        self.handle.clone()
    }

    /// Sign out and stop the engine.
    pub async fn shutdown(self) {
        self.handle.sign_out().await;
        self.handle.inner.cancel.cancel();
        if let Err(e) = self.engine.await {
            warn!(error = %e, "sync engine ended abnormally");
        }
    }
}

pub struct ChatHandle<T, C> {
    inner: Arc<Inner<T, C>>,
}

impl<T, C> Clone for ChatHandle<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport, C: CredentialSource> ChatHandle<T, C> {
    /// Bind `identity` and start connecting.
    ///
    /// Signing in again as the same identity restarts a connection loop
    /// that ended on a credential refusal; a different identity signs the
    /// current one out first.
    pub async fn sign_in(&self, identity: Identity) {
        let _guard = self.inner.lifecycle.lock().await;

        let current = self.inner.identity.read().await.clone();
        match current {
            Some(current) if current.id == identity.id => {
                self.inner.connection.connect(&identity).await;
                return;
            }
            Some(current) => {
                info!(from = %current.id, to = %identity.id, "switching identity");
                self.teardown().await;
            }
            None => {}
        }

        info!(identity = %identity.id, "signing in");
        *self.inner.identity.write().await = Some(identity.clone());
        self.set_engine_identity(Some(identity.id.clone())).await;
        self.inner.connection.connect(&identity).await;
    }

    /// Unsubscribe, cancel reconnects and history loads, disconnect and
    /// clear every conversation and unread mark.
    pub async fn sign_out(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        let previous = self.inner.identity.write().await.take();
        self.inner.history.lock().await.cancel_all();
        self.set_engine_identity(None).await;
        self.inner.connection.disconnect().await;
        if let Some(previous) = previous {
            info!(identity = %previous.id, "signed out");
        }
    }

    async fn set_engine_identity(&self, identity: Option<UserId>) {
        let (tx, rx) = oneshot::channel();
        let command = EngineCommand::SetIdentity {
            identity,
            respond_to: tx,
        };
        if self.inner.engine.send(command).await.is_err() {
            warn!("sync engine is not running");
            return;
        }
        let _ = rx.await;
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.inner.identity.read().await.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Watch connection state changes, e.g. to drive a connecting indicator.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.connection.watch()
    }

    /// The conversation now on screen, or `None`. Opening a conversation
    /// clears its unread mark.
    pub async fn select_partner(&self, partner: Option<UserId>) {
        self.inner.state.lock().await.notifications.set_active(partner);
    }

    pub async fn active_partner(&self) -> Option<UserId> {
        self.inner.state.lock().await.notifications.active().cloned()
    }

    /// Publish `content` to `partner` and append it locally.
    pub async fn send(&self, partner: &Partner, content: &str) -> Result<Message, SendError> {
        let generation = self.inner.state.lock().await.generation();
        let identity = self.inner.identity.read().await.clone();
        let prepared = send::prepare(
            identity.as_ref(),
            self.inner.connection.status(),
            partner,
            content,
            Utc::now(),
        )?;
        prepared.publish(&self.inner.state, generation).await
    }

    /// Fetch the persisted conversation with `partner` and merge it into the
    /// store. Returns how many messages were new.
    pub async fn load_history(&self, partner: &UserId) -> Result<usize, ApiError> {
        if self.inner.identity.read().await.is_none() {
            return Err(ApiError::Auth(AuthError::NotSignedIn));
        }

        let (ticket, token) = self.inner.history.lock().await.begin(partner);
        self.inner
            .state
            .lock()
            .await
            .history
            .insert(partner.clone(), HistoryStatus::Loading);
        debug!(%partner, "loading history");

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ApiError::Cancelled),
            result = self.inner.api.history(partner) => result,
        };

        let outcome = {
            let mut state = self.inner.state.lock().await;
            if token.is_cancelled() {
                // Superseded or signed out; the newer owner sets the status.
                Err(ApiError::Cancelled)
            } else {
                match fetched {
                    Ok(history) => {
                        let added = state.conversations.seed_history(partner, history);
                        state
                            .history
                            .insert(partner.clone(), HistoryStatus::Loaded { added });
                        info!(%partner, added, "history loaded");
                        Ok(added)
                    }
                    Err(e) => {
                        warn!(%partner, error = %e, "history load failed");
                        state.history.insert(
                            partner.clone(),
                            HistoryStatus::Failed {
                                reason: e.to_string(),
                                retryable: e.is_retryable(),
                            },
                        );
                        Err(e)
                    }
                }
            }
        };

        self.inner.history.lock().await.finish(partner, ticket);
        outcome
    }

    pub async fn history_status(&self, partner: &UserId) -> HistoryStatus {
        self.inner
            .state
            .lock()
            .await
            .history
            .get(partner)
            .cloned()
            .unwrap_or(HistoryStatus::Idle)
    }

    /// Snapshot of the conversation with `partner`, oldest first.
    pub async fn conversation(&self, partner: &UserId) -> Vec<Message> {
        self.inner.state.lock().await.conversations.get(partner)
    }

    /// Partners with unseen messages, sorted.
    pub async fn unread(&self) -> Vec<UserId> {
        self.inner.state.lock().await.notifications.unread()
    }

    pub async fn unread_count(&self) -> usize {
        self.inner.state.lock().await.notifications.count()
    }

    pub async fn register_listener(&self) -> Listener {
        self.inner.state.lock().await.listeners.register()
    }

    pub async fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.state.lock().await.listeners.unregister(id)
    }

    /// Users the signed-in identity has talked to.
    pub async fn partners(&self) -> Result<Vec<Partner>, ApiError> {
        let local = self.local_id().await?;
        self.inner.api.chat_partners(&local).await
    }

    /// Every user available for chat.
    pub async fn all_users(&self) -> Result<Vec<Partner>, ApiError> {
        let local = self.local_id().await?;
        self.inner.api.all_users(&local).await
    }

    async fn local_id(&self) -> Result<UserId, ApiError> {
        self.inner
            .identity
            .read()
            .await
            .as_ref()
            .map(|identity| identity.id.clone())
            .ok_or(ApiError::Auth(AuthError::NotSignedIn))
    }
}
