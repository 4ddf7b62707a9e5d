//! Real-time private messaging over STOMP/WebSocket.
//!
//! A [`ChatSession`] keeps one authenticated broker connection alive for the
//! signed-in identity, holds exactly one subscription to that identity's
//! private address, and routes every delivered message into a per-partner
//! [`ConversationStore`](conversation_store::ConversationStore) with
//! de-duplication, unread tracking and live listener fan-out. Outgoing
//! messages are published and appended locally; the broker's echo is
//! absorbed by the same de-duplication key.
//!
//! ```no_run
//! use chat_sync::{ChatSession, Identity, Partner, SessionConfig, TokenSource, WebSocketTransport};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let session = ChatSession::start(
//!     WebSocketTransport::new("wss://chat.example.com/ws"),
//!     TokenSource::Static("token".into()),
//!     SessionConfig::default(),
//! )?;
//! let chat = session.handle();
//! chat.sign_in(Identity::new("user_123", "Alice")).await;
//! chat.send(&Partner::new("user_456", "Bob"), "hi").await?;
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod connection;
pub mod conversation_store;
mod engine;
pub mod error;
pub mod history;
pub mod listeners;
pub mod message;
pub mod notifications;
pub mod router;
pub mod send;
pub mod session;
pub mod state;
pub mod stomp;
pub mod subscription;
pub mod transport;

pub use auth::{Credential, CredentialSource, TokenSource};
pub use connection::{ConnectionConfig, ConnectionState, ConnectionStatus};
pub use error::{ApiError, AuthError, FrameError, SendError, TransportError};
pub use history::HistoryStatus;
pub use listeners::{Listener, ListenerId};
pub use message::{Identity, Message, Partner, UserId};
pub use session::{ChatHandle, ChatSession, SessionConfig};
pub use transport::{MemoryTransport, Transport, WebSocketTransport};
