//! Frame transports.
//!
//! A [`Transport`] opens one bidirectional pipe of STOMP frames. Handshake,
//! subscription and reconnection live above it in
//! [`ConnectionManager`](crate::connection::ConnectionManager); the transport
//! only moves frames and keeps the socket alive.

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::stomp::Frame;

pub mod memory;
pub mod websocket;

pub use memory::{BrokerConn, MemoryTransport};
pub use websocket::WebSocketTransport;

/// Channel capacity on each side of a pipe.
pub(crate) const PIPE_CAPACITY: usize = 256;

/// An open frame pipe. Dropping `outbound` closes the connection; `inbound`
/// yields `None` once the peer is gone.
pub struct FramePipe {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

pub trait Transport: Send + Sync + 'static {
    fn open(&self) -> impl Future<Output = Result<FramePipe, TransportError>> + Send;
}
