//! In-process transport: every `open()` hands the broker side of a fresh
//! pipe to whoever holds the accept receiver. Used to drive the engine
//! without a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use super::{FramePipe, PIPE_CAPACITY, Transport};
use crate::error::TransportError;
use crate::stomp::Frame;

/// Broker end of one in-memory connection.
pub struct BrokerConn {
    /// Frames the client sent.
    pub from_client: mpsc::Receiver<Frame>,
    /// Frames to deliver to the client. Dropping it closes the connection.
    pub to_client: mpsc::Sender<Frame>,
}

#[derive(Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<BrokerConn>,
    refuse_next: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BrokerConn>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refuse_next: Arc::new(AtomicUsize::new(0)),
                opened: Arc::new(AtomicUsize::new(0)),
            },
            accept_rx,
        )
    }

    /// Make the next `n` opens fail as if the broker were unreachable.
    pub fn refuse_next(&self, n: usize) {
        self.refuse_next.store(n, Ordering::SeqCst);
    }

    /// Number of `open()` calls so far, refused ones included.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    async fn open(&self) -> Result<FramePipe, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Unavailable("refused by test broker".into()));
        }

        let (client_tx, broker_rx) = mpsc::channel(PIPE_CAPACITY);
        let (broker_tx, client_rx) = mpsc::channel(PIPE_CAPACITY);
        self.accept_tx
            .send(BrokerConn {
                from_client: broker_rx,
                to_client: broker_tx,
            })
            .map_err(|_| TransportError::Unavailable("test broker is gone".into()))?;

        Ok(FramePipe {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}
