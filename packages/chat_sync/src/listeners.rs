//! Explicit registration table for live view listeners.
//!
//! A view registers, gets a [`Listener`] with its own channel, and
//! unregisters by id when it goes away. Listeners whose receiver was dropped
//! without unregistering are pruned on the next delivery.

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Receiving end handed to a view.
#[derive(Debug)]
pub struct Listener {
    pub id: ListenerId,
    pub messages: mpsc::UnboundedReceiver<Message>,
}

#[derive(Debug, Default)]
pub struct ListenerTable {
    next_id: u64,
    entries: BTreeMap<ListenerId, mpsc::UnboundedSender<Message>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self) -> Listener {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.insert(id, tx);
        debug!(%id, "listener registered");
        Listener { id, messages: rx }
    }

    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            debug!(%id, "listener unregistered");
        }
        removed
    }

    /// Deliver to every live listener. Returns how many received it.
    pub fn notify(&mut self, message: &Message) -> usize {
        let mut delivered = 0;
        self.entries.retain(|id, tx| match tx.send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!(%id, "pruning closed listener");
                false
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
