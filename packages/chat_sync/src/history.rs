//! Per-partner history load tracking.
//!
//! A load can finish after live messages for the same partner arrived; the
//! store's merge rule reconciles that. This module only tracks status and
//! makes a newer load for a partner cancel the one in flight.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::message::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStatus {
    /// Never requested this session.
    Idle,
    Loading,
    Loaded { added: usize },
    /// Retryable; scoped to this partner only.
    Failed { reason: String, retryable: bool },
}

/// In-flight loads, keyed by partner. Each load gets a child of the
/// session token, so sign-out cancels all of them at once.
#[derive(Debug)]
pub(crate) struct HistoryLoads {
    session: CancellationToken,
    in_flight: HashMap<UserId, (u64, CancellationToken)>,
    next_ticket: u64,
}

impl HistoryLoads {
    pub fn new(session: CancellationToken) -> Self {
        Self {
            session,
            in_flight: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Start a load for `partner`, cancelling any previous one.
    pub fn begin(&mut self, partner: &UserId) -> (u64, CancellationToken) {
        let token = self.session.child_token();
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        if let Some((_, previous)) = self
            .in_flight
            .insert(partner.clone(), (ticket, token.clone()))
        {
            previous.cancel();
        }
        (ticket, token)
    }

    /// Forget the load identified by `ticket`, unless a newer one replaced it.
    pub fn finish(&mut self, partner: &UserId, ticket: u64) {
        if self
            .in_flight
            .get(partner)
            .is_some_and(|(current, _)| *current == ticket)
        {
            self.in_flight.remove(partner);
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, token)) in self.in_flight.drain() {
            token.cancel();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
