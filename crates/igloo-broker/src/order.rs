//! Per-client response ordering.
//!
//! Identity calls run on a bounded worker pool, so two requests from one
//! client can finish out of order. On the wire that must not show: each
//! dispatched request takes a ticket in dispatch order, and a ticket holder
//! may only emit once its predecessor's ticket has been dropped. Tickets
//! for different clients never wait on each other.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use igloo_core::ClientPubkey;

/// Hands out per-client emission tickets.
#[derive(Default)]
pub struct EmitOrder {
    chains: Mutex<HashMap<ClientPubkey, watch::Receiver<()>>>,
}

impl EmitOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next ticket for a client. Synchronous, so calling in
    /// dispatch order fixes the emission order.
    pub fn register(&self, key: ClientPubkey) -> Ticket {
        let (tx, rx) = watch::channel(());
        let predecessor = self.chains.lock().insert(key.clone(), rx);
        Ticket {
            key,
            predecessor,
            done: Some(tx),
        }
    }

    /// Drop the chain tail for `key` if no request is in flight.
    fn prune(&self, key: &ClientPubkey) {
        let mut chains = self.chains.lock();
        if let Some(tail) = chains.get(key) {
            if tail.has_changed().is_err() {
                chains.remove(key);
            }
        }
    }
}

/// One slot in a client's emission chain.
pub struct Ticket {
    key: ClientPubkey,
    predecessor: Option<watch::Receiver<()>>,
    done: Option<watch::Sender<()>>,
}

impl Ticket {
    /// Wait until every earlier ticket for this client has been dropped.
    pub async fn wait_turn(&mut self) {
        if let Some(prev) = &mut self.predecessor {
            // The predecessor never sends; its sender dropping is the signal.
            while prev.changed().await.is_ok() {}
        }
    }

    /// Release the ticket and wake the successor. Also called on drop, so a
    /// panicking worker cannot wedge its client's chain.
    pub fn complete(mut self, order: &EmitOrder) {
        self.done.take();
        order.prune(&self.key);
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.done.take();
    }
}
