//! Observable broker events.
//!
//! Everything the operator surface might want to react to is announced on a
//! broadcast channel: session lifecycle changes and request queue movement.
//! Consumers that fall behind just miss events; the stores remain the
//! source of truth.

use serde::Serialize;

use igloo_core::ClientPubkey;

/// One observable state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    SessionPending { pubkey: ClientPubkey },
    SessionActive { pubkey: ClientPubkey },
    SessionRevoked { pubkey: ClientPubkey },
    RequestQueued { id: String },
    RequestCompleted { id: String },
    RequestDenied { id: String },
    RequestExpired { id: String },
}
