//! Envelope codec for the Igloo broker.
//!
//! Handles everything cryptographic about the NIP-46 transport envelope:
//! conversation-key ECDH, NIP-44 v2 payload encryption (the primary scheme),
//! the NIP-04 AES-CBC fallback accepted on inbound traffic, canonical NIP-01
//! event-id derivation, and signing of the broker's own kind-24133 events
//! with the transport key.
//!
//! The transport key here is *addressing* identity only. The user's signing
//! identity lives behind the identity adapter and never touches this crate.

pub mod envelope;
pub mod error;
pub mod event_id;
pub mod keys;
pub mod nip04;
pub mod nip44;

pub use envelope::EnvelopeCodec;
pub use error::{CodecError, Result};
pub use event_id::{canonical_event_id, finalize_template};
pub use keys::TransportKeypair;
pub use nip44::ConversationKey;
