//! Shared data model for the Igloo remote-signing broker.
//!
//! Everything that crosses a crate boundary lives here: client pubkeys,
//! Nostr event shapes, session and policy records, pending-request records,
//! the NIP-46 RPC envelope, and connect-URI parsing. The crates above this
//! one (codec, transport, broker, …) agree on these types and nothing else.

pub mod error;
pub mod event;
pub mod pubkey;
pub mod request;
pub mod rpc;
pub mod session;
pub mod time;
pub mod uri;

pub use error::{CoreError, Result};
pub use event::{EventTemplate, NostrEvent};
pub use pubkey::ClientPubkey;
pub use request::{PendingRequest, RequestStatus};
pub use rpc::{methods, RpcMessage, RpcRequest, RpcResponse};
pub use session::{SessionPolicy, SessionProfile, SessionRecord, SessionStatus};
pub use uri::ConnectUri;

/// NIP-46 events travel as this Nostr kind.
pub const NIP46_EVENT_KIND: u16 = 24133;
