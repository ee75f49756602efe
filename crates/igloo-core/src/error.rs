//! Error types shared by the core data model.

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating or converting core data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A client pubkey failed normalization
    #[error("invalid client pubkey: {0}")]
    InvalidPubkey(String),

    /// An event template could not be interpreted
    #[error("invalid event template: {0}")]
    InvalidEvent(String),

    /// A connect URI could not be parsed
    #[error("invalid connect URI: {0}")]
    InvalidUri(String),

    /// An RPC payload was not a recognizable request or response
    #[error("malformed rpc payload: {0}")]
    MalformedRpc(String),
}
