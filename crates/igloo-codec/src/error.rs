//! Codec error types.

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised by envelope encryption, decryption, and event handling
#[derive(Debug, Error)]
pub enum CodecError {
    /// Key material could not be interpreted
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// NIP-44 payload violated the format
    #[error("nip44: {0}")]
    Nip44(String),

    /// NIP-04 payload violated the format
    #[error("nip04: {0}")]
    Nip04(String),

    /// Payload decrypted under neither supported scheme
    #[error("payload decrypts under neither nip44 nor nip04")]
    Undecryptable,

    /// Event template could not be canonicalized
    #[error("event: {0}")]
    Event(String),

    /// Signing with the transport key failed
    #[error("transport signing failed: {0}")]
    Signing(String),
}

impl From<igloo_core::CoreError> for CodecError {
    fn from(e: igloo_core::CoreError) -> Self {
        CodecError::Event(e.to_string())
    }
}
