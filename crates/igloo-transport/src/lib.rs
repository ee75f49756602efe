//! The relay transport.
//!
//! One websocket task per relay URL. Each task connects, subscribes to
//! kind-24133 events addressed to the transport pubkey, forwards inbound
//! envelopes to the broker, and writes outbound frames under a deadline.
//! Socket failures reconnect with full-jitter exponential backoff; malformed
//! frames never do — they take the bounced path: a manual, tolerant re-parse
//! that logs and moves on.

pub mod backoff;
pub mod frames;
pub mod pool;

pub use backoff::{backoff_delay, jittered};
pub use pool::{IncomingEvent, RelayPool, RelayStatus, TransportConfig};

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by the relay pool
#[derive(Debug, Error)]
pub enum TransportError {
    /// A relay URL was not usable
    #[error("invalid relay url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// The pool is at its relay cap
    #[error("relay cap reached ({0})")]
    RelayCapReached(usize),
}

/// Normalize a relay URL: `ws`/`wss` scheme only, no trailing slash.
pub fn normalize_relay_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).map_err(|e| TransportError::InvalidUrl {
        url: trimmed.to_string(),
        message: e.to_string(),
    })?;

    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidUrl {
                url: trimmed.to_string(),
                message: format!("unsupported scheme {:?}", other),
            })
        }
    }

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_validates_urls() {
        assert_eq!(
            normalize_relay_url(" wss://Relay.Example/ ").unwrap(),
            "wss://relay.example"
        );
        assert_eq!(
            normalize_relay_url("ws://127.0.0.1:7000").unwrap(),
            "ws://127.0.0.1:7000"
        );
        assert!(normalize_relay_url("https://relay.example").is_err());
        assert!(normalize_relay_url("not a url").is_err());
    }
}
