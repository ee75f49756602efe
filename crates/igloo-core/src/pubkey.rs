//! Client pubkey normalization.
//!
//! Every session in the broker is keyed by the client's Nostr pubkey in its
//! canonical form: 64 lowercase hex characters (a 32-byte x-only point).
//! Input arrives from relays, connect URIs, HTTP paths, and the identity
//! signer, so construction funnels through [`ClientPubkey::parse`] and
//! nothing else.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreError, Result};

/// A normalized client pubkey: 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientPubkey(String);

impl ClientPubkey {
    /// Normalize and validate a pubkey from any input surface: trim,
    /// lowercase, then insist on exactly 64 hex chars. Compressed-point
    /// forms are a codec concern and are not accepted here.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().to_ascii_lowercase();

        if trimmed.len() != 64 || !trimmed.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(CoreError::InvalidPubkey(format!(
                "expected 64 lowercase hex chars, got {:?}",
                input
            )));
        }

        Ok(Self(trimmed))
    }

    /// The canonical hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 32 bytes of the x-only point.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Validated at construction; decode cannot fail.
        if let Ok(decoded) = hex::decode(&self.0) {
            out.copy_from_slice(&decoded);
        }
        out
    }
}

impl fmt::Display for ClientPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ClientPubkey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ClientPubkey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let canonical = "a".repeat(64);
        let upper = canonical.to_ascii_uppercase();
        let padded = format!("  {}\n", canonical);

        let a = ClientPubkey::parse(&canonical).unwrap();
        let b = ClientPubkey::parse(&upper).unwrap();
        let c = ClientPubkey::parse(&padded).unwrap();

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.as_str(), canonical);
    }

    #[test]
    fn rejects_non_hex_and_bad_lengths() {
        assert!(ClientPubkey::parse("").is_err());
        assert!(ClientPubkey::parse("zz").is_err());
        assert!(ClientPubkey::parse(&"a".repeat(63)).is_err());
        assert!(ClientPubkey::parse(&"a".repeat(65)).is_err());
        assert!(ClientPubkey::parse(&format!("02{}", "b".repeat(64))).is_err());
        assert!(ClientPubkey::parse(&format!("0x{}", "a".repeat(62))).is_err());
    }

    #[test]
    fn round_trips_bytes() {
        let key = ClientPubkey::parse(&"0f".repeat(32)).unwrap();
        assert_eq!(key.to_bytes(), [0x0f; 32]);
    }
}
