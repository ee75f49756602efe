//! Canonical NIP-01 event-id derivation.
//!
//! The id is `SHA-256` over the fixed 6-element JSON array
//! `[0, pubkey, created_at, kind, tags, content]` serialized with no extra
//! whitespace. Client templates are messy, so inputs are normalized first:
//! millisecond timestamps become seconds, pubkeys are lowercased, and a
//! 33-byte compressed point from the identity signer loses its parity byte.

use serde_json::json;
use sha2::{Digest, Sha256};

use igloo_core::time::{normalize_timestamp, unix_now};
use igloo_core::{EventTemplate, NostrEvent};

use crate::error::{CodecError, Result};

/// Normalize a pubkey for canonical serialization: lowercase hex, parity
/// byte stripped if a compressed 33-byte form was provided.
pub fn normalize_pubkey(pubkey: &str) -> Result<String> {
    let lower = pubkey.trim().to_ascii_lowercase();
    let stripped = if lower.len() == 66 && (lower.starts_with("02") || lower.starts_with("03")) {
        lower[2..].to_string()
    } else {
        lower
    };
    if stripped.len() != 64 || !stripped.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(CodecError::Event(format!("invalid pubkey {:?}", pubkey)));
    }
    Ok(stripped)
}

/// Compute the 32-byte event id over already-normalized fields.
pub fn canonical_event_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32]> {
    let pubkey = normalize_pubkey(pubkey)?;
    let created_at = normalize_timestamp(created_at);

    let canonical = json!([0, pubkey, created_at, kind, tags, content]);
    let serialized = serde_json::to_string(&canonical)
        .map_err(|e| CodecError::Event(format!("serialization: {}", e)))?;

    let digest = Sha256::digest(serialized.as_bytes());
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest);
    Ok(id)
}

/// Fill in a template's derived fields and compute its id.
///
/// The signer's pubkey always wins over whatever the template claims; a
/// missing `created_at` defaults to now. The returned event carries an empty
/// signature for the caller to fill.
pub fn finalize_template(template: &EventTemplate, signer_pubkey: &str) -> Result<NostrEvent> {
    let pubkey = normalize_pubkey(signer_pubkey)?;
    let created_at = normalize_timestamp(template.created_at.unwrap_or_else(unix_now));

    let id = canonical_event_id(&pubkey, created_at, template.kind, &template.tags, &template.content)?;

    Ok(NostrEvent {
        id: hex::encode(id),
        pubkey,
        created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_and_whitespace_free() {
        let id = canonical_event_id(&"ab".repeat(32), 1_700_000_000, 1, &[], "hi").unwrap();
        let again = canonical_event_id(&"ab".repeat(32), 1_700_000_000, 1, &[], "hi").unwrap();
        assert_eq!(id, again);
    }

    #[test]
    fn millisecond_timestamps_and_case_normalize_to_same_id() {
        let lower = canonical_event_id(&"ab".repeat(32), 1_700_000_000, 1, &[], "x").unwrap();
        let upper = canonical_event_id(&"AB".repeat(32), 1_700_000_000_999, 1, &[], "x").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn compressed_pubkey_is_stripped() {
        let plain = canonical_event_id(&"cd".repeat(32), 1, 1, &[], "x").unwrap();
        let compressed = canonical_event_id(&format!("02{}", "cd".repeat(32)), 1, 1, &[], "x").unwrap();
        assert_eq!(plain, compressed);
    }

    #[test]
    fn content_escaping_flows_through_json() {
        // Quotes and newlines must be escaped exactly as JSON does it.
        let id = canonical_event_id(&"ab".repeat(32), 1, 1, &[], "line1\n\"quoted\"").unwrap();
        assert_ne!(id, [0u8; 32]);
    }

    #[test]
    fn template_finalization_fills_derived_fields() {
        let template = EventTemplate {
            pubkey: Some("ignored".into()),
            created_at: Some(1_700_000_000_500),
            kind: 1,
            tags: vec![vec!["t".into(), "topic".into()]],
            content: "hello".into(),
        };
        let event = finalize_template(&template, &"ef".repeat(32)).unwrap();
        assert_eq!(event.pubkey, "ef".repeat(32));
        assert_eq!(event.created_at, 1_700_000_000);
        assert_eq!(event.id.len(), 64);
        assert!(event.sig.is_empty());
    }
}
