//! Nostr event shapes.
//!
//! [`NostrEvent`] is the signed wire form relays deliver and accept.
//! [`EventTemplate`] is what a client hands to `sign_event`: a partial event
//! whose id, pubkey, and signature the signer fills in. Templates arrive from
//! untrusted clients, so field handling is deliberately forgiving; strictness
//! lives in the id derivation (see `igloo-codec`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// A full signed Nostr event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl NostrEvent {
    /// First `p` tag value, if any. NIP-46 events address their recipient
    /// this way.
    pub fn p_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some("p"))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// An unsigned event template submitted through `sign_event`.
///
/// Clients in the wild send sloppy templates: millisecond timestamps,
/// missing tags, stray extra fields. Parsing tolerates all of that and only
/// insists on a usable `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTemplate {
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
}

impl EventTemplate {
    /// Parse a template out of the first `sign_event` param.
    ///
    /// The param is a JSON *string* containing the template object. A bare
    /// object is also accepted since some clients skip the inner encoding.
    pub fn from_param(param: &Value) -> Result<Self> {
        let obj = match param {
            Value::String(s) => serde_json::from_str::<Value>(s)
                .map_err(|e| CoreError::InvalidEvent(format!("template is not JSON: {}", e)))?,
            other => other.clone(),
        };

        let kind = obj
            .get("kind")
            .and_then(Value::as_u64)
            .ok_or_else(|| CoreError::InvalidEvent("missing or negative kind".into()))?;
        if kind > u64::from(u16::MAX) {
            return Err(CoreError::InvalidEvent(format!("kind {} out of range", kind)));
        }

        serde_json::from_value(obj)
            .map_err(|e| CoreError::InvalidEvent(format!("unusable template: {}", e)))
    }

    /// The event kind as the string key used in policy maps.
    pub fn kind_key(&self) -> String {
        self.kind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_encoded_template() {
        let param = json!("{\"kind\":1,\"content\":\"hi\",\"tags\":[]}");
        let tpl = EventTemplate::from_param(&param).unwrap();
        assert_eq!(tpl.kind, 1);
        assert_eq!(tpl.content, "hi");
    }

    #[test]
    fn parses_bare_object_template() {
        let param = json!({"kind": 4, "content": "dm", "created_at": 1700000000});
        let tpl = EventTemplate::from_param(&param).unwrap();
        assert_eq!(tpl.kind, 4);
        assert_eq!(tpl.created_at, Some(1700000000));
    }

    #[test]
    fn rejects_missing_or_negative_kind() {
        assert!(EventTemplate::from_param(&json!({"content": "x"})).is_err());
        assert!(EventTemplate::from_param(&json!({"kind": -1})).is_err());
        assert!(EventTemplate::from_param(&json!("not json at all")).is_err());
    }

    #[test]
    fn finds_p_tag() {
        let event = NostrEvent {
            id: String::new(),
            pubkey: String::new(),
            created_at: 0,
            kind: 24133,
            tags: vec![
                vec!["client".into(), "app".into()],
                vec!["p".into(), "ab".repeat(32)],
            ],
            content: String::new(),
            sig: String::new(),
        };
        assert_eq!(event.p_tag(), Some("ab".repeat(32).as_str()));
    }
}
