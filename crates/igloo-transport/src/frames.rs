//! Relay-protocol frames.
//!
//! Outbound: `REQ` subscriptions and `EVENT` publishes. Inbound: whatever
//! the relay feels like sending. Inbound parsing is deliberately manual —
//! a field the strict event schema would reject (missing sig, stray extras,
//! numeric weirdness) must not take down the connection, so events are
//! rebuilt from a plain JSON value with defaults and only a missing
//! pubkey/content disqualifies one.

use serde_json::{json, Value};
use tracing::{debug, warn};

use igloo_core::{NostrEvent, NIP46_EVENT_KIND};

/// Subscription id used on every relay connection.
pub const SUBSCRIPTION_ID: &str = "igloo-nip46";

/// The `REQ` frame subscribing to envelopes addressed to us.
pub fn subscribe_frame(transport_pubkey: &str) -> String {
    json!([
        "REQ",
        SUBSCRIPTION_ID,
        {
            "kinds": [NIP46_EVENT_KIND],
            "#p": [transport_pubkey],
        }
    ])
    .to_string()
}

/// The `EVENT` frame publishing one signed event.
pub fn publish_frame(event: &NostrEvent) -> Option<String> {
    match serde_json::to_value(event) {
        Ok(value) => Some(json!(["EVENT", value]).to_string()),
        Err(e) => {
            warn!(error = %e, "outbound event failed to serialize");
            None
        }
    }
}

/// What an inbound frame meant for us.
#[derive(Debug, PartialEq)]
pub enum InboundFrame {
    /// A kind-24133 event addressed to the transport key.
    Envelope(NostrEvent),
    /// Anything the connection should note but not act on.
    Ignored,
}

/// Parse one inbound text frame.
///
/// Never returns an error: frames that do not parse are logged and ignored.
/// Only the socket layer decides whether the connection is healthy.
pub fn parse_inbound(relay: &str, raw: &str) -> InboundFrame {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(relay, error = %e, "bounced: frame is not JSON");
            return InboundFrame::Ignored;
        }
    };

    let Some(items) = value.as_array() else {
        warn!(relay, "bounced: frame is not an array");
        return InboundFrame::Ignored;
    };

    match items.first().and_then(Value::as_str) {
        Some("EVENT") => match items.get(2).and_then(event_from_value) {
            Some(event) if event.kind == NIP46_EVENT_KIND => InboundFrame::Envelope(event),
            Some(event) => {
                debug!(relay, kind = event.kind, "ignoring event of foreign kind");
                InboundFrame::Ignored
            }
            None => {
                warn!(relay, "bounced: EVENT frame with unusable event");
                InboundFrame::Ignored
            }
        },
        Some("OK") => {
            let accepted = items.get(2).and_then(Value::as_bool).unwrap_or(false);
            if !accepted {
                let reason = items.get(3).and_then(Value::as_str).unwrap_or("");
                warn!(relay, reason, "relay rejected a publish");
            }
            InboundFrame::Ignored
        }
        Some("NOTICE") => {
            let notice = items.get(1).and_then(Value::as_str).unwrap_or("");
            debug!(relay, notice, "relay notice");
            InboundFrame::Ignored
        }
        Some("EOSE") | Some("CLOSED") => InboundFrame::Ignored,
        other => {
            debug!(relay, frame = ?other, "ignoring unknown frame type");
            InboundFrame::Ignored
        }
    }
}

/// The bounced-path event rebuild: pick fields by hand, fill what is
/// missing, reject only when there is no sender or content to work with.
fn event_from_value(value: &Value) -> Option<NostrEvent> {
    let obj = value.as_object()?;

    let pubkey = obj.get("pubkey")?.as_str()?.to_string();
    let content = obj.get("content")?.as_str()?.to_string();

    let tags = obj
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_array)
                .map(|tag| {
                    tag.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .unwrap_or_default();

    Some(NostrEvent {
        id: obj
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        pubkey,
        created_at: obj.get("created_at").and_then(Value::as_u64).unwrap_or(0),
        kind: obj
            .get("kind")
            .and_then(Value::as_u64)
            .and_then(|k| u16::try_from(k).ok())
            .unwrap_or(0),
        tags,
        content,
        sig: obj
            .get("sig")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_json(kind: u16) -> String {
        json!([
            "EVENT",
            SUBSCRIPTION_ID,
            {
                "id": "e".repeat(64),
                "pubkey": "a".repeat(64),
                "created_at": 1_700_000_000,
                "kind": kind,
                "tags": [["p", "b".repeat(64)]],
                "content": "ciphertext",
                "sig": "c".repeat(128),
            }
        ])
        .to_string()
    }

    #[test]
    fn parses_a_well_formed_envelope() {
        match parse_inbound("wss://r", &envelope_json(24133)) {
            InboundFrame::Envelope(event) => {
                assert_eq!(event.kind, 24133);
                assert_eq!(event.content, "ciphertext");
            }
            other => panic!("expected envelope, got {:?}", other),
        }
    }

    #[test]
    fn foreign_kinds_are_ignored() {
        assert_eq!(parse_inbound("wss://r", &envelope_json(1)), InboundFrame::Ignored);
    }

    #[test]
    fn schema_surprises_are_bounced_not_fatal() {
        // Missing sig and id, extra fields, string created_at: still usable.
        let sloppy = json!([
            "EVENT",
            "sub",
            {
                "pubkey": "a".repeat(64),
                "content": "payload",
                "kind": 24133,
                "extra_field": {"deep": true},
            }
        ])
        .to_string();

        match parse_inbound("wss://r", &sloppy) {
            InboundFrame::Envelope(event) => {
                assert_eq!(event.content, "payload");
                assert!(event.sig.is_empty());
            }
            other => panic!("expected envelope, got {:?}", other),
        }

        // Garbage shapes are ignored without error.
        assert_eq!(parse_inbound("wss://r", "not json"), InboundFrame::Ignored);
        assert_eq!(parse_inbound("wss://r", "{\"a\":1}"), InboundFrame::Ignored);
        assert_eq!(
            parse_inbound("wss://r", r#"["EVENT","sub",{"kind":24133}]"#),
            InboundFrame::Ignored
        );
    }

    #[test]
    fn relay_bookkeeping_frames_are_ignored() {
        for frame in [
            r#"["OK","id",true,""]"#,
            r#"["OK","id",false,"blocked"]"#,
            r#"["EOSE","sub"]"#,
            r#"["NOTICE","slow down"]"#,
            r#"["CLOSED","sub","reason"]"#,
            r#"["AUTH","challenge"]"#,
        ] {
            assert_eq!(parse_inbound("wss://r", frame), InboundFrame::Ignored);
        }
    }

    #[test]
    fn subscribe_frame_filters_on_kind_and_recipient() {
        let frame = subscribe_frame(&"a".repeat(64));
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value[0], "REQ");
        assert_eq!(value[2]["kinds"][0], 24133);
        assert_eq!(value[2]["#p"][0], "a".repeat(64));
    }
}
