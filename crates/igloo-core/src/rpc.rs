//! The NIP-46 RPC envelope.
//!
//! Decrypted NIP-46 payloads are JSON-RPC-shaped objects. Real clients vary
//! enough that strict schema validation bounces legitimate traffic, so
//! [`RpcMessage::parse`] accepts anything with a string `id` and either a
//! `method` (request) or a `result`/`error` (response), and nothing more.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Method names the broker recognizes.
///
/// These are dispatch labels, not a policy whitelist; policy is a per-session
/// map consulted at evaluation time.
pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const GET_PUBLIC_KEY: &str = "get_public_key";
    pub const SIGN_EVENT: &str = "sign_event";
    pub const NIP44_ENCRYPT: &str = "nip44_encrypt";
    pub const NIP44_DECRYPT: &str = "nip44_decrypt";
    pub const NIP04_ENCRYPT: &str = "nip04_encrypt";
    pub const NIP04_DECRYPT: &str = "nip04_decrypt";
    pub const PING: &str = "ping";
}

/// An inbound request: `{id, method, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// An outbound (or inbound) response: `{id, result?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn result(id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Either side of the RPC conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
}

impl RpcMessage {
    /// Schema-tolerant parse of a decrypted payload.
    pub fn parse(plaintext: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(plaintext)
            .map_err(|e| CoreError::MalformedRpc(format!("not JSON: {}", e)))?;

        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::MalformedRpc("payload is not an object".into()))?;

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MalformedRpc("missing string id".into()))?
            .to_string();

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            let params = match obj.get("params") {
                Some(Value::Array(items)) => items.clone(),
                Some(single) if !single.is_null() => vec![single.clone()],
                _ => Vec::new(),
            };
            return Ok(RpcMessage::Request(RpcRequest {
                id,
                method: method.to_string(),
                params,
            }));
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            return Ok(RpcMessage::Response(RpcResponse {
                id,
                result: obj.get("result").and_then(Value::as_str).map(String::from),
                error: obj.get("error").and_then(Value::as_str).map(String::from),
            }));
        }

        Err(CoreError::MalformedRpc(
            "neither method nor result/error present".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_with_extra_fields() {
        let raw = json!({
            "id": "req1",
            "method": "sign_event",
            "params": ["{\"kind\":1}"],
            "jsonrpc": "2.0",
            "unexpected": {"nested": true}
        })
        .to_string();

        match RpcMessage::parse(&raw).unwrap() {
            RpcMessage::Request(req) => {
                assert_eq!(req.id, "req1");
                assert_eq!(req.method, "sign_event");
                assert_eq!(req.params.len(), 1);
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn missing_params_defaults_to_empty() {
        let raw = json!({"id": "x", "method": "ping"}).to_string();
        match RpcMessage::parse(&raw).unwrap() {
            RpcMessage::Request(req) => assert!(req.params.is_empty()),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn parses_response_with_result_or_error() {
        let ok = json!({"id": "a", "result": "ack"}).to_string();
        let err = json!({"id": "b", "error": "Denied"}).to_string();

        assert!(matches!(
            RpcMessage::parse(&ok).unwrap(),
            RpcMessage::Response(RpcResponse { result: Some(_), .. })
        ));
        assert!(matches!(
            RpcMessage::parse(&err).unwrap(),
            RpcMessage::Response(RpcResponse { error: Some(_), .. })
        ));
    }

    #[test]
    fn rejects_shapeless_payloads() {
        assert!(RpcMessage::parse("not json").is_err());
        assert!(RpcMessage::parse("[1,2,3]").is_err());
        assert!(RpcMessage::parse(r#"{"method":"ping"}"#).is_err());
        assert!(RpcMessage::parse(r#"{"id":"x"}"#).is_err());
    }
}
