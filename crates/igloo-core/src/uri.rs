//! `nostrconnect://` URI parsing.
//!
//! Clients hand operators a URI of the form
//! `nostrconnect://<client_pubkey>?relay=<url>&secret=<hex>&name=<s>&perms=<csv>`.
//! Multiple `relay` parameters are allowed and at least one is required.

use serde_json::Value;
use url::Url;

use crate::error::{CoreError, Result};
use crate::pubkey::ClientPubkey;
use crate::rpc::methods;
use crate::session::{SessionPolicy, SessionProfile};

/// A parsed connect URI.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectUri {
    pub client_pubkey: ClientPubkey,
    pub relays: Vec<String>,
    pub secret: Option<String>,
    pub profile: SessionProfile,
    /// Permissions the client asks for. Recorded, never auto-granted.
    pub requested: Option<SessionPolicy>,
}

impl ConnectUri {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| CoreError::InvalidUri(format!("unparseable: {}", e)))?;

        if url.scheme() != "nostrconnect" {
            return Err(CoreError::InvalidUri(format!(
                "unexpected scheme {:?}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| CoreError::InvalidUri("missing client pubkey".into()))?;
        let client_pubkey = ClientPubkey::parse(host)
            .map_err(|e| CoreError::InvalidUri(e.to_string()))?;

        let mut relays = Vec::new();
        let mut secret = None;
        let mut profile = SessionProfile::default();
        let mut requested = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay" => {
                    let relay = value.trim().to_string();
                    if !relay.is_empty() && !relays.contains(&relay) {
                        relays.push(relay);
                    }
                }
                "secret" => secret = Some(value.to_string()),
                "name" => profile.name = Some(value.to_string()),
                "url" => profile.url = Some(value.to_string()),
                "image" => profile.image = Some(value.to_string()),
                "perms" => requested = Some(policy_from_csv(&value)),
                _ => {}
            }
        }

        if relays.is_empty() {
            return Err(CoreError::InvalidUri("at least one relay is required".into()));
        }

        Ok(Self {
            client_pubkey,
            relays,
            secret,
            profile,
            requested,
        })
    }
}

/// Parse the CSV permission form: `"sign_event:1,sign_event:4,nip44_encrypt"`.
///
/// `sign_event:<kind>` entries land in the kinds map; bare method names land
/// in the methods map.
pub fn policy_from_csv(csv: &str) -> SessionPolicy {
    let mut policy = SessionPolicy::default();
    for entry in csv.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':') {
            Some((method, kind)) if method == methods::SIGN_EVENT => {
                let kind = kind.trim();
                if !kind.is_empty() {
                    policy.kinds.insert(kind.to_string(), true);
                }
            }
            Some((method, _)) => {
                policy.methods.insert(method.trim().to_string(), true);
            }
            None => {
                policy.methods.insert(entry.to_string(), true);
            }
        }
    }
    policy
}

/// Interpret the permissions value a `connect` request may carry: either the
/// CSV string form or an object `{methods, kinds}`.
pub fn policy_from_value(value: &Value) -> Option<SessionPolicy> {
    match value {
        Value::String(csv) => Some(policy_from_csv(csv)),
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}
