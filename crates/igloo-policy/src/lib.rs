//! Policy evaluation for client requests.
//!
//! Policy is declarative data: two maps of string key to bool, consulted by
//! one function. Nothing here knows how a method is executed; adding a new
//! method to the broker needs a policy entry and an identity-adapter case,
//! not a code path here.
//!
//! Evaluation rules:
//!
//! - `sign_event` is governed solely by the `kinds` map. `"*"` set to `true`
//!   allows any kind, but an explicit per-kind `false` still blocks that
//!   kind. An unparseable event template is denied outright.
//! - Every other method consults the `methods` map by name.
//! - Absent keys mean the operator decides: `prompt`.

use serde_json::Value;

use igloo_core::rpc::methods;
use igloo_core::{EventTemplate, SessionPolicy};

/// Outcome of evaluating one request against one session's policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Execute without asking.
    Allow,
    /// Refuse; the reason is surfaced to the operator queue.
    Deny(String),
    /// Park for a human decision.
    Prompt,
}

/// Evaluate a request against a session policy.
pub fn evaluate(policy: &SessionPolicy, method: &str, params: &[Value]) -> Decision {
    if method == methods::SIGN_EVENT {
        return evaluate_sign_event(policy, params);
    }

    match policy.methods.get(method) {
        Some(true) => Decision::Allow,
        Some(false) => Decision::Deny(format!("{} not allowed by policy", method)),
        None => Decision::Prompt,
    }
}

fn evaluate_sign_event(policy: &SessionPolicy, params: &[Value]) -> Decision {
    let template = match params.first().map(EventTemplate::from_param) {
        Some(Ok(template)) => template,
        _ => return Decision::Deny("unparseable event template".into()),
    };

    let kind_key = template.kind_key();

    // An explicit per-kind entry always beats the wildcard; the wildcard
    // only matters when set to true.
    match policy.kinds.get(&kind_key) {
        Some(true) => Decision::Allow,
        Some(false) => Decision::Deny(format!("kind {} not allowed by policy", kind_key)),
        None => match policy.kinds.get("*") {
            Some(true) => Decision::Allow,
            _ => Decision::Prompt,
        },
    }
}
