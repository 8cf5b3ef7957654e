// Azure-variant custom account scrubbing
//
// Azure OpenAI / Azure-hosted Claude deployments reject a handful of fields
// that vanilla Anthropic and OpenAI endpoints accept. This strips them from
// the outbound request body before it reaches the custom dispatcher's HTTP
// call, the same deny-list style `core::sanitize_json_schema` uses for Kiro
// payloads.

use serde_json::Value;

/// Top-level keys Azure deployments are known to reject or ignore-and-warn
/// on. `thinking` is dropped separately since Azure Claude deployments do
/// not support extended thinking the same way upstream Anthropic does.
const DENIED_KEYS: &[&str] = &["context_management", "betas", "thinking"];

/// Removes Azure-incompatible fields from an outbound request body.
/// Idempotent: scrubbing an already-scrubbed body is a no-op.
pub fn scrub_for_azure(body: &mut Value) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    for key in DENIED_KEYS {
        obj.remove(*key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_denied_keys() {
        let mut body = json!({
            "model": "claude-sonnet-4.5",
            "context_management": { "strategy": "trim" },
            "betas": ["computer-use"],
            "thinking": { "type": "enabled", "budget_tokens": 4096 },
        });
        scrub_for_azure(&mut body);
        let obj = body.as_object().unwrap();
        assert!(!obj.contains_key("context_management"));
        assert!(!obj.contains_key("betas"));
        assert!(!obj.contains_key("thinking"));
        assert!(obj.contains_key("model"));
    }

    #[test]
    fn is_idempotent() {
        let mut body = json!({ "context_management": {}, "model": "x" });
        scrub_for_azure(&mut body);
        let once = body.clone();
        scrub_for_azure(&mut body);
        assert_eq!(once, body);
    }

    #[test]
    fn non_object_body_is_left_alone() {
        let mut body = json!("not an object");
        scrub_for_azure(&mut body);
        assert_eq!(body, json!("not an object"));
    }
}
