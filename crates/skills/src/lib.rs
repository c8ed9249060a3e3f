use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod builtins;
pub mod capability;
pub mod manifest;
pub mod registry;
pub mod safety;
pub mod sandbox;

pub use capability::{Capability, CapabilityCheck, CapabilityRegistry};
pub use manifest::{DynamicSkill, SkillManifest};
pub use registry::{SkillMetric, SkillRegistry};
pub use safety::{redact_secrets, safe_for_log, SafetyLayer};
pub use sandbox::PathSandbox;

/// Safety classification of a skill or a concrete action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyTier {
    Safe,
    Medium,
    Destructive,
}

impl SafetyTier {
    pub fn label(&self) -> &'static str {
        match self {
            SafetyTier::Safe => "safe",
            SafetyTier::Medium => "medium",
            SafetyTier::Destructive => "destructive",
        }
    }

    pub fn needs_confirmation(&self) -> bool {
        matches!(self, SafetyTier::Medium | SafetyTier::Destructive)
    }
}

/// A pluggable action handler: a name, a description the model reads, an
/// optional JSON-Schema-shaped parameter schema, and an execute contract
/// that always resolves to a string.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON-Schema shaped parameter description; empty object when the
    /// skill takes no parameters.  Used for tool definitions and minimal
    /// parameter validation.
    fn schema(&self) -> Value {
        serde_json::json!({})
    }

    fn safety_tier(&self) -> SafetyTier {
        SafetyTier::Safe
    }

    async fn execute(&self, params: &Value) -> Result<String>;

    /// Ollama/OpenAI-compatible tool definition, generated from the schema.
    fn tool_definition(&self) -> Value {
        let params = self.schema();
        let parameters = if params.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            serde_json::json!({ "type": "object", "properties": {}, "required": [] })
        } else {
            params
        };
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": parameters
            }
        })
    }
}

/// Pull a string parameter out of a JSON params object.
pub fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Pull an integer parameter, accepting both numbers and numeric strings
/// (regex-templated reflex params arrive as strings).
pub fn param_i64(params: &Value, key: &str) -> Option<i64> {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoParams;

    #[async_trait]
    impl Skill for NoParams {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        async fn execute(&self, _params: &Value) -> Result<String> {
            Ok("ok".into())
        }
    }

    #[test]
    fn tool_definition_fills_empty_schema() {
        let def = NoParams.tool_definition();
        assert_eq!(def["function"]["name"], "noop");
        assert_eq!(def["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn param_helpers_accept_string_numbers() {
        let params = serde_json::json!({"x": "42", "y": 7, "s": "hi"});
        assert_eq!(param_i64(&params, "x"), Some(42));
        assert_eq!(param_i64(&params, "y"), Some(7));
        assert_eq!(param_str(&params, "s"), Some("hi"));
        assert_eq!(param_i64(&params, "missing"), None);
    }

    #[test]
    fn tier_ordering_reflects_escalation() {
        assert!(SafetyTier::Safe < SafetyTier::Medium);
        assert!(SafetyTier::Medium < SafetyTier::Destructive);
        assert!(!SafetyTier::Safe.needs_confirmation());
        assert!(SafetyTier::Destructive.needs_confirmation());
    }
}
