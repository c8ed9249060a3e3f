//! Repair chain for structured output from small local models.
//!
//! Strict parse first; on mismatch, a sequence of patches for the known
//! ways models mangle the response schema; finally a free-text fallback at
//! `confidence = 0.4`.  Inline string mutation is never used — each stage is
//! a `Value -> Value` transform followed by a normal serde parse.

use serde_json::{json, Value};
use tracing::{debug, warn};

use mentat_llm::extract_json;

use crate::schema::{AgentResponse, ThoughtObject};

/// Parse raw model text into an [`AgentResponse`], repairing known
/// schema-mangling patterns.  Never fails: the last resort is a minimal
/// response built from whatever free text is extractable.
pub fn parse_agent_response(raw: &str) -> AgentResponse {
    match extract_json(raw) {
        Some(value) => match parse_value(value) {
            Ok(response) => response,
            Err(fallback_text) => fallback_response(&fallback_text),
        },
        None => fallback_response(raw),
    }
}

/// Parse an already-extracted JSON value, applying patches on mismatch.
/// `Err` carries the best free text found for the fallback.
pub fn parse_value(value: Value) -> Result<AgentResponse, String> {
    if let Ok(response) = serde_json::from_value::<AgentResponse>(value.clone()) {
        if !response.final_response.trim().is_empty()
            || response.final_thought.intent_summary != ThoughtObject::default().intent_summary
        {
            return Ok(response);
        }
    }

    let patched = patch(value);
    match serde_json::from_value::<AgentResponse>(patched.clone()) {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(%err, "agent response unparseable after patches");
            Err(extract_free_text(&patched))
        }
    }
}

/// Apply the known mangling patches in order.
fn patch(mut data: Value) -> Value {
    let Some(obj) = data.as_object_mut() else {
        return data;
    };

    // Patch: schema echo — the model returned the schema definition itself.
    if obj.contains_key("properties") && obj.contains_key("type") && obj.contains_key("required") {
        debug!("patch: schema echo detected");
        return json!({
            "final_thought": {
                "intent_summary": "Model error (schema echo)",
                "primary_strategy": "Retry with simpler constraints",
                "confidence": 0.0
            },
            "final_response": "Internal error: the model echoed the schema instead of answering. \
                               Try again or switch models."
        });
    }

    // Patch: thought object nested under its type name.
    if let Some(thought) = obj.remove("ThoughtObject") {
        obj.entry("final_thought").or_insert(thought);
    }

    // Patch: flattened thought fields at the root.
    if obj.contains_key("intent_summary") && obj.contains_key("primary_strategy")
        && !obj.contains_key("final_thought")
    {
        let mut thought = serde_json::Map::new();
        for field in [
            "intent_summary",
            "primary_strategy",
            "confidence",
            "assumptions",
            "constraints",
            "risk_score",
            "rejected_strategies",
        ] {
            if let Some(v) = obj.remove(field) {
                thought.insert(field.to_string(), v);
            }
        }
        obj.insert("final_thought".to_string(), Value::Object(thought));
    }

    // Patch: action as a bare string instead of an object.
    if let Some(action) = obj.get_mut("action") {
        if let Some(name) = action.as_str().map(ToString::to_string) {
            *action = json!({ "skill_name": name, "parameters": {} });
        } else if let Some(action_obj) = action.as_object_mut() {
            action_obj
                .entry("parameters")
                .or_insert_with(|| json!({}));
        }
    }

    // Patch: flattened action fields at the root.
    if obj.contains_key("skill_name") && !obj.contains_key("action") {
        let name = obj.remove("skill_name").unwrap_or(Value::Null);
        let params = obj.remove("parameters").unwrap_or_else(|| json!({}));
        obj.insert("action".to_string(), json!({ "skill_name": name, "parameters": params }));
    }

    // Patch: missing final_thought — synthesize one from what's there.
    if !obj.contains_key("final_thought") {
        let summary = obj
            .get("final_response")
            .and_then(|v| v.as_str())
            .unwrap_or("User request")
            .chars()
            .take(200)
            .collect::<String>();
        obj.insert(
            "final_thought".to_string(),
            json!({
                "intent_summary": summary,
                "primary_strategy": "Direct response",
                "confidence": 0.6
            }),
        );
    }

    // Patch: final_response missing but a common synonym key is present.
    if !obj.contains_key("final_response") {
        for key in ["response", "message", "text", "content", "answer", "reply"] {
            if let Some(text) = obj.get(key).and_then(|v| v.as_str()).map(ToString::to_string) {
                obj.insert("final_response".to_string(), Value::String(text));
                break;
            }
        }
    }

    data
}

/// Pull the most plausible user-facing text out of a failed parse.
fn extract_free_text(value: &Value) -> String {
    if let Some(obj) = value.as_object() {
        for key in ["final_response", "response", "message", "text", "content", "answer"] {
            if let Some(text) = obj.get(key).and_then(|v| v.as_str()) {
                if !text.trim().is_empty() {
                    return text.to_string();
                }
            }
        }
    }
    if let Some(text) = value.as_str() {
        return text.to_string();
    }
    "I encountered a parsing issue. Could you rephrase that?".to_string()
}

/// Minimal response carrying any extractable free text.
fn fallback_response(text: &str) -> AgentResponse {
    let trimmed = text.trim();
    let final_response = if trimmed.is_empty() {
        "I encountered a parsing issue. Could you rephrase that?".to_string()
    } else {
        trimmed.chars().take(2000).collect()
    };
    AgentResponse {
        final_thought: ThoughtObject {
            intent_summary: "Response recovery".to_string(),
            primary_strategy: "Deliver available response despite format mismatch".to_string(),
            confidence: 0.4,
            ..Default::default()
        },
        final_response,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_shape_parses_directly() {
        let raw = r#"{"final_thought": {"intent_summary": "greet", "primary_strategy": "say hi",
                     "confidence": 0.9}, "final_response": "Hello!"}"#;
        let response = parse_agent_response(raw);
        assert_eq!(response.final_response, "Hello!");
        assert!((response.final_thought.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn schema_echo_is_caught() {
        let raw = r#"{"type": "object", "properties": {"x": 1}, "required": ["x"]}"#;
        let response = parse_agent_response(raw);
        assert!(response.final_response.contains("echoed the schema"));
        assert_eq!(response.final_thought.confidence, 0.0);
    }

    #[test]
    fn flattened_thought_fields_are_regrouped() {
        let raw = r#"{"intent_summary": "open app", "primary_strategy": "use system control",
                     "confidence": 0.8, "final_response": "Opening it."}"#;
        let response = parse_agent_response(raw);
        assert_eq!(response.final_thought.intent_summary, "open app");
        assert_eq!(response.final_response, "Opening it.");
    }

    #[test]
    fn action_as_string_becomes_object() {
        let raw = r#"{"final_thought": {"intent_summary": "x", "primary_strategy": "y",
                     "confidence": 0.7}, "action": "research", "final_response": "Searching."}"#;
        let response = parse_agent_response(raw);
        let action = response.action.unwrap();
        assert_eq!(action.skill_name, "research");
        assert!(action.parameters.is_object());
    }

    #[test]
    fn flattened_action_fields_are_regrouped() {
        let raw = r#"{"final_thought": {"intent_summary": "x", "primary_strategy": "y",
                     "confidence": 0.7}, "skill_name": "clock", "parameters": {},
                     "final_response": "Checking."}"#;
        let response = parse_agent_response(raw);
        assert_eq!(response.action.unwrap().skill_name, "clock");
    }

    #[test]
    fn missing_final_thought_is_synthesized() {
        let raw = r#"{"final_response": "Just an answer."}"#;
        let response = parse_agent_response(raw);
        assert_eq!(response.final_response, "Just an answer.");
        assert!(response.final_thought.confidence > 0.0);
    }

    #[test]
    fn synonym_response_keys_are_lifted() {
        let raw = r#"{"final_thought": {"intent_summary": "x", "primary_strategy": "y",
                     "confidence": 0.7}, "answer": "Forty-two."}"#;
        let response = parse_agent_response(raw);
        assert_eq!(response.final_response, "Forty-two.");
    }

    #[test]
    fn plain_text_falls_back_at_point_four() {
        let response = parse_agent_response("The model just wrote prose with no JSON at all.");
        assert!((response.final_thought.confidence - 0.4).abs() < 1e-6);
        assert!(response.final_response.contains("prose"));
    }

    #[test]
    fn empty_input_still_yields_populated_response() {
        let response = parse_agent_response("");
        assert!(!response.final_response.is_empty());
    }
}
