use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{ChatMessage, LlmProvider};

/// Failure modes of a structured chat call, kept separate from transport
/// errors so callers can run repair heuristics over the raw model text.
#[derive(Debug, Error)]
pub enum StructuredError {
    #[error("model call failed: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("no JSON object found in model output")]
    NoJson { raw: String },
    #[error("model output did not match the requested shape: {source}")]
    Mismatch {
        raw: String,
        value: Value,
        source: serde_json::Error,
    },
}

impl StructuredError {
    /// The raw model text, when the model at least answered.
    pub fn raw(&self) -> Option<&str> {
        match self {
            StructuredError::Transport(_) => None,
            StructuredError::NoJson { raw } => Some(raw),
            StructuredError::Mismatch { raw, .. } => Some(raw),
        }
    }

    /// The extracted JSON value, when one was found but didn't deserialize.
    pub fn value(&self) -> Option<&Value> {
        match self {
            StructuredError::Mismatch { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Ask `provider` for a JSON reply matching `schema_hint` and deserialize it.
///
/// The schema is injected as a trailing system message with a JSON-only
/// instruction; local models honor it best combined with the provider's
/// JSON-constrained mode (`chat_json`).
pub async fn chat_structured<T: DeserializeOwned>(
    provider: &dyn LlmProvider,
    messages: &[ChatMessage],
    schema_hint: &Value,
) -> Result<T, StructuredError> {
    let mut messages = messages.to_vec();
    messages.push(ChatMessage::system(format!(
        "### JSON OUTPUT RULE ###\n\
         Return ONLY a single valid JSON object matching this structure. \
         No explanations, no markdown code blocks, no extra text.\n\
         SCHEMA: {schema_hint}"
    )));

    let raw = provider.chat_json(&messages, 0.0).await?;
    parse_structured(&raw)
}

/// Parse a raw model reply into `T`: fenced block first, bare object second.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, StructuredError> {
    let Some(value) = extract_json(raw) else {
        return Err(StructuredError::NoJson { raw: raw.to_string() });
    };
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => Ok(parsed),
        Err(source) => {
            debug!(%source, "structured parse mismatch");
            Err(StructuredError::Mismatch {
                raw: raw.to_string(),
                value,
                source,
            })
        }
    }
}

/// Extract the first JSON object from an LLM reply.
///
/// Strategy 1: fenced ```json ... ``` block.  Strategy 2: bare object from
/// the first `{` to the last `}`.  Python-style literals (`None`, `True`,
/// `False`) are normalized first — local models mix them in regularly.
pub fn extract_json(response: &str) -> Option<Value> {
    let normalized = response
        .replace(": None", ": null")
        .replace(": True", ": true")
        .replace(": False", ": false");

    if let Some(fence_start) = normalized.find("```json") {
        let after = &normalized[fence_start + "```json".len()..];
        if let Some(fence_end) = after.find("```") {
            let body = after[..fence_end].trim();
            if let Ok(value) = serde_json::from_str(body) {
                return Some(value);
            }
        }
    }

    let trimmed = normalized.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// ── Prompt builder ───────────────────────────────────────────────────────────

/// Assembles the deliberation prompt: identity block, cognitive protocol
/// lines, context, prior conversation turns, and the current request last.
#[derive(Debug, Default, Clone)]
pub struct StructuredPrompt {
    request: String,
    messages: Vec<ChatMessage>,
    identity: String,
    cognitive: String,
    context: String,
}

impl StructuredPrompt {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Default::default()
        }
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn set_identity(&mut self, identity: impl Into<String>) {
        self.identity = identity.into();
    }

    pub fn add_cognitive(&mut self, instruction: &str) {
        self.cognitive.push_str("\n- ");
        self.cognitive.push_str(instruction);
    }

    pub fn add_context(&mut self, context: &str) {
        if !self.context.is_empty() {
            self.context.push('\n');
        }
        self.context.push_str(context);
    }

    pub fn build(&self) -> Vec<ChatMessage> {
        let system = format!(
            "{}\n\nCOGNITIVE PROTOCOLS:{}\n\nCONTEXT:\n{}",
            self.identity, self.cognitive, self.context
        );
        let mut out = vec![ChatMessage::system(system)];
        out.extend(self.messages.iter().cloned());
        out.push(ChatMessage::user(self.request.clone()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatRole;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        action: Option<String>,
        reply: Option<String>,
    }

    #[test]
    fn extracts_fenced_json() {
        let raw = "Sure!\n```json\n{\"action\":\"recall\",\"reply\":\"done\"}\n```";
        let probe: Probe = parse_structured(raw).unwrap();
        assert_eq!(probe.action.as_deref(), Some("recall"));
        assert_eq!(probe.reply.as_deref(), Some("done"));
    }

    #[test]
    fn extracts_bare_json_with_surrounding_text() {
        let raw = "preamble {\"action\":\"x\"} epilogue";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["action"], "x");
    }

    #[test]
    fn fenced_takes_precedence_over_bare() {
        let raw = "Bare: {\"action\":\"wrong\"}\n```json\n{\"action\":\"right\"}\n```";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["action"], "right");
    }

    #[test]
    fn two_bare_objects_yield_none() {
        // First '{' to last '}' spans both objects and fails to parse.
        assert!(extract_json(r#"a {"x":1} b {"y":2}"#).is_none());
    }

    #[test]
    fn python_literals_are_normalized() {
        let raw = r#"{"action": None, "reply": "hi"}"#;
        let value = extract_json(raw).unwrap();
        assert!(value["action"].is_null());
    }

    #[test]
    fn plain_text_yields_no_json_error() {
        let err = parse_structured::<Probe>("just words, no braces").unwrap_err();
        assert!(matches!(err, StructuredError::NoJson { .. }));
    }

    #[test]
    fn mismatch_keeps_raw_and_value() {
        #[derive(Debug, Deserialize)]
        struct Strict {
            #[allow(dead_code)]
            must_exist: String,
        }
        let err = parse_structured::<Strict>(r#"{"other": 1}"#).unwrap_err();
        assert!(err.raw().is_some());
        assert!(err.value().is_some());
    }

    #[test]
    fn prompt_builds_system_then_history_then_request() {
        let mut prompt = StructuredPrompt::new("do the thing")
            .with_messages(vec![ChatMessage::assistant("earlier reply")]);
        prompt.set_identity("IDENTITY");
        prompt.add_cognitive("think first");
        prompt.add_context("some context");

        let messages = prompt.build();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.as_ref().unwrap().contains("IDENTITY"));
        assert!(messages[0].content.as_ref().unwrap().contains("think first"));
        assert_eq!(messages[2].content.as_deref(), Some("do the thing"));
    }
}
