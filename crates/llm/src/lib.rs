use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

mod providers;
mod router;
mod structured;

pub use providers::{MockProvider, OllamaProvider, OpenAiProvider};
pub use router::ModelRouter;
pub use structured::{chat_structured, extract_json, StructuredError, StructuredPrompt};

// ── Chat message types ───────────────────────────────────────────────────────

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a chat conversation, in the shape shared by the
/// Ollama `/api/chat` and OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// When role == Tool, identifies which tool call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Base64-encoded images attached to the message (vision models).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: vec![], tool_call_id: None, images: vec![] }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: vec![], tool_call_id: None, images: vec![] }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: vec![], tool_call_id: None, images: vec![] }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: vec![], tool_call_id: Some(tool_call_id.into()), images: vec![] }
    }

    /// Attach a base64 image to this message.
    pub fn with_image(mut self, base64: impl Into<String>) -> Self {
        self.images.push(base64.into());
        self
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this call; generated when the provider omits one.
    #[serde(default)]
    pub id: String,
    pub function: ToolCallFunction,
}

/// The function name and arguments within a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as a JSON string (OpenAI) or parsed object (Ollama);
    /// normalized to a parsed `Value` for downstream consumers.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Outcome of a tool-capable chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Text content of the assistant's reply (may be empty with tool_calls).
    pub content: String,
    /// Tool calls the assistant wants to make.
    pub tool_calls: Vec<ToolCall>,
    /// "stop", "tool_calls", "length" or "error".
    pub finish_reason: String,
}

// ── Provider telemetry ───────────────────────────────────────────────────────

/// Routing telemetry for one provider, packed into atomics so the shared
/// `Arc<dyn LlmProvider>` can record outcomes without a lock.
///
/// Trust starts at 1.0, drops 0.1 per failure and recovers 0.01 per success,
/// clamped to [0, 1].  Latency is a running mean over all calls.
#[derive(Debug)]
pub struct ProviderTelemetry {
    trust_bits: AtomicU32,
    latency_bits: AtomicU64,
    call_count: AtomicU64,
    error_count: AtomicU64,
}

impl Default for ProviderTelemetry {
    fn default() -> Self {
        Self {
            trust_bits: AtomicU32::new(1.0f32.to_bits()),
            latency_bits: AtomicU64::new(0.0f64.to_bits()),
            call_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }
}

impl ProviderTelemetry {
    pub fn record(&self, latency_secs: f64, success: bool) {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        let prev = f64::from_bits(self.latency_bits.load(Ordering::Relaxed));
        let mean = (prev * (n - 1) as f64 + latency_secs) / n as f64;
        self.latency_bits.store(mean.to_bits(), Ordering::Relaxed);

        let trust = f32::from_bits(self.trust_bits.load(Ordering::Relaxed));
        let next = if success {
            (trust + 0.01).min(1.0)
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            (trust - 0.1).max(0.0)
        };
        self.trust_bits.store(next.to_bits(), Ordering::Relaxed);
    }

    pub fn trust_score(&self) -> f32 {
        f32::from_bits(self.trust_bits.load(Ordering::Relaxed))
    }

    pub fn avg_latency(&self) -> f64 {
        f64::from_bits(self.latency_bits.load(Ordering::Relaxed))
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn error_rate(&self) -> f64 {
        let calls = self.call_count();
        if calls == 0 {
            0.0
        } else {
            self.error_count() as f64 / calls as f64
        }
    }
}

// ── Provider trait ───────────────────────────────────────────────────────────

/// Abstraction over one configured model profile.  The router owns a set of
/// these and scores them per request.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn profile_name(&self) -> &str;
    fn model_name(&self) -> &str;
    fn capabilities(&self) -> &[String];
    /// Routing priority 1-4 from config; higher wins on capability matches.
    fn priority(&self) -> u32;
    fn supports_native_tools(&self) -> bool {
        false
    }
    fn supports_vision(&self) -> bool {
        false
    }
    /// Local providers remain eligible under air-gap routing.
    fn is_local(&self) -> bool {
        false
    }
    fn telemetry(&self) -> &ProviderTelemetry;

    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;

    /// Like [`chat`] but asks the provider for JSON-constrained output where
    /// the backend supports it (Ollama `format: "json"`).  Default falls
    /// back to a plain chat call.
    async fn chat_json(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        self.chat(messages, temperature).await
    }

    /// Native tool calling.  Providers that don't support it return the
    /// plain chat content with no tool calls.
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &serde_json::Value,
    ) -> Result<ChatOutcome> {
        let _ = tools;
        let content = self.chat(messages, 0.0).await?;
        Ok(ChatOutcome {
            content,
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
        })
    }
}

/// Convert a [`ChatMessage`] slice into the wire shape shared by both
/// supported HTTP backends.
pub(crate) fn messages_to_wire(messages: &[ChatMessage], stringify_args: bool) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut msg = json!({ "role": role });
            msg["content"] = match &m.content {
                Some(c) => json!(c),
                None => serde_json::Value::Null,
            };
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        let arguments = if stringify_args && !tc.function.arguments.is_string() {
                            json!(tc.function.arguments.to_string())
                        } else {
                            tc.function.arguments.clone()
                        };
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.function.name, "arguments": arguments }
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            if let Some(id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            if !m.images.is_empty() {
                msg["images"] = json!(m.images);
            }
            msg
        })
        .collect()
}

/// Parse a `tool_calls` array from either backend into [`ToolCall`]s.
/// String-encoded argument objects are parsed; missing IDs are synthesized.
pub(crate) fn parse_tool_calls(calls: &[serde_json::Value]) -> Vec<ToolCall> {
    calls
        .iter()
        .enumerate()
        .filter_map(|(i, call)| {
            let func = call.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let arguments = func
                .get("arguments")
                .map(|v| {
                    if let Some(s) = v.as_str() {
                        serde_json::from_str(s).unwrap_or(json!({}))
                    } else {
                        v.clone()
                    }
                })
                .unwrap_or(json!({}));
            let id = call
                .get("id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("call_{i}"));
            Some(ToolCall {
                id,
                function: ToolCallFunction { name, arguments },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_trust_decays_and_recovers() {
        let t = ProviderTelemetry::default();
        t.record(1.0, false);
        assert!((t.trust_score() - 0.9).abs() < 1e-6);
        t.record(1.0, true);
        assert!((t.trust_score() - 0.91).abs() < 1e-6);
        assert_eq!(t.error_count(), 1);
        assert_eq!(t.call_count(), 2);
    }

    #[test]
    fn telemetry_latency_is_running_mean() {
        let t = ProviderTelemetry::default();
        t.record(2.0, true);
        t.record(4.0, true);
        assert!((t.avg_latency() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn wire_messages_carry_tool_results() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::tool_result("call_0", "42"),
        ];
        let wire = messages_to_wire(&messages, false);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_0");
    }

    #[test]
    fn parse_tool_calls_handles_string_arguments() {
        let raw = vec![json!({
            "function": { "name": "research", "arguments": "{\"query\": \"rust\"}" }
        })];
        let calls = parse_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "research");
        assert_eq!(calls[0].function.arguments["query"], "rust");
        assert_eq!(calls[0].id, "call_0");
    }

    #[test]
    fn parse_tool_calls_skips_malformed_entries() {
        let raw = vec![json!({"not_function": {}}), json!({"function": {"name": "clock"}})];
        let calls = parse_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "clock");
        assert_eq!(calls[0].function.arguments, json!({}));
    }
}
