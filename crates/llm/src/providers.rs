use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use mentat_config::ModelProfile;

use crate::{
    messages_to_wire, parse_tool_calls, ChatMessage, ChatOutcome, LlmProvider, ProviderTelemetry,
};

// ── Ollama ───────────────────────────────────────────────────────────────────

/// Local Ollama backend via `/api/chat`.
pub struct OllamaProvider {
    profile_name: String,
    profile: ModelProfile,
    client: reqwest::Client,
    telemetry: ProviderTelemetry,
}

impl OllamaProvider {
    pub fn new(profile_name: impl Into<String>, profile: ModelProfile) -> Self {
        Self {
            profile_name: profile_name.into(),
            profile,
            client: reqwest::Client::new(),
            telemetry: ProviderTelemetry::default(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.profile.base_url.trim_end_matches('/'))
    }

    async fn post_chat(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        let response = self.client.post(self.endpoint()).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            bail!("ollama error ({status}): {body}");
        }
        if let Some(err) = body.get("error") {
            bail!("ollama error: {err}");
        }
        Ok(body)
    }

    async fn chat_inner(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        json_mode: bool,
    ) -> Result<String> {
        let mut payload = json!({
            "model": self.profile.model_name,
            "messages": messages_to_wire(messages, false),
            "stream": false,
            "options": { "temperature": temperature }
        });
        if json_mode {
            payload["format"] = json!("json");
        }
        let body = self.post_chat(payload).await?;
        Ok(body
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn profile_name(&self) -> &str {
        &self.profile_name
    }
    fn model_name(&self) -> &str {
        &self.profile.model_name
    }
    fn capabilities(&self) -> &[String] {
        &self.profile.capabilities
    }
    fn priority(&self) -> u32 {
        self.profile.priority
    }
    fn supports_native_tools(&self) -> bool {
        self.profile.supports_native_tools
    }
    fn supports_vision(&self) -> bool {
        self.profile.supports_vision
    }
    fn is_local(&self) -> bool {
        true
    }
    fn telemetry(&self) -> &ProviderTelemetry {
        &self.telemetry
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        self.chat_inner(messages, temperature, false).await
    }

    async fn chat_json(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        self.chat_inner(messages, temperature, true).await
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &serde_json::Value,
    ) -> Result<ChatOutcome> {
        let payload = json!({
            "model": self.profile.model_name,
            "messages": messages_to_wire(messages, false),
            "stream": false,
            "tools": tools,
            "options": { "temperature": 0.0 }
        });
        let body = self.post_chat(payload).await?;
        let message = body.get("message").cloned().unwrap_or_default();
        let content = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let tool_calls = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| parse_tool_calls(calls))
            .unwrap_or_default();
        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
        Ok(ChatOutcome {
            content,
            tool_calls,
            finish_reason: finish_reason.to_string(),
        })
    }
}

// ── OpenAI-compatible ────────────────────────────────────────────────────────

/// Remote OpenAI-compatible backend (`/chat/completions`).  The API key is
/// read from the profile's `api_key_env` environment variable at call time so
/// key rotation never requires a restart.
pub struct OpenAiProvider {
    profile_name: String,
    profile: ModelProfile,
    client: reqwest::Client,
    telemetry: ProviderTelemetry,
}

impl OpenAiProvider {
    pub fn new(profile_name: impl Into<String>, profile: ModelProfile) -> Self {
        Self {
            profile_name: profile_name.into(),
            profile,
            client: reqwest::Client::new(),
            telemetry: ProviderTelemetry::default(),
        }
    }

    fn api_key(&self) -> Result<String> {
        let env_name = if self.profile.api_key_env.is_empty() {
            "OPENAI_API_KEY"
        } else {
            &self.profile.api_key_env
        };
        match std::env::var(env_name) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!("API key missing: set {env_name}"),
        }
    }

    fn endpoint(&self) -> String {
        let base = if self.profile.base_url.contains("11434") || self.profile.base_url.is_empty() {
            "https://api.openai.com/v1"
        } else {
            self.profile.base_url.trim_end_matches('/')
        };
        format!("{base}/chat/completions")
    }

    async fn post_chat(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        let key = self.api_key()?;
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            bail!("api error ({status}): {body}");
        }
        Ok(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn profile_name(&self) -> &str {
        &self.profile_name
    }
    fn model_name(&self) -> &str {
        &self.profile.model_name
    }
    fn capabilities(&self) -> &[String] {
        &self.profile.capabilities
    }
    fn priority(&self) -> u32 {
        self.profile.priority
    }
    fn supports_native_tools(&self) -> bool {
        self.profile.supports_native_tools
    }
    fn supports_vision(&self) -> bool {
        self.profile.supports_vision
    }
    fn telemetry(&self) -> &ProviderTelemetry {
        &self.telemetry
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let payload = json!({
            "model": self.profile.model_name,
            "messages": messages_to_wire(messages, true),
            "temperature": temperature
        });
        let body = self.post_chat(payload).await?;
        Ok(body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &serde_json::Value,
    ) -> Result<ChatOutcome> {
        let payload = json!({
            "model": self.profile.model_name,
            "messages": messages_to_wire(messages, true),
            "tools": tools
        });
        let body = self.post_chat(payload).await?;
        let choice = body.get("choices").and_then(|c| c.get(0));
        let message = choice.and_then(|c| c.get("message"));
        let content = message
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let tool_calls = message
            .and_then(|m| m.get("tool_calls"))
            .and_then(|v| v.as_array())
            .map(|calls| parse_tool_calls(calls))
            .unwrap_or_default();
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|v| v.as_str())
            .unwrap_or("stop")
            .to_string();
        Ok(ChatOutcome {
            content,
            tool_calls,
            finish_reason,
        })
    }
}

// ── Mock ─────────────────────────────────────────────────────────────────────

/// Scripted provider for tests and offline development.  Replies are popped
/// from a queue; when the queue runs dry a canned line is returned so
/// pipelines never stall.
pub struct MockProvider {
    profile_name: String,
    model_name: String,
    capabilities: Vec<String>,
    priority: u32,
    native_tools: bool,
    replies: Mutex<VecDeque<String>>,
    tool_outcomes: Mutex<VecDeque<ChatOutcome>>,
    telemetry: ProviderTelemetry,
}

impl MockProvider {
    pub fn new(profile_name: impl Into<String>) -> Self {
        Self {
            profile_name: profile_name.into(),
            model_name: "mock-model".to_string(),
            capabilities: vec!["general".to_string(), "reasoning".to_string(), "fast_response".to_string()],
            priority: 2,
            native_tools: false,
            replies: Mutex::new(VecDeque::new()),
            tool_outcomes: Mutex::new(VecDeque::new()),
            telemetry: ProviderTelemetry::default(),
        }
    }

    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.capabilities = caps.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_native_tools(mut self) -> Self {
        self.native_tools = true;
        self
    }

    /// Queue a scripted reply for the next `chat`/`chat_json` call.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(reply.into());
    }

    /// Queue a scripted outcome for the next `chat_with_tools` call.
    pub fn push_tool_outcome(&self, outcome: ChatOutcome) {
        self.tool_outcomes.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn profile_name(&self) -> &str {
        &self.profile_name
    }
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }
    fn priority(&self) -> u32 {
        self.priority
    }
    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }
    fn is_local(&self) -> bool {
        true
    }
    fn telemetry(&self) -> &ProviderTelemetry {
        &self.telemetry
    }

    async fn chat(&self, _messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        let reply = self.replies.lock().unwrap().pop_front();
        Ok(reply.unwrap_or_else(|| "Acknowledged.".to_string()))
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        _tools: &serde_json::Value,
    ) -> Result<ChatOutcome> {
        if let Some(outcome) = self.tool_outcomes.lock().unwrap().pop_front() {
            return Ok(outcome);
        }
        debug!("mock provider has no scripted tool outcome, answering with text");
        let content = self.chat(messages, 0.0).await?;
        Ok(ChatOutcome {
            content,
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
        })
    }
}

/// Build a provider from a config profile.  Unknown provider names fall back
/// to a mock so a bad config degrades instead of failing startup.
pub fn provider_from_profile(
    name: &str,
    profile: &ModelProfile,
) -> std::sync::Arc<dyn LlmProvider> {
    match profile.provider.as_str() {
        "ollama" => std::sync::Arc::new(OllamaProvider::new(name, profile.clone())),
        "openai" | "openrouter" => std::sync::Arc::new(OpenAiProvider::new(name, profile.clone())),
        "mock" => std::sync::Arc::new(MockProvider::new(name)),
        other => {
            warn!(provider = other, profile = name, "unknown provider type, using mock");
            std::sync::Arc::new(MockProvider::new(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_pops_scripted_replies_in_order() {
        let mock = MockProvider::new("test");
        mock.push_reply("first");
        mock.push_reply("second");
        assert_eq!(mock.chat(&[], 0.0).await.unwrap(), "first");
        assert_eq!(mock.chat(&[], 0.0).await.unwrap(), "second");
        // Queue drained: canned fallback.
        assert_eq!(mock.chat(&[], 0.0).await.unwrap(), "Acknowledged.");
    }

    #[tokio::test]
    async fn mock_tool_outcome_falls_back_to_text() {
        let mock = MockProvider::new("test");
        mock.push_reply("plain answer");
        let outcome = mock.chat_with_tools(&[], &json!([])).await.unwrap();
        assert_eq!(outcome.content, "plain answer");
        assert!(outcome.tool_calls.is_empty());
    }
}
