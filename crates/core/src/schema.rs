use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single requested skill execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionCall {
    pub skill_name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ActionCall {
    pub fn new(skill_name: impl Into<String>, parameters: Value) -> Self {
        Self { skill_name: skill_name.into(), parameters }
    }
}

/// The structured unit of cognition produced by deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThoughtObject {
    pub intent_summary: String,
    pub primary_strategy: String,
    /// Zero forces escalation downstream.
    pub confidence: f32,
    pub assumptions: Vec<String>,
    pub constraints: Vec<String>,
    pub risk_score: f32,
    pub rejected_strategies: Vec<String>,
}

impl Default for ThoughtObject {
    fn default() -> Self {
        Self {
            intent_summary: "Processing request".to_string(),
            primary_strategy: "Direct response".to_string(),
            confidence: 0.0,
            assumptions: vec![],
            constraints: vec![],
            risk_score: 0.0,
            rejected_strategies: vec![],
        }
    }
}

/// Sentiment detected in the user's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Urgent,
    Frustrated,
    Curious,
    #[default]
    Neutral,
}

/// Coarse intent classes used for triage, ensemble selection and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    MediaControl,
    SystemCommand,
    Coding,
    Correction,
    Research,
    Question,
    #[default]
    Conversation,
}

/// Final integrated response flowing out of the consciousness stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentResponse {
    pub final_thought: ThoughtObject,
    pub action: Option<ActionCall>,
    /// Always populated after Reflection; never a placeholder.
    pub final_response: String,
    pub needs_escalation: bool,
    pub internal_metacognition: Option<String>,
    #[serde(skip)]
    pub sentiment: Sentiment,
    #[serde(skip)]
    pub intent: IntentKind,
}

impl Default for AgentResponse {
    fn default() -> Self {
        Self {
            final_thought: ThoughtObject::default(),
            action: None,
            final_response: String::new(),
            needs_escalation: false,
            internal_metacognition: None,
            sentiment: Sentiment::Neutral,
            intent: IntentKind::Conversation,
        }
    }
}

/// Lightweight response for shallow reasoning: three fields local models
/// produce reliably without repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteResponse {
    pub final_response: String,
    #[serde(default)]
    pub action: Option<ActionCall>,
    #[serde(default = "default_lite_confidence")]
    pub confidence: f32,
}

fn default_lite_confidence() -> f32 {
    0.7
}

impl LiteResponse {
    /// Lift a lite response to the full shape for pipeline compatibility.
    pub fn into_full(self) -> AgentResponse {
        let strategy: String = if self.final_response.is_empty() {
            "Direct response".to_string()
        } else {
            self.final_response.chars().take(100).collect()
        };
        AgentResponse {
            final_thought: ThoughtObject {
                intent_summary: "Shallow reasoning".to_string(),
                primary_strategy: strategy,
                confidence: self.confidence,
                ..Default::default()
            },
            action: self.action,
            final_response: self.final_response,
            needs_escalation: false,
            internal_metacognition: Some("Shallow path - lite schema used.".to_string()),
            sentiment: Sentiment::Neutral,
            intent: IntentKind::Conversation,
        }
    }

    pub fn schema_hint() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "final_response": {
                    "type": "string",
                    "description": "The actual textual answer. Never a placeholder like 'Direct response'."
                },
                "action": {
                    "type": ["object", "null"],
                    "properties": {
                        "skill_name": { "type": "string" },
                        "parameters": { "type": "object" }
                    }
                },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
            },
            "required": ["final_response"]
        })
    }
}

impl AgentResponse {
    pub fn schema_hint() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "final_thought": {
                    "type": "object",
                    "properties": {
                        "intent_summary": { "type": "string" },
                        "primary_strategy": { "type": "string" },
                        "confidence": { "type": "number" },
                        "assumptions": { "type": "array", "items": { "type": "string" } },
                        "constraints": { "type": "array", "items": { "type": "string" } },
                        "risk_score": { "type": "number" },
                        "rejected_strategies": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["intent_summary", "primary_strategy", "confidence"]
                },
                "action": {
                    "type": ["object", "null"],
                    "properties": {
                        "skill_name": { "type": "string" },
                        "parameters": { "type": "object" }
                    }
                },
                "final_response": { "type": "string" },
                "internal_metacognition": { "type": ["string", "null"] }
            },
            "required": ["final_thought", "final_response"]
        })
    }
}

/// Task classes with their cognitive budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    Vision,
    Coding,
    Reasoning,
    General,
}

#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub time_s: f64,
    pub tokens: u32,
    pub risk: f32,
}

impl TaskClass {
    /// Classify a request by surface markers; questions take the reasoning
    /// budget.
    pub fn classify(input: &str) -> Self {
        let lower = input.to_lowercase();
        if ["see", "look", "screen", "vision", "screenshot"].iter().any(|k| lower.contains(k)) {
            return TaskClass::Vision;
        }
        let question_words = [
            "what", "who", "where", "when", "why", "how", "is", "are", "can", "do", "does",
        ];
        if input.trim_end().ends_with('?')
            || question_words.iter().any(|w| lower.starts_with(w))
        {
            return TaskClass::Reasoning;
        }
        if ["code", "script", "fix", "patch"].iter().any(|k| lower.contains(k)) {
            return TaskClass::Coding;
        }
        if ["plan", "think", "analyze", "sequence"].iter().any(|k| lower.contains(k)) {
            return TaskClass::Reasoning;
        }
        TaskClass::General
    }

    pub fn budget(&self) -> Budget {
        match self {
            TaskClass::Vision => Budget { time_s: 10.0, tokens: 2048, risk: 0.2 },
            TaskClass::Coding => Budget { time_s: 15.0, tokens: 4096, risk: 0.5 },
            TaskClass::Reasoning => Budget { time_s: 8.0, tokens: 1024, risk: 0.1 },
            TaskClass::General => Budget { time_s: 5.0, tokens: 512, risk: 0.1 },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskClass::Vision => "vision",
            TaskClass::Coding => "coding",
            TaskClass::Reasoning => "reasoning",
            TaskClass::General => "general",
        }
    }
}

/// One observed step in the ReAct loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub skill: String,
    pub action: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub step: usize,
}

impl ActionRecord {
    pub fn outcome_text(&self) -> &str {
        self.result
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("")
    }
}
