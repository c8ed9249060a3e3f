use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded cognitive cycle: what triggered it, what was intended, what
/// was done and how it went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub trigger_context: String,
    pub intent: String,
    pub plan: serde_json::Value,
    pub action: String,
    pub outcome: String,
    pub confidence: f32,
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Starts at 1 on insert; bumped on every similarity retrieval.
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,
}

/// A similarity hit returned from episodic retrieval.
#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub intent: String,
    pub action: String,
    pub outcome: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    Coding,
    Ethics,
    Workflow,
    UserPref,
    General,
}

impl InsightCategory {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "coding" => Self::Coding,
            "ethics" => Self::Ethics,
            "workflow" => Self::Workflow,
            "user_pref" | "user preference" | "userpref" => Self::UserPref,
            _ => Self::General,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Coding => "CODING",
            Self::Ethics => "ETHICS",
            Self::Workflow => "WORKFLOW",
            Self::UserPref => "USER_PREF",
            Self::General => "GENERAL",
        }
    }
}

/// Consolidated wisdom distilled from episode clusters during dream cycles.
/// Keyed by a hash of the insight text; re-derivations reinforce rather than
/// duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticInsight {
    pub key: String,
    pub category: InsightCategory,
    pub insight: String,
    pub source_count: u32,
    pub last_reinforced: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonMeta {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub author: String,
    pub source_task: String,
    /// How many times this exact lesson was re-derived.
    pub count: u32,
    pub reliability: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub action: String,
    pub error: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorCategory {
    Motivation,
    Ethics,
    Prior,
    Anchor,
}

/// One key-value identity anchor.  Seeded at first init, mutated only
/// through an explicit update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityAnchor {
    pub key: String,
    pub value: String,
    pub category: AnchorCategory,
    pub significance: f32,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
}
