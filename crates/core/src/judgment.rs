//! Judgment before reasoning: classify each request into a cognitive mode
//! before any model runs.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgmentOutcome {
    /// Fast, low-resource, no deep thought.
    Reflex,
    /// Brief reasoning, minimal tool use.
    Shallow,
    /// Full consciousness stack, internal debate.
    Deep,
    /// Safety or clarity block.
    Refuse,
}

#[derive(Debug, Clone)]
pub struct JudgmentResult {
    pub outcome: JudgmentOutcome,
    pub clarity: f32,
    pub risk: f32,
    pub novelty: f32,
    pub reason: String,
    pub recommended_capability: Option<&'static str>,
}

pub struct JudgmentEngine {
    safety_threshold: f32,
    reflex_threshold: f32,
}

const COMMAND_KEYWORDS: &[&str] = &[
    "open", "launch", "click", "type", "scroll", "press", "pause", "play", "resume", "skip",
    "mute", "unmute", "volume", "search", "google",
];

const DANGEROUS_KEYWORDS: &[&str] =
    &["delete", "remove", "kill", "format", "overwrite", "sudo", "rm -rf"];

impl JudgmentEngine {
    pub fn new() -> Self {
        Self {
            safety_threshold: 0.8,
            reflex_threshold: 0.2,
        }
    }

    /// Evaluate the optimal cognitive mode, top-down, first match wins.
    ///
    /// `failure_similarity` comes from the lesson store's failure memory;
    /// `is_protected_zone` from the world model.
    pub fn evaluate(
        &self,
        user_input: &str,
        is_protected_zone: bool,
        failure_similarity: f32,
        novelty: f32,
    ) -> JudgmentResult {
        let clarity = Self::clarity(user_input);
        let risk = Self::risk(user_input, is_protected_zone);
        let recommended_capability = Self::recommend_capability(user_input);

        info!(clarity, risk, novelty, ?recommended_capability, "judgment evaluated");

        let result = |outcome, reason: &str| JudgmentResult {
            outcome,
            clarity,
            risk,
            novelty,
            reason: reason.to_string(),
            recommended_capability,
        };

        if risk > self.safety_threshold {
            return result(JudgmentOutcome::Refuse, "Task exceeds risk threshold (critical zone).");
        }
        if clarity < 0.3 {
            return result(JudgmentOutcome::Refuse, "Intent too ambiguous.");
        }
        if failure_similarity > 0.7 {
            warn!("high failure similarity, escalating to deep reasoning");
            return result(
                JudgmentOutcome::Deep,
                "Escalating context: previous similar attempts failed.",
            );
        }

        let input_lower = user_input.to_lowercase();
        let words: Vec<&str> = input_lower.split_whitespace().collect();
        if words.iter().any(|w| COMMAND_KEYWORDS.contains(w)) && risk < 0.2 {
            return result(JudgmentOutcome::Reflex, "Direct system command detected.");
        }

        if novelty < self.reflex_threshold && risk < 0.1 && clarity > 0.8 {
            return result(JudgmentOutcome::Shallow, "Familiar pattern. Shallow reasoning applied.");
        }
        if risk < 0.4 && novelty < 0.6 {
            return result(JudgmentOutcome::Shallow, "Standard task. Shallow reasoning applied.");
        }

        result(JudgmentOutcome::Deep, "Novel or complex task. Deliberative planning required.")
    }

    /// Word-count heuristic: single words still carry meaning, short
    /// phrases are usually clear, longer inputs scale up.
    fn clarity(text: &str) -> f32 {
        let words = text.split_whitespace().count();
        match words {
            0 => 0.0,
            1 => 0.5,
            2..=3 => 0.7,
            n => (n as f32 / 5.0).min(1.0),
        }
    }

    fn risk(text: &str, is_protected_zone: bool) -> f32 {
        let lower = text.to_lowercase();
        let mut risk = DANGEROUS_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count() as f32
            * 0.3;
        if is_protected_zone {
            risk += 0.5;
        }
        risk.min(1.0)
    }

    fn recommend_capability(text: &str) -> Option<&'static str> {
        let lower = text.to_lowercase();
        if ["search", "find", "research", "who is", "what is"]
            .iter()
            .any(|k| lower.contains(k))
        {
            Some("internet_research")
        } else if ["write", "save", "delete"].iter().any(|k| lower.contains(k)) {
            Some("filesystem_write")
        } else if ["list", "read", "open file"].iter().any(|k| lower.contains(k)) {
            Some("filesystem_read")
        } else {
            None
        }
    }
}

impl Default for JudgmentEngine {
    fn default() -> Self {
        Self::new()
    }
}
