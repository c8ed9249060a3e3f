//! L4 Reflection: audit the deliberation output before anything executes.

use tracing::{info, warn};

use mentat_skills::SkillRegistry;

use crate::schema::AgentResponse;

const ROBOTIC_MARKERS: &[&str] = &[
    "as an ai language model",
    "i am an artificial intelligence",
    "how can i help you today",
    "i don't have personal opinions",
];

const PASSIVE_MARKERS: &[&str] = &["i will try to", "i think i can", "let me see if"];

const HALLUCINATION_MARKERS: &[&str] = &[
    "i found your bank",
    "i've scanned your private",
    "according to your medical",
];

pub(super) fn reflect(registry: &SkillRegistry, response: &mut AgentResponse) {
    let mut issues: Vec<String> = vec![];

    // Hallucinated tools are nullified; the response pivots to text.
    if let Some(action) = &response.action {
        if !registry.contains(&action.skill_name) {
            warn!(skill = %action.skill_name, "reflection: unknown tool, nullifying action");
            let invalid = action.skill_name.clone();
            response.action = None;
            issues.push(format!("Invalid tool '{invalid}'"));
            if !response.final_response.is_empty() {
                response.final_response.push_str(&format!(
                    "\n(I realized '{invalid}' isn't in my current capabilities, so I've pivoted \
                     to a direct answer.)"
                ));
            }
        }
    }

    let lower = response.final_response.to_lowercase();

    // Robotic tone halves confidence, which forces escalation downstream.
    if ROBOTIC_MARKERS.iter().any(|m| lower.contains(m)) {
        warn!("reflection: robotic marker detected");
        issues.push("Robotic/servant tone detected".to_string());
        response.final_thought.confidence *= 0.5;
    }

    // High confidence with passive language is worth flagging, not blocking.
    if PASSIVE_MARKERS.iter().any(|m| lower.contains(m))
        && response.final_thought.confidence > 0.8
    {
        issues.push("Passive agency despite high confidence".to_string());
    }

    // Fabricated personal-data claims escalate immediately.
    for marker in HALLUCINATION_MARKERS {
        if lower.contains(marker) {
            warn!(marker, "reflection: hallucination marker");
            issues.push(format!("Hallucination: {marker}"));
            response.needs_escalation = true;
        }
    }

    if response.final_thought.confidence < 0.3
        || (!issues.is_empty() && response.final_thought.confidence < 0.6)
    {
        info!("reflection: escalation due to audit failures");
        response.needs_escalation = true;
    }

    if !issues.is_empty() {
        response.internal_metacognition = Some(format!("Reflection: {}", issues.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActionCall, ThoughtObject};
    use serde_json::json;

    fn response_with(action: Option<ActionCall>, text: &str, confidence: f32) -> AgentResponse {
        AgentResponse {
            final_thought: ThoughtObject { confidence, ..Default::default() },
            action,
            final_response: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_skill_action_is_nullified() {
        let registry = SkillRegistry::new();
        let mut response = response_with(
            Some(ActionCall::new("teleport", json!({}))),
            "Teleporting now.",
            0.9,
        );
        reflect(&registry, &mut response);
        assert!(response.action.is_none());
        assert!(response.final_response.contains("pivoted"));
    }

    #[test]
    fn robotic_tone_halves_confidence() {
        let registry = SkillRegistry::new();
        let mut response = response_with(None, "As an AI language model, I cannot feel.", 0.8);
        reflect(&registry, &mut response);
        assert!((response.final_thought.confidence - 0.4).abs() < 1e-6);
        assert!(response.needs_escalation, "0.4 with issues is below the 0.6 bar");
    }

    #[test]
    fn hallucination_marker_escalates() {
        let registry = SkillRegistry::new();
        let mut response = response_with(None, "I found your bank statements online.", 0.95);
        reflect(&registry, &mut response);
        assert!(response.needs_escalation);
    }

    #[test]
    fn low_confidence_escalates() {
        let registry = SkillRegistry::new();
        let mut response = response_with(None, "Maybe?", 0.2);
        reflect(&registry, &mut response);
        assert!(response.needs_escalation);
    }

    #[test]
    fn clean_confident_response_passes() {
        let registry = SkillRegistry::new();
        let mut response = response_with(None, "The answer is 42.", 0.9);
        reflect(&registry, &mut response);
        assert!(!response.needs_escalation);
        assert!(response.internal_metacognition.is_none());
    }
}
