//! L5 MetaCognition: process optimization, timing analysis and auto-learn.

use std::time::Duration;

use tracing::warn;

use crate::cortex::{ConsciousnessStack, LAYER_DELIBERATION};
use crate::schema::{AgentResponse, IntentKind, Sentiment};

pub(super) fn metacognize(
    stack: &ConsciousnessStack,
    raw_input: &str,
    response: &mut AgentResponse,
) {
    let mut insights: Vec<String> = vec![];
    let confidence = response.final_thought.confidence;
    let has_action = response.action.is_some();
    let has_response = !response.final_response.trim().is_empty();

    // Confidence trend over the last five cycles.
    let history = stack.push_confidence(confidence);
    if history.len() >= 5 {
        let recent = &history[history.len() - 5..];
        let avg = recent.iter().sum::<f32>() / recent.len() as f32;
        if avg < 0.4 {
            insights.push("Confidence trending low - consider a stronger model".to_string());
        } else if avg > 0.85 {
            insights.push("Consistently high confidence - reflex caching opportunity".to_string());
        }
    }

    // Frustration and corrections intensify reasoning.
    if response.sentiment == Sentiment::Frustrated || response.intent == IntentKind::Correction {
        warn!("metacognition: correction or frustration detected, intensifying reasoning");
        insights.push("FRUSTRATION SIGNAL: user correction or frustration".to_string());
        response.needs_escalation = true;
        response.final_thought.confidence *= 0.8;
    }

    // Per-layer timing flags.
    stack.with_timing(|timing| {
        let total = timing.cycle_total();
        if total > Duration::from_secs(5) {
            if let Some((name, slowest)) = timing.slowest() {
                insights.push(format!(
                    "Slow cycle ({:.1}s) - bottleneck: {name} ({:.1}s)",
                    total.as_secs_f64(),
                    slowest.as_secs_f64()
                ));
            }
        }
        let deliberation = timing.current(LAYER_DELIBERATION);
        if deliberation > Duration::from_secs(3) {
            insights.push(format!(
                "Deliberation took {:.1}s - consider the shallow path for simple requests",
                deliberation.as_secs_f64()
            ));
        }
    });

    // Record successful input→action pairs for reflex promotion.
    if let Some(action) = &response.action {
        if confidence >= 0.6 && !raw_input.is_empty() {
            stack.with_tracker(|tracker| {
                tracker.record_success(raw_input, &action.skill_name, &action.parameters, confidence);
            });
        }
    }

    // Surface promotion candidates.
    let candidates = stack.with_tracker(|tracker| tracker.candidates());
    if !candidates.is_empty() {
        let names: Vec<String> = candidates
            .iter()
            .take(3)
            .map(|c| format!("'{}'->{}(x{})", c.input, c.skill, c.count))
            .collect();
        insights.push(format!("REFLEX candidates: {}", names.join(", ")));
    }

    if has_action && !has_response {
        insights.push("Action without explanation - user may need feedback".to_string());
    }
    if !has_action && !has_response {
        insights.push("Empty pipeline output - possible failure".to_string());
    }

    let note = if insights.is_empty() {
        "Process nominal.".to_string()
    } else {
        insights.join(" | ")
    };
    response.internal_metacognition = Some(match response.internal_metacognition.take() {
        Some(existing) => format!("{existing} || MetaCog: {note}"),
        None => format!("MetaCog: {note}"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActionCall, ThoughtObject};
    use mentat_llm::{LlmProvider, MockProvider, ModelRouter};
    use mentat_skills::SkillRegistry;
    use std::sync::Arc;

    fn stack() -> ConsciousnessStack {
        let mock = Arc::new(MockProvider::new("mock"));
        let router = Arc::new(ModelRouter::from_providers(
            vec![mock as Arc<dyn LlmProvider>],
            "mock",
        ));
        ConsciousnessStack::new(router, Arc::new(SkillRegistry::new()), "persona")
    }

    fn confident_action_response() -> AgentResponse {
        AgentResponse {
            final_thought: ThoughtObject { confidence: 0.9, ..Default::default() },
            action: Some(ActionCall::new("system_control", serde_json::json!({"action": "open_app"}))),
            final_response: "Opening.".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn successful_actions_feed_the_pattern_tracker() {
        let stack = stack();
        for _ in 0..3 {
            let mut response = confident_action_response();
            metacognize(&stack, "open notepad", &mut response);
        }
        let candidates = stack.reflex_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].skill, "system_control");
    }

    #[test]
    fn frustration_escalates_and_tempers_confidence() {
        let stack = stack();
        let mut response = confident_action_response();
        response.sentiment = Sentiment::Frustrated;
        metacognize(&stack, "it's still broken", &mut response);
        assert!(response.needs_escalation);
        assert!(response.final_thought.confidence < 0.9);
    }

    #[test]
    fn annotation_is_always_present() {
        let stack = stack();
        let mut response = confident_action_response();
        metacognize(&stack, "open notepad", &mut response);
        assert!(response.internal_metacognition.unwrap().contains("MetaCog:"));
    }

    #[test]
    fn empty_pipeline_output_is_flagged() {
        let stack = stack();
        let mut response = AgentResponse::default();
        metacognize(&stack, "hello", &mut response);
        assert!(response
            .internal_metacognition
            .unwrap()
            .contains("Empty pipeline output"));
    }
}
