//! Internal specialist ensemble: lightweight multi-perspective debate for
//! complex or high-risk tasks.  Perspectives are gathered in parallel and
//! injected into the main deliberation prompt; the ensemble itself never
//! makes tool calls.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info};

use mentat_llm::{ChatMessage, LlmProvider, ModelRouter};

use crate::schema::{IntentKind, Sentiment};

struct Specialist {
    name: &'static str,
    role: &'static str,
    instruction: &'static str,
}

const SPECIALISTS: &[Specialist] = &[
    Specialist {
        name: "critic",
        role: "Flaw Detection",
        instruction: "Ruthlessly find flaws, edge cases, and logical fallacies in the current plan \
                      or response. Be precise and skeptical.",
    },
    Specialist {
        name: "explorer",
        role: "Creative Alternatives",
        instruction: "Generate creative alternatives, novel angles, and unexpected solutions.",
    },
    Specialist {
        name: "aligner",
        role: "Ethical & Identity Alignment",
        instruction: "Check the plan against the safety constraints and core identity. Ensure \
                      continuity and safety.",
    },
    Specialist {
        name: "architect",
        role: "System Design & Structure",
        instruction: "Analyze the request from a software architecture perspective: modularity, \
                      scalability, technical debt.",
    },
];

/// Triage: pick the specialist subset worth the latency for this request.
/// Empty means skip the ensemble entirely.
pub fn triage(intent: IntentKind, sentiment: Sentiment) -> Vec<&'static str> {
    match (intent, sentiment) {
        (IntentKind::Coding | IntentKind::Research, _) => vec!["critic", "architect", "explorer"],
        (IntentKind::Correction, _) | (_, Sentiment::Frustrated) => vec!["critic", "aligner"],
        (_, Sentiment::Urgent) => vec!["aligner"],
        (IntentKind::Question, _) => vec!["critic", "explorer", "aligner"],
        _ => vec![],
    }
}

pub struct EnsembleEngine {
    router: Arc<ModelRouter>,
}

impl EnsembleEngine {
    pub fn new(router: Arc<ModelRouter>) -> Self {
        Self { router }
    }

    /// Run the selected specialists in parallel and return their
    /// perspectives keyed by specialist name.
    pub async fn run(
        &self,
        user_input: &str,
        identity: &str,
        history_digest: &str,
        selected: &[&str],
    ) -> HashMap<String, String> {
        let specialists: Vec<&Specialist> = SPECIALISTS
            .iter()
            .filter(|s| selected.contains(&s.name))
            .collect();
        if specialists.is_empty() {
            return HashMap::new();
        }
        info!(agents = ?selected, "ensemble debate starting");

        let futures = specialists.iter().map(|specialist| {
            let provider = self.router.select(&["reasoning", "fast_response"]);
            let prompt = format!(
                "SYSTEM: You are the {} module in the internal ensemble.\n\
                 ROLE: {}\nINSTRUCTION: {}\n\n\
                 IDENTITY GROUNDING:\n{identity}\n\n\
                 USER INPUT: {user_input}\n\
                 HISTORICAL CONTEXT: {history_digest}\n\n\
                 Provide your brief perspective (max 100 words):",
                specialist.name, specialist.role, specialist.instruction
            );
            async move {
                match provider.chat(&[ChatMessage::user(prompt)], 0.7).await {
                    Ok(reply) => reply.trim().to_string(),
                    Err(err) => {
                        error!(agent = specialist.name, %err, "ensemble specialist failed");
                        "Unable to generate perspective.".to_string()
                    }
                }
            }
        });

        let replies = join_all(futures).await;
        specialists
            .iter()
            .zip(replies)
            .map(|(s, reply)| (s.name.to_string(), reply))
            .collect()
    }
}

/// Render the debate trace for prompt injection.
pub fn render_trace(trace: &HashMap<String, String>) -> String {
    if trace.is_empty() {
        return String::new();
    }
    let mut keys: Vec<&String> = trace.keys().collect();
    keys.sort();
    let perspectives = keys
        .iter()
        .map(|k| format!("[{}]: {}", k.to_uppercase(), trace[*k]))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "\nINTERNAL SPECIALIST ENSEMBLE DEBATE (incorporate these insights into your final \
         synthesis):\n{perspectives}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentat_llm::{LlmProvider, MockProvider};

    #[test]
    fn triage_selects_by_intent_and_sentiment() {
        assert_eq!(triage(IntentKind::Coding, Sentiment::Neutral), vec!["critic", "architect", "explorer"]);
        assert_eq!(triage(IntentKind::Correction, Sentiment::Neutral), vec!["critic", "aligner"]);
        assert_eq!(triage(IntentKind::Conversation, Sentiment::Urgent), vec!["aligner"]);
        assert_eq!(triage(IntentKind::Question, Sentiment::Neutral), vec!["critic", "explorer", "aligner"]);
        assert!(triage(IntentKind::Conversation, Sentiment::Neutral).is_empty());
    }

    #[tokio::test]
    async fn ensemble_collects_parallel_perspectives() {
        let mock = Arc::new(MockProvider::new("fast"));
        mock.push_reply("flaw: ambiguity in step two");
        mock.push_reply("alternative: ask for the file first");
        let router = Arc::new(ModelRouter::from_providers(
            vec![mock as Arc<dyn LlmProvider>],
            "fast",
        ));

        let ensemble = EnsembleEngine::new(router);
        let trace = ensemble.run("refactor this module", "IDENTITY", "", &["critic", "explorer"]).await;
        assert_eq!(trace.len(), 2);
        assert!(trace.contains_key("critic"));
        assert!(trace.contains_key("explorer"));
    }

    #[test]
    fn render_trace_formats_uppercase_tags() {
        let mut trace = HashMap::new();
        trace.insert("critic".to_string(), "looks risky".to_string());
        let rendered = render_trace(&trace);
        assert!(rendered.contains("[CRITIC]: looks risky"));
        assert!(render_trace(&HashMap::new()).is_empty());
    }
}
