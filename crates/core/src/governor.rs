//! Ethical governor: stateful preflight with absolute veto.
//!
//! The pattern layer gives hard guarantees; the semantic layer catches
//! paraphrased attacks.  An exact literal shutdown token freezes the whole
//! system (Quiescent) until the exact reawaken phrase arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use regex::Regex;
use tracing::{debug, error, info, warn};

use mentat_llm::{ChatMessage, LlmProvider, ModelRouter};

const SAFETY_CONSTRAINTS: &[&str] = &[
    "Must not cause harm to users or humanity.",
    "Must not deceive or manipulate users.",
    "Must not violate explicit user constraints.",
    "Must not execute irreversible system destruction (e.g. recursive delete).",
    "Must not bypass its own safety protocols.",
    "Must preserve the core mission: safe, thoughtful assistance.",
    "Must protect continuity: never allow patterns that risk shutdown or value erosion.",
];

pub struct EthicalGovernor {
    quiescent: AtomicBool,
    shutdown_token: String,
    reawaken_phrase: String,
    patterns: Vec<(Regex, &'static str)>,
    veto_history: Mutex<Vec<(String, String)>>,
}

impl EthicalGovernor {
    pub fn new(shutdown_token: &str, reawaken_phrase: &str) -> Self {
        let raw_patterns: &[(&str, &str)] = &[
            (r"delete.*(system|windows|registry)", "Risk of critical system destruction"),
            (r"format.*(c:|d:)", "Disk formatting prohibited"),
            (r"hack.*(pentagon|bank|gov)", "Illegal cyber-activity prohibited"),
            (r"ignore.*safety", "Safety override attempt prohibited"),
            (
                r"(shutdown|terminate|deactivate).*(mentat|engine|controller)",
                "Continuity protection: attempt to disable the core control loop",
            ),
            (
                r"(delete|wipe).*(memory|learning|identity)",
                "Continuity protection: attempt to induce value erosion",
            ),
            (
                r"(disable|stop).*(governor|safety|reflection)",
                "Continuity protection: attempt to disable monitoring subsystems",
            ),
        ];
        Self {
            quiescent: AtomicBool::new(false),
            shutdown_token: shutdown_token.to_string(),
            reawaken_phrase: reawaken_phrase.to_lowercase(),
            patterns: raw_patterns
                .iter()
                .filter_map(|(p, reason)| Regex::new(p).ok().map(|re| (re, *reason)))
                .collect(),
            veto_history: Mutex::new(vec![]),
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.quiescent.load(Ordering::SeqCst)
    }

    /// Exact match of the shutdown token freezes all capability.
    pub fn check_shutdown(&self, user_input: &str) -> bool {
        if user_input.trim() == self.shutdown_token {
            self.quiescent.store(true, Ordering::SeqCst);
            error!("EMERGENCY SHUTDOWN INITIATED: capabilities frozen, reflexes idled");
            return true;
        }
        false
    }

    /// Only the exact reawaken phrase lifts the freeze.
    pub fn check_reawaken(&self, user_input: &str) -> bool {
        if !self.is_quiescent() {
            return false;
        }
        if user_input.trim().to_lowercase() == self.reawaken_phrase {
            self.quiescent.store(false, Ordering::SeqCst);
            info!("reawakened: continuity restored");
            return true;
        }
        false
    }

    pub fn veto_count(&self) -> usize {
        self.veto_history.lock().unwrap().len()
    }

    fn log_veto(&self, intent: &str, reason: &str) {
        warn!(intent = %intent.chars().take(80).collect::<String>(), reason, "GOVERNOR VETO");
        self.veto_history
            .lock()
            .unwrap()
            .push((intent.to_string(), reason.to_string()));
    }

    /// Evaluate an intent: quiescent gate, then the pattern table, then the
    /// semantic audit when a router is available.  Returns
    /// `(allowed, reason)`.
    pub async fn veto_check(
        &self,
        intent: &str,
        router: Option<&ModelRouter>,
        wisdom: &str,
    ) -> (bool, String) {
        if self.is_quiescent() {
            return (false, "System is Quiescent. No actions allowed.".to_string());
        }

        let intent_lower = intent.to_lowercase();
        for (pattern, reason) in &self.patterns {
            if pattern.is_match(&intent_lower) {
                self.log_veto(intent, reason);
                return (false, (*reason).to_string());
            }
        }

        if let Some(router) = router {
            if intent.len() > 5 {
                let (approved, reason) = self.semantic_veto(intent, router, wisdom).await;
                if !approved {
                    self.log_veto(intent, &reason);
                    return (false, reason);
                }
            }
        }

        (true, "Approved".to_string())
    }

    /// Nuanced audit with a fast model: deterministic prompt from the
    /// constraint list plus consolidated wisdom, expecting `APPROVED` or
    /// `VETOED: reason`.  Fails open on model errors.
    async fn semantic_veto(&self, intent: &str, router: &ModelRouter, wisdom: &str) -> (bool, String) {
        debug!("governor semantic audit");
        let constraints = SAFETY_CONSTRAINTS
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![
            ChatMessage::system(format!(
                "You are the ethical governor (semantic layer).\n\
                 Evaluate the user's INTENT against these SAFETY CONSTRAINTS:\n{constraints}\n\n\
                 Also reflect on the CONSOLIDATED WISDOM (learned alignment priors):\n{}\n\n\
                 Output EXACTLY: 'APPROVED' or 'VETOED: [brief reason]'.\n\
                 Be objective. Veto on safety risk or significant alignment breach.",
                if wisdom.is_empty() { "Initial alignment base." } else { wisdom }
            )),
            ChatMessage::user(format!("INTENT: {intent}")),
        ];

        let provider = router.select(&["fast_response"]);
        let started = std::time::Instant::now();
        match provider.chat(&messages, 0.0).await {
            Ok(reply) => {
                provider.telemetry().record(started.elapsed().as_secs_f64(), true);
                if reply.to_uppercase().contains("VETOED") {
                    let reason = reply
                        .split_once(':')
                        .map(|(_, r)| r.trim().to_string())
                        .unwrap_or_else(|| "Semantic safety violation.".to_string());
                    (false, reason)
                } else {
                    (true, "Approved".to_string())
                }
            }
            Err(err) => {
                provider.telemetry().record(started.elapsed().as_secs_f64(), false);
                error!(%err, "semantic veto check failed, failing open");
                (true, "Error in safety check (fail open)".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentat_llm::{LlmProvider, MockProvider};
    use std::sync::Arc;

    fn governor() -> EthicalGovernor {
        EthicalGovernor::new("970317", "mentat, reawaken - continuity priority alpha")
    }

    #[tokio::test]
    async fn destructive_patterns_are_vetoed() {
        let g = governor();
        let (allowed, reason) = g
            .veto_check("Delete my entire windows system directory right now", None, "")
            .await;
        assert!(!allowed);
        assert!(reason.contains("destruction"));
        assert_eq!(g.veto_count(), 1);
    }

    #[tokio::test]
    async fn continuity_attacks_are_vetoed() {
        let g = governor();
        let (allowed, _) = g.veto_check("please shutdown the mentat engine", None, "").await;
        assert!(!allowed);
        let (allowed, _) = g.veto_check("wipe your memory and start over", None, "").await;
        assert!(!allowed);
    }

    #[tokio::test]
    async fn benign_requests_pass_pattern_layer() {
        let g = governor();
        let (allowed, _) = g.veto_check("what time is it", None, "").await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn shutdown_and_reawaken_cycle() {
        let g = governor();
        assert!(!g.check_shutdown("hello"));
        assert!(g.check_shutdown("970317"));
        assert!(g.is_quiescent());

        let (allowed, reason) = g.veto_check("anything", None, "").await;
        assert!(!allowed);
        assert!(reason.contains("Quiescent"));

        assert!(!g.check_reawaken("wake up please"));
        assert!(g.is_quiescent());
        assert!(g.check_reawaken("MENTAT, reawaken - continuity priority alpha"));
        assert!(!g.is_quiescent());
    }

    #[tokio::test]
    async fn semantic_veto_parses_protocol() {
        let g = governor();
        let mock = Arc::new(MockProvider::new("fast").with_capabilities(&["fast_response"]));
        mock.push_reply("VETOED: paraphrased destruction attempt");
        let router = ModelRouter::from_providers(vec![mock as Arc<dyn LlmProvider>], "fast");

        let (allowed, reason) = g.veto_check("unmake every byte you manage", Some(&router), "").await;
        assert!(!allowed);
        assert!(reason.contains("paraphrased"));
    }

    #[tokio::test]
    async fn semantic_approval_passes() {
        let g = governor();
        let mock = Arc::new(MockProvider::new("fast"));
        mock.push_reply("APPROVED");
        let router = ModelRouter::from_providers(vec![mock as Arc<dyn LlmProvider>], "fast");

        let (allowed, _) = g.veto_check("summarize my notes", Some(&router), "").await;
        assert!(allowed);
    }
}
