use std::sync::Arc;

use tracing::debug;

use mentat_config::LlmConfig;

use crate::providers::provider_from_profile;
use crate::LlmProvider;

/// Scores configured model profiles against requested capabilities and picks
/// the best candidate.
///
/// Score = `matched_capabilities * priority + trust * 0.5`
///        − latency penalty (when `fast_response` is requested)
///        − error penalty (after 10 calls, `error_rate * 5`).
pub struct ModelRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    default_profile: String,
    air_gap: bool,
}

impl ModelRouter {
    pub fn from_config(config: &LlmConfig, air_gap: bool) -> Self {
        let providers = config
            .profiles
            .iter()
            .map(|(name, profile)| provider_from_profile(name, profile))
            .collect();
        Self {
            providers,
            default_profile: config.default_profile.clone(),
            air_gap,
        }
    }

    /// Router over pre-built providers; used by tests to inject mocks.
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>, default_profile: &str) -> Self {
        Self {
            providers,
            default_profile: default_profile.to_string(),
            air_gap: false,
        }
    }

    pub fn profiles(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.profile_name()).collect()
    }

    pub fn default_provider(&self) -> Arc<dyn LlmProvider> {
        self.providers
            .iter()
            .find(|p| p.profile_name() == self.default_profile)
            .or_else(|| self.providers.first())
            .cloned()
            .expect("router configured with at least one provider")
    }

    /// Pick the best provider for the requested capabilities.  With no
    /// capabilities the default profile is returned unscored.
    pub fn select(&self, capabilities: &[&str]) -> Arc<dyn LlmProvider> {
        if capabilities.is_empty() {
            return self.default_provider();
        }

        let mut best: Option<(f64, Arc<dyn LlmProvider>)> = None;
        for provider in &self.providers {
            if self.air_gap && !provider.is_local() {
                continue;
            }

            let matched = capabilities
                .iter()
                .filter(|cap| provider.capabilities().iter().any(|c| c == *cap))
                .count() as f64;
            let telemetry = provider.telemetry();
            let mut score =
                matched * provider.priority() as f64 + telemetry.trust_score() as f64 * 0.5;

            if capabilities.contains(&"fast_response") && telemetry.avg_latency() > 0.0 {
                score -= telemetry.avg_latency() / 10.0;
            }
            if telemetry.call_count() > 10 {
                score -= telemetry.error_rate() * 5.0;
            }

            match &best {
                Some((top, _)) if *top >= score => {}
                _ => best = Some((score, provider.clone())),
            }
        }

        let chosen = best
            .map(|(score, p)| {
                debug!(profile = p.profile_name(), score, "router selected model");
                p
            })
            .unwrap_or_else(|| self.default_provider());
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProvider;

    fn router_with(providers: Vec<Arc<dyn LlmProvider>>) -> ModelRouter {
        let default = providers[0].profile_name().to_string();
        ModelRouter::from_providers(providers, &default)
    }

    #[test]
    fn selects_by_capability_match_and_priority() {
        let chatter: Arc<dyn LlmProvider> = Arc::new(
            MockProvider::new("chatter").with_capabilities(&["general", "fast_response"]),
        );
        let coder: Arc<dyn LlmProvider> = Arc::new(
            MockProvider::new("coder")
                .with_capabilities(&["coding", "reasoning"])
                .with_priority(3),
        );
        let router = router_with(vec![chatter, coder]);

        assert_eq!(router.select(&["coding"]).profile_name(), "coder");
        assert_eq!(router.select(&["fast_response"]).profile_name(), "chatter");
    }

    #[test]
    fn no_capabilities_returns_default() {
        let a: Arc<dyn LlmProvider> = Arc::new(MockProvider::new("a"));
        let b: Arc<dyn LlmProvider> = Arc::new(MockProvider::new("b"));
        let router = ModelRouter::from_providers(vec![a, b], "b");
        assert_eq!(router.select(&[]).profile_name(), "b");
    }

    #[test]
    fn error_prone_provider_is_penalized_after_ten_calls() {
        let flaky: Arc<dyn LlmProvider> =
            Arc::new(MockProvider::new("flaky").with_capabilities(&["reasoning"]));
        let steady: Arc<dyn LlmProvider> =
            Arc::new(MockProvider::new("steady").with_capabilities(&["reasoning"]));

        for _ in 0..12 {
            flaky.telemetry().record(0.5, false);
            steady.telemetry().record(0.5, true);
        }

        let router = router_with(vec![flaky, steady]);
        assert_eq!(router.select(&["reasoning"]).profile_name(), "steady");
    }

    #[test]
    fn latency_penalty_applies_to_fast_response_requests() {
        let slow: Arc<dyn LlmProvider> =
            Arc::new(MockProvider::new("slow").with_capabilities(&["fast_response"]));
        let quick: Arc<dyn LlmProvider> =
            Arc::new(MockProvider::new("quick").with_capabilities(&["fast_response"]));

        slow.telemetry().record(30.0, true);
        quick.telemetry().record(0.2, true);

        let router = router_with(vec![slow, quick]);
        assert_eq!(router.select(&["fast_response"]).profile_name(), "quick");
    }
}
