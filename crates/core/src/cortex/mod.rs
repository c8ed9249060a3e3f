//! The five-layer consciousness stack: Perception, Interpretation,
//! Deliberation, Reflection, MetaCognition.  Each layer's wall-clock
//! duration is recorded for the metacognition pass and for telemetry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info};

use mentat_llm::ModelRouter;
use mentat_memory::MemoryContext;
use mentat_skills::SkillRegistry;

use crate::ensemble::EnsembleEngine;
use crate::schema::{ActionRecord, AgentResponse};

mod deliberation;
mod interpretation;
mod metacognition;
mod reflection;

pub use interpretation::Interpretation;

pub const LAYER_PERCEPTION: &str = "Perception";
pub const LAYER_INTERPRETATION: &str = "Interpretation";
pub const LAYER_DELIBERATION: &str = "Deliberation";
pub const LAYER_REFLECTION: &str = "Reflection";
pub const LAYER_METACOGNITION: &str = "MetaCognition";

// ── Timing ───────────────────────────────────────────────────────────────────

/// Per-layer execution times for metacognition analysis.  Keeps the last 50
/// samples per layer plus the current cycle.
#[derive(Debug, Default)]
pub struct LayerTiming {
    history: HashMap<String, Vec<Duration>>,
    current_cycle: HashMap<String, Duration>,
}

impl LayerTiming {
    pub fn record(&mut self, layer: &str, duration: Duration) {
        let samples = self.history.entry(layer.to_string()).or_default();
        samples.push(duration);
        if samples.len() > 50 {
            samples.remove(0);
        }
        self.current_cycle.insert(layer.to_string(), duration);
    }

    pub fn reset_cycle(&mut self) {
        self.current_cycle.clear();
    }

    pub fn current(&self, layer: &str) -> Duration {
        self.current_cycle.get(layer).copied().unwrap_or_default()
    }

    pub fn cycle_total(&self) -> Duration {
        self.current_cycle.values().sum()
    }

    pub fn slowest(&self) -> Option<(String, Duration)> {
        self.current_cycle
            .iter()
            .max_by_key(|(_, d)| **d)
            .map(|(name, d)| (name.clone(), *d))
    }

    pub fn average(&self, layer: &str) -> Duration {
        match self.history.get(layer) {
            Some(samples) if !samples.is_empty() => {
                samples.iter().sum::<Duration>() / samples.len() as u32
            }
            _ => Duration::ZERO,
        }
    }
}

// ── Pattern tracking (metacognition auto-learn) ──────────────────────────────

#[derive(Debug, Clone)]
struct TrackedPattern {
    skill: String,
    params: Value,
    count: u32,
    total_confidence: f32,
}

/// A stable input→action pair ready for reflex promotion.
#[derive(Debug, Clone)]
pub struct ReflexCandidate {
    pub input: String,
    pub skill: String,
    pub params: Value,
    pub count: u32,
    pub avg_confidence: f32,
}

/// Tracks successful input→action patterns for potential reflex promotion.
#[derive(Debug, Default)]
pub struct PatternTracker {
    patterns: HashMap<String, TrackedPattern>,
}

impl PatternTracker {
    fn normalize(text: &str) -> String {
        text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn record_success(&mut self, input: &str, skill: &str, params: &Value, confidence: f32) {
        let key = Self::normalize(input);
        let entry = self.patterns.entry(key).or_insert_with(|| TrackedPattern {
            skill: skill.to_string(),
            params: params.clone(),
            count: 0,
            total_confidence: 0.0,
        });
        entry.count += 1;
        entry.total_confidence += confidence;
    }

    /// Patterns stable enough for promotion: count ≥ 3 and average
    /// confidence ≥ 0.7.
    pub fn candidates(&self) -> Vec<ReflexCandidate> {
        self.patterns
            .iter()
            .filter(|(_, p)| p.count >= 3 && p.total_confidence / p.count as f32 >= 0.7)
            .map(|(input, p)| ReflexCandidate {
                input: input.clone(),
                skill: p.skill.clone(),
                params: p.params.clone(),
                count: p.count,
                avg_confidence: p.total_confidence / p.count as f32,
            })
            .collect()
    }
}

// ── Context ──────────────────────────────────────────────────────────────────

/// Everything the stack needs beyond the raw input; assembled by the
/// controller per request.
#[derive(Debug, Clone, Default)]
pub struct CortexContext {
    pub memory: MemoryContext,
    pub project_instructions: String,
    pub url_context: String,
    pub use_lite: bool,
    pub use_ensemble: bool,
    pub world_context: String,
    pub signals_context: String,
    pub evolution_log: String,
    pub action_results: Vec<ActionRecord>,
    /// Known semantic paths from the world model, `(path, purpose)`.
    pub semantic_paths: Vec<(String, String)>,
}

// ── The stack ────────────────────────────────────────────────────────────────

pub struct ConsciousnessStack {
    router: Arc<ModelRouter>,
    registry: Arc<SkillRegistry>,
    ensemble: EnsembleEngine,
    persona_prompt: String,
    timing: Mutex<LayerTiming>,
    tracker: Mutex<PatternTracker>,
    confidence_history: Mutex<Vec<f32>>,
}

impl ConsciousnessStack {
    pub fn new(
        router: Arc<ModelRouter>,
        registry: Arc<SkillRegistry>,
        persona_prompt: impl Into<String>,
    ) -> Self {
        Self {
            ensemble: EnsembleEngine::new(router.clone()),
            router,
            registry,
            persona_prompt: persona_prompt.into(),
            timing: Mutex::new(LayerTiming::default()),
            tracker: Mutex::new(PatternTracker::default()),
            confidence_history: Mutex::new(vec![]),
        }
    }

    /// Run one full cognition cycle.
    pub async fn process(&self, user_input: &str, ctx: &CortexContext) -> Result<AgentResponse> {
        let cycle_start = Instant::now();
        self.timing.lock().unwrap().reset_cycle();

        // L1 Perception: whitespace normalization.  Pure.
        let t = Instant::now();
        let perceived = perceive(user_input);
        self.record(LAYER_PERCEPTION, t.elapsed());

        // L2 Interpretation: entities, intent, sentiment, capabilities.
        let t = Instant::now();
        let interp = interpretation::interpret(&perceived, &ctx.semantic_paths);
        self.record(LAYER_INTERPRETATION, t.elapsed());
        info!(intent = ?interp.intent, sentiment = ?interp.sentiment, "interpretation complete");

        // L3 Deliberation: the heavy stage.
        let t = Instant::now();
        let mut response =
            deliberation::deliberate(self, &perceived, &interp, ctx).await?;
        self.record(LAYER_DELIBERATION, t.elapsed());

        // L4 Reflection: audit and amend.
        let t = Instant::now();
        reflection::reflect(&self.registry, &mut response);
        self.record(LAYER_REFLECTION, t.elapsed());

        // L5 MetaCognition: timing analysis, auto-learn, annotation.
        let t = Instant::now();
        metacognition::metacognize(self, &perceived, &mut response);
        self.record(LAYER_METACOGNITION, t.elapsed());

        debug!(elapsed_ms = cycle_start.elapsed().as_millis(), "consciousness cycle complete");
        Ok(response)
    }

    fn record(&self, layer: &str, duration: Duration) {
        self.timing.lock().unwrap().record(layer, duration);
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub(crate) fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub(crate) fn ensemble(&self) -> &EnsembleEngine {
        &self.ensemble
    }

    pub(crate) fn persona_prompt(&self) -> &str {
        &self.persona_prompt
    }

    pub(crate) fn with_timing<R>(&self, f: impl FnOnce(&LayerTiming) -> R) -> R {
        f(&self.timing.lock().unwrap())
    }

    pub(crate) fn with_tracker<R>(&self, f: impl FnOnce(&mut PatternTracker) -> R) -> R {
        f(&mut self.tracker.lock().unwrap())
    }

    pub(crate) fn push_confidence(&self, confidence: f32) -> Vec<f32> {
        let mut history = self.confidence_history.lock().unwrap();
        history.push(confidence);
        if history.len() > 30 {
            history.remove(0);
        }
        history.clone()
    }

    /// Duration of the named layer in the most recent cycle; zero when the
    /// stack was bypassed entirely (reflex path).
    pub fn last_layer_duration(&self, layer: &str) -> Duration {
        self.timing.lock().unwrap().current(layer)
    }

    /// Patterns ready for reflex promotion.
    pub fn reflex_candidates(&self) -> Vec<ReflexCandidate> {
        self.tracker.lock().unwrap().candidates()
    }
}

/// L1 Perception: collapse runs of whitespace.  Pure function.
pub fn perceive(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
