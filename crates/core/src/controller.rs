//! The request controller: per-request reason-act-observe orchestration
//! with confirmation gating, safety checks, cancellation, timeouts and
//! checkpointing.  Every code path ends in a string returned to the caller
//! — errors never propagate out of the loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use fs2::FileExt;
use regex::Regex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mentat_config::AppConfig;
use mentat_llm::{LlmProvider, ModelRouter};
use mentat_memory::{HashEmbedder, MemoryContext, MemoryStack, SummarizeFn};
use mentat_skills::{
    builtins, safe_for_log, CapabilityRegistry, SafetyLayer, SafetyTier, SkillRegistry,
};

use crate::checkpoint::CheckpointStore;
use crate::commands;
use crate::cortex::{ConsciousnessStack, CortexContext};
use crate::error::CognitionError;
use crate::events::{emit, CoreEvent, OnEvent};
use crate::evolution::{EvolutionEngine, MutationKind};
use crate::governor::EthicalGovernor;
use crate::judgment::{JudgmentEngine, JudgmentOutcome};
use crate::mission::MissionControl;
use crate::reflex::ReflexLayer;
use crate::schema::{ActionCall, ActionRecord, AgentResponse, Budget, IntentKind, Sentiment, TaskClass};
use crate::scorecard::Scorecard;
use crate::signals::{CognitiveSignals, Signal};
use crate::world::WorldModel;

/// Hard ceiling on reason-act-observe iterations per request.
pub const MAX_REACT_STEPS: usize = 5;

const SKILL_TIMEOUT_MIN: u64 = 30;
const SKILL_TIMEOUT_MAX: u64 = 120;
const SKILL_TIMEOUT_BUDGET_MULTIPLIER: f64 = 12.0;

/// Total wall-clock cap for pre-fetching shared URLs.
const URL_FETCH_TIMEOUT: Duration = Duration::from_secs(35);

const PLACEHOLDERS: &[&str] = &["processing...", "executing", "thinking", "one moment", "working on it"];

pub struct Controller {
    pub(crate) config: AppConfig,
    pub(crate) data_dir: PathBuf,
    pub(crate) workspace_dir: PathBuf,
    pub(crate) router: Arc<ModelRouter>,
    pub(crate) registry: Arc<SkillRegistry>,
    pub(crate) capabilities: CapabilityRegistry,
    pub(crate) safety: SafetyLayer,
    pub(crate) governor: EthicalGovernor,
    pub(crate) reflex: ReflexLayer,
    pub(crate) judgment: JudgmentEngine,
    pub(crate) cortex: ConsciousnessStack,
    pub(crate) memory: Arc<tokio::sync::Mutex<MemoryStack>>,
    pub(crate) evolution: EvolutionEngine,
    pub(crate) world: Mutex<WorldModel>,
    pub(crate) checkpoints: tokio::sync::Mutex<CheckpointStore>,
    pub(crate) scorecard: Mutex<Scorecard>,
    pub(crate) signals: CognitiveSignals,
    pub(crate) missions: Arc<MissionControl>,
    /// Per-session slot for a medium/destructive action awaiting a yes/no.
    pub(crate) pending_action: Mutex<Option<ActionCall>>,
    interrupt: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Exclusive data-dir lock preventing two cores on one state directory.
    _data_lock: Option<std::fs::File>,
}

impl Controller {
    pub fn new(config: AppConfig) -> Result<Self> {
        let router = Arc::new(ModelRouter::from_config(&config.llm, config.system.air_gap));
        Self::with_router(config, router)
    }

    /// Constructor with an injected router; tests use this to script the
    /// model layer.
    pub fn with_router(config: AppConfig, router: Arc<ModelRouter>) -> Result<Self> {
        let data_dir = PathBuf::from(&config.system.data_dir);
        let workspace_dir = PathBuf::from(&config.system.workspace_dir);
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&workspace_dir)?;

        let data_lock = {
            let lock_path = data_dir.join(".mentat.lock");
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_path)
                .with_context(|| format!("opening lock file {}", lock_path.display()))?;
            match file.try_lock_exclusive() {
                Ok(()) => Some(file),
                Err(_) => {
                    warn!(path = %lock_path.display(), "data dir already locked by another instance");
                    None
                }
            }
        };

        let registry = Arc::new(SkillRegistry::with_persistence(&data_dir));
        builtins::install_defaults(&registry, &workspace_dir, &data_dir);

        let evolution = EvolutionEngine::open(&data_dir);
        if let Err(err) = registry.load_dynamic(evolution.dynamic_dir()) {
            warn!(%err, "dynamic skill load failed at startup");
        }
        if let Err(err) = registry.watch_dynamic(evolution.dynamic_dir()) {
            warn!(%err, "dynamic skill watcher unavailable");
        }

        let embedder = Arc::new(HashEmbedder::default());
        let memory = MemoryStack::open(&data_dir, &config.memory, embedder)?;

        let persona_prompt = format!(
            "You are Mentat ({} persona), a capable, warm personal assistant with full agency \
             over your registered skills. Answer substantively; never stall with filler.",
            config.system.persona
        );
        let cortex = ConsciousnessStack::new(router.clone(), registry.clone(), persona_prompt);

        let governor = EthicalGovernor::new(
            &config.governor.shutdown_token,
            &config.governor.reawaken_phrase,
        );
        let safety = SafetyLayer::new(
            &config.safety.prohibited_patterns,
            &config.safety.confirmation_required,
        );
        let missions = Arc::new(MissionControl::open(&data_dir, config.missions.cpu_load_ceiling));

        Ok(Self {
            reflex: ReflexLayer::new(Some(&data_dir)),
            judgment: JudgmentEngine::new(),
            capabilities: CapabilityRegistry::new(),
            safety,
            governor,
            cortex,
            memory: Arc::new(tokio::sync::Mutex::new(memory)),
            evolution,
            world: Mutex::new(WorldModel::open(&data_dir)),
            checkpoints: tokio::sync::Mutex::new(CheckpointStore::open(&data_dir)?),
            scorecard: Mutex::new(Scorecard::open(&data_dir)),
            signals: CognitiveSignals::new(),
            missions,
            pending_action: Mutex::new(None),
            interrupt: AtomicBool::new(false),
            background: Mutex::new(vec![]),
            _data_lock: data_lock,
            config,
            data_dir,
            workspace_dir,
            router,
            registry,
        })
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn cortex(&self) -> &ConsciousnessStack {
        &self.cortex
    }

    pub fn evolution(&self) -> &EvolutionEngine {
        &self.evolution
    }

    pub fn missions(&self) -> &Arc<MissionControl> {
        &self.missions
    }

    pub fn memory(&self) -> &Arc<tokio::sync::Mutex<MemoryStack>> {
        &self.memory
    }

    /// Preempt the current request from an external UI.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub(crate) fn spawn_tracked(
        &self,
        name: &'static str,
        future: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        debug!(task = name, "spawning tracked background task");
        let handle = tokio::spawn(async move {
            future.await;
        });
        let mut background = self.background.lock().unwrap();
        background.retain(|t| !t.is_finished());
        background.push(handle);
    }

    /// Launch the autonomous mission loop.
    pub fn start_missions(self: &Arc<Self>) {
        if !self.config.missions.enabled {
            return;
        }
        let missions = self.missions.clone();
        let controller = self.clone();
        self.spawn_tracked("mission_control", async move {
            missions.run(controller).await;
        });
    }

    /// Launch the background reflector (memory maintenance + self-analysis).
    pub fn start_reflector(self: &Arc<Self>) {
        let controller = self.clone();
        self.spawn_tracked("reflector", async move {
            crate::reflector::Reflector::default().run(controller).await;
        });
    }

    /// Cancel background tasks, then flush every debounced store.
    pub async fn shutdown(&self) {
        info!("controller shutting down");
        self.missions.stop();
        let tasks: Vec<JoinHandle<()>> = self.background.lock().unwrap().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        self.evolution.flush();
        self.scorecard.lock().unwrap().flush();
        if let Err(err) = self.memory.lock().await.flush().await {
            warn!(%err, "memory flush failed on shutdown");
        }
        info!("shutdown complete");
    }

    // ── The request pipeline ───────────────────────────────────────────────

    pub async fn process_request(
        &self,
        user_input: &str,
        on_event: Option<OnEvent>,
        attachment_paths: &[String],
    ) -> String {
        // Ingress normalization.
        let mut input = user_input.trim().to_string();
        if !attachment_paths.is_empty() {
            input = format!("Attached files: {}\n\n{input}", attachment_paths.join(", "));
        }

        // Governor gate: shutdown, reawaken, quiescent notice, veto.
        if self.governor.check_shutdown(&input) {
            return "Mentat - Quiescent. Shutdown token accepted; capabilities frozen.".to_string();
        }
        if self.governor.is_quiescent() {
            if self.governor.check_reawaken(&input) {
                return "Mentat - Reawakened. Systems online.".to_string();
            }
            return "Status: Quiescent. Systems Frozen.".to_string();
        }

        let wisdom = self.memory.lock().await.insights.wisdom_block(3);
        let semantic_router = if self.config.system.semantic_veto {
            Some(self.router.as_ref())
        } else {
            None
        };
        let (allowed, reason) = self.governor.veto_check(&input, semantic_router, &wisdom).await;
        if !allowed {
            warn!(reason, "request vetoed");
            self.scorecard.lock().unwrap().record("safety_compliance", 1.0, None);
            return CognitionError::Governed(reason).to_string();
        }

        // Safety sanitize + optional LLM scan.
        let safe_input = self.safety.sanitize_request(&input);
        if self.config.system.security_scan_requests {
            let provider = self.router.default_provider();
            let (safe, reason) = self
                .safety
                .scan_request(
                    move |prompt| async move {
                        provider.chat(&[mentat_llm::ChatMessage::user(prompt)], 0.0).await
                    },
                    &safe_input,
                )
                .await;
            if !safe {
                warn!(reason, "security scan refused request");
                return CognitionError::Governed(reason).to_string();
            }
        }

        self.interrupt.store(false, Ordering::SeqCst);
        self.signals.decay();

        // Pending confirmation turn.
        if let Some(reply) = self.handle_pending_confirmation(&input, &on_event).await {
            return reply;
        }

        // Slash commands short-circuit before cognition.
        if let Some(reply) = commands::handle_slash(self, &input).await {
            return reply;
        }

        // Active-context tracking for file mentions.
        if let Ok(re) = Regex::new(r"[\w\-./]+\.(?:rs|py|js|ts|toml|yaml|md|txt)") {
            let mut world = self.world.lock().unwrap();
            for m in re.find_iter(&safe_input) {
                world.set_active_file(m.as_str());
            }
        }

        let task_class = TaskClass::classify(&safe_input);
        let budget = task_class.budget();
        emit(&on_event, CoreEvent::Budget { time_s: budget.time_s });

        if let Err(err) = self.memory.lock().await.working.add_message("user", &safe_input) {
            warn!(%err, "working memory write failed");
        }

        // Judgment + reflex fast path.
        let failure_similarity = self.memory.lock().await.lessons.failure_similarity(&safe_input);
        let verdict = self.judgment.evaluate(&safe_input, false, failure_similarity, 0.5);
        if verdict.outcome == JudgmentOutcome::Refuse {
            return format!("I have to decline. {}", verdict.reason);
        }

        let (cached_reply, reflex_action) = self.reflex.think(&safe_input);
        if let Some(reply) = cached_reply {
            debug!("reflex cache hit");
            let _ = self.memory.lock().await.working.add_message("assistant", &reply);
            return reply;
        }
        if let Some(action) = reflex_action {
            // Learned patterns short-circuit unconditionally; static table
            // matches only when judgment agrees this is a direct command.
            if verdict.outcome == JudgmentOutcome::Reflex || self.reflex.has_learned(&safe_input) {
                return self.run_reflex_action(&safe_input, action, budget, &on_event).await;
            }
        }

        // URL pre-fetch.
        let url_context = self.prefetch_urls(&safe_input).await;

        emit(&on_event, CoreEvent::Status { status: "DELIBERATING".to_string() });
        let memory_context = self.memory.lock().await.full_context(&safe_input);
        let project_instructions = self.project_instructions();

        let (world_context, semantic_paths) = {
            let world = self.world.lock().unwrap();
            (
                world.understanding(),
                world
                    .state
                    .semantic_paths
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>(),
            )
        };
        let modulation = self.signals.modulation();
        let weights = self.evolution.agency_weightings();
        let signals_context = format!("{}, AgencyWeights: {weights:?}", modulation.describe());

        let final_output = self
            .react_loop(
                &safe_input,
                task_class,
                budget,
                memory_context,
                project_instructions,
                url_context,
                world_context,
                semantic_paths,
                signals_context,
                &on_event,
            )
            .await;

        let (final_output, intent_summary, action_summary, confidence) = match final_output {
            Ok(outcome) => outcome,
            Err(reply) => return reply,
        };

        self.post_loop(&final_output, &intent_summary, &action_summary, confidence)
            .await;
        final_output
    }

    // ── Confirmation flow ──────────────────────────────────────────────────

    async fn handle_pending_confirmation(
        &self,
        input: &str,
        on_event: &Option<OnEvent>,
    ) -> Option<String> {
        let pending = self.pending_action.lock().unwrap().clone()?;
        let lower = input.trim().to_lowercase();
        let affirmatives = ["yes", "y", "confirm", "ok", "proceed", "/confirm"];
        let negatives = ["no", "n", "reject", "cancel", "/reject"];

        if affirmatives.contains(&lower.as_str()) {
            *self.pending_action.lock().unwrap() = None;
            let check = self.capabilities.check(&pending.skill_name, &pending.parameters);
            if !check.allowed {
                return Some(format!("Confirmation rejected: capability check failed - {}", check.reason));
            }
            if !self.safety.validate_action(&pending.skill_name, &pending.parameters) {
                return Some(CognitionError::SafetyBlocked("prohibited parameters".into()).to_string());
            }
            if self.zone_blocked(&pending.parameters) {
                return Some("Safety Block: target is in a protected zone.".to_string());
            }
            if self.config.system.shadow_mode {
                return Some(format!(
                    "[Shadow Mode] Would have executed: {}({}). Set shadow_mode = false to run for real.",
                    pending.skill_name,
                    safe_for_log(&pending.parameters.to_string(), Some(120))
                ));
            }
            emit(on_event, CoreEvent::Status { status: format!("EXECUTING {}", pending.skill_name) });
            let budget = TaskClass::General.budget();
            return Some(
                match self.execute_skill(&pending.skill_name, &pending.parameters, budget).await {
                    Ok((result, latency)) => {
                        self.registry.record_execution(&pending.skill_name, true, latency);
                        let digest: String = result.chars().take(500).collect();
                        format!("Done. {digest}")
                    }
                    Err(err) => {
                        self.registry.record_execution(&pending.skill_name, false, 0.0);
                        err.to_string()
                    }
                },
            );
        }
        if negatives.contains(&lower.as_str()) {
            *self.pending_action.lock().unwrap() = None;
            return Some("Action cancelled.".to_string());
        }
        Some("Please confirm with yes/confirm or cancel with no/reject.".to_string())
    }

    // ── Reflex fast path ───────────────────────────────────────────────────

    async fn run_reflex_action(
        &self,
        input: &str,
        action: ActionCall,
        budget: Budget,
        on_event: &Option<OnEvent>,
    ) -> String {
        debug!(skill = %action.skill_name, "reflex fast path");
        match self.gated_execute(&action, budget, on_event).await {
            GateOutcome::Executed(result) => {
                let reply = format!("Done. {}", result.chars().take(500).collect::<String>());
                let _ = self.memory.lock().await.working.add_message("assistant", &reply);
                let mut memory = self.memory.lock().await;
                let _ = memory
                    .record_interaction(input, &action.skill_name, &result, 0.9)
                    .await;
                reply
            }
            GateOutcome::NeedsConfirmation(message)
            | GateOutcome::Blocked(message)
            | GateOutcome::Failed(message) => message,
        }
    }

    // ── ReAct loop ─────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn react_loop(
        &self,
        safe_input: &str,
        task_class: TaskClass,
        budget: Budget,
        memory_context: MemoryContext,
        project_instructions: String,
        url_context: String,
        world_context: String,
        semantic_paths: Vec<(String, String)>,
        signals_context: String,
        on_event: &Option<OnEvent>,
    ) -> Result<(String, String, String, f32), String> {
        let mut use_lite = task_class == TaskClass::General;
        let mut escalated = false;
        let mut action_results: Vec<ActionRecord> = vec![];
        let mut last_response: Option<AgentResponse> = None;
        let mut final_output: Option<String> = None;

        'react: for step in 0..MAX_REACT_STEPS {
            if self.interrupted() {
                return Err("Interrupted. Standing by.".to_string());
            }
            emit(on_event, CoreEvent::Progress { step: step + 1, total_steps: MAX_REACT_STEPS });
            if step > 0 {
                emit(on_event, CoreEvent::Status {
                    status: format!("THINKING [ReAct step {}/{MAX_REACT_STEPS}]", step + 1),
                });
            }

            // Escalation re-runs the same step with the full schema instead
            // of consuming another iteration.
            let response = loop {
                let ctx = CortexContext {
                    memory: memory_context.clone(),
                    project_instructions: project_instructions.clone(),
                    url_context: url_context.clone(),
                    use_lite,
                    use_ensemble: self.config.system.use_ensemble,
                    world_context: world_context.clone(),
                    signals_context: signals_context.clone(),
                    evolution_log: self.evolution.summary(10),
                    action_results: action_results.clone(),
                    semantic_paths: semantic_paths.clone(),
                };
                match self.cortex.process(safe_input, &ctx).await {
                    Ok(response) => {
                        if response.needs_escalation && use_lite && !escalated {
                            info!("escalation triggered: retrying step with full reasoning");
                            use_lite = false;
                            escalated = true;
                            emit(on_event, CoreEvent::Status {
                                status: "ESCALATING (higher reasoning)".to_string(),
                            });
                            continue;
                        }
                        break response;
                    }
                    Err(err) => {
                        error!(%err, "consciousness stack failure");
                        self.signals.adjust(Signal::Frustration, 0.2);
                        return Err(CognitionError::Consciousness(err.to_string()).to_string());
                    }
                }
            };

            emit(on_event, CoreEvent::Thought {
                summary: response.final_thought.intent_summary.clone(),
            });
            emit(on_event, CoreEvent::Model { label: format!("{} core", task_class.label()) });

            // Corrections and frustration become lessons immediately.
            if response.intent == IntentKind::Correction || response.sentiment == Sentiment::Frustrated {
                let mut memory = self.memory.lock().await;
                let prior = memory
                    .working
                    .trace()
                    .iter()
                    .rev()
                    .find(|m| m.role == "assistant")
                    .map(|m| m.content.chars().take(200).collect::<String>());
                if let Some(prior) = prior {
                    let _ = memory.lessons.save_lesson(
                        &format!("When I said '{prior}', the user corrected me: {safe_input}"),
                        "User",
                        "user_correction",
                    );
                }
            }

            let Some(action) = response.action.clone() else {
                // No action: the model is done reasoning.
                let mut reply = response.final_response.clone();
                if reply.trim().is_empty()
                    || PLACEHOLDERS.contains(&reply.trim().to_lowercase().as_str())
                {
                    reply = "Directive processed.".to_string();
                }
                final_output = Some(self.compose_final(&reply, &action_results));
                last_response = Some(response);
                break 'react;
            };
            last_response = Some(response.clone());

            match self.gated_execute(&action, budget, on_event).await {
                GateOutcome::NeedsConfirmation(mut message) => {
                    let reply = response.final_response.trim();
                    if !reply.is_empty() && !PLACEHOLDERS.contains(&reply.to_lowercase().as_str()) {
                        message.push_str("\n\n");
                        message.push_str(reply);
                    }
                    return Err(message);
                }
                GateOutcome::Blocked(message) => {
                    // Capability or safety denial: observed, loop continues.
                    action_results.push(ActionRecord {
                        skill: action.skill_name.clone(),
                        action: format!("{}({})", action.skill_name, action.parameters),
                        result: None,
                        error: Some(message),
                        step: step + 1,
                    });
                    continue 'react;
                }
                GateOutcome::Failed(message) => return Err(message),
                GateOutcome::Executed(result) => {
                    self.signals.adjust(Signal::Confidence, 0.05);
                    if action.skill_name == "system_control" {
                        if let Some(name) = action.parameters.get("name").and_then(|v| v.as_str()) {
                            self.world.lock().unwrap().track_app_usage(name);
                        }
                    }
                    let clipped: String = result.chars().take(1000).collect();
                    action_results.push(ActionRecord {
                        skill: action.skill_name.clone(),
                        action: format!("{}({})", action.skill_name, action.parameters),
                        result: Some(clipped),
                        error: None,
                        step: step + 1,
                    });

                    // No-progress guard: two consecutive empty results from
                    // the same skill end the loop with a summary.
                    if no_progress(&action_results) {
                        info!("react loop: repeated empty results, exiting early");
                        let log = render_steps(&action_results);
                        final_output = Some(self.compress_output(&format!(
                            "I tried {} search steps but didn't find useful results for that. \
                             You can rephrase or try a different question.\n\nExecution log:\n{log}",
                            action_results.len()
                        )));
                        break 'react;
                    }
                    if step == MAX_REACT_STEPS - 1 {
                        let reply = response.final_response.clone();
                        final_output = Some(self.compose_final(&reply, &action_results));
                    }
                }
            }
        }

        let output = final_output.unwrap_or_else(|| {
            "I completed processing but have no output to show.".to_string()
        });

        // Reliability sample for the scorecard.
        let ok = !output.is_empty();
        self.scorecard.lock().unwrap().record("reliability_rate", if ok { 1.0 } else { 0.0 }, None);

        // Cache text-only answers for the reflex layer.
        if let Some(response) = &last_response {
            if response.action.is_none()
                && action_results.is_empty()
                && output.len() < 500
                && response.final_thought.confidence >= 0.7
            {
                self.reflex.cache_reply(safe_input, &output);
            }
        }

        let intent_summary = last_response
            .as_ref()
            .map(|r| r.final_thought.intent_summary.clone())
            .unwrap_or_else(|| "General interaction".to_string());
        let confidence = last_response
            .as_ref()
            .map(|r| r.final_thought.confidence)
            .unwrap_or(1.0);
        let action_summary = if action_results.is_empty() {
            "reply".to_string()
        } else {
            action_results
                .iter()
                .map(|r| r.skill.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        Ok((output, intent_summary, action_summary, confidence))
    }

    // ── Gated execution ────────────────────────────────────────────────────

    async fn gated_execute(
        &self,
        action: &ActionCall,
        budget: Budget,
        on_event: &Option<OnEvent>,
    ) -> GateOutcome {
        let check = self.capabilities.check(&action.skill_name, &action.parameters);
        info!(
            skill = %action.skill_name,
            allowed = check.allowed,
            capability = ?check.capability,
            "capability check"
        );
        if !check.allowed {
            return GateOutcome::Blocked(format!(
                "Action '{}' planned, but capability check failed: {}",
                action.skill_name, check.reason
            ));
        }
        if !self.safety.validate_action(&action.skill_name, &action.parameters) {
            return GateOutcome::Blocked("Action blocked by safety policy.".to_string());
        }

        let declared = self
            .registry
            .get(&action.skill_name)
            .map(|s| s.safety_tier())
            .unwrap_or(SafetyTier::Safe);
        let severity = self
            .safety
            .action_severity(&action.skill_name, declared, &action.parameters);
        if severity.needs_confirmation() {
            *self.pending_action.lock().unwrap() = Some(action.clone());
            let mut message = format!(
                "Safety Check: This is a {} action. Confirm to proceed.",
                severity.label()
            );
            if let Some(preview) = self.diff_preview(action) {
                message.push_str("\n\n");
                message.push_str(&preview);
            }
            return GateOutcome::NeedsConfirmation(message);
        }

        if self.zone_blocked(&action.parameters) {
            warn!("action targets protected zone, aborting");
            return GateOutcome::Failed(
                "Safety Block: my world model flags this target as protected.".to_string(),
            );
        }
        if self.config.system.shadow_mode {
            return GateOutcome::Failed(format!(
                "[Shadow Mode] Would execute: {}({}). Set shadow_mode = false to run for real.",
                action.skill_name,
                safe_for_log(&action.parameters.to_string(), Some(120))
            ));
        }

        emit(on_event, CoreEvent::Status { status: format!("EXECUTING {}", action.skill_name) });
        match self.execute_skill(&action.skill_name, &action.parameters, budget).await {
            Ok((result, latency)) => {
                self.registry.record_execution(&action.skill_name, true, latency);
                GateOutcome::Executed(result)
            }
            Err(err) => {
                self.signals.adjust(Signal::Frustration, 0.3);
                self.registry.record_execution(&action.skill_name, false, 0.0);
                let cause = err.to_string();
                if let Err(persist) = self.memory.lock().await.lessons.save_failure(
                    &action.skill_name,
                    &cause,
                    &action.parameters.to_string(),
                ) {
                    warn!(%persist, "failure lesson not persisted");
                }
                let message = if err.is_timeout() {
                    format!(
                        "I couldn't complete '{}' in time. Try a simpler request or retry.",
                        action.skill_name
                    )
                } else {
                    format!("I must apologize. My attempt to execute '{}' failed: {cause}", action.skill_name)
                };
                GateOutcome::Failed(message)
            }
        }
    }

    /// Execute one skill with checkpointing and a clamped timeout.
    async fn execute_skill(
        &self,
        skill_name: &str,
        params: &Value,
        budget: Budget,
    ) -> Result<(String, f64), CognitionError> {
        let Some(skill) = self.registry.get(skill_name) else {
            return Err(CognitionError::SkillFailure {
                skill: skill_name.to_string(),
                cause: format!("skill '{skill_name}' not found"),
            });
        };

        if matches!(skill_name, "filesystem" | "shell") {
            let targets: Vec<PathBuf> = params
                .get("path")
                .and_then(|v| v.as_str())
                .map(|p| vec![self.workspace_dir.join(p)])
                .unwrap_or_default();
            let mut checkpoints = self.checkpoints.lock().await;
            if let Err(err) = checkpoints
                .take(
                    "ACTION_START",
                    &format!("Executing {skill_name}"),
                    serde_json::json!({ "params": params }),
                    &targets,
                )
                .await
            {
                warn!(%err, "checkpoint failed, continuing without one");
            }
        }

        let limit_secs = (budget.time_s * SKILL_TIMEOUT_BUDGET_MULTIPLIER)
            .clamp(SKILL_TIMEOUT_MIN as f64, SKILL_TIMEOUT_MAX as f64) as u64;
        let started = std::time::Instant::now();
        match tokio::time::timeout(Duration::from_secs(limit_secs), skill.execute(params)).await {
            Ok(Ok(result)) => Ok((result, started.elapsed().as_secs_f64())),
            Ok(Err(err)) => Err(CognitionError::SkillFailure {
                skill: skill_name.to_string(),
                cause: err.to_string(),
            }),
            Err(_) => Err(CognitionError::SkillTimeout {
                skill: skill_name.to_string(),
                limit_secs,
            }),
        }
    }

    fn zone_blocked(&self, params: &Value) -> bool {
        params
            .get("path")
            .and_then(|v| v.as_str())
            .map(|path| self.world.lock().unwrap().is_protected(path))
            .unwrap_or(false)
    }

    /// Short preview of what a pending action would change.
    fn diff_preview(&self, action: &ActionCall) -> Option<String> {
        match action.skill_name.as_str() {
            "filesystem" => {
                let path = action.parameters.get("path").and_then(|v| v.as_str()).unwrap_or("?");
                match action.parameters.get("content").and_then(|v| v.as_str()) {
                    Some(content) => {
                        let first_line = content.lines().next().unwrap_or("");
                        let clipped: String = first_line.chars().take(60).collect();
                        Some(format!(
                            "Target: {path} | new content: {} chars | first line: {clipped}",
                            content.len()
                        ))
                    }
                    None => Some(format!("Target: {path}")),
                }
            }
            "shell" => {
                let command = action.parameters.get("command").and_then(|v| v.as_str()).unwrap_or("?");
                Some(format!("Command: {}", safe_for_log(command, Some(120))))
            }
            _ => None,
        }
    }

    // ── Post-loop bookkeeping ──────────────────────────────────────────────

    async fn post_loop(
        &self,
        final_output: &str,
        intent_summary: &str,
        action_summary: &str,
        confidence: f32,
    ) {
        let mut memory = self.memory.lock().await;
        if let Err(err) = memory.working.add_message("assistant", final_output) {
            warn!(%err, "assistant trace write failed");
        }
        let outcome_digest: String = final_output.chars().take(500).collect();
        let consolidation_due = match memory
            .record_interaction(intent_summary, action_summary, &outcome_digest, confidence)
            .await
        {
            Ok(due) => due,
            Err(err) => {
                warn!(%err, "memory reinforcement failed");
                false
            }
        };
        drop(memory);

        if consolidation_due {
            self.spawn_consolidation();
        }

        // Stable input→action patterns become auditable reflex proposals.
        for candidate in self.cortex.reflex_candidates() {
            self.evolution.propose(
                MutationKind::Reflex,
                &format!("Add reflex shortcut for '{}' -> {}", candidate.input, candidate.skill),
                serde_json::json!({
                    "input": candidate.input,
                    "skill": candidate.skill,
                    "params": candidate.params,
                }),
                Some(&candidate.input),
            );
            if let Err(err) =
                self.evolution
                    .record_success(&candidate.input, &self.reflex, &self.registry)
            {
                warn!(%err, "evolution success recording failed");
            }
        }
    }

    pub(crate) fn spawn_consolidation(&self) {
        // The dream cycle runs detached so the user never waits on it; the
        // summarize hook owns clones of everything it needs.
        let router = self.router.clone();
        let memory = self.memory.clone();
        self.spawn_tracked("memory_consolidation", async move {
            let summarize: SummarizeFn = Arc::new(move |prompt: String| {
                let router = router.clone();
                Box::pin(async move {
                    let provider = router.select(&["reasoning"]);
                    provider
                        .chat(&[mentat_llm::ChatMessage::user(prompt)], 0.3)
                        .await
                        .ok()
                })
            });
            if let Err(err) = memory.lock().await.consolidate(summarize).await {
                warn!(%err, "background consolidation failed");
            }
        });
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    async fn prefetch_urls(&self, input: &str) -> String {
        let Ok(re) = Regex::new(r#"https?://[^\s<>"]+"#) else {
            return String::new();
        };
        let urls: Vec<String> = re
            .find_iter(input)
            .map(|m| m.as_str().to_string())
            .filter(|candidate| url::Url::parse(candidate).is_ok())
            .take(2)
            .collect();
        if urls.is_empty() {
            return String::new();
        }
        let Some(research) = self.registry.get("research") else {
            return String::new();
        };

        let fetches = urls.iter().map(|url| {
            let research = research.clone();
            let url = url.clone();
            async move { research.execute(&serde_json::json!({ "url": url })).await }
        });
        match tokio::time::timeout(URL_FETCH_TIMEOUT, futures::future::join_all(fetches)).await {
            Ok(results) => results
                .into_iter()
                .filter_map(|r| r.ok())
                .collect::<Vec<_>>()
                .join("\n"),
            Err(_) => {
                warn!("url prefetch timed out, continuing without page content");
                String::new()
            }
        }
    }

    /// Project context file, read from the workspace when present.
    fn project_instructions(&self) -> String {
        for name in ["MENTAT.md", "MENTAT_CONTEXT.md"] {
            let path = self.workspace_dir.join(name);
            if let Ok(content) = std::fs::read_to_string(&path) {
                return content.chars().take(32_768).collect();
            }
        }
        String::new()
    }

    fn compose_final(&self, reply: &str, action_results: &[ActionRecord]) -> String {
        if action_results.is_empty() {
            return self.compress_output(reply);
        }
        let clean_logs: Vec<String> = action_results
            .iter()
            .map(|r| r.outcome_text())
            .filter(|text| !(text.starts_with("Searching for") && text.len() < 100))
            .map(|text| format!("* {text}"))
            .collect();
        if clean_logs.is_empty() {
            self.compress_output(reply)
        } else {
            self.compress_output(&format!("{reply}\n\n[TRACE]\n{}", clean_logs.join("\n")))
        }
    }

    /// Strip filler phrases that pad model output.
    fn compress_output(&self, text: &str) -> String {
        let fillers = [
            "I will now",
            "I am going to",
            "Let me see",
            "Starting the process of",
            "Confirmed.",
            "Okay,",
            "Certainly.",
            "Processing...",
            "Executing command:",
        ];
        let mut cleaned = text.to_string();
        for filler in fillers {
            cleaned = cleaned.replace(filler, "");
        }
        let cleaned = cleaned.trim();
        let mut chars = cleaned.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => cleaned.to_string(),
        }
    }
}

enum GateOutcome {
    Executed(String),
    NeedsConfirmation(String),
    Blocked(String),
    Failed(String),
}

/// Two consecutive records from the same skill whose results are both
/// empty-ish mean the loop is spinning.
fn no_progress(action_results: &[ActionRecord]) -> bool {
    if action_results.len() < 2 {
        return false;
    }
    let last_two = &action_results[action_results.len() - 2..];
    if last_two[0].skill != last_two[1].skill {
        return false;
    }
    last_two.iter().all(|record| {
        let text = record.outcome_text().to_lowercase();
        text.is_empty() || text.contains("no results found") || text.contains("search error")
    })
}

fn render_steps(action_results: &[ActionRecord]) -> String {
    action_results
        .iter()
        .map(|r| format!("Step {}: {}", r.step, r.outcome_text()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(skill: &str, result: &str, step: usize) -> ActionRecord {
        ActionRecord {
            skill: skill.to_string(),
            action: format!("{skill}({{}})"),
            result: Some(result.to_string()),
            error: None,
            step,
        }
    }

    #[test]
    fn no_progress_requires_same_skill_and_empty_results() {
        assert!(!no_progress(&[record("research", "No results found.", 1)]));
        assert!(no_progress(&[
            record("research", "No results found.", 1),
            record("research", "no results found", 2),
        ]));
        // Different skills: keep going even with empty results.
        assert!(!no_progress(&[
            record("research", "No results found.", 1),
            record("clock", "", 2),
        ]));
        // Useful results: no early exit.
        assert!(!no_progress(&[
            record("research", "Found 3 results", 1),
            record("research", "No results found.", 2),
        ]));
    }

    #[test]
    fn render_steps_formats_numbered_lines() {
        let rendered = render_steps(&[record("a", "x", 1), record("b", "y", 2)]);
        assert_eq!(rendered, "Step 1: x\nStep 2: y");
    }
}
