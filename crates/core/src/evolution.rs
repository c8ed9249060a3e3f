//! Adaptive self-modification: gradual, auditable behavior changes through
//! proposed-then-approved mutations.
//!
//! Three mutation kinds: reflex shortcuts (pattern promotion), priority
//! weightings (deliberation agency), and skill synthesis (validated
//! manifests, never hot-loaded source).  Status transitions are one-way;
//! three consistent successes auto-apply a pending mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use mentat_llm::{ChatMessage, LlmProvider, ModelRouter};
use mentat_skills::{SkillManifest, SkillRegistry};

use crate::debounce::SyncDebouncer;
use crate::reflex::ReflexLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Reflex,
    Priority,
    SkillSynthesis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Applied,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub id: String,
    pub kind: MutationKind,
    pub description: String,
    pub value: serde_json::Value,
    pub pattern_id: Option<String>,
    pub success_count: u32,
    pub status: MutationStatus,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct EvolutionState {
    pending: Vec<Mutation>,
    applied: Vec<Mutation>,
    history: Vec<Mutation>,
    crystallized_summary: String,
}

pub struct EvolutionEngine {
    state: Mutex<EvolutionState>,
    debouncer: Mutex<SyncDebouncer>,
    path: PathBuf,
    dynamic_dir: PathBuf,
}

impl EvolutionEngine {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        let path = data_dir.join("evolution_mutations.json");
        let dynamic_dir = data_dir.join("dynamic_skills");
        let _ = std::fs::create_dir_all(&dynamic_dir);
        let state = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            state: Mutex::new(state),
            debouncer: Mutex::new(SyncDebouncer::standard()),
            path,
            dynamic_dir,
        }
    }

    pub fn dynamic_dir(&self) -> &Path {
        &self.dynamic_dir
    }

    fn save(&self, force: bool) {
        let snapshot = {
            let state = self.state.lock().unwrap();
            serde_json::to_string_pretty(&*state).unwrap_or_default()
        };
        let path = self.path.clone();
        let writer = move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &snapshot)?;
            Ok(())
        };
        let mut debouncer = self.debouncer.lock().unwrap();
        debouncer.mark_dirty();
        if force {
            debouncer.flush(writer);
        } else {
            debouncer.execute(writer);
        }
    }

    pub fn flush(&self) {
        self.save(true);
    }

    // ── Proposal ───────────────────────────────────────────────────────────

    /// Propose a mutation.  Dedup is by exact description: an equivalent
    /// proposal already pending or applied is dropped.
    pub fn propose(
        &self,
        kind: MutationKind,
        description: &str,
        value: serde_json::Value,
        pattern_id: Option<&str>,
    ) -> Option<String> {
        {
            let state = self.state.lock().unwrap();
            let duplicate = state
                .pending
                .iter()
                .chain(state.applied.iter())
                .any(|m| m.description == description);
            if duplicate {
                return None;
            }
        }
        let id = format!("mut_{}", &Uuid::new_v4().to_string()[..8]);
        let mutation = Mutation {
            id: id.clone(),
            kind,
            description: description.to_string(),
            value,
            pattern_id: pattern_id.map(ToString::to_string),
            success_count: 0,
            status: MutationStatus::Pending,
            created_at: Utc::now(),
            applied_at: None,
            rejected_at: None,
        };
        info!(id = %id, description, "mutation proposed");
        self.state.lock().unwrap().pending.push(mutation);
        self.save(false);
        Some(id)
    }

    pub fn pending(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().pending.clone()
    }

    pub fn applied(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn crystallized_summary(&self) -> String {
        self.state.lock().unwrap().crystallized_summary.clone()
    }

    // ── Transitions ────────────────────────────────────────────────────────

    /// Approve a pending mutation: type-specific apply, then the one-way
    /// pending → applied transition.
    pub fn approve(
        &self,
        mutation_id: &str,
        reflex: &ReflexLayer,
        registry: &Arc<SkillRegistry>,
    ) -> Result<bool> {
        let mutation = {
            let state = self.state.lock().unwrap();
            state.pending.iter().find(|m| m.id == mutation_id).cloned()
        };
        let Some(mutation) = mutation else {
            return Ok(false);
        };

        match mutation.kind {
            MutationKind::Reflex => {
                let input = mutation.value.get("input").and_then(|v| v.as_str()).unwrap_or("");
                let skill = mutation.value.get("skill").and_then(|v| v.as_str()).unwrap_or("");
                let params = mutation.value.get("params").cloned().unwrap_or(serde_json::json!({}));
                if input.is_empty() || skill.is_empty() {
                    bail!("reflex mutation missing input or skill");
                }
                reflex.learn_pattern(input, skill, params)?;
            }
            MutationKind::Priority => {
                // Weightings are derived from the applied list on read; the
                // transition below is the whole apply.
            }
            MutationKind::SkillSynthesis => {
                self.apply_skill_mutation(&mutation, registry)?;
            }
        }

        let mut state = self.state.lock().unwrap();
        let Some(idx) = state.pending.iter().position(|m| m.id == mutation_id) else {
            return Ok(false);
        };
        let mut applied = state.pending.remove(idx);
        applied.status = MutationStatus::Applied;
        applied.applied_at = Some(Utc::now());
        info!(id = %applied.id, "mutation applied");
        state.applied.push(applied);
        drop(state);
        self.save(false);
        Ok(true)
    }

    pub fn reject(&self, mutation_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(idx) = state.pending.iter().position(|m| m.id == mutation_id) else {
            return false;
        };
        let mut rejected = state.pending.remove(idx);
        rejected.status = MutationStatus::Rejected;
        rejected.rejected_at = Some(Utc::now());
        info!(id = %rejected.id, "mutation rejected");
        state.history.push(rejected);
        drop(state);
        self.save(false);
        true
    }

    /// Increment success counters on pending mutations sharing the pattern;
    /// any reaching three auto-applies.
    pub fn record_success(
        &self,
        pattern_id: &str,
        reflex: &ReflexLayer,
        registry: &Arc<SkillRegistry>,
    ) -> Result<Vec<String>> {
        let to_apply: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let mut ready = vec![];
            for mutation in &mut state.pending {
                if mutation.pattern_id.as_deref() == Some(pattern_id) {
                    mutation.success_count += 1;
                    if mutation.success_count >= 3 {
                        ready.push(mutation.id.clone());
                    }
                }
            }
            ready
        };
        for id in &to_apply {
            info!(id = %id, "mutation auto-applying after 3 consistent successes");
            self.approve(id, reflex, registry)?;
        }
        if !to_apply.is_empty() {
            self.save(false);
        }
        Ok(to_apply)
    }

    // ── Derived views ──────────────────────────────────────────────────────

    /// Final agency weightings for the deliberation layer: baseline 1.0 per
    /// trait plus every applied priority mutation's additive adjustments.
    pub fn agency_weightings(&self) -> BTreeMap<String, f64> {
        let mut weights: BTreeMap<String, f64> = [
            ("curiosity", 1.0),
            ("skepticism", 1.0),
            ("efficiency", 1.0),
            ("autonomy", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let state = self.state.lock().unwrap();
        for mutation in state.applied.iter().filter(|m| m.kind == MutationKind::Priority) {
            if let Some(obj) = mutation.value.as_object() {
                for (key, value) in obj {
                    if let (Some(weight), Some(delta)) = (weights.get_mut(key), value.as_f64()) {
                        *weight += delta;
                    }
                }
            }
        }
        weights
    }

    /// Human-readable identity evolution log for prompt injection.
    pub fn summary(&self, limit: usize) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::from("IDENTITY EVOLUTION LOG:\n");
        if !state.crystallized_summary.is_empty() {
            out.push_str(&format!("[CRYSTALLIZED IDENTITY]: {}\n", state.crystallized_summary));
        }
        if state.applied.is_empty() {
            if state.crystallized_summary.is_empty() {
                return "Identity status: stable. No significant deviations from core priors."
                    .to_string();
            }
            return out;
        }

        let recent: Vec<&Mutation> = state.applied.iter().rev().take(limit).collect();
        let reflex_count = recent.iter().filter(|m| m.kind == MutationKind::Reflex).count();
        out.push_str(&format!("RECENT SHIFTS (last {}):\n", recent.len()));
        if reflex_count > 0 {
            out.push_str(&format!(
                "- Compiled {reflex_count} new reflex shortcut(s) for habituated tasks.\n"
            ));
        }
        for mutation in recent.iter().filter(|m| m.kind == MutationKind::Priority) {
            out.push_str(&format!("- {}\n", mutation.description));
        }
        out
    }

    // ── Skill synthesis ────────────────────────────────────────────────────

    fn apply_skill_mutation(&self, mutation: &Mutation, registry: &Arc<SkillRegistry>) -> Result<()> {
        let raw = mutation
            .value
            .get("manifest")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("skill mutation carries no manifest"))?;

        let manifest = SkillManifest::parse(raw)?;
        if let Err(err) = manifest.validate(registry) {
            error!(%err, "skill mutation rejected by manifest validation");
            bail!("skill mutation rejected: {err}");
        }

        let file_path = self.dynamic_dir.join(format!("{}.toml", manifest.name));
        std::fs::write(&file_path, manifest.to_toml()?)?;
        info!(skill = %manifest.name, path = %file_path.display(), "synthesized skill written");
        registry.load_dynamic(&self.dynamic_dir)?;
        Ok(())
    }

    /// Ask the model to synthesize a skill manifest for the task and stage
    /// it as a pending skill_synthesis mutation.
    pub async fn propose_skill(
        &self,
        task_description: &str,
        router: &ModelRouter,
        registry: &Arc<SkillRegistry>,
    ) -> Result<Option<String>> {
        let available = registry.names().join(", ");
        let messages = vec![
            ChatMessage::system(format!(
                "You are the skill forge. Write a TOML skill manifest for this framework.\n\
                 A manifest has: name (snake_case), description, optional tier \
                 (safe|medium|destructive), and one or more [[steps]] blocks, each delegating \
                 to an EXISTING skill with a [steps.params] table. Placeholders: {{input}} for \
                 the invocation input, {{param:NAME}} for named parameters.\n\
                 EXISTING SKILLS: {available}\n\
                 Output ONLY the manifest in a ```toml fenced block."
            )),
            ChatMessage::user(format!("TASK: {task_description}")),
        ];

        let provider = router.select(&["coding", "reasoning"]);
        let reply = provider.chat(&messages, 0.2).await?;
        let Some(raw) = extract_toml_block(&reply) else {
            warn!("skill forge reply carried no toml block");
            return Ok(None);
        };

        let skill_name = SkillManifest::parse(&raw)
            .map(|m| m.name)
            .unwrap_or_else(|_| format!("skill_{}", &Uuid::new_v4().to_string()[..6]));

        Ok(self.propose(
            MutationKind::SkillSynthesis,
            &format!("Forge: new skill '{skill_name}' for {task_description}"),
            serde_json::json!({ "manifest": raw, "skill_name": skill_name }),
            None,
        ))
    }

    /// Compress the applied mutation log into a short narrative summary and
    /// archive the applied list into history.
    pub async fn crystallize_identity(&self, router: &ModelRouter) -> Result<()> {
        let (applied_text, base) = {
            let state = self.state.lock().unwrap();
            if state.applied.is_empty() {
                return Ok(());
            }
            let text = state
                .applied
                .iter()
                .map(|m| format!("- {}", m.description))
                .collect::<Vec<_>>()
                .join("\n");
            (text, state.crystallized_summary.clone())
        };

        let messages = vec![
            ChatMessage::system(
                "You are the meta-cognitive archivist. Compress a log of behavioral mutations \
                 into a single high-level narrative of who this assistant is becoming. \
                 Max 3 sentences. Focus on trajectory, preferences, and agency."
                    .to_string(),
            ),
            ChatMessage::user(format!(
                "CURRENT IDENTITY BASE: {base}\n\nNEW MUTATIONS:\n{applied_text}"
            )),
        ];
        let provider = router.select(&["reasoning"]);
        let summary = provider.chat(&messages, 0.3).await?;

        let mut state = self.state.lock().unwrap();
        state.crystallized_summary = summary.trim().to_string();
        let mut archived: Vec<Mutation> = state.applied.drain(..).collect();
        state.history.append(&mut archived);
        drop(state);
        info!("identity crystallized, applied log archived");
        self.save(false);
        Ok(())
    }
}

fn extract_toml_block(reply: &str) -> Option<String> {
    let start = reply.find("```toml")?;
    let after = &reply[start + "```toml".len()..];
    let end = after.find("```")?;
    let block = after[..end].trim().to_string();
    if block.is_empty() {
        None
    } else {
        Some(block)
    }
}
