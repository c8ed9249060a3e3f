use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::manifest::{DynamicSkill, SkillManifest};
use crate::Skill;

/// Per-skill reliability telemetry.  `avg_latency` is a running mean over
/// all attempts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillMetric {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency: f64,
}

impl SkillMetric {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Name-keyed catalog of skills with aliases, execution telemetry, tool
/// definition export and dynamic manifest discovery.
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<dyn Skill>>>,
    aliases: RwLock<HashMap<String, String>>,
    metrics: Mutex<HashMap<String, SkillMetric>>,
    metrics_path: Option<PathBuf>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
            metrics_path: None,
            watcher: Mutex::new(None),
        }
    }

    /// Registry with metric persistence under `data_dir`.
    pub fn with_persistence(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join("skill_metrics.json");
        let metrics = if path.exists() {
            std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default()
        } else {
            HashMap::new()
        };
        Self {
            skills: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            metrics: Mutex::new(metrics),
            metrics_path: Some(path),
            watcher: Mutex::new(None),
        }
    }

    pub fn register(&self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        let mut skills = self.skills.write().unwrap();
        if skills.contains_key(&name) {
            warn!(skill = %name, "overwriting existing skill");
        }
        info!(skill = %name, "registered skill");
        skills.insert(name, skill);
    }

    /// Register an alias only when the target skill exists.
    pub fn alias(&self, alias: &str, target: &str) {
        if self.skills.read().unwrap().contains_key(target) {
            self.aliases
                .write()
                .unwrap()
                .insert(alias.to_string(), target.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        let skills = self.skills.read().unwrap();
        if let Some(skill) = skills.get(name) {
            return Some(skill.clone());
        }
        let aliases = self.aliases.read().unwrap();
        aliases.get(name).and_then(|target| skills.get(target).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    // ── Telemetry ──────────────────────────────────────────────────────────

    pub fn record_execution(&self, skill_name: &str, success: bool, latency: f64) {
        let mut metrics = self.metrics.lock().unwrap();
        let m = metrics.entry(skill_name.to_string()).or_default();
        m.attempts += 1;
        if success {
            m.successes += 1;
        } else {
            m.failures += 1;
        }
        m.avg_latency = (m.avg_latency * (m.attempts - 1) as f64 + latency) / m.attempts as f64;

        if let Some(path) = &self.metrics_path {
            if let Err(err) = std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))
                .and_then(|_| {
                    std::fs::write(path, serde_json::to_string_pretty(&*metrics).unwrap_or_default())
                })
            {
                warn!(%err, "failed to persist skill metrics");
            }
        }
    }

    pub fn metric(&self, skill_name: &str) -> Option<SkillMetric> {
        self.metrics.lock().unwrap().get(skill_name).cloned()
    }

    /// Formatted reliability string, e.g. `"95% Success (0.42s) RELIABLE"`.
    pub fn reliability(&self, skill_name: &str) -> String {
        let Some(m) = self.metric(skill_name) else {
            return "(Untested)".to_string();
        };
        if m.attempts == 0 {
            return "(Untested)".to_string();
        }
        let rate = m.success_rate() * 100.0;
        let status = if rate < 50.0 {
            " UNSTABLE"
        } else if rate > 90.0 {
            " RELIABLE"
        } else {
            ""
        };
        format!("{rate:.0}% Success ({:.2}s){status}", m.avg_latency)
    }

    /// Skill catalog with metrics, formatted for LLM context.
    pub fn context_description(&self) -> String {
        let mut lines = vec!["TOOLS (with performance metrics):".to_string()];
        for name in self.names() {
            if let Some(skill) = self.get(&name) {
                lines.push(format!("- {name}: {} [{}]", skill.description(), self.reliability(&name)));
            }
        }
        lines.join("\n")
    }

    /// Tool definitions for native tool calling; only skills that declare a
    /// non-empty parameter schema are exported.
    pub fn tool_definitions(&self) -> Value {
        let defs: Vec<Value> = self
            .names()
            .iter()
            .filter_map(|name| self.get(name))
            .filter(|skill| {
                skill
                    .schema()
                    .as_object()
                    .map(|o| !o.is_empty())
                    .unwrap_or(false)
            })
            .map(|skill| skill.tool_definition())
            .collect();
        Value::Array(defs)
    }

    /// Chronically unstable or slow skills, for the reflector.
    pub fn refactor_recommendations(&self) -> Vec<String> {
        let metrics = self.metrics.lock().unwrap();
        let mut recommendations = vec![];
        for (name, m) in metrics.iter() {
            if m.attempts <= 5 {
                continue;
            }
            let rate = m.success_rate() * 100.0;
            if rate < 70.0 {
                recommendations.push(format!(
                    "Skill '{name}' is unstable ({rate:.0}% success over {} tries). \
                     Consider simplifying its parameter schema.",
                    m.attempts
                ));
            } else if m.avg_latency > 5.0 {
                recommendations.push(format!(
                    "Skill '{name}' is slow (avg {:.1}s). Consider splitting it into smaller steps.",
                    m.avg_latency
                ));
            }
        }
        recommendations
    }

    // ── Dynamic manifest skills ────────────────────────────────────────────

    /// Load every validated `*.toml` skill manifest under `dir` and register
    /// the resulting dynamic skills.  Invalid manifests are skipped with a
    /// log line.
    pub fn load_dynamic(self: &Arc<Self>, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match SkillManifest::load(&path) {
                Ok(manifest) => match manifest.validate(self) {
                    Ok(()) => {
                        let name = manifest.name.clone();
                        self.register(Arc::new(DynamicSkill::new(manifest, Arc::downgrade(self))));
                        info!(skill = %name, path = %path.display(), "dynamic skill loaded");
                        loaded += 1;
                    }
                    Err(err) => warn!(path = %path.display(), %err, "dynamic skill manifest rejected"),
                },
                Err(err) => warn!(path = %path.display(), %err, "dynamic skill manifest unreadable"),
            }
        }
        Ok(loaded)
    }

    /// Watch the dynamic skill directory and hot-load manifests as they are
    /// written (the evolution engine drops approved manifests there).
    pub fn watch_dynamic(self: &Arc<Self>, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let registry = Arc::downgrade(self);
        let watch_dir = dir.clone();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let Ok(event) = event else { return };
            if !matches!(event.kind, notify::EventKind::Create(_) | notify::EventKind::Modify(_)) {
                return;
            }
            if let Some(registry) = registry.upgrade() {
                if let Err(err) = registry.load_dynamic(&watch_dir) {
                    error!(%err, "dynamic skill reload failed");
                }
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        *self.watcher.lock().unwrap() = Some(watcher);
        Ok(())
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SafetyTier, Skill};
    use async_trait::async_trait;

    struct Dummy {
        name: String,
        with_schema: bool,
    }

    #[async_trait]
    impl Skill for Dummy {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "dummy"
        }
        fn schema(&self) -> Value {
            if self.with_schema {
                serde_json::json!({
                    "type": "object",
                    "properties": { "q": { "type": "string" } },
                    "required": ["q"]
                })
            } else {
                serde_json::json!({})
            }
        }
        fn safety_tier(&self) -> SafetyTier {
            SafetyTier::Safe
        }
        async fn execute(&self, _params: &Value) -> Result<String> {
            Ok(format!("ran {}", self.name))
        }
    }

    fn dummy(name: &str, with_schema: bool) -> Arc<dyn Skill> {
        Arc::new(Dummy { name: name.into(), with_schema })
    }

    #[test]
    fn register_get_and_alias() {
        let registry = SkillRegistry::new();
        registry.register(dummy("research", false));
        registry.alias("search", "research");
        registry.alias("ghost", "missing");

        assert!(registry.get("research").is_some());
        assert!(registry.get("search").is_some());
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn metrics_keep_running_mean_latency() {
        let registry = SkillRegistry::new();
        registry.record_execution("x", true, 2.0);
        registry.record_execution("x", false, 4.0);

        let m = registry.metric("x").unwrap();
        assert_eq!(m.attempts, 2);
        assert_eq!(m.successes, 1);
        assert_eq!(m.failures, 1);
        assert!((m.avg_latency - 3.0).abs() < 1e-9);
    }

    #[test]
    fn reliability_formats_status() {
        let registry = SkillRegistry::new();
        assert_eq!(registry.reliability("never"), "(Untested)");
        for _ in 0..20 {
            registry.record_execution("good", true, 0.1);
        }
        assert!(registry.reliability("good").contains("RELIABLE"));
    }

    #[test]
    fn tool_definitions_skip_schemaless_skills() {
        let registry = SkillRegistry::new();
        registry.register(dummy("with", true));
        registry.register(dummy("without", false));

        let defs = registry.tool_definitions();
        let arr = defs.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["function"]["name"], "with");
    }

    #[test]
    fn refactor_recommendations_flag_unstable_skills() {
        let registry = SkillRegistry::new();
        for _ in 0..10 {
            registry.record_execution("flaky", false, 0.1);
        }
        let recs = registry.refactor_recommendations();
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("flaky"));
    }

    #[test]
    fn metrics_persist_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let registry = SkillRegistry::with_persistence(dir.path());
            registry.record_execution("persisted", true, 1.0);
        }
        let registry = SkillRegistry::with_persistence(dir.path());
        assert_eq!(registry.metric("persisted").unwrap().attempts, 1);
        Ok(())
    }
}
