use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub data_dir: String,
    pub workspace_dir: String,
    /// When true, actions are simulated and reported instead of executed.
    pub shadow_mode: bool,
    /// When true, only local model profiles are eligible for routing.
    pub air_gap: bool,
    /// Run every inbound request through an LLM security scan before cognition.
    pub security_scan_requests: bool,
    /// Enable the governor's semantic (LLM) veto layer on top of patterns.
    pub semantic_veto: bool,
    /// Enable the internal specialist ensemble for complex intents.
    pub use_ensemble: bool,
    pub persona: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            workspace_dir: "./workspace".to_string(),
            shadow_mode: false,
            air_gap: false,
            security_scan_requests: false,
            semantic_veto: true,
            use_ensemble: true,
            persona: "sovereign".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelProfile {
    /// "ollama" | "openai" | "mock"
    pub provider: String,
    pub model_name: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key (remote providers).
    pub api_key_env: String,
    /// Declared capabilities, e.g. ["reasoning", "coding", "fast_response"].
    pub capabilities: Vec<String>,
    /// Routing priority 1-4, higher wins on capability matches.
    pub priority: u32,
    pub supports_native_tools: bool,
    pub supports_vision: bool,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model_name: "llama3.1:8b".to_string(),
            base_url: "http://127.0.0.1:11434".to_string(),
            api_key_env: String::new(),
            capabilities: vec!["general".to_string()],
            priority: 2,
            supports_native_tools: true,
            supports_vision: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Named model profiles; the router scores these per request.
    pub profiles: std::collections::BTreeMap<String, ModelProfile>,
    pub default_profile: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut profiles = std::collections::BTreeMap::new();
        profiles.insert(
            "chatter".to_string(),
            ModelProfile {
                capabilities: vec![
                    "general".to_string(),
                    "chatter".to_string(),
                    "fast_response".to_string(),
                ],
                ..Default::default()
            },
        );
        profiles.insert(
            "heavy-thinker".to_string(),
            ModelProfile {
                model_name: "qwen2.5:14b".to_string(),
                capabilities: vec!["reasoning".to_string(), "coding".to_string()],
                priority: 3,
                ..Default::default()
            },
        );
        Self {
            profiles,
            default_profile: "chatter".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Working-memory turn limit; clamped to 10..=20 at load.
    pub short_term_limit: usize,
    /// Episodes older than this with access_count < 3 are decay-pruned.
    pub retention_days: i64,
    /// A dream cycle is scheduled every N recorded episodes.
    pub consolidation_every: u64,
    /// Lessons unaccessed for this many days are pruned.
    pub lesson_prune_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_limit: 15,
            retention_days: 60,
            consolidation_every: 20,
            lesson_prune_days: 30,
        }
    }
}

impl MemoryConfig {
    pub fn clamped_short_term_limit(&self) -> usize {
        self.short_term_limit.clamp(10, 20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SafetyConfig {
    /// Skills that always require an explicit confirmation turn.
    pub confirmation_required: Vec<String>,
    /// Extra prohibited parameter patterns on top of the built-in table.
    pub prohibited_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Exact literal that freezes the system (Quiescent).
    pub shutdown_token: String,
    /// Exact literal phrase that lifts the freeze.
    pub reawaken_phrase: String,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            shutdown_token: "970317".to_string(),
            reawaken_phrase: "mentat, reawaken - continuity priority alpha".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub enabled: bool,
    /// Mission steps are deferred while system load exceeds this fraction.
    pub cpu_load_ceiling: f32,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_load_ceiling: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Optional log file directory; empty disables file logging.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub safety: SafetyConfig,
    pub governor: GovernorConfig,
    pub missions: MissionConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load config from a TOML file, then overlay environment variables so
    /// users can configure via .env without editing the file.  A missing
    /// file yields defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_overlay();
        Ok(config)
    }

    fn apply_env_overlay(&mut self) {
        if let Ok(value) = env::var("MENTAT_DATA_DIR") {
            if !value.is_empty() {
                self.system.data_dir = value;
            }
        }
        if let Ok(value) = env::var("MENTAT_WORKSPACE_DIR") {
            if !value.is_empty() {
                self.system.workspace_dir = value;
            }
        }
        if let Ok(value) = env::var("MENTAT_PERSONA") {
            if !value.trim().is_empty() {
                self.system.persona = value.trim().to_string();
            }
        }
        if env_flag("MENTAT_SHADOW_MODE") {
            self.system.shadow_mode = true;
        }
        if env_flag("MENTAT_AIR_GAP") {
            self.system.air_gap = true;
        }
        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                for profile in self.llm.profiles.values_mut() {
                    if profile.provider == "ollama" {
                        profile.base_url = value.clone();
                    }
                }
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn default_model(&self) -> Option<&ModelProfile> {
        self.llm.profiles.get(&self.llm.default_profile)
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.governor.shutdown_token, "970317");
        assert_eq!(config.memory.clamped_short_term_limit(), 15);
        assert!(config.default_model().is_some());
    }

    #[test]
    fn short_term_limit_is_clamped() {
        let mut config = AppConfig::default();
        config.memory.short_term_limit = 3;
        assert_eq!(config.memory.clamped_short_term_limit(), 10);
        config.memory.short_term_limit = 99;
        assert_eq!(config.memory.clamped_short_term_limit(), 20);
    }

    #[test]
    fn round_trips_through_toml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mentat.toml");

        let mut config = AppConfig::default();
        config.system.shadow_mode = true;
        config.missions.cpu_load_ceiling = 0.5;
        config.save_to(&path)?;

        let loaded = AppConfig::load_from(&path)?;
        assert!(loaded.system.shadow_mode);
        assert_eq!(loaded.missions.cpu_load_ceiling, 0.5);
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let loaded = AppConfig::load_from("/nonexistent/mentat.toml")?;
        assert_eq!(loaded.llm.default_profile, "chatter");
        Ok(())
    }

    #[test]
    fn partial_toml_fills_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[system]\ndata_dir = \"/tmp/mentat\"\n")?;

        let loaded = AppConfig::load_from(&path)?;
        assert_eq!(loaded.system.data_dir, "/tmp/mentat");
        assert_eq!(loaded.memory.consolidation_every, 20);
        Ok(())
    }
}
