//! Persistent internal model of the environment: known apps, safety zones,
//! semantic paths, user habits and a codebase graph.  Unlike memory, this
//! is absolute stateful understanding.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppUsage {
    pub status: String,
    pub last_used: Option<DateTime<Utc>>,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Habit {
    pub pattern: String,
    pub frequency: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModuleInfo {
    pub imports: Vec<String>,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorldState {
    pub apps: BTreeMap<String, AppUsage>,
    /// path → tier ("protected" blocks actions targeting it).
    pub safety_zones: BTreeMap<String, String>,
    /// path → human purpose, e.g. "Active Project: garden".
    pub semantic_paths: BTreeMap<String, String>,
    pub user_habits: Vec<Habit>,
    pub codebase_graph: BTreeMap<String, ModuleInfo>,
    /// Most recently referenced files, hottest first, capped at 5.
    pub active_context: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct WorldModel {
    path: PathBuf,
    pub state: WorldState,
}

impl WorldModel {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join("world_state.json");
        let state = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { path, state }
    }

    pub fn save(&mut self) -> Result<()> {
        self.state.last_updated = Some(Utc::now());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.state)?)?;
        Ok(())
    }

    pub fn track_app_usage(&mut self, app_name: &str) {
        let entry = self.state.apps.entry(app_name.to_string()).or_default();
        entry.status = "known".to_string();
        entry.last_used = Some(Utc::now());
        entry.count += 1;
        let _ = self.save();
    }

    pub fn define_safety_zone(&mut self, path: &str, tier: &str) {
        self.state.safety_zones.insert(path.to_string(), tier.to_string());
        let _ = self.save();
    }

    pub fn is_protected(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        self.state
            .safety_zones
            .iter()
            .any(|(zone, tier)| tier == "protected" && path.starts_with(zone.as_str()))
    }

    pub fn map_path(&mut self, path: &str, purpose: &str) {
        self.state.semantic_paths.insert(path.to_string(), purpose.to_string());
        let _ = self.save();
    }

    /// Track the hottest file context, most recent first, capped at 5.
    pub fn set_active_file(&mut self, file_path: &str) {
        self.state.active_context.retain(|p| p != file_path);
        self.state.active_context.insert(0, file_path.to_string());
        self.state.active_context.truncate(5);
        let _ = self.save();
    }

    pub fn add_habit(&mut self, pattern: &str, frequency: &str) {
        self.state.user_habits.push(Habit {
            pattern: pattern.to_string(),
            frequency: frequency.to_string(),
            recorded_at: Utc::now(),
        });
        if self.state.user_habits.len() > 10 {
            self.state.user_habits.remove(0);
        }
        let _ = self.save();
    }

    /// Autonomous world discovery: identify projects and auto-protect
    /// generated/dependency directories.  Gitignore rules are respected.
    pub fn analyze_workspace(&mut self, root_dir: &Path) {
        info!(root = %root_dir.display(), "world model: workspace scan");
        let project_markers = [".git", "Cargo.toml", "package.json", "pyproject.toml"];
        let protected_dirs = ["target", "node_modules", ".venv", "dist", "build", "__pycache__"];

        let mut discovered = 0;
        let walker = ignore::WalkBuilder::new(root_dir)
            .max_depth(Some(3))
            .hidden(false)
            .build();
        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase());

            if let Some(name) = &name {
                if protected_dirs.contains(&name.as_str()) {
                    let key = path.to_string_lossy().to_string();
                    if !self.state.safety_zones.contains_key(&key) {
                        debug!(zone = %key, "auto-protecting generated directory");
                        self.state.safety_zones.insert(key, "protected".to_string());
                        discovered += 1;
                    }
                    continue;
                }
            }

            let is_project = project_markers
                .iter()
                .any(|marker| path.join(marker).exists());
            if is_project {
                let key = path.to_string_lossy().to_string();
                if !self.state.semantic_paths.contains_key(&key) {
                    let purpose = format!(
                        "Active Project: {}",
                        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                    );
                    self.state.semantic_paths.insert(key, purpose);
                    discovered += 1;
                }
            }
        }
        if discovered > 0 {
            info!(discovered, "workspace scan found new landmarks");
            let _ = self.save();
        }
    }

    /// Build a structural map of the workspace's Rust sources: per-file
    /// imports (`use`/`mod` lines) and sizes.
    pub fn scan_codebase(&mut self, root_dir: &Path) {
        info!(root = %root_dir.display(), "world model: codebase graph scan");
        let import_re = match Regex::new(r"(?m)^\s*(?:pub\s+)?(?:use|mod)\s+([A-Za-z0-9_:]+)") {
            Ok(re) => re,
            Err(err) => {
                warn!(%err, "import regex failed");
                return;
            }
        };

        let mut graph = BTreeMap::new();
        let walker = ignore::WalkBuilder::new(root_dir).build();
        for entry in walker.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let imports: Vec<String> = import_re
                .captures_iter(&content)
                .map(|c| c[1].to_string())
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            let rel = path
                .strip_prefix(root_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            graph.insert(rel, ModuleInfo { imports, size: content.len() });
        }
        info!(modules = graph.len(), "codebase graph complete");
        self.state.codebase_graph = graph;
        let _ = self.save();
    }

    /// Summarized textual world understanding for prompt injection.
    pub fn understanding(&self) -> String {
        let apps: Vec<&String> = self.state.apps.keys().take(5).collect();
        let zones: Vec<String> = self
            .state
            .safety_zones
            .iter()
            .take(3)
            .map(|(k, v)| format!("{k}({v})"))
            .collect();
        let paths: Vec<&String> = self.state.semantic_paths.values().take(5).collect();
        let habits: Vec<&str> = self
            .state
            .user_habits
            .iter()
            .rev()
            .take(3)
            .map(|h| h.pattern.as_str())
            .collect();

        let mut out = String::from("WORLD MODEL AWARENESS:\n");
        if !apps.is_empty() {
            out.push_str(&format!("- Identified apps: {}\n", apps.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
        }
        if !paths.is_empty() {
            out.push_str(&format!("- Known projects: {}\n", paths.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
        }
        if !habits.is_empty() {
            out.push_str(&format!("- Personal habits: {}\n", habits.join(", ")));
        }
        if !zones.is_empty() {
            out.push_str(&format!("- Safety rules: {}\n", zones.join(", ")));
        }

        let graph_size = self.state.codebase_graph.len();
        if graph_size > 0 {
            out.push_str(&format!("- Codebase graph: {graph_size} modules mapped. "));
            if let Some(focus) = self.state.active_context.first() {
                out.push_str(&format!("Focus: {focus}. "));
                let stem = Path::new(focus)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !stem.is_empty() {
                    let dependents: Vec<&String> = self
                        .state
                        .codebase_graph
                        .iter()
                        .filter(|(file, info)| {
                            *file != focus && info.imports.iter().any(|i| i.contains(&stem))
                        })
                        .map(|(file, _)| file)
                        .take(3)
                        .collect();
                    if !dependents.is_empty() {
                        out.push_str(&format!(
                            "Impacted by changes to {focus}: {}.",
                            dependents.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                        ));
                    }
                }
            }
        }
        out
    }
}
