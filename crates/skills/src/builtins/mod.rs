//! Built-in skill handlers.
//!
//! The OS-integration surfaces (window control, media keys) are opaque
//! dispatch stubs: the core routes to them and records the outcome, the
//! real platform glue lives outside this workspace.  Research, filesystem
//! and shell are functional.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::registry::SkillRegistry;
use crate::sandbox::PathSandbox;
use crate::{param_str, SafetyTier, Skill};

mod research;

pub use research::ResearchSkill;

/// Register the default skill set plus the surface-command aliases.
pub fn install_defaults(
    registry: &Arc<SkillRegistry>,
    workspace_dir: impl Into<PathBuf>,
    data_dir: impl Into<PathBuf>,
) {
    let workspace_dir = workspace_dir.into();
    let data_dir = data_dir.into();

    registry.register(Arc::new(ClockSkill));
    registry.register(Arc::new(ResearchSkill::new()));
    registry.register(Arc::new(FileSystemSkill::new(&workspace_dir, &data_dir)));
    registry.register(Arc::new(ShellSkill::new(&workspace_dir)));
    registry.register(Arc::new(SystemControlSkill));
    registry.register(Arc::new(MediaControlSkill));

    registry.alias("search", "research");
    registry.alias("read", "research");
    registry.alias("browser", "research");
    registry.alias("time", "clock");
    registry.alias("pause", "media_control");
    registry.alias("play", "media_control");
    registry.alias("volume", "media_control");
    registry.alias("open", "system_control");
}

// ── clock ────────────────────────────────────────────────────────────────────

pub struct ClockSkill;

#[async_trait]
impl Skill for ClockSkill {
    fn name(&self) -> &str {
        "clock"
    }
    fn description(&self) -> &str {
        "Report the current date and time."
    }
    async fn execute(&self, _params: &Value) -> Result<String> {
        let now = chrono::Local::now();
        Ok(format!("It is {} on {}.", now.format("%H:%M"), now.format("%A, %B %e %Y")))
    }
}

// ── filesystem ───────────────────────────────────────────────────────────────

pub struct FileSystemSkill {
    sandbox: PathSandbox,
    workspace_dir: PathBuf,
}

impl FileSystemSkill {
    pub fn new(workspace_dir: &PathBuf, data_dir: &PathBuf) -> Self {
        Self {
            sandbox: PathSandbox::new(workspace_dir, data_dir),
            workspace_dir: workspace_dir.clone(),
        }
    }

    fn resolve_read(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.workspace_dir.join(p)
        }
    }
}

#[async_trait]
impl Skill for FileSystemSkill {
    fn name(&self) -> &str {
        "filesystem"
    }
    fn description(&self) -> &str {
        "Read, write, list or delete files in the workspace."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read", "write", "list", "delete"],
                    "description": "Filesystem operation"
                },
                "path": { "type": "string", "description": "Target path" },
                "content": { "type": "string", "description": "Content for write" }
            },
            "required": ["action", "path"]
        })
    }
    fn safety_tier(&self) -> SafetyTier {
        SafetyTier::Medium
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        let action = param_str(params, "action").unwrap_or("read");
        let path = param_str(params, "path").ok_or_else(|| anyhow!("missing 'path'"))?;

        match action {
            "read" => {
                let target = self.resolve_read(path);
                let content = tokio::fs::read_to_string(&target).await?;
                let truncated: String = content.chars().take(4000).collect();
                Ok(truncated)
            }
            "list" => {
                let target = self.resolve_read(path);
                let mut entries = tokio::fs::read_dir(&target).await?;
                let mut names = vec![];
                while let Some(entry) = entries.next_entry().await? {
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
                names.sort();
                Ok(names.join("\n"))
            }
            "write" | "write_file" => {
                let content = param_str(params, "content").unwrap_or("");
                let resolved = self
                    .sandbox
                    .validate_output_path(self.resolve_read(path).to_str().unwrap_or(path))?;
                if let Some(parent) = resolved.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&resolved, content).await?;
                info!(path = %resolved.display(), bytes = content.len(), "file written");
                Ok(format!("Wrote {} bytes to {}", content.len(), resolved.display()))
            }
            "delete" | "delete_file" => {
                let resolved = self
                    .sandbox
                    .validate_output_path(self.resolve_read(path).to_str().unwrap_or(path))?;
                tokio::fs::remove_file(&resolved).await?;
                Ok(format!("Deleted {}", resolved.display()))
            }
            other => bail!("unknown filesystem action '{other}'"),
        }
    }
}

// ── shell ────────────────────────────────────────────────────────────────────

pub struct ShellSkill {
    working_dir: PathBuf,
}

impl ShellSkill {
    pub fn new(working_dir: &PathBuf) -> Self {
        Self { working_dir: working_dir.clone() }
    }
}

#[async_trait]
impl Skill for ShellSkill {
    fn name(&self) -> &str {
        "shell"
    }
    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command line" }
            },
            "required": ["command"]
        })
    }
    fn safety_tier(&self) -> SafetyTier {
        SafetyTier::Destructive
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        let command = param_str(params, "command").ok_or_else(|| anyhow!("missing 'command'"))?;
        debug!(command, "running shell command");
        let _ = std::fs::create_dir_all(&self.working_dir);
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = String::new();
        combined.push_str(stdout.trim_end());
        if !stderr.trim().is_empty() {
            combined.push_str("\n[stderr] ");
            combined.push_str(stderr.trim_end());
        }
        let truncated: String = combined.chars().take(4000).collect();
        if output.status.success() {
            Ok(if truncated.is_empty() { "(no output)".to_string() } else { truncated })
        } else {
            bail!("command exited with {}: {truncated}", output.status)
        }
    }
}

// ── desktop stubs ────────────────────────────────────────────────────────────

pub struct SystemControlSkill;

#[async_trait]
impl Skill for SystemControlSkill {
    fn name(&self) -> &str {
        "system_control"
    }
    fn description(&self) -> &str {
        "Open applications, type, click, scroll and press keys."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["open_app", "type", "click", "scroll", "press"],
                    "description": "Desktop action"
                },
                "name": { "type": "string", "description": "Application name for open_app" },
                "text": { "type": "string", "description": "Text for type" },
                "key": { "type": "string", "description": "Key for press" },
                "x": { "type": "integer" },
                "y": { "type": "integer" },
                "amount": { "type": "integer" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        let action = param_str(params, "action").ok_or_else(|| anyhow!("missing 'action'"))?;
        let detail = param_str(params, "name")
            .or_else(|| param_str(params, "text"))
            .or_else(|| param_str(params, "key"))
            .unwrap_or("");
        info!(action, detail, "system control dispatched");
        Ok(if detail.is_empty() {
            format!("system_control: {action} dispatched")
        } else {
            format!("system_control: {action} '{detail}' dispatched")
        })
    }
}

pub struct MediaControlSkill;

#[async_trait]
impl Skill for MediaControlSkill {
    fn name(&self) -> &str {
        "media_control"
    }
    fn description(&self) -> &str {
        "Control media playback: play/pause, track skip, volume, mute."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["play_pause", "stop", "next_track", "prev_track", "mute", "volume_up", "volume_down"],
                    "description": "Media action"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        let action = param_str(params, "action").ok_or_else(|| anyhow!("missing 'action'"))?;
        info!(action, "media control dispatched");
        Ok(format!("media_control: {action} dispatched"))
    }
}

/// Encode a query for URL embedding.
pub(crate) fn url_encode(query: &str) -> String {
    utf8_percent_encode(query, NON_ALPHANUMERIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clock_reports_a_time_like_string() {
        let out = ClockSkill.execute(&json!({})).await.unwrap();
        assert!(out.contains(':'), "expected HH:MM in '{out}'");
    }

    #[tokio::test]
    async fn filesystem_write_then_read_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace)?;
        let skill = FileSystemSkill::new(&workspace, &dir.path().join("data"));

        let target = workspace.join("report.txt");
        skill
            .execute(&json!({"action": "write", "path": target.to_str().unwrap(), "content": "Hi"}))
            .await?;
        let read = skill
            .execute(&json!({"action": "read", "path": target.to_str().unwrap()}))
            .await?;
        assert_eq!(read, "Hi");
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_write_outside_sandbox_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace)?;
        let skill = FileSystemSkill::new(&workspace, &dir.path().join("data"));

        let result = skill
            .execute(&json!({"action": "write", "path": "/tmp/escape.txt", "content": "x"}))
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn relative_paths_resolve_under_workspace() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace)?;
        let skill = FileSystemSkill::new(&workspace, &dir.path().join("data"));

        skill
            .execute(&json!({"action": "write", "path": "notes.txt", "content": "rel"}))
            .await?;
        assert!(workspace.join("notes.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn shell_captures_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let skill = ShellSkill::new(&dir.path().to_path_buf());
        let out = skill.execute(&json!({"command": "echo hello"})).await?;
        assert_eq!(out, "hello");
        Ok(())
    }

    #[tokio::test]
    async fn shell_failure_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let skill = ShellSkill::new(&dir.path().to_path_buf());
        assert!(skill.execute(&json!({"command": "exit 3"})).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn desktop_stubs_acknowledge_dispatch() {
        let out = SystemControlSkill
            .execute(&json!({"action": "open_app", "name": "notepad"}))
            .await
            .unwrap();
        assert!(out.contains("open_app"));
        assert!(out.contains("notepad"));

        let out = MediaControlSkill.execute(&json!({"action": "play_pause"})).await.unwrap();
        assert!(out.contains("play_pause"));
    }

    #[test]
    fn install_defaults_registers_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SkillRegistry::new());
        install_defaults(&registry, dir.path().join("ws"), dir.path().join("data"));

        assert!(registry.get("clock").is_some());
        assert!(registry.get("research").is_some());
        assert!(registry.get("search").is_some(), "alias should resolve");
        assert!(registry.get("media_control").is_some());
    }
}
