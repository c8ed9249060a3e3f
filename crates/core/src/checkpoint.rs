//! Checkpoints: snapshots taken before file-mutating or shell actions,
//! with timestamped file backups that `/restore` can revert to.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use mentat_memory::EventLog;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub description: String,
    pub metadata: serde_json::Value,
    /// Pairs of `(original_path, backup_path)` this snapshot can restore.
    #[serde(default)]
    pub backups: Vec<(PathBuf, PathBuf)>,
}

pub struct CheckpointStore {
    log: EventLog<Snapshot>,
    snapshots: Vec<Snapshot>,
    backup_dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let backup_dir = data_dir.join("backups");
        std::fs::create_dir_all(&backup_dir)?;
        let log: EventLog<Snapshot> = EventLog::new(data_dir.join("snapshots.jsonl"));
        let snapshots = log.load()?;
        Ok(Self { log, snapshots, backup_dir })
    }

    /// Record a snapshot, backing up each existing target file first.
    pub async fn take(
        &mut self,
        event_type: &str,
        description: &str,
        metadata: serde_json::Value,
        target_files: &[PathBuf],
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string()[..8].to_string();
        let mut backups = vec![];
        for target in target_files {
            if let Some(backup) = self.backup_file(target)? {
                backups.push((target.clone(), backup));
            }
        }
        let snapshot = Snapshot {
            id: id.clone(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            description: description.to_string(),
            metadata,
            backups,
        };
        info!(id = %snapshot.id, description, "checkpoint taken");
        self.log.append(&snapshot).await?;
        self.snapshots.push(snapshot);
        Ok(id)
    }

    /// Copy an existing file into the backup directory with a timestamped
    /// name.  Missing files are skipped (the action is creating them).
    fn backup_file(&self, target: &Path) -> Result<Option<PathBuf>> {
        if !target.exists() {
            return Ok(None);
        }
        let filename = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%f");
        let backup = self.backup_dir.join(format!("{stamp}_{filename}"));
        std::fs::copy(target, &backup)?;
        Ok(Some(backup))
    }

    pub fn list(&self, limit: usize) -> Vec<&Snapshot> {
        self.snapshots.iter().rev().take(limit).collect()
    }

    /// Restore every file a snapshot backed up.  Returns a human-readable
    /// status line.
    pub fn restore(&self, id: &str) -> Result<String> {
        let Some(snapshot) = self.snapshots.iter().find(|s| s.id == id) else {
            bail!("no checkpoint with id '{id}'");
        };
        if snapshot.backups.is_empty() {
            return Ok(format!(
                "Checkpoint {id} recorded '{}' but has no file backups to restore.",
                snapshot.description
            ));
        }
        let mut restored = 0;
        for (original, backup) in &snapshot.backups {
            if backup.exists() {
                std::fs::copy(backup, original)?;
                restored += 1;
            }
        }
        info!(id, restored, "checkpoint restored");
        Ok(format!("Restored {restored} file(s) from checkpoint {id}."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn take_and_list_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = CheckpointStore::open(dir.path())?;
        store
            .take("ACTION_START", "Executing filesystem", json!({"skill": "filesystem"}), &[])
            .await?;

        assert_eq!(store.list(10).len(), 1);
        assert_eq!(store.list(10)[0].event_type, "ACTION_START");

        // Survives reopen via the JSONL log.
        let store = CheckpointStore::open(dir.path())?;
        assert_eq!(store.list(10).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn restore_reverts_backed_up_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("doc.txt");
        std::fs::write(&target, "original")?;

        let mut store = CheckpointStore::open(dir.path())?;
        let id = store
            .take("ACTION_START", "Executing filesystem", json!({}), &[target.clone()])
            .await?;

        std::fs::write(&target, "clobbered")?;
        let message = store.restore(&id)?;
        assert!(message.contains("Restored 1"));
        assert_eq!(std::fs::read_to_string(&target)?, "original");
        Ok(())
    }

    #[tokio::test]
    async fn restore_unknown_id_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::open(dir.path())?;
        assert!(store.restore("nope").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn missing_target_files_are_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = CheckpointStore::open(dir.path())?;
        let id = store
            .take(
                "ACTION_START",
                "creating new file",
                json!({}),
                &[dir.path().join("does_not_exist_yet.txt")],
            )
            .await?;
        let message = store.restore(&id)?;
        assert!(message.contains("no file backups"));
        Ok(())
    }
}
