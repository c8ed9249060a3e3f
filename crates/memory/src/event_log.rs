use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append-only JSONL log, one serialized record per line.
///
/// Canonical source of truth for append-only stores.  `overwrite` rewrites
/// via a `.tmp` sibling and an atomic rename so a crash at any point leaves
/// either the old or the new file fully intact.
#[derive(Debug, Clone)]
pub struct EventLog<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> EventLog<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        // Flush userspace buffers and fsync to disk so the record survives a
        // process crash or power loss immediately after append.
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Atomically replace the log with a new set of records.
    pub async fn overwrite(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "events.jsonl".to_string());
            self.path.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            for record in records {
                let line = serde_json::to_string(record)?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Copy the live log to a `.bak` sibling file.
    ///
    /// Called at the start of each consolidation cycle so a consistent
    /// snapshot exists even if the cycle writes new records or the process
    /// crashes mid-cycle.  A missing source file is a no-op.
    pub fn backup(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let bak_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "events.jsonl".to_string());
            self.path.with_file_name(format!("{filename}.bak"))
        };
        std::fs::copy(&self.path, &bak_path)?;
        Ok(())
    }

    /// Load all records.  Corrupt lines are skipped with a warning and
    /// preserved verbatim in a `.corrupt` sidecar file for forensics.
    pub fn load(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut corrupt = 0usize;
        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    corrupt += 1;
                    warn!(
                        line = line_idx + 1,
                        %err,
                        path = %self.path.display(),
                        "corrupt JSONL record skipped (original preserved in .corrupt sidecar)"
                    );
                    let corrupt_path = self.path.with_extension("jsonl.corrupt");
                    if let Ok(mut sidecar) = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&corrupt_path)
                    {
                        use std::io::Write as _;
                        let _ = writeln!(sidecar, "{line}");
                    }
                }
            }
        }
        if corrupt > 0 {
            warn!(corrupt, path = %self.path.display(), "event log loaded with skipped lines — inspect .corrupt sidecar");
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        n: u32,
        s: String,
    }

    #[tokio::test]
    async fn append_and_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log: EventLog<Rec> = EventLog::new(dir.path().join("log.jsonl"));
        log.append(&Rec { n: 1, s: "a".into() }).await?;
        log.append(&Rec { n: 2, s: "b".into() }).await?;

        let loaded = log.load()?;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].n, 2);
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_replaces_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log: EventLog<Rec> = EventLog::new(dir.path().join("log.jsonl"));
        log.append(&Rec { n: 1, s: "a".into() }).await?;
        log.overwrite(&[Rec { n: 9, s: "z".into() }]).await?;

        let loaded = log.load()?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].n, 9);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_and_preserved() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("log.jsonl");
        let log: EventLog<Rec> = EventLog::new(&path);
        log.append(&Rec { n: 1, s: "ok".into() }).await?;
        std::fs::write(&path, format!("{}\nnot json\n", std::fs::read_to_string(&path)?))?;

        let loaded = log.load()?;
        assert_eq!(loaded.len(), 1);

        // The bad line survives in the forensics sidecar.
        let sidecar = std::fs::read_to_string(path.with_extension("jsonl.corrupt"))?;
        assert!(sidecar.contains("not json"));
        Ok(())
    }

    #[tokio::test]
    async fn backup_snapshots_the_live_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("log.jsonl");
        let log: EventLog<Rec> = EventLog::new(&path);

        // Missing source: no-op, no .bak created.
        log.backup()?;
        assert!(!dir.path().join("log.jsonl.bak").exists());

        log.append(&Rec { n: 7, s: "keep".into() }).await?;
        log.backup()?;
        let bak = std::fs::read_to_string(dir.path().join("log.jsonl.bak"))?;
        assert!(bak.contains("keep"));
        Ok(())
    }

    #[test]
    fn missing_file_loads_empty() {
        let log: EventLog<Rec> = EventLog::new("/nonexistent/x.jsonl");
        assert!(log.load().unwrap().is_empty());
    }
}
