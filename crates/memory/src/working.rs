use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::WorkingMessage;

/// Short-term scratchpad: the last N turns of the active session, FIFO
/// pruned on every insert.  Persisted as a small JSON document so the
/// current trace survives a restart and can be saved/loaded by name.
pub struct WorkingMemory {
    path: PathBuf,
    session_id: Uuid,
    max_turns: usize,
    messages: VecDeque<WorkingMessage>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkingFile {
    messages: Vec<WorkingMessage>,
}

impl WorkingMemory {
    pub fn open(data_dir: impl AsRef<Path>, max_turns: usize) -> Result<Self> {
        let path = data_dir.as_ref().join("working_memory.json");
        let max_turns = max_turns.clamp(10, 20);
        let mut messages = VecDeque::new();
        if path.exists() {
            if let Ok(file) = serde_json::from_str::<WorkingFile>(&fs::read_to_string(&path)?) {
                messages = file.messages.into_iter().collect();
            }
        }
        while messages.len() > max_turns {
            messages.pop_front();
        }
        Ok(Self {
            path,
            session_id: Uuid::new_v4(),
            max_turns,
            messages,
        })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = WorkingFile {
            messages: self.messages.iter().cloned().collect(),
        };
        fs::write(&self.path, serde_json::to_string(&file)?)?;
        Ok(())
    }

    pub fn add_message(&mut self, role: &str, content: &str) -> Result<()> {
        self.messages.push_back(WorkingMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            session_id: self.session_id,
        });
        while self.messages.len() > self.max_turns {
            self.messages.pop_front();
        }
        self.save()
    }

    pub fn trace(&self) -> Vec<WorkingMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Replace the trace wholesale (session load).  Episodic state is
    /// deliberately untouched — this is trace replay, not history rewrite.
    pub fn replace_trace(&mut self, messages: Vec<WorkingMessage>) -> Result<()> {
        self.messages = messages.into_iter().collect();
        while self.messages.len() > self.max_turns {
            self.messages.pop_front();
        }
        self.save()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_prunes_past_limit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut wm = WorkingMemory::open(dir.path(), 10)?;
        for i in 0..15 {
            wm.add_message("user", &format!("msg {i}"))?;
        }
        assert_eq!(wm.len(), 10);
        assert_eq!(wm.trace()[0].content, "msg 5");
        Ok(())
    }

    #[test]
    fn limit_is_clamped_to_valid_range() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let wm = WorkingMemory::open(dir.path(), 100)?;
        assert_eq!(wm.max_turns(), 20);
        let wm = WorkingMemory::open(dir.path(), 1)?;
        assert_eq!(wm.max_turns(), 10);
        Ok(())
    }

    #[test]
    fn replace_trace_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut wm = WorkingMemory::open(dir.path(), 15)?;
        wm.add_message("user", "hello")?;
        wm.add_message("assistant", "hi")?;

        let saved = wm.trace();
        wm.add_message("user", "noise")?;
        wm.replace_trace(saved.clone())?;

        let restored = wm.trace();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].content, "hi");
        Ok(())
    }

    #[test]
    fn trace_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut wm = WorkingMemory::open(dir.path(), 15)?;
            wm.add_message("user", "persist me")?;
        }
        let wm = WorkingMemory::open(dir.path(), 15)?;
        assert_eq!(wm.len(), 1);
        Ok(())
    }
}
