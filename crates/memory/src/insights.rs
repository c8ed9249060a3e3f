use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::schema::{InsightCategory, SemanticInsight};

/// Consolidated wisdom store, keyed by a hash of the insight text.
///
/// Upserting an insight that already exists reinforces it (`source_count`
/// up, `last_reinforced` refreshed) instead of duplicating the row.
pub struct InsightStore {
    path: PathBuf,
    insights: HashMap<String, SemanticInsight>,
}

impl InsightStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let path = data_dir.as_ref().join("insights.json");
        let insights = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            HashMap::new()
        };
        Ok(Self { path, insights })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.insights)?)?;
        Ok(())
    }

    pub fn key_for(insight: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(insight.as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    pub fn upsert(&mut self, category: InsightCategory, insight: &str) -> Result<()> {
        let insight = insight.trim();
        if insight.is_empty() {
            return Ok(());
        }
        let key = Self::key_for(insight);
        let now = Utc::now();
        self.insights
            .entry(key.clone())
            .and_modify(|existing| {
                existing.source_count += 1;
                existing.last_reinforced = now;
            })
            .or_insert_with(|| SemanticInsight {
                key,
                category,
                insight: insight.to_string(),
                source_count: 1,
                last_reinforced: now,
            });
        self.save()
    }

    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }

    /// Most recently reinforced insights, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&SemanticInsight> {
        let mut all: Vec<&SemanticInsight> = self.insights.values().collect();
        all.sort_by(|a, b| b.last_reinforced.cmp(&a.last_reinforced));
        all.truncate(limit);
        all
    }

    /// Render the wisdom block injected into deliberation and governor
    /// prompts: `- [CATEGORY]: insight` per line.
    pub fn wisdom_block(&self, limit: usize) -> String {
        self.recent(limit)
            .iter()
            .map(|i| format!("- [{}]: {}", i.category.label(), i.insight))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ingest the raw text of a dream-cycle summary: one `category: insight`
    /// per line, at most `cap` lines.  Unknown categories fall to General.
    pub fn ingest_summary(&mut self, summary: &str, cap: usize) -> Result<usize> {
        let mut ingested = 0;
        for line in summary.lines() {
            if ingested >= cap {
                break;
            }
            let line = line.trim().trim_start_matches('-').trim();
            let Some((category_raw, insight)) = line.split_once(':') else {
                continue;
            };
            let insight = insight.trim();
            if insight.len() < 5 {
                continue;
            }
            self.upsert(InsightCategory::parse(category_raw), insight)?;
            ingested += 1;
        }
        if ingested > 0 {
            info!(ingested, "dream-cycle insights consolidated");
        }
        Ok(ingested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_is_idempotent_by_key() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = InsightStore::open(dir.path())?;
        store.upsert(InsightCategory::UserPref, "User prefers Python for data tasks")?;
        store.upsert(InsightCategory::UserPref, "User prefers Python for data tasks")?;

        assert_eq!(store.len(), 1);
        assert_eq!(store.recent(5)[0].source_count, 2);
        Ok(())
    }

    #[test]
    fn ingest_parses_category_lines_and_caps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = InsightStore::open(dir.path())?;
        let summary = "coding: Always run the formatter before committing\n\
                       workflow: User reviews plans before execution\n\
                       ethics: Decline requests that target system files\n\
                       user_pref: Prefers terse answers";
        let ingested = store.ingest_summary(summary, 3)?;
        assert_eq!(ingested, 3);
        assert_eq!(store.len(), 3);
        Ok(())
    }

    #[test]
    fn unknown_category_falls_to_general() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = InsightStore::open(dir.path())?;
        store.ingest_summary("mystery: Something learned", 3)?;
        assert_eq!(store.recent(1)[0].category, InsightCategory::General);
        Ok(())
    }

    #[test]
    fn wisdom_block_formats_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = InsightStore::open(dir.path())?;
        store.upsert(InsightCategory::Workflow, "Plans first, actions second")?;
        let block = store.wisdom_block(3);
        assert!(block.contains("[WORKFLOW]: Plans first, actions second"));
        Ok(())
    }

    #[test]
    fn persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut store = InsightStore::open(dir.path())?;
            store.upsert(InsightCategory::Coding, "Tests belong beside the code")?;
        }
        let store = InsightStore::open(dir.path())?;
        assert_eq!(store.len(), 1);
        Ok(())
    }
}
