//! Hierarchical memory: four persistence layers with distinct invariants.
//!
//! Working (short-term trace), Episodic (append-only experiences), Semantic
//! (lessons + consolidated insights), and Identity (decay-resistant
//! anchors).  The [`MemoryStack`] composes them and exposes the two
//! operations everything else consumes: `full_context` and
//! `record_interaction`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

pub mod embedding;
pub mod episodic;
pub mod event_log;
pub mod identity;
pub mod index;
pub mod insights;
pub mod lessons;
pub mod schema;
pub mod working;

pub use embedding::{cosine, Embedder, HashEmbedder, SharedEmbedder};
pub use episodic::EpisodeStore;
pub use event_log::EventLog;
pub use identity::IdentityStore;
pub use insights::InsightStore;
pub use lessons::LessonStore;
pub use schema::{
    AnchorCategory, Episode, EpisodeHit, FailureRecord, IdentityAnchor, InsightCategory,
    LessonMeta, SemanticInsight, WorkingMessage,
};
pub use working::WorkingMemory;

/// Async summarization hook injected by the controller: maps the episode
/// digest prompt to the model's summary text.  Kept as a function type so
/// this crate never depends on the LLM gateway.
pub type SummarizeFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync,
>;

/// Composite context assembled for the deliberation layer.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub working: Vec<WorkingMessage>,
    pub episodes: Vec<EpisodeHit>,
    pub lessons: Vec<String>,
    pub failures: Vec<String>,
    pub wisdom: String,
    pub identity: String,
}

pub struct MemoryStack {
    pub working: WorkingMemory,
    pub episodic: EpisodeStore,
    pub insights: InsightStore,
    pub lessons: LessonStore,
    pub identity: IdentityStore,
    consolidation_every: u64,
}

impl MemoryStack {
    pub fn open(
        data_dir: impl AsRef<Path>,
        config: &mentat_config::MemoryConfig,
        embedder: SharedEmbedder,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            working: WorkingMemory::open(data_dir, config.clamped_short_term_limit())?,
            episodic: EpisodeStore::open(data_dir, Some(embedder.clone()))?,
            insights: InsightStore::open(data_dir)?,
            lessons: LessonStore::open(data_dir, Some(embedder))?,
            identity: IdentityStore::open(data_dir)?,
            consolidation_every: config.consolidation_every.max(1),
        })
    }

    /// Synthesize context across all layers for the current input.
    pub fn full_context(&mut self, query: &str) -> MemoryContext {
        MemoryContext {
            working: self.working.trace(),
            episodes: self.episodic.retrieve(query, 3),
            lessons: self.lessons.relevant(query, 5),
            failures: self.lessons.relevant_failures(query, 3),
            wisdom: self.insights.wisdom_block(3),
            identity: self.identity.identity_block(),
        }
    }

    /// Disperse one finished interaction to the long-term layers.
    ///
    /// Always writes an episode; derives a lesson when confidence is high.
    /// Returns `true` when a consolidation (dream cycle) is due.
    pub async fn record_interaction(
        &mut self,
        intent: &str,
        action: &str,
        outcome: &str,
        confidence: f32,
    ) -> Result<bool> {
        self.episodic
            .record("interaction", intent, serde_json::json!({}), action, outcome, confidence)
            .await?;

        if confidence > 0.8 {
            let digest: String = outcome.chars().take(50).collect();
            self.lessons.save_lesson(
                &format!("On '{intent}', successfully used '{action}' to achieve '{digest}'."),
                "Self",
                "empirical",
            )?;
        }

        let count = self.episodic.len() as u64;
        Ok(count > 0 && count % self.consolidation_every == 0)
    }

    /// Dream cycle: compress recently accessed episodes into at most three
    /// categorized semantic insights.
    pub async fn consolidate(&mut self, summarize: SummarizeFn) -> Result<usize> {
        if let Err(err) = self.episodic.backup() {
            warn!(%err, "episodic backup before dream cycle failed");
        }
        let batch = self.episodic.consolidation_batch(20);
        if batch.is_empty() {
            return Ok(0);
        }
        let logs = batch
            .iter()
            .map(|e| {
                let outcome: String = e.outcome.chars().take(100).collect();
                format!("- {} -> Result: {outcome}", e.intent)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are the narrative architect. Extract long-term SEMANTIC KNOWLEDGE from these \
             episodic logs.\n\
             Constraints:\n\
             - Extract 1-3 highly specific insights.\n\
             - Categorize each as: coding, ethics, workflow, or user_pref.\n\
             - Format each line as `category: insight`.\n\n\
             RECENT LOGS:\n{logs}"
        );

        match summarize(prompt).await {
            Some(summary) => {
                let ingested = self.insights.ingest_summary(&summary, 3)?;
                self.episodic.flush().await?;
                info!(ingested, "dream cycle complete");
                Ok(ingested)
            }
            None => {
                warn!("dream cycle skipped: summarizer unavailable");
                Ok(0)
            }
        }
    }

    /// Maintenance pass: episodic decay + lesson pruning.
    pub async fn maintain(&mut self, retention_days: i64, lesson_prune_days: i64) -> Result<()> {
        self.episodic.decay(retention_days).await?;
        self.lessons.prune(lesson_prune_days)?;
        Ok(())
    }

    /// Flush reinforced counters; called on shutdown.
    pub async fn flush(&mut self) -> Result<()> {
        self.episodic.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentat_config::MemoryConfig;

    fn stack(dir: &Path) -> MemoryStack {
        MemoryStack::open(dir, &MemoryConfig::default(), Arc::new(HashEmbedder::default())).unwrap()
    }

    #[tokio::test]
    async fn record_interaction_always_writes_episode() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut memory = stack(dir.path());
        memory.record_interaction("greet", "reply", "hello there", 0.5).await?;
        assert_eq!(memory.episodic.len(), 1);
        assert!(memory.lessons.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn high_confidence_derives_a_lesson() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut memory = stack(dir.path());
        memory
            .record_interaction("open notepad", "system_control", "opened", 0.95)
            .await?;
        assert_eq!(memory.lessons.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn consolidation_due_every_nth_episode() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = MemoryConfig::default();
        config.consolidation_every = 3;
        let mut memory =
            MemoryStack::open(dir.path(), &config, Arc::new(HashEmbedder::default()))?;

        assert!(!memory.record_interaction("a", "reply", "x", 0.5).await?);
        assert!(!memory.record_interaction("b", "reply", "x", 0.5).await?);
        assert!(memory.record_interaction("c", "reply", "x", 0.5).await?);
        Ok(())
    }

    #[tokio::test]
    async fn consolidate_ingests_summary_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut memory = stack(dir.path());
        memory.record_interaction("code review", "reply", "done", 0.5).await?;

        let summarize: SummarizeFn = Arc::new(|_prompt| {
            Box::pin(async {
                Some("coding: User wants tests with every change\nworkflow: Confirm before writes".to_string())
            })
        });
        let ingested = memory.consolidate(summarize).await?;
        assert_eq!(ingested, 2);
        assert!(memory.insights.wisdom_block(5).contains("[CODING]"));
        // The dream cycle snapshots the episodic log first.
        assert!(dir.path().join("episodes.jsonl.bak").exists());
        Ok(())
    }

    #[tokio::test]
    async fn full_context_carries_identity_block() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut memory = stack(dir.path());
        memory.working.add_message("user", "hi")?;
        let context = memory.full_context("hi");
        assert_eq!(context.working.len(), 1);
        assert!(context.identity.contains("CORE MISSION"));
        Ok(())
    }
}
