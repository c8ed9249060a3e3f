use std::path::Path;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::{cosine, SharedEmbedder};
use crate::event_log::EventLog;
use crate::index::{EpisodeCounters, EpisodeIndex};
use crate::schema::{Episode, EpisodeHit};

/// Append-only episodic memory.
///
/// Episode content lives in a JSONL event log replayed at startup; the redb
/// index carries the reinforcement counters so retrieval touches are cheap.
/// Recording never deduplicates — repeated identical interactions are
/// distinct episodes by design.
pub struct EpisodeStore {
    episodes: Vec<Episode>,
    log: EventLog<Episode>,
    index: Option<EpisodeIndex>,
    embedder: Option<SharedEmbedder>,
    /// True when counters changed since the last log overwrite.
    counters_dirty: bool,
}

impl EpisodeStore {
    pub fn open(data_dir: impl AsRef<Path>, embedder: Option<SharedEmbedder>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let log: EventLog<Episode> = EventLog::new(data_dir.join("episodes.jsonl"));
        let mut episodes = log.load()?;

        let index = match EpisodeIndex::open(data_dir.join("episodes.redb")) {
            Ok(mut index) => {
                if index.is_empty()? && !episodes.is_empty() {
                    index.rebuild_from(&episodes)?;
                } else {
                    // Counters in the index are newer than the log snapshot.
                    for episode in &mut episodes {
                        if let Ok(Some(counters)) = index.get(&episode.id) {
                            episode.access_count = episode.access_count.max(counters.access_count);
                            if counters.last_accessed_unix > episode.last_accessed.timestamp() {
                                if let Some(ts) = chrono::DateTime::from_timestamp(counters.last_accessed_unix, 0) {
                                    episode.last_accessed = ts;
                                }
                            }
                        }
                    }
                }
                Some(index)
            }
            Err(err) => {
                warn!(%err, "episode index unavailable, continuing without it");
                None
            }
        };

        info!(episodes = episodes.len(), "episodic memory loaded");
        Ok(Self {
            episodes,
            log,
            index,
            embedder,
            counters_dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn all(&self) -> &[Episode] {
        &self.episodes
    }

    /// Record a complete cognitive cycle.  `access_count` starts at 1.
    pub async fn record(
        &mut self,
        trigger_context: &str,
        intent: &str,
        plan: serde_json::Value,
        action: &str,
        outcome: &str,
        confidence: f32,
    ) -> Result<Episode> {
        let story = format!(
            "Context: {trigger_context} | Intent: {intent} | Action: {action} | Outcome: {outcome}"
        );
        let embedding = self
            .embedder
            .as_ref()
            .map(|e| e.embed(&story))
            .unwrap_or_default();

        let now = Utc::now();
        let episode = Episode {
            id: Uuid::new_v4(),
            timestamp: now,
            trigger_context: trigger_context.to_string(),
            intent: intent.to_string(),
            plan,
            action: action.to_string(),
            outcome: outcome.to_string(),
            confidence,
            embedding,
            access_count: 1,
            last_accessed: now,
        };

        self.log.append(&episode).await?;
        if let Some(index) = &mut self.index {
            index.upsert(&EpisodeCounters {
                id: episode.id,
                access_count: 1,
                last_accessed_unix: now.timestamp(),
            })?;
        }
        self.episodes.push(episode.clone());
        info!(intent = %episode.intent, outcome_len = episode.outcome.len(), "episode recorded");
        Ok(episode)
    }

    /// Similarity retrieval with recency fallback.
    ///
    /// With an embedder, scores all stored embeddings by cosine and returns
    /// the top `limit`; each hit's `access_count` is reinforced.  Without
    /// one, the most recent `limit` episodes are returned untouched.
    pub fn retrieve(&mut self, query: &str, limit: usize) -> Vec<EpisodeHit> {
        let Some(embedder) = self.embedder.clone() else {
            return self.recent(limit);
        };
        if self.episodes.is_empty() {
            return vec![];
        }

        let query_vec = embedder.embed(query);
        let mut scored: Vec<(usize, f32)> = self
            .episodes
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.embedding.is_empty())
            .map(|(i, e)| (i, cosine(&query_vec, &e.embedding)))
            .collect();
        if scored.is_empty() {
            return self.recent(limit);
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        let mut hits = Vec::with_capacity(scored.len());
        for (idx, relevance) in scored {
            let now = Utc::now();
            let episode = &mut self.episodes[idx];
            episode.access_count += 1;
            episode.last_accessed = now;
            self.counters_dirty = true;
            if let Some(index) = &mut self.index {
                let _ = index.upsert(&EpisodeCounters {
                    id: episode.id,
                    access_count: episode.access_count,
                    last_accessed_unix: now.timestamp(),
                });
            }
            hits.push(EpisodeHit {
                intent: episode.intent.clone(),
                action: episode.action.clone(),
                outcome: episode.outcome.clone(),
                relevance,
            });
        }
        debug!(hits = hits.len(), "episodic retrieval reinforced");
        hits
    }

    fn recent(&self, limit: usize) -> Vec<EpisodeHit> {
        let mut recent: Vec<&Episode> = self.episodes.iter().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent
            .into_iter()
            .take(limit)
            .map(|e| EpisodeHit {
                intent: e.intent.clone(),
                action: e.action.clone(),
                outcome: e.outcome.clone(),
                relevance: 0.0,
            })
            .collect()
    }

    /// Snapshot the canonical log to its `.bak` sibling.  Called before a
    /// dream cycle so a consistent copy exists if the cycle or a crash
    /// mutates the log mid-flight.
    pub fn backup(&self) -> Result<()> {
        self.log.backup()
    }

    /// Episodes eligible for consolidation: recently accessed, newest first,
    /// capped at `limit`.
    pub fn consolidation_batch(&self, limit: usize) -> Vec<&Episode> {
        let mut batch: Vec<&Episode> = self.episodes.iter().filter(|e| e.access_count >= 1).collect();
        batch.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        batch.truncate(limit);
        batch
    }

    /// Decay-prune: drop episodes older than the retention window that were
    /// never meaningfully reinforced (`access_count < 3`).
    pub async fn decay(&mut self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let before = self.episodes.len();

        let (keep, drop): (Vec<Episode>, Vec<Episode>) = self
            .episodes
            .drain(..)
            .partition(|e| !(e.last_accessed < cutoff && e.access_count < 3));
        self.episodes = keep;

        if !drop.is_empty() {
            self.log.overwrite(&self.episodes).await?;
            self.counters_dirty = false;
            if let Some(index) = &mut self.index {
                for episode in &drop {
                    let _ = index.remove(&episode.id);
                }
            }
            info!(pruned = drop.len(), "episodic decay pass complete");
        }
        Ok(before - self.episodes.len())
    }

    /// Persist reinforced counters back into the canonical log.  Called from
    /// shutdown and after consolidation; cheap no-op when nothing changed.
    pub async fn flush(&mut self) -> Result<()> {
        if self.counters_dirty {
            self.log.overwrite(&self.episodes).await?;
            self.counters_dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use std::sync::Arc;

    async fn store_with_embedder(dir: &Path) -> EpisodeStore {
        EpisodeStore::open(dir, Some(Arc::new(HashEmbedder::default()))).unwrap()
    }

    #[tokio::test]
    async fn record_replays_after_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut store = store_with_embedder(dir.path()).await;
            store
                .record("interaction", "open notepad", serde_json::json!({}), "system_control", "ok", 0.9)
                .await?;
        }
        let store = store_with_embedder(dir.path()).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].access_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn identical_records_are_not_deduped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store_with_embedder(dir.path()).await;
        for _ in 0..2 {
            store
                .record("interaction", "same", serde_json::json!({}), "reply", "ok", 0.5)
                .await?;
        }
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_reinforces_access_count() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store_with_embedder(dir.path()).await;
        store
            .record("interaction", "open notepad quickly", serde_json::json!({}), "system_control", "ok", 0.9)
            .await?;

        let before = store.all()[0].access_count;
        let hits = store.retrieve("open notepad", 3);
        assert!(!hits.is_empty());
        assert!(store.all()[0].access_count > before);
        Ok(())
    }

    #[tokio::test]
    async fn reinforced_counters_survive_flush_and_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut store = store_with_embedder(dir.path()).await;
            store
                .record("interaction", "check weather in town", serde_json::json!({}), "research", "sunny", 0.8)
                .await?;
            store.retrieve("weather town", 3);
            store.flush().await?;
        }
        let store = store_with_embedder(dir.path()).await;
        assert_eq!(store.all()[0].access_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn decay_prunes_only_old_and_unreinforced() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = store_with_embedder(dir.path()).await;
        store
            .record("interaction", "stale", serde_json::json!({}), "reply", "ok", 0.5)
            .await?;
        store
            .record("interaction", "fresh", serde_json::json!({}), "reply", "ok", 0.5)
            .await?;

        // Age the first episode past the window.
        store.episodes[0].last_accessed = Utc::now() - Duration::days(90);
        let pruned = store.decay(60).await?;
        assert_eq!(pruned, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].intent, "fresh");

        // A reinforced old episode survives.
        store.episodes[0].last_accessed = Utc::now() - Duration::days(90);
        store.episodes[0].access_count = 5;
        assert_eq!(store.decay(60).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn recency_fallback_without_embedder() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = EpisodeStore::open(dir.path(), None)?;
        store
            .record("interaction", "first", serde_json::json!({}), "reply", "ok", 0.5)
            .await?;
        store
            .record("interaction", "second", serde_json::json!({}), "reply", "ok", 0.5)
            .await?;

        let hits = store.retrieve("anything", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].intent, "second");
        // Recency fallback does not reinforce.
        assert_eq!(store.all()[0].access_count, 1);
        Ok(())
    }
}
