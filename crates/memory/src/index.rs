//! Secondary index for the episodic store, backed by [`redb`].
//!
//! The JSONL event log remains the canonical record of episode *content*;
//! the index carries the mutable reinforcement counters (`access_count`,
//! `last_accessed`) so a retrieval touch is a single keyed write instead of
//! a full log rewrite.  On startup the counters are overlaid onto the
//! replayed episodes.  If the index file is absent or corrupt it is rebuilt
//! from the log with zero data loss.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lru::LruCache;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::Episode;

/// Episode counters table: `episode_id (str) → bincode(EpisodeCounters)`.
const COUNTERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("episode_counters");

/// Number of hot episodes kept in the read cache.
const LRU_CAPACITY: usize = 128;

/// Compact mutable metadata stored per episode.  Content stays in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeCounters {
    pub id: Uuid,
    pub access_count: u32,
    /// Unix seconds; stored as an integer for a stable bincode layout.
    pub last_accessed_unix: i64,
}

#[derive(Debug, Clone, Default)]
pub struct IndexCacheStats {
    pub capacity: usize,
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct EpisodeIndex {
    db: Database,
    path: PathBuf,
    cache: LruCache<String, EpisodeCounters>,
    cache_hits: u64,
    cache_misses: u64,
}

impl EpisodeIndex {
    /// Open or create the index file.  On corruption the file is removed and
    /// recreated; callers then rebuild from the event log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = match Database::create(&path) {
            Ok(db) => db,
            Err(_) => {
                tracing::warn!(path = %path.display(), "episode index unreadable, recreating");
                let _ = std::fs::remove_file(&path);
                Database::create(&path)
                    .with_context(|| format!("recreating episode index at {}", path.display()))?
            }
        };
        {
            let tx = db.begin_write()?;
            tx.open_table(COUNTERS_TABLE)?;
            tx.commit()?;
        }
        Ok(Self {
            db,
            path,
            cache: LruCache::new(NonZeroUsize::new(LRU_CAPACITY).unwrap()),
            cache_hits: 0,
            cache_misses: 0,
        })
    }

    pub fn upsert(&mut self, counters: &EpisodeCounters) -> Result<()> {
        let id_str = counters.id.to_string();
        let bytes = bincode::serialize(counters)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(COUNTERS_TABLE)?;
            tbl.insert(id_str.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        self.cache.put(id_str, counters.clone());
        Ok(())
    }

    pub fn get(&mut self, id: &Uuid) -> Result<Option<EpisodeCounters>> {
        let id_str = id.to_string();
        if let Some(hit) = self.cache.get(&id_str) {
            self.cache_hits += 1;
            return Ok(Some(hit.clone()));
        }
        self.cache_misses += 1;

        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(COUNTERS_TABLE)?;
        match tbl.get(id_str.as_str())? {
            None => Ok(None),
            Some(v) => {
                let counters: EpisodeCounters = bincode::deserialize(v.value())?;
                self.cache.put(id_str, counters.clone());
                Ok(Some(counters))
            }
        }
    }

    pub fn remove(&mut self, id: &Uuid) -> Result<()> {
        let id_str = id.to_string();
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(COUNTERS_TABLE)?;
            tbl.remove(id_str.as_str())?;
        }
        tx.commit()?;
        self.cache.pop(&id_str);
        Ok(())
    }

    /// Drop everything and re-seed counters from the given episodes.
    pub fn rebuild_from(&mut self, episodes: &[Episode]) -> Result<usize> {
        {
            let tx = self.db.begin_write()?;
            {
                let mut tbl = tx.open_table(COUNTERS_TABLE)?;
                let keys: Vec<String> = tbl
                    .iter()?
                    .filter_map(|r| r.ok().map(|(k, _)| k.value().to_string()))
                    .collect();
                for k in &keys {
                    tbl.remove(k.as_str())?;
                }
            }
            tx.commit()?;
        }
        self.cache.clear();

        for episode in episodes {
            self.upsert(&EpisodeCounters {
                id: episode.id,
                access_count: episode.access_count,
                last_accessed_unix: episode.last_accessed.timestamp(),
            })?;
        }
        tracing::info!(episodes = episodes.len(), path = %self.path.display(), "episode index rebuilt");
        Ok(episodes.len())
    }

    pub fn len(&self) -> Result<usize> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(COUNTERS_TABLE)?;
        Ok(tbl.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn cache_stats(&self) -> IndexCacheStats {
        IndexCacheStats {
            capacity: LRU_CAPACITY,
            len: self.cache.len(),
            hits: self.cache_hits,
            misses: self.cache_misses,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
