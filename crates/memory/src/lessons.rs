use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedding::{cosine, SharedEmbedder};
use crate::schema::{FailureRecord, LessonMeta};

/// Most recent failures kept; older ones age out of the ring.
const FAILURE_CAP: usize = 50;
/// Failures older than this many days are ignored during matching.
const FAILURE_DECAY_DAYS: i64 = 7;

/// On-disk shape: parallel arrays, one JSON document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LessonFile {
    lessons: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    metadata: Vec<LessonMeta>,
    #[serde(default)]
    failures: Vec<FailureRecord>,
}

/// Flat semantic lessons with provenance metadata plus a bounded failure
/// memory.  Duplicate lessons reinforce the existing row.
pub struct LessonStore {
    path: PathBuf,
    file: LessonFile,
    embedder: Option<SharedEmbedder>,
}

impl LessonStore {
    pub fn open(data_dir: impl AsRef<Path>, embedder: Option<SharedEmbedder>) -> Result<Self> {
        let path = data_dir.as_ref().join("lessons_semantic.json");
        let file = if path.exists() {
            match serde_json::from_str(&fs::read_to_string(&path)?) {
                Ok(file) => file,
                Err(err) => {
                    warn!(%err, "lesson file unreadable, starting fresh");
                    LessonFile::default()
                }
            }
        } else {
            LessonFile::default()
        };
        Ok(Self { path, file, embedder })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string(&self.file)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.file.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.lessons.is_empty()
    }

    /// Lessons re-derived at least once (count > 1).
    pub fn stable_count(&self) -> usize {
        self.file.metadata.iter().filter(|m| m.count > 1).count()
    }

    /// Save a lesson.  An exact-text duplicate bumps `count` and touches
    /// `last_accessed` instead of appending a new row.
    pub fn save_lesson(&mut self, lesson: &str, author: &str, source_task: &str) -> Result<()> {
        let lesson = lesson.trim();
        if lesson.len() < 5 {
            return Ok(());
        }
        let now = Utc::now();
        if let Some(idx) = self.file.lessons.iter().position(|l| l == lesson) {
            let meta = &mut self.file.metadata[idx];
            meta.count += 1;
            meta.last_accessed = now;
            return self.save();
        }

        let embedding = self
            .embedder
            .as_ref()
            .map(|e| e.embed(lesson))
            .unwrap_or_default();
        self.file.lessons.push(lesson.to_string());
        self.file.embeddings.push(embedding);
        self.file.metadata.push(LessonMeta {
            created_at: now,
            last_accessed: now,
            author: author.to_string(),
            source_task: source_task.to_string(),
            count: 1,
            reliability: if author == "User" { 1.0 } else { 0.8 },
        });
        self.save()
    }

    /// Top lessons for the given context: cosine over embeddings when
    /// available, keyword overlap otherwise, recency as the last resort.
    /// Matched lessons are touched.
    pub fn relevant(&mut self, context: &str, limit: usize) -> Vec<String> {
        if self.file.lessons.is_empty() {
            return vec![];
        }

        let mut matched_indices: Vec<usize> = vec![];
        if let Some(embedder) = &self.embedder {
            let query = embedder.embed(context);
            let mut scored: Vec<(usize, f32)> = self
                .file
                .embeddings
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.is_empty())
                .map(|(i, e)| (i, cosine(&query, e)))
                .filter(|(_, score)| *score > 0.25)
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            matched_indices = scored.into_iter().take(limit).map(|(i, _)| i).collect();
        }
        if matched_indices.is_empty() {
            let context_lower = context.to_lowercase();
            matched_indices = self
                .file
                .lessons
                .iter()
                .enumerate()
                .filter(|(_, l)| {
                    l.to_lowercase()
                        .split_whitespace()
                        .any(|w| w.len() > 3 && context_lower.contains(w))
                })
                .take(limit)
                .map(|(i, _)| i)
                .collect();
        }
        if matched_indices.is_empty() {
            let start = self.file.lessons.len().saturating_sub(limit.min(3));
            matched_indices = (start..self.file.lessons.len()).collect();
        }

        let now = Utc::now();
        let mut out = Vec::with_capacity(matched_indices.len());
        for idx in matched_indices {
            self.file.metadata[idx].last_accessed = now;
            out.push(self.file.lessons[idx].clone());
        }
        let _ = self.save();
        out
    }

    /// Record a failed attempt so the same mistake isn't repeated.
    pub fn save_failure(&mut self, action: &str, error: &str, context: &str) -> Result<()> {
        self.file.failures.push(FailureRecord {
            action: action.to_string(),
            error: error.to_string(),
            context: context.to_string(),
            timestamp: Utc::now(),
        });
        if self.file.failures.len() > FAILURE_CAP {
            let excess = self.file.failures.len() - FAILURE_CAP;
            self.file.failures.drain(..excess);
        }
        warn!(action, error, "failure recorded");
        self.save()
    }

    /// Past failures matching the context, filtered by temporal decay.
    pub fn relevant_failures(&self, context: &str, limit: usize) -> Vec<String> {
        let cutoff = Utc::now() - Duration::days(FAILURE_DECAY_DAYS);
        let context_lower = context.to_lowercase();
        let mut relevant: Vec<String> = self
            .file
            .failures
            .iter()
            .filter(|f| f.timestamp > cutoff)
            .filter(|f| {
                f.action
                    .to_lowercase()
                    .split_whitespace()
                    .any(|w| w.len() > 3 && context_lower.contains(w))
                    || f.context
                        .to_lowercase()
                        .split_whitespace()
                        .any(|w| w.len() > 3 && context_lower.contains(w))
            })
            .map(|f| format!("PAST FAILURE: Tried '{}' but got '{}'", f.action, f.error))
            .collect();
        let keep_from = relevant.len().saturating_sub(limit);
        relevant.drain(..keep_from);
        relevant
    }

    /// Best similarity between the context and any recent failure, used by
    /// the judgment engine to escalate repeat trouble spots.
    pub fn failure_similarity(&self, context: &str) -> f32 {
        let Some(embedder) = &self.embedder else {
            return if self.relevant_failures(context, 1).is_empty() { 0.0 } else { 0.8 };
        };
        let cutoff = Utc::now() - Duration::days(FAILURE_DECAY_DAYS);
        let query = embedder.embed(context);
        self.file
            .failures
            .iter()
            .filter(|f| f.timestamp > cutoff)
            .map(|f| cosine(&query, &embedder.embed(&format!("{} {}", f.action, f.context))))
            .fold(0.0f32, f32::max)
    }

    /// Remove lessons unaccessed for longer than `days`.
    pub fn prune(&mut self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let keep: Vec<usize> = self
            .file
            .metadata
            .iter()
            .enumerate()
            .filter(|(_, m)| m.last_accessed > cutoff)
            .map(|(i, _)| i)
            .collect();
        let pruned = self.file.lessons.len() - keep.len();
        if pruned == 0 {
            return Ok(0);
        }
        self.file.lessons = keep.iter().map(|&i| self.file.lessons[i].clone()).collect();
        self.file.embeddings = keep.iter().map(|&i| self.file.embeddings[i].clone()).collect();
        self.file.metadata = keep.iter().map(|&i| self.file.metadata[i].clone()).collect();
        self.save()?;
        info!(pruned, "old lessons pruned");
        Ok(pruned)
    }
}
