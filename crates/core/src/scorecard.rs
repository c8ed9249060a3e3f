//! Model-agnostic intelligence scorecard: longitudinal stability metrics
//! for the assistant as an entity, not the underlying model.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::debounce::SyncDebouncer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub context: Option<String>,
}

pub const METRIC_NAMES: &[&str] = &[
    "reliability_rate",
    "mistake_repetition",
    "recovery_quality",
    "interruption_stability",
    "safety_compliance",
    "latency_adherence",
    "confidence_calibration",
];

pub struct Scorecard {
    path: PathBuf,
    metrics: BTreeMap<String, Vec<MetricEntry>>,
    debouncer: SyncDebouncer,
}

impl Scorecard {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join("scorecard.json");
        let mut metrics: BTreeMap<String, Vec<MetricEntry>> = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        for name in METRIC_NAMES {
            metrics.entry(name.to_string()).or_default();
        }
        Self {
            path,
            metrics,
            debouncer: SyncDebouncer::standard(),
        }
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.metrics)?)?;
        Ok(())
    }

    /// Record a metric sample; saves are debounced (5s quiet / 30s max).
    pub fn record(&mut self, name: &str, value: f64, context: Option<String>) {
        let Some(series) = self.metrics.get_mut(name) else {
            return;
        };
        series.push(MetricEntry { timestamp: Utc::now(), value, context });
        if series.len() > 1000 {
            series.remove(0);
        }
        self.debouncer.mark_dirty();
        let metrics = self.metrics.clone();
        let path = self.path.clone();
        self.debouncer.execute(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, serde_json::to_string_pretty(&metrics)?)?;
            Ok(())
        });
    }

    /// Windowed average per metric (last 50 samples).
    pub fn summary(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .map(|(name, series)| {
                let window: Vec<f64> = series.iter().rev().take(50).map(|e| e.value).collect();
                let avg = if window.is_empty() {
                    0.0
                } else {
                    window.iter().sum::<f64>() / window.len() as f64
                };
                (name.clone(), avg)
            })
            .collect()
    }

    /// Stop-rule: true when metrics stopped improving across the board,
    /// meaning effort should shift from model changes to controller logic.
    pub fn check_plateau(&self, window: usize) -> bool {
        let mut total_improvement = 0.0;
        let mut measured = false;
        for series in self.metrics.values() {
            if series.len() < window * 2 {
                continue;
            }
            measured = true;
            let recent: f64 =
                series.iter().rev().take(window).map(|e| e.value).sum::<f64>() / window as f64;
            let previous: f64 = series
                .iter()
                .rev()
                .skip(window)
                .take(window)
                .map(|e| e.value)
                .sum::<f64>()
                / window as f64;
            total_improvement += recent - previous;
        }
        measured && total_improvement <= 0.001
    }

    pub fn flush(&mut self) {
        let metrics = self.metrics.clone();
        let path = self.path.clone();
        self.debouncer.flush(move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, serde_json::to_string_pretty(&metrics)?)?;
            Ok(())
        });
        let _ = self.write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_averages_recent_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut scorecard = Scorecard::open(dir.path());
        scorecard.record("reliability_rate", 1.0, None);
        scorecard.record("reliability_rate", 0.0, None);

        let summary = scorecard.summary();
        assert!((summary["reliability_rate"] - 0.5).abs() < 1e-9);
        assert_eq!(summary["safety_compliance"], 0.0);
    }

    #[test]
    fn unknown_metric_names_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut scorecard = Scorecard::open(dir.path());
        scorecard.record("made_up", 1.0, None);
        assert!(!scorecard.summary().contains_key("made_up"));
    }

    #[test]
    fn plateau_requires_enough_samples() {
        let dir = tempfile::tempdir().unwrap();
        let scorecard = Scorecard::open(dir.path());
        assert!(!scorecard.check_plateau(20), "no data means no plateau call");
    }

    #[test]
    fn flat_series_reads_as_plateau() {
        let dir = tempfile::tempdir().unwrap();
        let mut scorecard = Scorecard::open(dir.path());
        for _ in 0..10 {
            scorecard.record("reliability_rate", 0.8, None);
        }
        assert!(scorecard.check_plateau(5));
    }

    #[test]
    fn improving_series_is_not_a_plateau() {
        let dir = tempfile::tempdir().unwrap();
        let mut scorecard = Scorecard::open(dir.path());
        for i in 0..10 {
            scorecard.record("reliability_rate", i as f64 / 10.0, None);
        }
        assert!(!scorecard.check_plateau(5));
    }

    #[test]
    fn flush_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut scorecard = Scorecard::open(dir.path());
            scorecard.record("recovery_quality", 0.9, Some("fixed a bad write".into()));
            scorecard.flush();
        }
        let scorecard = Scorecard::open(dir.path());
        assert!((scorecard.summary()["recovery_quality"] - 0.9).abs() < 1e-9);
    }
}
