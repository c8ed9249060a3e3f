//! Mission control: a priority heap of long-running autonomous goals.
//!
//! A background loop steps the highest-priority due mission by feeding a
//! self-constructed prompt through the controller.  Recurring missions
//! reset to pending on completion; mission state persists after each step.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::controller::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionKind {
    Research,
    Maintenance,
    Monitoring,
    Creative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    Active,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub description: String,
    /// Higher runs first.
    pub priority: i32,
    pub kind: MissionKind,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    /// Seconds between runs; 0 = one-off.  Ignored when `schedule` is set.
    pub repeat_interval: u64,
    /// Optional cron expression overriding `repeat_interval`.
    #[serde(default)]
    pub schedule: Option<String>,
    pub progress: f32,
}

impl Mission {
    pub fn new(description: &str, priority: i32, kind: MissionKind, repeat_interval: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            description: description.to_string(),
            priority,
            kind,
            status: MissionStatus::Pending,
            created_at: Utc::now(),
            last_check: None,
            repeat_interval,
            schedule: None,
            progress: 0.0,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat_interval > 0 || self.schedule.is_some()
    }

    /// Whether the mission is due to run at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        if self.status == MissionStatus::Complete {
            return false;
        }
        let Some(last) = self.last_check else {
            return true;
        };
        if let Some(expr) = &self.schedule {
            match cron::Schedule::from_str(expr) {
                Ok(schedule) => {
                    return schedule.after(&last).next().map(|next| next <= now).unwrap_or(false)
                }
                Err(err) => {
                    warn!(mission = %self.id, %err, "invalid cron schedule, falling back to interval");
                }
            }
        }
        let cooldown = if self.repeat_interval > 0 { self.repeat_interval } else { 3600 };
        (now - last).num_seconds() >= cooldown as i64
    }
}

pub struct MissionControl {
    missions: Mutex<Vec<Mission>>,
    path: PathBuf,
    running: AtomicBool,
    cpu_load_ceiling: f32,
}

impl MissionControl {
    pub fn open(data_dir: impl AsRef<Path>, cpu_load_ceiling: f32) -> Self {
        let path = data_dir.as_ref().join("missions.json");
        let mut missions: Vec<Mission> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        missions.retain(|m| m.status != MissionStatus::Complete || m.is_recurring());

        let control = Self {
            missions: Mutex::new(missions),
            path,
            running: AtomicBool::new(false),
            cpu_load_ceiling,
        };
        if control.missions.lock().unwrap().is_empty() {
            control.hydrate_defaults();
        }
        control
    }

    fn hydrate_defaults(&self) {
        self.add("Weekly security audit", 20, MissionKind::Maintenance, 604_800);
        self.add("Daily knowledge synthesis", 40, MissionKind::Research, 86_400);
    }

    pub fn add(&self, description: &str, priority: i32, kind: MissionKind, repeat_interval: u64) -> String {
        let mission = Mission::new(description, priority, kind, repeat_interval);
        let id = mission.id.clone();
        info!(mission = %id, description, "mission queued");
        self.missions.lock().unwrap().push(mission);
        let _ = self.save();
        id
    }

    pub fn list(&self) -> Vec<Mission> {
        self.missions.lock().unwrap().clone()
    }

    fn save(&self) -> Result<()> {
        let missions = self.missions.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&*missions)?)?;
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// The highest-priority mission due right now.
    fn next_due(&self) -> Option<Mission> {
        let now = Utc::now();
        let missions = self.missions.lock().unwrap();
        missions
            .iter()
            .filter(|m| m.due(now))
            .max_by_key(|m| m.priority)
            .cloned()
    }

    /// Background autonomy loop.  Missions are cancellable between steps
    /// only.
    pub async fn run(self: Arc<Self>, controller: Arc<Controller>) {
        self.running.store(true, Ordering::SeqCst);
        info!("mission control: autonomy engine engaged");

        while self.running.load(Ordering::SeqCst) {
            if system_load_fraction() > self.cpu_load_ceiling {
                tokio::time::sleep(Duration::from_secs(60)).await;
                continue;
            }
            let Some(mission) = self.next_due() else {
                tokio::time::sleep(Duration::from_secs(30)).await;
                continue;
            };
            if let Err(err) = self.step(&mission, &controller).await {
                error!(mission = %mission.id, %err, "mission step failed");
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }

    /// Execute one step of a mission through the controller.
    pub async fn step(&self, mission: &Mission, controller: &Controller) -> Result<()> {
        info!(mission = %mission.id, description = %mission.description, "mission step");
        {
            let mut missions = self.missions.lock().unwrap();
            if let Some(m) = missions.iter_mut().find(|m| m.id == mission.id) {
                m.status = MissionStatus::Active;
                m.last_check = Some(Utc::now());
            }
        }

        let prompt = format!(
            "MISSION: {}\nSTATUS: {:.1}% complete\n\
             GOAL: As an autonomous agent, execute the next logical step for this mission.\n\
             If complete, say MISSION COMPLETE. If blocked, report it.",
            mission.description,
            mission.progress * 100.0
        );
        let response = controller.process_request(&prompt, None, &[]).await;
        let digest: String = response.chars().take(100).collect();
        info!(mission = %mission.id, %digest, "mission step result");

        let complete = response.to_uppercase().contains("MISSION COMPLETE");
        {
            let mut missions = self.missions.lock().unwrap();
            if let Some(m) = missions.iter_mut().find(|m| m.id == mission.id) {
                if complete {
                    if m.is_recurring() {
                        m.status = MissionStatus::Pending;
                        m.progress = 0.0;
                        info!(mission = %m.id, "recurring mission cycle complete");
                    } else {
                        m.status = MissionStatus::Complete;
                        m.progress = 1.0;
                        info!(mission = %m.id, "mission completed");
                    }
                } else {
                    m.status = MissionStatus::Pending;
                    m.progress = (m.progress + 0.1).min(0.95);
                }
            }
            if complete {
                missions.retain(|m| m.status != MissionStatus::Complete);
            }
        }
        self.save()
    }
}

/// 1-minute load average divided by core count; 0.0 where unavailable.
pub fn system_load_fraction() -> f32 {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as f32;
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|raw| raw.split_whitespace().next().and_then(|v| v.parse::<f32>().ok()))
        .map(|load| load / cores)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn defaults_hydrate_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let control = MissionControl::open(dir.path(), 0.8);
        assert_eq!(control.list().len(), 2);
    }

    #[test]
    fn due_respects_cooldown() {
        let mut mission = Mission::new("sync", 10, MissionKind::Research, 3600);
        assert!(mission.due(Utc::now()), "never-run missions are due");

        mission.last_check = Some(Utc::now());
        assert!(!mission.due(Utc::now()));

        mission.last_check = Some(Utc::now() - ChronoDuration::seconds(4000));
        assert!(mission.due(Utc::now()));
    }

    #[test]
    fn cron_schedule_overrides_interval() {
        let mut mission = Mission::new("nightly", 10, MissionKind::Maintenance, 0);
        // Every second; last check one minute ago → due.
        mission.schedule = Some("* * * * * *".to_string());
        mission.last_check = Some(Utc::now() - ChronoDuration::seconds(60));
        assert!(mission.due(Utc::now()));
    }

    #[test]
    fn highest_priority_due_mission_wins() {
        let dir = tempfile::tempdir().unwrap();
        let control = MissionControl::open(dir.path(), 0.8);
        let next = control.next_due().unwrap();
        assert_eq!(next.description, "Daily knowledge synthesis");
    }

    #[test]
    fn missions_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let control = MissionControl::open(dir.path(), 0.8);
            control.add("watch the build", 50, MissionKind::Monitoring, 600);
        }
        let control = MissionControl::open(dir.path(), 0.8);
        assert!(control.list().iter().any(|m| m.description == "watch the build"));
    }

    #[test]
    fn load_fraction_is_finite() {
        let load = system_load_fraction();
        assert!(load.is_finite());
        assert!(load >= 0.0);
    }
}
