//! Fast-path intent recognition, bypassing the consciousness stack.
//!
//! Three stages: exact-text reply cache, learned patterns promoted by the
//! evolution engine (persisted across restarts), and a static regex table
//! for surface commands.  Target latency is well under 200 ms — nothing
//! here touches a model.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;
use lru::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::schema::ActionCall;

const CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub skill: String,
    pub params: Value,
    pub learned_at: chrono::DateTime<Utc>,
}

struct StaticPattern {
    regex: Regex,
    skill: &'static str,
    /// Parameter template; `{group}` placeholders fill from named captures.
    params: &'static [(&'static str, &'static str)],
}

pub struct ReflexLayer {
    cache: Mutex<LruCache<String, String>>,
    learned: Mutex<HashMap<String, LearnedPattern>>,
    statics: Vec<StaticPattern>,
    path: Option<PathBuf>,
}

fn normalize(input: &str) -> String {
    input.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

impl ReflexLayer {
    pub fn new(data_dir: Option<&Path>) -> Self {
        let path = data_dir.map(|d| d.join("reflex_learned.json"));
        let learned = path
            .as_ref()
            .filter(|p| p.exists())
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Self {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
            learned: Mutex::new(learned),
            statics: Self::static_table(),
            path,
        }
    }

    fn static_table() -> Vec<StaticPattern> {
        let table: &[(&str, &'static str, &'static [(&'static str, &'static str)])] = &[
            // App launching
            (r"^open\s+(?P<name>[\w\s]+)$", "system_control", &[("action", "open_app"), ("name", "{name}")]),
            (r"^launch\s+(?P<name>[\w\s]+)$", "system_control", &[("action", "open_app"), ("name", "{name}")]),
            // UI interaction
            (r"^type\s+(?P<text>.+)$", "system_control", &[("action", "type"), ("text", "{text}")]),
            (r"^click\s+(?P<x>\d+)\s+(?P<y>\d+)$", "system_control", &[("action", "click"), ("x", "{x}"), ("y", "{y}")]),
            (r"^scroll\s+(?P<amount>-?\d+)$", "system_control", &[("action", "scroll"), ("amount", "{amount}")]),
            (r"^press\s+(?P<key>\w+)$", "system_control", &[("action", "press"), ("key", "{key}")]),
            // Research
            (r"^search\s+(?P<query>.+)$", "research", &[("query", "{query}")]),
            (r"^google\s+(?P<query>.+)$", "research", &[("query", "{query}")]),
            // Media
            (r"^pause\b.*$", "media_control", &[("action", "play_pause")]),
            (r"^play\b.*$", "media_control", &[("action", "play_pause")]),
            (r"^resume\b.*$", "media_control", &[("action", "play_pause")]),
            (r"^stop\s+music.*$", "media_control", &[("action", "stop")]),
            (r"^next\s+(track|song).*$", "media_control", &[("action", "next_track")]),
            (r"^skip\b.*$", "media_control", &[("action", "next_track")]),
            (r"^prev(ious)?\s+(track|song).*$", "media_control", &[("action", "prev_track")]),
            (r"^mute\b.*$", "media_control", &[("action", "mute")]),
            (r"^unmute\b.*$", "media_control", &[("action", "mute")]),
            (r"^volume\s+up.*$", "media_control", &[("action", "volume_up")]),
            (r"^volume\s+down.*$", "media_control", &[("action", "volume_down")]),
        ];
        table
            .iter()
            .filter_map(|&(pattern, skill, params)| {
                Regex::new(pattern)
                    .ok()
                    .map(|regex| StaticPattern { regex, skill, params })
            })
            .collect()
    }

    /// Process input through the reflex stages.  `(None, None)` means fall
    /// through to the consciousness stack.
    pub fn think(&self, user_input: &str) -> (Option<String>, Option<ActionCall>) {
        let clean = user_input.to_lowercase().trim().to_string();

        // 1. Exact-text reply cache.
        if let Some(reply) = self.cache.lock().unwrap().get(&clean) {
            return (Some(reply.clone()), None);
        }

        // 2. Learned patterns, normalized.
        let normalized = normalize(&clean);
        if let Some(pattern) = self.learned.lock().unwrap().get(&normalized) {
            info!(input = %normalized, skill = %pattern.skill, "reflex learned-pattern match");
            return (
                None,
                Some(ActionCall::new(pattern.skill.clone(), pattern.params.clone())),
            );
        }

        // 3. Static surface commands.
        for pattern in &self.statics {
            if let Some(captures) = pattern.regex.captures(&clean) {
                let mut params = serde_json::Map::new();
                for (key, template) in pattern.params {
                    let mut value = template.to_string();
                    for name in pattern.regex.capture_names().flatten() {
                        if let Some(m) = captures.name(name) {
                            value = value.replace(&format!("{{{name}}}"), m.as_str().trim());
                        }
                    }
                    let json_value = if value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty() {
                        json!(value.parse::<i64>().unwrap_or_default())
                    } else {
                        json!(value)
                    };
                    params.insert(key.to_string(), json_value);
                }
                return (None, Some(ActionCall::new(pattern.skill, Value::Object(params))));
            }
        }

        (None, None)
    }

    /// Learn a reply from the heavy path so the next identical input is
    /// served from cache.
    pub fn cache_reply(&self, user_input: &str, reply: &str) {
        self.cache
            .lock()
            .unwrap()
            .put(user_input.to_lowercase().trim().to_string(), reply.to_string());
    }

    /// Install a learned input→action pattern.  Persists immediately so
    /// promotions survive restarts.
    pub fn learn_pattern(&self, user_input: &str, skill: &str, params: Value) -> Result<()> {
        let normalized = normalize(user_input);
        info!(input = %normalized, skill, "reflex pattern learned");
        self.learned.lock().unwrap().insert(
            normalized,
            LearnedPattern {
                skill: skill.to_string(),
                params,
                learned_at: Utc::now(),
            },
        );
        self.save()
    }

    pub fn learned_count(&self) -> usize {
        self.learned.lock().unwrap().len()
    }

    pub fn has_learned(&self, user_input: &str) -> bool {
        self.learned.lock().unwrap().contains_key(&normalize(user_input))
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let learned = self.learned.lock().unwrap();
        if let Err(err) = std::fs::write(path, serde_json::to_string_pretty(&*learned)?) {
            warn!(%err, "failed to persist learned patterns");
        }
        Ok(())
    }
}
