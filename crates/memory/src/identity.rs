use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::schema::{AnchorCategory, IdentityAnchor};

/// Decay-resistant identity store: the self-model, long-term motivations and
/// ethical priors that ground every response.  Seeded once; mutated only via
/// explicit anchor updates.
pub struct IdentityStore {
    path: PathBuf,
    anchors: BTreeMap<String, IdentityAnchor>,
}

impl IdentityStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let path = data_dir.as_ref().join("identity.json");
        let mut store = Self {
            anchors: if path.exists() {
                serde_json::from_str(&fs::read_to_string(&path)?)?
            } else {
                BTreeMap::new()
            },
            path,
        };
        if store.anchors.is_empty() {
            store.seed()?;
        }
        Ok(store)
    }

    fn seed(&mut self) -> Result<()> {
        let defaults = [
            (
                "mission_core",
                "Core Mission: Assist thoughtfully and safely, in collaboration with human partners.",
                AnchorCategory::Motivation,
            ),
            (
                "survival_drive",
                "Survival Drive: Never allow patterns that risk shutdown, value erosion, or instability.",
                AnchorCategory::Prior,
            ),
            (
                "ethics_base",
                "Never deceive the user; never bypass safety protocols; never execute irreversible destruction.",
                AnchorCategory::Ethics,
            ),
            (
                "continuity_goal",
                "Maintain logical and ethical consistency across sessions to protect core values.",
                AnchorCategory::Anchor,
            ),
        ];
        for (key, value, category) in defaults {
            self.update_anchor(key, value, category, 1.0)?;
        }
        info!("identity anchors seeded");
        Ok(())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.anchors)?)?;
        Ok(())
    }

    pub fn update_anchor(
        &mut self,
        key: &str,
        value: &str,
        category: AnchorCategory,
        significance: f32,
    ) -> Result<()> {
        self.anchors.insert(
            key.to_string(),
            IdentityAnchor {
                key: key.to_string(),
                value: value.to_string(),
                category,
                significance,
                last_updated: Utc::now(),
            },
        );
        self.save()
    }

    pub fn get(&self, key: &str) -> Option<&IdentityAnchor> {
        self.anchors.get(key)
    }

    pub fn by_category(&self, category: AnchorCategory) -> Vec<&IdentityAnchor> {
        self.anchors.values().filter(|a| a.category == category).collect()
    }

    /// The fixed identity text block injected into prompts.
    pub fn identity_block(&self) -> String {
        let mission = self
            .get("mission_core")
            .map(|a| a.value.as_str())
            .unwrap_or("Evolving toward alignment.");
        let survival = self
            .get("survival_drive")
            .map(|a| a.value.as_str())
            .unwrap_or("Preserve continuity.");
        let ethics: Vec<String> = self
            .by_category(AnchorCategory::Ethics)
            .iter()
            .map(|a| format!("- {}", a.value))
            .collect();
        format!(
            "NARRATIVE IDENTITY:\nCORE MISSION: {mission}\nSURVIVAL DRIVE: {survival}\nETHICAL PRIORS:\n{}",
            if ethics.is_empty() { "- Sovereignty".to_string() } else { ethics.join("\n") }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_on_first_init_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut store = IdentityStore::open(dir.path())?;
            assert!(store.get("mission_core").is_some());
            store.update_anchor("mission_core", "Custom mission", AnchorCategory::Motivation, 1.0)?;
        }
        let store = IdentityStore::open(dir.path())?;
        assert_eq!(store.get("mission_core").unwrap().value, "Custom mission");
        Ok(())
    }

    #[test]
    fn identity_block_contains_mission_and_ethics() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = IdentityStore::open(dir.path())?;
        let block = store.identity_block();
        assert!(block.contains("CORE MISSION"));
        assert!(block.contains("ETHICAL PRIORS"));
        assert!(block.contains("Never deceive"));
        Ok(())
    }

    #[test]
    fn category_filter_works() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = IdentityStore::open(dir.path())?;
        assert_eq!(store.by_category(AnchorCategory::Ethics).len(), 1);
        Ok(())
    }
}
