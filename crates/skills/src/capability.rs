use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SafetyTier;

/// A named permission granting one or more skills the right to run at a
/// given safety tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub safety_tier: SafetyTier,
    pub read_only: bool,
    pub requires_confirmation: bool,
    pub enabled: bool,
    pub linked_skills: Vec<String>,
}

/// Result of a permission check, with enough detail for logging and
/// user-facing denial messages.
#[derive(Debug, Clone)]
pub struct CapabilityCheck {
    pub allowed: bool,
    pub exists: bool,
    pub enabled: bool,
    pub reason: String,
    pub capability: Option<String>,
}

impl CapabilityCheck {
    fn denied(exists: bool, enabled: bool, reason: String, capability: Option<String>) -> Self {
        Self { allowed: false, exists, enabled, reason, capability }
    }

    fn granted(capability: &str) -> Self {
        Self {
            allowed: true,
            exists: true,
            enabled: true,
            reason: format!("Permission granted by capability '{capability}'."),
            capability: Some(capability.to_string()),
        }
    }
}

/// Permission tiers gating skills.  Mapping is first by concrete action
/// (e.g. a filesystem write maps to `filesystem_write`), then by the
/// linked-skills fallback.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        let mut registry = Self { capabilities: HashMap::new() };
        registry.install_defaults();
        registry
    }

    fn install_defaults(&mut self) {
        self.register(Capability {
            name: "internet_research".into(),
            description: "Access the public internet for search and reading content.".into(),
            safety_tier: SafetyTier::Safe,
            read_only: true,
            requires_confirmation: false,
            enabled: true,
            linked_skills: vec!["research".into()],
        });
        self.register(Capability {
            name: "filesystem_read".into(),
            description: "Read files and list directories on the local system.".into(),
            safety_tier: SafetyTier::Safe,
            read_only: true,
            requires_confirmation: false,
            enabled: true,
            linked_skills: vec!["filesystem".into()],
        });
        self.register(Capability {
            name: "filesystem_write".into(),
            description: "Create, edit, or delete files on the local system.".into(),
            safety_tier: SafetyTier::Medium,
            read_only: false,
            requires_confirmation: true,
            enabled: true,
            linked_skills: vec!["filesystem".into()],
        });
        self.register(Capability {
            name: "shell_exec".into(),
            description: "Execute shell commands on the host OS.".into(),
            safety_tier: SafetyTier::Destructive,
            read_only: false,
            requires_confirmation: true,
            enabled: true,
            linked_skills: vec!["shell".into()],
        });
        self.register(Capability {
            name: "desktop_control".into(),
            description: "Drive applications, windows and media playback.".into(),
            safety_tier: SafetyTier::Medium,
            read_only: false,
            requires_confirmation: false,
            enabled: true,
            linked_skills: vec!["system_control".into(), "media_control".into()],
        });
        self.register(Capability {
            name: "introspection".into(),
            description: "Read-only access to the assistant's own state.".into(),
            safety_tier: SafetyTier::Safe,
            read_only: true,
            requires_confirmation: false,
            enabled: true,
            linked_skills: vec!["clock".into()],
        });
    }

    pub fn register(&mut self, capability: Capability) {
        self.capabilities.insert(capability.name.clone(), capability);
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.capabilities.get_mut(name) {
            Some(cap) => {
                cap.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Map a skill + params to its governing capability.
    fn capability_for(&self, skill_name: &str, params: &Value) -> Option<&'static str> {
        match skill_name {
            "research" => Some("internet_research"),
            "filesystem" => {
                let action = params.get("action").and_then(|v| v.as_str()).unwrap_or("");
                if matches!(action, "write" | "write_file" | "delete" | "delete_file" | "create_dir") {
                    Some("filesystem_write")
                } else {
                    Some("filesystem_read")
                }
            }
            "shell" => Some("shell_exec"),
            "system_control" | "media_control" => Some("desktop_control"),
            _ => None,
        }
    }

    /// Verify a skill is allowed by an active capability.
    pub fn check(&self, skill_name: &str, params: &Value) -> CapabilityCheck {
        if let Some(cap_name) = self.capability_for(skill_name, params) {
            return match self.get(cap_name) {
                None => CapabilityCheck::denied(
                    false,
                    false,
                    format!("Capability '{cap_name}' is not installed."),
                    Some(cap_name.to_string()),
                ),
                Some(cap) if !cap.enabled => CapabilityCheck::denied(
                    true,
                    false,
                    format!("Capability '{cap_name}' is installed but currently disabled."),
                    Some(cap_name.to_string()),
                ),
                Some(_) => CapabilityCheck::granted(cap_name),
            };
        }

        // Fallback: scan linked skills.
        for cap in self.capabilities.values() {
            if cap.linked_skills.iter().any(|s| s == skill_name) {
                if !cap.enabled {
                    return CapabilityCheck::denied(
                        true,
                        false,
                        format!("Capability '{}' (linked to {skill_name}) is disabled.", cap.name),
                        Some(cap.name.clone()),
                    );
                }
                return CapabilityCheck::granted(&cap.name);
            }
        }

        CapabilityCheck::denied(
            false,
            false,
            format!("No capability found in registry for skill '{skill_name}'."),
            None,
        )
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filesystem_write_maps_to_write_capability() {
        let registry = CapabilityRegistry::new();
        let check = registry.check("filesystem", &json!({"action": "write", "path": "a.txt"}));
        assert!(check.allowed);
        assert_eq!(check.capability.as_deref(), Some("filesystem_write"));

        let check = registry.check("filesystem", &json!({"action": "read", "path": "a.txt"}));
        assert_eq!(check.capability.as_deref(), Some("filesystem_read"));
    }

    #[test]
    fn disabled_capability_denies_with_reason() {
        let mut registry = CapabilityRegistry::new();
        registry.set_enabled("shell_exec", false);
        let check = registry.check("shell", &json!({"command": "ls"}));
        assert!(!check.allowed);
        assert!(check.exists);
        assert!(!check.enabled);
        assert!(check.reason.contains("disabled"));
    }

    #[test]
    fn linked_skill_fallback_grants() {
        let registry = CapabilityRegistry::new();
        let check = registry.check("clock", &json!({}));
        assert!(check.allowed);
        assert_eq!(check.capability.as_deref(), Some("introspection"));
    }

    #[test]
    fn unknown_skill_is_denied() {
        let registry = CapabilityRegistry::new();
        let check = registry.check("made_up_skill", &json!({}));
        assert!(!check.allowed);
        assert!(!check.exists);
    }
}
