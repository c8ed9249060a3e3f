//! Dynamic skills as declarative manifests.
//!
//! The evolution engine does not hot-load source code.  A synthesized skill
//! is a TOML descriptor whose steps delegate to already-registered skills
//! with parameter templates.  Validation rejects forbidden code fragments,
//! unknown delegates, and malformed descriptors before anything is written
//! to the dynamic skills directory.

use std::path::Path;
use std::sync::{Arc, Weak};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::SkillRegistry;
use crate::{SafetyTier, Skill};

/// Fragments that must never appear anywhere in a synthesized manifest.
const FORBIDDEN_FRAGMENTS: &[&str] = &[
    "eval", "exec", "__import__", "subprocess", "os.system", "popen", "spawn",
];

/// One delegated step: call `skill` with `params` after template
/// substitution.  `{input}` expands to the invocation's `input` parameter;
/// `{param:NAME}` expands to the named invocation parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestStep {
    pub skill: String,
    pub params: toml::value::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub schema: Option<toml::value::Table>,
    pub steps: Vec<ManifestStep>,
}

impl SkillManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading manifest {}", path.as_ref().display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn safety_tier(&self) -> SafetyTier {
        match self.tier.as_deref() {
            Some("destructive") => SafetyTier::Destructive,
            Some("medium") => SafetyTier::Medium,
            _ => SafetyTier::Safe,
        }
    }

    /// Reject unsafe or malformed manifests.  The registry is consulted so
    /// every delegate resolves to a real skill.
    pub fn validate(&self, registry: &SkillRegistry) -> Result<()> {
        if self.name.trim().is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            bail!("manifest name must be non-empty snake_case");
        }
        if self.description.trim().is_empty() {
            bail!("manifest requires a description");
        }
        if self.steps.is_empty() {
            bail!("manifest requires at least one step");
        }

        // Scan the dispatching surface (name, delegates, parameter values);
        // prose in the description is not executable and stays unscanned.
        let mut surface = self.name.to_lowercase();
        for step in &self.steps {
            surface.push(' ');
            surface.push_str(&step.skill.to_lowercase());
            surface.push(' ');
            surface.push_str(&toml::to_string(&step.params).unwrap_or_default().to_lowercase());
        }
        for fragment in FORBIDDEN_FRAGMENTS {
            if surface.contains(fragment) {
                bail!("forbidden fragment '{fragment}' in manifest");
            }
        }

        for step in &self.steps {
            if !registry.contains(&step.skill) {
                bail!("step delegates to unknown skill '{}'", step.skill);
            }
            if step.skill == self.name {
                bail!("manifest may not delegate to itself");
            }
        }
        Ok(())
    }
}

/// A registered skill backed by a validated manifest.  Executes its steps
/// in order, feeding each step the invocation parameters through template
/// substitution; step outputs are concatenated.
pub struct DynamicSkill {
    manifest: SkillManifest,
    registry: Weak<SkillRegistry>,
}

impl DynamicSkill {
    pub fn new(manifest: SkillManifest, registry: Weak<SkillRegistry>) -> Self {
        Self { manifest, registry }
    }

    fn substitute(template: &str, params: &Value) -> String {
        let mut out = template.to_string();
        if let Some(input) = params.get("input").and_then(|v| v.as_str()) {
            out = out.replace("{input}", input);
        }
        if let Some(obj) = params.as_object() {
            for (key, value) in obj {
                let placeholder = format!("{{param:{key}}}");
                if out.contains(&placeholder) {
                    let rendered = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    out = out.replace(&placeholder, &rendered);
                }
            }
        }
        out
    }

    fn render_params(&self, step: &ManifestStep, params: &Value) -> Value {
        let mut rendered = serde_json::Map::new();
        for (key, value) in &step.params {
            let json_value = match value {
                toml::Value::String(s) => Value::String(Self::substitute(s, params)),
                toml::Value::Integer(i) => Value::from(*i),
                toml::Value::Float(f) => Value::from(*f),
                toml::Value::Boolean(b) => Value::from(*b),
                other => Value::String(other.to_string()),
            };
            rendered.insert(key.clone(), json_value);
        }
        Value::Object(rendered)
    }
}

#[async_trait]
impl Skill for DynamicSkill {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn schema(&self) -> Value {
        match &self.manifest.schema {
            Some(table) => serde_json::to_value(table).unwrap_or_else(|_| serde_json::json!({})),
            None => serde_json::json!({
                "type": "object",
                "properties": {
                    "input": { "type": "string", "description": "free-form input" }
                },
                "required": []
            }),
        }
    }

    fn safety_tier(&self) -> SafetyTier {
        self.manifest.safety_tier()
    }

    async fn execute(&self, params: &Value) -> Result<String> {
        let Some(registry) = self.registry.upgrade() else {
            bail!("skill registry is gone");
        };
        let mut outputs = Vec::with_capacity(self.manifest.steps.len());
        for step in &self.manifest.steps {
            let Some(delegate) = registry.get(&step.skill) else {
                bail!("delegate skill '{}' disappeared", step.skill);
            };
            let step_params = self.render_params(step, params);
            let output = delegate.execute(&step_params).await?;
            outputs.push(output);
        }
        Ok(outputs.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Skill for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its text parameter"
        }
        async fn execute(&self, params: &Value) -> Result<String> {
            Ok(params.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
        }
    }

    fn registry_with_echo() -> Arc<SkillRegistry> {
        let registry = Arc::new(SkillRegistry::new());
        registry.register(Arc::new(Echo));
        registry
    }

    const GOOD: &str = r#"
name = "shout"
description = "Echoes input twice"

[[steps]]
skill = "echo"
[steps.params]
text = "{input}!"

[[steps]]
skill = "echo"
[steps.params]
text = "{input}!!"
"#;

    #[test]
    fn good_manifest_validates() {
        let registry = registry_with_echo();
        let manifest = SkillManifest::parse(GOOD).unwrap();
        assert!(manifest.validate(&registry).is_ok());
    }

    #[test]
    fn forbidden_fragments_are_rejected() {
        let registry = registry_with_echo();
        let raw = GOOD.replace("{input}!", "subprocess {input}");
        let manifest = SkillManifest::parse(&raw).unwrap();
        let err = manifest.validate(&registry).unwrap_err();
        assert!(err.to_string().contains("forbidden fragment"));
    }

    #[test]
    fn unknown_delegate_is_rejected() {
        let registry = registry_with_echo();
        let raw = GOOD.replace("skill = \"echo\"", "skill = \"ghost\"");
        let manifest = SkillManifest::parse(&raw).unwrap();
        assert!(manifest.validate(&registry).is_err());
    }

    #[test]
    fn bad_names_are_rejected() {
        let registry = registry_with_echo();
        let raw = GOOD.replace("name = \"shout\"", "name = \"Bad Name\"");
        let manifest = SkillManifest::parse(&raw).unwrap();
        assert!(manifest.validate(&registry).is_err());
    }

    #[tokio::test]
    async fn dynamic_skill_runs_steps_with_substitution() {
        let registry = registry_with_echo();
        let manifest = SkillManifest::parse(GOOD).unwrap();
        manifest.validate(&registry).unwrap();

        let dynamic = DynamicSkill::new(manifest, Arc::downgrade(&registry));
        let out = dynamic
            .execute(&serde_json::json!({"input": "hey"}))
            .await
            .unwrap();
        assert_eq!(out, "hey!\nhey!!");
    }

    #[tokio::test]
    async fn registered_dynamic_skill_is_callable_via_registry() {
        let registry = registry_with_echo();
        let manifest = SkillManifest::parse(GOOD).unwrap();
        manifest.validate(&registry).unwrap();
        registry.register(Arc::new(DynamicSkill::new(manifest, Arc::downgrade(&registry))));

        let skill = registry.get("shout").unwrap();
        let out = skill.execute(&serde_json::json!({"input": "go"})).await.unwrap();
        assert!(out.contains("go!"));
    }

    #[test]
    fn named_param_substitution_works() {
        let params = serde_json::json!({"input": "a", "city": "Paris"});
        let out = DynamicSkill::substitute("weather in {param:city}", &params);
        assert_eq!(out, "weather in Paris");
    }
}
