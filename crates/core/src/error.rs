use thiserror::Error;

/// Classified failure kinds inside the request pipeline.
///
/// The controller never re-raises: every variant is rendered into a
/// user-visible string at the boundary.  The classification drives which
/// string, what gets logged as a failure lesson, and which signals move.
#[derive(Debug, Error)]
pub enum CognitionError {
    /// Governor veto or quiescent state — terminal refusal.
    #[error("I cannot comply. {0}")]
    Governed(String),

    /// Capability denial or protected-zone hit — terminal per action.
    #[error("Action blocked by safety policy: {0}")]
    SafetyBlocked(String),

    /// Skill raised an error; captured as an observation.
    #[error("Action failed: {cause}")]
    SkillFailure { skill: String, cause: String },

    /// Skill exceeded its execution budget.
    #[error("Action timed out (limit {limit_secs}s).")]
    SkillTimeout { skill: String, limit_secs: u64 },

    /// The consciousness stack itself failed (model error, schema chaos).
    #[error("My deliberation layer encountered an error: {0}")]
    Consciousness(String),

    /// State could not be persisted; never fatal to the request.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl CognitionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CognitionError::SkillTimeout { .. })
    }

    pub fn skill_name(&self) -> Option<&str> {
        match self {
            CognitionError::SkillFailure { skill, .. }
            | CognitionError::SkillTimeout { skill, .. } => Some(skill),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_presentable() {
        let err = CognitionError::Governed("Risk of system destruction".into());
        assert_eq!(err.to_string(), "I cannot comply. Risk of system destruction");

        let err = CognitionError::SkillTimeout { skill: "shell".into(), limit_secs: 30 };
        assert!(err.is_timeout());
        assert_eq!(err.skill_name(), Some("shell"));
        assert!(err.to_string().contains("30"));
    }
}
