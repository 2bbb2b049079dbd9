use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::result::SafetyLevel;
use crate::validator::SecurityValidator;

/// Closed set of structured-command action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Diagnose,
    Restart,
    Deploy,
    Scale,
    Cleanup,
    Configure,
}

impl ActionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diagnose => "diagnose",
            Self::Restart => "restart",
            Self::Deploy => "deploy",
            Self::Scale => "scale",
            Self::Cleanup => "cleanup",
            Self::Configure => "configure",
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

/// Structured command carrying its own safety metadata, typically produced
/// by a planning collaborator and approved before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsCommand {
    pub action: ActionKind,
    pub command: String,
    pub description: String,
    pub safety_level: SafetyLevel,
    #[serde(default)]
    pub estimated_impact: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub verification_commands: Vec<String>,
    #[serde(default)]
    pub rollback_procedure: Option<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl OpsCommand {
    #[must_use]
    pub fn new(action: ActionKind, command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action,
            command: command.into(),
            description: description.into(),
            safety_level: SafetyLevel::Moderate,
            estimated_impact: String::new(),
            prerequisites: Vec::new(),
            verification_commands: Vec::new(),
            rollback_procedure: None,
            requires_confirmation: false,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Apply a safety level proposed by a collaborator; the declared level
    /// can only be raised, never lowered. Raising to `Dangerous` also turns
    /// on the confirmation requirement.
    pub fn apply_proposed_safety(&mut self, proposed: SafetyLevel) {
        self.safety_level = SafetyLevel::escalate(self.safety_level, proposed);
        if self.safety_level == SafetyLevel::Dangerous {
            self.requires_confirmation = true;
        }
    }

    /// Check structural consistency before any execution attempt.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::Validation` on empty fields or an unconfirmed
    /// dangerous command, and `ExecError::SecurityViolation` when the
    /// embedded command fails policy validation.
    pub fn validate_structure(&self, validator: &SecurityValidator) -> Result<(), ExecError> {
        if self.command.trim().is_empty() {
            return Err(ExecError::Validation {
                field: "command".into(),
                message: "command cannot be empty".into(),
            });
        }
        if self.description.trim().is_empty() {
            return Err(ExecError::Validation {
                field: "description".into(),
                message: "description cannot be empty".into(),
            });
        }
        if self.safety_level == SafetyLevel::Dangerous && !self.requires_confirmation {
            return Err(ExecError::Validation {
                field: "requires_confirmation".into(),
                message: "dangerous commands must require confirmation".into(),
            });
        }
        validator
            .validate(&self.command)
            .map_err(|rejection| ExecError::SecurityViolation {
                command: self.command.clone(),
                reason: rejection.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;

    fn validator() -> SecurityValidator {
        SecurityValidator::new(SecurityConfig::default()).unwrap()
    }

    fn sample() -> OpsCommand {
        OpsCommand::new(ActionKind::Diagnose, "df -h", "check disk usage")
    }

    #[test]
    fn action_kind_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ActionKind::Restart).unwrap(),
            "\"restart\""
        );
        let parsed: ActionKind = serde_json::from_str("\"deploy\"").unwrap();
        assert_eq!(parsed, ActionKind::Deploy);
    }

    #[test]
    fn valid_structure_passes() {
        assert!(sample().validate_structure(&validator()).is_ok());
    }

    #[test]
    fn empty_command_fails_validation() {
        let mut cmd = sample();
        cmd.command = "   ".into();
        let err = cmd.validate_structure(&validator()).unwrap_err();
        assert!(matches!(err, ExecError::Validation { ref field, .. } if field == "command"));
    }

    #[test]
    fn empty_description_fails_validation() {
        let mut cmd = sample();
        cmd.description = String::new();
        let err = cmd.validate_structure(&validator()).unwrap_err();
        assert!(matches!(err, ExecError::Validation { ref field, .. } if field == "description"));
    }

    #[test]
    fn dangerous_without_confirmation_fails() {
        let mut cmd = sample();
        cmd.safety_level = SafetyLevel::Dangerous;
        cmd.requires_confirmation = false;
        let err = cmd.validate_structure(&validator()).unwrap_err();
        assert!(
            matches!(err, ExecError::Validation { ref field, .. } if field == "requires_confirmation")
        );
    }

    #[test]
    fn dangerous_with_confirmation_passes() {
        let mut cmd = sample();
        cmd.safety_level = SafetyLevel::Dangerous;
        cmd.requires_confirmation = true;
        assert!(cmd.validate_structure(&validator()).is_ok());
    }

    #[test]
    fn embedded_command_checked_against_policy() {
        let mut cmd = sample();
        cmd.command = "sudo systemctl restart nginx".into();
        let err = cmd.validate_structure(&validator()).unwrap_err();
        assert!(matches!(err, ExecError::SecurityViolation { .. }));
    }

    #[test]
    fn proposed_safety_only_escalates() {
        let mut cmd = sample();
        cmd.safety_level = SafetyLevel::Moderate;

        cmd.apply_proposed_safety(SafetyLevel::Safe);
        assert_eq!(cmd.safety_level, SafetyLevel::Moderate);

        cmd.apply_proposed_safety(SafetyLevel::Risky);
        assert_eq!(cmd.safety_level, SafetyLevel::Risky);
        assert!(!cmd.requires_confirmation);
    }

    #[test]
    fn escalation_to_dangerous_forces_confirmation() {
        let mut cmd = sample();
        cmd.apply_proposed_safety(SafetyLevel::Dangerous);
        assert_eq!(cmd.safety_level, SafetyLevel::Dangerous);
        assert!(cmd.requires_confirmation);
        assert!(cmd.validate_structure(&validator()).is_ok());
    }

    #[test]
    fn deserialize_with_defaults() {
        let json = r#"{
            "action": "diagnose",
            "command": "df -h",
            "description": "disk usage",
            "safety_level": "safe"
        }"#;
        let cmd: OpsCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.timeout_secs, 300);
        assert!(!cmd.requires_confirmation);
        assert!(cmd.verification_commands.is_empty());
    }
}
