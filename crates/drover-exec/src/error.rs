/// Errors that can occur during secure command execution.
///
/// Only policy failures surface as errors: ordinary command failures
/// (non-zero exit, timeout, spawn error) are folded into `CommandResult`
/// so callers inspect `success`/`exit_code` uniformly.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command blocked: {reason}")]
    SecurityViolation { command: String, reason: String },

    #[error("command requires explicit confirmation: {command}")]
    ConfirmationRequired { command: String },

    #[error("invalid command structure ({field}): {message}")]
    Validation { field: String, message: String },

    #[error("invalid dangerous-pattern regex: {0}")]
    Pattern(#[from] regex::Error),

    #[error("audit sink setup failed: {0}")]
    Audit(#[from] std::io::Error),
}

impl ExecError {
    /// True for rejections caused by policy rather than malformed input.
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::SecurityViolation { .. } | Self::ConfirmationRequired { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_violation_display() {
        let err = ExecError::SecurityViolation {
            command: "rm -rf /".into(),
            reason: "command 'rm' is explicitly blocked".into(),
        };
        assert_eq!(
            err.to_string(),
            "command blocked: command 'rm' is explicitly blocked"
        );
    }

    #[test]
    fn confirmation_required_display() {
        let err = ExecError::ConfirmationRequired {
            command: "systemctl restart nginx".into(),
        };
        assert!(err.to_string().contains("requires explicit confirmation"));
    }

    #[test]
    fn validation_display() {
        let err = ExecError::Validation {
            field: "description".into(),
            message: "description cannot be empty".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid command structure (description): description cannot be empty"
        );
    }

    #[test]
    fn policy_rejection_classification() {
        let violation = ExecError::SecurityViolation {
            command: "x".into(),
            reason: "y".into(),
        };
        let confirm = ExecError::ConfirmationRequired { command: "x".into() };
        let validation = ExecError::Validation {
            field: "command".into(),
            message: "empty".into(),
        };
        assert!(violation.is_policy_rejection());
        assert!(confirm.is_policy_rejection());
        assert!(!validation.is_policy_rejection());
    }
}
