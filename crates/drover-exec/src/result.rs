use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordinal risk classification of a command.
///
/// `Cautious` and `Risky` are the intermediate tiers used by the
/// structured-command approval flow; heuristic assessment only produces
/// `Safe`, `Moderate`, and `Dangerous`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Cautious,
    #[default]
    Moderate,
    Risky,
    Dangerous,
}

impl SafetyLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Cautious => "cautious",
            Self::Moderate => "moderate",
            Self::Risky => "risky",
            Self::Dangerous => "dangerous",
        }
    }

    /// Combine a caller-declared level with one proposed by a collaborator.
    ///
    /// The result is the maximum of the two: a proposal may raise the
    /// declared level but never lower it. Escalations are logged.
    #[must_use]
    pub fn escalate(declared: Self, proposed: Self) -> Self {
        let effective = declared.max(proposed);
        if effective > declared {
            tracing::info!(
                declared = declared.as_str(),
                proposed = proposed.as_str(),
                "safety level escalated"
            );
        }
        effective
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conventional exit code for commands killed by the wall-clock timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Immutable record of one command execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub safety_level: SafetyLevel,
    pub executed_at: DateTime<Utc>,
}

impl CommandResult {
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration: Duration,
        safety_level: SafetyLevel,
    ) -> Self {
        Self {
            command: command.into(),
            exit_code,
            stdout,
            stderr,
            duration_ms: duration_millis(duration),
            safety_level,
            executed_at: Utc::now(),
        }
    }

    /// Synthetic failure for attempts that never produced an exit status
    /// (spawn failure, batch task error).
    #[must_use]
    pub fn failed(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::new(
            command,
            -1,
            String::new(),
            stderr.into(),
            Duration::ZERO,
            SafetyLevel::Safe,
        )
    }

    /// Result for a command killed at its wall-clock deadline.
    ///
    /// No partial stdout is reported; the stderr names the elapsed time and
    /// the configured limit.
    #[must_use]
    pub fn timed_out(
        command: impl Into<String>,
        elapsed: Duration,
        limit: Duration,
        safety_level: SafetyLevel,
    ) -> Self {
        let stderr = format!(
            "command timed out after {:.1}s (limit {}s)",
            elapsed.as_secs_f64(),
            limit.as_secs()
        );
        Self::new(
            command,
            TIMEOUT_EXIT_CODE,
            String::new(),
            stderr,
            elapsed,
            safety_level,
        )
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    #[must_use]
    pub fn timed_out_result(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
