use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_allowed() -> Vec<String> {
    ["ls", "cat", "grep", "echo", "pwd", "whoami", "date"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

fn default_blocked() -> Vec<String> {
    ["rm", "sudo", "chmod", "chown"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

fn default_dangerous_patterns() -> Vec<String> {
    [r"rm\s+-rf", r"sudo\s+", r"chmod\s+777"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

/// Security policy for command validation.
///
/// When `whitelist_enabled` is set, only base commands listed in
/// `allowed_commands` may run; the blocklist is checked in the same
/// validation pass regardless of whitelist mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub validation_enabled: bool,
    #[serde(default)]
    pub whitelist_enabled: bool,
    #[serde(default = "default_allowed")]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_blocked")]
    pub blocked_commands: Vec<String>,
    #[serde(default = "default_dangerous_patterns")]
    pub dangerous_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            validation_enabled: true,
            whitelist_enabled: false,
            allowed_commands: default_allowed(),
            blocked_commands: default_blocked(),
            dangerous_patterns: default_dangerous_patterns(),
        }
    }
}

fn default_timeout() -> u64 {
    300
}

fn default_max_parallel() -> usize {
    3
}

fn default_verification_timeout() -> u64 {
    30
}

/// Execution limits for the secure command executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_verification_timeout")]
    pub verification_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_parallel: default_max_parallel(),
            verification_timeout_secs: default_verification_timeout(),
        }
    }
}

fn default_destination() -> String {
    "stdout".into()
}

/// Audit trail sink: `"stdout"` or a file path (one JSON object per line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_destination")]
    pub destination: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: default_destination(),
        }
    }
}
