use std::fmt;

use regex::Regex;

use crate::config::SecurityConfig;
use crate::result::SafetyLevel;

/// Shell metacharacters and substitution markers treated as injection
/// indicators. Escaped newline/CR variants are included because commands
/// frequently arrive through one or more JSON decoding layers.
const INJECTION_INDICATORS: &[&str] = &[
    ";", "&&", "||", "|", ">", ">>", "<", "$(", "`", "$((", "${", "\n", "\r", "\\n", "\\r",
];

/// Destinations that make a redirect look like logging rather than injection.
const REDIRECT_ALLOWED_HINTS: &[&str] = &["tee", "log", ".txt", ".log"];

const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "rm", "delete", "drop", "truncate", "format", "destroy", "mkfs",
];

const SERVICE_KEYWORDS: &[&str] = &[
    "systemctl", "service", "docker", "kubectl", "nginx", "apache",
];

const READ_ONLY_KEYWORDS: &[&str] = &[
    "echo", "ls", "cat", "grep", "find", "head", "tail", "ps", "df", "free", "top", "pwd", "date",
    "whoami", "id", "env",
];

/// Why a command was rejected. Messages are category labels only; raw
/// pattern sources never leak to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    Parse(String),
    NotWhitelisted(String),
    Blocked(String),
    DangerousPattern,
    Injection,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty command not allowed"),
            Self::Parse(reason) => write!(f, "command parsing failed: {reason}"),
            Self::NotWhitelisted(cmd) => {
                write!(f, "command '{cmd}' is not in the whitelist")
            }
            Self::Blocked(cmd) => write!(f, "command '{cmd}' is explicitly blocked"),
            Self::DangerousPattern => {
                f.write_str("command matches a dangerous pattern and cannot be executed")
            }
            Self::Injection => {
                f.write_str("potential command injection detected and blocked")
            }
        }
    }
}

/// Stateless policy checker: whitelist/blocklist membership, dangerous
/// pattern scan, injection heuristics, and safety-level assessment.
#[derive(Debug)]
pub struct SecurityValidator {
    config: SecurityConfig,
    patterns: Vec<Regex>,
}

impl SecurityValidator {
    /// Compile the configured dangerous-pattern regexes.
    ///
    /// # Errors
    ///
    /// Returns an error when a configured pattern is not a valid regex.
    pub fn new(config: SecurityConfig) -> Result<Self, regex::Error> {
        let patterns = config
            .dangerous_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, patterns })
    }

    /// Validate a command against the security policy. Fails closed.
    ///
    /// # Errors
    ///
    /// Returns the first matching `Rejection`: empty input, tokenization
    /// failure, whitelist miss, blocklist hit, dangerous-pattern match, or
    /// injection indicator.
    pub fn validate(&self, command: &str) -> Result<(), Rejection> {
        if !self.config.validation_enabled {
            return Ok(());
        }

        let command = command.trim();
        if command.is_empty() {
            return Err(Rejection::Empty);
        }

        let tokens = shlex::split(command)
            .ok_or_else(|| Rejection::Parse("unbalanced quoting or escape".into()))?;
        let base = tokens.first().ok_or(Rejection::Empty)?;

        if self.config.whitelist_enabled && !self.config.allowed_commands.contains(base) {
            return Err(Rejection::NotWhitelisted(base.clone()));
        }

        if self.config.blocked_commands.contains(base) {
            return Err(Rejection::Blocked(base.clone()));
        }

        if self.patterns.iter().any(|p| p.is_match(command)) {
            return Err(Rejection::DangerousPattern);
        }

        if detect_injection(command) {
            return Err(Rejection::Injection);
        }

        Ok(())
    }

    /// Classify the risk of a command by keyword, defaulting unknown
    /// commands to `Moderate` rather than `Safe`.
    #[must_use]
    pub fn assess_safety(&self, command: &str) -> SafetyLevel {
        let lowered = command.to_lowercase();

        if DESTRUCTIVE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return SafetyLevel::Dangerous;
        }
        if SERVICE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return SafetyLevel::Moderate;
        }
        if READ_ONLY_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return SafetyLevel::Safe;
        }

        SafetyLevel::Moderate
    }

    #[must_use]
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Injection heuristic with two narrow carve-outs: a pipe is tolerated when
/// the command invokes a filter like grep, and redirects are tolerated when
/// paired with a logging destination. The carve-outs are policy data, known
/// to be bypassable, not a security guarantee.
fn detect_injection(command: &str) -> bool {
    for indicator in INJECTION_INDICATORS {
        if !command.contains(indicator) {
            continue;
        }
        if *indicator == "|" && command.contains("grep") {
            continue;
        }
        if (*indicator == ">" || *indicator == ">>")
            && REDIRECT_ALLOWED_HINTS.iter().any(|hint| command.contains(hint))
        {
            continue;
        }
        return true;
    }
    false
}
