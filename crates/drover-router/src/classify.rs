use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a classified command actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionLocation {
    /// On the remote agent host (local system information).
    Agent,
    /// On the core server (centralized processing).
    Core,
    /// Agent collects data, core enriches it with text generation.
    Hybrid,
}

impl ExecutionLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Core => "core",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ExecutionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one (command, args) pair.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub location: ExecutionLocation,
    pub command: String,
    pub subcommand: Option<String>,
    pub reasoning: String,
    pub requires_ai: bool,
    pub requires_local_access: bool,
}

/// Commands that must run on the agent host. An empty-string subcommand
/// entry matches the bare module with no subcommand.
const AGENT_COMMANDS: &[(&str, &[&str])] = &[
    (
        "health",
        &[
            "disk",
            "cpu-memory",
            "network",
            "monitor",
            "processes",
            "system-health",
            "check-disk-usage",
            "check-cpu-memory",
            "check-network",
            "list-processes",
            "check-disk-status",
        ],
    ),
    (
        "system",
        &[
            "info",
            "environment",
            "show-environment",
            "system-info",
            "get-system-info",
        ],
    ),
];

const CORE_COMMANDS: &[(&str, &[&str])] = &[
    ("health", &[""]),
    (
        "infrastructure",
        &[
            "generate",
            "deploy",
            "monitor-infra",
            "analyze",
            "scale",
            "apply-manifest",
            "cost-analysis",
            "security-scan",
            "compliance-check",
            "performance-analysis",
            "comprehensive-analysis",
            "list-available-templates",
            "generate-template",
        ],
    ),
    (
        "incidents",
        &["detect", "respond", "playbook", "create", "manage", "analyze", "predict"],
    ),
    ("workflows", &["run", "create", "manage", "list", "status", "cancel"]),
    ("ai", &["ask", "predict", "assistant", "analyze", "generate"]),
    ("agents", &["list", "status", "register", "unregister", "manage"]),
];

const HYBRID_COMMANDS: &[(&str, &[&str])] = &[
    ("logs", &["analyze"]),
    ("health", &["analyze"]),
    ("system", &["audit"]),
];

/// Pure classifier over static lookup tables. Unrecognized commands
/// default to core execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandClassifier;

impl CommandClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn classify(&self, command: &str, args: &[String]) -> Classification {
        let subcommand = args.first().map(String::as_str);

        if table_contains(HYBRID_COMMANDS, command, subcommand) {
            return Classification {
                location: ExecutionLocation::Hybrid,
                command: command.to_owned(),
                subcommand: subcommand.map(str::to_owned),
                reasoning: format!(
                    "hybrid: {command} {} requires local data collection and enrichment",
                    subcommand.unwrap_or_default()
                ),
                requires_ai: true,
                requires_local_access: true,
            };
        }

        if table_contains(CORE_COMMANDS, command, subcommand) {
            return core_classification(command, subcommand, "requires centralized processing");
        }

        if table_contains(AGENT_COMMANDS, command, subcommand) {
            return Classification {
                location: ExecutionLocation::Agent,
                command: command.to_owned(),
                subcommand: subcommand.map(str::to_owned),
                reasoning: format!(
                    "agent: {command} {} requires local system information",
                    subcommand.unwrap_or_default()
                ),
                requires_ai: false,
                requires_local_access: true,
            };
        }

        // Module-level fallbacks, core first.
        if table_has_module(CORE_COMMANDS, command) {
            return core_classification(command, subcommand, "module requires centralized processing");
        }

        if table_has_module(AGENT_COMMANDS, command) {
            return Classification {
                location: ExecutionLocation::Agent,
                command: command.to_owned(),
                subcommand: subcommand.map(str::to_owned),
                reasoning: format!("agent: {command} module handles local system operations"),
                requires_ai: false,
                requires_local_access: true,
            };
        }

        Classification {
            location: ExecutionLocation::Core,
            command: command.to_owned(),
            subcommand: subcommand.map(str::to_owned),
            reasoning: format!("core: unknown command {command} defaults to centralized execution"),
            requires_ai: false,
            requires_local_access: false,
        }
    }

    /// All known commands grouped by execution location, for capability
    /// negotiation and help output.
    #[must_use]
    pub fn supported_commands(&self) -> SupportedCommands {
        SupportedCommands {
            agent: table_to_map(AGENT_COMMANDS),
            core: table_to_map(CORE_COMMANDS),
            hybrid: table_to_map(HYBRID_COMMANDS),
        }
    }
}

/// Known commands per location: module name → subcommands.
#[derive(Debug, Clone, Serialize)]
pub struct SupportedCommands {
    pub agent: BTreeMap<String, Vec<String>>,
    pub core: BTreeMap<String, Vec<String>>,
    pub hybrid: BTreeMap<String, Vec<String>>,
}

fn core_classification(command: &str, subcommand: Option<&str>, why: &str) -> Classification {
    Classification {
        location: ExecutionLocation::Core,
        command: command.to_owned(),
        subcommand: subcommand.map(str::to_owned),
        reasoning: format!("core: {command} {why}"),
        requires_ai: command != "health",
        requires_local_access: false,
    }
}

fn table_contains(table: &[(&str, &[&str])], module: &str, subcommand: Option<&str>) -> bool {
    table.iter().any(|(m, subs)| {
        *m == module
            && match subcommand {
                Some(sub) => subs.contains(&sub),
                None => subs.contains(&""),
            }
    })
}

fn table_has_module(table: &[(&str, &[&str])], module: &str) -> bool {
    table.iter().any(|(m, _)| *m == module)
}

fn table_to_map(table: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    table
        .iter()
        .map(|(module, subs)| {
            (
                (*module).to_owned(),
                subs.iter()
                    .filter(|s| !s.is_empty())
                    .map(|s| (*s).to_owned())
                    .collect(),
            )
        })
        .collect()
}
