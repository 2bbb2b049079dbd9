use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capabilities advertised by an agent at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub agent_name: String,
    /// Command modules the agent can execute. Empty means unrestricted:
    /// agents that advertise nothing are not gated.
    pub supported_modules: Vec<String>,
    pub version: String,
    pub last_seen: DateTime<Utc>,
}

impl AgentCapabilities {
    #[must_use]
    pub fn new(agent_name: impl Into<String>, supported_modules: Vec<String>, version: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            supported_modules,
            version: version.into(),
            last_seen: Utc::now(),
        }
    }
}

/// Pure authorization check: does the agent's advertised capability set
/// cover the required command module? Called explicitly at the dispatch
/// boundary.
#[must_use]
pub fn authorize(required_module: &str, capabilities: &AgentCapabilities) -> bool {
    capabilities.supported_modules.is_empty()
        || capabilities
            .supported_modules
            .iter()
            .any(|module| module == required_module)
}
