use serde::{Deserialize, Serialize};

fn default_core_timeout() -> u64 {
    300
}

fn default_retention() -> u64 {
    300
}

fn default_agent_timeout() -> u64 {
    30
}

fn default_enrichment_max_tokens() -> u32 {
    1024
}

/// Routing behavior: the core path's fixed timeout (independent of the
/// caller's), how long finished status entries are retained for polling,
/// and the default agent-reply timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_core_timeout")]
    pub core_timeout_secs: u64,
    #[serde(default = "default_retention")]
    pub status_retention_secs: u64,
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_enrichment_max_tokens")]
    pub enrichment_max_tokens: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            core_timeout_secs: default_core_timeout(),
            status_retention_secs: default_retention(),
            agent_timeout_secs: default_agent_timeout(),
            enrichment_max_tokens: default_enrichment_max_tokens(),
        }
    }
}
