use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use drover_exec::{AuditConfig, ExecutorConfig, SecurityConfig};
use drover_router::RouterConfig;

/// Top-level configuration, composed from the per-crate sections.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "gpt-oss:20b".into()
}

fn default_true() -> bool {
    true
}

/// Text-generation provider settings for the hybrid enrichment path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DROVER_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("DROVER_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("DROVER_AUDIT_DESTINATION") {
            self.audit.destination = v;
        }
    }
}
