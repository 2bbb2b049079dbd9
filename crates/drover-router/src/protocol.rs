use serde::{Deserialize, Serialize};

/// Messages exchanged with remote agents over the transport collaborator.
///
/// The core is format-agnostic about how these cross the wire; the
/// transport layer serializes them (JSON in practice) and feeds inbound
/// ones back through `ConnectionRegistry::resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEnvelope {
    CommandRequest {
        request_id: String,
        command: String,
        args: Vec<String>,
        timeout_secs: u64,
    },
    CommandResult {
        request_id: String,
        success: bool,
        return_code: i32,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_data: Option<serde_json::Value>,
    },
    StatusUpdate {
        request_id: String,
        #[serde(default)]
        progress_percent: Option<u8>,
        #[serde(default)]
        current_step: Option<String>,
    },
    CommandCancel {
        request_id: String,
    },
}

impl AgentEnvelope {
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::CommandRequest { request_id, .. }
            | Self::CommandResult { request_id, .. }
            | Self::StatusUpdate { request_id, .. }
            | Self::CommandCancel { request_id } => request_id,
        }
    }
}
