use std::collections::HashMap;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::capability::AgentCapabilities;
use crate::error::RouterError;
use crate::protocol::AgentEnvelope;

/// Outbound channel handed over by the transport layer when an agent
/// connects. The transport drains it onto the wire.
pub type AgentTx = mpsc::UnboundedSender<AgentEnvelope>;

#[derive(Debug)]
struct AgentConnection {
    outbound: AgentTx,
    capabilities: Option<AgentCapabilities>,
}

/// Router-owned registry of live agent connections and in-flight request
/// correlation. An absent connection is a normal, expected condition that
/// callers handle by falling back, not an error state of the registry.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, AgentConnection>>,
    pending: Mutex<HashMap<String, oneshot::Sender<AgentEnvelope>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        name: &str,
        outbound: AgentTx,
        capabilities: Option<AgentCapabilities>,
    ) {
        tracing::info!(agent = name, "agent connected");
        self.connections.lock().await.insert(
            name.to_owned(),
            AgentConnection {
                outbound,
                capabilities,
            },
        );
    }

    pub async fn unregister(&self, name: &str) {
        if self.connections.lock().await.remove(name).is_some() {
            tracing::info!(agent = name, "agent disconnected");
        }
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.connections.lock().await.contains_key(name)
    }

    pub async fn connected_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn capabilities(&self, name: &str) -> Option<AgentCapabilities> {
        self.connections
            .lock()
            .await
            .get(name)
            .and_then(|c| c.capabilities.clone())
    }

    /// Send a correlated request to an agent and return the receiver for
    /// its reply.
    ///
    /// # Errors
    ///
    /// `NotConnected` when no connection is registered for the target,
    /// `DuplicateRequest` when the request id is already pending, and
    /// `ChannelClosed` when the transport has gone away.
    pub async fn send_request(
        &self,
        target: &str,
        envelope: AgentEnvelope,
    ) -> Result<oneshot::Receiver<AgentEnvelope>, RouterError> {
        let request_id = envelope.request_id().to_owned();

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&request_id) {
                return Err(RouterError::DuplicateRequest(request_id));
            }
            pending.insert(request_id.clone(), tx);
        }

        let send_result = {
            let connections = self.connections.lock().await;
            match connections.get(target) {
                Some(connection) => connection
                    .outbound
                    .send(envelope)
                    .map_err(|_| RouterError::ChannelClosed(target.to_owned())),
                None => Err(RouterError::NotConnected(target.to_owned())),
            }
        };

        if let Err(e) = send_result {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        Ok(rx)
    }

    /// Complete the pending request matching this reply. Returns false when
    /// nothing was waiting (late or unsolicited reply).
    pub async fn resolve(&self, reply: AgentEnvelope) -> bool {
        let request_id = reply.request_id().to_owned();
        let Some(tx) = self.pending.lock().await.remove(&request_id) else {
            tracing::debug!(%request_id, "dropping reply with no pending request");
            return false;
        };
        tx.send(reply).is_ok()
    }

    /// Drop a pending request, e.g. after the caller's await timed out.
    pub async fn cancel_pending(&self, request_id: &str) {
        self.pending.lock().await.remove(request_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
