/// Internal routing failures. The router's public `execute` surface never
/// returns these; they are folded into error envelopes at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no connection registered for agent '{0}'")]
    NotConnected(String),

    #[error("agent channel closed for '{0}'")]
    ChannelClosed(String),

    #[error("a request with id {0} is already pending")]
    DuplicateRequest(String),
}
