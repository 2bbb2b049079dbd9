//! Command classification and routing: decide whether a command runs on a
//! remote agent, on the core server, or via the hybrid collect-then-enrich
//! path, then coordinate execution and track its status.

pub mod capability;
pub mod classify;
pub mod config;
pub mod error;
pub mod format;
pub mod kv;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod status;

pub use capability::{AgentCapabilities, authorize};
pub use classify::{Classification, CommandClassifier, ExecutionLocation, SupportedCommands};
pub use config::RouterConfig;
pub use error::RouterError;
pub use kv::{KvStore, MemoryKv};
pub use protocol::AgentEnvelope;
pub use registry::{AgentTx, ConnectionRegistry};
pub use router::{CommandOutcome, CommandRouter};
pub use status::{CommandStatus, ExecutionStatus, StatusBoard};
