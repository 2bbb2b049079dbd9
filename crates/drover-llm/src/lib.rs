//! Text-generation collaborator: provider trait, Ollama backend, and a
//! mock for tests.

pub mod error;
pub mod mock;
pub mod ollama;
pub mod provider;
mod retry;

pub use error::LlmError;
pub use mock::MockGenerator;
pub use ollama::OllamaGenerator;
pub use provider::TextGenerator;
