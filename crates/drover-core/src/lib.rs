//! Configuration loading for the Drover workspace.

pub mod config;

pub use config::{Config, LlmConfig};
