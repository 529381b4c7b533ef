// ABOUTME: Configuration and environment variable management for Conduit
// ABOUTME: Env var names, typed env parsing, and the orchestrator policy parameters

pub mod constants;
pub mod env;
pub mod settings;

pub use env::{parse_env_or_default, parse_env_or_default_with_validation};
pub use settings::{DevServerConfig, EventConfig, ExecutorConfig, OrchestratorConfig, SandboxLimits};
