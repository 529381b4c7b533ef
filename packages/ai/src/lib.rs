// ABOUTME: Chat orchestration for Conduit
// ABOUTME: Model reply in, extracted and validated plan executed, structured response out

pub mod error;
pub mod model;
pub mod service;
pub mod suggestions;
pub mod types;

pub use error::{ChatError, ChatResult};
pub use model::{AnthropicClient, ModelClient, ModelPrompt, ScriptedModelClient};
pub use service::ChatService;
pub use types::{AssistantMessage, ChatData, ChatOptions, ChatRequest, ResponseMetadata};
