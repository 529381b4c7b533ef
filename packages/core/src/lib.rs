// ABOUTME: Core types, traits, and utilities for Conduit
// ABOUTME: Foundational package providing the action data model shared across all packages

pub mod response;
pub mod result;
pub mod types;
pub mod utils;
pub mod validation;

pub use response::ApiResponse;
pub use result::{ErrorInfo, ExecutionResult};
pub use types::{ActionIntent, ActionStatus, ActionType, RiskLevel};
pub use utils::truncate_output;
pub use validation::{validate_project_id, ValidationError};
