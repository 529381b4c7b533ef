// ABOUTME: Action extraction and planning for Conduit
// ABOUTME: Model text -> ActionIntents (extractor) -> risk-settled, ordered ExecutionPlan (validator)

pub mod context;
pub mod error;
pub mod extractor;
pub mod plan;
pub mod risk;
pub mod rules;
pub mod validator;

pub use context::ConversationContext;
pub use error::{ValidationError, ValidationResult};
pub use extractor::{ActionExtractor, Extraction};
pub use plan::ExecutionPlan;
pub use rules::{ExtractionRule, RuleMatch, RuleSet};
pub use validator::ActionValidator;
