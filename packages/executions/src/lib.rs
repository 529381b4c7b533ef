// ABOUTME: Action execution for validated plans
// ABOUTME: Per-project batches with retries, rollback, confirmation pauses and cancellation

pub mod cancel;
pub mod error;
pub mod executor;
mod rollback;
pub mod runtime;
pub mod types;

pub use cancel::CancellationHandle;
pub use error::{ExecutionError, ExecutorResult};
pub use executor::{ActionExecutor, BatchHandle};
pub use runtime::{RuntimeEndpoint, RuntimeProvider};
pub use types::{
    ActionState, BatchOutcome, ConfirmationRequest, ExecuteOptions, RollbackRecord, SkipReason,
};
