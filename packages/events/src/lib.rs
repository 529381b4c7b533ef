// ABOUTME: Event streaming for project progress
// ABOUTME: Ordered per-project channels with sequence numbers and drop-on-lag backpressure

pub mod broadcaster;
pub mod event;

pub use broadcaster::{EventBroadcaster, Subscription};
pub use event::{EventKind, ProjectEvent};
