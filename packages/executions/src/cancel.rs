// ABOUTME: Cooperative cancellation for execution batches
// ABOUTME: Checked between actions; an action already running finishes first

use tokio_util::sync::CancellationToken;

/// Cancels one batch. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl From<CancellationToken> for CancellationHandle {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}
