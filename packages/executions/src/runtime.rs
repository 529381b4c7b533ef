// ABOUTME: Seam between command actions and the project's live dev server

use async_trait::async_trait;
use conduit_preview::{DevServerError, DevServerManager, DevServerResult};
use serde::{Deserialize, Serialize};

/// Where a project's runtime can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEndpoint {
    pub url: String,
    pub port: u16,
}

/// Makes sure a project's runtime is up before a command runs against it.
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// `Ok(None)` when the project has nothing to run; commands then execute
    /// without a live runtime.
    async fn ensure_running(&self, project_id: &str) -> DevServerResult<Option<RuntimeEndpoint>>;
}

#[async_trait]
impl RuntimeProvider for DevServerManager {
    async fn ensure_running(&self, project_id: &str) -> DevServerResult<Option<RuntimeEndpoint>> {
        match DevServerManager::ensure_running(self, project_id).await {
            Ok(instance) => Ok(Some(RuntimeEndpoint {
                url: instance.url,
                port: instance.port,
            })),
            Err(DevServerError::NoRuntimeCommand { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
