// ABOUTME: Registry mapping project ids to their sandboxes
// ABOUTME: Sandboxes are created lazily under the workspace root unless registered explicitly

use crate::error::SandboxResult;
use crate::project::ProjectSandbox;
use conduit_config::SandboxLimits;
use conduit_core::validate_project_id;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub struct SandboxRegistry {
    workspace_root: PathBuf,
    limits: SandboxLimits,
    sandboxes: RwLock<HashMap<String, Arc<ProjectSandbox>>>,
}

impl SandboxRegistry {
    pub fn new(workspace_root: impl Into<PathBuf>, limits: SandboxLimits) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            limits,
            sandboxes: RwLock::new(HashMap::new()),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Register a project rooted at an explicit directory, replacing any previous entry.
    pub async fn register(
        &self,
        project_id: &str,
        root: impl AsRef<Path>,
        env: BTreeMap<String, String>,
    ) -> SandboxResult<Arc<ProjectSandbox>> {
        let mut sandbox = ProjectSandbox::open(project_id, root, self.limits.clone()).await?;
        for (key, value) in env {
            sandbox = sandbox.with_env(key, value);
        }
        let sandbox = Arc::new(sandbox);

        info!(
            "Registered sandbox for project {} at {}",
            project_id,
            sandbox.root().display()
        );
        self.sandboxes
            .write()
            .await
            .insert(project_id.to_string(), sandbox.clone());
        Ok(sandbox)
    }

    /// Sandbox for `project_id`, creating `<workspace_root>/<project_id>` on first use.
    pub async fn get(&self, project_id: &str) -> SandboxResult<Arc<ProjectSandbox>> {
        validate_project_id(project_id)?;

        if let Some(existing) = self.sandboxes.read().await.get(project_id) {
            return Ok(existing.clone());
        }

        let mut sandboxes = self.sandboxes.write().await;
        if let Some(existing) = sandboxes.get(project_id) {
            return Ok(existing.clone());
        }
        let sandbox = Arc::new(
            ProjectSandbox::open(
                project_id,
                self.workspace_root.join(project_id),
                self.limits.clone(),
            )
            .await?,
        );
        sandboxes.insert(project_id.to_string(), sandbox.clone());
        Ok(sandbox)
    }

    /// Forget a project. Files on disk are left in place.
    pub async fn remove(&self, project_id: &str) -> bool {
        self.sandboxes.write().await.remove(project_id).is_some()
    }

    pub async fn project_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sandboxes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
