// ABOUTME: Applies an action's rollback plan after it failed
// ABOUTME: "delete" and "restore" use the pre-mutation snapshot; anything else runs as a shell command

use conduit_core::ActionIntent;
use conduit_sandbox::{CommandOptions, FileSnapshot, ProjectSandbox, SandboxError};
use std::time::Duration;
use tracing::{debug, info};

/// Rollback recipes understood without a shell
const DELETE: &str = "delete";
const RESTORE: &str = "restore";

/// Run `plan` for a failed `action`. Returns a short summary or the failure reason.
pub(crate) async fn apply(
    sandbox: &ProjectSandbox,
    action: &ActionIntent,
    plan: &str,
    snapshot: Option<&FileSnapshot>,
    timeout: Duration,
) -> Result<String, String> {
    let plan = plan.trim();
    info!(
        "Rolling back action {} in project {} with '{}'",
        action.id,
        sandbox.project_id(),
        plan
    );

    match (plan.to_ascii_lowercase().as_str(), snapshot) {
        (DELETE | RESTORE, Some(snapshot)) => {
            bounded(timeout, sandbox.restore(snapshot)).await?;
            Ok(if snapshot.existed() {
                format!("Restored {}", snapshot.path)
            } else {
                format!("Removed {}", snapshot.path)
            })
        }
        // No snapshot means the action failed before writing; whatever is at
        // the path was there before and is not ours to remove
        (DELETE | RESTORE, None) => {
            debug!("Nothing to undo for action {}", action.id);
            Ok("Nothing to undo".to_string())
        }
        _ => {
            let output = bounded(
                timeout,
                sandbox.run_command(plan, CommandOptions::default().with_timeout(timeout)),
            )
            .await?;
            if output.success() {
                Ok(format!("Ran '{}'", plan))
            } else {
                Err(format!(
                    "'{}' exited with {:?}: {}",
                    plan,
                    output.exit_code,
                    output.combined().trim()
                ))
            }
        }
    }
}

async fn bounded<T, F>(timeout: Duration, operation: F) -> Result<T, String>
where
    F: std::future::Future<Output = Result<T, SandboxError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("Rollback timed out after {:?}", timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::SandboxLimits;
    use conduit_core::ActionType;
    use tempfile::TempDir;

    async fn sandbox(dir: &TempDir) -> ProjectSandbox {
        ProjectSandbox::open("rollback", dir.path(), SandboxLimits::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_restore_puts_previous_content_back() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;
        sandbox.write_file("a.txt", "old").await.unwrap();
        let snapshot = sandbox.write_file("a.txt", "new").await.unwrap();

        let action = ActionIntent::new("u", ActionType::FileUpdate, "update").with_param("path", "a.txt");
        apply(&sandbox, &action, "restore", Some(&snapshot), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(sandbox.read_file("a.txt").await.unwrap(), "old");
    }

    #[tokio::test]
    async fn test_delete_without_snapshot_leaves_existing_file() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;
        sandbox.write_file("keep.txt", "user data").await.unwrap();
        let action = ActionIntent::new("c", ActionType::FileCreate, "create").with_param("path", "keep.txt");

        let summary = apply(&sandbox, &action, "delete", None, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(summary, "Nothing to undo");
        assert_eq!(sandbox.read_file("keep.txt").await.unwrap(), "user data");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_rollback_reports_exit_status() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;
        let action = ActionIntent::new("r", ActionType::CommandExecute, "run").with_param("command", "true");

        assert!(apply(&sandbox, &action, "touch undone", None, Duration::from_secs(5))
            .await
            .is_ok());
        assert!(dir.path().join("undone").exists());

        let err = apply(&sandbox, &action, "exit 3", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.contains("Some(3)"));
    }
}
