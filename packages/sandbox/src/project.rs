// ABOUTME: ProjectSandbox - the filesystem and environment boundary of one project
// ABOUTME: Resolves relative paths inside the root and rejects anything that escapes it

use crate::error::{SandboxError, SandboxResult};
use conduit_config::SandboxLimits;
use conduit_core::validate_project_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Directories never descended into when listing project files
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "target", "dist", ".next", "__pycache__"];

/// Prior state of a file, captured before a mutation so it can be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Sandbox-relative path
    pub path: String,
    /// Content before the mutation; `None` when the file did not exist
    pub previous: Option<String>,
}

impl FileSnapshot {
    pub fn existed(&self) -> bool {
        self.previous.is_some()
    }
}

/// Isolation boundary for a single project.
#[derive(Debug, Clone)]
pub struct ProjectSandbox {
    project_id: String,
    root: PathBuf,
    env: BTreeMap<String, String>,
    limits: SandboxLimits,
}

impl ProjectSandbox {
    /// Open (creating if needed) the sandbox rooted at `root`.
    pub async fn open(
        project_id: &str,
        root: impl AsRef<Path>,
        limits: SandboxLimits,
    ) -> SandboxResult<Self> {
        validate_project_id(project_id)?;

        fs::create_dir_all(root.as_ref()).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        debug!("Opened sandbox for project {} at {}", project_id, root.display());

        Ok(Self {
            project_id: project_id.to_string(),
            root,
            env: BTreeMap::new(),
            limits,
        })
    }

    /// Add a variable to the sandbox environment. Takes precedence over `.env`.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    fn violation(&self, path: &str, reason: &str) -> SandboxError {
        warn!(
            "Rejected path '{}' for project {}: {}",
            path, self.project_id, reason
        );
        SandboxError::PathViolation {
            project_id: self.project_id.clone(),
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Map a sandbox-relative path to an absolute path inside the root.
    ///
    /// Normalization is lexical first (no `..` may climb above the root), then
    /// the deepest existing ancestor is canonicalized so symlinks cannot point
    /// outside the sandbox.
    pub fn resolve(&self, relative: &str) -> SandboxResult<PathBuf> {
        let trimmed = relative.trim();
        if trimmed.is_empty() {
            return Err(self.violation(relative, "empty path"));
        }

        let mut normalized = PathBuf::new();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(self.violation(relative, "path traversal above project root"));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(self.violation(relative, "absolute paths are not allowed"));
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(self.violation(relative, "path resolves to the project root"));
        }

        let candidate = self.root.join(&normalized);

        let mut existing = candidate.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        let canonical = std::fs::canonicalize(existing)?;
        if !canonical.starts_with(&self.root) {
            return Err(self.violation(relative, "symlink points outside project root"));
        }

        Ok(candidate)
    }

    pub async fn file_exists(&self, path: &str) -> SandboxResult<bool> {
        let resolved = self.resolve(path)?;
        Ok(fs::metadata(&resolved)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    pub async fn read_file(&self, path: &str) -> SandboxResult<String> {
        let resolved = self.resolve(path)?;
        match fs::read_to_string(&resolved).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SandboxError::FileNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_optional(&self, resolved: &Path) -> SandboxResult<Option<String>> {
        match fs::read_to_string(resolved).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `content` to `path`, creating parent directories.
    ///
    /// Returns the snapshot of what was there before.
    pub async fn write_file(&self, path: &str, content: &str) -> SandboxResult<FileSnapshot> {
        if content.len() > self.limits.max_file_bytes {
            return Err(SandboxError::FileTooLarge {
                path: path.to_string(),
                size: content.len(),
                limit: self.limits.max_file_bytes,
            });
        }

        let resolved = self.resolve(path)?;
        let previous = self.read_optional(&resolved).await?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&resolved, content).await?;
        debug!(
            "Wrote {} bytes to {} in project {}",
            content.len(),
            path,
            self.project_id
        );

        Ok(FileSnapshot {
            path: path.to_string(),
            previous,
        })
    }

    /// Remove the file at `path`.
    pub async fn delete_file(&self, path: &str) -> SandboxResult<FileSnapshot> {
        let resolved = self.resolve(path)?;
        let previous = match self.read_optional(&resolved).await? {
            Some(content) => content,
            None => {
                return Err(SandboxError::FileNotFound {
                    path: path.to_string(),
                })
            }
        };

        fs::remove_file(&resolved).await?;
        debug!("Deleted {} in project {}", path, self.project_id);

        Ok(FileSnapshot {
            path: path.to_string(),
            previous: Some(previous),
        })
    }

    /// Put a file back the way a snapshot recorded it.
    pub async fn restore(&self, snapshot: &FileSnapshot) -> SandboxResult<()> {
        let resolved = self.resolve(&snapshot.path)?;
        match &snapshot.previous {
            Some(content) => {
                if let Some(parent) = resolved.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&resolved, content).await?;
            }
            None => match fs::remove_file(&resolved).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    /// Sandbox-relative paths of project files, sorted, bounded by the listing limit.
    pub async fn list_files(&self) -> SandboxResult<Vec<String>> {
        let root = self.root.clone();
        let limit = self.limits.max_listed_files;

        let files = tokio::task::spawn_blocking(move || {
            let mut files: Vec<String> = walkdir::WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0
                        || !entry
                            .file_name()
                            .to_str()
                            .map(|name| IGNORED_DIRS.contains(&name))
                            .unwrap_or(false)
                })
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    entry
                        .path()
                        .strip_prefix(&root)
                        .ok()
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                })
                .collect();
            files.sort();
            files.truncate(limit);
            files
        })
        .await
        .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;

        Ok(files)
    }

    /// Environment for processes run in this sandbox: the project's `.env`
    /// file overlaid with explicitly configured variables.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        let dotenv_path = self.root.join(".env");
        if dotenv_path.is_file() {
            match dotenvy::from_path_iter(&dotenv_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                env.insert(key, value);
                            }
                            Err(e) => {
                                warn!("Skipping malformed .env entry in {}: {}", self.project_id, e)
                            }
                        }
                    }
                }
                Err(e) => warn!("Failed to read .env for project {}: {}", self.project_id, e),
            }
        }

        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}
