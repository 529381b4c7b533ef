// ABOUTME: Chooses the command that starts a project's runtime
// ABOUTME: package.json scripts first, then a static file server, then a configured fallback

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Package manager detected from lock files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
        }
    }

    /// Command line that runs `script` from package.json
    pub fn run_script(&self, script: &str) -> String {
        format!("{} run {}", self.as_str(), script)
    }
}

/// How a runtime command was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Node,
    Static,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCommand {
    pub kind: RuntimeKind,
    pub command: String,
}

/// Pick the runtime command for the project at `root`.
///
/// `{port}` in a fallback command is replaced with the allocated port.
pub fn detect_runtime_command(
    root: &Path,
    port: u16,
    fallback: Option<&str>,
) -> Option<RuntimeCommand> {
    if let Some(script) = dev_script(root) {
        let command = detect_package_manager(root).run_script(&script);
        debug!("Using package.json script for {}: {}", root.display(), command);
        return Some(RuntimeCommand {
            kind: RuntimeKind::Node,
            command,
        });
    }

    if root.join("index.html").is_file() {
        return Some(RuntimeCommand {
            kind: RuntimeKind::Static,
            command: format!("python3 -m http.server {} --bind 127.0.0.1", port),
        });
    }

    fallback.map(|command| RuntimeCommand {
        kind: RuntimeKind::Fallback,
        command: command.replace("{port}", &port.to_string()),
    })
}

/// First of `dev`, `start` declared in package.json
fn dev_script(root: &Path) -> Option<String> {
    let content = std::fs::read_to_string(root.join("package.json")).ok()?;
    let package_json: Value = serde_json::from_str(&content).ok()?;
    let scripts = package_json.get("scripts")?.as_object()?;

    ["dev", "start"]
        .into_iter()
        .find(|name| scripts.get(*name).and_then(Value::as_str).is_some())
        .map(str::to_string)
}

/// Detect package manager by checking for lock files
pub fn detect_package_manager(root: &Path) -> PackageManager {
    if root.join("bun.lockb").exists() {
        PackageManager::Bun
    } else if root.join("pnpm-lock.yaml").exists() {
        PackageManager::Pnpm
    } else if root.join("yarn.lock").exists() {
        PackageManager::Yarn
    } else {
        PackageManager::Npm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_prefers_dev_script() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts":{"start":"node server.js","dev":"vite"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();

        let cmd = detect_runtime_command(dir.path(), 8000, None).unwrap();
        assert_eq!(cmd.kind, RuntimeKind::Node);
        assert_eq!(cmd.command, "yarn run dev");
    }

    #[test]
    fn test_start_script_when_no_dev() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts":{"start":"node server.js"}}"#,
        )
        .unwrap();

        let cmd = detect_runtime_command(dir.path(), 8000, None).unwrap();
        assert_eq!(cmd.command, "npm run start");
    }

    #[test]
    fn test_static_site_uses_http_server() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name":"site"}"#).unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();

        let cmd = detect_runtime_command(dir.path(), 8123, None).unwrap();
        assert_eq!(cmd.kind, RuntimeKind::Static);
        assert!(cmd.command.contains("http.server 8123"));
    }

    #[test]
    fn test_fallback_substitutes_port() {
        let dir = TempDir::new().unwrap();
        let cmd = detect_runtime_command(dir.path(), 8200, Some("serve --port {port}")).unwrap();
        assert_eq!(cmd.kind, RuntimeKind::Fallback);
        assert_eq!(cmd.command, "serve --port 8200");

        assert!(detect_runtime_command(dir.path(), 8200, None).is_none());
    }
}
