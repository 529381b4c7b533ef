// ABOUTME: Per-project sandboxes confining file access and command execution to a project root
// ABOUTME: Exposes ProjectSandbox, the command runner and the SandboxRegistry

pub mod command;
pub mod error;
pub mod project;
pub mod registry;

pub use command::{CommandOptions, CommandOutput, OutputLine, OutputStream};
pub use error::{SandboxError, SandboxResult};
pub use project::{FileSnapshot, ProjectSandbox};
pub use registry::SandboxRegistry;
