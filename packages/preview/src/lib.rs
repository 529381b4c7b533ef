//! Conduit Preview - dev server lifecycle management
//!
//! One live runtime per project: port allocation from a bounded pool,
//! health-checked startup, graceful stop, idle eviction, a global cap on
//! running servers and crash recovery within a restart budget.

pub mod detector;
pub mod error;
pub mod health;
pub mod launcher;
pub mod logs;
pub mod manager;
pub mod monitor;
pub mod ports;
pub mod types;

// Re-export key types for easier use
pub use detector::{detect_runtime_command, PackageManager, RuntimeCommand, RuntimeKind};
pub use error::{DevServerError, DevServerResult};
pub use health::{HealthProbe, HttpHealthProbe};
pub use launcher::{ChildHandle, LaunchedRuntime, ProcessLauncher, RuntimeHandle, RuntimeLauncher};
pub use manager::DevServerManager;
pub use ports::PortPool;
pub use types::{
    DevServerInstance, DevServerLog, DevServerStatus, LogType, StartResponse, StopResponse,
    SweepReport,
};
