// ABOUTME: Policy parameters for dev servers, action execution, sandboxes and event streams
// ABOUTME: Defaults plus an environment overlay used by the binary at startup

use crate::constants::*;
use crate::env::{
    parse_env_millis, parse_env_or_default, parse_env_or_default_with_validation, parse_env_secs,
};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Dev server lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerConfig {
    /// First port of the allocation pool (inclusive)
    pub port_range_start: u16,
    /// Last port of the allocation pool (inclusive)
    pub port_range_end: u16,
    /// Skip pool ports that another process on the host already bound
    pub probe_host_ports: bool,
    /// Global cap on simultaneously live instances
    pub max_running: usize,
    /// Instances unused for longer than this are stopped by the monitor
    pub idle_timeout: Duration,
    /// Automatic restarts allowed after crashes before the project is marked fatal
    pub restart_budget: u32,
    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
    /// Interval of the background health sweep
    pub health_interval: Duration,
    /// Health probes attempted while a server is starting
    pub health_retries: u32,
    /// Base delay between startup probes, doubled per attempt
    pub health_backoff: Duration,
    /// Upper bound for a single backoff step
    pub health_backoff_max: Duration,
    /// Overall bound on startup health polling
    pub health_timeout: Duration,
    /// Path probed on the instance URL
    pub health_path: String,
    /// Command used when the project declares no dev script
    pub fallback_command: Option<String>,
}

impl DevServerConfig {
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port_range_start: 8000,
            port_range_end: 8999,
            probe_host_ports: true,
            max_running: 8,
            idle_timeout: Duration::from_secs(30 * 60),
            restart_budget: 3,
            stop_grace: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            health_retries: 20,
            health_backoff: Duration::from_millis(250),
            health_backoff_max: Duration::from_secs(2),
            health_timeout: Duration::from_secs(60),
            health_path: "/".to_string(),
            fallback_command: None,
        }
    }
}

/// Action execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Batches allowed to execute at once across all projects
    pub max_concurrent_batches: usize,
    /// Per-action execution bound
    pub action_timeout: Duration,
    /// Extra attempts granted to idempotent-safe commands
    pub command_retries: u32,
    /// Delay before a retry attempt
    pub retry_delay: Duration,
    /// Bound on a single rollback invocation
    pub rollback_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 4,
            action_timeout: Duration::from_secs(120),
            command_retries: 2,
            retry_delay: Duration::from_millis(500),
            rollback_timeout: Duration::from_secs(60),
        }
    }
}

/// Resource ceilings applied by every project sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Largest file a single write may produce
    pub max_file_bytes: usize,
    /// Captured command output is truncated beyond this size
    pub max_output_bytes: usize,
    /// Default bound for sandboxed commands
    pub command_timeout: Duration,
    /// Maximum entries returned by a project file listing
    pub max_listed_files: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 5 * 1024 * 1024,
            max_output_bytes: 256 * 1024,
            command_timeout: Duration::from_secs(300),
            max_listed_files: 500,
        }
    }
}

/// Event stream policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Events buffered per subscriber before the oldest are dropped
    pub queue_depth: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { queue_depth: 256 }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory under which per-project sandboxes are created
    pub workspace_root: PathBuf,
    pub dev_servers: DevServerConfig,
    pub executor: ExecutorConfig,
    pub sandbox: SandboxLimits,
    pub events: EventConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("conduit-workspaces"),
            dev_servers: DevServerConfig::default(),
            executor: ExecutorConfig::default(),
            sandbox: SandboxLimits::default(),
            events: EventConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overlaid with any `CONDUIT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workspace_root = std::env::var(CONDUIT_WORKSPACE_ROOT)
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_root);

        let d = defaults.dev_servers;
        let port_range_start =
            parse_env_or_default_with_validation(CONDUIT_PORT_RANGE_START, d.port_range_start, |p| {
                p >= 1024
            });
        let mut port_range_end =
            parse_env_or_default_with_validation(CONDUIT_PORT_RANGE_END, d.port_range_end, |p| {
                p >= 1024
            });
        if port_range_end < port_range_start {
            tracing::warn!(
                "Port range end {} is below start {}, using a single-port pool",
                port_range_end,
                port_range_start
            );
            port_range_end = port_range_start;
        }

        let dev_servers = DevServerConfig {
            port_range_start,
            port_range_end,
            max_running: parse_env_or_default_with_validation(
                CONDUIT_MAX_RUNNING_SERVERS,
                d.max_running,
                |v| (1..=256).contains(&v),
            ),
            idle_timeout: Duration::from_secs(
                60 * parse_env_or_default_with_validation(
                    CONDUIT_IDLE_TIMEOUT_MINUTES,
                    d.idle_timeout.as_secs() / 60,
                    |v| (1..=24 * 60).contains(&v),
                ),
            ),
            restart_budget: parse_env_or_default(CONDUIT_RESTART_BUDGET, d.restart_budget),
            stop_grace: parse_env_secs(CONDUIT_STOP_GRACE_SECS, d.stop_grace, 1, 120),
            health_interval: parse_env_secs(
                CONDUIT_HEALTH_INTERVAL_SECS,
                d.health_interval,
                1,
                3600,
            ),
            health_retries: parse_env_or_default_with_validation(
                CONDUIT_HEALTH_RETRIES,
                d.health_retries,
                |v| v > 0,
            ),
            health_backoff: parse_env_millis(
                CONDUIT_HEALTH_BACKOFF_MS,
                d.health_backoff,
                10,
                60_000,
            ),
            health_timeout: parse_env_secs(CONDUIT_HEALTH_TIMEOUT_SECS, d.health_timeout, 1, 600),
            health_path: std::env::var(CONDUIT_HEALTH_PATH).unwrap_or(d.health_path),
            ..d
        };

        let e = defaults.executor;
        let executor = ExecutorConfig {
            max_concurrent_batches: parse_env_or_default_with_validation(
                CONDUIT_MAX_CONCURRENT_BATCHES,
                e.max_concurrent_batches,
                |v| (1..=1024).contains(&v),
            ),
            action_timeout: parse_env_secs(CONDUIT_ACTION_TIMEOUT_SECS, e.action_timeout, 1, 3600),
            command_retries: parse_env_or_default_with_validation(
                CONDUIT_COMMAND_RETRIES,
                e.command_retries,
                |v| v <= 10,
            ),
            ..e
        };

        let s = defaults.sandbox;
        let sandbox = SandboxLimits {
            max_file_bytes: parse_env_or_default_with_validation(
                CONDUIT_MAX_FILE_BYTES,
                s.max_file_bytes,
                |v| v > 0,
            ),
            max_output_bytes: parse_env_or_default_with_validation(
                CONDUIT_MAX_OUTPUT_BYTES,
                s.max_output_bytes,
                |v| v > 0,
            ),
            ..s
        };

        let events = EventConfig {
            queue_depth: parse_env_or_default_with_validation(
                CONDUIT_EVENT_QUEUE_DEPTH,
                defaults.events.queue_depth,
                |v| (8..=65_536).contains(&v),
            ),
        };

        Self {
            workspace_root,
            dev_servers,
            executor,
            sandbox,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_consistent() {
        let config = OrchestratorConfig::default();
        assert!(config.dev_servers.port_range().contains(&8000));
        assert_eq!(config.dev_servers.port_range().count(), 1000);
        assert!(config.dev_servers.max_running > 0);
        assert!(config.executor.max_concurrent_batches > 0);
    }

    #[test]
    #[serial]
    fn test_from_env_overlays_values() {
        std::env::set_var(CONDUIT_MAX_RUNNING_SERVERS, "2");
        std::env::set_var(CONDUIT_IDLE_TIMEOUT_MINUTES, "5");
        std::env::set_var(CONDUIT_EVENT_QUEUE_DEPTH, "64");

        let config = OrchestratorConfig::from_env();
        assert_eq!(config.dev_servers.max_running, 2);
        assert_eq!(config.dev_servers.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.events.queue_depth, 64);

        std::env::remove_var(CONDUIT_MAX_RUNNING_SERVERS);
        std::env::remove_var(CONDUIT_IDLE_TIMEOUT_MINUTES);
        std::env::remove_var(CONDUIT_EVENT_QUEUE_DEPTH);
    }

    #[test]
    #[serial]
    fn test_from_env_repairs_inverted_port_range() {
        std::env::set_var(CONDUIT_PORT_RANGE_START, "9000");
        std::env::set_var(CONDUIT_PORT_RANGE_END, "8500");

        let config = OrchestratorConfig::from_env();
        assert_eq!(config.dev_servers.port_range(), 9000..=9000);

        std::env::remove_var(CONDUIT_PORT_RANGE_START);
        std::env::remove_var(CONDUIT_PORT_RANGE_END);
    }
}
