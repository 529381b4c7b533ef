// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Conduit

// Workspace Configuration
pub const CONDUIT_WORKSPACE_ROOT: &str = "CONDUIT_WORKSPACE_ROOT";

// Dev Server Port Pool
pub const CONDUIT_PORT_RANGE_START: &str = "CONDUIT_PORT_RANGE_START";
pub const CONDUIT_PORT_RANGE_END: &str = "CONDUIT_PORT_RANGE_END";

// Dev Server Lifecycle
pub const CONDUIT_MAX_RUNNING_SERVERS: &str = "CONDUIT_MAX_RUNNING_SERVERS";
pub const CONDUIT_IDLE_TIMEOUT_MINUTES: &str = "CONDUIT_IDLE_TIMEOUT_MINUTES";
pub const CONDUIT_RESTART_BUDGET: &str = "CONDUIT_RESTART_BUDGET";
pub const CONDUIT_STOP_GRACE_SECS: &str = "CONDUIT_STOP_GRACE_SECS";
pub const CONDUIT_HEALTH_PATH: &str = "CONDUIT_HEALTH_PATH";

// Health Checking
pub const CONDUIT_HEALTH_INTERVAL_SECS: &str = "CONDUIT_HEALTH_INTERVAL_SECS";
pub const CONDUIT_HEALTH_RETRIES: &str = "CONDUIT_HEALTH_RETRIES";
pub const CONDUIT_HEALTH_BACKOFF_MS: &str = "CONDUIT_HEALTH_BACKOFF_MS";
pub const CONDUIT_HEALTH_TIMEOUT_SECS: &str = "CONDUIT_HEALTH_TIMEOUT_SECS";

// Action Execution
pub const CONDUIT_MAX_CONCURRENT_BATCHES: &str = "CONDUIT_MAX_CONCURRENT_BATCHES";
pub const CONDUIT_ACTION_TIMEOUT_SECS: &str = "CONDUIT_ACTION_TIMEOUT_SECS";
pub const CONDUIT_COMMAND_RETRIES: &str = "CONDUIT_COMMAND_RETRIES";

// Sandbox Limits
pub const CONDUIT_MAX_FILE_BYTES: &str = "CONDUIT_MAX_FILE_BYTES";
pub const CONDUIT_MAX_OUTPUT_BYTES: &str = "CONDUIT_MAX_OUTPUT_BYTES";

// Event Streaming
pub const CONDUIT_EVENT_QUEUE_DEPTH: &str = "CONDUIT_EVENT_QUEUE_DEPTH";

// Dev server process environment
pub const PORT: &str = "PORT";
pub const DEV_SERVER_URL: &str = "DEV_SERVER_URL";

// Model API
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_MODEL: &str = "ANTHROPIC_MODEL";
