//! Centralized constants for the kernel.
//!
//! Limits, environment variable names, and wire defaults live here so the
//! rest of the crate never hardcodes them.

/// Environment variables injected into agent subprocesses.
pub mod env {
    /// Port of the session's decision daemon.
    pub const PORT: &str = "VETO_PORT";
    /// Set to `1` while a veto session wraps the agent.
    pub const ACTIVE: &str = "VETO_ACTIVE";
    /// Session identifier shared with shims and the audit log.
    pub const SESSION_ID: &str = "VETO_SESSION_ID";
    /// Agent identifier for attribution in audit entries.
    pub const AGENT_ID: &str = "VETO_AGENT_ID";
    /// Log filter for tracing-subscriber.
    pub const LOG_LEVEL: &str = "VETO_LOG_LEVEL";
    /// Base URL of the remote adjudication/validation API.
    pub const CLOUD_URL: &str = "VETO_CLOUD_URL";
    /// API key for the remote API.
    pub const API_KEY: &str = "VETO_API_KEY";
}

/// Engine and matcher limits.
pub mod limits {
    /// Content larger than this is never parsed or regex-scanned.
    pub const MAX_CONTENT_BYTES: u64 = 10 * 1024 * 1024;
    /// Snapshot creation stops once the running total exceeds this.
    pub const MAX_SNAPSHOT_TOTAL_BYTES: u64 = 100 * 1024 * 1024;
    /// Maximum match snippet length in a verdict.
    pub const MAX_SNIPPET_CHARS: usize = 100;
    /// Bounded tool-call history owned by the validation pipeline.
    pub const HISTORY_CAPACITY: usize = 100;
    /// Outcome tail included in a validation context.
    pub const HISTORY_TAIL: usize = 10;
    /// Parsed-tree cache entries.
    pub const TREE_CACHE_CAPACITY: usize = 64;
    /// Watcher event ring buffer.
    pub const EVENT_RING_CAPACITY: usize = 256;
    /// Directory walk caps for the shim helper.
    pub const SHIM_MAX_DEPTH: u32 = 50;
    pub const SHIM_MAX_FILES: u32 = 10_000;
}

/// Timing defaults.
pub mod timing {
    use std::time::Duration;

    /// Write-stability debounce for the restore watcher.
    pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);
    /// End-to-end budget for one daemon request.
    pub const DAEMON_REQUEST_BUDGET: Duration = Duration::from_secs(1);
    /// Idle socket cutoff on the daemon side.
    pub const DAEMON_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
    /// Remote API call timeout.
    pub const API_TIMEOUT: Duration = Duration::from_secs(10);
    /// Fixed backoff between remote API retries.
    pub const API_RETRY_BACKOFF: Duration = Duration::from_millis(500);
    /// Remote API retry attempts.
    pub const API_RETRIES: u32 = 3;
    /// Drain window for in-flight requests on daemon shutdown.
    pub const DAEMON_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Directories excluded from snapshot enumeration regardless of policy.
pub const SNAPSHOT_SKIP_DIRS: &[&str] = &["node_modules", ".git"];

/// Prefix for per-session wrapper directories under the system temp dir.
pub const WRAPPER_DIR_PREFIX: &str = "veto-";
