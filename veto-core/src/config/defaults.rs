//! Default on-disk locations.
//!
//! Compiled policies and cloud config live under the user config dir;
//! session liveness records live under the user cache dir; snapshots and
//! the audit log live under a dedicated `veto-leash` state directory.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// `~/.config/veto` - compiled policies, compilation cache, cloud config.
pub fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("could not determine user config directory")?
        .join("veto"))
}

/// `~/.config/veto-leash` - snapshots and the audit log.
pub fn state_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("could not determine user config directory")?
        .join("veto-leash"))
}

/// `~/.cache/veto-leash` - session registry.
pub fn cache_dir() -> Result<PathBuf> {
    Ok(dirs::cache_dir()
        .context("could not determine user cache directory")?
        .join("veto-leash"))
}

/// Stored-policy file written by `veto add`.
pub fn policies_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("policies.json"))
}

/// Compilation cache directory, keyed by phrase hash.
pub fn compile_cache_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("cache"))
}

/// Session registry file.
pub fn sessions_file() -> Result<PathBuf> {
    Ok(cache_dir()?.join("sessions.json"))
}

/// Root for per-session snapshot blobs and manifests.
pub fn snapshots_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("snapshots"))
}

/// Append-only decision/restoration log.
pub fn audit_log_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("audit.jsonl"))
}
