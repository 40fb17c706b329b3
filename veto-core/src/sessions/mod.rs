//! Advisory registry of live sessions.
//!
//! A JSON file under the user cache dir lists one record per daemon or
//! watchdog. Every read filters to live pids, so stale entries from
//! crashed sessions are garbage-collected on the next read. The registry
//! is advisory: losing it never affects enforcement.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::model::SessionMode;
use crate::utils::file_utils::{read_json_file, write_json_file};

/// One live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub pid: u32,
    pub port: u16,
    pub agent: String,
    pub mode: SessionMode,
    pub restriction: String,
    pub cwd: String,
    pub start_time: DateTime<Utc>,
    pub policy_summary: String,
}

/// Zero-signal liveness probe.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    true
}

/// Reads and rewrites the registry file.
pub struct SessionRegistry {
    file: PathBuf,
}

impl SessionRegistry {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    /// Registry at the default cache location.
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(crate::config::defaults::sessions_file()?))
    }

    async fn read_raw(&self) -> Vec<SessionRecord> {
        if !self.file.exists() {
            return Vec::new();
        }
        // A corrupt registry is treated as empty; it will be rewritten on
        // the next registration.
        read_json_file(&self.file).await.unwrap_or_default()
    }

    /// Live sessions only.
    pub async fn live_sessions(&self) -> Vec<SessionRecord> {
        self.read_raw()
            .await
            .into_iter()
            .filter(|record| pid_alive(record.pid))
            .collect()
    }

    /// Add (or replace) the record for a pid.
    pub async fn register(&self, record: SessionRecord) -> Result<()> {
        let mut records = self.live_sessions().await;
        records.retain(|existing| existing.pid != record.pid);
        records.push(record);
        write_json_file(&self.file, &records).await
    }

    /// Remove the record for a pid.
    pub async fn unregister(&self, pid: u32) -> Result<()> {
        let mut records = self.live_sessions().await;
        records.retain(|existing| existing.pid != pid);
        write_json_file(&self.file, &records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(pid: u32) -> SessionRecord {
        SessionRecord {
            pid,
            port: 4242,
            agent: "claude".into(),
            mode: SessionMode::Wrapper,
            restriction: "protect .env".into(),
            cwd: "/tmp/project".into(),
            start_time: Utc::now(),
            policy_summary: "protect .env".into(),
        }
    }

    #[tokio::test]
    async fn register_and_unregister_round_trip() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().join("sessions.json"));
        let own_pid = std::process::id();

        registry.register(record(own_pid)).await.unwrap();
        let live = registry.live_sessions().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].pid, own_pid);

        registry.unregister(own_pid).await.unwrap();
        assert!(registry.live_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn dead_pids_are_swept_on_read() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().join("sessions.json"));

        // A pid above the kernel's pid_max can never be alive.
        let records = vec![record(std::process::id()), record(9_999_999)];
        write_json_file(&registry.file, &records).await.unwrap();

        let live = registry.live_sessions().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].pid, std::process::id());
    }

    #[tokio::test]
    async fn corrupt_registry_reads_as_empty() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("sessions.json");
        tokio::fs::write(&file, "{{{not json").await.unwrap();
        let registry = SessionRegistry::new(&file);
        assert!(registry.live_sessions().await.is_empty());
    }
}
