//! Append-only decision and restoration log.
//!
//! One JSON object per line. Writes are best-effort: a failing log never
//! blocks the kernel's primary decision path.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Blocked,
    Allowed,
    Restored,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Triggering event (`unlink`, `change`, `command`, `tool_call`, ...).
    pub event: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, event: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            event: event.into(),
            target: target.into(),
            policy: None,
            agent: None,
            session_id: None,
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Append-only JSONL writer.
pub struct AuditLog {
    log_path: PathBuf,
    writer: Mutex<BufWriter<std::fs::File>>,
}

impl AuditLog {
    /// Open (or create) the log in append mode.
    pub fn open(log_path: impl Into<PathBuf>) -> Result<Self> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create audit directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open audit log {:?}", log_path))?;
        Ok(Self {
            log_path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    /// Append one entry and flush.
    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        let json = serde_json::to_string(entry).context("failed to serialize audit entry")?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{json}").context("failed to write audit entry")?;
        writer.flush().context("failed to flush audit log")?;
        Ok(())
    }

    /// Append an entry, swallowing failures with a warning.
    pub fn record_best_effort(&self, entry: &AuditEntry) {
        if let Err(error) = self.record(entry) {
            warn!(%error, "audit write failed");
        }
    }

    /// Read the last `count` entries. Readers must treat the file as
    /// eventually consistent; partial trailing lines are skipped.
    pub fn tail(&self, count: usize) -> Result<Vec<AuditEntry>> {
        let raw = std::fs::read_to_string(&self.log_path)
            .with_context(|| format!("failed to read {:?}", self.log_path))?;
        let mut entries: Vec<AuditEntry> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if entries.len() > count {
            entries.drain(..entries.len() - count);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_and_tails_entries() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        log.record(
            &AuditEntry::new(AuditAction::Blocked, "command", "git push --force")
                .with_policy("no force push")
                .with_session("session-1"),
        )
        .unwrap();
        log.record(&AuditEntry::new(AuditAction::Restored, "unlink", ".env")).unwrap();

        let entries = log.tail(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Blocked);
        assert_eq!(entries[0].policy.as_deref(), Some("no force push"));
        assert_eq!(entries[1].action, AuditAction::Restored);
    }

    #[test]
    fn tail_bounds_result() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        for index in 0..5 {
            log.record(&AuditEntry::new(
                AuditAction::Allowed,
                "tool_call",
                format!("target-{index}"),
            ))
            .unwrap();
        }
        let entries = log.tail(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].target, "target-4");
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();
        log.record(&AuditEntry::new(AuditAction::Allowed, "tool_call", "x")).unwrap();
        std::fs::write(
            &path,
            format!("{}\nnot json\n", std::fs::read_to_string(&path).unwrap().trim()),
        )
        .unwrap();
        let entries = log.tail(10).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
