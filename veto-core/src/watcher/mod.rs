//! Filesystem watcher that repairs protected files.
//!
//! Watches the session root and restores protected files from the
//! snapshot when they are deleted or rewritten. Events are debounced for
//! write stability, and the watcher's own restore writes are suppressed
//! so it does not fight itself. Watcher errors are logged and swallowed;
//! the session keeps running.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::config::constants::{limits, timing};
use crate::paths::PathMatcher;
use crate::policy::model::{Action, Policy};
use crate::snapshot::Snapshot;

/// How long a restore suppresses change events for the same path.
const RESTORE_SUPPRESSION: Duration = Duration::from_millis(500);

/// One observed filesystem event, kept in a bounded ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub path: String,
    pub restored: bool,
}

/// Counters exposed to the `watch` command's exit summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatcherStats {
    pub restored: u64,
    pub blocked: u64,
    #[serde(default)]
    pub events: VecDeque<WatchEvent>,
}

impl WatcherStats {
    fn push_event(&mut self, event: WatchEvent) {
        if self.events.len() >= limits::EVENT_RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

struct WatchContext {
    root: PathBuf,
    policy: Policy,
    matcher: PathMatcher,
    snapshot: Snapshot,
    audit: Arc<AuditLog>,
    session_id: String,
    stats: Arc<Mutex<WatcherStats>>,
    recently_restored: Mutex<HashMap<PathBuf, Instant>>,
}

impl WatchContext {
    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let joined = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if joined.is_empty() { None } else { Some(joined) }
    }

    fn suppressed(&self, path: &Path) -> bool {
        let mut recent = self.recently_restored.lock();
        recent.retain(|_, at| at.elapsed() < RESTORE_SUPPRESSION);
        recent.contains_key(path)
    }

    fn mark_restored(&self, path: PathBuf) {
        self.recently_restored.lock().insert(path, Instant::now());
    }

    fn record(&self, event: &str, relative_path: &str, restored: bool) {
        let action = if restored {
            AuditAction::Restored
        } else {
            AuditAction::Blocked
        };
        self.audit.record_best_effort(
            &AuditEntry::new(action, event, relative_path)
                .with_policy(self.policy.description.clone())
                .with_session(self.session_id.clone()),
        );
        self.stats.lock().push_event(WatchEvent {
            timestamp: Utc::now(),
            event: event.to_string(),
            path: relative_path.to_string(),
            restored,
        });
    }

    async fn restore_one(&self, event: &str, relative_path: &str) {
        match self.snapshot.restore_file(relative_path, &self.root).await {
            Ok(()) => {
                self.mark_restored(self.root.join(relative_path));
                self.stats.lock().restored += 1;
                self.record(event, relative_path, true);
            }
            Err(error) => {
                warn!(%error, path = relative_path, "restore failed");
                self.stats.lock().blocked += 1;
                self.record(event, relative_path, false);
            }
        }
    }

    async fn handle_unlink(&self, relative_path: &str) {
        if self.snapshot.files.contains_key(relative_path) {
            if self.matcher.is_protected(relative_path) {
                self.restore_one("unlink", relative_path).await;
            }
            return;
        }
        // A removed directory arrives as one event; restore everything
        // recorded beneath it.
        let nested = self.snapshot.entries_under(relative_path);
        for entry in nested {
            self.restore_one("unlink_dir", &entry).await;
        }
    }

    async fn handle_change(&self, relative_path: &str) {
        if self.policy.action != Action::Modify {
            return;
        }
        if !self.matcher.is_protected(relative_path) {
            return;
        }
        if !self.snapshot.files.contains_key(relative_path) {
            return;
        }
        match self.snapshot.changed(relative_path, &self.root).await {
            Ok(true) => self.restore_one("change", relative_path).await,
            Ok(false) => {}
            Err(error) => warn!(%error, path = relative_path, "change check failed"),
        }
    }

    async fn handle_event(&self, event: Event) {
        for path in &event.paths {
            if self.suppressed(path) {
                continue;
            }
            let Some(relative_path) = self.relative(path) else {
                continue;
            };
            match event.kind {
                EventKind::Remove(_) => {
                    debug!(path = %relative_path, "remove event");
                    self.handle_unlink(&relative_path).await;
                }
                EventKind::Modify(_) | EventKind::Create(_) => {
                    self.handle_change(&relative_path).await;
                }
                _ => {}
            }
        }
    }
}

/// Snapshot-backed restore watcher for one session.
pub struct RestoreWatcher {
    context: Arc<WatchContext>,
    watcher: Option<RecommendedWatcher>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl RestoreWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        policy: Policy,
        snapshot: Snapshot,
        audit: Arc<AuditLog>,
        session_id: impl Into<String>,
    ) -> Self {
        let matcher = policy.matcher();
        let context = Arc::new(WatchContext {
            root: root.into(),
            matcher,
            policy,
            snapshot,
            audit,
            session_id: session_id.into(),
            stats: Arc::new(Mutex::new(WatcherStats::default())),
            recently_restored: Mutex::new(HashMap::new()),
        });
        Self {
            context,
            watcher: None,
            worker: None,
        }
    }

    /// Begin watching. Events settle for the write-stability debounce
    /// before they are handled.
    pub fn start(&mut self) -> Result<()> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = sender.send(event);
                }
                Err(error) => {
                    warn!(%error, "watcher backend error");
                }
            },
            notify::Config::default(),
        )
        .context("failed to create filesystem watcher")?;

        watcher
            .watch(&self.context.root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {:?}", self.context.root))?;

        let context = Arc::clone(&self.context);
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                tokio::time::sleep(timing::WATCH_DEBOUNCE).await;
                context.handle_event(event).await;
            }
        });

        self.watcher = Some(watcher);
        self.worker = Some(worker);
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> WatcherStats {
        self.context.stats.lock().clone()
    }

    /// Stop watching and return final statistics.
    pub fn stop(&mut self) -> WatcherStats {
        self.watcher = None;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.stats()
    }
}

impl Drop for RestoreWatcher {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
