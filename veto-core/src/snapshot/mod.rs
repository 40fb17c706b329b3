//! Hash-addressed file snapshots.
//!
//! A snapshot records every protected file under a root at watchdog
//! start: content blobs are stored under the session's snapshot directory
//! keyed by a short sha256, deduplicated, and described by a JSON
//! manifest. The watcher restores from here when a protected file is
//! deleted or rewritten.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::constants::{SNAPSHOT_SKIP_DIRS, limits};
use crate::policy::model::Policy;
use crate::utils::file_utils::{ensure_dir_exists, read_json_file, write_json_file};

/// One recorded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// First 16 hex chars of the content sha256.
    pub hash: String,
    pub size: u64,
    /// Absolute path of the content blob.
    pub blob_path: String,
}

/// Manifest of a session's snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    pub root: String,
    pub created_at: DateTime<Utc>,
    /// Relative path (forward slashes) to entry.
    pub files: BTreeMap<String, SnapshotEntry>,
}

fn short_hash(content: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(content));
    digest[..16].to_string()
}

fn relative_unix_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

impl Snapshot {
    /// Read and verify a recorded file's content.
    pub async fn content(&self, relative_path: &str) -> Result<Vec<u8>> {
        let entry = self
            .files
            .get(relative_path)
            .with_context(|| format!("'{relative_path}' is not in the snapshot"))?;
        let content = tokio::fs::read(&entry.blob_path)
            .await
            .with_context(|| format!("failed to read blob {}", entry.blob_path))?;
        if short_hash(&content) != entry.hash {
            bail!("blob integrity check failed for '{relative_path}'");
        }
        Ok(content)
    }

    /// True when the on-disk file differs from the recorded content (a
    /// missing file counts as changed).
    pub async fn changed(&self, relative_path: &str, root: &Path) -> Result<bool> {
        let entry = self
            .files
            .get(relative_path)
            .with_context(|| format!("'{relative_path}' is not in the snapshot"))?;
        let disk_path = root.join(relative_path);
        match tokio::fs::read(&disk_path).await {
            Ok(content) => Ok(short_hash(&content) != entry.hash),
            Err(_) => Ok(true),
        }
    }

    /// Recorded files that no longer exist on disk.
    pub async fn preview_restore(&self, root: &Path) -> Vec<String> {
        let mut missing = Vec::new();
        for relative_path in self.files.keys() {
            if !root.join(relative_path).exists() {
                missing.push(relative_path.clone());
            }
        }
        missing
    }

    /// Restore one recorded file to its original location.
    pub async fn restore_file(&self, relative_path: &str, root: &Path) -> Result<()> {
        let content = self.content(relative_path).await?;
        let target = root.join(relative_path);
        if let Some(parent) = target.parent() {
            ensure_dir_exists(parent).await?;
        }
        tokio::fs::write(&target, &content)
            .await
            .with_context(|| format!("failed to restore {:?}", target))?;
        info!(path = relative_path, "restored from snapshot");
        Ok(())
    }

    /// Recorded paths under a directory prefix (used for `unlink_dir`).
    pub fn entries_under(&self, dir_prefix: &str) -> Vec<String> {
        let prefix = dir_prefix.trim_end_matches('/');
        self.files
            .keys()
            .filter(|path| {
                path.as_str() == prefix || path.starts_with(&format!("{prefix}/"))
            })
            .cloned()
            .collect()
    }
}

/// Creates, loads, and purges per-session snapshots.
pub struct SnapshotStore {
    base_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    fn manifest_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("manifest.json")
    }

    /// Snapshot every file a policy protects under `root`.
    ///
    /// Skips `node_modules` and `.git`, honors policy excludes, skips
    /// files over the per-file cap, and stops once the running total
    /// exceeds the snapshot budget.
    pub async fn create(
        &self,
        root: &Path,
        policy: &Policy,
        session_id: &str,
    ) -> Result<Snapshot> {
        let session_dir = self.session_dir(session_id);
        ensure_dir_exists(&session_dir).await?;

        let matcher = policy.matcher();
        let mut files = BTreeMap::new();
        let mut total_bytes: u64 = 0;

        let walker = walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && SNAPSHOT_SKIP_DIRS.contains(&name.as_ref()))
            });

        for entry in walker.filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative_path) = relative_unix_path(root, entry.path()) else {
                continue;
            };
            if !matcher.is_protected(&relative_path) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!(%error, path = %relative_path, "skipping unreadable file");
                    continue;
                }
            };
            if metadata.len() > limits::MAX_CONTENT_BYTES {
                debug!(path = %relative_path, "skipping oversized file");
                continue;
            }
            if total_bytes + metadata.len() > limits::MAX_SNAPSHOT_TOTAL_BYTES {
                warn!(path = %relative_path, "snapshot budget exhausted, stopping enumeration");
                break;
            }

            let content = match tokio::fs::read(entry.path()).await {
                Ok(content) => content,
                Err(error) => {
                    warn!(%error, path = %relative_path, "skipping unreadable file");
                    continue;
                }
            };
            total_bytes += content.len() as u64;

            let hash = short_hash(&content);
            let blob_path = session_dir.join(&hash);
            // Content-addressed: identical files share one blob, and
            // concurrent creators racing on the same hash write the same
            // bytes.
            if !blob_path.exists() {
                tokio::fs::write(&blob_path, &content)
                    .await
                    .with_context(|| format!("failed to write blob {:?}", blob_path))?;
            }

            files.insert(
                relative_path,
                SnapshotEntry {
                    hash,
                    size: content.len() as u64,
                    blob_path: blob_path.to_string_lossy().into_owned(),
                },
            );
        }

        let snapshot = Snapshot {
            session_id: session_id.to_string(),
            root: root.to_string_lossy().into_owned(),
            created_at: Utc::now(),
            files,
        };
        write_json_file(&self.manifest_path(session_id), &snapshot).await?;

        info!(
            session = session_id,
            files = snapshot.files.len(),
            bytes = total_bytes,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Load a persisted manifest.
    pub async fn load(&self, session_id: &str) -> Result<Snapshot> {
        read_json_file(&self.manifest_path(session_id)).await
    }

    /// Remove the session's blobs and manifest.
    pub async fn purge(&self, session_id: &str) -> Result<()> {
        let session_dir = self.session_dir(session_id);
        if session_dir.exists() {
            tokio::fs::remove_dir_all(&session_dir)
                .await
                .with_context(|| format!("failed to purge snapshot {:?}", session_dir))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::Action;
    use tempfile::tempdir;

    fn env_policy() -> Policy {
        Policy {
            action: Action::Modify,
            include: vec!["*.env".into(), ".env*".into(), "secrets/**".into()],
            exclude: vec![".env.example".into()],
            description: "protect env".into(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![],
        }
    }

    async fn seeded_root() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join(".env"), "SECRET=1").await.unwrap();
        tokio::fs::write(dir.path().join(".env.example"), "SECRET=").await.unwrap();
        tokio::fs::write(dir.path().join("readme.md"), "hello").await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("secrets")).await.unwrap();
        tokio::fs::write(dir.path().join("secrets/api.key"), "k").await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("node_modules/pkg")).await.unwrap();
        tokio::fs::write(dir.path().join("node_modules/pkg/a.env"), "x").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn snapshots_only_protected_files() {
        let root = seeded_root().await;
        let store_dir = tempdir().unwrap();
        let store = SnapshotStore::new(store_dir.path());

        let snapshot = store
            .create(root.path(), &env_policy(), "session-1")
            .await
            .unwrap();

        assert!(snapshot.files.contains_key(".env"));
        assert!(snapshot.files.contains_key("secrets/api.key"));
        assert!(!snapshot.files.contains_key(".env.example"));
        assert!(!snapshot.files.contains_key("readme.md"));
        assert!(!snapshot.files.keys().any(|path| path.contains("node_modules")));
    }

    #[tokio::test]
    async fn restore_round_trips_bytes() {
        let root = seeded_root().await;
        let store_dir = tempdir().unwrap();
        let store = SnapshotStore::new(store_dir.path());
        let snapshot = store
            .create(root.path(), &env_policy(), "session-2")
            .await
            .unwrap();

        tokio::fs::remove_file(root.path().join(".env")).await.unwrap();
        assert!(snapshot.changed(".env", root.path()).await.unwrap());
        assert_eq!(snapshot.preview_restore(root.path()).await, vec![".env".to_string()]);

        snapshot.restore_file(".env", root.path()).await.unwrap();
        let restored = tokio::fs::read_to_string(root.path().join(".env")).await.unwrap();
        assert_eq!(restored, "SECRET=1");
        assert!(!snapshot.changed(".env", root.path()).await.unwrap());
    }

    #[tokio::test]
    async fn identical_content_shares_one_blob() {
        let root = tempdir().unwrap();
        tokio::fs::write(root.path().join("a.env"), "same").await.unwrap();
        tokio::fs::write(root.path().join("b.env"), "same").await.unwrap();

        let store_dir = tempdir().unwrap();
        let store = SnapshotStore::new(store_dir.path());
        let snapshot = store
            .create(root.path(), &env_policy(), "session-3")
            .await
            .unwrap();

        let blobs: std::collections::HashSet<_> = snapshot
            .files
            .values()
            .map(|entry| entry.blob_path.clone())
            .collect();
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn manifest_persists_and_loads() {
        let root = seeded_root().await;
        let store_dir = tempdir().unwrap();
        let store = SnapshotStore::new(store_dir.path());
        let created = store
            .create(root.path(), &env_policy(), "session-4")
            .await
            .unwrap();
        let loaded = store.load("session-4").await.unwrap();
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn entries_under_matches_directory_prefix() {
        let root = seeded_root().await;
        let store_dir = tempdir().unwrap();
        let store = SnapshotStore::new(store_dir.path());
        let snapshot = store
            .create(root.path(), &env_policy(), "session-5")
            .await
            .unwrap();
        assert_eq!(snapshot.entries_under("secrets"), vec!["secrets/api.key".to_string()]);
        assert!(snapshot.entries_under("sec").is_empty());
    }

    #[tokio::test]
    async fn purge_removes_session_dir() {
        let root = seeded_root().await;
        let store_dir = tempdir().unwrap();
        let store = SnapshotStore::new(store_dir.path());
        store.create(root.path(), &env_policy(), "session-6").await.unwrap();
        store.purge("session-6").await.unwrap();
        assert!(store.load("session-6").await.is_err());
    }
}
