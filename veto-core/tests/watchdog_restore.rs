//! Watchdog scenario: snapshot, destructive delete, automatic repair.

use std::sync::Arc;
use std::time::{Duration, Instant};

use veto_core::audit::{AuditAction, AuditLog};
use veto_core::policy::model::{Action, Policy};
use veto_core::snapshot::SnapshotStore;
use veto_core::watcher::RestoreWatcher;

fn protected_dir_policy() -> Policy {
    Policy {
        action: Action::Modify,
        include: vec!["protected/**".into()],
        exclude: vec![],
        description: "protect the protected directory".into(),
        command_rules: vec![],
        content_rules: vec![],
        ast_rules: vec![],
    }
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let stop_at = Instant::now() + deadline;
    loop {
        if check() {
            return true;
        }
        if Instant::now() > stop_at {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn rm_rf_of_protected_dir_is_repaired_byte_for_byte() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();

    let contents = [
        ("protected/alpha.txt", "alpha-content\n"),
        ("protected/nested/beta.txt", "beta-content\n"),
        ("protected/nested/gamma.bin", "\u{0}\u{1}\u{2}binary"),
    ];
    for (path, data) in &contents {
        let full = root.path().join(path);
        tokio::fs::create_dir_all(full.parent().unwrap()).await.unwrap();
        tokio::fs::write(&full, data).await.unwrap();
    }

    let policy = protected_dir_policy();
    let store = SnapshotStore::new(state.path().join("snapshots"));
    let snapshot = store
        .create(root.path(), &policy, "watchdog-e2e")
        .await
        .unwrap();
    assert_eq!(snapshot.files.len(), contents.len());

    let audit = Arc::new(AuditLog::open(state.path().join("audit.jsonl")).unwrap());
    let mut watcher = RestoreWatcher::new(
        root.path().to_path_buf(),
        policy,
        snapshot,
        Arc::clone(&audit),
        "watchdog-e2e",
    );
    watcher.start().unwrap();

    // The destructive action the watchdog exists for.
    tokio::fs::remove_dir_all(root.path().join("protected")).await.unwrap();

    let all_restored = wait_until(Duration::from_secs(10), || {
        contents
            .iter()
            .all(|(path, _)| root.path().join(path).exists())
    })
    .await;
    assert!(all_restored, "watchdog did not restore all files");

    // Allow trailing debounced events to settle before reading stats.
    tokio::time::sleep(Duration::from_millis(300)).await;

    for (path, data) in &contents {
        let restored = tokio::fs::read(root.path().join(path)).await.unwrap();
        assert_eq!(restored, data.as_bytes(), "content mismatch for {path}");
    }

    let stats = watcher.stop();
    assert!(stats.restored >= contents.len() as u64);

    let entries = audit.tail(100).unwrap();
    let restored_entries: Vec<_> = entries
        .iter()
        .filter(|entry| entry.action == AuditAction::Restored)
        .collect();
    assert!(restored_entries.len() >= contents.len());
    for (path, _) in &contents {
        assert!(
            restored_entries.iter().any(|entry| entry.target == *path),
            "no restore audit entry for {path}"
        );
    }
}
