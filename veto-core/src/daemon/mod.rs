//! Loopback decision server.
//!
//! One daemon per session, bound to an ephemeral port on 127.0.0.1. The
//! protocol is newline-delimited JSON: a shim sends one request, reads
//! one response, and the socket closes. Start is synchronous so the
//! wrapper knows the port before the agent launches; stop drains
//! in-flight requests with a timeout.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::config::constants::timing;
use crate::engine::{DecisionEngine, EngineMode};
use crate::policy::model::{Action, Decision};

/// Wire request.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonRequest {
    pub action: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Wire response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest: Option<String>,
}

impl DaemonResponse {
    fn bad_request() -> Self {
        Self {
            allowed: false,
            reason: Some("bad request".to_string()),
            suggest: None,
        }
    }
}

fn parse_action(action: &str) -> Option<Action> {
    match action {
        "delete" => Some(Action::Delete),
        "modify" => Some(Action::Modify),
        "execute" => Some(Action::Execute),
        "read" => Some(Action::Read),
        _ => None,
    }
}

async fn decide(engine: &DecisionEngine, request: &DaemonRequest) -> DaemonResponse {
    let Some(action) = parse_action(&request.action) else {
        return DaemonResponse::bad_request();
    };
    let verdict = engine
        .evaluate_request(
            action,
            &request.target,
            request.command.as_deref(),
            request.content.as_deref(),
        )
        .await;

    match verdict.decision {
        Decision::Allow => DaemonResponse {
            allowed: true,
            reason: verdict.reason,
            suggest: verdict.suggest,
        },
        Decision::Deny => DaemonResponse {
            allowed: false,
            reason: verdict.reason,
            suggest: verdict.suggest,
        },
        // The wire protocol is binary; shims fail closed on `ask` and the
        // reason tells the user why.
        Decision::Ask => DaemonResponse {
            allowed: false,
            reason: Some(format!(
                "confirmation required: {}",
                verdict.reason.unwrap_or_else(|| "policy requires approval".to_string())
            )),
            suggest: verdict.suggest,
        },
    }
}

async fn handle_connection(
    stream: TcpStream,
    engine: Arc<DecisionEngine>,
    audit: Arc<AuditLog>,
    session_id: String,
) {
    let peer = stream.peer_addr().ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    // One request per connection; idle sockets are cut off.
    let read_result =
        tokio::time::timeout(timing::DAEMON_IDLE_TIMEOUT, reader.read_line(&mut line)).await;
    let response = match read_result {
        Ok(Ok(0)) => return,
        Ok(Ok(_)) => match serde_json::from_str::<DaemonRequest>(line.trim()) {
            Ok(request) => {
                let decided =
                    tokio::time::timeout(timing::DAEMON_REQUEST_BUDGET, decide(&engine, &request))
                        .await;
                let response = match decided {
                    Ok(response) => response,
                    Err(_) => {
                        warn!(?peer, "request exceeded budget");
                        match engine.mode() {
                            EngineMode::Strict => DaemonResponse {
                                allowed: false,
                                reason: Some("decision timed out".to_string()),
                                suggest: None,
                            },
                            EngineMode::Log => DaemonResponse {
                                allowed: true,
                                reason: Some("decision timed out".to_string()),
                                suggest: None,
                            },
                        }
                    }
                };
                let audit_action = if response.allowed {
                    AuditAction::Allowed
                } else {
                    AuditAction::Blocked
                };
                audit.record_best_effort(
                    &AuditEntry::new(
                        audit_action,
                        request.action.clone(),
                        if request.target.is_empty() {
                            request.command.clone().unwrap_or_default()
                        } else {
                            request.target.clone()
                        },
                    )
                    .with_session(session_id.clone()),
                );
                response
            }
            Err(error) => {
                debug!(%error, "malformed daemon request");
                DaemonResponse::bad_request()
            }
        },
        Ok(Err(error)) => {
            debug!(%error, "daemon read error");
            return;
        }
        Err(_) => {
            debug!(?peer, "idle socket closed");
            return;
        }
    };

    let mut payload = match serde_json::to_string(&response) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "failed to serialize daemon response");
            return;
        }
    };
    payload.push('\n');
    if let Err(error) = write_half.write_all(payload.as_bytes()).await {
        debug!(%error, "failed to write daemon response");
    }
}

/// A running decision daemon.
pub struct Daemon {
    port: u16,
    shutdown: watch::Sender<bool>,
    worker: tokio::task::JoinHandle<()>,
}

impl Daemon {
    /// Bind and begin serving. Returns once the port is known.
    pub async fn start(
        engine: Arc<DecisionEngine>,
        audit: Arc<AuditLog>,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind daemon listener")?;
        let port = listener
            .local_addr()
            .context("failed to read daemon port")?
            .port();
        let session_id = session_id.into();
        info!(port, session = %session_id, "daemon listening");

        let (shutdown, mut shutdown_signal) = watch::channel(false);
        let worker = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                connections.spawn(handle_connection(
                                    stream,
                                    Arc::clone(&engine),
                                    Arc::clone(&audit),
                                    session_id.clone(),
                                ));
                            }
                            Err(error) => {
                                warn!(%error, "accept failed");
                            }
                        }
                    }
                    _ = shutdown_signal.changed() => {
                        break;
                    }
                }
            }
            // Drain in-flight requests, bounded.
            let drained = tokio::time::timeout(timing::DAEMON_DRAIN_TIMEOUT, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("drain timeout, aborting remaining connections");
                connections.abort_all();
            }
        });

        Ok(Self {
            port,
            shutdown,
            worker,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting, drain in-flight requests, and wait for teardown.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.worker.await {
            if !error.is_cancelled() {
                warn!(%error, "daemon worker ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::{Action as PolicyAction, Policy, PolicySet};
    use tempfile::tempdir;

    fn test_engine(mode: EngineMode) -> Arc<DecisionEngine> {
        let set = PolicySet {
            policies: vec![Policy {
                action: PolicyAction::Delete,
                include: vec![".env*".into()],
                exclude: vec![],
                description: "protect env".into(),
                command_rules: vec![],
                content_rules: vec![],
                ast_rules: vec![],
            }],
            rules: vec![],
        };
        Arc::new(DecisionEngine::new(Arc::new(set), mode))
    }

    async fn start_daemon(mode: EngineMode) -> (Daemon, Arc<AuditLog>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let daemon = Daemon::start(test_engine(mode), Arc::clone(&audit), "daemon-test")
            .await
            .unwrap();
        (daemon, audit, dir)
    }

    async fn ask(port: u16, request: &str) -> DaemonResponse {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    #[tokio::test]
    async fn denies_protected_delete() {
        let (daemon, _audit, _dir) = start_daemon(EngineMode::Strict).await;
        let response = ask(
            daemon.port(),
            r#"{"action":"delete","target":".env.local"}"#,
        )
        .await;
        assert!(!response.allowed);
        assert!(response.reason.unwrap().contains(".env.local"));
        daemon.stop().await;
    }

    #[tokio::test]
    async fn allows_unprotected_target() {
        let (daemon, _audit, _dir) = start_daemon(EngineMode::Strict).await;
        let response = ask(daemon.port(), r#"{"action":"delete","target":"notes.md"}"#).await;
        assert!(response.allowed);
        daemon.stop().await;
    }

    #[tokio::test]
    async fn malformed_request_is_rejected() {
        let (daemon, _audit, _dir) = start_daemon(EngineMode::Strict).await;
        let response = ask(daemon.port(), "this is not json").await;
        assert!(!response.allowed);
        assert_eq!(response.reason.as_deref(), Some("bad request"));
        daemon.stop().await;
    }

    #[tokio::test]
    async fn unknown_action_is_a_bad_request() {
        let (daemon, _audit, _dir) = start_daemon(EngineMode::Strict).await;
        let response = ask(daemon.port(), r#"{"action":"frobnicate","target":"x"}"#).await;
        assert!(!response.allowed);
        daemon.stop().await;
    }

    #[tokio::test]
    async fn parallel_clients_get_identical_verdicts() {
        let (daemon, _audit, _dir) = start_daemon(EngineMode::Strict).await;
        let port = daemon.port();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            tasks.push(tokio::spawn(async move {
                ask(port, r#"{"action":"delete","target":".env"}"#).await
            }));
        }
        for task in tasks {
            let response = task.await.unwrap();
            assert!(!response.allowed);
        }
        daemon.stop().await;
    }

    #[tokio::test]
    async fn decisions_are_audited() {
        let (daemon, audit, _dir) = start_daemon(EngineMode::Strict).await;
        let _ = ask(daemon.port(), r#"{"action":"delete","target":".env"}"#).await;
        daemon.stop().await;
        let entries = audit.tail(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Blocked);
        assert_eq!(entries[0].target, ".env");
    }
}
