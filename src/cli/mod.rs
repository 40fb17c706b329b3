//! CLI handlers.
//!
//! Each subcommand maps to one handler; unrecoverable errors bubble up to
//! `main` where they become exit code 1 and a single message.

pub mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::info;

use veto_core::adjudicator::AdjudicatorClient;
use veto_core::audit::AuditLog;
use veto_core::compiler::{CompileOrigin, Compiler};
use veto_core::config::constants::env as veto_env;
use veto_core::config::defaults;
use veto_core::daemon::Daemon;
use veto_core::engine::{DecisionEngine, EngineMode};
use veto_core::policy::model::{Action, Decision, Policy, PolicySet, SessionMode, ToolCall};
use veto_core::sessions::{SessionRecord, SessionRegistry};
use veto_core::shim::ShimLayer;
use veto_core::snapshot::SnapshotStore;
use veto_core::utils::file_utils::{read_json_file, write_json_file};
use veto_core::watcher::RestoreWatcher;

use crate::agents;
use args::{Cli, Commands};

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let mode = if cli.log_only {
        EngineMode::Log
    } else {
        EngineMode::Strict
    };
    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine working directory")?,
    };

    match cli.command {
        Commands::Run {
            agent,
            restrictions,
        } => run_agent(&agent, &restrictions, &workspace, mode).await,
        Commands::External(argv) => {
            let (agent, restrictions) = argv
                .split_first()
                .context("usage: veto <agent> \"<restriction>\"")?;
            if restrictions.is_empty() {
                bail!("usage: veto {agent} \"<restriction>\"");
            }
            run_agent(agent, restrictions, &workspace, mode).await
        }
        Commands::Explain { restriction } => explain(&restriction).await,
        Commands::Add { restriction } => add(&restriction).await,
        Commands::List => list().await,
        Commands::Install { agent } => install(&agent).await,
        Commands::Uninstall { agent } => uninstall(&agent),
        Commands::Watch { restriction } => watch(&restriction, &workspace, mode).await,
        Commands::Status => status().await,
        Commands::Clear => clear(),
        Commands::Hook => hook(mode).await,
    }
}

fn compiler() -> Result<Compiler> {
    Compiler::from_env().map_err(|error| anyhow::anyhow!(error))
}

async fn stored_policies() -> PolicySet {
    match defaults::policies_file() {
        Ok(path) if path.exists() => read_json_file(&path).await.unwrap_or_default(),
        _ => PolicySet::default(),
    }
}

async fn compile_phrases(phrases: &[String]) -> Result<PolicySet> {
    let compiler = compiler()?;
    let mut set = PolicySet::default();
    for phrase in phrases {
        let result = compiler.compile(phrase).await?;
        set.policies.extend(result.compiled.policies);
        set.rules.extend(result.compiled.rules);
    }
    Ok(set)
}

/// Wrapper-mode actions present in a policy set.
fn shim_actions(set: &PolicySet) -> Vec<Action> {
    let mut actions: Vec<Action> = set.policies.iter().map(|policy| policy.action).collect();
    actions.sort_by_key(|action| format!("{action}"));
    actions.dedup();
    if actions.is_empty() {
        actions.push(Action::Delete);
    }
    actions
}

/// Load the workspace `.veto` file (line-oriented or YAML) and the
/// `.veto-rules/` directory, when present.
async fn workspace_policies(workspace: &std::path::Path) -> Result<PolicySet> {
    use veto_core::policy::dsl;

    let mut set = PolicySet::default();

    let veto_file = workspace.join(".veto");
    if veto_file.exists() {
        let content = tokio::fs::read_to_string(&veto_file)
            .await
            .with_context(|| format!("failed to read {}", veto_file.display()))?;
        if dsl::is_line_oriented(&content) {
            let parsed = dsl::parse_veto(&content)?;
            let compiled = compiler()?.compile_file(&parsed).await?;
            set.policies.extend(compiled.policies);
            set.rules.extend(compiled.rules);
        } else {
            let document = dsl::parse_yaml(&content)?;
            set.policies.extend(document.policies);
            set.rules.extend(document.rules);
        }
    }

    let rules_dir = workspace.join(".veto-rules");
    if rules_dir.is_dir() {
        let document = dsl::load_rules_dir(&rules_dir)?;
        set.policies.extend(document.policies);
        set.rules.extend(document.rules);
    }

    Ok(set)
}

async fn run_agent(
    agent: &str,
    restrictions: &[String],
    workspace: &std::path::Path,
    mode: EngineMode,
) -> Result<ExitCode> {
    let mut set = stored_policies().await;
    let local = workspace_policies(workspace).await?;
    set.policies.extend(local.policies);
    set.rules.extend(local.rules);
    let compiled = compile_phrases(restrictions).await?;
    set.policies.extend(compiled.policies);
    set.rules.extend(compiled.rules);
    if set.is_empty() {
        bail!("nothing to enforce: no stored policies and no restrictions compiled");
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let audit = Arc::new(AuditLog::open(defaults::audit_log_file()?)?);
    let engine = Arc::new(
        DecisionEngine::new(Arc::new(set.clone()), mode)
            .with_adjudicator(AdjudicatorClient::from_env()?),
    );

    let daemon = Daemon::start(Arc::clone(&engine), Arc::clone(&audit), session_id.clone()).await?;
    let shim = ShimLayer::create(&shim_actions(&set))?;

    let registry = SessionRegistry::at_default_location()?;
    registry
        .register(SessionRecord {
            pid: std::process::id(),
            port: daemon.port(),
            agent: agent.to_string(),
            mode: SessionMode::Wrapper,
            restriction: restrictions.join("; "),
            cwd: workspace.display().to_string(),
            start_time: chrono::Utc::now(),
            policy_summary: set.summary(),
        })
        .await?;

    eprintln!(
        "veto: enforcing {} restriction(s) on '{agent}' (daemon port {})",
        restrictions.len(),
        daemon.port()
    );

    let mut command = tokio::process::Command::new(agent);
    command.current_dir(workspace);
    for (key, value) in shim.child_env(daemon.port(), &session_id) {
        command.env(key, value);
    }
    command.env(veto_env::AGENT_ID, agent);

    let exit = command
        .status()
        .await
        .with_context(|| format!("failed to launch agent '{agent}'"))?;

    registry.unregister(std::process::id()).await?;
    daemon.stop().await;
    shim.teardown()?;

    let code = exit.code().unwrap_or(1);
    Ok(if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(code.clamp(0, 255) as u8)
    })
}

async fn explain(restriction: &str) -> Result<ExitCode> {
    let result = compiler()?.compile(restriction).await?;
    let origin = match &result.origin {
        CompileOrigin::Builtin(key) => format!("builtin '{key}'"),
        CompileOrigin::Cache => "compilation cache".to_string(),
        CompileOrigin::Llm => "llm adjudicator".to_string(),
    };
    println!("# compiled from {origin}");
    println!("{}", serde_json::to_string_pretty(&result.compiled)?);
    Ok(ExitCode::SUCCESS)
}

async fn add(restriction: &str) -> Result<ExitCode> {
    let result = compiler()?.compile(restriction).await?;
    let path = defaults::policies_file()?;
    let mut set = stored_policies().await;
    set.policies.extend(result.compiled.policies);
    set.rules.extend(result.compiled.rules);
    write_json_file(&path, &set).await?;
    println!("stored '{restriction}' in {}", path.display());
    Ok(ExitCode::SUCCESS)
}

async fn list() -> Result<ExitCode> {
    let set = stored_policies().await;
    if set.is_empty() {
        println!("no stored policies");
        return Ok(ExitCode::SUCCESS);
    }
    for policy in &set.policies {
        println!("[{}] {}", policy.action, policy.description);
    }
    for rule in &set.rules {
        println!("[rule:{:?}] {}", rule.action, rule.name);
    }
    Ok(ExitCode::SUCCESS)
}

async fn install(agent: &str) -> Result<ExitCode> {
    let agent = agents::Agent::parse(agent)?;
    let set = stored_policies().await;
    let home = dirs::home_dir().context("cannot determine home directory")?;
    let target = agents::install(agent, &set, &home)?;
    println!("installed integration at {}", target.display());
    Ok(ExitCode::SUCCESS)
}

fn uninstall(agent: &str) -> Result<ExitCode> {
    let agent = agents::Agent::parse(agent)?;
    let home = dirs::home_dir().context("cannot determine home directory")?;
    let target = agents::uninstall(agent, &home)?;
    println!("removed integration at {}", target.display());
    Ok(ExitCode::SUCCESS)
}

/// Union of the file-protection surface of a policy set, used to seed one
/// snapshot for watchdog mode.
fn merged_watch_policy(set: &PolicySet) -> Result<Policy> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for policy in &set.policies {
        // Content-bearing policies scope rules to file types; they do
        // not name paths worth snapshotting.
        if !policy.ast_rules.is_empty() || !policy.content_rules.is_empty() {
            continue;
        }
        include.extend(policy.include.iter().cloned());
        exclude.extend(policy.exclude.iter().cloned());
    }
    include.dedup();
    exclude.dedup();
    if include.is_empty() {
        bail!("restriction compiles to no protected paths; nothing to watch");
    }
    Ok(Policy {
        action: Action::Modify,
        include,
        exclude,
        description: set.summary(),
        command_rules: vec![],
        content_rules: vec![],
        ast_rules: vec![],
    })
}

async fn watch(
    restriction: &str,
    workspace: &std::path::Path,
    _mode: EngineMode,
) -> Result<ExitCode> {
    let set = compile_phrases(&[restriction.to_string()]).await?;
    let policy = merged_watch_policy(&set)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let store = SnapshotStore::new(defaults::snapshots_dir()?);
    let snapshot = store.create(workspace, &policy, &session_id).await?;
    let snapshot_count = snapshot.files.len();
    let audit = Arc::new(AuditLog::open(defaults::audit_log_file()?)?);

    let registry = SessionRegistry::at_default_location()?;
    registry
        .register(SessionRecord {
            pid: std::process::id(),
            port: 0,
            agent: "watchdog".to_string(),
            mode: SessionMode::Watchdog,
            restriction: restriction.to_string(),
            cwd: workspace.display().to_string(),
            start_time: chrono::Utc::now(),
            policy_summary: policy.description.clone(),
        })
        .await?;

    let mut watcher = RestoreWatcher::new(
        workspace.to_path_buf(),
        policy,
        snapshot,
        Arc::clone(&audit),
        session_id.clone(),
    );
    watcher.start()?;

    eprintln!(
        "veto: watching {} ({snapshot_count} files snapshotted); ctrl-c to stop",
        workspace.display()
    );
    info!(session = %session_id, "watchdog running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;

    let stats = watcher.stop();
    registry.unregister(std::process::id()).await?;
    eprintln!(
        "veto: watchdog done; restored {} file(s), {} unrecoverable event(s)",
        stats.restored, stats.blocked
    );
    eprintln!("veto: snapshot retained for inspection under {}", defaults::snapshots_dir()?.join(&session_id).display());
    Ok(ExitCode::SUCCESS)
}

async fn status() -> Result<ExitCode> {
    let registry = SessionRegistry::at_default_location()?;
    let sessions = registry.live_sessions().await;
    if sessions.is_empty() {
        println!("no live sessions");
        return Ok(ExitCode::SUCCESS);
    }
    for session in sessions {
        let uptime = chrono::Utc::now().signed_duration_since(session.start_time);
        println!(
            "pid {} [{}] {} on port {} up {}m: {}",
            session.pid,
            match session.mode {
                SessionMode::Wrapper => "wrapper",
                SessionMode::Watchdog => "watchdog",
            },
            session.agent,
            session.port,
            uptime.num_minutes(),
            session.policy_summary
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn clear() -> Result<ExitCode> {
    let cache = defaults::compile_cache_dir()?;
    if cache.exists() {
        std::fs::remove_dir_all(&cache)
            .with_context(|| format!("failed to clear {}", cache.display()))?;
    }
    println!("compilation cache cleared");
    Ok(ExitCode::SUCCESS)
}

/// Hook-script endpoint. Reads one JSON object from stdin, writes one
/// JSON object to stdout, and always exits 0: the decision rides in the
/// payload, not the exit code.
async fn hook(mode: EngineMode) -> Result<ExitCode> {
    use tokio::io::AsyncReadExt;

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read hook input")?;

    let output = match hook_decision(&raw, mode).await {
        Ok(output) => output,
        Err(error) => {
            // A broken hook must not block the agent.
            json!({
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "allow",
                },
                "systemMessage": format!("veto hook error: {error:#}"),
            })
        }
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(ExitCode::SUCCESS)
}

async fn hook_decision(raw: &str, mode: EngineMode) -> Result<Value> {
    let input: Value = serde_json::from_str(raw).context("hook input is not JSON")?;
    let tool_name = input
        .get("tool_name")
        .and_then(Value::as_str)
        .context("hook input missing tool_name")?
        .to_string();
    let arguments = match input.get("tool_input") {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };

    let mut set = stored_policies().await;
    if let Some(cwd) = input.get("cwd").and_then(Value::as_str) {
        let local = workspace_policies(std::path::Path::new(cwd)).await?;
        set.policies.extend(local.policies);
        set.rules.extend(local.rules);
    }
    let engine = DecisionEngine::new(Arc::new(set), mode)
        .with_adjudicator(AdjudicatorClient::from_env()?);
    let verdict = engine.evaluate(&ToolCall::new(tool_name, arguments)).await;

    // `ask` fails closed at this surface: the hook protocol is binary.
    let decision = match verdict.decision {
        Decision::Allow => "allow",
        Decision::Deny | Decision::Ask => "deny",
    };
    let mut output = json!({
        "hookSpecificOutput": {
            "hookEventName": "PreToolUse",
            "permissionDecision": decision,
        }
    });
    if let Some(reason) = &verdict.reason {
        output["hookSpecificOutput"]["permissionDecisionReason"] = json!(reason);
        let mut message = format!("veto: {reason}");
        if let Some(suggest) = &verdict.suggest {
            message.push_str(&format!(" (try: {suggest})"));
        }
        output["systemMessage"] = json!(message);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hook_decision_denies_on_stored_policyless_input_gracefully() {
        // With no stored policies everything is allowed.
        let raw = r#"{"tool_name": "Write", "tool_input": {"file_path": "x.txt", "content": "hi"}, "cwd": "/tmp"}"#;
        let output = hook_decision(raw, EngineMode::Strict).await.unwrap();
        assert_eq!(
            output["hookSpecificOutput"]["permissionDecision"],
            json!("allow")
        );
    }

    #[tokio::test]
    async fn hook_rejects_non_json_input() {
        assert!(hook_decision("not json", EngineMode::Strict).await.is_err());
    }

    #[test]
    fn shim_actions_deduplicate_and_default() {
        let empty = PolicySet::default();
        assert_eq!(shim_actions(&empty), vec![Action::Delete]);
    }

    #[test]
    fn merged_watch_policy_requires_paths() {
        let empty = PolicySet::default();
        assert!(merged_watch_policy(&empty).is_err());
    }

    #[tokio::test]
    async fn workspace_veto_file_compiles_into_policies() {
        let workspace = tempfile::tempdir().unwrap();
        tokio::fs::write(
            workspace.path().join(".veto"),
            "# team policy\nprotect .env - secrets\nno force push\n",
        )
        .await
        .unwrap();

        let set = workspace_policies(workspace.path()).await.unwrap();
        assert!(set.policies.iter().any(|p| p.description.contains("protect .env")));
        assert!(set.policies.iter().any(|p| p.description == "no force push"));
    }

    #[tokio::test]
    async fn workspace_yaml_rules_are_loaded() {
        let workspace = tempfile::tempdir().unwrap();
        let rules_dir = workspace.path().join(".veto-rules");
        tokio::fs::create_dir_all(&rules_dir).await.unwrap();
        tokio::fs::write(
            rules_dir.join("team.yaml"),
            "rules:\n  - {id: no-prod, name: No prod writes, severity: high, action: block}\n",
        )
        .await
        .unwrap();

        let set = workspace_policies(workspace.path()).await.unwrap();
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].id, "no-prod");
    }
}
