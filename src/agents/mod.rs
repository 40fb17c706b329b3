//! Per-agent integration file writers.
//!
//! These are thin emitters: given the stored policy set they write the
//! one file each agent reads, after backing up whatever was there. The
//! backup makes `install` followed by `uninstall` restore the prior
//! on-disk state exactly.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

use veto_core::policy::model::PolicySet;

const PRIOR_SUFFIX: &str = ".veto-prior";

/// Agents with integration writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agent {
    Claude,
    Cursor,
    Windsurf,
    Opencode,
}

impl Agent {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "claude" | "claude-code" => Ok(Agent::Claude),
            "cursor" => Ok(Agent::Cursor),
            "windsurf" => Ok(Agent::Windsurf),
            "opencode" => Ok(Agent::Opencode),
            other => bail!("no integration writer for agent '{other}'"),
        }
    }

    fn target_file(self, home: &std::path::Path) -> PathBuf {
        match self {
            Agent::Claude => home.join(".claude").join("settings.json"),
            Agent::Cursor => home.join(".cursor").join("rules").join("veto-policy.md"),
            Agent::Windsurf => home
                .join(".codeium")
                .join("windsurf")
                .join("memories")
                .join("veto-policy.md"),
            Agent::Opencode => home.join(".config").join("opencode").join("veto-policy.md"),
        }
    }
}

fn policy_markdown(set: &PolicySet) -> String {
    let mut out = String::from("# veto policies\n\nThese restrictions are enforced locally.\n\n");
    for policy in &set.policies {
        out.push_str(&format!("- {}\n", policy.description));
    }
    for rule in &set.rules {
        out.push_str(&format!("- {} (rule)\n", rule.name));
    }
    out
}

fn claude_settings_with_hook(existing: Option<&str>) -> Result<String> {
    let mut settings: Value = match existing {
        Some(raw) => serde_json::from_str(raw).context("existing Claude settings are not JSON")?,
        None => json!({}),
    };
    let hook_entry = json!({
        "matcher": "*",
        "hooks": [{"type": "command", "command": "veto hook"}]
    });
    let hooks = settings
        .as_object_mut()
        .context("Claude settings root must be an object")?
        .entry("hooks")
        .or_insert_with(|| json!({}));
    let pre_tool_use = hooks
        .as_object_mut()
        .context("Claude hooks must be an object")?
        .entry("PreToolUse")
        .or_insert_with(|| json!([]));
    let entries = pre_tool_use
        .as_array_mut()
        .context("PreToolUse must be an array")?;
    let already_installed = entries.iter().any(|entry| {
        entry
            .to_string()
            .contains("veto hook")
    });
    if !already_installed {
        entries.push(hook_entry);
    }
    serde_json::to_string_pretty(&settings).context("failed to render Claude settings")
}

/// Write the agent's integration file, backing up any prior content.
pub fn install(agent: Agent, set: &PolicySet, home: &std::path::Path) -> Result<PathBuf> {
    let target = agent.target_file(home);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {:?}", parent))?;
    }

    let prior = target.with_extension(format!(
        "{}{PRIOR_SUFFIX}",
        target.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    let existing = std::fs::read_to_string(&target).ok();
    if let Some(existing_content) = &existing {
        std::fs::write(&prior, existing_content)
            .with_context(|| format!("failed to back up {:?}", target))?;
    }

    let content = match agent {
        Agent::Claude => claude_settings_with_hook(existing.as_deref())?,
        _ => policy_markdown(set),
    };
    std::fs::write(&target, content).with_context(|| format!("failed to write {:?}", target))?;
    Ok(target)
}

/// Remove the integration, restoring whatever was there before install.
pub fn uninstall(agent: Agent, home: &std::path::Path) -> Result<PathBuf> {
    let target = agent.target_file(home);
    let prior = target.with_extension(format!(
        "{}{PRIOR_SUFFIX}",
        target.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));

    if prior.exists() {
        std::fs::rename(&prior, &target)
            .with_context(|| format!("failed to restore prior {:?}", target))?;
    } else if target.exists() {
        std::fs::remove_file(&target)
            .with_context(|| format!("failed to remove {:?}", target))?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veto_core::policy::model::{Action, Policy};

    fn sample_set() -> PolicySet {
        PolicySet {
            policies: vec![Policy {
                action: Action::Modify,
                include: vec![".env*".into()],
                exclude: vec![],
                description: "protect .env".into(),
                command_rules: vec![],
                content_rules: vec![],
                ast_rules: vec![],
            }],
            rules: vec![],
        }
    }

    #[test]
    fn install_then_uninstall_restores_prior_state() {
        let home = tempfile::tempdir().unwrap();
        let target = Agent::Claude.target_file(home.path());
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        let original = r#"{"model": "opus"}"#;
        std::fs::write(&target, original).unwrap();

        install(Agent::Claude, &sample_set(), home.path()).unwrap();
        let installed = std::fs::read_to_string(&target).unwrap();
        assert!(installed.contains("veto hook"));
        assert!(installed.contains("opus"), "existing settings are preserved");

        uninstall(Agent::Claude, home.path()).unwrap();
        let restored = std::fs::read_to_string(&target).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn uninstall_removes_file_that_did_not_exist_before() {
        let home = tempfile::tempdir().unwrap();
        let target = install(Agent::Cursor, &sample_set(), home.path()).unwrap();
        assert!(target.exists());
        uninstall(Agent::Cursor, home.path()).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn install_is_idempotent_for_claude_hook() {
        let home = tempfile::tempdir().unwrap();
        install(Agent::Claude, &sample_set(), home.path()).unwrap();
        install(Agent::Claude, &sample_set(), home.path()).unwrap();
        let settings = std::fs::read_to_string(Agent::Claude.target_file(home.path())).unwrap();
        assert_eq!(settings.matches("veto hook").count(), 1);
    }

    #[test]
    fn unknown_agent_is_rejected() {
        assert!(Agent::parse("emacs").is_err());
    }
}
