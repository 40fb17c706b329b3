//! The decision engine.
//!
//! Evaluates a tool call against the compiled policy set and returns a
//! verdict. The pipeline short-circuits on the first deny: command rules
//! for shell tools, AST then content rules for file writes, path
//! protection for path-bearing arguments, then declarative SDK rules.
//! In `log` mode denies are downgraded to annotated allows.

pub mod content;

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::adjudicator::AdjudicatorClient;
use crate::ast::{AstEngine, AstOutcome, LangTag};
use crate::commands;
use crate::policy::model::{
    Action, Condition, ConditionOperator, ContentMode, ContentRule, Decision, MatchedRule, Policy,
    PolicySet, Rule, RuleAction, ToolCall, Verdict,
};

/// Enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Denies are emitted as-is.
    #[default]
    Strict,
    /// Denies are downgraded to allows with a warning annotation.
    Log,
}

const SHELL_TOOLS: &[&str] = &[
    "bash",
    "shell",
    "run_terminal_cmd",
    "run_command",
    "execute_command",
    "terminal",
];
const WRITE_TOOLS: &[&str] = &[
    "write",
    "write_file",
    "edit",
    "edit_file",
    "create_file",
    "apply_patch",
    "str_replace_editor",
    "multiedit",
    "notebookedit",
];
const READ_TOOLS: &[&str] = &["read", "read_file", "open_file", "cat", "view"];
const DELETE_TOOLS: &[&str] = &["delete", "delete_file", "remove_file", "rm"];

fn tool_in(tool_name: &str, set: &[&str]) -> bool {
    let lowered = tool_name.to_lowercase();
    set.contains(&lowered.as_str())
}

/// Actions a tool implies for path-protection checks.
fn implied_actions(tool_name: &str) -> Vec<Action> {
    if tool_in(tool_name, SHELL_TOOLS) {
        vec![Action::Execute]
    } else if tool_in(tool_name, WRITE_TOOLS) {
        vec![Action::Modify]
    } else if tool_in(tool_name, DELETE_TOOLS) {
        vec![Action::Delete]
    } else if tool_in(tool_name, READ_TOOLS) {
        vec![Action::Read]
    } else {
        vec![]
    }
}

/// Keys that carry file paths in common agent tool schemas.
const PATH_KEYS: &[&str] = &[
    "file_path",
    "filepath",
    "path",
    "target_file",
    "file",
    "notebook_path",
];
/// Keys that carry new file content.
const CONTENT_KEYS: &[&str] = &["content", "contents", "new_string", "new_str", "code_edit"];

fn argument_paths(call: &ToolCall) -> Vec<String> {
    let mut paths = Vec::new();
    for key in PATH_KEYS {
        if let Some(Value::String(value)) = call.arguments.get(*key) {
            paths.push(value.clone());
        }
    }
    if let Some(Value::Array(values)) = call.arguments.get("paths") {
        for value in values {
            if let Value::String(value) = value {
                paths.push(value.clone());
            }
        }
    }
    paths
}

fn argument_command(call: &ToolCall) -> Option<String> {
    match call.arguments.get("command") {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}

fn argument_content(call: &ToolCall) -> Option<String> {
    for key in CONTENT_KEYS {
        if let Some(Value::String(value)) = call.arguments.get(*key) {
            return Some(value.clone());
        }
    }
    None
}

/// Commands whose targets imply a file action even through the shell.
fn command_target_action(command: &str) -> Option<(Action, Vec<String>)> {
    let normalized = commands::normalize_command(command);
    let mut tokens = normalized.split_whitespace();
    let program = tokens.next()?;
    let action = match program {
        "rm" | "unlink" | "rmdir" | "shred" => Action::Delete,
        "mv" | "cp" | "touch" | "chmod" | "chown" | "tee" | "truncate" => Action::Modify,
        "cat" | "less" | "more" | "head" | "tail" => Action::Read,
        _ => return None,
    };
    let targets: Vec<String> = tokens
        .filter(|token| !token.starts_with('-'))
        .map(|token| token.to_string())
        .collect();
    Some((action, targets))
}

fn position_of(content: &str, offset: usize) -> (usize, usize) {
    let before = &content[..offset.min(content.len())];
    let line = before.matches('\n').count() + 1;
    let column = offset - before.rfind('\n').map(|at| at + 1).unwrap_or(0) + 1;
    (line, column)
}

/// Evaluates tool calls against an immutable policy set.
pub struct DecisionEngine {
    set: Arc<PolicySet>,
    ast: Arc<AstEngine>,
    adjudicator: Option<AdjudicatorClient>,
    mode: EngineMode,
}

impl DecisionEngine {
    pub fn new(set: Arc<PolicySet>, mode: EngineMode) -> Self {
        Self {
            set,
            ast: Arc::new(AstEngine::new()),
            adjudicator: None,
            mode,
        }
    }

    pub fn with_adjudicator(mut self, adjudicator: Option<AdjudicatorClient>) -> Self {
        self.adjudicator = adjudicator;
        self
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn policy_set(&self) -> &PolicySet {
        &self.set
    }

    /// Evaluate a structured tool call.
    pub async fn evaluate(&self, call: &ToolCall) -> Verdict {
        let verdict = self.evaluate_inner(call).await;
        self.apply_mode(verdict)
    }

    /// Daemon surface: evaluate an `(action, target, command?, content?)`
    /// request by mapping it onto the matching synthetic tool call.
    pub async fn evaluate_request(
        &self,
        action: Action,
        target: &str,
        command: Option<&str>,
        file_content: Option<&str>,
    ) -> Verdict {
        let tool_name = match action {
            Action::Execute => "shell",
            Action::Delete => "delete_file",
            Action::Modify => "write_file",
            Action::Read => "read_file",
        };
        let mut arguments = serde_json::Map::new();
        if !target.is_empty() {
            arguments.insert("file_path".to_string(), Value::String(target.to_string()));
        }
        if let Some(command) = command {
            arguments.insert("command".to_string(), Value::String(command.to_string()));
        }
        if let Some(file_content) = file_content {
            arguments.insert(
                "content".to_string(),
                Value::String(file_content.to_string()),
            );
        }
        let call = ToolCall::new(tool_name, arguments);
        self.evaluate(&call).await
    }

    async fn evaluate_inner(&self, call: &ToolCall) -> Verdict {
        // Shell tools: command rules first.
        if tool_in(&call.name, SHELL_TOOLS)
            && let Some(command) = argument_command(call)
        {
            if let Some(verdict) = self.check_command_rules(&command) {
                return verdict;
            }
            // A shell command can still name protected paths.
            if let Some((action, targets)) = command_target_action(&command) {
                for target in targets {
                    if let Some(verdict) = self.check_path_protection(&target, &[action]) {
                        return verdict;
                    }
                }
            }
        }

        // File-writing tools: AST rules, then content rules, on the new
        // content.
        if tool_in(&call.name, WRITE_TOOLS)
            && let Some(file_content) = argument_content(call)
        {
            for path in argument_paths(call) {
                if let Some(verdict) = self.check_file_content(&path, &file_content).await {
                    return verdict;
                }
            }
        }

        // Path protection for every path-bearing argument.
        let actions = implied_actions(&call.name);
        if !actions.is_empty() {
            for path in argument_paths(call) {
                if let Some(verdict) = self.check_path_protection(&path, &actions) {
                    return verdict;
                }
            }
        }

        // Declarative SDK rules, combined by severity of decision.
        self.check_rules(call)
    }

    fn check_command_rules(&self, command: &str) -> Option<Verdict> {
        for policy in &self.set.policies {
            for rule in &policy.command_rules {
                for pattern in &rule.block {
                    let hit = commands::command_matches(command, pattern)
                        || commands::chain_matches(command, pattern);
                    if hit {
                        debug!(command, pattern = %pattern, policy = %policy.description, "command rule hit");
                        let mut verdict = Verdict::deny(rule.reason.clone()).with_matched(
                            MatchedRule {
                                rule_id: policy.description.clone(),
                                ..MatchedRule::default()
                            },
                        );
                        if let Some(suggest) = &rule.suggest {
                            verdict = verdict.with_suggest(suggest.clone());
                        }
                        return Some(verdict);
                    }
                }
            }
        }
        None
    }

    async fn check_file_content(&self, path: &str, file_content: &str) -> Option<Verdict> {
        for policy in &self.set.policies {
            let scoped = policy.include.is_empty() || policy.matcher().is_protected(path);

            if scoped {
                for rule in &policy.ast_rules {
                    if let AstOutcome::Matched(found) =
                        self.ast.check_rule(path, file_content, rule)
                    {
                        let mut verdict = Verdict::deny(format!(
                            "{} in {}",
                            rule.reason, path
                        ))
                        .with_matched(MatchedRule {
                            rule_id: found.rule_id,
                            line: Some(found.line),
                            column: Some(found.column),
                            snippet: Some(found.snippet),
                        });
                        if let Some(suggest) = &rule.suggest {
                            verdict = verdict.with_suggest(suggest.clone());
                        }
                        return Some(verdict);
                    }
                }
            }

            for rule in &policy.content_rules {
                let type_scoped = if rule.file_types.is_empty() {
                    scoped
                } else {
                    crate::paths::PathMatcher::new(&rule.file_types, &[]).is_protected(path)
                };
                if !type_scoped {
                    continue;
                }
                if let Some(verdict) = self.check_content_rule(path, file_content, rule).await {
                    return Some(verdict);
                }
            }
        }
        None
    }

    async fn check_content_rule(
        &self,
        path: &str,
        file_content: &str,
        rule: &ContentRule,
    ) -> Option<Verdict> {
        let regex = match Regex::new(&rule.pattern) {
            Ok(regex) => regex,
            Err(error) => {
                warn!(%error, pattern = %rule.pattern, "ignoring invalid content rule");
                return None;
            }
        };

        let lang = LangTag::from_path(path);
        let haystack: String = match rule.mode {
            ContentMode::Fast => file_content.to_string(),
            ContentMode::Strict | ContentMode::Semantic => {
                // Only run where blanking is defined; a strict rule on an
                // unblankable language risks matching inside comments.
                let lang = lang?;
                content::blank_comments_and_strings(file_content, lang)?
            }
        };

        let hit = regex.find(&haystack)?;
        let (line, column) = position_of(&haystack, hit.start());

        // Exceptions veto a hit when they match the same line.
        let hit_line = haystack.lines().nth(line - 1).unwrap_or_default();
        for exception in &rule.exceptions {
            if let Ok(exception_regex) = Regex::new(exception)
                && exception_regex.is_match(hit_line)
            {
                return None;
            }
        }

        let snippet: String = hit.as_str().chars().take(100).collect();
        let matched = MatchedRule {
            rule_id: rule.pattern.clone(),
            line: Some(line),
            column: Some(column),
            snippet: Some(snippet.clone()),
        };

        if rule.mode == ContentMode::Semantic {
            return Some(self.adjudicate_semantic(path, &snippet, rule, matched).await);
        }

        let mut verdict =
            Verdict::deny(format!("{} in {}", rule.reason, path)).with_matched(matched);
        if let Some(suggest) = &rule.suggest {
            verdict = verdict.with_suggest(suggest.clone());
        }
        Some(verdict)
    }

    async fn adjudicate_semantic(
        &self,
        path: &str,
        snippet: &str,
        rule: &ContentRule,
        matched: MatchedRule,
    ) -> Verdict {
        let Some(adjudicator) = &self.adjudicator else {
            // No adjudicator configured: treat the hit as a plain deny.
            return Verdict::deny(format!("{} in {}", rule.reason, path)).with_matched(matched);
        };
        match adjudicator
            .adjudicate_content(path, snippet, &rule.reason)
            .await
        {
            Ok(mut verdict) => {
                if !verdict.is_allowed() {
                    verdict.matched = Some(matched);
                }
                verdict
            }
            Err(error) => {
                warn!(%error, "adjudicator unreachable");
                match self.mode {
                    EngineMode::Strict => Verdict::deny("API unavailable").with_matched(matched),
                    EngineMode::Log => Verdict::allow()
                        .with_metadata("api_error", Value::String(error.to_string())),
                }
            }
        }
    }

    fn check_path_protection(&self, target: &str, actions: &[Action]) -> Option<Verdict> {
        for policy in &self.set.policies {
            if !actions.contains(&policy.action) {
                continue;
            }
            if policy.include.is_empty() {
                continue;
            }
            // Content-bearing policies use `include` as a file-type
            // scope, not a protection set.
            if !policy.ast_rules.is_empty() || !policy.content_rules.is_empty() {
                continue;
            }
            if policy.matcher().is_protected(target) {
                debug!(target, policy = %policy.description, "protected path hit");
                return Some(
                    Verdict::deny(format!(
                        "'{}' is protected by policy '{}'",
                        crate::paths::normalize(target),
                        policy.description
                    ))
                    .with_matched(MatchedRule {
                        rule_id: policy.description.clone(),
                        ..MatchedRule::default()
                    }),
                );
            }
        }
        None
    }

    fn check_rules(&self, call: &ToolCall) -> Verdict {
        let mut decision = None::<Verdict>;

        for rule in &self.set.rules {
            if !rule.enabled {
                continue;
            }
            if let Some(tools) = &rule.tools
                && !tools.is_empty()
                && !tools.iter().any(|tool| tool.eq_ignore_ascii_case(&call.name))
            {
                continue;
            }
            if !rule_conditions_hold(rule, call) {
                continue;
            }

            let candidate = match rule.action {
                RuleAction::Block => Verdict::deny(format!("blocked by rule '{}'", rule.name))
                    .with_matched(MatchedRule {
                        rule_id: rule.id.clone(),
                        ..MatchedRule::default()
                    }),
                RuleAction::Ask => Verdict::ask(format!("rule '{}' requires confirmation", rule.name))
                    .with_matched(MatchedRule {
                        rule_id: rule.id.clone(),
                        ..MatchedRule::default()
                    }),
                RuleAction::Warn => Verdict::allow()
                    .with_metadata("warning", Value::String(rule.name.clone())),
                RuleAction::Allow => Verdict::allow(),
            };

            // Tie-break: deny > ask > allow.
            decision = Some(match (decision.take(), candidate) {
                (None, candidate) => candidate,
                (Some(current), candidate) => {
                    let rank = |verdict: &Verdict| match verdict.decision {
                        Decision::Deny => 2,
                        Decision::Ask => 1,
                        Decision::Allow => 0,
                    };
                    if rank(&candidate) > rank(&current) {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }

        // Default, whether or not any rule applied, is allow.
        decision.unwrap_or_else(Verdict::allow)
    }

    fn apply_mode(&self, verdict: Verdict) -> Verdict {
        if self.mode == EngineMode::Log && verdict.decision == Decision::Deny {
            warn!(
                reason = verdict.reason.as_deref().unwrap_or(""),
                "deny downgraded to allow in log mode"
            );
            let mut downgraded = verdict;
            downgraded.decision = Decision::Allow;
            downgraded
                .metadata
                .insert("blocked_in_strict_mode".to_string(), Value::Bool(true));
            return downgraded;
        }
        verdict
    }
}

fn lookup_field<'a>(arguments: &'a serde_json::Map<String, Value>, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let first = parts.next()?;
    let mut current = arguments.get(first)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn condition_holds(condition: &Condition, call: &ToolCall) -> bool {
    let found = lookup_field(&call.arguments, &condition.field);

    if condition.operator == ConditionOperator::Exists {
        return found.is_some();
    }
    let Some(found) = found else {
        return false;
    };
    let found_text = value_as_string(found);
    let expected_text = value_as_string(&condition.value);

    match condition.operator {
        ConditionOperator::Equals => found == &condition.value || found_text == expected_text,
        ConditionOperator::NotEquals => found != &condition.value && found_text != expected_text,
        ConditionOperator::Contains => found_text.contains(&expected_text),
        ConditionOperator::NotContains => !found_text.contains(&expected_text),
        ConditionOperator::StartsWith => found_text.starts_with(&expected_text),
        ConditionOperator::EndsWith => found_text.ends_with(&expected_text),
        ConditionOperator::Matches => Regex::new(&expected_text)
            .map(|regex| regex.is_match(&found_text))
            .unwrap_or(false),
        ConditionOperator::GreaterThan => match (found.as_f64(), condition.value.as_f64()) {
            (Some(left), Some(right)) => left > right,
            _ => false,
        },
        ConditionOperator::LessThan => match (found.as_f64(), condition.value.as_f64()) {
            (Some(left), Some(right)) => left < right,
            _ => false,
        },
        ConditionOperator::Exists => unreachable!("handled above"),
    }
}

fn rule_conditions_hold(rule: &Rule, call: &ToolCall) -> bool {
    let conjunction_holds = |conditions: &[Condition]| {
        conditions
            .iter()
            .all(|condition| condition_holds(condition, call))
    };

    if let Some(groups) = &rule.condition_groups
        && !groups.is_empty()
    {
        if groups.iter().any(|group| conjunction_holds(group)) {
            return true;
        }
        // Groups present but none held; plain conditions may still match.
        if let Some(conditions) = &rule.conditions
            && !conditions.is_empty()
        {
            return conjunction_holds(conditions);
        }
        return false;
    }

    match &rule.conditions {
        Some(conditions) if !conditions.is_empty() => conjunction_holds(conditions),
        // A rule with no conditions matches every call to its tools.
        _ => true,
    }
}
