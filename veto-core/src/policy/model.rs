//! Typed policy, rule, and verdict representations.
//!
//! Policies are immutable after compilation; the decision engine never
//! mutates them, so a compiled set is freely shareable across tasks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::paths::PathMatcher;

/// Action category a policy guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Delete,
    Modify,
    Execute,
    Read,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::Delete => "delete",
            Action::Modify => "modify",
            Action::Execute => "execute",
            Action::Read => "read",
        };
        write!(f, "{name}")
    }
}

/// Blocks commands matching any of the glob patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRule {
    pub block: Vec<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest: Option<String>,
}

/// Matching mode for a regex content rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// Raw regex over the full content.
    #[default]
    Fast,
    /// Comments and string literals are blanked before matching.
    Strict,
    /// Ambiguous hits are deferred to the LLM adjudicator.
    Semantic,
}

/// Regex rule over new file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    pub pattern: String,
    #[serde(default)]
    pub file_types: Vec<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest: Option<String>,
    #[serde(default)]
    pub mode: ContentMode,
    /// Regexes that veto a hit when they match the same line.
    #[serde(default)]
    pub exceptions: Vec<String>,
}

/// Tree-query rule over parsed file content. Preferred over regex rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstRule {
    pub id: String,
    /// S-expression tree query.
    pub query: String,
    pub languages: Vec<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest: Option<String>,
    /// Literal substring that must appear in the source, else the rule is
    /// skipped without parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_pre_filter: Option<String>,
}

/// An executable rule set for one action category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub action: Action,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub description: String,
    #[serde(default)]
    pub command_rules: Vec<CommandRule>,
    #[serde(default)]
    pub content_rules: Vec<ContentRule>,
    #[serde(default)]
    pub ast_rules: Vec<AstRule>,
}

impl Policy {
    /// A policy is well-formed when it protects paths or carries command
    /// rules; an empty policy would silently allow everything.
    pub fn is_well_formed(&self) -> bool {
        !self.include.is_empty()
            || !self.command_rules.is_empty()
            || !self.content_rules.is_empty()
            || !self.ast_rules.is_empty()
    }

    /// Compile the include/exclude globs for path checks.
    pub fn matcher(&self) -> PathMatcher {
        PathMatcher::new(&self.include, &self.exclude)
    }
}

/// Severity of an SDK rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What a matching SDK rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Block,
    Warn,
    Ask,
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    /// Regex over the stringified field value.
    Matches,
    Exists,
    GreaterThan,
    LessThan,
}

/// A single field comparison addressing a dotted path into the tool-call
/// arguments (`file_path`, `options.force`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Declarative SDK rule. A rule with no `tools` is global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub severity: Severity,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Conjunction: every condition must hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    /// Disjunction of conjunctions: any group holding is a match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_groups: Option<Vec<Vec<Condition>>>,
}

fn default_enabled() -> bool {
    true
}

/// A structured request from an agent to execute a named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// The kernel's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
    Ask,
}

/// Where a verdict's match anchored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MatchedRule {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Decision plus reason, suggestion, match anchor, and free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchedRule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: None,
            suggest: None,
            matched: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
            suggest: None,
            matched: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn ask(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Ask,
            reason: Some(reason.into()),
            suggest: None,
            matched: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_suggest(mut self, suggest: impl Into<String>) -> Self {
        self.suggest = Some(suggest.into());
        self
    }

    pub fn with_matched(mut self, matched: MatchedRule) -> Self {
        self.matched = Some(matched);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// The compiled rule bundle a session enforces: path/command/content
/// policies plus declarative SDK rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl PolicySet {
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty() && self.rules.is_empty()
    }

    /// One-line summary for session records and `status` output.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .policies
            .iter()
            .map(|policy| policy.description.clone())
            .collect();
        parts.extend(self.rules.iter().map(|rule| rule.name.clone()));
        parts.join("; ")
    }
}

/// How a live session enforces its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Shim wrappers plus daemon.
    Wrapper,
    /// Snapshot-and-restore only.
    Watchdog,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_requires_some_surface() {
        let empty = Policy {
            action: Action::Modify,
            include: vec![],
            exclude: vec![],
            description: "nothing".into(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![],
        };
        assert!(!empty.is_well_formed());

        let command_only = Policy {
            command_rules: vec![CommandRule {
                block: vec!["git push*".into()],
                reason: "review first".into(),
                suggest: None,
            }],
            ..empty.clone()
        };
        assert!(command_only.is_well_formed());
    }

    #[test]
    fn verdict_builders_set_fields() {
        let verdict = Verdict::deny("no").with_suggest("try this").with_metadata(
            "blocked_in_strict_mode",
            serde_json::Value::Bool(true),
        );
        assert_eq!(verdict.decision, Decision::Deny);
        assert_eq!(verdict.suggest.as_deref(), Some("try this"));
        assert!(verdict.metadata.contains_key("blocked_in_strict_mode"));
    }

    #[test]
    fn policy_round_trips_through_json() {
        let policy = Policy {
            action: Action::Delete,
            include: vec!["*.env*".into()],
            exclude: vec![".env.example".into()],
            description: "protect env files".into(),
            command_rules: vec![],
            content_rules: vec![],
            ast_rules: vec![],
        };
        let json = serde_json::to_string(&policy).unwrap();
        let back: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
