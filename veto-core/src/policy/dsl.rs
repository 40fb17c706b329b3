//! Parsers for the two policy surface syntaxes.
//!
//! `.veto` files are line-oriented: one restriction per line, `#`
//! comments, an optional ` - reason` suffix, and `extend <ref>` pseudo-
//! directives naming an inherited rule-pack. YAML files carry structured
//! SDK rules. Both compile into the same policy model.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::VetoError;
use crate::policy::model::{Policy, Rule};

/// One parsed `.veto` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A parsed `.veto` file: restrictions plus inherited rule-pack refs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VetoFile {
    pub restrictions: Vec<Restriction>,
    pub extends: Vec<String>,
}

/// Builtin rule-packs an `extend` directive may reference. Each expands to
/// restriction phrases fed through the compiler like any other line.
pub fn rule_pack(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "node-safety" => Some(&["no lodash", "prefer pnpm", "no global installs"]),
        "git-safety" => Some(&["no force push", "no git reset", "protect git"]),
        "secrets" => Some(&["protect .env", "protect ssh", "no secrets in code"]),
        _ => None,
    }
}

/// Parse `.veto` content.
pub fn parse_veto(content: &str) -> Result<VetoFile, VetoError> {
    let mut file = VetoFile::default();

    for (index, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(reference) = line.strip_prefix("extend ") {
            let reference = reference.trim();
            if reference.is_empty() {
                return Err(VetoError::Config(format!(
                    "line {}: extend requires a rule-pack reference",
                    index + 1
                )));
            }
            if rule_pack(reference).is_none() {
                return Err(VetoError::Config(format!(
                    "line {}: unknown rule-pack '{}'",
                    index + 1,
                    reference
                )));
            }
            file.extends.push(reference.to_string());
            continue;
        }

        // `restriction - human reason`; the separator needs surrounding
        // spaces so phrases like `no rm -rf` survive intact.
        let (phrase, reason) = match line.split_once(" - ") {
            Some((phrase, reason)) => (phrase.trim(), Some(reason.trim().to_string())),
            None => (line, None),
        };
        if phrase.is_empty() {
            return Err(VetoError::Config(format!(
                "line {}: empty restriction",
                index + 1
            )));
        }
        file.restrictions.push(Restriction {
            phrase: phrase.to_string(),
            reason,
        });
    }

    Ok(file)
}

/// YAML rule-file document shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// Parse a YAML rule file.
pub fn parse_yaml(content: &str) -> Result<RuleDocument, VetoError> {
    let document: RuleDocument = serde_yaml::from_str(content)
        .map_err(|error| VetoError::Validation(format!("invalid rule file: {error}")))?;

    for rule in &document.rules {
        if rule.id.trim().is_empty() {
            return Err(VetoError::Validation("rule with empty id".to_string()));
        }
    }
    for policy in &document.policies {
        if !policy.is_well_formed() {
            return Err(VetoError::Validation(format!(
                "policy '{}' protects nothing",
                policy.description
            )));
        }
    }
    Ok(document)
}

/// Decide whether content is line-oriented `.veto` or structured YAML.
///
/// If the first non-blank, non-comment line carries no YAML document key
/// and is not a flow mapping, it is treated as line-oriented.
pub fn is_line_oriented(content: &str) -> bool {
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let yaml_keyed = line.starts_with("policies:")
            || line.starts_with("version:")
            || line.starts_with("rules:");
        return !yaml_keyed && !line.starts_with('{');
    }
    true
}

/// Load every YAML rule file under a directory, recursively.
pub fn load_rules_dir(dir: &Path) -> Result<RuleDocument, VetoError> {
    let mut merged = RuleDocument::default();
    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_yaml = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if !is_yaml {
            continue;
        }
        let content = std::fs::read_to_string(entry.path())?;
        let document = parse_yaml(&content)?;
        merged.rules.extend(document.rules);
        merged.policies.extend(document.policies);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::{RuleAction, Severity};

    #[test]
    fn parses_restrictions_comments_and_reasons() {
        let content = "\
# team policy
no lodash
protect .env - secrets live here

extend git-safety
";
        let file = parse_veto(content).unwrap();
        assert_eq!(file.restrictions.len(), 2);
        assert_eq!(file.restrictions[0].phrase, "no lodash");
        assert_eq!(file.restrictions[1].phrase, "protect .env");
        assert_eq!(
            file.restrictions[1].reason.as_deref(),
            Some("secrets live here")
        );
        assert_eq!(file.extends, vec!["git-safety".to_string()]);
    }

    #[test]
    fn hyphenated_flags_survive_parsing() {
        let file = parse_veto("no rm -rf\n").unwrap();
        assert_eq!(file.restrictions[0].phrase, "no rm -rf");
        assert!(file.restrictions[0].reason.is_none());
    }

    #[test]
    fn unknown_rule_pack_is_a_config_error() {
        let result = parse_veto("extend nonsense\n");
        assert!(matches!(result, Err(VetoError::Config(_))));
    }

    #[test]
    fn yaml_rules_parse_with_conditions() {
        let content = "\
version: 1
rules:
  - id: no-prod-writes
    name: Block production config writes
    severity: high
    action: block
    tools: [write_file]
    conditions:
      - field: file_path
        operator: contains
        value: production
";
        let document = parse_yaml(content).unwrap();
        assert_eq!(document.rules.len(), 1);
        let rule = &document.rules[0];
        assert!(rule.enabled);
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.tools.as_deref().unwrap(), ["write_file"]);
    }

    #[test]
    fn invalid_operator_is_a_validation_error() {
        let content = "\
rules:
  - id: x
    name: x
    severity: low
    action: block
    conditions:
      - field: a
        operator: frobnicates
        value: 1
";
        assert!(matches!(parse_yaml(content), Err(VetoError::Validation(_))));
    }

    #[test]
    fn format_detection() {
        assert!(is_line_oriented("# hi\nno lodash\n"));
        assert!(!is_line_oriented("version: 1\nrules: []\n"));
        assert!(!is_line_oriented("rules:\n  - id: a\n"));
        assert!(!is_line_oriented("{\"rules\": []}"));
    }

    #[test]
    fn loads_rules_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("team");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("base.yaml"),
            "rules:\n  - {id: a, name: A, severity: low, action: warn}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("top.yml"),
            "rules:\n  - {id: b, name: B, severity: high, action: block}\n",
        )
        .unwrap();

        let document = load_rules_dir(dir.path()).unwrap();
        assert_eq!(document.rules.len(), 2);
    }
}
