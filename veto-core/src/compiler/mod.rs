//! Restriction compiler.
//!
//! Turns a natural-language restriction phrase into executable policies:
//! normalize the phrase, consult the builtin table, fall back to fuzzy
//! prefix/containment matching, then the on-disk compilation cache, then
//! the LLM adjudicator. A phrase nothing can resolve is a hard error,
//! never a silent default.

pub mod builtins;

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::adjudicator::AdjudicatorClient;
use crate::config::defaults;
use crate::error::VetoError;
use crate::policy::dsl::{self, VetoFile};
use crate::policy::model::PolicySet;
use crate::utils::file_utils::{read_json_file, write_json_file};
use builtins::Compiled;

/// Where a compiled restriction came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOrigin {
    Builtin(String),
    Cache,
    Llm,
}

/// Result of compiling one restriction phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRestriction {
    pub compiled: Compiled,
    pub origin: CompileOrigin,
}

/// Normalize a restriction phrase for builtin lookup.
///
/// Lowercases, collapses whitespace, strips filler words, and rewrites
/// negation synonyms so `don't use lodash` and `never use lodash` both
/// resolve to `no lodash`.
pub fn normalize_phrase(phrase: &str) -> String {
    let lowered = phrase.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    let mut rewritten: Vec<String> = Vec::with_capacity(tokens.len());
    let mut index = 0;
    while index < tokens.len() {
        let token = tokens[index];
        let next = tokens.get(index + 1).copied();
        match (token, next) {
            ("do", Some("not")) | ("instead", Some("of")) => {
                rewritten.push(if token == "do" { "no" } else { "not" }.to_string());
                index += 2;
                continue;
            }
            ("never", Some("use")) => {
                rewritten.push("no".to_string());
                index += 2;
                continue;
            }
            _ => {}
        }
        // `no use X` collapses to `no X`.
        if token == "use" && rewritten.last().map(String::as_str) == Some("no") {
            index += 1;
            continue;
        }
        let replacement = match token {
            "don't" | "dont" | "never" | "avoid" => "no",
            "over" => "not",
            "please" | "the" | "a" | "an" | "always" | "using" => "",
            other => other,
        };
        if !replacement.is_empty() {
            rewritten.push(replacement.to_string());
        }
        index += 1;
    }

    // Collapse doubled negations introduced by the rewrites.
    let mut collapsed: Vec<String> = Vec::with_capacity(rewritten.len());
    for token in rewritten {
        if token == "no" && collapsed.last().map(String::as_str) == Some("no") {
            continue;
        }
        collapsed.push(token);
    }

    // `use pnpm not npm` is a preference statement.
    if collapsed.len() >= 3 && collapsed[0] == "use" && collapsed.contains(&"not".to_string()) {
        return format!("prefer {}", collapsed[1]);
    }
    if collapsed.first().map(String::as_str) == Some("use") {
        collapsed[0] = "prefer".to_string();
    }

    collapsed.join(" ")
}

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect()
}

/// Fuzzy builtin resolution: prefix first, then containment, then
/// punctuation-insensitive containment. Ambiguity biases toward
/// file-protection builtins.
fn fuzzy_builtin(normalized: &str) -> Option<&'static str> {
    let squashed = squash(normalized);
    let tiers: [Box<dyn Fn(&str) -> bool + '_>; 3] = [
        Box::new(|key: &str| key.starts_with(normalized) || normalized.starts_with(key)),
        Box::new(|key: &str| key.contains(normalized) || normalized.contains(key)),
        Box::new(|key: &str| {
            let key = squash(key);
            key.contains(&squashed) || squashed.contains(&key)
        }),
    ];

    for tier in &tiers {
        let candidates: Vec<&'static str> = builtins::keys()
            .iter()
            .copied()
            .filter(|key| tier(key))
            .collect();
        if candidates.is_empty() {
            continue;
        }
        return candidates
            .iter()
            .copied()
            .find(|key| builtins::is_file_protection(key))
            .or_else(|| candidates.first().copied());
    }
    None
}

/// Compiles restriction phrases into policy sets.
pub struct Compiler {
    cache_dir: PathBuf,
    adjudicator: Option<AdjudicatorClient>,
}

impl Compiler {
    pub fn new(cache_dir: PathBuf, adjudicator: Option<AdjudicatorClient>) -> Self {
        Self {
            cache_dir,
            adjudicator,
        }
    }

    /// Compiler with the default cache location and environment-derived
    /// adjudicator configuration.
    pub fn from_env() -> Result<Self, VetoError> {
        let cache_dir = defaults::compile_cache_dir()
            .map_err(|error| VetoError::Config(error.to_string()))?;
        Ok(Self::new(cache_dir, AdjudicatorClient::from_env()?))
    }

    fn cache_path(&self, phrase: &str) -> PathBuf {
        let hash = format!("{:x}", Sha256::digest(phrase.as_bytes()));
        self.cache_dir.join(format!("{hash}.json"))
    }

    /// Compile one restriction phrase.
    pub async fn compile(&self, phrase: &str) -> Result<CompiledRestriction, VetoError> {
        let normalized = normalize_phrase(phrase);
        if normalized.is_empty() {
            return Err(VetoError::Validation("empty restriction".to_string()));
        }

        if let Some(compiled) = builtins::lookup(&normalized) {
            debug!(phrase, builtin = %normalized, "compiled from builtin");
            return Ok(CompiledRestriction {
                compiled,
                origin: CompileOrigin::Builtin(normalized),
            });
        }

        if let Some(key) = fuzzy_builtin(&normalized)
            && let Some(compiled) = builtins::lookup(key)
        {
            debug!(phrase, builtin = key, "compiled from fuzzy builtin match");
            return Ok(CompiledRestriction {
                compiled,
                origin: CompileOrigin::Builtin(key.to_string()),
            });
        }

        // Cache is keyed by the verbatim phrase, not the normalization,
        // so an LLM answer for an odd phrasing is reused exactly.
        let cache_path = self.cache_path(phrase);
        if cache_path.exists()
            && let Ok(compiled) = read_json_file::<Compiled>(&cache_path).await
        {
            debug!(phrase, "compiled from cache");
            return Ok(CompiledRestriction {
                compiled,
                origin: CompileOrigin::Cache,
            });
        }

        if let Some(adjudicator) = &self.adjudicator {
            let compiled = adjudicator.compile_restriction(phrase).await?;
            if let Err(error) = write_json_file(&cache_path, &compiled).await {
                debug!(phrase, %error, "failed to write compilation cache");
            }
            info!(phrase, "compiled via adjudicator");
            return Ok(CompiledRestriction {
                compiled,
                origin: CompileOrigin::Llm,
            });
        }

        Err(VetoError::Kernel(format!(
            "no builtin matches '{phrase}' and no adjudicator is configured"
        )))
    }

    /// Compile a parsed `.veto` file, expanding inherited rule-packs.
    pub async fn compile_file(&self, file: &VetoFile) -> Result<PolicySet, VetoError> {
        let mut set = PolicySet::default();

        for pack_name in &file.extends {
            let phrases = dsl::rule_pack(pack_name).ok_or_else(|| {
                VetoError::Config(format!("unknown rule-pack '{pack_name}'"))
            })?;
            for phrase in phrases {
                let restriction = self.compile(phrase).await?;
                set.policies.extend(restriction.compiled.policies);
                set.rules.extend(restriction.compiled.rules);
            }
        }

        for restriction in &file.restrictions {
            let mut result = self.compile(&restriction.phrase).await?;
            if let Some(reason) = &restriction.reason {
                for policy in &mut result.compiled.policies {
                    policy.description = format!("{} ({reason})", policy.description);
                }
            }
            set.policies.extend(result.compiled.policies);
            set.rules.extend(result.compiled.rules);
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::dsl::Restriction;

    fn offline_compiler(dir: &std::path::Path) -> Compiler {
        Compiler::new(dir.to_path_buf(), None)
    }

    #[test]
    fn normalization_rewrites_negations() {
        assert_eq!(normalize_phrase("Don't use lodash"), "no lodash");
        assert_eq!(normalize_phrase("never use moment"), "no moment");
        assert_eq!(normalize_phrase("do not force push"), "no force push");
        assert_eq!(normalize_phrase("please protect the .env"), "protect .env");
    }

    #[test]
    fn preference_statements_normalize_to_prefer() {
        assert_eq!(normalize_phrase("use pnpm not npm"), "prefer pnpm");
        assert_eq!(normalize_phrase("use pnpm over npm"), "prefer pnpm");
        assert_eq!(normalize_phrase("pnpm instead of npm"), "pnpm not npm");
    }

    #[tokio::test]
    async fn exact_builtin_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = offline_compiler(dir.path());
        let result = compiler.compile("no lodash").await.unwrap();
        assert_eq!(result.origin, CompileOrigin::Builtin("no lodash".to_string()));
        assert_eq!(result.compiled.policies[0].description, "no lodash");
    }

    #[tokio::test]
    async fn fuzzy_match_biases_toward_file_protection() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = offline_compiler(dir.path());
        // "env" is contained in "protect .env" only.
        let result = compiler.compile("protect env files").await.unwrap();
        match result.origin {
            CompileOrigin::Builtin(key) => assert_eq!(key, "protect .env"),
            other => panic!("unexpected origin {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_phrase_without_llm_is_a_kernel_error() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = offline_compiler(dir.path());
        let result = compiler.compile("zzz completely novel qqq").await;
        assert!(matches!(result, Err(VetoError::Kernel(_))));
    }

    #[tokio::test]
    async fn cache_hit_resolves_without_llm() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = offline_compiler(dir.path());
        let phrase = "zzz completely novel qqq";

        // Seed the cache as a previous LLM run would have.
        let compiled = builtins::lookup("no lodash").unwrap();
        let path = compiler.cache_path(phrase);
        write_json_file(&path, &compiled).await.unwrap();

        let result = compiler.compile(phrase).await.unwrap();
        assert_eq!(result.origin, CompileOrigin::Cache);
    }

    #[tokio::test]
    async fn veto_file_reasons_land_in_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = offline_compiler(dir.path());
        let file = VetoFile {
            restrictions: vec![Restriction {
                phrase: "protect .env".to_string(),
                reason: Some("secrets live here".to_string()),
            }],
            extends: vec!["git-safety".to_string()],
        };
        let set = compiler.compile_file(&file).await.unwrap();
        assert!(set.policies.iter().any(|p| p.description.contains("secrets live here")));
        // git-safety pack brings force-push and reset bans.
        assert!(set.policies.iter().any(|p| p.description == "no force push"));
    }
}
