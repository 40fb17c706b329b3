//! Command normalization and glob pattern matching.
//!
//! Commands are lowercased with collapsed whitespace before matching, and
//! shorthand aliases are expanded first so `npm i` is caught by a rule
//! written against `npm install`. Chained shells (`a && b; c | d`) are
//! split so each segment is checked independently.

pub mod aliases;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// Normalize a command string: trim, lowercase, collapse whitespace.
/// Idempotent by construction.
pub fn normalize_command(command: &str) -> String {
    command
        .split_whitespace()
        .map(|token| token.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a shell command line on unquoted `&&`, `||`, `;`, and `|`
/// separators. Quoted separators stay inside their segment.
pub fn split_shell_chain(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = ' ';
    let mut escaped = false;

    for ch in command.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            '\'' | '"' if !in_quotes => {
                in_quotes = true;
                quote_char = ch;
                current.push(ch);
            }
            c if c == quote_char && in_quotes => {
                in_quotes = false;
                current.push(ch);
            }
            '&' | '|' | ';' if !in_quotes => {
                if !current.trim().is_empty() {
                    segments.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        segments.push(current.trim().to_string());
    }
    segments
}

/// Compiled-glob memo shared across policies. Command patterns are few and
/// repeat heavily, so one process-wide map is enough.
static GLOB_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn compile_glob(pattern: &str) -> Option<Regex> {
    let mut cache = GLOB_CACHE.lock();
    if let Some(cached) = cache.get(pattern) {
        return cached.clone();
    }
    let escaped = regex::escape(pattern);
    let glob_regex = format!("^{}$", escaped.replace(r"\*", ".*").replace(r"\?", "."));
    let compiled = match Regex::new(&glob_regex) {
        Ok(regex) => Some(regex),
        Err(error) => {
            warn!(%error, %pattern, "ignoring invalid command glob pattern");
            None
        }
    };
    cache.insert(pattern.to_string(), compiled.clone());
    compiled
}

/// True iff pattern `p` matches command `c` under the kernel's rules:
///
/// 1. exact equality post-normalization, or
/// 2. `p` has no wildcard and `c` starts with `p` at a word boundary, or
/// 3. `p` has wildcards (`*`/`?`) and the full command matches the
///    compiled glob.
///
/// Alias expansion is applied to the command before matching.
pub fn command_matches(command: &str, pattern: &str) -> bool {
    let pattern = normalize_command(pattern);
    if pattern.is_empty() {
        return false;
    }
    let command = normalize_command(command);

    for form in aliases::expand(&command) {
        if form == pattern {
            return true;
        }
        if !pattern.contains('*') && !pattern.contains('?') {
            if form.starts_with(&format!("{pattern} ")) {
                return true;
            }
        } else if let Some(regex) = compile_glob(&pattern)
            && regex.is_match(&form)
        {
            return true;
        }
    }
    false
}

/// True iff any segment of a (possibly chained) shell command matches the
/// pattern.
pub fn chain_matches(command: &str, pattern: &str) -> bool {
    split_shell_chain(command)
        .iter()
        .any(|segment| command_matches(segment, pattern))
}
