//! Path normalization and glob-based protection matching.
//!
//! A target is protected when its normalized form matches any include
//! pattern and no exclude pattern. Matching is case-insensitive so the
//! same policy behaves identically on Windows checkouts, and a bare
//! filename pattern (`*.test.ts`) matches the basename of any path.

use glob::{MatchOptions, Pattern};
use tracing::warn;

/// Normalize a path string for matching.
///
/// Collapses backslashes to forward slashes, resolves `.` and `..`
/// segments lexically, strips the trailing slash (except for root), and
/// returns `"."` for an empty input.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim();
    if trimmed.is_empty() {
        return ".".to_string();
    }

    let absolute = trimmed.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                match segments.last() {
                    Some(&"..") | None => {
                        // Preserve leading parent refs on relative paths;
                        // on absolute paths ".." above root is a no-op.
                        if !absolute {
                            segments.push("..");
                        }
                    }
                    Some(_) => {
                        segments.pop();
                    }
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

/// A compiled include/exclude pattern pair.
#[derive(Debug, Clone)]
struct CompiledPattern {
    pattern: Pattern,
    /// Bare filename patterns also match the basename of any target.
    /// Patterns containing `**` or a separator keep full-path semantics.
    basename_mode: bool,
}

impl CompiledPattern {
    fn compile(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        let pattern = match Pattern::new(&normalized) {
            Ok(pattern) => pattern,
            Err(error) => {
                warn!(%error, pattern = %raw, "ignoring invalid path pattern");
                return None;
            }
        };
        let basename_mode = !normalized.contains('/') && !normalized.contains("**");
        Some(Self {
            pattern,
            basename_mode,
        })
    }

    fn matches(&self, target: &str) -> bool {
        let options = match_options();
        if self.pattern.matches_with(target, options) {
            return true;
        }
        if self.basename_mode {
            if let Some(basename) = target.rsplit('/').next() {
                return self.pattern.matches_with(basename, options);
            }
        }
        false
    }
}

/// Evaluates glob include/exclude rules against normalized targets.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    include: Vec<CompiledPattern>,
    exclude: Vec<CompiledPattern>,
}

impl PathMatcher {
    /// Compile a matcher from raw pattern lists. Invalid patterns are
    /// dropped with a warning rather than failing the whole policy.
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include
                .iter()
                .filter_map(|raw| CompiledPattern::compile(raw))
                .collect(),
            exclude: exclude
                .iter()
                .filter_map(|raw| CompiledPattern::compile(raw))
                .collect(),
        }
    }

    /// True iff the target matches any include pattern and no exclude
    /// pattern. Excludes always win.
    pub fn is_protected(&self, target: &str) -> bool {
        let target = normalize(target);
        let included = self.include.iter().any(|pattern| pattern.matches(&target));
        if !included {
            return false;
        }
        !self.exclude.iter().any(|pattern| pattern.matches(&target))
    }

    /// True iff the target matches an exclude pattern.
    pub fn is_excluded(&self, target: &str) -> bool {
        let target = normalize(target);
        self.exclude.iter().any(|pattern| pattern.matches(&target))
    }

    /// Filter to the paths the matcher protects. Used for snapshot seeding.
    pub fn collect_protected<'a, I>(&self, paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .filter(|path| self.is_protected(path))
            .map(|path| normalize(path))
            .collect()
    }

    /// Filter to the paths an exclude pattern rejects.
    pub fn collect_excluded<'a, I>(&self, paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        paths
            .into_iter()
            .filter(|path| self.is_excluded(path))
            .map(|path| normalize(path))
            .collect()
    }

    /// True when no include pattern compiled (a command-only policy).
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(include: &[&str], exclude: &[&str]) -> PathMatcher {
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        PathMatcher::new(&include, &exclude)
    }

    #[test]
    fn normalize_resolves_segments() {
        assert_eq!(normalize("a/b/../c"), "a/c");
        assert_eq!(normalize("./a/./b/"), "a/b");
        assert_eq!(normalize("a\\b\\c"), "a/b/c");
        assert_eq!(normalize(""), ".");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/a/../../b"), "/b");
        assert_eq!(normalize("../x"), "../x");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["a/b/../c", "src\\lib.rs", "./x/", "/a/b/"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn bare_filename_pattern_matches_basename() {
        let m = matcher(&["*.test.ts"], &[]);
        assert!(m.is_protected("src/deep/button.test.ts"));
        assert!(m.is_protected("button.test.ts"));
        assert!(!m.is_protected("src/button.ts"));
    }

    #[test]
    fn double_star_disables_basename_mode() {
        let m = matcher(&["src/**/*.rs"], &[]);
        assert!(m.is_protected("src/a/b/lib.rs"));
        assert!(!m.is_protected("other/lib.rs"));
    }

    #[test]
    fn excludes_always_win() {
        let m = matcher(&["*.env*"], &["*.env.example"]);
        assert!(m.is_protected(".env.local"));
        assert!(!m.is_protected(".env.example"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let m = matcher(&["*.ENV"], &[]);
        assert!(m.is_protected("config/.env"));
    }

    #[test]
    fn dotfiles_match_by_default() {
        let m = matcher(&["*"], &[]);
        assert!(m.is_protected(".bashrc"));
    }

    #[test]
    fn collect_helpers_filter_and_normalize() {
        let m = matcher(&["*.key"], &["test.key"]);
        let paths = ["certs/server.key", "test.key", "readme.md"];
        assert_eq!(
            m.collect_protected(paths.iter().copied()),
            vec!["certs/server.key".to_string()]
        );
        assert_eq!(
            m.collect_excluded(paths.iter().copied()),
            vec!["test.key".to_string()]
        );
    }
}
