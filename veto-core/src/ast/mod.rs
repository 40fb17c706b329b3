//! Tree query engine over source files.
//!
//! Parses file content under a declared language and evaluates
//! S-expression queries against the tree. Parsed trees are memoized by
//! `(path, content hash)` with a cheap rolling hash; compiled queries are
//! memoized by `(language, query text)`. Every failure mode is fail-open:
//! a parse or query error yields a skip, never a deny.

pub mod languages;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use streaming_iterator::StreamingIterator;
use tracing::debug;
use tree_sitter::{Parser, Query, QueryCursor, Tree};

use crate::config::constants::limits;
use crate::policy::model::AstRule;
pub use languages::LangTag;

/// One named capture inside a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInfo {
    pub text: String,
    pub line: usize,
    pub column: usize,
}

/// First match of a rule's query against a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstMatch {
    pub rule_id: String,
    pub line: usize,
    pub column: usize,
    pub snippet: String,
    pub captures: BTreeMap<String, CaptureInfo>,
}

/// Result of checking one AST rule against one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstOutcome {
    Matched(AstMatch),
    NoMatch,
    /// The check could not run; the caller must treat this as allowed.
    Skipped(String),
}

impl AstOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, AstOutcome::Matched(_))
    }
}

/// FNV-1a over the content. Fast and good enough for cache keying; this
/// is not an integrity hash.
fn rolling_hash(content: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in content.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

struct CachedTree {
    tree: Tree,
    lang: LangTag,
}

/// Shared tree/query caches plus the evaluation entry points.
///
/// Created at daemon init and disposed at teardown; both caches are
/// guarded with read-mostly semantics so parallel evaluations share work.
pub struct AstEngine {
    tree_cache: Mutex<LruCache<(PathBuf, u64), Arc<CachedTree>>>,
    query_cache: RwLock<HashMap<(LangTag, String), Arc<Query>>>,
}

impl Default for AstEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AstEngine {
    pub fn new() -> Self {
        Self {
            tree_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(limits::TREE_CACHE_CAPACITY).expect("nonzero capacity"),
            )),
            query_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check one rule against file content. First match wins.
    pub fn check_rule(&self, path: &str, content: &str, rule: &AstRule) -> AstOutcome {
        if content.len() as u64 > limits::MAX_CONTENT_BYTES {
            return AstOutcome::Skipped("content exceeds size cap".to_string());
        }

        // The pre-filter is a literal substring; when absent the rule
        // must report no match, without parsing.
        if let Some(pre_filter) = &rule.regex_pre_filter
            && !content.contains(pre_filter.as_str())
        {
            return AstOutcome::NoMatch;
        }

        let lang = match LangTag::from_path(path) {
            Some(lang) => lang,
            None => return AstOutcome::Skipped(format!("no language for '{path}'")),
        };
        if !rule
            .languages
            .iter()
            .any(|tag| tag.parse::<LangTag>().map(|t| t == lang).unwrap_or(false))
        {
            return AstOutcome::NoMatch;
        }

        let tree = match self.parse(path, content, lang) {
            Ok(tree) => tree,
            Err(reason) => return AstOutcome::Skipped(reason),
        };
        let query = match self.compile_query(lang, &rule.query) {
            Ok(query) => query,
            Err(reason) => return AstOutcome::Skipped(reason),
        };

        self.first_match(&tree.tree, &query, content, &rule.id)
            .map(AstOutcome::Matched)
            .unwrap_or(AstOutcome::NoMatch)
    }

    fn parse(&self, path: &str, content: &str, lang: LangTag) -> Result<Arc<CachedTree>, String> {
        let key = (PathBuf::from(path), rolling_hash(content));
        {
            let mut cache = self.tree_cache.lock();
            if let Some(cached) = cache.get(&key)
                && cached.lang == lang
            {
                return Ok(Arc::clone(cached));
            }
        }

        let grammar = lang
            .grammar()
            .ok_or_else(|| format!("no bundled grammar for {lang}"))?;
        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|error| format!("failed to load {lang} grammar: {error}"))?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| format!("failed to parse {path}"))?;

        let cached = Arc::new(CachedTree { tree, lang });
        self.tree_cache.lock().put(key, Arc::clone(&cached));
        Ok(cached)
    }

    fn compile_query(&self, lang: LangTag, query_text: &str) -> Result<Arc<Query>, String> {
        let key = (lang, query_text.to_string());
        {
            let cache = self.query_cache.read();
            if let Some(query) = cache.get(&key) {
                return Ok(Arc::clone(query));
            }
        }

        let grammar = lang
            .grammar()
            .ok_or_else(|| format!("no bundled grammar for {lang}"))?;
        let query = Query::new(&grammar, query_text)
            .map_err(|error| format!("invalid query for {lang}: {error}"))?;
        let query = Arc::new(query);
        self.query_cache.write().insert(key, Arc::clone(&query));
        Ok(query)
    }

    fn first_match(
        &self,
        tree: &Tree,
        query: &Query,
        content: &str,
        rule_id: &str,
    ) -> Option<AstMatch> {
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), content.as_bytes());
        let capture_names = query.capture_names();

        while let Some(found) = matches.next() {
            let anchor = found
                .captures
                .iter()
                .find(|capture| capture_names[capture.index as usize] == "violation")
                .or_else(|| found.captures.first())?;

            let node = anchor.node;
            let position = node.start_position();
            let mut snippet: String = node
                .utf8_text(content.as_bytes())
                .unwrap_or_default()
                .chars()
                .take(limits::MAX_SNIPPET_CHARS)
                .collect();
            snippet = snippet.trim_end().to_string();

            let mut captures = BTreeMap::new();
            for capture in found.captures {
                let name = capture_names[capture.index as usize].to_string();
                let capture_position = capture.node.start_position();
                let text = capture
                    .node
                    .utf8_text(content.as_bytes())
                    .unwrap_or_default()
                    .to_string();
                captures.insert(
                    name,
                    CaptureInfo {
                        text,
                        line: capture_position.row + 1,
                        column: capture_position.column + 1,
                    },
                );
            }

            debug!(rule = rule_id, line = position.row + 1, "ast rule matched");
            return Some(AstMatch {
                rule_id: rule_id.to_string(),
                line: position.row + 1,
                column: position.column + 1,
                snippet,
                captures,
            });
        }
        None
    }
}
