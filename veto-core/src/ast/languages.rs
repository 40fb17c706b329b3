//! Language registry for the AST engine.
//!
//! Grammars ship inside the binary as crate dependencies. A language
//! without a bundled grammar (currently kotlin) is reported as
//! unsupported and the engine skips it fail-open.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tree_sitter::Language;

/// Source language tag understood by AST rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LangTag {
    Typescript,
    Tsx,
    Javascript,
    Jsx,
    Python,
    Go,
    Rust,
    C,
    Cpp,
    Java,
    Kotlin,
    Ruby,
    Php,
    Bash,
}

impl LangTag {
    /// Detect the language from a file path's extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let extension = path.rsplit('.').next()?.to_lowercase();
        let tag = match extension.as_str() {
            "ts" | "mts" | "cts" => LangTag::Typescript,
            "tsx" => LangTag::Tsx,
            "js" | "mjs" | "cjs" => LangTag::Javascript,
            "jsx" => LangTag::Jsx,
            "py" => LangTag::Python,
            "go" => LangTag::Go,
            "rs" => LangTag::Rust,
            "c" | "h" => LangTag::C,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" => LangTag::Cpp,
            "java" => LangTag::Java,
            "kt" | "kts" => LangTag::Kotlin,
            "rb" => LangTag::Ruby,
            "php" => LangTag::Php,
            "sh" | "bash" => LangTag::Bash,
            _ => return None,
        };
        Some(tag)
    }

    /// The bundled grammar, if any. `jsx` shares the javascript grammar
    /// and `tsx` uses the dedicated TSX variant.
    pub fn grammar(self) -> Option<Language> {
        let language = match self {
            LangTag::Typescript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            LangTag::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            LangTag::Javascript | LangTag::Jsx => tree_sitter_javascript::LANGUAGE.into(),
            LangTag::Python => tree_sitter_python::LANGUAGE.into(),
            LangTag::Go => tree_sitter_go::LANGUAGE.into(),
            LangTag::Rust => tree_sitter_rust::LANGUAGE.into(),
            LangTag::C => tree_sitter_c::LANGUAGE.into(),
            LangTag::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            LangTag::Java => tree_sitter_java::LANGUAGE.into(),
            LangTag::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            LangTag::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            LangTag::Bash => tree_sitter_bash::LANGUAGE.into(),
            LangTag::Kotlin => return None,
        };
        Some(language)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LangTag::Typescript => "typescript",
            LangTag::Tsx => "tsx",
            LangTag::Javascript => "javascript",
            LangTag::Jsx => "jsx",
            LangTag::Python => "python",
            LangTag::Go => "go",
            LangTag::Rust => "rust",
            LangTag::C => "c",
            LangTag::Cpp => "cpp",
            LangTag::Java => "java",
            LangTag::Kotlin => "kotlin",
            LangTag::Ruby => "ruby",
            LangTag::Php => "php",
            LangTag::Bash => "bash",
        }
    }
}

impl std::fmt::Display for LangTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LangTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let tag = match value.to_lowercase().as_str() {
            "typescript" | "ts" => LangTag::Typescript,
            "tsx" => LangTag::Tsx,
            "javascript" | "js" => LangTag::Javascript,
            "jsx" => LangTag::Jsx,
            "python" | "py" => LangTag::Python,
            "go" => LangTag::Go,
            "rust" | "rs" => LangTag::Rust,
            "c" => LangTag::C,
            "cpp" | "c++" => LangTag::Cpp,
            "java" => LangTag::Java,
            "kotlin" | "kt" => LangTag::Kotlin,
            "ruby" | "rb" => LangTag::Ruby,
            "php" => LangTag::Php,
            "bash" | "sh" | "shell" => LangTag::Bash,
            other => return Err(format!("unknown language tag '{other}'")),
        };
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_extensions() {
        assert_eq!(LangTag::from_path("src/app.ts"), Some(LangTag::Typescript));
        assert_eq!(LangTag::from_path("ui/Button.tsx"), Some(LangTag::Tsx));
        assert_eq!(LangTag::from_path("main.py"), Some(LangTag::Python));
        assert_eq!(LangTag::from_path("deploy.sh"), Some(LangTag::Bash));
        assert_eq!(LangTag::from_path("README.md"), None);
        assert_eq!(LangTag::from_path("Makefile"), None);
    }

    #[test]
    fn bundled_grammars_load() {
        for tag in [
            LangTag::Typescript,
            LangTag::Tsx,
            LangTag::Javascript,
            LangTag::Python,
            LangTag::Go,
            LangTag::Rust,
            LangTag::C,
            LangTag::Cpp,
            LangTag::Java,
            LangTag::Ruby,
            LangTag::Php,
            LangTag::Bash,
        ] {
            assert!(tag.grammar().is_some(), "missing grammar for {tag}");
        }
        assert!(LangTag::Kotlin.grammar().is_none());
    }

    #[test]
    fn parses_string_tags() {
        assert_eq!("TypeScript".parse::<LangTag>().unwrap(), LangTag::Typescript);
        assert!("cobol".parse::<LangTag>().is_err());
    }
}
