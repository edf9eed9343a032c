//! Source language detection.
//!
//! Languages are resolved from the file extension only. Files whose extension
//! maps to no known language are skipped by the code parser.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// A programming language the code parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Rust,
    Go,
    Java,
}

impl Language {
    /// All languages, in a stable order.
    pub const ALL: [Language; 6] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Python,
        Language::Rust,
        Language::Go,
        Language::Java,
    ];

    /// Resolves a language from a path's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&ext)
    }

    /// Resolves a language from a bare extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "py" | "pyi" => Some(Language::Python),
            "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    /// Lowercase identifier used in serialized output and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
        }
    }

    /// Whether a name is private by this language's naming convention.
    ///
    /// Go marks exported identifiers with an upper-case first letter; the
    /// other languages use a leading underscore (or `#` for JS private fields).
    pub fn is_private_name(&self, name: &str) -> bool {
        match self {
            Language::Go => name
                .chars()
                .next()
                .map(|c| !c.is_uppercase())
                .unwrap_or(true),
            Language::JavaScript | Language::TypeScript => {
                name.starts_with('_') || name.starts_with('#')
            }
            _ => name.starts_with('_'),
        }
    }

    /// Prefix that starts a single-line comment.
    pub fn line_comment_prefix(&self) -> &'static str {
        match self {
            Language::Python => "#",
            _ => "//",
        }
    }

    /// Whether the language delimits blocks with braces.
    pub fn uses_braces(&self) -> bool {
        !matches!(self, Language::Python)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path("src/app.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("lib/util.JS"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("main.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("pkg/server.go"), Some(Language::Go));
        assert_eq!(Language::from_path("tool.py"), Some(Language::Python));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn test_private_names() {
        assert!(Language::Python.is_private_name("_helper"));
        assert!(!Language::Python.is_private_name("helper"));
        assert!(Language::Go.is_private_name("helper"));
        assert!(!Language::Go.is_private_name("Helper"));
        assert!(Language::JavaScript.is_private_name("#secret"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Language::TypeScript.to_string(), "typescript");
    }
}
