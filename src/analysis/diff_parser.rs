//! Unified diff parsing.
//!
//! Turns a unified diff (as produced by `git diff` / `git show`) into
//! [`DiffFile`] records. Parsing is best effort: malformed input never errors,
//! header line counts are informational, and output order follows input order.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Classification of a single diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Add,
    Delete,
    Context,
}

/// One line inside a hunk, without its `+`/`-`/` ` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub content: String,
}

/// A hunk (`@@ -a,b +c,d @@`) and its lines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffChunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLine>,
}

impl DiffChunk {
    /// Lines present on the old side (deletions and context).
    pub fn old_side_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Add)
            .count()
    }

    /// Lines present on the new side (additions and context).
    pub fn new_side_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Delete)
            .count()
    }
}

/// A file section of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffFile {
    pub file_name: String,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_renamed: bool,
    pub is_binary: bool,
    pub chunks: Vec<DiffChunk>,
    /// Added lines across all chunks, in order.
    pub additions: Vec<String>,
    /// Deleted lines across all chunks, in order.
    pub deletions: Vec<String>,
}

impl DiffFile {
    /// Number of added plus deleted lines.
    pub fn changed_lines(&self) -> usize {
        self.additions.len() + self.deletions.len()
    }

    /// Path of the file before the change, falling back to the display name.
    pub fn previous_path(&self) -> &str {
        self.old_path.as_deref().unwrap_or(&self.file_name)
    }
}

fn hunk_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk regex")
    })
}

/// Parses unified diff text into file records.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffParser;

impl DiffParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses `diff_text`. Never fails; unparseable sections are skipped.
    pub fn parse(&self, diff_text: &str) -> Vec<DiffFile> {
        let mut state = ParseState::default();
        for line in diff_text.lines() {
            state.feed(line);
        }
        state.finish()
    }
}

#[derive(Default)]
struct ParseState {
    files: Vec<DiffFile>,
    current: Option<DiffFile>,
    chunk: Option<DiffChunk>,
    /// Lines still expected on the old/new side of the open hunk.
    old_remaining: u32,
    new_remaining: u32,
}

impl ParseState {
    fn feed(&mut self, line: &str) {
        if self.in_hunk_body() {
            self.push_hunk_line(line);
            return;
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            self.start_file();
            let (old, new) = split_git_header(rest);
            if let Some(file) = self.current.as_mut() {
                file.file_name = new.clone().or_else(|| old.clone()).unwrap_or_default();
                file.old_path = old;
                file.new_path = new;
            }
            return;
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            // Plain unified diffs have no `diff --git` line; `---` opens the file.
            let needs_new_file = match &self.current {
                None => true,
                Some(file) => !file.chunks.is_empty() || self.chunk.is_some(),
            };
            if needs_new_file {
                self.start_file();
            }
            let path = strip_side_prefix(rest);
            if let Some(file) = self.current.as_mut() {
                match path {
                    Some(p) => {
                        file.old_path = Some(p.clone());
                        if file.file_name.is_empty() {
                            file.file_name = p;
                        }
                    }
                    None => file.is_new = true,
                }
            }
            return;
        }

        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(file) = self.current.as_mut() {
                match strip_side_prefix(rest) {
                    Some(p) => {
                        file.file_name = p.clone();
                        file.new_path = Some(p);
                    }
                    None => file.is_deleted = true,
                }
            }
            return;
        }

        if line.starts_with("@@") {
            self.start_chunk(line);
            return;
        }

        let Some(file) = self.current.as_mut() else {
            return;
        };

        if line.starts_with("new file mode") {
            file.is_new = true;
        } else if line.starts_with("deleted file mode") {
            file.is_deleted = true;
        } else if let Some(from) = line.strip_prefix("rename from ") {
            file.is_renamed = true;
            file.old_path = Some(from.to_string());
        } else if let Some(to) = line.strip_prefix("rename to ") {
            file.is_renamed = true;
            file.new_path = Some(to.to_string());
            file.file_name = to.to_string();
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            file.is_binary = true;
        } else if self.chunk.is_some() {
            // Past the declared counts but still looks like hunk content.
            if matches!(line.chars().next(), Some('+') | Some('-') | Some(' ')) {
                self.push_hunk_line(line);
            }
        }
    }

    fn in_hunk_body(&self) -> bool {
        self.chunk.is_some() && (self.old_remaining > 0 || self.new_remaining > 0)
    }

    fn push_hunk_line(&mut self, line: &str) {
        if line.starts_with('\\') {
            // "\ No newline at end of file"
            return;
        }
        let (kind, content) = match line.chars().next() {
            Some('+') => (DiffLineKind::Add, &line[1..]),
            Some('-') => (DiffLineKind::Delete, &line[1..]),
            Some(' ') => (DiffLineKind::Context, &line[1..]),
            None => (DiffLineKind::Context, ""),
            Some(_) => {
                // Not hunk content: the declared counts were wrong. Close the
                // hunk and reinterpret the line as a header.
                self.old_remaining = 0;
                self.new_remaining = 0;
                self.feed(line);
                return;
            }
        };

        match kind {
            DiffLineKind::Add => self.new_remaining = self.new_remaining.saturating_sub(1),
            DiffLineKind::Delete => self.old_remaining = self.old_remaining.saturating_sub(1),
            DiffLineKind::Context => {
                self.old_remaining = self.old_remaining.saturating_sub(1);
                self.new_remaining = self.new_remaining.saturating_sub(1);
            }
        }

        if let Some(file) = self.current.as_mut() {
            match kind {
                DiffLineKind::Add => file.additions.push(content.to_string()),
                DiffLineKind::Delete => file.deletions.push(content.to_string()),
                DiffLineKind::Context => {}
            }
        }
        if let Some(chunk) = self.chunk.as_mut() {
            chunk.lines.push(DiffLine {
                kind,
                content: content.to_string(),
            });
        }
    }

    fn start_chunk(&mut self, header: &str) {
        self.flush_chunk();
        if self.current.is_none() {
            self.current = Some(DiffFile::default());
        }

        match hunk_header_regex().captures(header) {
            Some(caps) => {
                let num = |idx: usize, default: u32| {
                    caps.get(idx)
                        .and_then(|m| m.as_str().parse::<u32>().ok())
                        .unwrap_or(default)
                };
                let chunk = DiffChunk {
                    old_start: num(1, 0),
                    old_lines: num(2, 1),
                    new_start: num(3, 0),
                    new_lines: num(4, 1),
                    lines: Vec::new(),
                };
                self.old_remaining = chunk.old_lines;
                self.new_remaining = chunk.new_lines;
                self.chunk = Some(chunk);
            }
            None => {
                // Unparseable header: record an empty chunk and skip its body.
                if let Some(file) = self.current.as_mut() {
                    file.chunks.push(DiffChunk::default());
                }
                self.old_remaining = 0;
                self.new_remaining = 0;
            }
        }
    }

    fn flush_chunk(&mut self) {
        if let Some(chunk) = self.chunk.take() {
            if let Some(file) = self.current.as_mut() {
                file.chunks.push(chunk);
            }
        }
        self.old_remaining = 0;
        self.new_remaining = 0;
    }

    fn start_file(&mut self) {
        self.flush_file();
        self.current = Some(DiffFile::default());
    }

    fn flush_file(&mut self) {
        self.flush_chunk();
        if let Some(file) = self.current.take() {
            self.files.push(file);
        }
    }

    fn finish(mut self) -> Vec<DiffFile> {
        self.flush_file();
        self.files
    }
}

/// Splits `a/old b/new` from a `diff --git` header.
fn split_git_header(rest: &str) -> (Option<String>, Option<String>) {
    if let Some(idx) = rest.find(" b/") {
        let old = rest[..idx].trim();
        let new = rest[idx + 1..].trim();
        return (strip_side_prefix(old), strip_side_prefix(new));
    }
    let mut parts = rest.split_whitespace();
    let old = parts.next().and_then(strip_side_prefix);
    let new = parts.next().and_then(strip_side_prefix);
    (old, new)
}

/// Strips the `a/`/`b/` prefix and trailing timestamp; `/dev/null` maps to `None`.
fn strip_side_prefix(path: &str) -> Option<String> {
    let path = path.split('\t').next().unwrap_or(path).trim();
    if path == "/dev/null" || path.is_empty() {
        return None;
    }
    let stripped = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(stripped.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GIT_DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 83db48f..bf269f4 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,4 +1,5 @@
 fn main() {
-    println!(\"old\");
+    println!(\"new\");
+    println!(\"extra\");
 }

diff --git a/src/new.rs b/src/new.rs
new file mode 100644
index 0000000..e69de29
--- /dev/null
+++ b/src/new.rs
@@ -0,0 +1,2 @@
+pub fn added() {}
+
diff --git a/src/gone.rs b/src/gone.rs
deleted file mode 100644
--- a/src/gone.rs
+++ /dev/null
@@ -1 +0,0 @@
-fn gone() {}
";

    #[test]
    fn test_parse_git_diff() {
        let files = DiffParser::new().parse(GIT_DIFF);
        assert_eq!(files.len(), 3);

        let modified = &files[0];
        assert_eq!(modified.file_name, "src/lib.rs");
        assert_eq!(modified.old_path.as_deref(), Some("src/lib.rs"));
        assert!(!modified.is_new && !modified.is_deleted);
        assert_eq!(modified.chunks.len(), 1);
        assert_eq!(modified.additions.len(), 2);
        assert_eq!(modified.deletions.len(), 1);
        assert_eq!(modified.chunks[0].old_side_count(), 4);
        assert_eq!(modified.chunks[0].new_side_count(), 5);

        let added = &files[1];
        assert!(added.is_new);
        assert_eq!(added.file_name, "src/new.rs");
        assert_eq!(added.additions, vec!["pub fn added() {}".to_string(), String::new()]);

        let deleted = &files[2];
        assert!(deleted.is_deleted);
        assert_eq!(deleted.file_name, "src/gone.rs");
        // "@@ -1 +0,0 @@" has no old count: defaults to 1.
        assert_eq!(deleted.chunks[0].old_lines, 1);
        assert_eq!(deleted.deletions, vec!["fn gone() {}".to_string()]);
    }

    #[test]
    fn test_parse_rename() {
        let diff = "\
diff --git a/old_name.py b/new_name.py
similarity index 90%
rename from old_name.py
rename to new_name.py
";
        let files = DiffParser::new().parse(diff);
        assert_eq!(files.len(), 1);
        assert!(files[0].is_renamed);
        assert_eq!(files[0].old_path.as_deref(), Some("old_name.py"));
        assert_eq!(files[0].file_name, "new_name.py");
        assert!(files[0].chunks.is_empty());
    }

    #[test]
    fn test_plain_unified_diff_without_git_header() {
        let diff = "\
--- a.txt\t2024-01-01
+++ a.txt\t2024-01-02
@@ -1,2 +1,2 @@
-one
+uno
 two
--- b.txt
+++ b.txt
@@ -3 +3 @@
-three
+tres
";
        let files = DiffParser::new().parse(diff);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name, "a.txt");
        assert_eq!(files[1].file_name, "b.txt");
        assert_eq!(files[1].chunks[0].old_start, 3);
        assert_eq!(files[1].chunks[0].new_lines, 1);
    }

    #[test]
    fn test_deleted_line_that_looks_like_header() {
        let diff = "\
diff --git a/sql/schema.sql b/sql/schema.sql
--- a/sql/schema.sql
+++ b/sql/schema.sql
@@ -1,2 +1,1 @@
--- a comment
 SELECT 1;
";
        let files = DiffParser::new().parse(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].deletions, vec!["-- a comment".to_string()]);
    }

    #[test]
    fn test_malformed_input_does_not_panic() {
        let parser = DiffParser::new();
        assert!(parser.parse("").is_empty());
        assert!(parser.parse("random text\nwithout structure").is_empty());

        let files = parser.parse("diff --git a/x b/x\n@@ garbage @@\n+orphan\n");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].chunks.len(), 1);
        assert!(files[0].chunks[0].lines.is_empty());

        // Header declares more lines than the hunk has.
        let files = parser.parse("diff --git a/y b/y\n@@ -1,10 +1,10 @@\n-a\n+b\n");
        assert_eq!(files[0].additions, vec!["b".to_string()]);
        assert_eq!(files[0].deletions, vec!["a".to_string()]);
    }

    #[test]
    fn test_binary_file() {
        let diff = "diff --git a/logo.png b/logo.png\nBinary files a/logo.png and b/logo.png differ\n";
        let files = DiffParser::new().parse(diff);
        assert!(files[0].is_binary);
    }

    fn render_diff(files: &[Vec<(u32, u32)>]) -> String {
        let mut out = String::new();
        for (idx, hunks) in files.iter().enumerate() {
            out.push_str(&format!("diff --git a/f{idx}.rs b/f{idx}.rs\n"));
            out.push_str(&format!("--- a/f{idx}.rs\n+++ b/f{idx}.rs\n"));
            let mut line_no = 1;
            for (deleted, added) in hunks {
                let context = 1;
                out.push_str(&format!(
                    "@@ -{line_no},{} +{line_no},{} @@\n",
                    deleted + context,
                    added + context
                ));
                out.push_str(" ctx\n");
                for i in 0..*deleted {
                    out.push_str(&format!("-old {i}\n"));
                }
                for i in 0..*added {
                    out.push_str(&format!("+new {i}\n"));
                }
                line_no += 10;
            }
        }
        out
    }

    proptest! {
        #[test]
        fn prop_well_formed_diff_matches_headers(
            files in prop::collection::vec(
                prop::collection::vec((0u32..6, 0u32..6), 1..4),
                1..6,
            )
        ) {
            let parsed = DiffParser::new().parse(&render_diff(&files));
            prop_assert_eq!(parsed.len(), files.len());
            for file in &parsed {
                for chunk in &file.chunks {
                    prop_assert_eq!(chunk.old_side_count(), chunk.old_lines as usize);
                    prop_assert_eq!(chunk.new_side_count(), chunk.new_lines as usize);
                }
            }
        }
    }
}
