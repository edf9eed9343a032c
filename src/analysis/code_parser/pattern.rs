//! Regex-based fallback parser.
//!
//! Lower fidelity than the syntax-tree parser: declarations are matched line by
//! line, block ends come from brace balance (or indentation for Python), and
//! complexity is a keyword count. It never fails; any internal problem yields
//! [`ParsedCode::minimal`].

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::warn;

use super::{is_branch_keyword, ParseError, ParsingStrategy};
use crate::analysis::language::Language;
use crate::analysis::parsed::{
    count_lines, ClassInfo, CommentInfo, ExportInfo, FunctionInfo, ImportInfo, ParsedCode,
};

/// Compiled expressions for one language.
struct LanguagePatterns {
    functions: Vec<Regex>,
    /// Only applied inside class bodies.
    methods: Vec<Regex>,
    classes: Vec<Regex>,
    impl_blocks: Option<Regex>,
    imports: Vec<Regex>,
    exports: Vec<Regex>,
    properties: Option<Regex>,
    ternary: Option<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = p, error = %e, "Skipping invalid parser pattern");
                None
            }
        })
        .collect()
}

fn compile_one(pattern: &str) -> Option<Regex> {
    compile(&[pattern]).into_iter().next()
}

const JS_FUNCTIONS: &[&str] = &[
    r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)\s*(?:<[^>(]*>)?\s*\((?P<params>[^)]*)\)?(?:\s*:\s*(?P<ret>[^{=]+))?",
    r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\((?P<params>[^)]*)\)|(?P<single>[A-Za-z_$][\w$]*))\s*(?::\s*(?P<ret>[^=]+?))?\s*=>",
    r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?function\b[^(]*\((?P<params>[^)]*)\)",
];

const JS_METHODS: &[&str] = &[
    r"^\s*(?:(?:public|private|protected|static|async|readonly|override|abstract|get|set)\s+)*(?P<name>#?[A-Za-z_$][\w$]*)\s*(?:<[^>(]*>)?\s*\((?P<params>[^)]*)\)\s*(?::\s*(?P<ret>[^{]+?))?\s*\{",
];

const JS_CLASSES: &[&str] = &[
    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)(?:\s*<[^>]*>)?(?:\s+extends\s+(?P<base>[\w$.]+))?",
];

const TS_CLASSES: &[&str] = &[
    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)(?:\s*<[^>]*>)?(?:\s+extends\s+(?P<base>[\w$.]+))?",
    r"^\s*(?:export\s+)?interface\s+(?P<name>[A-Za-z_$][\w$]*)(?:\s*<[^>]*>)?(?:\s+extends\s+(?P<base>[\w$.]+))?",
];

const JS_IMPORTS: &[&str] = &[
    r#"^\s*import\s+(?:type\s+)?(?P<spec>.+?)\s+from\s+['"](?P<src>[^'"]+)['"]"#,
    r#"^\s*import\s+['"](?P<src>[^'"]+)['"]"#,
    r#"require\(\s*['"](?P<src>[^'"]+)['"]\s*\)"#,
];

const JS_EXPORTS: &[&str] = &[
    r"^\s*export\s+(?:default\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+(?P<name>[A-Za-z_$][\w$]*)",
    r"^\s*export\s*\{(?P<list>[^}]*)\}",
];

const PY_FUNCTIONS: &[&str] = &[
    r"^\s*(?:async\s+)?def\s+(?P<name>\w+)\s*\((?P<params>[^)]*)\)?(?:\s*->\s*(?P<ret>[^:]+))?\s*:?",
];

const PY_CLASSES: &[&str] = &[r"^\s*class\s+(?P<name>\w+)\s*(?:\((?P<base>[^)]*)\))?\s*:"];

const PY_IMPORTS: &[&str] = &[
    r"^\s*from\s+(?P<src>[\w.]+)\s+import\s+(?P<spec>.+)",
    r"^\s*import\s+(?P<src>[\w.]+(?:\s*,\s*[\w.]+)*)",
];

const RUST_FUNCTIONS: &[&str] = &[
    r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:const|async|unsafe|extern\s+"[^"]*")\s+)*fn\s+(?P<name>\w+)\s*(?:<[^(]*>)?\s*\((?P<params>[^)]*)\)?(?:\s*->\s*(?P<ret>[^{;]+))?"#,
];

const RUST_CLASSES: &[&str] =
    &[r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+(?P<name>\w+)"];

const RUST_IMPORTS: &[&str] = &[r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?P<src>[^;]+);"];

const RUST_EXPORTS: &[&str] = &[
    r"^\s*pub\s+(?:(?:async|unsafe|const)\s+)*(?:fn|struct|enum|trait|mod|const|static|type|union)\s+(?P<name>\w+)",
];

const GO_FUNCTIONS: &[&str] = &[
    r"^func\s+(?:\((?P<recv>[^)]*)\)\s*)?(?P<name>\w+)\s*(?:\[[^\]]*\])?\s*\((?P<params>[^)]*)\)\s*(?P<ret>[^{]*)",
];

const GO_CLASSES: &[&str] = &[r"^\s*type\s+(?P<name>\w+)\s+(?:struct|interface)\b"];

const GO_IMPORTS: &[&str] = &[
    r#"^\s*import\s+(?:[\w.]+\s+)?"(?P<src>[^"]+)""#,
    r#"^\s+(?:[\w.]+\s+)?"(?P<src>[^"]+)"\s*$"#,
];

const JAVA_FUNCTIONS: &[&str] = &[
    r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|native|default)\s+)*(?:<[^>]+>\s+)?(?P<ret>[\w<>\[\]?,.]+)\s+(?P<name>\w+)\s*\((?P<params>[^)]*)\)?\s*(?:throws\s+[\w.,\s]+)?\s*[{;]?\s*$",
    r"^\s*(?:public|private|protected)\s+(?P<name>[A-Z]\w*)\s*\((?P<params>[^)]*)\)\s*\{?\s*$",
];

const JAVA_CLASSES: &[&str] = &[
    r"^\s*(?:(?:public|private|protected|static|final|abstract|sealed)\s+)*(?:class|interface|enum|record)\s+(?P<name>\w+)(?:<[^>]*>)?(?:\s*\([^)]*\))?(?:\s+extends\s+(?P<base>[\w.]+))?",
];

const JAVA_IMPORTS: &[&str] = &[r"^\s*import\s+(?:static\s+)?(?P<src>[\w.*]+)\s*;"];

const JAVA_EXPORTS: &[&str] = &[
    r"^\s*public\s+(?:(?:abstract|final|static|sealed)\s+)*(?:class|interface|enum|record)\s+(?P<name>\w+)",
];

fn build_patterns(language: Language) -> LanguagePatterns {
    match language {
        Language::JavaScript | Language::TypeScript => LanguagePatterns {
            functions: compile(JS_FUNCTIONS),
            methods: compile(JS_METHODS),
            classes: compile(if language == Language::TypeScript {
                TS_CLASSES
            } else {
                JS_CLASSES
            }),
            impl_blocks: None,
            imports: compile(JS_IMPORTS),
            exports: compile(JS_EXPORTS),
            properties: compile_one(
                r"^\s*(?:(?:public|private|protected|readonly|static|declare|override)\s+)*(?P<name>#?[A-Za-z_$][\w$]*)\s*[?!]?\s*(?::[^=;(]+)?\s*(?:=[^>]|;|$)",
            ),
            ternary: compile_one(r"\s\?\s"),
        },
        Language::Python => LanguagePatterns {
            functions: compile(PY_FUNCTIONS),
            methods: Vec::new(),
            classes: compile(PY_CLASSES),
            impl_blocks: None,
            imports: compile(PY_IMPORTS),
            exports: Vec::new(),
            properties: compile_one(r"^\s+(?:self\.)?(?P<name>[A-Za-z_]\w*)\s*(?::[^=]+)?=[^=]"),
            ternary: None,
        },
        Language::Rust => LanguagePatterns {
            functions: compile(RUST_FUNCTIONS),
            methods: Vec::new(),
            classes: compile(RUST_CLASSES),
            impl_blocks: compile_one(
                r"^\s*(?:unsafe\s+)?impl(?:<[^>]*>)?\s+(?:[\w:]+(?:<[^>]*>)?\s+for\s+)?(?P<name>\w+)",
            ),
            imports: compile(RUST_IMPORTS),
            exports: compile(RUST_EXPORTS),
            properties: compile_one(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?P<name>[a-z_]\w*)\s*:[^:]"),
            ternary: None,
        },
        Language::Go => LanguagePatterns {
            functions: compile(GO_FUNCTIONS),
            methods: Vec::new(),
            classes: compile(GO_CLASSES),
            impl_blocks: None,
            imports: compile(GO_IMPORTS),
            exports: Vec::new(),
            properties: compile_one(r"^\s*(?P<name>[A-Za-z_]\w*)\s+[\w\*\[\]\.]+"),
            ternary: None,
        },
        Language::Java => LanguagePatterns {
            functions: compile(JAVA_FUNCTIONS),
            methods: Vec::new(),
            classes: compile(JAVA_CLASSES),
            impl_blocks: None,
            imports: compile(JAVA_IMPORTS),
            exports: compile(JAVA_EXPORTS),
            properties: compile_one(
                r"^\s*(?:(?:public|private|protected|static|final|transient|volatile)\s+)*[\w<>\[\],.?]+\s+(?P<name>\w+)\s*(?:=[^=]|;)",
            ),
            ternary: compile_one(r"\s\?\s"),
        },
    }
}

fn patterns_for(language: Language) -> &'static LanguagePatterns {
    static CACHE: OnceLock<HashMap<Language, LanguagePatterns>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| {
        Language::ALL
            .iter()
            .map(|lang| (*lang, build_patterns(*lang)))
            .collect()
    });
    // Every language is inserted above.
    &cache[&language]
}

const NOT_FUNCTION_NAMES: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "new", "else", "throw", "do",
    "try", "with", "match", "loop", "super", "typeof", "await", "yield", "delete", "void",
];

/// A source line split into code and trailing comment.
struct SourceLine<'a> {
    raw: &'a str,
    code: String,
}

/// Regex-based parsing strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternParser;

impl PatternParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses `content`, degrading to a minimal snapshot on any failure.
    pub fn parse_or_minimal(&self, content: &str, language: Language) -> ParsedCode {
        match self.extract(content, language) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(language = %language, error = %e, "Pattern parse failed, returning minimal result");
                ParsedCode::minimal(language, content)
            }
        }
    }

    fn extract(&self, content: &str, language: Language) -> Result<ParsedCode, ParseError> {
        if content.contains('\0') {
            return Err(ParseError::Extraction("content looks binary".to_string()));
        }

        let patterns = patterns_for(language);
        let (lines, comments) = split_lines(content, language);

        let mut classes = extract_classes(&lines, language, patterns);
        let functions = extract_functions(&lines, &comments, language, patterns, &classes);
        attach_members(&mut classes, &functions, &lines, language, patterns);

        let imports = extract_imports(&lines, language, patterns);
        let exports = extract_exports(&lines, language, patterns, &functions, &classes);

        let complexity = 1 + count_branches(&lines, 0, lines.len(), language, patterns);

        Ok(ParsedCode {
            language,
            functions,
            classes,
            imports,
            exports,
            comments,
            complexity,
            lines_of_code: count_lines(content),
        })
    }
}

impl ParsingStrategy for PatternParser {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn supports(&self, _language: Language) -> bool {
        true
    }

    fn parse(&self, content: &str, language: Language) -> Result<ParsedCode, ParseError> {
        self.extract(content, language)
    }
}

/// Separates code from comments, tracking block comments across lines.
fn split_lines(content: &str, language: Language) -> (Vec<SourceLine<'_>>, Vec<CommentInfo>) {
    let mut lines = Vec::new();
    let mut comments = Vec::new();
    let mut block: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let mut code = String::new();
        let mut rest = raw;

        loop {
            if let Some((start, text)) = block.as_mut() {
                match rest.find("*/") {
                    Some(end) => {
                        text.push_str(&rest[..end + 2]);
                        comments.push(CommentInfo {
                            text: std::mem::take(text),
                            start_line: *start,
                            end_line: line_no,
                        });
                        block = None;
                        rest = &rest[end + 2..];
                        continue;
                    }
                    None => {
                        text.push_str(rest);
                        text.push('\n');
                        break;
                    }
                }
            }

            match find_comment_start(rest, language) {
                Some((pos, is_block)) => {
                    code.push_str(&rest[..pos]);
                    if is_block {
                        // The closer search starts past the opener so `/*/` stays open.
                        block = Some((line_no, "/*".to_string()));
                        rest = &rest[pos + 2..];
                        continue;
                    }
                    comments.push(CommentInfo {
                        text: rest[pos..].trim_end().to_string(),
                        start_line: line_no,
                        end_line: line_no,
                    });
                    break;
                }
                None => {
                    code.push_str(rest);
                    break;
                }
            }
        }

        lines.push(SourceLine { raw, code });
    }

    if let Some((start, text)) = block {
        comments.push(CommentInfo {
            text,
            start_line: start,
            end_line: lines.len().max(start),
        });
    }

    (lines, comments)
}

/// Finds the first comment opener outside a string literal.
fn find_comment_start(line: &str, language: Language) -> Option<(usize, bool)> {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'`' => quote = Some(b),
            // Rust lifetimes share the quote character.
            b'\'' if language != Language::Rust => quote = Some(b),
            b'#' if language == Language::Python => return Some((i, false)),
            b'/' if language.uses_braces() && i + 1 < bytes.len() => match bytes[i + 1] {
                b'/' => return Some((i, false)),
                b'*' => return Some((i, true)),
                _ => {}
            },
            _ => {}
        }
        i += 1;
    }
    None
}

fn indentation(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Last line (0-based index) of the block opened at `start`.
fn block_end(lines: &[SourceLine<'_>], start: usize, language: Language) -> usize {
    if language.uses_braces() {
        brace_block_end(lines, start)
    } else {
        indent_block_end(lines, start)
    }
}

fn brace_block_end(lines: &[SourceLine<'_>], start: usize) -> usize {
    const MAX_HEADER_LINES: usize = 5;
    let mut depth: i64 = 0;
    let mut opened = false;

    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.code.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                ';' if !opened => return start + offset,
                _ => {}
            }
            if opened && depth <= 0 {
                return start + offset;
            }
        }
        if !opened && offset >= MAX_HEADER_LINES {
            return start;
        }
    }
    lines.len().saturating_sub(1).max(start)
}

fn indent_block_end(lines: &[SourceLine<'_>], start: usize) -> usize {
    let base = indentation(lines[start].raw);
    let mut end = start;
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.raw.trim().is_empty() {
            continue;
        }
        if indentation(line.raw) <= base {
            break;
        }
        end = start + 1 + offset;
    }
    end
}

fn count_branches(
    lines: &[SourceLine<'_>],
    from: usize,
    to: usize,
    language: Language,
    patterns: &LanguagePatterns,
) -> u32 {
    let mut count = 0u32;
    for line in &lines[from..to.min(lines.len())] {
        let code = strip_strings(&line.code, language);
        count += code
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|word| is_branch_keyword(language, word))
            .count() as u32;
        if language == Language::Rust {
            count += code.matches("=>").count() as u32;
        }
        if let Some(ternary) = &patterns.ternary {
            count += ternary.find_iter(&code).count() as u32;
        }
    }
    count
}

/// Blanks out string literal contents so keywords inside them are not counted.
fn strip_strings(code: &str, language: Language) -> String {
    let mut out = String::with_capacity(code.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in code.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                    out.push(ch);
                }
            }
            None => {
                let opens_char = ch == '\''
                    && language != Language::Rust
                    && !out.ends_with(|c: char| c.is_alphanumeric());
                if ch == '"' || ch == '`' || opens_char {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }
    out
}

fn capture(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Splits a parameter list at top-level commas and reduces each to its name.
fn split_parameters(params: &str, language: Language) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in params.chars() {
        match ch {
            '(' | '[' | '{' | '<' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' | '>' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(|p| parameter_name(&p, language))
        .collect()
}

fn parameter_name(param: &str, language: Language) -> String {
    let param = param.split('=').next().unwrap_or(param).trim();
    match language {
        Language::Java => param
            .split_whitespace()
            .last()
            .unwrap_or(param)
            .to_string(),
        Language::Go => param
            .split_whitespace()
            .next()
            .unwrap_or(param)
            .to_string(),
        Language::Rust if param.contains("self") && !param.contains(':') => param.to_string(),
        // `private readonly db: Db` and `mut x: u32` both bind the last word.
        _ => param
            .split(':')
            .next()
            .unwrap_or(param)
            .split_whitespace()
            .last()
            .unwrap_or(param)
            .trim_end_matches('?')
            .to_string(),
    }
}

fn extract_classes(
    lines: &[SourceLine<'_>],
    language: Language,
    patterns: &LanguagePatterns,
) -> Vec<ClassInfo> {
    let mut classes = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        for re in &patterns.classes {
            if let Some(caps) = re.captures(&line.code) {
                let Some(name) = capture(&caps, "name") else {
                    continue;
                };
                let superclass = capture(&caps, "base").and_then(|base| {
                    base.split(',')
                        .next()
                        .map(|b| b.trim().to_string())
                        .filter(|b| !b.is_empty())
                });
                let end = block_end(lines, idx, language);
                classes.push(ClassInfo {
                    name,
                    start_line: idx + 1,
                    end_line: end + 1,
                    methods: Vec::new(),
                    properties: Vec::new(),
                    superclass,
                });
                break;
            }
        }
    }
    classes
}

fn extract_functions(
    lines: &[SourceLine<'_>],
    comments: &[CommentInfo],
    language: Language,
    patterns: &LanguagePatterns,
    classes: &[ClassInfo],
) -> Vec<FunctionInfo> {
    let mut functions = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let in_class = classes
            .iter()
            .any(|c| line_no > c.start_line && line_no <= c.end_line);

        let method_patterns: &[Regex] = if in_class { &patterns.methods } else { &[] };
        let caps = patterns
            .functions
            .iter()
            .chain(method_patterns.iter())
            .find_map(|re| re.captures(&line.code));
        let Some(caps) = caps else {
            continue;
        };
        let Some(name) = capture(&caps, "name") else {
            continue;
        };
        if NOT_FUNCTION_NAMES.contains(&name.as_str()) {
            continue;
        }
        let return_type = capture(&caps, "ret")
            .map(|r| r.trim_end_matches('{').trim().to_string())
            .map(|r| r.split(" where ").next().unwrap_or(&r).trim().to_string())
            .filter(|r| !r.is_empty());
        if language == Language::Java
            && return_type
                .as_deref()
                .map(|r| NOT_FUNCTION_NAMES.contains(&r))
                .unwrap_or(false)
        {
            continue;
        }

        let parameters = match (capture(&caps, "params"), capture(&caps, "single")) {
            (Some(params), _) => split_parameters(&params, language),
            (None, Some(single)) => vec![single],
            (None, None) => Vec::new(),
        };

        let end = block_end(lines, idx, language);
        let complexity = 1 + count_branches(lines, idx, end + 1, language, patterns);

        functions.push(FunctionInfo {
            name,
            start_line: line_no,
            end_line: end + 1,
            parameters,
            complexity,
            docstring: docstring(lines, comments, idx, end, language),
            return_type,
        });
    }

    functions
}

fn docstring(
    lines: &[SourceLine<'_>],
    comments: &[CommentInfo],
    idx: usize,
    end: usize,
    language: Language,
) -> Option<String> {
    if language == Language::Python {
        let next = lines.get(idx + 1).filter(|_| idx < end)?;
        let trimmed = next.raw.trim();
        let delimiter = if trimmed.starts_with("\"\"\"") {
            "\"\"\""
        } else if trimmed.starts_with("'''") {
            "'''"
        } else {
            return None;
        };
        let mut text = String::new();
        for line in &lines[idx + 1..=end] {
            text.push_str(line.raw.trim());
            text.push('\n');
            let closes = line.raw.trim().matches(delimiter).count();
            let is_first = std::ptr::eq(line, &lines[idx + 1]);
            if (is_first && closes >= 2) || (!is_first && closes >= 1) {
                break;
            }
        }
        return Some(
            text.trim_matches(|c: char| c == '"' || c == '\'' || c == '\n')
                .trim()
                .to_string(),
        );
    }

    // Comment that ends on the line right above the declaration.
    let line_no = idx + 1;
    comments
        .iter()
        .rev()
        .find(|c| c.end_line + 1 == line_no)
        .map(|c| c.text.clone())
}

fn attach_members(
    classes: &mut [ClassInfo],
    functions: &[FunctionInfo],
    lines: &[SourceLine<'_>],
    language: Language,
    patterns: &LanguagePatterns,
) {
    let inside_function =
        |line_no: usize| functions.iter().any(|f| line_no >= f.start_line && line_no <= f.end_line);

    for class in classes.iter_mut() {
        for function in functions {
            if function.start_line > class.start_line && function.end_line <= class.end_line {
                class.methods.push(function.name.clone());
            }
        }

        let Some(properties) = &patterns.properties else {
            continue;
        };
        let body_start = class.start_line; // 1-based header line == 0-based first body line
        let body_end = class.end_line.saturating_sub(1);
        for idx in body_start..body_end.min(lines.len()) {
            let line_no = idx + 1;
            if inside_function(line_no) {
                continue;
            }
            let code = lines[idx].code.trim_end();
            if language == Language::Python {
                let class_indent = indentation(lines[class.start_line - 1].raw);
                if indentation(lines[idx].raw) <= class_indent {
                    continue;
                }
            }
            if let Some(caps) = properties.captures(code) {
                if let Some(name) = capture(&caps, "name") {
                    if !NOT_FUNCTION_NAMES.contains(&name.as_str())
                        && !matches!(name.as_str(), "pub" | "fn" | "return" | "const")
                        && !class.properties.contains(&name)
                    {
                        class.properties.push(name);
                    }
                }
            }
        }
    }

    // Rust methods live in `impl` blocks outside the type declaration.
    if let Some(impl_re) = &patterns.impl_blocks {
        for (idx, line) in lines.iter().enumerate() {
            let Some(caps) = impl_re.captures(&line.code) else {
                continue;
            };
            let Some(type_name) = capture(&caps, "name") else {
                continue;
            };
            let end = block_end(lines, idx, language) + 1;
            if let Some(class) = classes.iter_mut().find(|c| c.name == type_name) {
                for function in functions {
                    if function.start_line > idx + 1
                        && function.end_line <= end
                        && !class.methods.contains(&function.name)
                    {
                        class.methods.push(function.name.clone());
                    }
                }
            }
        }
    }
}

fn extract_imports(
    lines: &[SourceLine<'_>],
    language: Language,
    patterns: &LanguagePatterns,
) -> Vec<ImportInfo> {
    let mut imports = Vec::new();
    let mut in_go_block = false;

    for (idx, line) in lines.iter().enumerate() {
        let code = line.code.trim_end();
        if language == Language::Go {
            if code.trim_start().starts_with("import (") {
                in_go_block = true;
                continue;
            }
            if in_go_block && code.trim() == ")" {
                in_go_block = false;
                continue;
            }
        }

        for (pattern_idx, re) in patterns.imports.iter().enumerate() {
            // The second Go pattern only applies inside `import ( ... )`.
            if language == Language::Go && pattern_idx == 1 && !in_go_block {
                continue;
            }
            let Some(caps) = re.captures(code) else {
                continue;
            };
            let Some(source) = capture(&caps, "src") else {
                continue;
            };
            let specifiers = capture(&caps, "spec")
                .map(|spec| import_specifiers(&spec))
                .unwrap_or_else(|| default_specifiers(&source, language));

            if language == Language::Python && caps.name("spec").is_none() {
                // `import a, b` declares several modules.
                for module in source.split(',').map(str::trim).filter(|m| !m.is_empty()) {
                    imports.push(ImportInfo {
                        source: module.to_string(),
                        specifiers: Vec::new(),
                        line: idx + 1,
                    });
                }
            } else {
                imports.push(ImportInfo {
                    source,
                    specifiers,
                    line: idx + 1,
                });
            }
            break;
        }
    }
    imports
}

fn import_specifiers(spec: &str) -> Vec<String> {
    spec.trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
        .split(|c| c == ',' || c == '{' || c == '}')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            // `a as b` binds `b`; `* as ns` binds `ns`.
            s.rsplit(" as ").next().unwrap_or(s).trim().to_string()
        })
        .collect()
}

fn default_specifiers(source: &str, language: Language) -> Vec<String> {
    match language {
        Language::Rust => {
            if let (Some(open), Some(close)) = (source.find('{'), source.rfind('}')) {
                import_specifiers(&source[open + 1..close])
            } else {
                source
                    .rsplit("::")
                    .next()
                    .map(|s| vec![s.rsplit(" as ").next().unwrap_or(s).trim().to_string()])
                    .unwrap_or_default()
            }
        }
        Language::Java => source
            .rsplit('.')
            .next()
            .filter(|s| *s != "*")
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn extract_exports(
    lines: &[SourceLine<'_>],
    language: Language,
    patterns: &LanguagePatterns,
    functions: &[FunctionInfo],
    classes: &[ClassInfo],
) -> Vec<ExportInfo> {
    let mut exports = Vec::new();

    match language {
        Language::Python | Language::Go => {
            // Top-level public declarations are the module's exports.
            let mut candidates: Vec<(&str, usize)> = functions
                .iter()
                .map(|f| (f.name.as_str(), f.start_line))
                .chain(classes.iter().map(|c| (c.name.as_str(), c.start_line)))
                .filter(|(_, line)| {
                    lines
                        .get(line - 1)
                        .map(|l| indentation(l.raw) == 0)
                        .unwrap_or(false)
                })
                .filter(|(name, _)| !language.is_private_name(name))
                .collect();
            if language == Language::Go {
                // Methods have a receiver and are not package-level exports.
                candidates.retain(|(_, line)| {
                    lines
                        .get(line - 1)
                        .map(|l| !l.code.trim_start().starts_with("func ("))
                        .unwrap_or(false)
                });
            }
            candidates.sort_by_key(|(_, line)| *line);
            exports.extend(candidates.into_iter().map(|(name, line)| ExportInfo {
                name: name.to_string(),
                line,
            }));
        }
        _ => {
            for (idx, line) in lines.iter().enumerate() {
                for re in &patterns.exports {
                    let Some(caps) = re.captures(&line.code) else {
                        continue;
                    };
                    if let Some(name) = capture(&caps, "name") {
                        exports.push(ExportInfo { name, line: idx + 1 });
                    } else if let Some(list) = capture(&caps, "list") {
                        exports.extend(import_specifiers(&list).into_iter().map(|name| {
                            ExportInfo {
                                name,
                                line: idx + 1,
                            }
                        }));
                    }
                    break;
                }
            }
        }
    }
    exports
}
