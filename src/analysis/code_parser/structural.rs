//! Syntax-tree parser backed by tree-sitter.
//!
//! Every supported language gets a [`NodeTable`] naming the grammar node kinds
//! that count as functions, classes, imports, comments and branches. The tree
//! is walked once; class members and Rust/Go receiver methods are attached in
//! a second pass.

use tree_sitter::{Node, Parser, Tree};
use tracing::debug;

use super::{ParseError, ParsingStrategy};
use crate::analysis::language::Language;
use crate::analysis::parsed::{
    count_lines, ClassInfo, CommentInfo, ExportInfo, FunctionInfo, ImportInfo, ParsedCode,
};

/// Grammar node kinds per category for one language.
struct NodeTable {
    functions: &'static [&'static str],
    classes: &'static [&'static str],
    imports: &'static [&'static str],
    comments: &'static [&'static str],
    branches: &'static [&'static str],
}

const JAVASCRIPT: NodeTable = NodeTable {
    functions: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
        "variable_declarator",
    ],
    classes: &["class_declaration"],
    imports: &["import_statement", "call_expression"],
    comments: &["comment"],
    branches: &[
        "if_statement",
        "for_statement",
        "for_in_statement",
        "while_statement",
        "do_statement",
        "switch_statement",
        "switch_case",
        "catch_clause",
        "ternary_expression",
    ],
};

const TYPESCRIPT: NodeTable = NodeTable {
    functions: JAVASCRIPT.functions,
    classes: &[
        "class_declaration",
        "abstract_class_declaration",
        "interface_declaration",
    ],
    imports: JAVASCRIPT.imports,
    comments: JAVASCRIPT.comments,
    branches: JAVASCRIPT.branches,
};

const PYTHON: NodeTable = NodeTable {
    functions: &["function_definition"],
    classes: &["class_definition"],
    imports: &["import_statement", "import_from_statement"],
    comments: &["comment"],
    branches: &[
        "if_statement",
        "elif_clause",
        "for_statement",
        "while_statement",
        "except_clause",
        "conditional_expression",
        "case_clause",
        "for_in_clause",
        "if_clause",
    ],
};

const RUST: NodeTable = NodeTable {
    functions: &["function_item", "function_signature_item"],
    classes: &["struct_item", "enum_item", "trait_item", "union_item"],
    imports: &["use_declaration"],
    comments: &["line_comment", "block_comment"],
    branches: &[
        "if_expression",
        "while_expression",
        "for_expression",
        "loop_expression",
        "match_expression",
        "match_arm",
    ],
};

const GO: NodeTable = NodeTable {
    functions: &["function_declaration", "method_declaration"],
    classes: &["type_spec"],
    imports: &["import_spec"],
    comments: &["comment"],
    branches: &[
        "if_statement",
        "for_statement",
        "expression_switch_statement",
        "type_switch_statement",
        "select_statement",
        "expression_case",
        "type_case",
        "communication_case",
    ],
};

const RUST_EXPORTABLE: &[&str] = &[
    "function_item",
    "struct_item",
    "enum_item",
    "trait_item",
    "mod_item",
    "const_item",
    "static_item",
    "type_item",
    "union_item",
];

/// Wrappers whose leading comment documents the wrapped declaration.
const DECLARATION_WRAPPERS: &[&str] = &[
    "export_statement",
    "lexical_declaration",
    "variable_declaration",
    "decorated_definition",
];

fn node_table(language: Language) -> Option<&'static NodeTable> {
    match language {
        Language::JavaScript => Some(&JAVASCRIPT),
        Language::TypeScript => Some(&TYPESCRIPT),
        Language::Python => Some(&PYTHON),
        Language::Rust => Some(&RUST),
        Language::Go => Some(&GO),
        Language::Java => None,
    }
}

fn grammar(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::Java => None,
    }
}

/// tree-sitter backed parsing strategy.
///
/// A fresh `tree_sitter::Parser` is built per call since parsers are not `Sync`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralParser;

impl StructuralParser {
    pub fn new() -> Self {
        Self
    }

    fn build_tree(&self, content: &str, language: Language) -> Result<Tree, ParseError> {
        let grammar = grammar(language).ok_or(ParseError::UnsupportedLanguage(language))?;
        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| ParseError::TreeUnavailable(e.to_string()))?;
        parser
            .parse(content, None)
            .ok_or_else(|| ParseError::TreeUnavailable("parser produced no tree".to_string()))
    }
}

impl ParsingStrategy for StructuralParser {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn supports(&self, language: Language) -> bool {
        node_table(language).is_some()
    }

    fn parse(&self, content: &str, language: Language) -> Result<ParsedCode, ParseError> {
        let table = node_table(language).ok_or(ParseError::UnsupportedLanguage(language))?;
        let tree = self.build_tree(content, language)?;
        let root = tree.root_node();
        if root.has_error() {
            debug!(language = %language, "Syntax tree contains error nodes");
        }

        let mut extractor = Extractor::new(content, language, table);
        extractor.walk(root);
        extractor.collect_top_level_exports(root);
        Ok(extractor.finish(content))
    }
}

/// Accumulates extraction results during a walk.
struct Extractor<'a> {
    src: &'a [u8],
    language: Language,
    table: &'static NodeTable,
    functions: Vec<FunctionInfo>,
    classes: Vec<ClassInfo>,
    imports: Vec<ImportInfo>,
    exports: Vec<ExportInfo>,
    comments: Vec<CommentInfo>,
    branches: u32,
    /// (type name, method name) pairs from `impl` blocks and Go receivers.
    receiver_methods: Vec<(String, String)>,
}

impl<'a> Extractor<'a> {
    fn new(content: &'a str, language: Language, table: &'static NodeTable) -> Self {
        Self {
            src: content.as_bytes(),
            language,
            table,
            functions: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            comments: Vec::new(),
            branches: 0,
            receiver_methods: Vec::new(),
        }
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.src).unwrap_or("")
    }

    /// Depth-first walk with an explicit stack.
    fn walk(&mut self, root: Node<'_>) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            self.visit(node);
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        let kind = node.kind();
        let table = self.table;

        if table.branches.contains(&kind) {
            self.branches += 1;
        }
        if table.comments.contains(&kind) {
            self.comments.push(CommentInfo {
                text: self.text(node).trim_end().to_string(),
                start_line: node.start_position().row + 1,
                end_line: last_line(node),
            });
        }
        if table.functions.contains(&kind) {
            if let Some(function) = self.function(node) {
                self.functions.push(function);
            }
        }
        if table.classes.contains(&kind) {
            if let Some(class) = self.class(node) {
                self.classes.push(class);
            }
        }
        if table.imports.contains(&kind) {
            self.import(node);
        }

        match (self.language, kind) {
            (Language::JavaScript | Language::TypeScript, "export_statement") => self.js_export(node),
            (Language::Rust, "impl_item") => self.rust_impl(node),
            (Language::Rust, _) if RUST_EXPORTABLE.contains(&kind) => self.rust_export(node),
            (Language::Go, "method_declaration") => self.go_receiver(node),
            _ => {}
        }
    }

    fn function(&self, node: Node<'_>) -> Option<FunctionInfo> {
        // JS/TS: only declarators bound to a function value count.
        let (name_node, callable) = if node.kind() == "variable_declarator" {
            let value = node.child_by_field_name("value")?;
            if !matches!(
                value.kind(),
                "arrow_function" | "function_expression" | "function" | "generator_function"
            ) {
                return None;
            }
            (node.child_by_field_name("name")?, value)
        } else {
            (node.child_by_field_name("name")?, node)
        };

        let parameters = match callable.child_by_field_name("parameters") {
            Some(params) => self.parameters(params),
            None => callable
                .child_by_field_name("parameter")
                .map(|p| vec![self.text(p).to_string()])
                .unwrap_or_default(),
        };

        let return_type = callable
            .child_by_field_name("return_type")
            .or_else(|| callable.child_by_field_name("result"))
            .map(|n| self.text(n).trim_start_matches(':').trim().to_string())
            .filter(|t| !t.is_empty());

        Some(FunctionInfo {
            name: self.text(name_node).to_string(),
            start_line: node.start_position().row + 1,
            end_line: last_line(node),
            parameters,
            complexity: 1 + self.count_branches(node),
            docstring: self.docstring(node),
            return_type,
        })
    }

    fn parameters(&self, params: Node<'_>) -> Vec<String> {
        let mut cursor = params.walk();
        let mut names = Vec::new();
        for param in params.named_children(&mut cursor) {
            if self.table.comments.contains(&param.kind()) {
                continue;
            }
            // Go declares several names per type: `a, b int`.
            let mut field_cursor = param.walk();
            let declared: Vec<&str> = param
                .children_by_field_name("name", &mut field_cursor)
                .map(|n| self.text(n))
                .collect();
            if !declared.is_empty() {
                names.extend(declared.into_iter().map(str::to_string));
                continue;
            }
            let name = param
                .child_by_field_name("pattern")
                .or_else(|| param.child_by_field_name("left"))
                .or_else(|| match param.kind() {
                    "typed_parameter" => param.named_child(0),
                    _ => None,
                })
                .map(|n| self.text(n))
                .unwrap_or_else(|| self.text(param));
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
        names
    }

    fn count_branches(&self, node: Node<'_>) -> u32 {
        let mut count = 0;
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if self.table.branches.contains(&current.kind()) {
                count += 1;
            }
            let mut cursor = current.walk();
            stack.extend(current.children(&mut cursor));
        }
        count
    }

    fn docstring(&self, node: Node<'_>) -> Option<String> {
        if self.language == Language::Python {
            let first = node.child_by_field_name("body")?.named_child(0)?;
            if first.kind() != "expression_statement" {
                return None;
            }
            let string = first.named_child(0).filter(|n| n.kind() == "string")?;
            let text = self
                .text(string)
                .trim_matches(|c: char| c == '"' || c == '\'')
                .trim()
                .to_string();
            return Some(text);
        }

        let mut anchor = node;
        while let Some(parent) = anchor.parent() {
            if DECLARATION_WRAPPERS.contains(&parent.kind()) {
                anchor = parent;
            } else {
                break;
            }
        }
        let comment = anchor.prev_named_sibling()?;
        if !self.table.comments.contains(&comment.kind()) {
            return None;
        }
        if last_line(comment) + 1 != anchor.start_position().row + 1 {
            return None;
        }
        Some(self.text(comment).trim_end().to_string())
    }

    fn class(&self, node: Node<'_>) -> Option<ClassInfo> {
        let name = self.text(node.child_by_field_name("name")?).to_string();
        let mut class = ClassInfo {
            name,
            start_line: node.start_position().row + 1,
            end_line: last_line(node),
            methods: Vec::new(),
            properties: Vec::new(),
            superclass: self.superclass(node),
        };

        match self.language {
            Language::Go => {
                // type_spec: only struct and interface types are class-like.
                let ty = node.child_by_field_name("type")?;
                match ty.kind() {
                    "struct_type" => {
                        let mut cursor = ty.walk();
                        let fields = ty
                            .named_children(&mut cursor)
                            .find(|n| n.kind() == "field_declaration_list");
                        if let Some(fields) = fields {
                            self.collect_members(fields, &mut class);
                        }
                    }
                    "interface_type" => self.collect_members(ty, &mut class),
                    _ => return None,
                }
            }
            _ => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.collect_members(body, &mut class);
                }
            }
        }
        Some(class)
    }

    fn superclass(&self, node: Node<'_>) -> Option<String> {
        match self.language {
            Language::Python => {
                let bases = node.child_by_field_name("superclasses")?;
                bases.named_child(0).map(|b| self.text(b).to_string())
            }
            Language::JavaScript | Language::TypeScript => {
                let mut cursor = node.walk();
                let heritage = node.children(&mut cursor).find(|n| {
                    matches!(n.kind(), "class_heritage" | "extends_type_clause")
                })?;
                self.first_type_name(heritage)
            }
            _ => None,
        }
    }

    fn first_type_name(&self, node: Node<'_>) -> Option<String> {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if matches!(
                current.kind(),
                "identifier" | "type_identifier" | "member_expression" | "nested_type_identifier"
            ) {
                return Some(self.text(current).to_string());
            }
            let mut cursor = current.walk();
            let children: Vec<Node<'_>> = current.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        None
    }

    fn collect_members(&self, body: Node<'_>, class: &mut ClassInfo) {
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            let member = match member.kind() {
                "decorated_definition" => match member.child_by_field_name("definition") {
                    Some(definition) => definition,
                    None => continue,
                },
                _ => member,
            };
            match member.kind() {
                "method_definition"
                | "method_signature"
                | "abstract_method_signature"
                | "function_definition"
                | "function_item"
                | "function_signature_item"
                | "method_elem"
                | "method_spec" => {
                    if let Some(name) = member.child_by_field_name("name") {
                        class.methods.push(self.text(name).to_string());
                    }
                }
                "field_definition" | "public_field_definition" | "property_signature" => {
                    if let Some(name) = member
                        .child_by_field_name("property")
                        .or_else(|| member.child_by_field_name("name"))
                    {
                        class.properties.push(self.text(name).to_string());
                    }
                }
                "field_declaration" => {
                    let mut field_cursor = member.walk();
                    let names: Vec<String> = member
                        .children_by_field_name("name", &mut field_cursor)
                        .map(|n| self.text(n).to_string())
                        .collect();
                    class.properties.extend(names);
                }
                "expression_statement" => {
                    // Python class attributes: `kind = "git"`.
                    let assignment = member.named_child(0).filter(|n| n.kind() == "assignment");
                    if let Some(left) = assignment.and_then(|a| a.child_by_field_name("left")) {
                        if left.kind() == "identifier" {
                            class.properties.push(self.text(left).to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn import(&mut self, node: Node<'_>) {
        let line = node.start_position().row + 1;
        match (self.language, node.kind()) {
            (Language::JavaScript | Language::TypeScript, "import_statement") => {
                let Some(source) = node.child_by_field_name("source") else {
                    return;
                };
                let mut specifiers = Vec::new();
                let mut cursor = node.walk();
                let clause = node
                    .named_children(&mut cursor)
                    .find(|n| n.kind() == "import_clause");
                if let Some(clause) = clause {
                    self.js_import_clause(clause, &mut specifiers);
                }
                self.imports.push(ImportInfo {
                    source: unquote(self.text(source)),
                    specifiers,
                    line,
                });
            }
            (Language::JavaScript | Language::TypeScript, "call_expression") => {
                let is_require = node
                    .child_by_field_name("function")
                    .map(|f| self.text(f) == "require")
                    .unwrap_or(false);
                let argument = node
                    .child_by_field_name("arguments")
                    .and_then(|args| args.named_child(0))
                    .filter(|arg| arg.kind() == "string");
                if let (true, Some(argument)) = (is_require, argument) {
                    self.imports.push(ImportInfo {
                        source: unquote(self.text(argument)),
                        specifiers: Vec::new(),
                        line,
                    });
                }
            }
            (Language::Python, "import_statement") => {
                let mut cursor = node.walk();
                let modules: Vec<String> = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| match n.kind() {
                        "aliased_import" => n
                            .child_by_field_name("name")
                            .map(|m| self.text(m))
                            .unwrap_or_default(),
                        _ => self.text(n),
                    })
                    .map(str::to_string)
                    .collect();
                self.imports.extend(modules.into_iter().map(|source| ImportInfo {
                    source,
                    specifiers: Vec::new(),
                    line,
                }));
            }
            (Language::Python, "import_from_statement") => {
                let Some(module) = node.child_by_field_name("module_name") else {
                    return;
                };
                let mut cursor = node.walk();
                let specifiers = node
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| match n.kind() {
                        "aliased_import" => n
                            .child_by_field_name("alias")
                            .map(|a| self.text(a))
                            .unwrap_or_default(),
                        _ => self.text(n),
                    })
                    .map(str::to_string)
                    .collect();
                self.imports.push(ImportInfo {
                    source: self.text(module).to_string(),
                    specifiers,
                    line,
                });
            }
            (Language::Rust, "use_declaration") => {
                let Some(argument) = node.child_by_field_name("argument") else {
                    return;
                };
                let mut specifiers = Vec::new();
                self.rust_use_names(argument, &mut specifiers);
                self.imports.push(ImportInfo {
                    source: self.text(argument).to_string(),
                    specifiers,
                    line,
                });
            }
            (Language::Go, "import_spec") => {
                let Some(path) = node.child_by_field_name("path") else {
                    return;
                };
                self.imports.push(ImportInfo {
                    source: unquote(self.text(path)),
                    specifiers: Vec::new(),
                    line,
                });
            }
            _ => {}
        }
    }

    fn js_import_clause(&self, clause: Node<'_>, specifiers: &mut Vec<String>) {
        let mut cursor = clause.walk();
        for part in clause.named_children(&mut cursor) {
            match part.kind() {
                "identifier" => specifiers.push(self.text(part).to_string()),
                "namespace_import" => {
                    if let Some(ident) = part.named_child(0) {
                        specifiers.push(self.text(ident).to_string());
                    }
                }
                "named_imports" => {
                    let mut inner = part.walk();
                    for spec in part.named_children(&mut inner) {
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        if let Some(bound) = spec
                            .child_by_field_name("alias")
                            .or_else(|| spec.child_by_field_name("name"))
                        {
                            specifiers.push(self.text(bound).to_string());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn rust_use_names(&self, node: Node<'_>, names: &mut Vec<String>) {
        match node.kind() {
            "identifier" | "type_identifier" => names.push(self.text(node).to_string()),
            "use_as_clause" => {
                if let Some(alias) = node.child_by_field_name("alias") {
                    names.push(self.text(alias).to_string());
                }
            }
            "scoped_identifier" => {
                if let Some(name) = node.child_by_field_name("name") {
                    names.push(self.text(name).to_string());
                }
            }
            "scoped_use_list" => {
                if let Some(list) = node.child_by_field_name("list") {
                    self.rust_use_names(list, names);
                }
            }
            "use_list" => {
                let mut cursor = node.walk();
                for item in node.named_children(&mut cursor) {
                    self.rust_use_names(item, names);
                }
            }
            _ => {}
        }
    }

    fn js_export(&mut self, node: Node<'_>) {
        let line = node.start_position().row + 1;
        if let Some(declaration) = node.child_by_field_name("declaration") {
            match declaration.kind() {
                "lexical_declaration" | "variable_declaration" => {
                    let mut cursor = declaration.walk();
                    let names: Vec<String> = declaration
                        .named_children(&mut cursor)
                        .filter(|n| n.kind() == "variable_declarator")
                        .filter_map(|n| n.child_by_field_name("name"))
                        .map(|n| self.text(n).to_string())
                        .collect();
                    self.exports
                        .extend(names.into_iter().map(|name| ExportInfo { name, line }));
                }
                _ => {
                    if let Some(name) = declaration.child_by_field_name("name") {
                        self.exports.push(ExportInfo {
                            name: self.text(name).to_string(),
                            line,
                        });
                    }
                }
            }
            return;
        }

        let mut cursor = node.walk();
        let clause = node
            .named_children(&mut cursor)
            .find(|n| n.kind() == "export_clause");
        if let Some(clause) = clause {
            let mut inner = clause.walk();
            let names: Vec<String> = clause
                .named_children(&mut inner)
                .filter(|n| n.kind() == "export_specifier")
                .filter_map(|n| {
                    n.child_by_field_name("alias")
                        .or_else(|| n.child_by_field_name("name"))
                })
                .map(|n| self.text(n).to_string())
                .collect();
            self.exports
                .extend(names.into_iter().map(|name| ExportInfo { name, line }));
        } else if let Some(value) = node
            .child_by_field_name("value")
            .filter(|v| v.kind() == "identifier")
        {
            self.exports.push(ExportInfo {
                name: self.text(value).to_string(),
                line,
            });
        }
    }

    fn rust_export(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let is_pub = node
            .children(&mut cursor)
            .any(|c| c.kind() == "visibility_modifier" && self.text(c) == "pub");
        if !is_pub {
            return;
        }
        if let Some(name) = node.child_by_field_name("name") {
            self.exports.push(ExportInfo {
                name: self.text(name).to_string(),
                line: node.start_position().row + 1,
            });
        }
    }

    fn rust_impl(&mut self, node: Node<'_>) {
        let Some(ty) = node.child_by_field_name("type") else {
            return;
        };
        let ty = match ty.kind() {
            "generic_type" => ty.child_by_field_name("type").unwrap_or(ty),
            _ => ty,
        };
        let type_name = self.text(ty).to_string();
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        let methods: Vec<String> = body
            .named_children(&mut cursor)
            .filter(|n| n.kind() == "function_item")
            .filter_map(|n| n.child_by_field_name("name"))
            .map(|n| self.text(n).to_string())
            .collect();
        self.receiver_methods
            .extend(methods.into_iter().map(|m| (type_name.clone(), m)));
    }

    fn go_receiver(&mut self, node: Node<'_>) {
        let Some(receiver) = node.child_by_field_name("receiver") else {
            return;
        };
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let type_name = receiver
            .named_child(0)
            .and_then(|decl| decl.child_by_field_name("type"))
            .map(|t| {
                self.text(t)
                    .trim_start_matches('*')
                    .split('[')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });
        if let Some(type_name) = type_name {
            self.receiver_methods
                .push((type_name, self.text(name).to_string()));
        }
    }

    /// Python and Go export their public top-level declarations.
    fn collect_top_level_exports(&mut self, root: Node<'_>) {
        if !matches!(self.language, Language::Python | Language::Go) {
            return;
        }
        let mut cursor = root.walk();
        let top_level: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
        for node in top_level {
            let line = node.start_position().row + 1;
            let mut declared = Vec::new();
            match node.kind() {
                "function_definition" | "class_definition" | "function_declaration" => {
                    declared.extend(node.child_by_field_name("name"));
                }
                "decorated_definition" => {
                    declared.extend(
                        node.child_by_field_name("definition")
                            .and_then(|d| d.child_by_field_name("name")),
                    );
                }
                "type_declaration" => {
                    let mut inner = node.walk();
                    declared.extend(
                        node.named_children(&mut inner)
                            .filter(|n| n.kind() == "type_spec")
                            .filter_map(|n| n.child_by_field_name("name")),
                    );
                }
                _ => {}
            }
            for name in declared {
                let name = self.text(name);
                if !self.language.is_private_name(name) {
                    self.exports.push(ExportInfo {
                        name: name.to_string(),
                        line,
                    });
                }
            }
        }
    }

    fn finish(mut self, content: &str) -> ParsedCode {
        for (type_name, method) in std::mem::take(&mut self.receiver_methods) {
            if let Some(class) = self.classes.iter_mut().find(|c| c.name == type_name) {
                if !class.methods.contains(&method) {
                    class.methods.push(method);
                }
            }
        }

        ParsedCode {
            language: self.language,
            functions: self.functions,
            classes: self.classes,
            imports: self.imports,
            exports: self.exports,
            comments: self.comments,
            complexity: 1 + self.branches,
            lines_of_code: count_lines(content),
        }
    }
}

/// 1-based last line, excluding a trailing newline the node may own.
fn last_line(node: Node<'_>) -> usize {
    let start = node.start_position();
    let end = node.end_position();
    if end.column == 0 && end.row > start.row {
        end.row
    } else {
        end.row + 1
    }
}

fn unquote(text: &str) -> String {
    text.trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str, language: Language) -> ParsedCode {
        StructuralParser::new()
            .parse(content, language)
            .expect("structural parse")
    }

    #[test]
    fn test_java_is_unsupported() {
        let parser = StructuralParser::new();
        assert!(!parser.supports(Language::Java));
        assert!(matches!(
            parser.parse("class A {}", Language::Java),
            Err(ParseError::UnsupportedLanguage(Language::Java))
        ));
    }

    #[test]
    fn test_javascript_extraction() {
        let source = r#"import fs, { readFile as rf } from 'fs';
const path = require('path');

// Loads a config file.
export function loadConfig(file, fallback = {}) {
  if (!file) {
    return fallback;
  }
  return rf(file) ? 1 : 0;
}

export const double = (x) => x * 2;

class Store extends Base {
  items = {};

  lookup(key) {
    return this.items[key];
  }
}
"#;
        let parsed = parse(source, Language::JavaScript);

        let names: Vec<_> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["loadConfig", "double", "lookup"]);

        let load = parsed.function("loadConfig").expect("loadConfig");
        assert_eq!(load.parameters, vec!["file".to_string(), "fallback".to_string()]);
        assert_eq!(load.complexity, 3);
        assert_eq!(load.start_line, 5);
        assert_eq!(load.end_line, 10);
        assert_eq!(load.docstring.as_deref(), Some("// Loads a config file."));

        let store = parsed.class("Store").expect("Store");
        assert_eq!(store.superclass.as_deref(), Some("Base"));
        assert_eq!(store.methods, vec!["lookup".to_string()]);
        assert_eq!(store.properties, vec!["items".to_string()]);

        let sources: Vec<_> = parsed.imports.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["fs", "path"]);
        assert_eq!(
            parsed.imports[0].specifiers,
            vec!["fs".to_string(), "rf".to_string()]
        );

        let exports: Vec<_> = parsed.exports.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exports, vec!["loadConfig", "double"]);
        assert_eq!(parsed.complexity, 3);
    }

    #[test]
    fn test_python_extraction() {
        let source = r#"from typing import List as L
import os

class Repo(Base):
    kind = "git"

    def fetch(self, ref: str = None) -> str:
        """Fetch a ref."""
        if ref:
            return ref
        return ""

def _hidden():
    pass
"#;
        let parsed = parse(source, Language::Python);
        let fetch = parsed.function("fetch").expect("fetch");
        assert_eq!(fetch.parameters, vec!["self".to_string(), "ref".to_string()]);
        assert_eq!(fetch.return_type.as_deref(), Some("str"));
        assert_eq!(fetch.docstring.as_deref(), Some("Fetch a ref."));
        assert_eq!(fetch.complexity, 2);

        let repo = parsed.class("Repo").expect("Repo");
        assert_eq!(repo.superclass.as_deref(), Some("Base"));
        assert_eq!(repo.methods, vec!["fetch".to_string()]);
        assert_eq!(repo.properties, vec!["kind".to_string()]);

        assert_eq!(parsed.imports[0].source, "typing");
        assert_eq!(parsed.imports[0].specifiers, vec!["L".to_string()]);
        assert_eq!(parsed.imports[1].source, "os");

        let exports: Vec<_> = parsed.exports.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exports, vec!["Repo"]);
    }

    #[test]
    fn test_rust_impl_methods_attach_to_type() {
        let source = r#"use std::collections::{HashMap, HashSet as Set};

pub struct Cache {
    entries: HashMap<String, u32>,
}

impl Cache {
    pub fn get(&self, key: &str) -> Option<u32> {
        match self.entries.get(key) {
            Some(v) => Some(*v),
            None => None,
        }
    }
}
"#;
        let parsed = parse(source, Language::Rust);
        let cache = parsed.class("Cache").expect("Cache");
        assert_eq!(cache.properties, vec!["entries".to_string()]);
        assert_eq!(cache.methods, vec!["get".to_string()]);

        let get = parsed.function("get").expect("get");
        assert_eq!(get.parameters, vec!["&self".to_string(), "key".to_string()]);
        assert_eq!(get.return_type.as_deref(), Some("Option<u32>"));
        assert_eq!(get.complexity, 4);

        assert_eq!(
            parsed.imports[0].specifiers,
            vec!["HashMap".to_string(), "Set".to_string()]
        );
        let exports: Vec<_> = parsed.exports.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exports, vec!["Cache", "get"]);
    }

    #[test]
    fn test_go_extraction() {
        let source = r#"package store

import (
	"context"
)

type Store struct {
	db, cache string
}

func (s *Store) Get(ctx context.Context, a, b string) error {
	if a == b {
		return nil
	}
	return nil
}

func helper() {}
"#;
        let parsed = parse(source, Language::Go);
        assert_eq!(parsed.imports[0].source, "context");

        let store = parsed.class("Store").expect("Store");
        assert_eq!(store.properties, vec!["db".to_string(), "cache".to_string()]);
        assert_eq!(store.methods, vec!["Get".to_string()]);

        let get = parsed.function("Get").expect("Get");
        assert_eq!(
            get.parameters,
            vec!["ctx".to_string(), "a".to_string(), "b".to_string()]
        );
        assert_eq!(get.return_type.as_deref(), Some("error"));
        assert_eq!(get.complexity, 2);

        let exports: Vec<_> = parsed.exports.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exports, vec!["Store"]);
    }

    #[test]
    fn test_typescript_parameters_and_interfaces() {
        let source = r#"interface Shape extends Base {
  area(): number;
}

class Circle {
  constructor(private readonly radius: number, label?: string) {}
}
"#;
        let parsed = parse(source, Language::TypeScript);
        let shape = parsed.class("Shape").expect("Shape");
        assert_eq!(shape.methods, vec!["area".to_string()]);
        let ctor = parsed.function("constructor").expect("constructor");
        assert_eq!(
            ctor.parameters,
            vec!["radius".to_string(), "label".to_string()]
        );
    }

    #[test]
    fn test_broken_source_still_parses() {
        let parsed = parse("def broken(:\n    pass\n", Language::Python);
        assert!(parsed.complexity >= 1);
    }
}
