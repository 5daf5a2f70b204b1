//! Structural parser for TypeScript/JavaScript source files.
//!
//! Produces one `file` entity per source file plus one entity per class and
//! function declaration found by tree-sitter traversal, and best-effort
//! relationships: imports, definitions, inheritance, heuristic event-bus
//! usage (`obj.on("x")` / `obj.emit("x")`), and `// @implements <name>`
//! marker comments. This is lightweight pattern extraction, not a
//! reference resolver — unresolved targets (external modules, event names,
//! base classes from other files) are allowed.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tree_sitter::{Language, Node, Parser};

use crate::models::{
    preview, EntityKind, Extraction, ParsedEntity, ParsedRelationship, RelationKind,
    SourceLocation,
};

/// Content preview cap for `file` entities.
const FILE_PREVIEW_CHARS: usize = 1000;

fn implements_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)//\s*@implements\s+([A-Za-z0-9_.-]+)").unwrap())
}

fn language_for(path: &str) -> Option<Language> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "ts" => Some(tree_sitter_typescript::language_typescript()),
        "tsx" => Some(tree_sitter_typescript::language_tsx()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::language()),
        _ => None,
    }
}

pub fn supports(path: &str) -> bool {
    language_for(path).is_some()
}

/// Parse one source file into entities and relationships.
pub fn parse_code_file(path: &str, source: &str) -> Result<Extraction> {
    let language =
        language_for(path).ok_or_else(|| anyhow!("Unsupported code file: {}", path))?;

    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| anyhow!("Failed to set parser language: {}", e))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("tree-sitter failed to parse {}", path))?;

    let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
    let mut file_entity = ParsedEntity::new(EntityKind::File, &file_name, path);
    file_entity.content = Some(preview(source, FILE_PREVIEW_CHARS));
    file_entity.metadata = serde_json::json!({
        "language": if path.ends_with(".ts") || path.ends_with(".tsx") { "typescript" } else { "javascript" },
        "size_bytes": source.len(),
        "line_count": source.lines().count(),
    });
    let file_id = file_entity.id.clone();

    let mut out = Extraction::default();
    out.entities.push(file_entity);

    let mut seen_ids: HashSet<String> = HashSet::new();
    walk(
        tree.root_node(),
        source,
        path,
        &file_id,
        &mut out,
        &mut seen_ids,
    );

    // Marker comments are scanned textually, not through the syntax tree.
    for cap in implements_marker().captures_iter(source) {
        let pattern = &cap[1];
        out.relationships.push(ParsedRelationship::new(
            RelationKind::ImplementsPattern,
            &file_id,
            &format!("pattern:{}", pattern),
        ));
    }

    Ok(out)
}

fn walk(
    node: Node,
    source: &str,
    path: &str,
    file_id: &str,
    out: &mut Extraction,
    seen: &mut HashSet<String>,
) {
    match node.kind() {
        "import_statement" => extract_import(node, source, file_id, out),
        "class_declaration" | "abstract_class_declaration" => {
            extract_class(node, source, path, file_id, out, seen)
        }
        "function_declaration" | "generator_function_declaration" => {
            extract_function(node, source, path, file_id, out, seen)
        }
        "call_expression" => extract_event_call(node, source, file_id, out),
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, path, file_id, out, seen);
    }
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

fn location_of(node: Node) -> SourceLocation {
    SourceLocation {
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    }
}

fn extract_import(node: Node, source: &str, file_id: &str, out: &mut Extraction) {
    let Some(source_node) = node.child_by_field_name("source") else {
        return;
    };
    let specifier = strip_quotes(node_text(source_node, source));
    if specifier.is_empty() {
        return;
    }
    out.relationships.push(
        ParsedRelationship::new(
            RelationKind::Imports,
            file_id,
            &format!("module:{}", specifier),
        )
        .with_properties(serde_json::json!({ "specifier": specifier })),
    );
}

fn extract_class(
    node: Node,
    source: &str,
    path: &str,
    file_id: &str,
    out: &mut Extraction,
    seen: &mut HashSet<String>,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();

    // ECS-style naming convention decides the entity kind.
    let kind = if name.ends_with("System") {
        EntityKind::System
    } else if name.ends_with("Component") {
        EntityKind::Component
    } else {
        EntityKind::Class
    };

    let methods = class_methods(node, source);
    let superclass = superclass_name(node, source);

    let mut entity = ParsedEntity::new(kind, &name, path);
    if seen.contains(&entity.id) {
        return;
    }
    seen.insert(entity.id.clone());

    entity.content = Some(preview(node_text(node, source), FILE_PREVIEW_CHARS));
    entity.metadata = serde_json::json!({
        "methods": methods,
        "extends": superclass,
    });
    entity.location = Some(location_of(node));
    let entity_id = entity.id.clone();
    out.entities.push(entity);

    out.relationships.push(ParsedRelationship::new(
        RelationKind::Defines,
        file_id,
        &entity_id,
    ));

    if let Some(base) = superclass {
        out.relationships.push(ParsedRelationship::new(
            RelationKind::Extends,
            &entity_id,
            &format!("class:{}", base),
        ));
    }
}

fn extract_function(
    node: Node,
    source: &str,
    path: &str,
    file_id: &str,
    out: &mut Extraction,
    seen: &mut HashSet<String>,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();

    let mut entity = ParsedEntity::new(EntityKind::Function, &name, path);
    if seen.contains(&entity.id) {
        return;
    }
    seen.insert(entity.id.clone());

    entity.content = Some(preview(node_text(node, source), FILE_PREVIEW_CHARS));
    entity.metadata = serde_json::json!({
        "parameters": parameter_names(node, source),
    });
    entity.location = Some(location_of(node));
    let entity_id = entity.id.clone();
    out.entities.push(entity);

    out.relationships.push(ParsedRelationship::new(
        RelationKind::Defines,
        file_id,
        &entity_id,
    ));
}

/// `obj.on("name")` → SUBSCRIBES_TO, `obj.emit("name")` → EMITS.
fn extract_event_call(node: Node, source: &str, file_id: &str, out: &mut Extraction) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    if function.kind() != "member_expression" {
        return;
    }
    let Some(property) = function.child_by_field_name("property") else {
        return;
    };
    let kind = match node_text(property, source) {
        "on" | "once" => RelationKind::SubscribesTo,
        "emit" => RelationKind::Emits,
        _ => return,
    };

    let Some(args) = node.child_by_field_name("arguments") else {
        return;
    };
    let mut cursor = args.walk();
    let event = args
        .named_children(&mut cursor)
        .find(|c| c.kind() == "string")
        .map(|c| strip_quotes(node_text(c, source)).to_string());
    let Some(event) = event else {
        return;
    };
    if event.is_empty() {
        return;
    }

    out.relationships.push(ParsedRelationship::new(
        kind,
        file_id,
        &format!("event:{}", event),
    ));
}

fn parameter_names(func_node: Node, source: &str) -> Vec<String> {
    let mut params = Vec::new();
    if let Some(parameters) = func_node.child_by_field_name("parameters") {
        let mut cursor = parameters.walk();
        for param in parameters.named_children(&mut cursor) {
            let text = node_text(param, source);
            // Drop type annotations and defaults, keep the binding pattern.
            let name = text.split([':', '=']).next().unwrap_or(text).trim();
            if !name.is_empty() {
                params.push(name.to_string());
            }
        }
    }
    params
}

fn class_methods(class_node: Node, source: &str) -> Vec<String> {
    let mut methods = Vec::new();
    if let Some(body) = class_node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if member.kind() == "method_definition" {
                if let Some(name) = member.child_by_field_name("name") {
                    methods.push(node_text(name, source).to_string());
                }
            }
        }
    }
    methods
}

/// First identifier inside the `class_heritage` clause, if any. Works for
/// both the TS grammar (extends_clause) and the JS grammar (bare expression).
fn superclass_name<'a>(class_node: Node, source: &'a str) -> Option<&'a str> {
    let mut cursor = class_node.walk();
    let heritage = class_node
        .children(&mut cursor)
        .find(|c| c.kind() == "class_heritage")?;
    first_identifier(heritage, source)
}

fn first_identifier<'a>(node: Node, source: &'a str) -> Option<&'a str> {
    if node.kind() == "identifier" || node.kind() == "type_identifier" {
        return Some(node_text(node, source));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_identifier(child, source) {
            return Some(found);
        }
    }
    None
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}
