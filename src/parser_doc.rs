//! Markdown document parser.
//!
//! Produces one `document` entity per file (front-matter title, word count,
//! capped body preview) plus best-effort edges: `DOCUMENTS` from inline
//! code spans that reference source files, `LINKS_TO` from markdown links
//! to other documents, and `RELATES_TO`/`DOCUMENTS` from explicit
//! front-matter relationship lists.

use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::models::{
    preview, EntityKind, Extraction, ParsedEntity, ParsedRelationship, RelationKind,
};

/// Content preview cap for `document` entities.
const DOC_PREVIEW_CHARS: usize = 2000;

/// Extensions an inline code span must carry to count as a source reference.
const CODE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

fn code_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`\n]+)`").unwrap())
}

fn markdown_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").unwrap())
}

/// Front-matter fields this parser understands. Unknown fields are ignored.
#[derive(Debug, Default, serde::Deserialize)]
struct FrontMatter {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    relates_to: Vec<String>,
    #[serde(default)]
    documents: Vec<String>,
}

pub fn supports(path: &str) -> bool {
    path.ends_with(".md") || path.ends_with(".markdown")
}

pub fn parse_document_file(path: &str, source: &str) -> Result<Extraction> {
    let (front_matter, body) = split_front_matter(source);
    // Malformed front-matter degrades to "no front-matter"; the document
    // entity is still produced.
    let front: FrontMatter = front_matter
        .and_then(|fm| serde_yaml::from_str(fm).ok())
        .unwrap_or_default();

    let file_name = path.rsplit('/').next().unwrap_or(path);
    let title = front
        .title
        .clone()
        .unwrap_or_else(|| file_name.to_string());

    let mut entity = ParsedEntity::new(EntityKind::Document, &title, path);
    entity.content = Some(preview(body, DOC_PREVIEW_CHARS));
    entity.metadata = serde_json::json!({
        "word_count": body.split_whitespace().count(),
        "has_front_matter": front_matter_present(source),
    });
    let doc_id = entity.id.clone();

    let mut out = Extraction::default();
    out.entities.push(entity);

    let mut seen_edges: HashSet<String> = HashSet::new();
    let mut push_edge = |out: &mut Extraction, rel: ParsedRelationship| {
        if seen_edges.insert(rel.id.clone()) {
            out.relationships.push(rel);
        }
    };

    // Inline code spans that look like source-file paths.
    for cap in code_span().captures_iter(body) {
        let span = cap[1].trim();
        if is_source_reference(span) {
            push_edge(
                &mut out,
                ParsedRelationship::new(
                    RelationKind::Documents,
                    &doc_id,
                    &format!("file:{}", span),
                ),
            );
        }
    }

    // Markdown links to other documents.
    for cap in markdown_link().captures_iter(body) {
        let target = cap[2].trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            continue;
        }
        let target = target.split('#').next().unwrap_or(target);
        if target.ends_with(".md") || target.ends_with(".markdown") {
            let normalized = normalize_relative(path, target);
            push_edge(
                &mut out,
                ParsedRelationship::new(
                    RelationKind::LinksTo,
                    &doc_id,
                    &format!("document:{}", normalized),
                ),
            );
        }
    }

    // Explicit front-matter relationship lists.
    for target in &front.relates_to {
        push_edge(
            &mut out,
            ParsedRelationship::new(RelationKind::RelatesTo, &doc_id, target),
        );
    }
    for target in &front.documents {
        push_edge(
            &mut out,
            ParsedRelationship::new(
                RelationKind::Documents,
                &doc_id,
                &format!("file:{}", target),
            ),
        );
    }

    Ok(out)
}

fn front_matter_present(source: &str) -> bool {
    source.starts_with("---\n") || source.starts_with("---\r\n")
}

/// Split `---` fenced YAML front-matter from the body. Returns the raw
/// front-matter text (if present) and the remaining body.
fn split_front_matter(source: &str) -> (Option<&str>, &str) {
    if !front_matter_present(source) {
        return (None, source);
    }
    let after_open = &source[4..];
    for terminator in ["\n---\n", "\n---\r\n"] {
        if let Some(end) = after_open.find(terminator) {
            let body = &after_open[end + terminator.len()..];
            return (Some(&after_open[..end]), body);
        }
    }
    // Unterminated fence: treat the whole thing as body.
    (None, source)
}

fn is_source_reference(span: &str) -> bool {
    let Some(ext) = span.rsplit('.').next() else {
        return false;
    };
    span.len() > ext.len() + 1 && !span.contains(' ') && CODE_EXTENSIONS.contains(&ext)
}

/// Resolve a relative markdown link against the linking document's
/// directory, collapsing `.` and `..` components.
fn normalize_relative(from: &str, target: &str) -> String {
    let mut parts: Vec<&str> = from.split('/').collect();
    parts.pop(); // drop the file name

    for comp in target.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MD: &str = r#"---
title: Physics Overview
relates_to:
  - "system:src/physics.ts:PhysicsSystem"
documents:
  - "src/physics.ts"
---
# Physics

The `src/physics.ts` module drives the simulation. See also
[the events doc](./events.md) and [external](https://example.com/doc.md).

Inline mention of `PhysicsSystem` (not a path) should not produce an edge.
"#;

    #[test]
    fn document_entity_with_front_matter_title() {
        let out = parse_document_file("docs/physics.md", SAMPLE_MD).unwrap();
        let doc = &out.entities[0];
        assert_eq!(doc.kind, EntityKind::Document);
        assert_eq!(doc.name, "Physics Overview");
        assert_eq!(doc.id, "document:docs/physics.md");
        assert!(doc.metadata["word_count"].as_u64().unwrap() > 0);
        assert_eq!(doc.metadata["has_front_matter"], true);
    }

    #[test]
    fn code_span_produces_documents_edge() {
        let out = parse_document_file("docs/physics.md", SAMPLE_MD).unwrap();
        let docs_edges: Vec<_> = out
            .relationships
            .iter()
            .filter(|r| r.kind == RelationKind::Documents)
            .collect();
        // One from the inline span, one from front-matter — same target,
        // same derived id, so they collapse to one edge.
        assert_eq!(docs_edges.len(), 1);
        assert_eq!(docs_edges[0].target, "file:src/physics.ts");
    }

    #[test]
    fn markdown_link_produces_links_to_edge() {
        let out = parse_document_file("docs/physics.md", SAMPLE_MD).unwrap();
        let link = out
            .relationships
            .iter()
            .find(|r| r.kind == RelationKind::LinksTo)
            .unwrap();
        assert_eq!(link.target, "document:docs/events.md");
        // External http links are ignored.
        assert_eq!(
            out.relationships
                .iter()
                .filter(|r| r.kind == RelationKind::LinksTo)
                .count(),
            1
        );
    }

    #[test]
    fn front_matter_relates_to_edge() {
        let out = parse_document_file("docs/physics.md", SAMPLE_MD).unwrap();
        let rel = out
            .relationships
            .iter()
            .find(|r| r.kind == RelationKind::RelatesTo)
            .unwrap();
        assert_eq!(rel.target, "system:src/physics.ts:PhysicsSystem");
    }

    #[test]
    fn no_front_matter_falls_back_to_file_name() {
        let out = parse_document_file("README.md", "# Hello\n\nplain body\n").unwrap();
        let doc = &out.entities[0];
        assert_eq!(doc.name, "README.md");
        assert_eq!(doc.metadata["has_front_matter"], false);
    }

    #[test]
    fn malformed_front_matter_degrades() {
        let src = "---\n:{not yaml::\n---\nbody text\n";
        let out = parse_document_file("docs/bad.md", src).unwrap();
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities[0].content.as_deref(), Some("body text\n"));
    }

    #[test]
    fn relative_link_normalization() {
        assert_eq!(
            normalize_relative("docs/guide/a.md", "../b.md"),
            "docs/b.md"
        );
        assert_eq!(normalize_relative("a.md", "b.md"), "b.md");
        assert_eq!(
            normalize_relative("docs/a.md", "./sub/c.md"),
            "docs/sub/c.md"
        );
    }

    #[test]
    fn preview_is_capped() {
        let long_body = "word ".repeat(2000);
        let out = parse_document_file("docs/long.md", &long_body).unwrap();
        assert!(out.entities[0].content.as_ref().unwrap().chars().count() <= DOC_PREVIEW_CHARS);
    }
}
