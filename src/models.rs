//! Core data models used throughout the build pipeline.
//!
//! These types represent the entities, relationships, and stage artifacts
//! that flow from parsing through enrichment into the graph and vector
//! stores, plus the request/summary types exposed by the build service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of entity kinds the parsers produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    File,
    Class,
    Function,
    Component,
    System,
    Document,
    Asset,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Class => "class",
            EntityKind::Function => "function",
            EntityKind::Component => "component",
            EntityKind::System => "system",
            EntityKind::Document => "document",
            EntityKind::Asset => "asset",
        }
    }

    /// Kinds that get the full LLM + embedding enrichment path.
    pub fn is_code_like(&self) -> bool {
        matches!(
            self,
            EntityKind::Class | EntityKind::Function | EntityKind::Component | EntityKind::System
        )
    }

    /// Kinds that get embedding-only enrichment (no LLM call).
    pub fn is_document_like(&self) -> bool {
        matches!(self, EntityKind::Document | EntityKind::Asset)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed, validated set of relationship kinds.
///
/// Edge labels in the graph store are interpolated into Cypher, so the
/// kind must never come from unvalidated input. Everything upstream and
/// downstream carries this enum; the string form only exists at the
/// store-adapter boundary and in artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Imports,
    Defines,
    Extends,
    SubscribesTo,
    Emits,
    ImplementsPattern,
    Documents,
    LinksTo,
    RelatesTo,
    DependsOnPackage,
}

impl RelationKind {
    /// The edge label used in the graph store. Uppercase identifiers only.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Imports => "IMPORTS",
            RelationKind::Defines => "DEFINES",
            RelationKind::Extends => "EXTENDS",
            RelationKind::SubscribesTo => "SUBSCRIBES_TO",
            RelationKind::Emits => "EMITS",
            RelationKind::ImplementsPattern => "IMPLEMENTS_PATTERN",
            RelationKind::Documents => "DOCUMENTS",
            RelationKind::LinksTo => "LINKS_TO",
            RelationKind::RelatesTo => "RELATES_TO",
            RelationKind::DependsOnPackage => "DEPENDS_ON_PACKAGE",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line range of a declaration within its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start_line: usize,
    pub end_line: usize,
}

/// A discrete artifact extracted from a source file.
///
/// `id` is deterministic (`function:<path>:<name>`, `file:<path>`, ...):
/// re-parsing the same file yields the same ids, which is what makes
/// incremental runs and the vector store's point-id hash stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedEntity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl ParsedEntity {
    pub fn new(kind: EntityKind, name: &str, path: &str) -> Self {
        Self {
            id: entity_id(kind, path, name),
            kind,
            name: name.to_string(),
            path: path.to_string(),
            content: None,
            metadata: serde_json::Value::Null,
            location: None,
        }
    }
}

/// Deterministic entity id: `<kind>:<path>` for per-file kinds,
/// `<kind>:<path>:<name>` for declarations within a file.
pub fn entity_id(kind: EntityKind, path: &str, name: &str) -> String {
    match kind {
        EntityKind::File | EntityKind::Document | EntityKind::Asset => {
            format!("{}:{}", kind.as_str(), path)
        }
        _ => format!("{}:{}:{}", kind.as_str(), path, name),
    }
}

/// A directed, typed edge between two entity ids.
///
/// The target may reference an entity that is never parsed (an external
/// module, an event name, a pattern). The id derives from
/// `(source, kind, target)` so re-extraction is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRelationship {
    pub id: String,
    pub kind: RelationKind,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl ParsedRelationship {
    pub fn new(kind: RelationKind, source: &str, target: &str) -> Self {
        Self {
            id: format!("{}:{}:{}", source, kind.as_str(), target),
            kind,
            source: source.to_string(),
            target: target.to_string(),
            properties: serde_json::Value::Null,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Semantic metadata attached to an entity by the enrich stage.
///
/// All fields are optional: a failed or disabled enrichment call yields
/// the default (empty) value rather than failing the stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrichment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architectural_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u8>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.semantic_description.is_none()
            && self.purpose.is_none()
            && self.patterns.is_empty()
            && self.architectural_role.is_none()
            && self.complexity.is_none()
    }
}

/// A parsed entity plus whatever enrichment it picked up.
///
/// Entities outside the enrichable kinds pass through the enrich stage
/// with a default [`Enrichment`] and no embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEntity {
    #[serde(flatten)]
    pub entity: ParsedEntity,
    #[serde(flatten)]
    pub enrichment: Enrichment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl From<ParsedEntity> for EnrichedEntity {
    fn from(entity: ParsedEntity) -> Self {
        Self {
            entity,
            enrichment: Enrichment::default(),
            embedding: None,
        }
    }
}

/// What one parser call extracted from one file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<ParsedEntity>,
    pub relationships: Vec<ParsedRelationship>,
}

/// Parse-stage artifact, persisted to `<staging>/parse/output.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutput {
    pub entities: Vec<ParsedEntity>,
    pub relationships: Vec<ParsedRelationship>,
    pub metadata: ParseMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub mode: BuildMode,
    pub revision: String,
    pub files_scanned: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub generated_at: DateTime<Utc>,
}

/// Enrich-stage artifact, persisted to `<staging>/enrich/output.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichOutput {
    pub entities: Vec<EnrichedEntity>,
    pub relationships: Vec<ParsedRelationship>,
    pub metadata: EnrichMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichMetadata {
    pub enriched: usize,
    pub embedded: usize,
    pub failed: usize,
    pub generated_at: DateTime<Utc>,
}

/// Build mode: full scan or source-control-diff-based incremental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Incremental,
    Full,
}

impl BuildMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incremental" => Some(BuildMode::Incremental),
            "full" => Some(BuildMode::Full),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Incremental => "incremental",
            BuildMode::Full => "full",
        }
    }
}

/// Which stages a build request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageFilter {
    All,
    Parse,
    Enrich,
    Populate,
}

impl StageFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(StageFilter::All),
            "parse" => Some(StageFilter::Parse),
            "enrich" => Some(StageFilter::Enrich),
            "populate" => Some(StageFilter::Populate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageFilter::All => "all",
            StageFilter::Parse => "parse",
            StageFilter::Enrich => "enrich",
            StageFilter::Populate => "populate",
        }
    }

    pub fn includes_parse(&self) -> bool {
        matches!(self, StageFilter::All | StageFilter::Parse)
    }

    pub fn includes_enrich(&self) -> bool {
        matches!(self, StageFilter::All | StageFilter::Enrich)
    }

    pub fn includes_populate(&self) -> bool {
        matches!(self, StageFilter::All | StageFilter::Populate)
    }
}

/// A build request as received over HTTP or the CLI.
///
/// `mode` and `stage` arrive as strings and are validated by the build
/// service before anything runs; an invalid value rejects the request
/// without mutating any state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

fn default_mode() -> String {
    "incremental".to_string()
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            stage: None,
            base_commit: None,
            repo_url: None,
            branch: None,
        }
    }
}

/// Per-stage timing and counts within a build run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub duration_ms: u64,
    pub entities: usize,
    pub relationships: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// One record per build invocation. Held only in the last-run slot;
/// operational telemetry, not system state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRunSummary {
    pub id: String,
    pub request: BuildRequest,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub stages: Vec<StageSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
///
/// Used for the content previews carried in entities and vector payloads.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_are_deterministic() {
        let a = ParsedEntity::new(EntityKind::Function, "update", "src/game.ts");
        let b = ParsedEntity::new(EntityKind::Function, "update", "src/game.ts");
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "function:src/game.ts:update");

        let f = ParsedEntity::new(EntityKind::File, "game.ts", "src/game.ts");
        assert_eq!(f.id, "file:src/game.ts");
    }

    #[test]
    fn relationship_id_derives_from_endpoints_and_kind() {
        let r1 = ParsedRelationship::new(RelationKind::Defines, "file:a.ts", "function:a.ts:f");
        let r2 = ParsedRelationship::new(RelationKind::Defines, "file:a.ts", "function:a.ts:f");
        assert_eq!(r1.id, r2.id);
        assert_eq!(r1.id, "file:a.ts:DEFINES:function:a.ts:f");
    }

    #[test]
    fn relation_kind_serde_round_trip() {
        for kind in [
            RelationKind::Imports,
            RelationKind::SubscribesTo,
            RelationKind::DependsOnPackage,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: RelationKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn unknown_relation_kind_is_rejected() {
        let result: Result<RelationKind, _> = serde_json::from_str("\"DROP_TABLE\"");
        assert!(result.is_err());
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello", 3), "hel");
        // Multi-byte characters must not be split.
        assert_eq!(preview("héllo", 2), "hé");
    }

    #[test]
    fn stage_filter_inclusion() {
        assert!(StageFilter::All.includes_parse());
        assert!(StageFilter::All.includes_populate());
        assert!(StageFilter::Parse.includes_parse());
        assert!(!StageFilter::Parse.includes_enrich());
        assert!(!StageFilter::Populate.includes_parse());
        assert!(StageFilter::Populate.includes_populate());
    }

    #[test]
    fn invalid_mode_and_stage_strings() {
        assert!(BuildMode::parse("partial").is_none());
        assert!(StageFilter::parse("embed").is_none());
        assert_eq!(BuildMode::parse("full"), Some(BuildMode::Full));
        assert_eq!(StageFilter::parse("enrich"), Some(StageFilter::Enrich));
    }
}
