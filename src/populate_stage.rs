//! Populate stage: project the enrich artifact into the stores.
//!
//! Nodes and edges go to the graph store in batches of 100, vector points
//! go to the vector store for every entity carrying a non-empty embedding.
//! Incremental runs finish with a staleness pass that deletes project
//! nodes absent from the current entity set; full runs skip it.
//!
//! There is no cross-store transaction. A store failure aborts the stage
//! and the run; whatever was written stays, and the next run reconciles
//! (at-least-once, self-healing via re-run).

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::graph_store::{EdgeRecord, GraphStore, NodeRecord};
use crate::models::{preview, BuildMode, EnrichOutput, EnrichedEntity, RelationKind};
use crate::progress::{checkpoint_interval, ProgressReporter, StageProgress};
use crate::staging;
use crate::vector_store::{point_id, VectorPoint, VectorStore};

/// Nodes, edges, and points per store write.
const STORE_BATCH_SIZE: usize = 100;

/// Vector payloads carry a content snippet capped at this length.
const SNIPPET_MAX_CHARS: usize = 500;

/// Counts reported back to the build service.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PopulateSummary {
    pub nodes: usize,
    pub edges: usize,
    pub points: usize,
    pub pruned: u64,
}

pub async fn run_populate(
    config: &Config,
    staging_path: &Path,
    graph: &dyn GraphStore,
    vector: &dyn VectorStore,
    reporter: &dyn ProgressReporter,
) -> Result<PopulateSummary> {
    let enrich_output = staging::read_enrich_output(staging_path)?;
    let project = config.project.id.as_str();
    let collection = config.collection_name();

    graph.ensure_indexes().await?;

    let dims = embedding_dims(config, &enrich_output);
    if dims > 0 {
        vector.ensure_collection(&collection, dims).await?;
    }

    let mut summary = PopulateSummary::default();

    // Nodes first: edges MATCH their endpoints, so endpoints must exist
    // before any edge batch runs.
    let nodes: Vec<NodeRecord> = enrich_output.entities.iter().map(node_record).collect();
    let total = nodes.len();
    let interval = checkpoint_interval(total);
    let mut done = 0usize;
    for batch in nodes.chunks(STORE_BATCH_SIZE) {
        graph.upsert_nodes(project, batch).await?;
        done += batch.len();
        if done % interval == 0 || done == total {
            reporter.report(StageProgress {
                stage: "populate",
                n: done,
                total,
            });
        }
    }
    summary.nodes = total;

    // Edges are grouped by kind; each group is one Cypher shape.
    for kind in ALL_RELATION_KINDS {
        let group: Vec<EdgeRecord> = enrich_output
            .relationships
            .iter()
            .filter(|r| r.kind == *kind)
            .map(|r| EdgeRecord {
                kind: r.kind,
                source: r.source.clone(),
                target: r.target.clone(),
                props: edge_props(&r.properties),
            })
            .collect();
        for batch in group.chunks(STORE_BATCH_SIZE) {
            graph.upsert_edges(project, batch).await?;
        }
        summary.edges += group.len();
    }

    // Vector points for embedded entities only.
    let points: Vec<VectorPoint> = enrich_output
        .entities
        .iter()
        .filter(|e| e.embedding.as_ref().is_some_and(|v| !v.is_empty()))
        .map(vector_point)
        .collect();
    for batch in points.chunks(STORE_BATCH_SIZE) {
        vector.upsert_points(&collection, batch).await?;
    }
    summary.points = points.len();

    // Staleness pass: only meaningful when the entity set is the complete
    // current picture of what should exist, which incremental runs assert
    // and full runs (with their exclusion filters) do not.
    if staged_build_mode(staging_path)? == BuildMode::Incremental {
        let keep_ids: Vec<String> = enrich_output
            .entities
            .iter()
            .map(|e| e.entity.id.clone())
            .collect();
        summary.pruned = graph.delete_missing(project, &keep_ids).await?;
    }

    Ok(summary)
}

const ALL_RELATION_KINDS: &[RelationKind] = &[
    RelationKind::Imports,
    RelationKind::Defines,
    RelationKind::Extends,
    RelationKind::SubscribesTo,
    RelationKind::Emits,
    RelationKind::ImplementsPattern,
    RelationKind::Documents,
    RelationKind::LinksTo,
    RelationKind::RelatesTo,
    RelationKind::DependsOnPackage,
];

/// The build mode that produced the staged artifacts, read back from the
/// parse metadata so `stage=populate` re-runs prune consistently with the
/// run that parsed.
fn staged_build_mode(staging_path: &Path) -> Result<BuildMode> {
    Ok(staging::read_parse_output(staging_path)?.metadata.mode)
}

/// Collection dimensionality: the configured value when embeddings are
/// enabled, otherwise inferred from the artifact (so `stage=populate`
/// re-runs of an embedded artifact still work).
fn embedding_dims(config: &Config, output: &EnrichOutput) -> usize {
    if let Some(dims) = config.embedding.dims {
        if config.embedding.is_enabled() {
            return dims;
        }
    }
    output
        .entities
        .iter()
        .filter_map(|e| e.embedding.as_ref())
        .map(|v| v.len())
        .find(|&len| len > 0)
        .unwrap_or(0)
}

fn node_record(entity: &EnrichedEntity) -> NodeRecord {
    let e = &entity.entity;
    let mut props = serde_json::json!({
        "kind": e.kind.as_str(),
        "name": e.name,
        "path": e.path,
    });
    let map = props.as_object_mut().unwrap();
    if let Some(content) = &e.content {
        map.insert("content".into(), serde_json::json!(content));
    }
    if let Some(location) = &e.location {
        map.insert("start_line".into(), serde_json::json!(location.start_line));
        map.insert("end_line".into(), serde_json::json!(location.end_line));
    }
    if let Some(meta) = e.metadata.as_object() {
        for (k, v) in meta {
            // Nested values are not graph-property material; keep scalars.
            if !v.is_object() && !v.is_array() {
                map.insert(k.clone(), v.clone());
            }
        }
    }

    let enrichment = &entity.enrichment;
    if let Some(d) = &enrichment.semantic_description {
        map.insert("semantic_description".into(), serde_json::json!(d));
    }
    if let Some(p) = &enrichment.purpose {
        map.insert("purpose".into(), serde_json::json!(p));
    }
    if !enrichment.patterns.is_empty() {
        map.insert("patterns".into(), serde_json::json!(enrichment.patterns));
    }
    if let Some(r) = &enrichment.architectural_role {
        map.insert("architectural_role".into(), serde_json::json!(r));
    }
    if let Some(c) = enrichment.complexity {
        map.insert("complexity".into(), serde_json::json!(c));
    }

    NodeRecord {
        id: e.id.clone(),
        props,
    }
}

fn edge_props(properties: &serde_json::Value) -> serde_json::Value {
    if properties.is_object() {
        properties.clone()
    } else {
        serde_json::json!({})
    }
}

/// Denormalized payload for filtered similarity search.
fn vector_point(entity: &EnrichedEntity) -> VectorPoint {
    let e = &entity.entity;
    let enrichment = &entity.enrichment;
    let snippet = e
        .content
        .as_deref()
        .map(|c| preview(c, SNIPPET_MAX_CHARS))
        .unwrap_or_default();

    VectorPoint {
        id: point_id(&e.id),
        vector: entity.embedding.clone().unwrap_or_default(),
        payload: serde_json::json!({
            "entity_id": e.id,
            "kind": e.kind.as_str(),
            "name": e.name,
            "path": e.path,
            "description": enrichment.semantic_description,
            "purpose": enrichment.purpose,
            "role": enrichment.architectural_role,
            "complexity": enrichment.complexity,
            "snippet": snippet,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::MemoryGraphStore;
    use crate::models::{
        EnrichMetadata, EntityKind, ParseMetadata, ParseOutput, ParsedEntity, ParsedRelationship,
    };
    use crate::progress::NoProgress;
    use crate::vector_store::MemoryVectorStore;
    use chrono::Utc;

    fn entity(kind: EntityKind, name: &str, path: &str) -> EnrichedEntity {
        EnrichedEntity::from(ParsedEntity::new(kind, name, path))
    }

    fn seed_staging(
        staging: &Path,
        mode: BuildMode,
        entities: Vec<EnrichedEntity>,
        relationships: Vec<ParsedRelationship>,
    ) {
        let parse = ParseOutput {
            entities: entities.iter().map(|e| e.entity.clone()).collect(),
            relationships: relationships.clone(),
            metadata: ParseMetadata {
                mode,
                revision: "r1".to_string(),
                files_scanned: entities.len(),
                files_processed: entities.len(),
                files_failed: 0,
                generated_at: Utc::now(),
            },
        };
        staging::write_parse_output(staging, &parse).unwrap();
        let enrich = EnrichOutput {
            entities,
            relationships,
            metadata: EnrichMetadata {
                enriched: 0,
                embedded: 0,
                failed: 0,
                generated_at: Utc::now(),
            },
        };
        staging::write_enrich_output(staging, &enrich).unwrap();
    }

    fn test_config(staging: &Path) -> Config {
        let toml = format!(
            r#"
[repo]
path = "/nonexistent"

[staging]
path = "{}"

[project]
id = "demo"

[server]
bind = "127.0.0.1:0"
"#,
            staging.display()
        );
        toml::from_str(&toml).unwrap()
    }

    #[tokio::test]
    async fn populate_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let file = entity(EntityKind::File, "a.ts", "src/a.ts");
        let func = entity(EntityKind::Function, "f", "src/a.ts");
        let edge =
            ParsedRelationship::new(RelationKind::Defines, &file.entity.id, &func.entity.id);
        seed_staging(
            tmp.path(),
            BuildMode::Full,
            vec![file, func],
            vec![edge],
        );

        let config = test_config(tmp.path());
        let graph = MemoryGraphStore::new();
        let vector = MemoryVectorStore::new();

        for _ in 0..2 {
            let summary =
                run_populate(&config, tmp.path(), &graph, &vector, &NoProgress)
                    .await
                    .unwrap();
            assert_eq!(summary.nodes, 2);
            assert_eq!(summary.edges, 1);
        }

        assert_eq!(graph.node_count("demo"), 2);
        assert_eq!(graph.edge_count("demo"), 1);
    }

    #[tokio::test]
    async fn points_only_for_embedded_entities() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = entity(EntityKind::File, "a.ts", "src/a.ts");
        let mut embedded = entity(EntityKind::Function, "f", "src/a.ts");
        embedded.entity.content = Some("function f() {}".to_string());
        embedded.embedding = Some(vec![0.5, 0.5]);
        let embedded_id = embedded.entity.id.clone();
        seed_staging(tmp.path(), BuildMode::Full, vec![plain, embedded], vec![]);

        let config = test_config(tmp.path());
        let graph = MemoryGraphStore::new();
        let vector = MemoryVectorStore::new();
        let summary = run_populate(&config, tmp.path(), &graph, &vector, &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.points, 1);
        let collection = config.collection_name();
        assert_eq!(vector.point_count(&collection), 1);

        let payload = vector.payload(&collection, point_id(&embedded_id)).unwrap();
        assert_eq!(payload["kind"], "function");
        assert_eq!(payload["entity_id"], embedded_id);
        assert_eq!(payload["snippet"], "function f() {}");
    }

    #[tokio::test]
    async fn incremental_run_prunes_missing_nodes() {
        let tmp = tempfile::tempdir().unwrap();
        let a = entity(EntityKind::File, "a.ts", "src/a.ts");
        let b = entity(EntityKind::File, "b.ts", "src/b.ts");
        let c = entity(EntityKind::File, "c.ts", "src/c.ts");
        let a_id = a.entity.id.clone();

        seed_staging(
            tmp.path(),
            BuildMode::Incremental,
            vec![a.clone(), b.clone(), c],
            vec![],
        );
        let config = test_config(tmp.path());
        let graph = MemoryGraphStore::new();
        let vector = MemoryVectorStore::new();
        run_populate(&config, tmp.path(), &graph, &vector, &NoProgress)
            .await
            .unwrap();
        assert_eq!(graph.node_count("demo"), 3);

        // Next incremental run only sees {a, b}: c must go.
        seed_staging(tmp.path(), BuildMode::Incremental, vec![a, b], vec![]);
        let summary = run_populate(&config, tmp.path(), &graph, &vector, &NoProgress)
            .await
            .unwrap();
        assert_eq!(summary.pruned, 1);
        assert_eq!(graph.node_count("demo"), 2);
        assert!(graph.node_ids("demo").contains(&a_id));
    }

    #[tokio::test]
    async fn full_run_does_not_prune() {
        let tmp = tempfile::tempdir().unwrap();
        let a = entity(EntityKind::File, "a.ts", "src/a.ts");
        let b = entity(EntityKind::File, "b.ts", "src/b.ts");
        let c = entity(EntityKind::File, "c.ts", "src/c.ts");

        seed_staging(
            tmp.path(),
            BuildMode::Full,
            vec![a.clone(), b.clone(), c],
            vec![],
        );
        let config = test_config(tmp.path());
        let graph = MemoryGraphStore::new();
        let vector = MemoryVectorStore::new();
        run_populate(&config, tmp.path(), &graph, &vector, &NoProgress)
            .await
            .unwrap();

        seed_staging(tmp.path(), BuildMode::Full, vec![a, b], vec![]);
        let summary = run_populate(&config, tmp.path(), &graph, &vector, &NoProgress)
            .await
            .unwrap();
        assert_eq!(summary.pruned, 0);
        assert_eq!(graph.node_count("demo"), 3);
    }

    #[tokio::test]
    async fn enrichment_fields_land_on_the_node() {
        let tmp = tempfile::tempdir().unwrap();
        let mut func = entity(EntityKind::Function, "f", "src/a.ts");
        func.enrichment.purpose = Some("does things".to_string());
        func.enrichment.complexity = Some(4);
        let func_id = func.entity.id.clone();
        seed_staging(tmp.path(), BuildMode::Full, vec![func], vec![]);

        let config = test_config(tmp.path());
        let graph = MemoryGraphStore::new();
        let vector = MemoryVectorStore::new();
        run_populate(&config, tmp.path(), &graph, &vector, &NoProgress)
            .await
            .unwrap();

        let props = graph.node_props("demo", &func_id).unwrap();
        assert_eq!(props["purpose"], "does things");
        assert_eq!(props["complexity"], 4);
        assert_eq!(props["kind"], "function");
    }
}
