//! Graph store abstraction and implementations.
//!
//! Defines the [`GraphStore`] trait plus two implementations:
//! - **[`Neo4jHttpStore`]** — the transactional Cypher HTTP endpoint
//!   (`POST /db/{database}/tx/commit`), basic auth, UNWIND-batched merges.
//! - **[`MemoryGraphStore`]** — in-process store for tests and dry runs.
//!
//! Every operation is scoped by project: nodes merge on `(id, project)`,
//! edges match endpoints on `(id, project)`, deletes filter on `project`.
//! Cross-project isolation depends on this scoping — it is an invariant,
//! not an optimization. Edge labels are interpolated into Cypher, which is
//! safe only because they come from [`RelationKind::as_str`], a closed set
//! of uppercase identifiers.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GraphConfig;
use crate::models::RelationKind;

/// A node ready for upsert. `props` must be a JSON object.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: String,
    pub props: serde_json::Value,
}

/// An edge ready for upsert. The edge is only created when both endpoints
/// exist as nodes in the project; unresolved targets (external modules,
/// event names, packages) drop silently.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub kind: RelationKind,
    pub source: String,
    pub target: String,
    pub props: serde_json::Value,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the indexes the populate stage relies on (id, kind, path,
    /// project). Idempotent.
    async fn ensure_indexes(&self) -> Result<()>;

    /// Idempotent merge-and-set of nodes keyed by `(id, project)`.
    async fn upsert_nodes(&self, project: &str, nodes: &[NodeRecord]) -> Result<()>;

    /// Idempotent upsert of typed edges matched by `(source, target,
    /// project)`. All records in one call must share the same kind.
    async fn upsert_edges(&self, project: &str, edges: &[EdgeRecord]) -> Result<()>;

    /// Detach-delete every node in the project whose id is not in
    /// `keep_ids`. Returns the number of deleted nodes.
    async fn delete_missing(&self, project: &str, keep_ids: &[String]) -> Result<u64>;
}

// ============ Neo4j over HTTP ============

/// Graph store backed by Neo4j's transactional Cypher HTTP API.
pub struct Neo4jHttpStore {
    endpoint: String,
    user: String,
    password: Option<String>,
    client: reqwest::Client,
}

impl Neo4jHttpStore {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: format!(
                "{}/db/{}/tx/commit",
                config.url.trim_end_matches('/'),
                config.database
            ),
            user: config.user.clone(),
            password: std::env::var(&config.password_env).ok(),
            client,
        })
    }

    /// Run one or more statements in a single auto-committed transaction.
    async fn run(&self, statements: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "statements": statements });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if self.password.is_some() {
            request = request.basic_auth(&self.user, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Graph store unreachable at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Graph store error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let errors = json.get("errors").and_then(|e| e.as_array());
        if let Some(errors) = errors {
            if !errors.is_empty() {
                bail!("Graph store rejected statement: {}", errors[0]);
            }
        }
        Ok(json)
    }

    fn statement(cypher: &str, parameters: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "statement": cypher, "parameters": parameters })
    }
}

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    async fn ensure_indexes(&self) -> Result<()> {
        let statements = ["id", "kind", "path", "project"]
            .iter()
            .map(|field| {
                Self::statement(
                    &format!(
                        "CREATE INDEX entity_{} IF NOT EXISTS FOR (n:Entity) ON (n.{})",
                        field, field
                    ),
                    serde_json::json!({}),
                )
            })
            .collect();
        self.run(statements).await?;
        Ok(())
    }

    async fn upsert_nodes(&self, project: &str, nodes: &[NodeRecord]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let rows: Vec<serde_json::Value> = nodes
            .iter()
            .map(|n| serde_json::json!({ "id": n.id, "props": n.props }))
            .collect();
        let cypher = "UNWIND $rows AS row \
                      MERGE (n:Entity {id: row.id, project: $project}) \
                      SET n += row.props";
        self.run(vec![Self::statement(
            cypher,
            serde_json::json!({ "rows": rows, "project": project }),
        )])
        .await?;
        Ok(())
    }

    async fn upsert_edges(&self, project: &str, edges: &[EdgeRecord]) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let kind = edges[0].kind;
        debug_assert!(edges.iter().all(|e| e.kind == kind));

        let rows: Vec<serde_json::Value> = edges
            .iter()
            .map(|e| {
                serde_json::json!({
                    "source": e.source,
                    "target": e.target,
                    "props": e.props,
                })
            })
            .collect();
        // The label comes from the closed RelationKind set, never from input.
        let cypher = format!(
            "UNWIND $rows AS row \
             MATCH (a:Entity {{id: row.source, project: $project}}) \
             MATCH (b:Entity {{id: row.target, project: $project}}) \
             MERGE (a)-[r:{}]->(b) \
             SET r += row.props",
            kind.as_str()
        );
        self.run(vec![Self::statement(
            &cypher,
            serde_json::json!({ "rows": rows, "project": project }),
        )])
        .await?;
        Ok(())
    }

    async fn delete_missing(&self, project: &str, keep_ids: &[String]) -> Result<u64> {
        let cypher = "MATCH (n:Entity {project: $project}) \
                      WHERE NOT n.id IN $keep \
                      DETACH DELETE n \
                      RETURN count(n) AS deleted";
        let json = self
            .run(vec![Self::statement(
                cypher,
                serde_json::json!({ "project": project, "keep": keep_ids }),
            )])
            .await?;

        Ok(json
            .pointer("/results/0/data/0/row/0")
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }
}

// ============ In-memory store ============

#[derive(Default)]
struct MemoryGraphInner {
    /// (project, id) → props
    nodes: HashMap<(String, String), serde_json::Value>,
    /// (project, source, label, target) → props
    edges: HashMap<(String, String, String, String), serde_json::Value>,
}

/// In-process [`GraphStore`] with the same merge/match semantics as the
/// Neo4j adapter. Used by tests and `--dry-run` style tooling.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: Mutex<MemoryGraphInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self, project: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.nodes.keys().filter(|(p, _)| p == project).count()
    }

    pub fn node_ids(&self, project: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<String> = inner
            .nodes
            .keys()
            .filter(|(p, _)| p == project)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn node_props(&self, project: &str, id: &str) -> Option<serde_json::Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&(project.to_string(), id.to_string()))
            .cloned()
    }

    pub fn edge_count(&self, project: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.edges.keys().filter(|(p, ..)| p == project).count()
    }

    pub fn has_edge(&self, project: &str, source: &str, kind: RelationKind, target: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.edges.contains_key(&(
            project.to_string(),
            source.to_string(),
            kind.as_str().to_string(),
            target.to_string(),
        ))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_indexes(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_nodes(&self, project: &str, nodes: &[NodeRecord]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for node in nodes {
            let key = (project.to_string(), node.id.clone());
            let entry = inner
                .nodes
                .entry(key)
                .or_insert_with(|| serde_json::json!({}));
            merge_props(entry, &node.props);
        }
        Ok(())
    }

    async fn upsert_edges(&self, project: &str, edges: &[EdgeRecord]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for edge in edges {
            let source_key = (project.to_string(), edge.source.clone());
            let target_key = (project.to_string(), edge.target.clone());
            // MATCH semantics: both endpoints must exist.
            if !inner.nodes.contains_key(&source_key) || !inner.nodes.contains_key(&target_key) {
                continue;
            }
            let key = (
                project.to_string(),
                edge.source.clone(),
                edge.kind.as_str().to_string(),
                edge.target.clone(),
            );
            let entry = inner
                .edges
                .entry(key)
                .or_insert_with(|| serde_json::json!({}));
            merge_props(entry, &edge.props);
        }
        Ok(())
    }

    async fn delete_missing(&self, project: &str, keep_ids: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<(String, String)> = inner
            .nodes
            .keys()
            .filter(|(p, id)| p == project && !keep_ids.contains(id))
            .cloned()
            .collect();
        for key in &doomed {
            inner.nodes.remove(key);
            let (_, id) = key;
            // Detach: drop edges touching the node.
            inner
                .edges
                .retain(|(p, s, _, t), _| !(p == project && (s == id || t == id)));
        }
        Ok(doomed.len() as u64)
    }
}

/// `SET n += props` semantics: overwrite listed keys, keep the rest.
fn merge_props(target: &mut serde_json::Value, incoming: &serde_json::Value) {
    if let (Some(target_map), Some(incoming_map)) = (target.as_object_mut(), incoming.as_object())
    {
        for (k, v) in incoming_map {
            target_map.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            props: serde_json::json!({ "name": id }),
        }
    }

    #[tokio::test]
    async fn node_upsert_is_idempotent() {
        let store = MemoryGraphStore::new();
        store.upsert_nodes("p1", &[node("a"), node("b")]).await.unwrap();
        store.upsert_nodes("p1", &[node("a"), node("b")]).await.unwrap();
        assert_eq!(store.node_count("p1"), 2);
    }

    #[tokio::test]
    async fn projects_are_isolated() {
        let store = MemoryGraphStore::new();
        store.upsert_nodes("p1", &[node("a")]).await.unwrap();
        store.upsert_nodes("p2", &[node("a")]).await.unwrap();

        let deleted = store.delete_missing("p1", &[]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.node_count("p1"), 0);
        assert_eq!(store.node_count("p2"), 1);
    }

    #[tokio::test]
    async fn edges_require_both_endpoints() {
        let store = MemoryGraphStore::new();
        store.upsert_nodes("p1", &[node("a"), node("b")]).await.unwrap();

        let edges = vec![
            EdgeRecord {
                kind: RelationKind::Defines,
                source: "a".to_string(),
                target: "b".to_string(),
                props: serde_json::json!({}),
            },
            EdgeRecord {
                kind: RelationKind::Defines,
                source: "a".to_string(),
                target: "module:ghost".to_string(),
                props: serde_json::json!({}),
            },
        ];
        store.upsert_edges("p1", &edges).await.unwrap();
        store.upsert_edges("p1", &edges).await.unwrap();

        assert_eq!(store.edge_count("p1"), 1);
        assert!(store.has_edge("p1", "a", RelationKind::Defines, "b"));
    }

    #[tokio::test]
    async fn delete_missing_detaches_edges() {
        let store = MemoryGraphStore::new();
        store.upsert_nodes("p1", &[node("a"), node("b")]).await.unwrap();
        store
            .upsert_edges(
                "p1",
                &[EdgeRecord {
                    kind: RelationKind::Defines,
                    source: "a".to_string(),
                    target: "b".to_string(),
                    props: serde_json::json!({}),
                }],
            )
            .await
            .unwrap();

        let deleted = store.delete_missing("p1", &["a".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.node_count("p1"), 1);
        assert_eq!(store.edge_count("p1"), 0);
    }

    #[test]
    fn merge_props_keeps_existing_keys() {
        let mut target = serde_json::json!({ "a": 1, "b": 2 });
        merge_props(&mut target, &serde_json::json!({ "b": 3, "c": 4 }));
        assert_eq!(target, serde_json::json!({ "a": 1, "b": 3, "c": 4 }));
    }
}
