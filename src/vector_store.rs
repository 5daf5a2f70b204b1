//! Vector store abstraction and implementations.
//!
//! Defines the [`VectorStore`] trait plus two implementations:
//! - **[`QdrantHttpStore`]** — the Qdrant REST API (collection management
//!   and point upserts with `wait=true`).
//! - **[`MemoryVectorStore`]** — in-process store for tests.
//!
//! Point ids are derived from entity ids with a 32-bit FNV-1a hash, so
//! re-upserting the same entity always lands on the same point. Collisions
//! across distinct entity ids are possible at this width; see `point_id`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::VectorConfig;

/// One point ready for upsert.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: u32,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent. If it exists with a different
    /// vector size the mismatch is fatal: silently writing differently
    /// sized vectors would corrupt search results.
    async fn ensure_collection(&self, name: &str, dims: usize) -> Result<()>;

    /// Idempotent upsert keyed by point id.
    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()>;
}

/// Stable point id for an entity id.
///
/// FNV-1a, 32-bit: offset basis `0x811c9dc5`, per byte XOR then multiply
/// by the prime `0x01000193`. Chosen for determinism and speed; at 32 bits
/// a collision between two distinct entity ids silently merges their
/// points, an accepted risk at the corpus sizes this targets.
pub fn point_id(entity_id: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in entity_id.as_bytes() {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ============ Qdrant over HTTP ============

/// Vector store backed by the Qdrant REST API.
pub struct QdrantHttpStore {
    base_url: String,
    distance: String,
    client: reqwest::Client,
}

impl QdrantHttpStore {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            distance: config.distance.clone(),
            client,
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }
}

#[async_trait]
impl VectorStore for QdrantHttpStore {
    async fn ensure_collection(&self, name: &str, dims: usize) -> Result<()> {
        let url = self.collection_url(name);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Vector store unreachable at {}", self.base_url))?;

        if response.status().is_success() {
            let json: serde_json::Value = response.json().await?;
            let existing = json
                .pointer("/result/config/params/vectors/size")
                .and_then(|v| v.as_u64());
            if let Some(size) = existing {
                if size as usize != dims {
                    bail!(
                        "Collection {} exists with vector size {} but {} is required",
                        name,
                        size,
                        dims
                    );
                }
            }
            return Ok(());
        }

        if response.status().as_u16() != 404 {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Vector store error {}: {}", status, text);
        }

        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": self.distance }
        });
        let response = self.client.put(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Failed to create collection {}: {} {}", name, status, text);
        }
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({
            "points": points
                .iter()
                .map(|p| serde_json::json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>()
        });

        let url = format!("{}/points?wait=true", self.collection_url(collection));
        let response = self.client.put(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Point upsert failed: {} {}", status, text);
        }
        Ok(())
    }
}

// ============ In-memory store ============

#[derive(Clone)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Default)]
struct MemoryVectorInner {
    /// collection → configured dims
    collections: HashMap<String, usize>,
    /// (collection, point id) → point
    points: HashMap<(String, u32), StoredPoint>,
}

/// In-process [`VectorStore`] with the Qdrant adapter's semantics,
/// including the dims-mismatch check.
#[derive(Default)]
pub struct MemoryVectorStore {
    inner: Mutex<MemoryVectorInner>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, collection: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.points.keys().filter(|(c, _)| c == collection).count()
    }

    pub fn payload(&self, collection: &str, id: u32) -> Option<serde_json::Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .points
            .get(&(collection.to_string(), id))
            .map(|p| p.payload.clone())
    }

    pub fn vector(&self, collection: &str, id: u32) -> Option<Vec<f32>> {
        let inner = self.inner.lock().unwrap();
        inner
            .points
            .get(&(collection.to_string(), id))
            .map(|p| p.vector.clone())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, name: &str, dims: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&existing) = inner.collections.get(name) {
            if existing != dims {
                bail!(
                    "Collection {} exists with vector size {} but {} is required",
                    name,
                    existing,
                    dims
                );
            }
            return Ok(());
        }
        inner.collections.insert(name.to_string(), dims);
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: &[VectorPoint]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.collections.contains_key(collection) {
            bail!("Collection {} does not exist", collection);
        }
        for point in points {
            inner.points.insert(
                (collection.to_string(), point.id),
                StoredPoint {
                    vector: point.vector.clone(),
                    payload: point.payload.clone(),
                },
            );
        }
        Ok(())
    }
}
