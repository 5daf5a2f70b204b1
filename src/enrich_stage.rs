//! Enrich stage: semantic metadata and embeddings.
//!
//! Reads the parse artifact and splits entities into two enrichment tiers:
//! code-like entities (class/function/component/system) get a semantic
//! LLM call plus an embedding, document-like entities (document/asset) get
//! an embedding only. Everything else passes through untouched. Enriched
//! entities are merged back by id over the full original set, so no entity
//! is ever dropped — a failed enrichment just leaves its entity bare.
//!
//! Entities are processed in fixed-size batches with intra-batch
//! parallelism and a deliberate pause between batches, a crude but
//! effective rate limiter against the upstream providers.

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider, EMBED_TEXT_MAX_CHARS};
use crate::models::{preview, EnrichMetadata, EnrichOutput, EnrichedEntity, ParsedEntity};
use crate::progress::{checkpoint_interval, ProgressReporter, StageProgress};
use crate::semantic::{self, SemanticProvider};
use crate::staging;

/// Entities enriched concurrently per batch.
const ENRICH_BATCH_SIZE: usize = 5;

/// Pause between batches.
const BATCH_PAUSE_MS: u64 = 200;

pub async fn run_enrich(
    config: &Config,
    staging_path: &Path,
    reporter: &dyn ProgressReporter,
) -> Result<EnrichOutput> {
    let parse_output = staging::read_parse_output(staging_path)?;

    let embedder = embedding::create_provider(&config.embedding)?;
    let semantics = semantic::create_provider(&config.semantic)?;

    let enrichable: Vec<&ParsedEntity> = parse_output
        .entities
        .iter()
        .filter(|e| e.kind.is_code_like() || e.kind.is_document_like())
        .collect();

    let total = enrichable.len();
    let interval = checkpoint_interval(total);

    let mut enriched_by_id: HashMap<String, EnrichedEntity> = HashMap::new();
    let mut enriched_count = 0usize;
    let mut embedded_count = 0usize;
    let mut failed_count = 0usize;
    let mut done = 0usize;

    for batch in enrichable.chunks(ENRICH_BATCH_SIZE) {
        let futures = batch
            .iter()
            .map(|entity| enrich_one(entity, embedder.as_ref(), semantics.as_ref()));

        for (entity, result) in batch.iter().zip(join_all(futures).await) {
            if !result.enrichment.is_empty() {
                enriched_count += 1;
            }
            if result.embedding.is_some() {
                embedded_count += 1;
            }
            if result.failed {
                failed_count += 1;
            }
            enriched_by_id.insert(
                entity.id.clone(),
                EnrichedEntity {
                    entity: (*entity).clone(),
                    enrichment: result.enrichment,
                    embedding: result.embedding,
                },
            );
        }

        done += batch.len();
        if done % interval == 0 || done == total {
            reporter.report(StageProgress {
                stage: "enrich",
                n: done,
                total,
            });
        }

        if done < total {
            tokio::time::sleep(Duration::from_millis(BATCH_PAUSE_MS)).await;
        }
    }

    // Merge: the full original entity list, with enriched entities
    // substituted in by id.
    let entities: Vec<EnrichedEntity> = parse_output
        .entities
        .iter()
        .map(|e| {
            enriched_by_id
                .remove(&e.id)
                .unwrap_or_else(|| EnrichedEntity::from(e.clone()))
        })
        .collect();

    let output = EnrichOutput {
        entities,
        relationships: parse_output.relationships,
        metadata: EnrichMetadata {
            enriched: enriched_count,
            embedded: embedded_count,
            failed: failed_count,
            generated_at: Utc::now(),
        },
    };

    staging::write_enrich_output(staging_path, &output)?;
    Ok(output)
}

struct EnrichResult {
    enrichment: crate::models::Enrichment,
    embedding: Option<Vec<f32>>,
    failed: bool,
}

/// Enrich a single entity. Per-item failures degrade (empty enrichment,
/// no embedding) instead of propagating.
async fn enrich_one(
    entity: &ParsedEntity,
    embedder: &dyn EmbeddingProvider,
    semantics: &dyn SemanticProvider,
) -> EnrichResult {
    let mut failed = false;

    let enrichment = if entity.kind.is_code_like() {
        match semantics.describe(entity).await {
            Ok(e) => e,
            Err(err) => {
                eprintln!("Warning: semantic call failed for {}: {}", entity.id, err);
                failed = true;
                Default::default()
            }
        }
    } else {
        Default::default()
    };

    let embedding = if embedder.dims() > 0 {
        let text = embed_text(entity);
        match embedder.embed(&text).await {
            Ok(vec) => Some(vec),
            Err(err) => {
                eprintln!("Warning: embedding failed for {}: {}", entity.id, err);
                failed = true;
                None
            }
        }
    } else {
        None
    };

    EnrichResult {
        enrichment,
        embedding,
        failed,
    }
}

/// Name plus content, truncated to the provider's payload cap.
fn embed_text(entity: &ParsedEntity) -> String {
    let content = entity.content.as_deref().unwrap_or("");
    preview(&format!("{}\n{}", entity.name, content), EMBED_TEXT_MAX_CHARS)
}
