//! # Graph Harness
//!
//! A knowledge-graph build pipeline for code repositories.
//!
//! Graph Harness scans a source checkout (full or git-diff incremental),
//! extracts entities and relationships from code, documents, and structured
//! assets, optionally enriches them with LLM descriptions and embeddings,
//! and projects the result into a graph store (Neo4j) and a vector store
//! (Qdrant). Builds are driven from a CLI or an HTTP control endpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────────┐
//! │ Checkout │──▶│  Parse    │──▶│  Enrich   │──▶│   Populate     │
//! │ (git)    │   │ code/doc │   │ LLM+embed│   │ Neo4j + Qdrant │
//! └──────────┘   │ /asset   │   └────┬─────┘   └───────┬───────┘
//!                └────┬─────┘        │                 │
//!                     ▼              ▼                 ▼
//!                parse/output   enrich/output    graph + vectors
//!                  .json           .json
//! ```
//!
//! Each stage persists its output to the staging area and the next stage
//! reads it back, so any stage can be re-run on its own (`--stage enrich`).
//!
//! ## Quick Start
//!
//! ```bash
//! kg build --mode full          # scan everything
//! kg build                      # incremental (diff since last build)
//! kg build --stage populate     # re-project the staged artifact
//! kg serve                      # HTTP control endpoint
//! kg reset                      # wipe staging + revision marker
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`revision`] | Git revision tracking and checkout sync |
//! | [`parser_code`] | TypeScript/JavaScript AST extraction |
//! | [`parser_doc`] | Markdown front-matter and link extraction |
//! | [`parser_asset`] | JSON/YAML manifest extraction |
//! | [`parse_stage`] | File selection and parser dispatch |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`semantic`] | LLM semantic-enrichment provider |
//! | [`enrich_stage`] | Batched enrichment and merge |
//! | [`graph_store`] | Neo4j adapter and in-memory store |
//! | [`vector_store`] | Qdrant adapter and in-memory store |
//! | [`populate_stage`] | Store projection and staleness pruning |
//! | [`build`] | Build orchestration and single-flight state |
//! | [`server`] | HTTP control endpoint |
//! | [`staging`] | Stage artifact layout |

pub mod build;
pub mod config;
pub mod embedding;
pub mod enrich_stage;
pub mod graph_store;
pub mod models;
pub mod parse_stage;
pub mod parser_asset;
pub mod parser_code;
pub mod parser_doc;
pub mod populate_stage;
pub mod progress;
pub mod revision;
pub mod semantic;
pub mod server;
pub mod staging;
pub mod vector_store;
