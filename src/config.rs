use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub repo: RepoConfig,
    pub staging: StagingConfig,
    pub project: ProjectConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Vector collection name for this project.
    pub fn collection_name(&self) -> String {
        format!("{}_{}", self.vector.collection_prefix, self.project.id)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    /// Local checkout the pipeline scans.
    pub path: PathBuf,
    /// Optional remote; when set, builds sync (clone or fetch) before parsing.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory names excluded from full scans, in addition to the built-ins.
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    /// Tenant key. Every graph write/delete and the vector collection name
    /// are scoped by this id; cross-project isolation depends on it.
    pub id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Neo4j HTTP endpoint, e.g. `http://localhost:7474`.
    #[serde(default = "default_graph_url")]
    pub url: String,
    #[serde(default = "default_graph_database")]
    pub database: String,
    #[serde(default = "default_graph_user")]
    pub user: String,
    /// Environment variable holding the password.
    #[serde(default = "default_graph_password_env")]
    pub password_env: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: default_graph_url(),
            database: default_graph_database(),
            user: default_graph_user(),
            password_env: default_graph_password_env(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_graph_url() -> String {
    "http://localhost:7474".to_string()
}
fn default_graph_database() -> String {
    "neo4j".to_string()
}
fn default_graph_user() -> String {
    "neo4j".to_string()
}
fn default_graph_password_env() -> String {
    "NEO4J_PASSWORD".to_string()
}
fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Qdrant REST endpoint, e.g. `http://localhost:6333`.
    #[serde(default = "default_vector_url")]
    pub url: String,
    /// Collection name is `<prefix>_<project id>`.
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    #[serde(default = "default_distance")]
    pub distance: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            collection_prefix: default_collection_prefix(),
            distance: default_distance(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection_prefix() -> String {
    "kg".to_string()
}
fn default_distance() -> String {
    "Cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SemanticConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_semantic_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

impl SemanticConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_semantic_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.project.id.is_empty() {
        anyhow::bail!("project.id must not be empty");
    }
    if !config
        .project
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!("project.id may only contain alphanumerics, '-' and '_'");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.semantic.is_enabled() && config.semantic.model.is_none() {
        anyhow::bail!(
            "semantic.model must be specified when provider is '{}'",
            config.semantic.provider
        );
    }

    match config.semantic.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown semantic provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.vector.distance.as_str() {
        "Cosine" | "Dot" | "Euclid" => {}
        other => anyhow::bail!(
            "Unknown vector.distance: '{}'. Must be Cosine, Dot, or Euclid.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("kg.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[repo]
path = "/tmp/checkout"

[staging]
path = "/tmp/staging"

[project]
id = "demo"

[server]
bind = "127.0.0.1:7600"
"#;

    #[test]
    fn minimal_config_loads_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), MINIMAL);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.project.id, "demo");
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.semantic.is_enabled());
        assert_eq!(cfg.graph.database, "neo4j");
        assert_eq!(cfg.vector.collection_prefix, "kg");
        assert_eq!(cfg.repo.branch, "main");
        assert_eq!(cfg.collection_name(), "kg_demo");
    }

    #[test]
    fn embedding_requires_dims_and_model() {
        let tmp = tempfile::tempdir().unwrap();
        let body = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let path = write_config(tmp.path(), &body);
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn project_id_is_validated() {
        let tmp = tempfile::tempdir().unwrap();
        let body = MINIMAL.replace("id = \"demo\"", "id = \"de mo;\"");
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_distance_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let body = format!("{}\n[vector]\ndistance = \"Manhattan\"\n", MINIMAL);
        let path = write_config(tmp.path(), &body);
        assert!(load_config(&path).is_err());
    }
}
