//! Build service: the pipeline orchestrator.
//!
//! Owns the single-build-at-a-time invariant. All build state lives in one
//! tagged struct behind one mutex, so "is a build running" and "what was
//! the last run" can never disagree. `start_build` validates the request
//! and flips the running slot synchronously; the pipeline itself runs in a
//! detached task that clears the slot and records the run summary on exit,
//! success or not.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::enrich_stage;
use crate::graph_store::GraphStore;
use crate::models::{
    BuildMode, BuildRequest, BuildRunSummary, StageFilter, StageSummary,
};
use crate::parse_stage::{self, ParseStageConfig};
use crate::populate_stage;
use crate::progress::StderrProgress;
use crate::revision;
use crate::vector_store::VectorStore;

/// Rejection reasons for [`BuildService::start_build`]. These map to HTTP
/// 409 and 400 at the server boundary.
#[derive(Debug)]
pub enum BuildError {
    AlreadyRunning,
    InvalidRequest(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::AlreadyRunning => write!(f, "a build is already in progress"),
            BuildError::InvalidRequest(msg) => write!(f, "invalid build request: {}", msg),
        }
    }
}

impl std::error::Error for BuildError {}

/// The build currently in flight.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentBuild {
    pub id: String,
    pub request: BuildRequest,
    pub started_at: chrono::DateTime<Utc>,
}

/// All mutable service state, under one lock.
#[derive(Default)]
struct BuildState {
    running: Option<CurrentBuild>,
    last_run: Option<BuildRunSummary>,
}

/// Snapshot returned by [`BuildService::status`].
#[derive(Debug, Clone, Serialize)]
pub struct BuildStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentBuild>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<BuildRunSummary>,
}

pub struct BuildService {
    config: Config,
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    state: Arc<Mutex<BuildState>>,
}

impl BuildService {
    pub fn new(config: Config, graph: Arc<dyn GraphStore>, vector: Arc<dyn VectorStore>) -> Self {
        Self {
            config,
            graph,
            vector,
            state: Arc::new(Mutex::new(BuildState::default())),
        }
    }

    /// Validate and accept a build request. Returns the new build id, or
    /// rejects synchronously without touching any pipeline state.
    pub fn start_build(&self, request: BuildRequest) -> Result<String, BuildError> {
        let mode = BuildMode::parse(&request.mode)
            .ok_or_else(|| BuildError::InvalidRequest(format!("unknown mode: {}", request.mode)))?;
        let stage = match request.stage.as_deref() {
            None => StageFilter::All,
            Some(s) => StageFilter::parse(s)
                .ok_or_else(|| BuildError::InvalidRequest(format!("unknown stage: {}", s)))?,
        };

        let build_id = Uuid::new_v4().to_string();
        let current = CurrentBuild {
            id: build_id.clone(),
            request: request.clone(),
            started_at: Utc::now(),
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.running.is_some() {
                return Err(BuildError::AlreadyRunning);
            }
            state.running = Some(current.clone());
        }

        let config = self.config.clone();
        let graph = Arc::clone(&self.graph);
        let vector = Arc::clone(&self.vector);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let summary =
                run_pipeline(&config, graph, vector, current, request, mode, stage).await;
            if let Some(error) = &summary.error {
                eprintln!("Warning: build {} failed: {}", summary.id, error);
            }
            let mut state = state.lock().unwrap();
            state.last_run = Some(summary);
            state.running = None;
        });

        Ok(build_id)
    }

    pub fn status(&self) -> BuildStatus {
        let state = self.state.lock().unwrap();
        BuildStatus {
            running: state.running.is_some(),
            current: state.running.clone(),
            last_run: state.last_run.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a build to completion on the current task. CLI entry point; the
    /// single-flight slot is honored the same as via `start_build`.
    pub async fn run_blocking(&self, request: BuildRequest) -> Result<BuildRunSummary, BuildError> {
        let mode = BuildMode::parse(&request.mode)
            .ok_or_else(|| BuildError::InvalidRequest(format!("unknown mode: {}", request.mode)))?;
        let stage = match request.stage.as_deref() {
            None => StageFilter::All,
            Some(s) => StageFilter::parse(s)
                .ok_or_else(|| BuildError::InvalidRequest(format!("unknown stage: {}", s)))?,
        };

        let current = CurrentBuild {
            id: Uuid::new_v4().to_string(),
            request: request.clone(),
            started_at: Utc::now(),
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.running.is_some() {
                return Err(BuildError::AlreadyRunning);
            }
            state.running = Some(current.clone());
        }

        let summary = run_pipeline(
            &self.config,
            Arc::clone(&self.graph),
            Arc::clone(&self.vector),
            current,
            request,
            mode,
            stage,
        )
        .await;

        let mut state = self.state.lock().unwrap();
        state.last_run = Some(summary.clone());
        state.running = None;
        Ok(summary)
    }
}

/// Sequence the stages and collect the run summary. Never panics or
/// returns Err: every failure lands in the summary's `error` field.
async fn run_pipeline(
    config: &Config,
    graph: Arc<dyn GraphStore>,
    vector: Arc<dyn VectorStore>,
    current: CurrentBuild,
    request: BuildRequest,
    mode: BuildMode,
    stage: StageFilter,
) -> BuildRunSummary {
    let reporter = StderrProgress;
    let mut summary = BuildRunSummary {
        id: current.id,
        request: request.clone(),
        started_at: current.started_at,
        finished_at: None,
        success: true,
        stages: Vec::new(),
        error: None,
    };

    let repo_path: PathBuf = config.repo.path.clone();
    let staging_path = config.staging.path.clone();

    // Optional checkout sync before parsing.
    let repo_url = request.repo_url.as_ref().or(config.repo.url.as_ref());
    if stage.includes_parse() {
        if let Some(url) = repo_url {
            let branch = request.branch.as_deref().unwrap_or(&config.repo.branch);
            let started = Instant::now();
            match revision::sync_repo(&repo_path, url, branch) {
                Ok(()) => summary.stages.push(StageSummary {
                    stage: "sync".to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    entities: 0,
                    relationships: 0,
                    detail: None,
                }),
                Err(e) => {
                    return finish_failed(summary, format!("sync failed: {}", e));
                }
            }
        }
    }

    if stage.includes_parse() {
        let started = Instant::now();
        let parse_config = ParseStageConfig {
            repo_path: &repo_path,
            staging_path: &staging_path,
            project_id: &config.project.id,
            mode,
            base_commit: request.base_commit.as_deref(),
            exclude_dirs: &config.repo.exclude_dirs,
        };
        match parse_stage::run_parse(&parse_config, &reporter).await {
            Ok(output) => summary.stages.push(StageSummary {
                stage: "parse".to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                entities: output.entities.len(),
                relationships: output.relationships.len(),
                detail: Some(serde_json::json!({
                    "files_scanned": output.metadata.files_scanned,
                    "files_processed": output.metadata.files_processed,
                    "files_failed": output.metadata.files_failed,
                    "revision": output.metadata.revision,
                })),
            }),
            Err(e) => return finish_failed(summary, format!("parse failed: {}", e)),
        }
    }

    if stage.includes_enrich() {
        let started = Instant::now();
        match enrich_stage::run_enrich(config, &staging_path, &reporter).await {
            Ok(output) => summary.stages.push(StageSummary {
                stage: "enrich".to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                entities: output.entities.len(),
                relationships: output.relationships.len(),
                detail: Some(serde_json::json!({
                    "enriched": output.metadata.enriched,
                    "embedded": output.metadata.embedded,
                    "failed": output.metadata.failed,
                })),
            }),
            Err(e) => return finish_failed(summary, format!("enrich failed: {}", e)),
        }
    }

    if stage.includes_populate() {
        let started = Instant::now();
        match populate_stage::run_populate(
            config,
            &staging_path,
            graph.as_ref(),
            vector.as_ref(),
            &reporter,
        )
        .await
        {
            Ok(counts) => summary.stages.push(StageSummary {
                stage: "populate".to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                entities: counts.nodes,
                relationships: counts.edges,
                detail: Some(serde_json::json!({
                    "points": counts.points,
                    "pruned": counts.pruned,
                })),
            }),
            Err(e) => return finish_failed(summary, format!("populate failed: {}", e)),
        }
    }

    summary.finished_at = Some(Utc::now());
    summary
}

fn finish_failed(mut summary: BuildRunSummary, error: String) -> BuildRunSummary {
    summary.success = false;
    summary.error = Some(error);
    summary.finished_at = Some(Utc::now());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_store::MemoryGraphStore;
    use crate::models::{
        EnrichMetadata, EnrichOutput, EnrichedEntity, EntityKind, ParseMetadata, ParseOutput,
        ParsedEntity,
    };
    use crate::staging;
    use crate::vector_store::MemoryVectorStore;
    use std::path::Path;
    use std::time::Duration;

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

    fn seed_artifacts(staging: &Path) {
        let entity = ParsedEntity::new(EntityKind::File, "a.ts", "src/a.ts");
        let parse = ParseOutput {
            entities: vec![entity.clone()],
            relationships: vec![],
            metadata: ParseMetadata {
                mode: BuildMode::Full,
                revision: "r1".to_string(),
                files_scanned: 1,
                files_processed: 1,
                files_failed: 0,
                generated_at: Utc::now(),
            },
        };
        staging::write_parse_output(staging, &parse).unwrap();
        let enrich = EnrichOutput {
            entities: vec![EnrichedEntity::from(entity)],
            relationships: vec![],
            metadata: EnrichMetadata {
                enriched: 0,
                embedded: 0,
                failed: 0,
                generated_at: Utc::now(),
            },
        };
        staging::write_enrich_output(staging, &enrich).unwrap();
    }

    fn service(staging: &Path) -> BuildService {
        BuildService::new(
            test_config(staging),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryVectorStore::new()),
        )
    }

    async fn wait_until_idle(service: &BuildService) {
        for _ in 0..200 {
            if !service.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("build did not finish");
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path());
        let request = BuildRequest {
            mode: "partial".to_string(),
            ..Default::default()
        };
        // No runtime needed: rejection happens before anything spawns.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        match service.start_build(request) {
            Err(BuildError::InvalidRequest(msg)) => assert!(msg.contains("partial")),
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
        assert!(!service.is_running());
    }

    #[test]
    fn invalid_stage_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service(tmp.path());
        let request = BuildRequest {
            mode: "full".to_string(),
            stage: Some("embed".to_string()),
            ..Default::default()
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        assert!(matches!(
            service.start_build(request),
            Err(BuildError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_first_runs() {
        let tmp = tempfile::tempdir().unwrap();
        seed_artifacts(tmp.path());
        let service = service(tmp.path());

        let request = BuildRequest {
            mode: "full".to_string(),
            stage: Some("populate".to_string()),
            ..Default::default()
        };

        // On a current-thread runtime the spawned pipeline cannot run
        // until this task yields, so the second call observes the slot.
        let first = service.start_build(request.clone()).unwrap();
        assert!(service.is_running());
        assert!(matches!(
            service.start_build(request),
            Err(BuildError::AlreadyRunning)
        ));

        wait_until_idle(&service).await;
        let status = service.status();
        assert!(!status.running);
        let last = status.last_run.unwrap();
        assert_eq!(last.id, first);
        assert!(last.success, "unexpected failure: {:?}", last.error);
    }

    #[tokio::test]
    async fn failed_stage_lands_in_the_summary() {
        let tmp = tempfile::tempdir().unwrap();
        // No staged artifacts: populate has nothing to read.
        let service = service(tmp.path());
        let request = BuildRequest {
            mode: "full".to_string(),
            stage: Some("populate".to_string()),
            ..Default::default()
        };

        let summary = service.run_blocking(request).await.unwrap();
        assert!(!summary.success);
        assert!(summary.error.unwrap().contains("populate failed"));
        assert!(summary.finished_at.is_some());
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn stage_filter_runs_only_that_stage() {
        let tmp = tempfile::tempdir().unwrap();
        seed_artifacts(tmp.path());
        let service = service(tmp.path());
        let request = BuildRequest {
            mode: "full".to_string(),
            stage: Some("enrich".to_string()),
            ..Default::default()
        };

        let summary = service.run_blocking(request).await.unwrap();
        assert!(summary.success, "unexpected failure: {:?}", summary.error);
        let stages: Vec<&str> = summary.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(stages, vec!["enrich"]);
    }

    #[tokio::test]
    async fn run_blocking_respects_single_flight() {
        let tmp = tempfile::tempdir().unwrap();
        seed_artifacts(tmp.path());
        let service = service(tmp.path());
        let request = BuildRequest {
            mode: "full".to_string(),
            stage: Some("populate".to_string()),
            ..Default::default()
        };

        service.start_build(request.clone()).unwrap();
        assert!(matches!(
            service.run_blocking(request).await,
            Err(BuildError::AlreadyRunning)
        ));
        wait_until_idle(&service).await;
    }
}
