//! Parse stage: file selection, parser dispatch, artifact persistence.
//!
//! Given a build config, selects the file set (full walk or revision diff),
//! fans each file out to the matching parser, and accumulates one flat
//! entity/relationship set. A single file's parse failure is logged and
//! skipped — it never aborts the batch. The artifact is persisted to the
//! `parse` staging bucket and the observed head revision is recorded as
//! the last build revision for the next incremental diff, independent of
//! whether later stages succeed.

use anyhow::{bail, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::{
    BuildMode, Extraction, ParseMetadata, ParseOutput, ParsedEntity, ParsedRelationship,
};
use crate::progress::{checkpoint_interval, ProgressReporter, StageProgress};
use crate::revision;
use crate::staging::{self, LastBuildMarker};
use crate::{parser_asset, parser_code, parser_doc};

/// Directories never scanned, regardless of configuration.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "coverage",
    "vendor",
];

/// Per-build inputs for the parse stage.
pub struct ParseStageConfig<'a> {
    pub repo_path: &'a Path,
    pub staging_path: &'a Path,
    pub project_id: &'a str,
    pub mode: BuildMode,
    /// Explicit diff base; falls back to the recorded last-build revision,
    /// then to the empty tree.
    pub base_commit: Option<&'a str>,
    pub exclude_dirs: &'a [String],
}

pub async fn run_parse(
    config: &ParseStageConfig<'_>,
    reporter: &dyn ProgressReporter,
) -> Result<ParseOutput> {
    let revision = match revision::head_revision(config.repo_path) {
        Ok(rev) => rev,
        Err(e) if config.mode == BuildMode::Full => {
            // A full scan does not need a revision to select files; record
            // a placeholder so the run is still traceable.
            eprintln!("Warning: could not resolve head revision: {}", e);
            "unknown".to_string()
        }
        Err(e) => bail!("incremental build requires a git checkout: {}", e),
    };

    let files = match config.mode {
        BuildMode::Full => select_full(config.repo_path, config.exclude_dirs)?,
        BuildMode::Incremental => select_incremental(config)?,
    };

    let total = files.len();
    let interval = checkpoint_interval(total);

    let mut entities: Vec<ParsedEntity> = Vec::new();
    let mut relationships: Vec<ParsedRelationship> = Vec::new();
    let mut processed = 0usize;
    let mut failed = 0usize;

    for (i, rel_path) in files.iter().enumerate() {
        match parse_one(config.repo_path, rel_path) {
            Ok(extraction) => {
                entities.extend(extraction.entities);
                relationships.extend(extraction.relationships);
                processed += 1;
            }
            Err(e) => {
                eprintln!("Warning: failed to parse {}: {}", rel_path, e);
                failed += 1;
            }
        }

        if (i + 1) % interval == 0 || i + 1 == total {
            reporter.report(StageProgress {
                stage: "parse",
                n: i + 1,
                total,
            });
        }
    }

    let output = ParseOutput {
        entities,
        relationships,
        metadata: ParseMetadata {
            mode: config.mode,
            revision: revision.clone(),
            files_scanned: total,
            files_processed: processed,
            files_failed: failed,
            generated_at: Utc::now(),
        },
    };

    staging::write_parse_output(config.staging_path, &output)?;
    staging::write_last_build(
        config.staging_path,
        &LastBuildMarker {
            revision,
            project: config.project_id.to_string(),
            recorded_at: Utc::now(),
        },
    )?;

    Ok(output)
}

/// Route one file to its parser by extension. Unsupported extensions never
/// reach this point; `select_*` filters them out.
fn parse_one(repo: &Path, rel_path: &str) -> Result<Extraction> {
    let full_path = repo.join(rel_path);
    let source = std::fs::read_to_string(&full_path)?;

    if parser_code::supports(rel_path) {
        parser_code::parse_code_file(rel_path, &source)
    } else if parser_doc::supports(rel_path) {
        parser_doc::parse_document_file(rel_path, &source)
    } else if parser_asset::supports(rel_path) {
        parser_asset::parse_asset_file(rel_path, &source)
    } else {
        bail!("no parser for {}", rel_path)
    }
}

fn supported(rel_path: &str) -> bool {
    parser_code::supports(rel_path) || parser_doc::supports(rel_path) || parser_asset::supports(rel_path)
}

/// Test files are excluded from the graph; they would otherwise drown the
/// real structure in fixtures.
fn is_test_file(rel_path: &str) -> bool {
    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    file_name.contains(".test.")
        || file_name.contains(".spec.")
        || rel_path.split('/').any(|c| c == "__tests__" || c == "tests")
}

fn exclude_globset(extra_dirs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for dir in DEFAULT_EXCLUDE_DIRS {
        builder.add(Glob::new(&format!("**/{}/**", dir))?);
        builder.add(Glob::new(&format!("{}/**", dir))?);
    }
    for dir in extra_dirs {
        builder.add(Glob::new(&format!("**/{}/**", dir))?);
        builder.add(Glob::new(&format!("{}/**", dir))?);
    }
    Ok(builder.build()?)
}

/// Full mode: enumerate every supported file under the checkout, minus
/// excluded directories and test files. Sorted for deterministic output.
fn select_full(repo: &Path, exclude_dirs: &[String]) -> Result<Vec<String>> {
    let excludes = exclude_globset(exclude_dirs)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(repo) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(repo)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        if excludes.is_match(&rel) || is_test_file(&rel) || !supported(&rel) {
            continue;
        }
        files.push(rel);
    }

    files.sort();
    Ok(files)
}

/// Incremental mode: files changed since the base revision, restricted to
/// additions/modifications/renames with supported extensions. Deletions
/// are excluded here — stale-node cleanup belongs to the populate stage.
fn select_incremental(config: &ParseStageConfig<'_>) -> Result<Vec<String>> {
    let base = match config.base_commit {
        Some(commit) => commit.to_string(),
        None => match staging::read_last_build(config.staging_path)? {
            Some(marker) => marker.revision,
            None => revision::EMPTY_TREE.to_string(),
        },
    };

    let excludes = exclude_globset(config.exclude_dirs)?;
    let changed = revision::changed_files(config.repo_path, &base)?;

    let mut files: Vec<String> = changed
        .into_iter()
        .filter(|c| c.is_parseable())
        .map(|c| c.path)
        .filter(|p| !excludes.is_match(p.as_str()) && !is_test_file(p) && supported(p))
        // A listed file can be gone from the working tree (e.g. diff base
        // confusion); parsing will skip it as a per-file failure, but we
        // can cheaply drop it here.
        .filter(|p| config.repo_path.join(PathBuf::from(p)).exists())
        .collect();

    files.sort();
    files.dedup();
    Ok(files)
}
