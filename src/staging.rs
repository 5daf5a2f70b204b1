//! Staging artifact layout and access.
//!
//! Each pipeline stage persists its output as a plain JSON file and the
//! next stage reads it back, which is the contract that lets stages run
//! independently (`--stage parse`, `--stage enrich`, ...):
//!
//! | File | Written by |
//! |------|-----------|
//! | `<staging>/parse/output.json` | parse stage |
//! | `<staging>/enrich/output.json` | enrich stage |
//! | `<staging>/last-build.json` | parse stage (revision marker) |
//!
//! All three are safe to delete between runs; `reset` does exactly that.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{EnrichOutput, ParseOutput};

pub fn parse_output_path(staging: &Path) -> PathBuf {
    staging.join("parse").join("output.json")
}

pub fn enrich_output_path(staging: &Path) -> PathBuf {
    staging.join("enrich").join("output.json")
}

pub fn last_build_path(staging: &Path) -> PathBuf {
    staging.join("last-build.json")
}

/// Revision marker recorded by the parse stage, independent of whether
/// later stages succeed. The next incremental run diffs against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastBuildMarker {
    pub revision: String,
    pub project: String,
    pub recorded_at: DateTime<Utc>,
}

pub fn write_parse_output(staging: &Path, output: &ParseOutput) -> Result<()> {
    write_json(&parse_output_path(staging), output)
}

pub fn read_parse_output(staging: &Path) -> Result<ParseOutput> {
    read_json(&parse_output_path(staging))
}

pub fn write_enrich_output(staging: &Path, output: &EnrichOutput) -> Result<()> {
    write_json(&enrich_output_path(staging), output)
}

pub fn read_enrich_output(staging: &Path) -> Result<EnrichOutput> {
    read_json(&enrich_output_path(staging))
}

pub fn write_last_build(staging: &Path, marker: &LastBuildMarker) -> Result<()> {
    write_json(&last_build_path(staging), marker)
}

/// Returns `None` when no marker exists (first build of a checkout).
pub fn read_last_build(staging: &Path) -> Result<Option<LastBuildMarker>> {
    let path = last_build_path(staging);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}

/// Wipe the stage directories and the revision marker.
pub fn reset(staging: &Path) -> Result<()> {
    for dir in ["parse", "enrich"] {
        let path = staging.join(dir);
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    let marker = last_build_path(staging);
    if marker.exists() {
        std::fs::remove_file(&marker)
            .with_context(|| format!("Failed to remove {}", marker.display()))?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stage artifact: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse stage artifact: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildMode, ParseMetadata};

    fn sample_output() -> ParseOutput {
        ParseOutput {
            entities: vec![],
            relationships: vec![],
            metadata: ParseMetadata {
                mode: BuildMode::Full,
                revision: "abc123".to_string(),
                files_scanned: 0,
                files_processed: 0,
                files_failed: 0,
                generated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn parse_artifact_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        write_parse_output(tmp.path(), &sample_output()).unwrap();
        let back = read_parse_output(tmp.path()).unwrap();
        assert_eq!(back.metadata.revision, "abc123");
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = read_parse_output(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("stage artifact"));
    }

    #[test]
    fn last_build_marker_is_optional() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_last_build(tmp.path()).unwrap().is_none());

        let marker = LastBuildMarker {
            revision: "deadbeef".to_string(),
            project: "demo".to_string(),
            recorded_at: Utc::now(),
        };
        write_last_build(tmp.path(), &marker).unwrap();
        let back = read_last_build(tmp.path()).unwrap().unwrap();
        assert_eq!(back.revision, "deadbeef");
    }

    #[test]
    fn reset_wipes_artifacts_and_marker() {
        let tmp = tempfile::tempdir().unwrap();
        write_parse_output(tmp.path(), &sample_output()).unwrap();
        write_last_build(
            tmp.path(),
            &LastBuildMarker {
                revision: "r1".to_string(),
                project: "demo".to_string(),
                recorded_at: Utc::now(),
            },
        )
        .unwrap();

        reset(tmp.path()).unwrap();
        assert!(!parse_output_path(tmp.path()).exists());
        assert!(read_last_build(tmp.path()).unwrap().is_none());

        // Resetting an already-clean staging area is fine.
        reset(tmp.path()).unwrap();
    }
}
