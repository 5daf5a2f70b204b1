//! Revision tracking over the source checkout.
//!
//! Shells out to `git` (no libgit dependency) for three capabilities the
//! pipeline needs: the current head revision, the changed-file list between
//! two revisions, and repository sync (clone or fetch+reset) when a remote
//! is configured. The "last build revision" marker itself lives in the
//! staging area (see [`crate::staging`]).

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;

/// `git hash-object -t tree /dev/null` — the well-known empty tree. Diffing
/// against it yields every tracked file, which is how "since repository
/// creation" is expressed when no prior build revision exists.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// How a file changed between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: String,
    pub kind: ChangeKind,
}

impl ChangedFile {
    /// Deletions are excluded from parsing; stale-node cleanup is the
    /// populate stage's job.
    pub fn is_parseable(&self) -> bool {
        !matches!(self.kind, ChangeKind::Deleted)
    }
}

/// Resolve the current head revision of the checkout.
pub fn head_revision(repo: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo)
        .output()
        .with_context(|| "Failed to execute 'git rev-parse'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git rev-parse HEAD failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// List files changed between `base` and the current head, classified
/// added/modified/deleted/renamed. Rename detection is on; the renamed
/// entry carries the new path.
pub fn changed_files(repo: &Path, base: &str) -> Result<Vec<ChangedFile>> {
    let range = format!("{}..HEAD", base);
    let output = Command::new("git")
        .args(["diff", "--name-status", "-M", &range])
        .current_dir(repo)
        .output()
        .with_context(|| "Failed to execute 'git diff'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git diff {} failed: {}", range, stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_name_status(&stdout))
}

/// Parse `git diff --name-status` output. Rename lines look like
/// `R100\told\tnew`; all others are `<status>\t<path>`.
fn parse_name_status(output: &str) -> Vec<ChangedFile> {
    let mut changes = Vec::new();
    for line in output.lines() {
        let mut parts = line.split('\t');
        let status = match parts.next() {
            Some(s) if !s.is_empty() => s,
            _ => continue,
        };
        let kind = match status.chars().next() {
            Some('A') => ChangeKind::Added,
            Some('M') => ChangeKind::Modified,
            Some('D') => ChangeKind::Deleted,
            Some('R') => ChangeKind::Renamed,
            _ => continue,
        };
        let path = match kind {
            // For renames the second column is the old path.
            ChangeKind::Renamed => parts.nth(1),
            _ => parts.next(),
        };
        if let Some(path) = path {
            changes.push(ChangedFile {
                path: path.to_string(),
                kind,
            });
        }
    }
    changes
}

/// Clone the repository if the checkout does not exist yet, otherwise
/// fetch and hard-reset to the remote branch.
pub fn sync_repo(repo: &Path, url: &str, branch: &str) -> Result<()> {
    if repo.join(".git").exists() {
        git_fetch_reset(repo, branch)
    } else {
        git_clone(url, branch, repo)
    }
}

fn git_clone(url: &str, branch: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let output = Command::new("git")
        .args(["clone", "--branch", branch, "--single-branch", url])
        .arg(dest)
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

fn git_fetch_reset(repo: &Path, branch: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["fetch", "origin", branch])
        .current_dir(repo)
        .output()
        .with_context(|| "Failed to execute 'git fetch'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git fetch failed: {}", stderr.trim());
    }

    let remote_ref = format!("origin/{}", branch);
    let output = Command::new("git")
        .args(["reset", "--hard", &remote_ref])
        .current_dir(repo)
        .output()
        .with_context(|| "Failed to execute 'git reset'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git reset failed: {}", stderr.trim());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_status_classification() {
        let output = "A\tsrc/new.ts\nM\tsrc/changed.ts\nD\tsrc/gone.ts\nR087\tsrc/old.ts\tsrc/renamed.ts\n";
        let changes = parse_name_status(output);
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[1].kind, ChangeKind::Modified);
        assert_eq!(changes[2].kind, ChangeKind::Deleted);
        assert_eq!(changes[3].kind, ChangeKind::Renamed);
        // Rename carries the new path.
        assert_eq!(changes[3].path, "src/renamed.ts");

        assert!(changes[0].is_parseable());
        assert!(!changes[2].is_parseable());
    }

    #[test]
    fn empty_diff_output() {
        assert!(parse_name_status("").is_empty());
        assert!(parse_name_status("\n\n").is_empty());
    }
}
