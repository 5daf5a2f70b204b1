//! Build progress reporting.
//!
//! Stages report observable progress (files parsed, entities enriched,
//! batches written) for operability, not correctness. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event from a pipeline stage.
#[derive(Clone, Debug)]
pub struct StageProgress {
    pub stage: &'static str,
    pub n: usize,
    pub total: usize,
}

/// Reports stage progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: StageProgress);
}

/// Human-friendly progress on stderr: "parse  34 / 120 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: StageProgress) {
        let line = format!("{}  {} / {}\n", event.stage, event.n, event.total);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: StageProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage,
            "n": event.n,
            "total": event.total,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: StageProgress) {}
}

/// Interval giving ~10 evenly spaced checkpoints (or every item when the
/// total is small).
pub fn checkpoint_interval(total: usize) -> usize {
    (total / 10).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_interval_bounds() {
        assert_eq!(checkpoint_interval(0), 1);
        assert_eq!(checkpoint_interval(5), 1);
        assert_eq!(checkpoint_interval(10), 1);
        assert_eq!(checkpoint_interval(100), 10);
        assert_eq!(checkpoint_interval(1234), 123);
    }
}
