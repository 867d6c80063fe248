//! Run metadata, the JSON report and the human-readable summary table.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use posekit_metrics::{ErrorSummary, FieldSummary};
use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::evaluator::{EvalOutcome, SampleResult, SkippedSample};

/// Architecture tag recorded in the run metadata.
pub const ARCHITECTURE: &str = "keypoints_regression";

/// Description of an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Model family the predictions came from.
    pub architecture: String,
    /// Start time of the run, RFC 3339 in UTC.
    pub date_started_at: String,
    /// Dataset directory.
    pub dataset_used: PathBuf,
    /// Configuration of the run.
    pub config: EvalConfig,
}

impl RunMetadata {
    /// Metadata of a run starting now.
    pub fn new(dataset: impl AsRef<Path>, config: EvalConfig) -> Self {
        Self {
            architecture: ARCHITECTURE.to_string(),
            date_started_at: chrono::Utc::now().to_rfc3339(),
            dataset_used: dataset.as_ref().to_path_buf(),
            config,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    /// Run description.
    pub metadata: RunMetadata,
    /// Aggregated errors, rotation in radians.
    pub summary: ErrorSummary,
    /// Rotation error statistics in degrees.
    pub rotation_deg: FieldSummary,
    /// Per-sample results.
    pub samples: Vec<SampleResult>,
    /// Samples that could not be scored.
    pub skipped: Vec<SkippedSample>,
}

impl EvalReport {
    /// Build the report of a finished run. Fails when nothing was scored.
    pub fn new(metadata: RunMetadata, outcome: EvalOutcome) -> Result<Self, EvalError> {
        let summary = outcome.summary()?;
        Ok(Self {
            metadata,
            rotation_deg: summary.rotation_deg(),
            summary,
            samples: outcome.results,
            skipped: outcome.skipped,
        })
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), EvalError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Render the error statistics as a plain-text table.
pub fn format_summary_table(summary: &ErrorSummary) -> String {
    let deg = summary.rotation_deg();
    let rad = &summary.rotation;
    let mut out = String::new();

    // writing into a String cannot fail
    let _ = writeln!(out, "---- Geodesic Error Stats ----");
    for (label, r, d) in [
        ("mean", rad.mean, deg.mean),
        ("median", rad.median, deg.median),
        ("max", rad.max, deg.max),
        ("min", rad.min, deg.min),
        ("std", rad.std_dev, deg.std_dev),
    ] {
        let _ = writeln!(out, "{label:8} = {r:.3} ({d:.3} deg)");
    }

    let _ = writeln!(out, "---- Position Error Stats ----");
    push_rows(&mut out, &summary.position);

    if let Some(keypoints) = &summary.keypoints {
        let _ = writeln!(out, "---- Keypoint Error Stats (px) ----");
        push_rows(&mut out, keypoints);
    }

    let _ = write!(out, "samples  = {}", summary.num_samples);
    out
}

fn push_rows(out: &mut String, field: &FieldSummary) {
    for (label, value) in [
        ("mean", field.mean),
        ("median", field.median),
        ("max", field.max),
        ("min", field.min),
        ("std", field.std_dev),
    ] {
        let _ = writeln!(out, "{label:8} = {value:.3}");
    }
}
