use std::path::PathBuf;

use posekit_metrics::MetricsError;
use posekit_pnp::{CameraError, CropError, PnPError};
use thiserror::Error;

/// Errors that abort an evaluation run.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Error reading or writing a file.
    #[error("error with io: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing or writing JSON.
    #[error("error with json: {0}")]
    Json(#[from] serde_json::Error),

    /// Error walking the dataset directory.
    #[error("error walking directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// The configuration is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The camera described by the configuration is invalid.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The reference keypoint file could not be interpreted.
    #[error("invalid reference points in {path}: {reason}")]
    InvalidReferencePoints {
        /// File the points were read from.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The dataset directory holds no `meta_*.json` files.
    #[error("no meta_*.json files found in {0}")]
    EmptyDataset(PathBuf),

    /// Aggregation failed, e.g. because no sample could be scored.
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// The worker thread pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Reasons a single sample is skipped. These never abort a run.
#[derive(Debug, Error)]
pub enum SampleError {
    /// No prediction was given for the sample.
    #[error("no prediction for sample")]
    MissingPrediction,

    /// The sample metadata lacks the configured bounding box.
    #[error("no bounding box named {0:?} in sample metadata")]
    MissingBoundingBox(String),

    /// The crop window could not be built.
    #[error(transparent)]
    Crop(#[from] CropError),

    /// The pose solve failed.
    #[error(transparent)]
    Pnp(#[from] PnPError),

    /// Scoring failed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
