#![deny(missing_docs)]
//! Batch evaluation of predicted keypoints against ground-truth poses.
//!
//! Reads a directory of `meta_*.json` ground-truth files, a JSON file of
//! predicted keypoints and the 3D reference keypoints of the object, solves
//! the pose of every sample and aggregates the errors.
//!
//! ```no_run
//! use posekit_eval::{read_predictions, read_reference_points, Dataset, EvalConfig, Evaluator};
//!
//! let config = EvalConfig::default();
//! let reference = read_reference_points("keypoints.txt", config.num_keypoints)?;
//! let dataset = Dataset::open("test")?;
//! let predictions = read_predictions("predictions.json")?;
//!
//! let outcome = Evaluator::new(config, reference)?.evaluate(&dataset, &predictions)?;
//! println!("{}", posekit_eval::format_summary_table(&outcome.summary()?));
//! # Ok::<(), posekit_eval::EvalError>(())
//! ```

/// Evaluation configuration.
pub mod config;

/// Ground-truth, reference keypoint and prediction files.
pub mod dataset;

/// Error types.
pub mod error;

/// Per-sample and batch evaluation.
pub mod evaluator;

/// Run reports.
pub mod report;

pub use config::{CameraConfig, EvalConfig};
pub use dataset::{read_predictions, read_reference_points, Dataset, Sample, SampleMeta};
pub use error::{EvalError, SampleError};
pub use evaluator::{EvalOutcome, Evaluator, SampleResult, SkippedSample};
pub use report::{format_summary_table, EvalReport, RunMetadata};
