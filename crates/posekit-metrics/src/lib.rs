#![deny(missing_docs)]
//! Pose error metrics: geodesic rotation error, relative position error,
//! per-keypoint pixel error and summary statistics over many samples.

/// Error type shared by the scorer and the aggregator.
pub mod error;

/// Rotation conversions and the geodesic distance between rotations.
pub mod rotation;

/// Per-sample pose scoring.
pub mod scoring;

/// Summary statistics over per-sample error records.
pub mod stats;

pub use error::MetricsError;
pub use rotation::{geodesic_distance, quaternion_to_matrix, rvec_geodesic_error, QuaternionOrder};
pub use scoring::{keypoint_pixel_errors, position_error, score_pose, ErrorRecord, GroundTruthPose};
pub use stats::{summarize, ErrorSummary, FieldSummary};
