use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::rotation::{rvec_geodesic_error, QuaternionOrder};

/// Ground-truth pose of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruthPose {
    /// Rotation quaternion, stored in the order given alongside it.
    pub quaternion: [f64; 4],
    /// Object position in the camera frame.
    pub position: DVec3,
}

/// Errors of one scored sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Geodesic rotation error in radians.
    pub rotation_error: f64,
    /// Position error relative to the ground-truth distance.
    pub position_error: f64,
    /// Per-keypoint pixel errors; empty when ground-truth keypoints are unknown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keypoint_errors: Vec<f64>,
}

impl ErrorRecord {
    /// Attach per-keypoint pixel errors.
    pub fn with_keypoint_errors(mut self, keypoint_errors: Vec<f64>) -> Self {
        self.keypoint_errors = keypoint_errors;
        self
    }
}

/// `|true - est| / |true|`.
///
/// Fails with [`MetricsError::DegenerateReference`] when the true position has
/// (near) zero norm or is not finite.
pub fn position_error(true_position: DVec3, estimated: DVec3) -> Result<f64, MetricsError> {
    let norm = true_position.length();
    if !norm.is_finite() || norm < 1e-12 {
        return Err(MetricsError::DegenerateReference {
            position: true_position.to_array(),
        });
    }
    Ok((true_position - estimated).length() / norm)
}

/// Euclidean pixel distance between each predicted keypoint and its ground truth.
///
/// Both sets must already be in the same frame.
pub fn keypoint_pixel_errors(
    predicted: &[DVec2],
    ground_truth: &[DVec2],
) -> Result<Vec<f64>, MetricsError> {
    if predicted.len() != ground_truth.len() {
        return Err(MetricsError::MismatchedLengths {
            left_name: "predicted keypoints",
            left_len: predicted.len(),
            right_name: "ground-truth keypoints",
            right_len: ground_truth.len(),
        });
    }
    Ok(predicted
        .iter()
        .zip(ground_truth.iter())
        .map(|(p, g)| p.distance(*g))
        .collect())
}

/// Score an estimated pose against the ground truth.
pub fn score_pose(
    rvec: DVec3,
    translation: DVec3,
    truth: &GroundTruthPose,
    order: QuaternionOrder,
) -> Result<ErrorRecord, MetricsError> {
    Ok(ErrorRecord {
        rotation_error: rvec_geodesic_error(rvec, truth.quaternion, order)?,
        position_error: position_error(truth.position, translation)?,
        keypoint_errors: Vec::new(),
    })
}
