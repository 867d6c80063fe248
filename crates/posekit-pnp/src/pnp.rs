//! Common data types shared across Perspective-n-Point (PnP) solvers.

use glam::{DMat3, DVec2, DVec3};
use thiserror::Error;

use crate::camera::CameraError;

/// Error types for PnP solvers.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the specific solver.
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver.
        required: usize,
        /// Actual number of correspondences provided.
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice.
        left_name: &'static str,
        /// Length of the left-hand slice.
        left_len: usize,
        /// Label for the right-hand slice.
        right_name: &'static str,
        /// Length of the right-hand slice.
        right_len: usize,
    },

    /// A correspondence contains NaN or infinite coordinates.
    #[error("Non-finite {kind} point at index {index}")]
    NonFiniteInput {
        /// Which array holds the offending point.
        kind: &'static str,
        /// Index of the point.
        index: usize,
    },

    /// The 3D points are collinear or (near-)coplanar; no stable pose exists.
    #[error("Degenerate point configuration: principal spread ratio {ratio:.3e} below {tolerance:.1e}")]
    DegenerateGeometry {
        /// Ratio between the smallest and the largest principal spread.
        ratio: f64,
        /// Tolerance the ratio was compared against.
        tolerance: f64,
    },

    /// RANSAC did not find a large enough consensus set.
    #[error("RANSAC found no consensus: best inlier set has {found} points, {required} required")]
    NoConsensus {
        /// Minimum consensus size.
        required: usize,
        /// Size of the best consensus found.
        found: usize,
    },

    /// Singular value / eigen decomposition or a linear solve failed.
    #[error("Numeric decomposition failed: {0}")]
    SvdFailed(String),

    /// Camera model error.
    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// Numeric tolerances used by linear algebra routines throughout the PnP pipeline.
#[derive(Debug, Clone)]
pub struct NumericTol {
    /// Tolerance for singular-value decomposition.
    pub svd: f64,
    /// Epsilon threshold for determinant / singular-value checks.
    pub eps: f64,
    /// Smallest accepted ratio between the smallest and the largest
    /// principal spread of the 3D points; below it the configuration is
    /// treated as coplanar or collinear.
    pub degeneracy: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            eps: 1e-12,
            degeneracy: 1e-4,
        }
    }
}

/// Result returned by any PnP solver.
///
/// The rotation matrix maps coordinates from the **object** frame to the
/// **camera** frame: `p_cam = rotation * p_obj + translation`.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Estimated rotation matrix.
    pub rotation: DMat3,
    /// Estimated translation vector.
    pub translation: DVec3,
    /// Rodrigues axis-angle representation of the rotation.
    pub rvec: DVec3,
    /// Root-mean-square reprojection error in pixels (if computed).
    pub reproj_rmse: Option<f64>,
    /// Number of iterations taken (if applicable).
    pub num_iterations: Option<usize>,
    /// Whether the solver converged (if applicable).
    pub converged: Option<bool>,
}

/// Trait for PnP solvers.
pub trait PnPSolver {
    /// Solver-specific parameters.
    type Param;

    /// Solve for camera pose given 2D-3D correspondences.
    ///
    /// # Arguments
    /// - `world` – 3-D coordinates in the object frame.
    /// - `image` – Corresponding undistorted pixel coordinates.
    /// - `k` – Camera intrinsics matrix.
    /// - `params` – Solver-specific parameters.
    fn solve(
        world: &[DVec3],
        image: &[DVec2],
        k: &DMat3,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError>;
}

/// Check the shape and values of a correspondence set.
pub(crate) fn check_correspondences(
    world: &[DVec3],
    image: &[DVec2],
    required: usize,
) -> Result<(), PnPError> {
    if world.len() != image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: image.len(),
        });
    }
    if world.len() < required {
        return Err(PnPError::InsufficientCorrespondences {
            required,
            actual: world.len(),
        });
    }
    if let Some(index) = world.iter().position(|p| !p.is_finite()) {
        return Err(PnPError::NonFiniteInput {
            kind: "world",
            index,
        });
    }
    if let Some(index) = image.iter().position(|p| !p.is_finite()) {
        return Err(PnPError::NonFiniteInput {
            kind: "image",
            index,
        });
    }
    Ok(())
}
