//! Keypoint-to-pose solver: the full correction, undistortion and PnP pipeline
//! for one set of predicted keypoints.

use glam::{DMat3, DVec2, DVec3};

use crate::camera::{CameraModel, Distortion};
use crate::crop::CropWindow;
use crate::epnp::EPnPParams;
use crate::pnp::{check_correspondences, PnPError};
use crate::ransac::{solve_pnp_ransac, RansacParams};
use crate::{solve_pnp, PnPMethod};

/// Parameters of the keypoint pose solver.
#[derive(Debug, Clone)]
pub struct SolverParams {
    /// Robust RANSAC solve instead of a direct solve on all correspondences.
    pub use_ransac: bool,
    /// RANSAC parameters, used when `use_ransac` is set.
    pub ransac: RansacParams,
    /// EPnP parameters; LM refinement is enabled by default.
    pub epnp: EPnPParams,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            use_ransac: true,
            ransac: RansacParams::default(),
            epnp: EPnPParams::refined(),
        }
    }
}

/// A pose recovered from one set of keypoints.
///
/// `p_cam = rotation * p_obj + translation`.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    /// Rotation matrix, object to camera.
    pub rotation: DMat3,
    /// Rodrigues axis-angle representation of the rotation.
    pub rvec: DVec3,
    /// Translation of the object origin in the camera frame.
    pub translation: DVec3,
    /// Intrinsics matrix the pose was solved with.
    pub camera_matrix: DMat3,
    /// Distortion coefficients the observations were corrected with.
    pub distortion: Distortion,
    /// Inlier indices when the pose came from RANSAC.
    pub inliers: Option<Vec<usize>>,
    /// Root-mean-square reprojection error in pixels (over inliers for RANSAC).
    ///
    /// `None` when a point of the fit lies behind the camera.
    pub reproj_rmse: Option<f64>,
}

/// Solves object pose from predicted keypoints for a fixed camera.
#[derive(Debug, Clone)]
pub struct KeypointPoseSolver {
    camera: CameraModel,
    params: SolverParams,
}

impl KeypointPoseSolver {
    /// Create a solver for a camera.
    pub fn new(camera: CameraModel, params: SolverParams) -> Self {
        Self { camera, params }
    }

    /// The camera model the solver projects with.
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// The solver parameters.
    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Recover the pose of the reference points from their observed projections.
    ///
    /// # Arguments
    ///
    /// * `reference` - Keypoints in the object frame.
    /// * `observed` - Predicted keypoints in the same order. Full-image pixels,
    ///   or crop pixels when `crop` is given.
    /// * `crop` - The window the keypoints were predicted in.
    pub fn solve(
        &self,
        reference: &[DVec3],
        observed: &[DVec2],
        crop: Option<&CropWindow>,
    ) -> Result<PoseEstimate, PnPError> {
        check_correspondences(reference, observed, 4)?;

        let image_points: Vec<DVec2> = match crop {
            Some(window) => observed.iter().map(|&p| window.crop_to_image(p)).collect(),
            None => observed.to_vec(),
        };
        let image_points = self.camera.undistort_points(&image_points)?;

        let k = self.camera.intrinsics.matrix();
        let method = PnPMethod::EPnP(self.params.epnp.clone());

        let (pose, inliers) = if self.params.use_ransac {
            let result = solve_pnp_ransac(reference, &image_points, &k, method, &self.params.ransac)?;
            (result.pose, Some(result.inliers))
        } else {
            (solve_pnp(reference, &image_points, &k, method)?, None)
        };

        Ok(PoseEstimate {
            rotation: pose.rotation,
            rvec: pose.rvec,
            translation: pose.translation,
            camera_matrix: k,
            distortion: self.camera.distortion,
            inliers,
            reproj_rmse: pose.reproj_rmse.filter(|e| e.is_finite()),
        })
    }
}
