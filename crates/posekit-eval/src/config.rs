use std::path::Path;

use posekit_metrics::QuaternionOrder;
use posekit_pnp::{
    CameraIntrinsics, CameraModel, Distortion, EPnPParams, KeypointFrame, LMRefineParams,
    NumericTol, RansacParams, SolverParams,
};
use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Camera used to solve poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Focal lengths `(fx, fy)` in pixels.
    pub focal_length: [f64; 2],
    /// Image size `(width, height)` in pixels.
    pub image_size: [u32; 2],
    /// Principal point; the image centre when absent.
    pub principal_point: Option<[f64; 2]>,
    /// Lens distortion.
    pub distortion: Distortion,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focal_length: [1422.0, 1422.0],
            image_size: [1024, 1024],
            principal_point: None,
            distortion: Distortion::none(),
        }
    }
}

/// Configuration of an evaluation run.
///
/// Every field has a default, so `{}` is a valid configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Camera model.
    pub camera: CameraConfig,
    /// Frame the predicted keypoints are expressed in.
    pub keypoint_frame: KeypointFrame,
    /// Side of the square crop the keypoints were predicted on, in pixels.
    pub crop_size: f64,
    /// Map crop keypoints back to full-image pixels using the sample bounding box.
    pub crop_correction: bool,
    /// Key of the bounding box in the sample metadata.
    pub bbox_key: String,
    /// Crop window side as a multiple of the longer bounding box side.
    pub bbox_padding: f64,
    /// Storage order of the ground-truth quaternions.
    pub quaternion_order: QuaternionOrder,
    /// Keypoints are stored as `(y, x)` instead of `(x, y)`.
    pub swap_keypoint_axes: bool,
    /// Use only the first N reference keypoints.
    pub num_keypoints: Option<usize>,
    /// Robust RANSAC solve instead of a direct solve.
    pub use_ransac: bool,
    /// RANSAC parameters.
    pub ransac: RansacParams,
    /// Smallest accepted ratio of the smallest to the largest principal spread
    /// of the reference keypoints.
    pub degeneracy_tol: f64,
    /// Refine poses with Levenberg–Marquardt.
    pub refine_lm: bool,
    /// Worker threads; rayon's global pool when absent.
    pub num_threads: Option<usize>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            keypoint_frame: KeypointFrame::Normalized,
            crop_size: 1024.0,
            crop_correction: false,
            bbox_key: "cygnus".to_string(),
            bbox_padding: 1.25,
            quaternion_order: QuaternionOrder::Wxyz,
            swap_keypoint_axes: false,
            num_keypoints: None,
            use_ransac: true,
            ransac: RansacParams::default(),
            degeneracy_tol: NumericTol::default().degeneracy,
            refine_lm: true,
            num_threads: None,
        }
    }
}

impl EvalConfig {
    /// Read a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EvalError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot check.
    pub fn validate(&self) -> Result<(), EvalError> {
        if !(self.crop_size.is_finite() && self.crop_size > 0.0) {
            return Err(EvalError::InvalidConfig(format!(
                "crop_size must be positive, got {}",
                self.crop_size
            )));
        }
        if !(self.bbox_padding.is_finite() && self.bbox_padding > 0.0) {
            return Err(EvalError::InvalidConfig(format!(
                "bbox_padding must be positive, got {}",
                self.bbox_padding
            )));
        }
        if !(self.ransac.confidence > 0.0 && self.ransac.confidence < 1.0) {
            return Err(EvalError::InvalidConfig(format!(
                "ransac.confidence must be in (0, 1), got {}",
                self.ransac.confidence
            )));
        }
        if self.ransac.max_iterations == 0 {
            return Err(EvalError::InvalidConfig(
                "ransac.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.num_keypoints.is_some_and(|n| n < 4) {
            return Err(EvalError::InvalidConfig(
                "num_keypoints must be at least 4".to_string(),
            ));
        }
        if self.num_threads == Some(0) {
            return Err(EvalError::InvalidConfig(
                "num_threads must be at least 1".to_string(),
            ));
        }
        self.camera_model()?;
        Ok(())
    }

    /// The camera model described by `camera`.
    pub fn camera_model(&self) -> Result<CameraModel, EvalError> {
        let [fx, fy] = self.camera.focal_length;
        let [w, h] = self.camera.image_size;
        let intrinsics = match self.camera.principal_point {
            Some([cx, cy]) => CameraIntrinsics::new(fx, fy, cx, cy)?,
            None => CameraIntrinsics::from_focal_and_size((fx, fy), (w, h))?,
        };
        Ok(CameraModel::with_distortion(intrinsics, self.camera.distortion))
    }

    /// Solver parameters described by this configuration.
    pub fn solver_params(&self) -> SolverParams {
        SolverParams {
            use_ransac: self.use_ransac,
            ransac: self.ransac.clone(),
            epnp: EPnPParams {
                tol: NumericTol {
                    degeneracy: self.degeneracy_tol,
                    ..Default::default()
                },
                refine_lm: self.refine_lm.then(LMRefineParams::default),
            },
        }
    }
}
