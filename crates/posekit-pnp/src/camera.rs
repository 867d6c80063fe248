//! Pinhole camera model and lens distortion used by the PnP solvers.

use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Invalid camera intrinsics.
    #[error("Invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),

    /// The iterative undistortion did not produce a finite point.
    #[error("Failed to undistort point ({0}, {1})")]
    UndistortFailed(f64, f64),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Intrinsic parameters of a pinhole camera with zero skew.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in x direction, in pixels.
    pub fx: f64,
    /// Focal length in y direction, in pixels.
    pub fy: f64,
    /// Principal point x coordinate, in pixels.
    pub cx: f64,
    /// Principal point y coordinate, in pixels.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> CameraResult<Self> {
        let intrinsics = Self { fx, fy, cx, cy };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Create camera intrinsics with the principal point at the image centre.
    ///
    /// # Arguments
    ///
    /// * `focal_length` - Focal lengths `(fx, fy)` in pixels.
    /// * `image_size` - Image dimensions `(width, height)` in pixels.
    pub fn from_focal_and_size(focal_length: (f64, f64), image_size: (u32, u32)) -> CameraResult<Self> {
        let (w, h) = image_size;
        if w == 0 || h == 0 {
            return Err(CameraError::InvalidIntrinsics(format!(
                "image size must be non-zero, got {w}x{h}"
            )));
        }
        Self::new(
            focal_length.0,
            focal_length.1,
            w as f64 / 2.0,
            h as f64 / 2.0,
        )
    }

    /// Create camera intrinsics from a 3x3 intrinsics matrix.
    pub fn from_matrix(k: &DMat3) -> CameraResult<Self> {
        // glam matrices are column major: k.col(c)[r] == K[r][c]
        if k.y_axis.x != 0.0 || k.x_axis.y != 0.0 || k.x_axis.z != 0.0 || k.y_axis.z != 0.0 {
            return Err(CameraError::InvalidIntrinsics(
                "intrinsics matrix must have form [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]".to_string(),
            ));
        }
        if k.z_axis.z != 1.0 {
            return Err(CameraError::InvalidIntrinsics(
                "intrinsics matrix must have K[2][2] == 1".to_string(),
            ));
        }
        Self::new(k.x_axis.x, k.y_axis.y, k.z_axis.x, k.z_axis.y)
    }

    /// Intrinsics matrix `K = [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.fx, 0.0, 0.0),
            DVec3::new(0.0, self.fy, 0.0),
            DVec3::new(self.cx, self.cy, 1.0),
        )
    }

    /// Project a camera-frame point to pixels. Returns `None` behind the camera.
    pub fn project(&self, point_camera: DVec3) -> Option<DVec2> {
        if point_camera.z <= f64::EPSILON {
            return None;
        }
        let inv_z = 1.0 / point_camera.z;
        Some(DVec2::new(
            self.fx * point_camera.x * inv_z + self.cx,
            self.fy * point_camera.y * inv_z + self.cy,
        ))
    }

    /// Pixel coordinates to normalized image coordinates.
    pub fn pixel_to_normalized(&self, uv: DVec2) -> DVec2 {
        DVec2::new((uv.x - self.cx) / self.fx, (uv.y - self.cy) / self.fy)
    }

    /// Normalized image coordinates to pixel coordinates.
    pub fn normalized_to_pixel(&self, xy: DVec2) -> DVec2 {
        DVec2::new(self.fx * xy.x + self.cx, self.fy * xy.y + self.cy)
    }

    fn validate(&self) -> CameraResult<()> {
        let values = [self.fx, self.fy, self.cx, self.cy];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidIntrinsics(format!(
                "non-finite intrinsics {values:?}"
            )));
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(CameraError::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        Ok(())
    }
}

/// Brown-Conrady lens distortion coefficients, OpenCV ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Distortion {
    /// First radial coefficient.
    pub k1: f64,
    /// Second radial coefficient.
    pub k2: f64,
    /// First tangential coefficient.
    pub p1: f64,
    /// Second tangential coefficient.
    pub p2: f64,
    /// Third radial coefficient.
    pub k3: f64,
}

impl Distortion {
    /// All coefficients zero.
    pub fn none() -> Self {
        Self::default()
    }

    /// Only the first two radial coefficients.
    pub fn radial(k1: f64, k2: f64) -> Self {
        Self {
            k1,
            k2,
            ..Self::default()
        }
    }

    /// Coefficients as `[k1, k2, p1, p2, k3]`.
    pub fn coefficients(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Check if there is any distortion.
    pub fn has_distortion(&self) -> bool {
        self.coefficients().iter().any(|&c| c != 0.0)
    }

    /// Apply the distortion to a point in normalized image coordinates.
    pub fn distort(&self, xy: DVec2) -> DVec2 {
        let (x, y) = (xy.x, xy.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let xy2 = 2.0 * x * y;
        DVec2::new(
            x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + self.p2 * xy2,
        )
    }

    /// Remove the distortion from a point in normalized image coordinates.
    ///
    /// Fixed-point iteration, converges for the moderate distortion of
    /// typical lenses.
    pub fn undistort(&self, xy_distorted: DVec2) -> CameraResult<DVec2> {
        const MAX_ITERATIONS: usize = 20;
        const EPSILON: f64 = 1e-12;

        let mut xy = xy_distorted;
        for _ in 0..MAX_ITERATIONS {
            let delta = xy_distorted - self.distort(xy);
            xy += delta;
            if delta.abs().max_element() < EPSILON {
                break;
            }
        }

        if !xy.is_finite() {
            return Err(CameraError::UndistortFailed(xy_distorted.x, xy_distorted.y));
        }
        Ok(xy)
    }
}

/// A camera model with intrinsics and optional distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    /// Camera intrinsics.
    pub intrinsics: CameraIntrinsics,
    /// Distortion coefficients.
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraModel {
    /// Create a camera model without distortion.
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: Distortion::none(),
        }
    }

    /// Create a camera model with distortion.
    pub fn with_distortion(intrinsics: CameraIntrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Check if the camera has distortion.
    pub fn has_distortion(&self) -> bool {
        self.distortion.has_distortion()
    }

    /// Apply distortion to a pixel that follows the ideal pinhole model.
    pub fn distort_point(&self, uv: DVec2) -> DVec2 {
        if !self.has_distortion() {
            return uv;
        }
        let xy = self.intrinsics.pixel_to_normalized(uv);
        self.intrinsics
            .normalized_to_pixel(self.distortion.distort(xy))
    }

    /// Map a distorted pixel to the pixel the ideal pinhole camera would observe.
    pub fn undistort_point(&self, uv: DVec2) -> CameraResult<DVec2> {
        if !self.has_distortion() {
            return Ok(uv);
        }
        let xy = self.intrinsics.pixel_to_normalized(uv);
        let undistorted = self.distortion.undistort(xy)?;
        Ok(self.intrinsics.normalized_to_pixel(undistorted))
    }

    /// Undistort multiple points.
    pub fn undistort_points(&self, points: &[DVec2]) -> CameraResult<Vec<DVec2>> {
        points.iter().map(|&uv| self.undistort_point(uv)).collect()
    }

    /// Project a camera-frame point to distorted pixels.
    pub fn project(&self, point_camera: DVec3) -> Option<DVec2> {
        self.intrinsics
            .project(point_camera)
            .map(|uv| self.distort_point(uv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_intrinsics_matrix_roundtrip() -> CameraResult<()> {
        let intrinsics = CameraIntrinsics::new(1000.0, 990.0, 640.0, 480.0)?;
        let k = intrinsics.matrix();
        assert_eq!(k.col(0), DVec3::new(1000.0, 0.0, 0.0));
        assert_eq!(k.col(2), DVec3::new(640.0, 480.0, 1.0));
        assert_eq!(CameraIntrinsics::from_matrix(&k)?, intrinsics);
        Ok(())
    }

    #[test]
    fn test_from_focal_and_size() -> CameraResult<()> {
        let intrinsics = CameraIntrinsics::from_focal_and_size((1422.0, 1422.0), (1024, 1024))?;
        assert_eq!(intrinsics.cx, 512.0);
        assert_eq!(intrinsics.cy, 512.0);
        assert!(CameraIntrinsics::from_focal_and_size((1422.0, 1422.0), (0, 1024)).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_focal_length() {
        assert!(CameraIntrinsics::new(0.0, 800.0, 320.0, 240.0).is_err());
        assert!(CameraIntrinsics::new(f64::NAN, 800.0, 320.0, 240.0).is_err());
    }

    #[test]
    fn test_project_behind_camera() -> CameraResult<()> {
        let intrinsics = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
        assert!(intrinsics.project(DVec3::new(0.0, 0.0, -1.0)).is_none());
        let uv = intrinsics
            .project(DVec3::new(0.5, -0.25, 2.0))
            .expect("point in front of camera");
        assert_relative_eq!(uv.x, 520.0);
        assert_relative_eq!(uv.y, 140.0);
        Ok(())
    }

    #[test]
    fn test_distortion_none() {
        assert!(!Distortion::none().has_distortion());
        assert!(Distortion::radial(0.1, 0.0).has_distortion());
    }

    #[test]
    fn test_distort_undistort_roundtrip() -> CameraResult<()> {
        let intrinsics = CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0)?;
        let distortion = Distortion {
            k1: -0.12,
            k2: 0.03,
            p1: 1e-4,
            p2: -2e-4,
            k3: 0.0,
        };
        let camera = CameraModel::with_distortion(intrinsics, distortion);

        let original = DVec2::new(100.0, 200.0);
        let distorted = camera.distort_point(original);
        let undistorted = camera.undistort_point(distorted)?;

        assert_relative_eq!(undistorted.x, original.x, epsilon = 1e-6);
        assert_relative_eq!(undistorted.y, original.y, epsilon = 1e-6);
        Ok(())
    }
}
