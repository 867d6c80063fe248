#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # posekit PnP (Perspective-n-Point)
//!
//! Object pose estimation from predicted 2D keypoints and their known 3D
//! positions on the object.
//!
//! ## Key Features
//!
//! - **EPnP Algorithm**: Efficient Perspective-n-Point with optional
//!   Levenberg–Marquardt refinement
//! - **RANSAC Support**: Robust estimation with outlier rejection
//! - **Distortion Handling**: Observations are undistorted before solving
//! - **Crop Correction**: Keypoints predicted on a crop are mapped back to
//!   full-image pixels
//!
//! ## Example: Basic EPnP
//!
//! ```rust
//! use glam::{DMat3, DVec2, DVec3};
//! use posekit_pnp::{solve_pnp, PnPMethod};
//!
//! let world = [
//!     DVec3::new(0.0, 0.0, 0.0),
//!     DVec3::new(1.0, 0.0, 0.0),
//!     DVec3::new(0.0, 1.0, 0.0),
//!     DVec3::new(0.0, 0.0, 1.0),
//!     DVec3::new(1.0, 1.0, 1.0),
//! ];
//! let k = DMat3::from_cols(
//!     DVec3::new(800.0, 0.0, 0.0),
//!     DVec3::new(0.0, 800.0, 0.0),
//!     DVec3::new(320.0, 240.0, 1.0),
//! );
//! let t = DVec3::new(-0.5, -0.5, 6.0);
//! let image: Vec<DVec2> = world
//!     .iter()
//!     .map(|p| {
//!         let pc = *p + t;
//!         DVec2::new(800.0 * pc.x / pc.z + 320.0, 800.0 * pc.y / pc.z + 240.0)
//!     })
//!     .collect();
//!
//! let result = solve_pnp(&world, &image, &k, PnPMethod::EPnPDefault)?;
//! assert!((result.translation - t).length() < 1e-4);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Example: Robust PnP with RANSAC
//!
//! ```rust,no_run
//! use glam::{DMat3, DVec2, DVec3};
//! use posekit_pnp::{solve_pnp_ransac, EPnPParams, PnPMethod, RansacParams};
//!
//! # let world = vec![DVec3::ZERO; 10];
//! # let image = vec![DVec2::new(320.0, 240.0); 10];
//! # let k = DMat3::IDENTITY;
//! let params = RansacParams {
//!     max_iterations: 1000,
//!     reproj_threshold_px: 5.0,
//!     random_seed: Some(42),
//!     ..Default::default()
//! };
//! let result = solve_pnp_ransac(&world, &image, &k, PnPMethod::EPnP(EPnPParams::refined()), &params)?;
//! println!("Inliers: {}/{}", result.inliers.len(), world.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Pinhole camera model and lens distortion.
pub mod camera;

/// Keypoint coordinate frames and crop correction.
pub mod crop;

/// Efficient Perspective-n-Point (EPnP) solver implementation.
///
/// A fast and accurate method for computing camera pose from 2D-3D correspondences.
pub mod epnp;

/// Common data types and traits for PnP solvers.
///
/// Defines the interface and result types shared across different PnP algorithms.
pub mod pnp;

/// RANSAC-based robust PnP pose estimation.
///
/// Handles outliers in point correspondences through random sampling consensus.
pub mod ransac;

/// Levenberg–Marquardt refinement of a pose.
pub mod refine;

/// Keypoint pose solver combining crop correction, undistortion and PnP.
pub mod solver;

mod ops;

pub use camera::{CameraError, CameraIntrinsics, CameraModel, Distortion};
pub use crop::{BoundingBox, CropError, CropWindow, KeypointFrame};
pub use epnp::{EPnP, EPnPParams};
pub use ops::{matrix_to_rvec, rvec_to_matrix};
pub use pnp::{NumericTol, PnPError, PnPResult, PnPSolver};
pub use ransac::{solve_pnp_ransac, PnPRansacResult, RansacParams};
pub use refine::{refine_pose_lm, LMRefineParams};
pub use solver::{KeypointPoseSolver, PoseEstimate, SolverParams};

use glam::{DMat3, DVec2, DVec3};

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// Efficient PnP solver with a user-supplied parameter object.
    EPnP(EPnPParams),
    /// Efficient PnP solver with the crate's default parameters.
    EPnPDefault,
}

impl PnPMethod {
    /// The same method with LM refinement disabled, as used for minimal RANSAC fits.
    pub fn without_refinement(&self) -> Self {
        match self {
            PnPMethod::EPnP(params) => PnPMethod::EPnP(EPnPParams {
                refine_lm: None,
                ..params.clone()
            }),
            PnPMethod::EPnPDefault => PnPMethod::EPnPDefault,
        }
    }
}

/// Dispatch function that routes to the chosen PnP solver.
pub fn solve_pnp(
    world: &[DVec3],
    image: &[DVec2],
    k: &DMat3,
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::EPnP(params) => EPnP::solve(world, image, k, &params),
        PnPMethod::EPnPDefault => EPnP::solve(world, image, k, &EPnPParams::default()),
    }
}
