//! RANSAC-based robust wrapper for PnP solvers.

use glam::{DMat3, DVec2, DVec3};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ops::{all_positive_depths, project_sq_error};
use crate::pnp::{check_correspondences, PnPError, PnPResult};
use crate::{solve_pnp, PnPMethod};

/// Parameters for RANSAC over PnP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Pixel error threshold to classify an observation as an inlier.
    pub reproj_threshold_px: f64,
    /// Desired probability that at least one sample set is outlier-free.
    pub confidence: f64,
    /// Smallest consensus set accepted as a solution.
    pub min_inliers: usize,
    /// Points per minimal sample; reduced to 4 when only 4 points are given.
    pub sample_size: usize,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Whether to refit on all inliers using the base solver.
    pub refine: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            reproj_threshold_px: 8.0,
            confidence: 0.99,
            min_inliers: 4,
            sample_size: 5,
            random_seed: None,
            refine: true,
        }
    }
}

/// RANSAC result for PnP.
#[derive(Debug, Clone)]
pub struct PnPRansacResult {
    /// Best pose found by RANSAC.
    pub pose: PnPResult,
    /// Indices of inlier correspondences, ascending.
    pub inliers: Vec<usize>,
}

/// Solve PnP robustly using a RANSAC loop around a base PnP method.
///
/// - Minimal fits use the base method without LM refinement.
/// - Scoring uses Euclidean pixel reprojection error.
/// - Iterations adapt from current inlier ratio and desired confidence.
/// - With `params.refine` the final pose is refit on all inliers with the
///   base method as given; the RMSE is reported over the inliers only.
pub fn solve_pnp_ransac(
    world: &[DVec3],
    image: &[DVec2],
    k: &DMat3,
    base: PnPMethod,
    params: &RansacParams,
) -> Result<PnPRansacResult, PnPError> {
    check_correspondences(world, image, 4)?;
    let n = world.len();

    let sample_size = params.sample_size.clamp(4, n);
    let required_inliers = params.min_inliers.max(4);
    let minimal = base.without_refinement();

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut indices: Vec<usize> = (0..n).collect();
    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best_pose: Option<PnPResult> = None;

    let mut iter = 0usize;
    let mut required_iters = params.max_iterations;
    let mut w_min: Vec<DVec3> = Vec::with_capacity(sample_size);
    let mut i_min: Vec<DVec2> = Vec::with_capacity(sample_size);

    while iter < required_iters {
        iter += 1;

        // Sample unique indices without replacement.
        indices.shuffle(&mut rng);
        w_min.clear();
        i_min.clear();
        for &idx in &indices[..sample_size] {
            w_min.push(world[idx]);
            i_min.push(image[idx]);
        }

        let pose_min = match solve_pnp(&w_min, &i_min, k, minimal.clone()) {
            Ok(p) => p,
            Err(_) => continue,
        };

        if !all_positive_depths(&w_min, &pose_min.rotation, &pose_min.translation) {
            continue;
        }

        let inliers = classify_inliers(
            world,
            image,
            &pose_min.rotation,
            &pose_min.translation,
            k,
            params.reproj_threshold_px,
        );

        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            best_pose = Some(pose_min);

            let w = best_inliers.len() as f64 / n as f64;
            required_iters = required_iters.min(adaptive_iterations(
                w,
                sample_size,
                params.confidence,
                params.max_iterations,
            ));
        }
    }

    log::debug!(
        "ransac: {iter} iterations, best consensus {}/{n}",
        best_inliers.len()
    );

    let best_pose = match best_pose {
        Some(pose) if best_inliers.len() >= required_inliers => pose,
        _ => {
            return Err(PnPError::NoConsensus {
                required: required_inliers,
                found: best_inliers.len(),
            })
        }
    };

    let mut final_pose = if params.refine {
        let w_all: Vec<DVec3> = best_inliers.iter().map(|&i| world[i]).collect();
        let i_all: Vec<DVec2> = best_inliers.iter().map(|&i| image[i]).collect();
        solve_pnp(&w_all, &i_all, k, base)?
    } else {
        best_pose
    };

    let mut sum_sq = 0.0;
    for &idx in &best_inliers {
        sum_sq += project_sq_error(
            &world[idx],
            &image[idx],
            &final_pose.rotation,
            &final_pose.translation,
            k,
        )
        .unwrap_or(f64::INFINITY);
    }
    final_pose.reproj_rmse = Some((sum_sq / best_inliers.len() as f64).sqrt());

    Ok(PnPRansacResult {
        pose: final_pose,
        inliers: best_inliers,
    })
}

/// Iterations needed to draw one outlier-free sample with the given confidence.
fn adaptive_iterations(
    inlier_ratio: f64,
    sample_size: usize,
    confidence: f64,
    max_iterations: usize,
) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let ws = inlier_ratio.powi(sample_size as i32);
    if ws <= f64::EPSILON {
        return max_iterations;
    }
    let log_conf = (1.0 - confidence).max(1e-12).ln();
    let log_denom = (1.0 - ws).ln();
    if !log_denom.is_finite() || log_denom >= 0.0 {
        return max_iterations;
    }
    let est = (log_conf / log_denom).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).clamp(1, max_iterations)
    } else {
        max_iterations
    }
}

fn classify_inliers(
    world: &[DVec3],
    image: &[DVec2],
    r: &DMat3,
    t: &DVec3,
    k: &DMat3,
    thresh_px: f64,
) -> Vec<usize> {
    let thresh_sq = thresh_px * thresh_px;
    world
        .iter()
        .zip(image.iter())
        .enumerate()
        .filter_map(|(idx, (pw, uv))| match project_sq_error(pw, uv, r, t, k) {
            Some(err2) if err2 < thresh_sq => Some(idx),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epnp::EPnPParams;
    use crate::ops::rvec_to_matrix;
    use approx::assert_relative_eq;

    fn scene() -> (Vec<DVec3>, Vec<DVec2>, DMat3, DMat3, DVec3) {
        let world = vec![
            DVec3::new(0.1, 0.2, 0.05),
            DVec3::new(-0.15, 0.1, -0.1),
            DVec3::new(0.2, -0.1, 0.12),
            DVec3::new(-0.05, -0.2, 0.0),
            DVec3::new(0.0, 0.0, 0.2),
            DVec3::new(0.12, 0.08, -0.15),
            DVec3::new(-0.2, -0.05, 0.08),
            DVec3::new(0.05, -0.12, -0.07),
            DVec3::new(-0.1, 0.15, 0.15),
            DVec3::new(0.18, 0.18, -0.02),
        ];
        let k = DMat3::from_cols(
            DVec3::new(800.0, 0.0, 0.0),
            DVec3::new(0.0, 800.0, 0.0),
            DVec3::new(640.0, 480.0, 1.0),
        );
        let r = rvec_to_matrix(DVec3::new(0.25, -0.3, 0.1));
        let t = DVec3::new(0.05, 0.02, 1.8);
        let image = world
            .iter()
            .map(|p| {
                let pc = r * *p + t;
                DVec2::new(800.0 * pc.x / pc.z + 640.0, 800.0 * pc.y / pc.z + 480.0)
            })
            .collect();
        (world, image, k, r, t)
    }

    #[test]
    fn test_ransac_basic_outliers() -> Result<(), PnPError> {
        let (world, mut image, k, r, t) = scene();
        image[1] += DVec2::new(150.0, -90.0);
        image[4] += DVec2::new(-120.0, 200.0);
        image[7] += DVec2::new(80.0, 130.0);

        let params = RansacParams {
            max_iterations: 1000,
            random_seed: Some(7),
            ..Default::default()
        };
        let result = solve_pnp_ransac(
            &world,
            &image,
            &k,
            PnPMethod::EPnP(EPnPParams::refined()),
            &params,
        )?;

        assert_eq!(result.inliers, vec![0, 2, 3, 5, 6, 8, 9]);
        for (a, b) in result
            .pose
            .rotation
            .to_cols_array()
            .iter()
            .zip(r.to_cols_array().iter())
        {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
        assert_relative_eq!(result.pose.translation.z, t.z, epsilon = 1e-6);
        assert!(result.pose.reproj_rmse.is_some_and(|e| e < 1e-3));
        Ok(())
    }

    #[test]
    fn test_ransac_no_consensus() {
        let (world, image, k, _, _) = scene();
        let params = RansacParams {
            min_inliers: world.len() + 1,
            random_seed: Some(1),
            ..Default::default()
        };
        let res = solve_pnp_ransac(&world, &image, &k, PnPMethod::EPnPDefault, &params);
        assert!(matches!(
            res,
            Err(PnPError::NoConsensus { required: 11, .. })
        ));
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(1.0, 5, 0.99, 100), 1);
        assert_eq!(adaptive_iterations(0.0, 5, 0.99, 100), 100);
        // 0.5^5 = 1/32 -> log(0.01) / log(31/32) ≈ 145.05
        assert_eq!(adaptive_iterations(0.5, 5, 0.99, 1000), 146);
        assert_eq!(adaptive_iterations(0.5, 5, 0.99, 100), 100);
    }
}
