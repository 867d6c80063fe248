//! Levenberg–Marquardt pose refinement for PnP solutions.
//!
//! The pose is perturbed on the left, `R ← exp(δω) R`, `t ← t + δt`, and the
//! Jacobian of the pixel residual with respect to `(δω, δt)` is analytic.

use glam::{DMat3, DVec2, DVec3};
use nalgebra::{Matrix6, Vector6};

use crate::ops::{matrix_to_rvec, reprojection_rmse, rvec_to_matrix};
use crate::pnp::{check_correspondences, PnPError, PnPResult};

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone)]
pub struct LMRefineParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the decrease of the squared reprojection error.
    pub cost_tolerance: f64,
    /// Convergence threshold on the gradient infinity norm.
    pub gradient_tolerance: f64,
    /// Initial damping factor (lambda).
    pub initial_lambda: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_factor: f64,
}

impl Default for LMRefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            cost_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

impl LMRefineParams {
    /// Create default refinement parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iters: usize) -> Self {
        self.max_iterations = max_iters;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }
}

const MIN_DEPTH: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e12;

/// Sum of squared pixel residuals over the points in front of the camera.
fn cost(world: &[DVec3], image: &[DVec2], r: &DMat3, t: &DVec3, k: &DMat3) -> (f64, usize) {
    let (fx, fy, cx, cy) = (k.x_axis.x, k.y_axis.y, k.z_axis.x, k.z_axis.y);
    let mut sum_sq = 0.0;
    let mut valid = 0;
    for (pw, uv) in world.iter().zip(image.iter()) {
        let pc = *r * *pw + *t;
        if pc.z <= MIN_DEPTH {
            continue;
        }
        let du = fx * pc.x / pc.z + cx - uv.x;
        let dv = fy * pc.y / pc.z + cy - uv.y;
        sum_sq += du.mul_add(du, dv * dv);
        valid += 1;
    }
    (sum_sq, valid)
}

/// Gauss-Newton normal equations `(JᵀJ, Jᵀr)` at the current pose.
fn normal_equations(
    world: &[DVec3],
    image: &[DVec2],
    r: &DMat3,
    t: &DVec3,
    k: &DMat3,
) -> (Matrix6<f64>, Vector6<f64>) {
    let (fx, fy, cx, cy) = (k.x_axis.x, k.y_axis.y, k.z_axis.x, k.z_axis.y);
    let mut h = Matrix6::<f64>::zeros();
    let mut g = Vector6::<f64>::zeros();

    for (pw, uv) in world.iter().zip(image.iter()) {
        let q = *r * *pw;
        let pc = q + *t;
        if pc.z <= MIN_DEPTH {
            continue;
        }
        let inv_z = 1.0 / pc.z;
        let inv_z2 = inv_z * inv_z;

        // d(u, v) / d(pc)
        let du_dpc = DVec3::new(fx * inv_z, 0.0, -fx * pc.x * inv_z2);
        let dv_dpc = DVec3::new(0.0, fy * inv_z, -fy * pc.y * inv_z2);

        // d(pc) / d(δω) = -[q]×, so the rotational block is q × d(u, v)/d(pc)
        let du_rot = q.cross(du_dpc);
        let dv_rot = q.cross(dv_dpc);

        let j_u = Vector6::new(du_rot.x, du_rot.y, du_rot.z, du_dpc.x, du_dpc.y, du_dpc.z);
        let j_v = Vector6::new(dv_rot.x, dv_rot.y, dv_rot.z, dv_dpc.x, dv_dpc.y, dv_dpc.z);

        let res_u = fx * pc.x * inv_z + cx - uv.x;
        let res_v = fy * pc.y * inv_z + cy - uv.y;

        h += j_u * j_u.transpose() + j_v * j_v.transpose();
        g += j_u * res_u + j_v * res_v;
    }
    (h, g)
}

/// Refine a pose `(R, t)` with Levenberg–Marquardt to minimize pixel reprojection error.
///
/// - `world`: object points
/// - `image`: undistorted pixel points
/// - `k`: intrinsics 3x3
///
/// The returned result carries the RMSE over all points, the number of
/// iterations run and whether a convergence criterion was met.
pub fn refine_pose_lm(
    world: &[DVec3],
    image: &[DVec2],
    k: &DMat3,
    r_init: &DMat3,
    t_init: &DVec3,
    params: &LMRefineParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(world, image, 3)?;

    let mut r = *r_init;
    let mut t = *t_init;
    let (mut err_sq, mut valid) = cost(world, image, &r, &t, k);

    let mut lambda = params.initial_lambda;
    let mut iters = 0usize;
    let mut converged = false;

    while iters < params.max_iterations {
        iters += 1;

        let (h, g) = normal_equations(world, image, &r, &t, k);
        if g.amax() < params.gradient_tolerance {
            converged = true;
            break;
        }

        let mut accepted = false;
        while lambda < MAX_LAMBDA {
            let mut a = h;
            for d in 0..6 {
                a[(d, d)] += lambda;
            }
            let Some(chol) = a.cholesky() else {
                lambda *= params.lambda_factor;
                continue;
            };
            let delta = chol.solve(&(-g));

            let r_new = rvec_to_matrix(DVec3::new(delta[0], delta[1], delta[2])) * r;
            let t_new = t + DVec3::new(delta[3], delta[4], delta[5]);
            let (err_sq_new, valid_new) = cost(world, image, &r_new, &t_new, k);

            if valid_new >= valid && err_sq_new < err_sq {
                let decrease = err_sq - err_sq_new;
                r = r_new;
                t = t_new;
                err_sq = err_sq_new;
                valid = valid_new;
                lambda = (lambda / params.lambda_factor).max(1e-12);
                accepted = true;
                if decrease < params.cost_tolerance || delta.amax() < 1e-15 {
                    converged = true;
                }
                break;
            }
            lambda *= params.lambda_factor;
        }

        if !accepted {
            // no damping makes progress; the current pose is a local minimum
            converged = true;
            break;
        }
        if converged {
            break;
        }
    }

    log::trace!("lm refinement: {iters} iterations, cost {err_sq:.3e}, converged={converged}");

    Ok(PnPResult {
        rotation: r,
        translation: t,
        rvec: matrix_to_rvec(&r),
        reproj_rmse: Some(reprojection_rmse(world, image, &r, &t, k)),
        num_iterations: Some(iters),
        converged: Some(converged),
    })
}
