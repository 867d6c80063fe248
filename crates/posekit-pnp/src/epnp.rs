//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: [Lepetit et al., IJCV 2009](https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf)
//! Reference: [OpenCV EPnP implementation](https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp)

use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, DVector};

use crate::ops::{compute_centroid, matrix_to_rvec, principal_axes, reprojection_rmse, umeyama};
use crate::pnp::{check_correspondences, NumericTol, PnPError, PnPResult, PnPSolver};
use crate::refine::{refine_pose_lm, LMRefineParams};

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        world: &[DVec3],
        image: &[DVec2],
        k: &DMat3,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(world, image, k, params)
    }
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Default)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Optional LM refinement parameters. If `Some`, the pose will be refined
    /// after the initial EPnP solution.
    pub refine_lm: Option<LMRefineParams>,
}

impl EPnPParams {
    /// EPnP followed by LM refinement with default parameters.
    pub fn refined() -> Self {
        Self {
            refine_lm: Some(LMRefineParams::default()),
            ..Default::default()
        }
    }
}

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `world` – 3-D coordinates in the object frame, `N ≥ 4`, not coplanar.
/// * `image` – Corresponding undistorted pixel coordinates.
/// * `k` – Camera intrinsics matrix.
///
/// # Errors
/// [`PnPError::InsufficientCorrespondences`] for fewer than four points and
/// [`PnPError::DegenerateGeometry`] when the object points are collinear or
/// coplanar within `params.tol.degeneracy`.
pub fn solve_epnp(
    world: &[DVec3],
    image: &[DVec2],
    k: &DMat3,
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(world, image, 4)?;

    let cw = select_control_points(world, params.tol.degeneracy)?;
    let alphas = compute_barycentric(world, &cw, params.tol.eps)?;

    let m = build_m(&alphas, image, k);

    // Null-space of M from the eigenvectors of MᵀM with the smallest eigenvalues.
    // Column i of `null4` holds the i-th smallest.
    let mtm = m.transpose() * &m;
    let eig = mtm.symmetric_eigen();
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let null4 = DMatrix::from_columns(&[
        eig.eigenvectors.column(order[0]),
        eig.eigenvectors.column(order[1]),
        eig.eigenvectors.column(order[2]),
        eig.eigenvectors.column(order[3]),
    ]);

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::from_column_slice(&rho);

    let candidates: Vec<[f64; 4]> = [
        estimate_beta(BetaApprox::Four, &l, &rho_vec, params.tol.svd),
        estimate_beta(BetaApprox::Two, &l, &rho_vec, params.tol.svd),
        estimate_beta(BetaApprox::Three, &l, &rho_vec, params.tol.svd),
    ]
    .into_iter()
    .flatten()
    .map(|b| gauss_newton(b, &l, &rho))
    .collect();

    let mut best: Option<(f64, DMat3, DVec3)> = None;
    for betas in &candidates {
        let (r, t) = match pose_from_betas(betas, &null4, world, &alphas) {
            Ok(pose) => pose,
            Err(_) => continue,
        };
        let err = reprojection_rmse(world, image, &r, &t, k);
        if best.as_ref().map_or(true, |(best_err, _, _)| err < *best_err) {
            best = Some((err, r, t));
        }
    }

    let Some((best_err, best_r, best_t)) = best else {
        return Err(PnPError::SvdFailed(
            "no beta approximation produced a pose".to_string(),
        ));
    };

    if let Some(ref lm_params) = params.refine_lm {
        return refine_pose_lm(world, image, k, &best_r, &best_t, lm_params);
    }

    Ok(PnPResult {
        rotation: best_r,
        translation: best_t,
        rvec: matrix_to_rvec(&best_r),
        reproj_rmse: Some(best_err),
        num_iterations: None,
        converged: Some(true),
    })
}

/// Pick the centroid and the three scaled principal directions as control points.
fn select_control_points(world: &[DVec3], degeneracy_tol: f64) -> Result<[DVec3; 4], PnPError> {
    let c = compute_centroid(world);
    let axes = principal_axes(world, c);

    let ratio = if axes[0].0 > 0.0 {
        axes[2].0 / axes[0].0
    } else {
        0.0
    };
    if ratio < degeneracy_tol {
        return Err(PnPError::DegenerateGeometry {
            ratio,
            tolerance: degeneracy_tol,
        });
    }

    let mut cw = [c; 4];
    for (i, (sigma, axis)) in axes.iter().enumerate() {
        cw[i + 1] = c + *axis * *sigma;
    }
    Ok(cw)
}

/// Barycentric coordinates of the object points with respect to the control points.
///
/// For each point the weights `[a0, a1, a2, a3]` sum to one and
/// `pw_i = sum_j(a_j * cw_j)`.
fn compute_barycentric(
    world: &[DVec3],
    cw: &[DVec3; 4],
    eps: f64,
) -> Result<Vec<[f64; 4]>, PnPError> {
    let b = DMat3::from_cols(cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]);
    let det = b.determinant();
    if det.abs() <= eps {
        return Err(PnPError::DegenerateGeometry {
            ratio: det.abs(),
            tolerance: eps,
        });
    }
    let b_inv = b.inverse();

    Ok(world
        .iter()
        .map(|&p| {
            let lamb = b_inv * (p - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// Construct the 2N x 12 design matrix `M`.
fn build_m(alphas: &[[f64; 4]], image: &[DVec2], k: &DMat3) -> DMatrix<f64> {
    let fu = k.x_axis.x;
    let fv = k.y_axis.y;
    let uc = k.z_axis.x;
    let vc = k.z_axis.y;

    let mut m = DMatrix::<f64>::zeros(2 * alphas.len(), 12);
    for (i, (a, uv)) in alphas.iter().zip(image.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha * fu;
            m[(row_x, base + 2)] = alpha * (uc - uv.x);
            m[(row_y, base + 1)] = alpha * fv;
            m[(row_y, base + 2)] = alpha * (vc - uv.y);
        }
    }
    m
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Build the 6×10 matrix **L** from the 12×4 null-space basis.
///
/// Column order of the quadratic betas:
/// `[b00, b01, b11, b02, b12, b22, b03, b13, b23, b33]`.
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let mut l = [[0.0; 10]; 6];

    for (row, &(a, b)) in CP_PAIRS.iter().enumerate() {
        let mut d = [DVec3::ZERO; 4];
        for (i, di) in d.iter_mut().enumerate() {
            let col = null4.column(i);
            *di = DVec3::new(
                col[3 * a] - col[3 * b],
                col[3 * a + 1] - col[3 * b + 1],
                col[3 * a + 2] - col[3 * b + 2],
            );
        }

        l[row] = [
            d[0].dot(d[0]),
            2.0 * d[0].dot(d[1]),
            d[1].dot(d[1]),
            2.0 * d[0].dot(d[2]),
            2.0 * d[1].dot(d[2]),
            d[2].dot(d[2]),
            2.0 * d[0].dot(d[3]),
            2.0 * d[1].dot(d[3]),
            2.0 * d[2].dot(d[3]),
            d[3].dot(d[3]),
        ];
    }
    l
}

/// Squared distances between the control points, in `CP_PAIRS` order.
fn rho_ctrlpts(cw: &[DVec3; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| cw[i].distance_squared(cw[j]))
}

/// Initial linearizations of the beta system.
#[derive(Debug, Clone, Copy)]
enum BetaApprox {
    /// `[b00, b01, b02, b03]`
    Four,
    /// `[b00, b01, b11]`
    Two,
    /// `[b00, b01, b11, b02, b12]`
    Three,
}

impl BetaApprox {
    fn columns(self) -> &'static [usize] {
        match self {
            BetaApprox::Four => &[0, 1, 3, 6],
            BetaApprox::Two => &[0, 1, 2],
            BetaApprox::Three => &[0, 1, 2, 3, 4],
        }
    }
}

/// Solve a column subset of `L · b = rho` and recover the betas.
/// Returns `None` if the least-squares solve fails.
fn estimate_beta(
    approx: BetaApprox,
    l: &[[f64; 10]; 6],
    rho: &DVector<f64>,
    tol_svd: f64,
) -> Option<[f64; 4]> {
    let cols = approx.columns();
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    let l_sub = DMatrix::<f64>::from_column_slice(6, cols.len(), &data);
    let x = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;

    let mut betas = [0.0; 4];
    match approx {
        BetaApprox::Four => {
            let s = x[0].abs().sqrt();
            if s == 0.0 {
                return None;
            }
            let sign = if x[0] < 0.0 { -1.0 } else { 1.0 };
            betas[0] = s;
            for i in 1..4 {
                betas[i] = sign * x[i] / s;
            }
        }
        BetaApprox::Two | BetaApprox::Three => {
            if x[0] < 0.0 {
                betas[0] = (-x[0]).sqrt();
                betas[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
            } else {
                betas[0] = x[0].sqrt();
                betas[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
            }
            if x[1] < 0.0 {
                betas[0] = -betas[0];
            }
            if let BetaApprox::Three = approx {
                if betas[0] == 0.0 {
                    return None;
                }
                betas[2] = x[3] / betas[0];
            }
        }
    }
    Some(betas)
}

/// Gauss-Newton refinement of the betas on the control-point distance constraints.
fn gauss_newton(beta_init: [f64; 4], l: &[[f64; 10]; 6], rho: &[f64; 6]) -> [f64; 4] {
    const ITERATIONS: usize = 5;

    let mut b = beta_init;
    for _ in 0..ITERATIONS {
        let mut a = DMatrix::<f64>::zeros(6, 4);
        let mut r = DVector::<f64>::zeros(6);
        for (i, li) in l.iter().enumerate() {
            a[(i, 0)] = 2.0 * li[0] * b[0] + li[1] * b[1] + li[3] * b[2] + li[6] * b[3];
            a[(i, 1)] = li[1] * b[0] + 2.0 * li[2] * b[1] + li[4] * b[2] + li[7] * b[3];
            a[(i, 2)] = li[3] * b[0] + li[4] * b[1] + 2.0 * li[5] * b[2] + li[8] * b[3];
            a[(i, 3)] = li[6] * b[0] + li[7] * b[1] + li[8] * b[2] + 2.0 * li[9] * b[3];

            let quad = li[0] * b[0] * b[0]
                + li[1] * b[0] * b[1]
                + li[2] * b[1] * b[1]
                + li[3] * b[0] * b[2]
                + li[4] * b[1] * b[2]
                + li[5] * b[2] * b[2]
                + li[6] * b[0] * b[3]
                + li[7] * b[1] * b[3]
                + li[8] * b[2] * b[3]
                + li[9] * b[3] * b[3];
            r[i] = rho[i] - quad;
        }

        let Ok(dx) = a.svd(true, true).solve(&r, 1e-15) else {
            break;
        };
        for (bi, di) in b.iter_mut().zip(dx.iter()) {
            *bi += di;
        }
        if dx.norm() < 1e-14 {
            break;
        }
    }
    b
}

/// Recover `(R, t)` from a beta vector.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    world: &[DVec3],
    alphas: &[[f64; 4]],
) -> Result<(DMat3, DVec3), PnPError> {
    let beta_vec = DVector::from_column_slice(betas);
    let cc_flat = null4 * beta_vec;

    let mut ccs = [DVec3::ZERO; 4];
    for (i, cc) in ccs.iter_mut().enumerate() {
        *cc = DVec3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]);
    }

    let mut pcs: Vec<DVec3> = alphas
        .iter()
        .map(|a| ccs[0] * a[0] + ccs[1] * a[1] + ccs[2] * a[2] + ccs[3] * a[3])
        .collect();

    // the object has to be in front of the camera
    if pcs[0].z < 0.0 {
        for p in &mut pcs {
            *p = -*p;
        }
    }

    umeyama(world, &pcs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::rvec_to_matrix;
    use approx::assert_relative_eq;

    fn intrinsics() -> DMat3 {
        DMat3::from_cols(
            DVec3::new(800.0, 0.0, 0.0),
            DVec3::new(0.0, 800.0, 0.0),
            DVec3::new(640.0, 480.0, 1.0),
        )
    }

    fn object_points() -> Vec<DVec3> {
        vec![
            DVec3::new(0.1, 0.2, 0.05),
            DVec3::new(-0.15, 0.1, -0.1),
            DVec3::new(0.2, -0.1, 0.12),
            DVec3::new(-0.05, -0.2, 0.0),
            DVec3::new(0.0, 0.0, 0.2),
            DVec3::new(0.12, 0.08, -0.15),
            DVec3::new(-0.2, -0.05, 0.08),
            DVec3::new(0.05, -0.12, -0.07),
        ]
    }

    fn project(world: &[DVec3], r: &DMat3, t: DVec3, k: &DMat3) -> Vec<DVec2> {
        world
            .iter()
            .map(|p| {
                let pc = *r * *p + t;
                DVec2::new(
                    k.x_axis.x * pc.x / pc.z + k.z_axis.x,
                    k.y_axis.y * pc.y / pc.z + k.z_axis.y,
                )
            })
            .collect()
    }

    #[test]
    fn test_barycentric_reconstructs_points() -> Result<(), PnPError> {
        let world = object_points();
        let cw = select_control_points(&world, 1e-4)?;
        let alphas = compute_barycentric(&world, &cw, 1e-12)?;
        for (p, a) in world.iter().zip(alphas.iter()) {
            let recon = cw[0] * a[0] + cw[1] * a[1] + cw[2] * a[2] + cw[3] * a[3];
            assert_relative_eq!(recon.x, p.x, epsilon = 1e-12);
            assert_relative_eq!(recon.y, p.y, epsilon = 1e-12);
            assert_relative_eq!(recon.z, p.z, epsilon = 1e-12);
            assert_relative_eq!(a.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_build_m_rows() -> Result<(), PnPError> {
        let world = object_points();
        let k = intrinsics();
        let image = project(&world, &DMat3::IDENTITY, DVec3::new(0.0, 0.0, 2.0), &k);
        let cw = select_control_points(&world, 1e-4)?;
        let alphas = compute_barycentric(&world, &cw, 1e-12)?;
        let m = build_m(&alphas, &image, &k);
        assert_eq!(m.nrows(), 2 * world.len());
        assert_eq!(m.ncols(), 12);
        for j in 0..4 {
            assert_relative_eq!(m[(0, 3 * j)], alphas[0][j] * 800.0);
            assert_relative_eq!(m[(0, 3 * j + 1)], 0.0);
            assert_relative_eq!(m[(1, 3 * j + 1)], alphas[0][j] * 800.0);
            assert_relative_eq!(m[(1, 3 * j + 2)], alphas[0][j] * (480.0 - image[0].y));
        }
        Ok(())
    }

    #[test]
    fn test_solve_epnp_noiseless() -> Result<(), PnPError> {
        let world = object_points();
        let k = intrinsics();
        let r = rvec_to_matrix(DVec3::new(0.3, -0.5, 0.2));
        let t = DVec3::new(0.1, -0.05, 1.5);
        let image = project(&world, &r, t, &k);

        let result = EPnP::solve(&world, &image, &k, &EPnPParams::default())?;

        let r_est = result.rotation.to_cols_array();
        for (a, b) in r_est.iter().zip(r.to_cols_array().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        assert_relative_eq!(result.translation.x, t.x, epsilon = 1e-5);
        assert_relative_eq!(result.translation.y, t.y, epsilon = 1e-5);
        assert_relative_eq!(result.translation.z, t.z, epsilon = 1e-5);
        assert!(result.reproj_rmse.is_some_and(|e| e < 1e-3));
        Ok(())
    }

    #[test]
    fn test_solve_epnp_refined() -> Result<(), PnPError> {
        let world = object_points();
        let k = intrinsics();
        let r = rvec_to_matrix(DVec3::new(-0.2, 0.4, 1.2));
        let t = DVec3::new(-0.2, 0.1, 2.5);
        let image = project(&world, &r, t, &k);

        let result = EPnP::solve(&world, &image, &k, &EPnPParams::refined())?;
        assert_relative_eq!(result.rvec.x, -0.2, epsilon = 1e-6);
        assert_relative_eq!(result.rvec.y, 0.4, epsilon = 1e-6);
        assert_relative_eq!(result.rvec.z, 1.2, epsilon = 1e-6);
        assert!(result.reproj_rmse.is_some_and(|e| e < 1e-6));
        Ok(())
    }

    #[test]
    fn test_coplanar_is_degenerate() {
        let world: Vec<DVec3> = (0..6)
            .map(|i| {
                let a = i as f64;
                DVec3::new(a.cos(), a.sin(), 0.0)
            })
            .collect();
        let image = vec![DVec2::new(320.0, 240.0); world.len()];
        let res = EPnP::solve(&world, &image, &intrinsics(), &EPnPParams::default());
        assert!(matches!(res, Err(PnPError::DegenerateGeometry { .. })));
    }

    #[test]
    fn test_collinear_is_degenerate() {
        let world: Vec<DVec3> = (0..5).map(|i| DVec3::splat(i as f64)).collect();
        let image = vec![DVec2::new(320.0, 240.0); world.len()];
        let res = EPnP::solve(&world, &image, &intrinsics(), &EPnPParams::default());
        assert!(matches!(res, Err(PnPError::DegenerateGeometry { .. })));
    }
}
