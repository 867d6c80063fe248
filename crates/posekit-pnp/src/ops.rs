use glam::{DMat3, DQuat, DVec2, DVec3};
use nalgebra::{Matrix3, SymmetricEigen, SVD};

use crate::pnp::PnPError;

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[DVec3]) -> DVec3 {
    let n = pts.len() as f64;
    pts.iter().copied().fold(DVec3::ZERO, |acc, p| acc + p) / n
}

/// Principal axes of a point set, sorted by decreasing spread.
///
/// Returns `(sigma, axis)` pairs where `sigma` is the standard deviation of
/// the points along the unit vector `axis`.
pub(crate) fn principal_axes(pts: &[DVec3], centroid: DVec3) -> [(f64, DVec3); 3] {
    let n = pts.len() as f64;
    let mut cov = Matrix3::<f64>::zeros();
    for p in pts {
        let d = *p - centroid;
        let d = nalgebra::Vector3::new(d.x, d.y, d.z);
        cov += d * d.transpose();
    }
    cov /= n;

    let eig = SymmetricEigen::new(cov);
    let mut axes: Vec<(f64, DVec3)> = (0..3)
        .map(|i| {
            let v = eig.eigenvectors.column(i);
            (eig.eigenvalues[i].max(0.0).sqrt(), DVec3::new(v[0], v[1], v[2]))
        })
        .collect();
    axes.sort_by(|a, b| b.0.total_cmp(&a.0));
    [axes[0], axes[1], axes[2]]
}

/// Compute squared reprojection error for a single correspondence.
/// Returns `None` for points with non-positive depth.
pub(crate) fn project_sq_error(
    world_point: &DVec3,
    image_point: &DVec2,
    r_mat: &DMat3,
    t_vec: &DVec3,
    k: &DMat3,
) -> Option<f64> {
    let pc = *r_mat * *world_point + *t_vec;
    if pc.z <= f64::EPSILON {
        return None;
    }
    let inv_z = 1.0 / pc.z;
    let u_hat = k.x_axis.x * pc.x * inv_z + k.z_axis.x;
    let v_hat = k.y_axis.y * pc.y * inv_z + k.z_axis.y;
    let du = u_hat - image_point.x;
    let dv = v_hat - image_point.y;
    Some(du.mul_add(du, dv * dv))
}

/// Root-mean-square reprojection error in pixels.
///
/// A point behind the camera makes the error infinite.
pub(crate) fn reprojection_rmse(
    world: &[DVec3],
    image: &[DVec2],
    r_mat: &DMat3,
    t_vec: &DVec3,
    k: &DMat3,
) -> f64 {
    let mut sum_sq = 0.0;
    for (pw, uv) in world.iter().zip(image.iter()) {
        match project_sq_error(pw, uv, r_mat, t_vec, k) {
            Some(err2) => sum_sq += err2,
            None => return f64::INFINITY,
        }
    }
    (sum_sq / world.len() as f64).sqrt()
}

/// Whether every point lies in front of the camera.
pub(crate) fn all_positive_depths(world: &[DVec3], r_mat: &DMat3, t_vec: &DVec3) -> bool {
    world.iter().all(|pw| (*r_mat * *pw + *t_vec).z > 0.0)
}

/// Umeyama/Kabsch alignment without scale: `dst ≈ R * src + t`.
pub(crate) fn umeyama(src: &[DVec3], dst: &[DVec3]) -> Result<(DMat3, DVec3), PnPError> {
    if src.len() != dst.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }

    let mu_s = compute_centroid(src);
    let mu_d = compute_centroid(dst);

    // H = sum (dst_c)(src_c)^T
    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let sc = *s - mu_s;
        let dc = *d - mu_d;
        h += nalgebra::Vector3::new(dc.x, dc.y, dc.z) * nalgebra::RowVector3::new(sc.x, sc.y, sc.z);
    }

    let svd = SVD::new(h, true, true);
    let smallest = svd.singular_values.imin();
    let Some(mut u) = svd.u else {
        return Err(PnPError::SvdFailed("failed to compute U in SVD".to_string()));
    };
    let Some(v_t) = svd.v_t else {
        return Err(PnPError::SvdFailed("failed to compute V^T in SVD".to_string()));
    };

    if (u * v_t).determinant() < 0.0 {
        u.column_mut(smallest).neg_mut();
    }
    let r = from_na(&(u * v_t));
    let t = mu_d - r * mu_s;
    Ok((r, t))
}

/// Rotation vector (axis * angle) to rotation matrix.
pub fn rvec_to_matrix(rvec: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(rvec))
}

/// Rotation matrix to rotation vector (axis * angle), angle in `[0, π]`.
pub fn matrix_to_rvec(r: &DMat3) -> DVec3 {
    let mut q = DQuat::from_mat3(r).normalize();
    if q.w < 0.0 {
        q = -q;
    }
    let v = DVec3::new(q.x, q.y, q.z);
    let s = v.length();
    if s < 1e-12 {
        // first-order expansion around the identity
        return v * 2.0;
    }
    v * (2.0 * s.atan2(q.w) / s)
}

pub(crate) fn from_na(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols_slice(m.as_slice())
}
