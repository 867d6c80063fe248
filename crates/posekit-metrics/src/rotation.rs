use glam::{DMat3, DQuat, DVec3};
use posekit_pnp::rvec_to_matrix;
use serde::{Deserialize, Serialize};

use crate::error::MetricsError;

/// Storage order of a quaternion given as four numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuaternionOrder {
    /// Scalar first, `[w, x, y, z]`.
    #[default]
    Wxyz,
    /// Scalar last, `[x, y, z, w]`.
    Xyzw,
}

impl QuaternionOrder {
    /// Build a unit quaternion from four numbers stored in this order.
    pub fn to_quat(&self, q: [f64; 4]) -> Result<DQuat, MetricsError> {
        let quat = match self {
            QuaternionOrder::Wxyz => DQuat::from_xyzw(q[1], q[2], q[3], q[0]),
            QuaternionOrder::Xyzw => DQuat::from_xyzw(q[0], q[1], q[2], q[3]),
        };
        let norm = quat.length();
        if !norm.is_finite() || norm < 1e-12 {
            return Err(MetricsError::InvalidRotation(format!(
                "quaternion {q:?} cannot be normalized"
            )));
        }
        Ok(quat / norm)
    }
}

/// Rotation matrix of a quaternion stored in `order`. The quaternion is normalized first.
pub fn quaternion_to_matrix(q: [f64; 4], order: QuaternionOrder) -> Result<DMat3, MetricsError> {
    Ok(DMat3::from_quat(order.to_quat(q)?))
}

/// Angle in radians of the relative rotation `R1ᵀ · R2`, in `[0, π]`.
///
/// Evaluated as `atan2(|skew(R1ᵀR2)|, (trace(R1ᵀR2) - 1) / 2)`, which agrees
/// with `arccos(clamp((trace - 1) / 2, -1, 1))` but does not lose precision
/// for angles near 0 and π. Swapping the arguments transposes `R1ᵀR2`, so the
/// result is exactly symmetric.
pub fn geodesic_distance(r1: &DMat3, r2: &DMat3) -> f64 {
    // m[i][j] = r1.col(i) · r2.col(j)
    let m = |i: usize, j: usize| r1.col(i).dot(r2.col(j));

    let trace = m(0, 0) + m(1, 1) + m(2, 2);
    let axis = DVec3::new(m(2, 1) - m(1, 2), m(0, 2) - m(2, 0), m(1, 0) - m(0, 1)) * 0.5;
    let angle = axis.length().atan2((trace - 1.0) * 0.5);
    angle.clamp(0.0, std::f64::consts::PI)
}

/// Geodesic error between an estimated rotation vector and a ground-truth quaternion.
pub fn rvec_geodesic_error(
    rvec: DVec3,
    quaternion: [f64; 4],
    order: QuaternionOrder,
) -> Result<f64, MetricsError> {
    let r_true = quaternion_to_matrix(quaternion, order)?;
    Ok(geodesic_distance(&rvec_to_matrix(rvec), &r_true))
}
