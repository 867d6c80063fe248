use glam::DVec3;
use posekit_metrics::{
    geodesic_distance, quaternion_to_matrix, score_pose, summarize, ErrorSummary, GroundTruthPose,
    MetricsError, QuaternionOrder,
};
use posekit_pnp::rvec_to_matrix;

#[test]
fn score_and_summarize_a_batch() -> Result<(), MetricsError> {
    let truths = [
        GroundTruthPose {
            quaternion: [1.0, 0.0, 0.0, 0.0],
            position: DVec3::new(0.0, 0.0, 10.0),
        },
        GroundTruthPose {
            quaternion: [0.0, 0.0, 0.0, 1.0],
            position: DVec3::new(3.0, 4.0, 0.0),
        },
    ];
    let estimates = [
        (DVec3::new(0.1, 0.0, 0.0), DVec3::new(0.0, 0.0, 11.0)),
        (DVec3::new(0.0, 0.0, std::f64::consts::PI - 0.3), DVec3::new(3.0, 4.0, 1.0)),
    ];

    let records = truths
        .iter()
        .zip(estimates.iter())
        .map(|(truth, (rvec, t))| score_pose(*rvec, *t, truth, QuaternionOrder::Wxyz))
        .collect::<Result<Vec<_>, _>>()?;

    let summary = summarize(&records)?;
    assert_eq!(summary.num_samples, 2);
    assert!((summary.rotation.mean - 0.2).abs() < 1e-9);
    assert!((summary.rotation.max - 0.3).abs() < 1e-9);
    assert!((summary.position.mean - 0.15).abs() < 1e-12);

    let json = serde_json::to_string(&summary).expect("serialize summary");
    let back: ErrorSummary = serde_json::from_str(&json).expect("deserialize summary");
    assert_eq!(back, summary);
    Ok(())
}

#[test]
fn geodesic_is_representation_invariant() -> Result<(), MetricsError> {
    let r = quaternion_to_matrix([0.9, 0.1, -0.3, 0.2], QuaternionOrder::Wxyz)?;
    let q = glam::DQuat::from_mat3(&r);
    let flipped = quaternion_to_matrix([-q.w, -q.x, -q.y, -q.z], QuaternionOrder::Wxyz)?;
    assert!(geodesic_distance(&r, &flipped) < 1e-12);
    let same = rvec_to_matrix(posekit_pnp::matrix_to_rvec(&r));
    assert!(geodesic_distance(&r, &same) < 1e-12);
    Ok(())
}
