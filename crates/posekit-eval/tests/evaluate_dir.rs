use std::collections::BTreeMap;
use std::path::Path;

use approx::assert_relative_eq;
use glam::{DQuat, DVec2, DVec3};
use posekit_eval::{
    format_summary_table, read_predictions, read_reference_points, Dataset, EvalConfig,
    EvalError, EvalReport, Evaluator, RunMetadata,
};
use posekit_pnp::crop::crop_to_normalized;
use posekit_pnp::{BoundingBox, CropWindow, KeypointFrame};

const REFERENCE: &str = "\
0.0 0.0 0.0
1.2 0.4 -0.3
-1.1 0.5 0.2
0.3 -1.3 0.4
-0.4 -0.9 -0.8
0.8 0.9 0.9
-0.7 1.1 -0.6
0.5 -0.2 1.3
-0.2 0.3 -1.4
1.0 -0.8 -0.5
";

const FOCAL: f64 = 1422.0;
const SIZE: [u32; 2] = [1920, 1200];

fn config() -> EvalConfig {
    let mut config = EvalConfig {
        keypoint_frame: KeypointFrame::Normalized,
        crop_correction: true,
        crop_size: 768.0,
        ..Default::default()
    };
    config.camera.image_size = SIZE;
    config.ransac.random_seed = Some(11);
    config
}

fn project(reference: &[DVec3], rvec: DVec3, t: DVec3) -> Vec<DVec2> {
    let q = DQuat::from_scaled_axis(rvec);
    reference
        .iter()
        .map(|p| {
            let pc = q * *p + t;
            DVec2::new(
                FOCAL * pc.x / pc.z + SIZE[0] as f64 / 2.0,
                FOCAL * pc.y / pc.z + SIZE[1] as f64 / 2.0,
            )
        })
        .collect()
}

/// Write one sample to `dir` and return its prediction in normalized crop coordinates.
fn write_sample(
    dir: &Path,
    id: &str,
    reference: &[DVec3],
    rvec: DVec3,
    t: DVec3,
) -> Result<Vec<[f64; 2]>, Box<dyn std::error::Error>> {
    let pixels = project(reference, rvec, t);
    let (min, max) = pixels.iter().fold(
        (DVec2::splat(f64::MAX), DVec2::splat(f64::MIN)),
        |(lo, hi), p| (lo.min(*p), hi.max(*p)),
    );
    let bbox = BoundingBox {
        xmin: min.x,
        xmax: max.x,
        ymin: min.y,
        ymax: max.y,
    };
    let q = DQuat::from_scaled_axis(rvec);
    let unit: Vec<[f64; 2]> = pixels
        .iter()
        .map(|p| [p.x / SIZE[0] as f64, p.y / SIZE[1] as f64])
        .collect();
    let meta = serde_json::json!({
        "pose": [q.w, q.x, q.y, q.z],
        "position": t.to_array(),
        "keypoints": unit,
        "bboxes": {"cygnus": bbox},
    });
    std::fs::write(
        dir.join(format!("meta_{id}.json")),
        serde_json::to_string_pretty(&meta)?,
    )?;

    let window = CropWindow::from_bbox(&bbox, 768.0, 1.25)?;
    Ok(pixels
        .iter()
        .map(|&p| crop_to_normalized(window.image_to_crop(p), 768.0).to_array())
        .collect())
}

#[test]
fn evaluates_directory_and_skips_broken_sample() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let data = dir.path().join("test");
    std::fs::create_dir(&data)?;
    let reference_path = dir.path().join("keypoints.txt");
    std::fs::write(&reference_path, REFERENCE)?;
    let reference = read_reference_points(&reference_path, None)?;

    let poses = [
        (DVec3::new(0.6, -1.1, 0.4), DVec3::new(0.8, -0.3, 12.0)),
        (DVec3::new(-0.3, 0.2, 2.0), DVec3::new(-0.5, 0.4, 9.0)),
        (DVec3::new(1.0, 0.2, -0.7), DVec3::new(1.5, -0.8, 14.0)),
    ];
    let mut predictions = serde_json::Map::new();
    for (i, (rvec, t)) in poses.iter().enumerate() {
        let id = (i + 1).to_string();
        let prediction = write_sample(&data, &id, &reference, *rvec, *t)?;
        predictions.insert(id, serde_json::to_value(prediction)?);
    }
    // sample 4 has ground truth but only three predicted keypoints
    write_sample(&data, "4", &reference, poses[0].0, poses[0].1)?;
    predictions.insert("4".to_string(), serde_json::json!([[0.0, 0.0], [0.1, 0.1], [0.2, 0.2]]));

    let predictions_path = dir.path().join("predictions.json");
    std::fs::write(&predictions_path, serde_json::to_string(&predictions)?)?;

    let dataset = Dataset::open(&data)?;
    let predictions = read_predictions(&predictions_path)?;
    assert_eq!(dataset.len(), 4);

    let config = config();
    let evaluator = Evaluator::new(config.clone(), reference)?;
    let outcome = evaluator.evaluate(&dataset, &predictions)?;

    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].id, "4");

    for result in &outcome.results {
        assert_relative_eq!(result.record.rotation_error, 0.0, epsilon = 1e-4);
        assert_relative_eq!(result.record.position_error, 0.0, epsilon = 1e-4);
        assert_eq!(result.record.keypoint_errors.len(), 10);
        for e in &result.record.keypoint_errors {
            assert_relative_eq!(*e, 0.0, epsilon = 1e-6);
        }
        assert_eq!(result.num_inliers, 10);
    }

    let summary = outcome.summary()?;
    assert_eq!(summary.num_samples, 3);
    assert_relative_eq!(summary.rotation_deg().max, 0.0, epsilon = 1e-2);
    assert!(format_summary_table(&summary).starts_with("---- Geodesic Error Stats ----"));

    let report = EvalReport::new(RunMetadata::new(&data, config), outcome)?;
    let report_path = dir.path().join("report.json");
    report.write_json(&report_path)?;
    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report_path)?)?;
    assert_eq!(written["samples"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test]
fn run_without_predictions_scores_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let reference: Vec<DVec3> = REFERENCE
        .lines()
        .map(|line| {
            let v: Vec<f64> = line.split_whitespace().filter_map(|s| s.parse().ok()).collect();
            DVec3::new(v[0], v[1], v[2])
        })
        .collect();
    write_sample(
        dir.path(),
        "1",
        &reference,
        DVec3::new(0.1, 0.2, 0.3),
        DVec3::new(0.0, 0.0, 10.0),
    )?;

    let dataset = Dataset::open(dir.path())?;
    let evaluator = Evaluator::new(
        EvalConfig {
            num_threads: Some(2),
            ..config()
        },
        reference,
    )?;
    let outcome = evaluator.evaluate(&dataset, &BTreeMap::new())?;
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.skipped[0].reason, "no prediction for sample");
    assert!(matches!(outcome.summary(), Err(EvalError::Metrics(_))));
    Ok(())
}
