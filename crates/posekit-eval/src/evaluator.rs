//! Batch evaluation: solve and score every sample of a dataset.

use std::collections::BTreeMap;

use glam::{DVec2, DVec3};
use indicatif::ParallelProgressIterator;
use posekit_metrics::{
    keypoint_pixel_errors, score_pose, summarize, ErrorRecord, ErrorSummary, GroundTruthPose,
};
use posekit_pnp::crop::unit_to_pixels;
use posekit_pnp::{CropWindow, KeypointPoseSolver};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EvalConfig;
use crate::dataset::{Dataset, Sample};
use crate::error::{EvalError, SampleError};

/// Outcome of one scored sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    /// Sample id.
    pub id: String,
    /// Pose errors.
    #[serde(flatten)]
    pub record: ErrorRecord,
    /// Estimated rotation vector.
    pub rvec: [f64; 3],
    /// Estimated translation.
    pub translation: [f64; 3],
    /// Number of RANSAC inliers, or all keypoints for a direct solve.
    pub num_inliers: usize,
    /// Reprojection RMSE of the estimate in pixels; absent when a fitted
    /// point lies behind the camera.
    #[serde(default)]
    pub reproj_rmse: Option<f64>,
}

/// A sample that could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSample {
    /// Sample id.
    pub id: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Results of a batch run, in dataset order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalOutcome {
    /// Scored samples.
    pub results: Vec<SampleResult>,
    /// Samples that failed, with the reason.
    pub skipped: Vec<SkippedSample>,
}

impl EvalOutcome {
    /// Aggregate the scored samples.
    ///
    /// Fails when no sample was scored.
    pub fn summary(&self) -> Result<ErrorSummary, EvalError> {
        let records: Vec<ErrorRecord> = self.results.iter().map(|r| r.record.clone()).collect();
        Ok(summarize(&records)?)
    }
}

/// Solves and scores samples against a fixed set of reference keypoints.
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvalConfig,
    reference: Vec<DVec3>,
    solver: KeypointPoseSolver,
    show_progress: bool,
}

impl Evaluator {
    /// Create an evaluator.
    ///
    /// The reference keypoints are truncated to `config.num_keypoints`.
    pub fn new(config: EvalConfig, mut reference: Vec<DVec3>) -> Result<Self, EvalError> {
        config.validate()?;
        if let Some(n) = config.num_keypoints {
            if reference.len() < n {
                return Err(EvalError::InvalidConfig(format!(
                    "num_keypoints is {n} but only {} reference points were given",
                    reference.len()
                )));
            }
            reference.truncate(n);
        }
        if reference.len() < 4 {
            return Err(EvalError::InvalidConfig(format!(
                "at least 4 reference points are needed, got {}",
                reference.len()
            )));
        }
        let solver = KeypointPoseSolver::new(config.camera_model()?, config.solver_params());
        Ok(Self {
            config,
            reference,
            solver,
            show_progress: false,
        })
    }

    /// Draw a progress bar while evaluating.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// The reference keypoints in use.
    pub fn reference(&self) -> &[DVec3] {
        &self.reference
    }

    /// Solve and score a single sample.
    pub fn evaluate_sample(
        &self,
        sample: &Sample,
        prediction: Option<&[DVec2]>,
    ) -> Result<SampleResult, SampleError> {
        let prediction = prediction.ok_or(SampleError::MissingPrediction)?;
        let n = self.reference.len();
        let prediction = &prediction[..prediction.len().min(n)];

        let window = if self.config.crop_correction {
            let bbox = sample
                .meta
                .bboxes
                .get(&self.config.bbox_key)
                .ok_or_else(|| SampleError::MissingBoundingBox(self.config.bbox_key.clone()))?;
            Some(CropWindow::from_bbox(
                bbox,
                self.config.crop_size,
                self.config.bbox_padding,
            )?)
        } else {
            None
        };

        let observed =
            self.config
                .keypoint_frame
                .to_image(prediction, self.config.crop_size, window.as_ref());
        let pose = self.solver.solve(&self.reference, &observed, None)?;

        let truth = GroundTruthPose {
            quaternion: sample.meta.pose,
            position: DVec3::from_array(sample.meta.position),
        };
        let mut record = score_pose(
            pose.rvec,
            pose.translation,
            &truth,
            self.config.quaternion_order,
        )?;

        if let Some(keypoints) = &sample.meta.keypoints {
            let truth_px = self.ground_truth_pixels(keypoints);
            if truth_px.len() == observed.len() {
                record = record.with_keypoint_errors(keypoint_pixel_errors(&observed, &truth_px)?);
            } else {
                log::warn!(
                    "sample {}: {} ground-truth keypoints for {} predictions, keypoint errors not scored",
                    sample.id,
                    truth_px.len(),
                    observed.len()
                );
            }
        }

        Ok(SampleResult {
            id: sample.id.clone(),
            record,
            rvec: pose.rvec.to_array(),
            translation: pose.translation.to_array(),
            num_inliers: pose.inliers.as_ref().map_or(n, Vec::len),
            reproj_rmse: pose.reproj_rmse,
        })
    }

    /// Unit keypoints of the metadata as full-image pixels, one per reference point.
    fn ground_truth_pixels(&self, keypoints: &[[f64; 2]]) -> Vec<DVec2> {
        let [w, h] = self.config.camera.image_size;
        keypoints
            .iter()
            .take(self.reference.len())
            .map(|&[a, b]| {
                let p = if self.config.swap_keypoint_axes {
                    DVec2::new(b, a)
                } else {
                    DVec2::new(a, b)
                };
                unit_to_pixels(p, (w, h))
            })
            .collect()
    }

    /// Evaluate every sample of `dataset` in parallel.
    ///
    /// Samples that cannot be solved or scored are logged and reported in
    /// [`EvalOutcome::skipped`]; they never abort the run.
    pub fn evaluate(
        &self,
        dataset: &Dataset,
        predictions: &BTreeMap<String, Vec<DVec2>>,
    ) -> Result<EvalOutcome, EvalError> {
        let outcome = match self.config.num_threads {
            Some(num_threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()?
                .install(|| self.run(dataset, predictions)),
            None => self.run(dataset, predictions),
        };

        log::info!(
            "evaluated {} samples: {} scored, {} skipped",
            dataset.len(),
            outcome.results.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    fn run(&self, dataset: &Dataset, predictions: &BTreeMap<String, Vec<DVec2>>) -> EvalOutcome {
        let pb = if self.show_progress {
            indicatif::ProgressBar::new(dataset.len() as u64)
        } else {
            indicatif::ProgressBar::hidden()
        };
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} ({eta}) {per_sec}",
        ) {
            pb.set_style(style.progress_chars("##>-"));
        }

        let evaluated: Vec<(String, Result<SampleResult, SampleError>)> = dataset
            .samples()
            .par_iter()
            .progress_with(pb)
            .map(|sample| {
                let prediction = predictions.get(&sample.id).map(Vec::as_slice);
                (sample.id.clone(), self.evaluate_sample(sample, prediction))
            })
            .collect();

        let mut outcome = EvalOutcome::default();
        for (id, result) in evaluated {
            match result {
                Ok(result) => outcome.results.push(result),
                Err(err) => {
                    log::warn!("skipping sample {id}: {err}");
                    outcome.skipped.push(SkippedSample {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SampleMeta;
    use approx::assert_relative_eq;
    use posekit_pnp::{rvec_to_matrix, KeypointFrame};
    use std::collections::HashMap;

    fn reference() -> Vec<DVec3> {
        vec![
            DVec3::new(0.5, 0.4, 0.1),
            DVec3::new(-0.6, 0.3, -0.2),
            DVec3::new(0.4, -0.5, 0.3),
            DVec3::new(-0.3, -0.4, -0.1),
            DVec3::new(0.1, 0.1, 0.6),
            DVec3::new(0.2, 0.5, -0.5),
            DVec3::new(-0.5, -0.1, 0.4),
            DVec3::new(0.3, -0.2, -0.4),
        ]
    }

    fn config() -> EvalConfig {
        EvalConfig {
            keypoint_frame: KeypointFrame::Image,
            use_ransac: false,
            ..Default::default()
        }
    }

    fn sample(evaluator: &Evaluator) -> (Sample, Vec<DVec2>) {
        let rvec = DVec3::new(0.3, -0.2, 0.5);
        let t = DVec3::new(0.1, -0.2, 9.0);
        let r = rvec_to_matrix(rvec);
        let camera = evaluator.solver.camera();
        let pixels: Vec<DVec2> = evaluator
            .reference()
            .iter()
            .filter_map(|p| camera.project(r * *p + t))
            .collect();
        let q = glam::DQuat::from_scaled_axis(rvec);
        let meta = SampleMeta {
            pose: [q.w, q.x, q.y, q.z],
            position: t.to_array(),
            keypoints: Some(pixels.iter().map(|p| [p.x / 1024.0, p.y / 1024.0]).collect()),
            bboxes: HashMap::new(),
        };
        let sample = Sample {
            id: "7".to_string(),
            path: "meta_7.json".into(),
            meta,
        };
        (sample, pixels)
    }

    #[test]
    fn test_new_truncates_reference() -> Result<(), EvalError> {
        let config = EvalConfig {
            num_keypoints: Some(6),
            ..config()
        };
        let evaluator = Evaluator::new(config, reference())?;
        assert_eq!(evaluator.reference().len(), 6);

        let config = EvalConfig {
            num_keypoints: Some(9),
            ..self::config()
        };
        assert!(matches!(
            Evaluator::new(config, reference()),
            Err(EvalError::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn test_evaluate_sample_exact() -> Result<(), Box<dyn std::error::Error>> {
        let evaluator = Evaluator::new(config(), reference())?;
        let (sample, pixels) = sample(&evaluator);
        let result = evaluator.evaluate_sample(&sample, Some(&pixels))?;
        assert_relative_eq!(result.record.rotation_error, 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.record.position_error, 0.0, epsilon = 1e-6);
        assert_eq!(result.record.keypoint_errors.len(), 8);
        for e in &result.record.keypoint_errors {
            assert_relative_eq!(*e, 0.0, epsilon = 1e-9);
        }
        assert_eq!(result.num_inliers, 8);
        assert!(result.reproj_rmse.is_some_and(|e| e < 1e-6));
        Ok(())
    }

    #[test]
    fn test_short_ground_truth_keypoints_keep_pose_score() -> Result<(), Box<dyn std::error::Error>> {
        let evaluator = Evaluator::new(config(), reference())?;
        let (mut sample, pixels) = sample(&evaluator);
        if let Some(keypoints) = sample.meta.keypoints.as_mut() {
            keypoints.truncate(5);
        }
        let result = evaluator.evaluate_sample(&sample, Some(&pixels))?;
        assert!(result.record.keypoint_errors.is_empty());
        assert_relative_eq!(result.record.rotation_error, 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.record.position_error, 0.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_sample_result_without_rmse_roundtrips() -> Result<(), serde_json::Error> {
        let result = SampleResult {
            id: "3".to_string(),
            record: ErrorRecord {
                rotation_error: 0.1,
                position_error: 0.01,
                keypoint_errors: Vec::new(),
            },
            rvec: [0.1, 0.2, 0.3],
            translation: [0.0, 0.0, 10.0],
            num_inliers: 6,
            reproj_rmse: None,
        };
        let json = serde_json::to_string(&result)?;
        let back: SampleResult = serde_json::from_str(&json)?;
        assert_eq!(back, result);
        Ok(())
    }

    #[test]
    fn test_evaluate_sample_failures() -> Result<(), EvalError> {
        let evaluator = Evaluator::new(config(), reference())?;
        let (sample, pixels) = sample(&evaluator);
        assert!(matches!(
            evaluator.evaluate_sample(&sample, None),
            Err(SampleError::MissingPrediction)
        ));
        assert!(matches!(
            evaluator.evaluate_sample(&sample, Some(&pixels[..3])),
            Err(SampleError::Pnp(_))
        ));

        let cropped = Evaluator::new(
            EvalConfig {
                crop_correction: true,
                ..config()
            },
            reference(),
        )?;
        assert!(matches!(
            cropped.evaluate_sample(&sample, Some(&pixels)),
            Err(SampleError::MissingBoundingBox(_))
        ));
        Ok(())
    }

    #[test]
    fn test_empty_outcome_has_no_summary() {
        assert!(matches!(
            EvalOutcome::default().summary(),
            Err(EvalError::Metrics(posekit_metrics::MetricsError::NoSamples))
        ));
    }
}
