use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::scoring::ErrorRecord;

/// Summary statistics of one error field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Arithmetic mean.
    pub mean: f64,
    /// Median; the mean of the two middle values for even counts.
    pub median: f64,
    /// Largest value.
    pub max: f64,
    /// Smallest value.
    pub min: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Number of values summarized.
    pub count: usize,
}

impl FieldSummary {
    /// Summarize a set of values; `None` when empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(Self {
            mean,
            median,
            max: sorted[sorted.len() - 1],
            min: sorted[0],
            std_dev: variance.sqrt(),
            count: values.len(),
        })
    }

    /// The same statistics with every value multiplied by `factor`, e.g. for unit conversion.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            mean: self.mean * factor,
            median: self.median * factor,
            max: self.max * factor,
            min: self.min * factor,
            std_dev: self.std_dev * factor.abs(),
            count: self.count,
        }
    }
}

/// Summary of a set of error records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Number of records summarized.
    pub num_samples: usize,
    /// Rotation error statistics, radians.
    pub rotation: FieldSummary,
    /// Relative position error statistics.
    pub position: FieldSummary,
    /// Pixel error statistics over every keypoint of every record, if any
    /// record carries keypoint errors.
    pub keypoints: Option<FieldSummary>,
}

impl ErrorSummary {
    /// Rotation error statistics in degrees.
    pub fn rotation_deg(&self) -> FieldSummary {
        self.rotation.scaled(1.0_f64.to_degrees())
    }
}

/// Aggregate error records into per-field statistics.
///
/// Fails with [`MetricsError::NoSamples`] on empty input.
pub fn summarize(records: &[ErrorRecord]) -> Result<ErrorSummary, MetricsError> {
    let rotation: Vec<f64> = records.iter().map(|r| r.rotation_error).collect();
    let position: Vec<f64> = records.iter().map(|r| r.position_error).collect();
    let keypoints: Vec<f64> = records
        .iter()
        .flat_map(|r| r.keypoint_errors.iter().copied())
        .collect();

    let (Some(rotation), Some(position)) = (
        FieldSummary::from_values(&rotation),
        FieldSummary::from_values(&position),
    ) else {
        return Err(MetricsError::NoSamples);
    };

    Ok(ErrorSummary {
        num_samples: records.len(),
        rotation,
        position,
        keypoints: FieldSummary::from_values(&keypoints),
    })
}
