//! Test-set metadata, reference keypoints and keypoint predictions on disk.
//!
//! A test set is a directory of `meta_<id>.json` files, one per image:
//!
//! ```json
//! {
//!   "pose": [w, x, y, z],
//!   "position": [x, y, z],
//!   "keypoints": [[x, y], ...],
//!   "bboxes": {"cygnus": {"xmin": 0, "xmax": 10, "ymin": 0, "ymax": 10}}
//! }
//! ```
//!
//! `keypoints` are unit image coordinates and optional; unknown fields are ignored.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use glam::{DVec2, DVec3};
use posekit_pnp::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Ground truth of one test image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMeta {
    /// Rotation quaternion.
    pub pose: [f64; 4],
    /// Object position in the camera frame.
    pub position: [f64; 3],
    /// Keypoint projections in unit image coordinates.
    #[serde(default)]
    pub keypoints: Option<Vec<[f64; 2]>>,
    /// Named bounding boxes in full-image pixels.
    #[serde(default)]
    pub bboxes: HashMap<String, BoundingBox>,
}

/// A test sample: its id and ground truth.
#[derive(Debug, Clone)]
pub struct Sample {
    /// The part of the file name after `meta_`.
    pub id: String,
    /// Path of the metadata file.
    pub path: PathBuf,
    /// Parsed metadata.
    pub meta: SampleMeta,
}

/// All samples of a test directory, sorted by id.
#[derive(Debug, Clone)]
pub struct Dataset {
    root: PathBuf,
    samples: Vec<Sample>,
}

impl Dataset {
    /// Load every `meta_*.json` file directly inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, EvalError> {
        let root = dir.as_ref().to_path_buf();

        let mut samples = Vec::new();
        for entry in walkdir::WalkDir::new(&root).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(id) = sample_id(entry.path()) else {
                continue;
            };
            let file = std::fs::File::open(entry.path())?;
            let meta: SampleMeta = serde_json::from_reader(std::io::BufReader::new(file))?;
            samples.push(Sample {
                id,
                path: entry.path().to_path_buf(),
                meta,
            });
        }

        if samples.is_empty() {
            return Err(EvalError::EmptyDataset(root));
        }

        samples.sort_by(|a, b| id_order(&a.id, &b.id));
        log::info!("loaded {} samples from {}", samples.len(), root.display());

        Ok(Self { root, samples })
    }

    /// The dataset directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Samples sorted by id.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether there are no samples; never true for an opened dataset.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// `meta_<id>.json` -> `<id>`.
fn sample_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_prefix("meta_")?.strip_suffix(".json")?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Numeric ids in numeric order, then the rest lexicographically.
fn id_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Read the 3D reference keypoints of the object.
///
/// `.json` files hold `[[x, y, z], ...]`; any other file is read as text with
/// numbers separated by whitespace or commas, three per point. With `limit`
/// only the first `limit` points are kept.
pub fn read_reference_points(
    path: impl AsRef<Path>,
    limit: Option<usize>,
) -> Result<Vec<DVec3>, EvalError> {
    let path = path.as_ref();
    let invalid = |reason: String| EvalError::InvalidReferencePoints {
        path: path.to_path_buf(),
        reason,
    };

    let contents = std::fs::read_to_string(path)?;
    let mut points: Vec<DVec3> = if path.extension().is_some_and(|ext| ext == "json") {
        let rows: Vec<[f64; 3]> = serde_json::from_str(&contents)?;
        rows.into_iter().map(DVec3::from_array).collect()
    } else {
        let values = contents
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|e| invalid(format!("cannot parse {s:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() % 3 != 0 {
            return Err(invalid(format!(
                "{} values is not a multiple of 3",
                values.len()
            )));
        }
        values
            .chunks_exact(3)
            .map(|c| DVec3::new(c[0], c[1], c[2]))
            .collect()
    };

    if let Some(limit) = limit {
        if points.len() < limit {
            return Err(invalid(format!(
                "{} points requested, file has {}",
                limit,
                points.len()
            )));
        }
        points.truncate(limit);
    }
    if let Some(index) = points.iter().position(|p| !p.is_finite()) {
        return Err(invalid(format!("point {index} is not finite")));
    }
    Ok(points)
}

/// Read predicted keypoints: a JSON object mapping sample id to `[[x, y], ...]`.
pub fn read_predictions(path: impl AsRef<Path>) -> Result<BTreeMap<String, Vec<DVec2>>, EvalError> {
    let file = std::fs::File::open(path)?;
    let raw: BTreeMap<String, Vec<[f64; 2]>> = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(raw
        .into_iter()
        .map(|(id, points)| (id, points.into_iter().map(DVec2::from_array).collect()))
        .collect())
}
