//! Keypoint coordinate frames and the conversions between them.
//!
//! The canonical frame used everywhere inside the solvers and the scorer is
//! **full-image pixel coordinates**: origin at the top-left pixel corner,
//! x to the right, y down. Keypoints produced in any other frame are mapped
//! into it once, through the functions in this module, before they reach a
//! solver.
//!
//! Frames:
//!
//! - `Normalized`: network output in `[-1, 1]` relative to a square crop.
//! - `Crop`: pixels of a square crop of side `crop_size`, cut around an
//!   object centroid and resized from a `bbox_size` window of the image.
//! - `Image`: full-image pixels (canonical).

use glam::DVec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for crop window construction.
#[derive(Debug, Error)]
pub enum CropError {
    /// A size was zero, negative or not finite.
    #[error("Invalid crop {name}: {value}")]
    InvalidSize {
        /// Which size was rejected.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The bounding box has no extent.
    #[error("Degenerate bounding box: xmin={xmin} xmax={xmax} ymin={ymin} ymax={ymax}")]
    DegenerateBoundingBox {
        /// Left edge.
        xmin: f64,
        /// Right edge.
        xmax: f64,
        /// Top edge.
        ymin: f64,
        /// Bottom edge.
        ymax: f64,
    },
}

/// Axis-aligned bounding box in full-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub xmin: f64,
    /// Right edge.
    pub xmax: f64,
    /// Top edge.
    pub ymin: f64,
    /// Bottom edge.
    pub ymax: f64,
}

impl BoundingBox {
    /// Centre of the box as `(x, y)`.
    pub fn center(&self) -> DVec2 {
        DVec2::new(
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    /// Length of the longer side.
    pub fn max_side(&self) -> f64 {
        (self.xmax - self.xmin).max(self.ymax - self.ymin)
    }
}

/// A square window of the full image that was resized to a square crop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropWindow {
    /// Window centre in full-image pixels, `(x, y)`.
    pub centroid: [f64; 2],
    /// Side of the window in full-image pixels.
    pub bbox_size: f64,
    /// Side of the resized crop in crop pixels.
    pub crop_size: f64,
}

impl CropWindow {
    /// Create a crop window.
    pub fn new(centroid: DVec2, bbox_size: f64, crop_size: f64) -> Result<Self, CropError> {
        check_size("bbox_size", bbox_size)?;
        check_size("crop_size", crop_size)?;
        if !centroid.is_finite() {
            return Err(CropError::InvalidSize {
                name: "centroid",
                value: if centroid.x.is_finite() { centroid.y } else { centroid.x },
            });
        }
        Ok(Self {
            centroid: centroid.to_array(),
            bbox_size,
            crop_size,
        })
    }

    /// Window centred on a bounding box, its side the longer box side times `padding`.
    ///
    /// The evaluation data uses `padding = 1.25`.
    pub fn from_bbox(bbox: &BoundingBox, crop_size: f64, padding: f64) -> Result<Self, CropError> {
        check_size("padding", padding)?;
        let side = bbox.max_side();
        if !(side.is_finite() && side > 0.0) {
            return Err(CropError::DegenerateBoundingBox {
                xmin: bbox.xmin,
                xmax: bbox.xmax,
                ymin: bbox.ymin,
                ymax: bbox.ymax,
            });
        }
        Self::new(bbox.center(), side * padding, crop_size)
    }

    /// Full-image pixels per crop pixel.
    pub fn scale(&self) -> f64 {
        self.bbox_size / self.crop_size
    }

    /// Top-left corner of the window in full-image pixels.
    pub fn origin(&self) -> DVec2 {
        DVec2::from_array(self.centroid) - DVec2::splat(self.bbox_size / 2.0)
    }

    /// Crop pixels to full-image pixels.
    pub fn crop_to_image(&self, p: DVec2) -> DVec2 {
        p * self.scale() + self.origin()
    }

    /// Full-image pixels to crop pixels; the exact inverse of [`Self::crop_to_image`].
    pub fn image_to_crop(&self, p: DVec2) -> DVec2 {
        (p - self.origin()) / self.scale()
    }
}

fn check_size(name: &'static str, value: f64) -> Result<(), CropError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CropError::InvalidSize { name, value })
    }
}

/// Normalized `[-1, 1]` coordinates to crop pixels.
pub fn normalized_to_crop(p: DVec2, crop_size: f64) -> DVec2 {
    let half = crop_size / 2.0;
    p * half + DVec2::splat(half)
}

/// Crop pixels to normalized `[-1, 1]` coordinates.
pub fn crop_to_normalized(p: DVec2, crop_size: f64) -> DVec2 {
    let half = crop_size / 2.0;
    (p - DVec2::splat(half)) / half
}

/// Unit `[0, 1]` coordinates to pixels of an image of `(width, height)`.
pub fn unit_to_pixels(p: DVec2, image_size: (u32, u32)) -> DVec2 {
    p * DVec2::new(image_size.0 as f64, image_size.1 as f64)
}

/// Pixels of an image of `(width, height)` to unit `[0, 1]` coordinates.
pub fn pixels_to_unit(p: DVec2, image_size: (u32, u32)) -> DVec2 {
    p / DVec2::new(image_size.0 as f64, image_size.1 as f64)
}

/// Frame a set of keypoints is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypointFrame {
    /// `[-1, 1]` relative to the crop.
    #[default]
    Normalized,
    /// Crop pixels.
    Crop,
    /// Full-image pixels.
    Image,
}

impl KeypointFrame {
    /// Map keypoints from this frame into full-image pixels.
    ///
    /// Without a `window` the crop is taken to be the image itself, i.e.
    /// crop pixels are returned unchanged.
    pub fn to_image(&self, points: &[DVec2], crop_size: f64, window: Option<&CropWindow>) -> Vec<DVec2> {
        let crop_to_image = |p: DVec2| match window {
            Some(w) => w.crop_to_image(p),
            None => p,
        };
        match self {
            KeypointFrame::Normalized => points
                .iter()
                .map(|&p| crop_to_image(normalized_to_crop(p, crop_size)))
                .collect(),
            KeypointFrame::Crop => points.iter().map(|&p| crop_to_image(p)).collect(),
            KeypointFrame::Image => points.to_vec(),
        }
    }
}
