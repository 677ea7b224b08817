//! Composite face-quality scoring.
//!
//! Seven independent sub-metrics, each normalized to [0, 1], are combined
//! with fixed weights. A sub-metric whose inputs are missing or degenerate
//! is `None` in the breakdown and contributes [`NEUTRAL_SCORE`] instead.

use crate::filters::{self, Crop};
use crate::types::BoundingBox;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

/// Stand-in value for a sub-metric that cannot be computed.
pub const NEUTRAL_SCORE: f32 = 0.5;

// --- Normalization constants ---
/// Face/image area ratio is scaled so a face covering 1% of the frame saturates.
const SIZE_RATIO_GAIN: f32 = 100.0;
const SHARPNESS_NORM: f32 = 800.0;
const OPTIMAL_MIDTONE: f32 = 120.0;
const CONTRAST_NORM: f32 = 60.0;
const SYMMETRY_SPAN_PX: f32 = 50.0;
const POSE_SPAN_PX: f32 = 30.0;
const NOISE_NORM: f32 = 100.0;

// Landmark order: [left_eye, right_eye, nose, left_mouth, right_mouth].
const LEFT_EYE: usize = 0;
const RIGHT_EYE: usize = 1;
const NOSE: usize = 2;

/// Relative weight of each sub-metric in the composite. Sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub size: f32,
    pub sharpness: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub symmetry: f32,
    pub pose: f32,
    pub noise: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            size: 0.25,
            sharpness: 0.25,
            brightness: 0.15,
            contrast: 0.15,
            symmetry: 0.10,
            pose: 0.05,
            noise: 0.05,
        }
    }
}

/// Per-metric scores. `None` marks a metric that fell back to neutral.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub size: Option<f32>,
    pub sharpness: Option<f32>,
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub symmetry: Option<f32>,
    pub pose: Option<f32>,
    pub noise: Option<f32>,
}

/// Composite score plus the breakdown it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub value: f32,
    pub breakdown: QualityBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    pub weights: QualityWeights,
}

impl QualityScorer {
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    /// Score a face in a color or grayscale image.
    pub fn score_image(
        &self,
        image: &DynamicImage,
        bbox: &BoundingBox,
        landmarks: Option<&[(f32, f32)]>,
    ) -> QualityScore {
        self.score(&image.to_luma8(), bbox, landmarks)
    }

    /// Score the face at `bbox` inside `image`. Never fails.
    pub fn score(
        &self,
        image: &GrayImage,
        bbox: &BoundingBox,
        landmarks: Option<&[(f32, f32)]>,
    ) -> QualityScore {
        let crop = filters::crop(image, bbox);
        let image_area = image.width() as f32 * image.height() as f32;

        let breakdown = QualityBreakdown {
            size: size_score(bbox.area(), image_area),
            sharpness: sharpness_score(&crop),
            brightness: brightness_score(&crop),
            contrast: contrast_score(&crop),
            symmetry: landmarks.and_then(symmetry_score),
            pose: landmarks.and_then(pose_score),
            noise: noise_score(&crop),
        };

        let value = self.composite(&breakdown);
        tracing::trace!(value, ?breakdown, "face quality");
        QualityScore { value, breakdown }
    }

    /// Weighted sum of the breakdown, neutral for missing metrics, clipped to [0, 1].
    pub fn composite(&self, b: &QualityBreakdown) -> f32 {
        let w = &self.weights;
        let parts = [
            (b.size, w.size),
            (b.sharpness, w.sharpness),
            (b.brightness, w.brightness),
            (b.contrast, w.contrast),
            (b.symmetry, w.symmetry),
            (b.pose, w.pose),
            (b.noise, w.noise),
        ];
        parts
            .iter()
            .map(|(score, weight)| score.unwrap_or(NEUTRAL_SCORE) * weight)
            .sum::<f32>()
            .clamp(0.0, 1.0)
    }
}

fn size_score(face_area: f32, image_area: f32) -> Option<f32> {
    if image_area <= 0.0 {
        return None;
    }
    Some((face_area / image_area * SIZE_RATIO_GAIN).min(1.0))
}

fn sharpness_score(crop: &Crop) -> Option<f32> {
    if crop.is_empty() {
        return None;
    }
    let var = filters::variance(&filters::laplacian(crop))?;
    Some((var / SHARPNESS_NORM).min(1.0))
}

fn brightness_score(crop: &Crop) -> Option<f32> {
    let mean = filters::mean(&crop.data)?;
    Some((1.0 - (mean - OPTIMAL_MIDTONE).abs() / OPTIMAL_MIDTONE).max(0.0))
}

fn contrast_score(crop: &Crop) -> Option<f32> {
    let std = filters::std_dev(&crop.data)?;
    Some((std / CONTRAST_NORM).min(1.0))
}

fn symmetry_score(landmarks: &[(f32, f32)]) -> Option<f32> {
    let left = landmarks.get(LEFT_EYE)?;
    let right = landmarks.get(RIGHT_EYE)?;
    let diff = (left.1 - right.1).abs();
    Some(1.0 - (diff / SYMMETRY_SPAN_PX).min(1.0))
}

fn pose_score(landmarks: &[(f32, f32)]) -> Option<f32> {
    let left = landmarks.get(LEFT_EYE)?;
    let right = landmarks.get(RIGHT_EYE)?;
    let nose = landmarks.get(NOSE)?;
    let eye_center_x = (left.0 + right.0) / 2.0;
    let offset = (nose.0 - eye_center_x).abs();
    Some(1.0 - (offset / POSE_SPAN_PX).min(1.0))
}

fn noise_score(crop: &Crop) -> Option<f32> {
    if crop.is_empty() {
        return None;
    }
    let level = filters::mean(&filters::sobel_magnitude(crop))?;
    Some(1.0 - (level / NOISE_NORM).min(1.0))
}
