//! Recognition and enrollment over detector output.
//!
//! Per face: quality gate, metadata fusion, gallery match. The detector
//! itself is external; callers hand in its faces alongside the image they
//! came from.

use crate::bundle::ModelBundle;
use crate::fusion::{self, Attributes, MetadataContext};
use image::DynamicImage;
use portrait_core::{
    BoundingBox, DetectedFace, Embedding, EnrollmentSnapshot, Gallery, GalleryError, Pose,
    QualityScore, QualityScorer,
};
use portrait_meta::MetadataEncoder;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face to enroll")]
    NoFace,
    #[error("face quality {score:.3} is below the enrollment minimum {min:.3}")]
    LowQuality { score: f32, min: f32 },
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub match_threshold: f32,
    pub min_enroll_quality: f32,
    pub min_recognize_quality: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.55,
            min_enroll_quality: 0.3,
            min_recognize_quality: 0.0,
        }
    }
}

/// Per-face recognition output. Detector fields pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedFace {
    /// Box plus the detector's confidence.
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<(f32, f32)>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<Pose>,
    /// Accepted identity, if any.
    pub identity: Option<String>,
    /// Best gallery score; `None` when the face was gated out before matching.
    pub score: Option<f32>,
    pub quality: QualityScore,
    pub raw: Attributes,
    pub corrected: Attributes,
}

impl RecognizedFace {
    pub fn gated(&self) -> bool {
        self.score.is_none()
    }
}

/// What an enrollment stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollOutcome {
    pub face_index: usize,
    pub quality: QualityScore,
    /// Present only when capture metadata was supplied.
    pub snapshot: Option<EnrollmentSnapshot>,
}

pub struct Pipeline {
    encoder: MetadataEncoder,
    scorer: QualityScorer,
    bundle: ModelBundle,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(encoder: MetadataEncoder, bundle: ModelBundle, config: PipelineConfig) -> Self {
        Self { encoder, scorer: QualityScorer::default(), bundle, config }
    }

    /// A pipeline without trained models: attributes pass through unchanged.
    pub fn without_models(encoder: MetadataEncoder, config: PipelineConfig) -> Self {
        let bundle = ModelBundle::empty(encoder.schema());
        Self::new(encoder, bundle, config)
    }

    pub fn with_scorer(mut self, scorer: QualityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn recognize(
        &self,
        gallery: &Gallery,
        image: &DynamicImage,
        faces: &[DetectedFace],
        metadata: &Value,
    ) -> Vec<RecognizedFace> {
        let ctx = MetadataContext::new(&self.encoder, metadata);
        let gray = image.to_luma8();

        faces
            .iter()
            .enumerate()
            .map(|(i, face)| {
                let quality = self.scorer.score(&gray, &face.bbox, face.landmarks());
                let raw = Attributes::from_face(face, Some(quality.value));
                let corrected = fusion::correct(&self.bundle, &raw, &ctx);

                let (identity, score) = if quality.value < self.config.min_recognize_quality {
                    tracing::debug!(
                        face = i,
                        quality = quality.value,
                        min = self.config.min_recognize_quality,
                        "face below recognition quality, not matched"
                    );
                    (None, None)
                } else {
                    let m = gallery.match_embedding(&face.embedding, self.config.match_threshold);
                    tracing::debug!(face = i, name = ?m.name, score = m.score, "matched face");
                    (m.name, Some(m.score))
                };

                RecognizedFace {
                    bbox: face.bbox,
                    embedding: face.embedding.clone(),
                    landmarks: face.landmarks.clone(),
                    pose: face.pose,
                    identity,
                    score,
                    quality,
                    raw,
                    corrected,
                }
            })
            .collect()
    }

    /// Enroll the largest face in `faces` under `name`.
    ///
    /// An enrollment snapshot is stored only when capture metadata is given;
    /// without it the person gains an embedding and nothing else.
    pub fn enroll(
        &self,
        gallery: &mut Gallery,
        name: &str,
        image: &DynamicImage,
        faces: &[DetectedFace],
        metadata: Option<&Value>,
        source: Option<&str>,
    ) -> Result<EnrollOutcome, PipelineError> {
        let (face_index, face) = largest_face(faces).ok_or(PipelineError::NoFace)?;

        let quality = self.scorer.score_image(image, &face.bbox, face.landmarks());
        if quality.value < self.config.min_enroll_quality {
            tracing::warn!(
                name,
                quality = quality.value,
                min = self.config.min_enroll_quality,
                "rejected low quality enrollment"
            );
            return Err(PipelineError::LowQuality {
                score: quality.value,
                min: self.config.min_enroll_quality,
            });
        }

        let snapshot = metadata.map(|metadata| {
            let ctx = MetadataContext::new(&self.encoder, metadata);
            let corrected = fusion::correct(&self.bundle, &Attributes::from_face(face, None), &ctx);
            EnrollmentSnapshot {
                age: corrected.age,
                gender: corrected.gender,
                quality_score: Some(quality.value),
                source_image: source.map(str::to_string),
                ..Default::default()
            }
        });

        gallery.add(name, face.embedding.clone(), snapshot.clone())?;
        tracing::info!(
            name,
            quality = quality.value,
            embeddings = gallery.embedding_count(name),
            "enrolled face"
        );
        Ok(EnrollOutcome { face_index, quality, snapshot })
    }
}

/// Largest bounding box by area; the first wins ties.
fn largest_face(faces: &[DetectedFace]) -> Option<(usize, &DetectedFace)> {
    faces
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, &DetectedFace)>, (i, f)| match best {
            Some((_, b)) if b.bbox.area() >= f.bbox.area() => best,
            _ => Some((i, f)),
        })
}
