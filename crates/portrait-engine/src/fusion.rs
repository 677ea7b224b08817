//! Fusion of detector attributes with metadata-model predictions.
//!
//! Order of application: age blend, location nudge, gender override, hour
//! flip, quality replacement. Every rule whose model or bias bucket is absent
//! leaves its attribute untouched.

use crate::bundle::ModelBundle;
use portrait_core::{DetectedFace, Gender};
use portrait_meta::{CaptureMetadata, FeatureVector, MetadataEncoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DETECTOR_AGE_WEIGHT: f64 = 0.7;
const MODEL_AGE_WEIGHT: f64 = 0.3;
const LOCATION_KEEP_WEIGHT: f64 = 0.9;
const LOCATION_BIAS_WEIGHT: f64 = 0.1;
/// Strictly greater-than.
pub const GENDER_OVERRIDE_CONFIDENCE: f32 = 0.8;
const HOUR_FEMALE_HIGH: f64 = 0.6;
const HOUR_FEMALE_LOW: f64 = 0.4;

/// Attributes of one face, before or after correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub quality: Option<f32>,
}

impl Attributes {
    pub fn from_face(face: &DetectedFace, quality: Option<f32>) -> Self {
        Self { age: face.age, gender: face.gender, quality }
    }
}

/// Normalized metadata of a capture together with its encoded features.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataContext {
    pub metadata: CaptureMetadata,
    pub features: FeatureVector,
}

impl MetadataContext {
    pub fn new(encoder: &MetadataEncoder, raw: &Value) -> Self {
        let metadata = CaptureMetadata::from_json(raw);
        let features = encoder.encode_metadata(&metadata);
        Self { metadata, features }
    }
}

/// Correct raw detector attributes using the bundle's models and bias tables.
pub fn correct(bundle: &ModelBundle, raw: &Attributes, ctx: &MetadataContext) -> Attributes {
    let x = ctx.features.as_slice();
    let mut out = *raw;

    if let Some(model) = &bundle.age_model {
        let predicted = model.predict(x) as f64;
        out.age = Some(truncate_age(match raw.age {
            Some(detected) => DETECTOR_AGE_WEIGHT * detected as f64 + MODEL_AGE_WEIGHT * predicted,
            None => predicted,
        }));
    }

    if let (Some(age), Some(bias)) = (out.age, bundle.bias.location_age(ctx.metadata.country.as_deref())) {
        out.age = Some(truncate_age(LOCATION_KEEP_WEIGHT * age as f64 + LOCATION_BIAS_WEIGHT * bias));
    }

    if let (Some(model), Some(_)) = (&bundle.gender_model, out.gender) {
        if let Some(prediction) = model.predict(x) {
            match Gender::from_label(&prediction.label) {
                Some(g) if prediction.confidence > GENDER_OVERRIDE_CONFIDENCE => out.gender = Some(g),
                _ => {}
            }
        }
    }

    if let Some(ratio) = bundle.bias.hour_female_ratio(ctx.metadata.hour()) {
        out.gender = match out.gender {
            Some(Gender::Male) if ratio > HOUR_FEMALE_HIGH => Some(Gender::Female),
            Some(Gender::Female) if ratio < HOUR_FEMALE_LOW => Some(Gender::Male),
            other => other,
        };
    }

    if let Some(model) = &bundle.quality_model {
        out.quality = Some(model.predict(x).clamp(0.0, 1.0));
    }

    if out != *raw {
        tracing::debug!(?raw, corrected = ?out, "fused attributes");
    }
    out
}

/// Integer truncation toward zero; negative ages saturate at 0.
fn truncate_age(age: f64) -> u32 {
    age.trunc() as u32
}
