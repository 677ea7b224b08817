//! Persisted model bundle: attribute models, bias tables, feature weights.
//!
//! A bundle is built once by training and replaced wholesale by the next
//! run. It is tied to the feature schema it was trained against; loading
//! against a different schema fails instead of silently misreading features.

use crate::bias::BiasTables;
use crate::forest::{RandomForestClassifier, RandomForestRegressor};
use chrono::{DateTime, Utc};
use portrait_core::persist::write_atomic;
use portrait_meta::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("bundle io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle format: {0}")]
    Format(#[from] serde_json::Error),
    #[error("unsupported bundle format version {0}")]
    UnsupportedVersion(u32),
    #[error(
        "bundle was trained against schema v{bundle_version} ({bundle_fingerprint}), \
         active schema is v{active_version} ({active_fingerprint})"
    )]
    SchemaMismatch {
        bundle_version: u32,
        bundle_fingerprint: String,
        active_version: u32,
        active_fingerprint: String,
    },
    #[error("{0} model is corrupt")]
    CorruptModel(&'static str),
}

/// Relative importance of each metadata sub-vector, recorded with the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub age: f32,
    pub gender: f32,
    pub location: f32,
    pub temporal: f32,
    pub technical: f32,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            age: 0.3,
            gender: 0.25,
            location: 0.2,
            temporal: 0.15,
            technical: 0.1,
        }
    }
}

/// Labelled examples each model was fit on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCounts {
    pub age: usize,
    pub gender: usize,
    pub quality: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub schema_version: u32,
    pub schema_fingerprint: String,
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub weights: FeatureWeights,
    #[serde(default)]
    pub age_model: Option<RandomForestRegressor>,
    #[serde(default)]
    pub gender_model: Option<RandomForestClassifier>,
    #[serde(default)]
    pub quality_model: Option<RandomForestRegressor>,
    #[serde(default)]
    pub bias: BiasTables,
    #[serde(default)]
    pub samples: SampleCounts,
}

impl ModelBundle {
    /// An untrained bundle for `schema`: every attribute passes through.
    pub fn empty(schema: &FeatureSchema) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            schema_version: schema.version,
            schema_fingerprint: schema.fingerprint(),
            trained_at: Utc::now(),
            weights: FeatureWeights::default(),
            age_model: None,
            gender_model: None,
            quality_model: None,
            bias: BiasTables::default(),
            samples: SampleCounts::default(),
        }
    }

    pub fn has_models(&self) -> bool {
        self.age_model.is_some() || self.gender_model.is_some() || self.quality_model.is_some()
    }

    pub fn save(&self, path: &Path) -> Result<(), BundleError> {
        write_atomic(path, &serde_json::to_vec(self)?)?;
        tracing::info!(
            path = %path.display(),
            age = self.age_model.is_some(),
            gender = self.gender_model.is_some(),
            quality = self.quality_model.is_some(),
            "saved model bundle"
        );
        Ok(())
    }

    /// Load and validate a bundle against the active schema.
    pub fn load(path: &Path, schema: &FeatureSchema) -> Result<Self, BundleError> {
        let bundle = Self::from_slice(&std::fs::read(path)?, schema)?;
        tracing::info!(
            path = %path.display(),
            trained_at = %bundle.trained_at,
            schema_version = bundle.schema_version,
            "loaded model bundle"
        );
        Ok(bundle)
    }

    pub fn from_slice(bytes: &[u8], schema: &FeatureSchema) -> Result<Self, BundleError> {
        let bundle: ModelBundle = serde_json::from_slice(bytes)?;
        bundle.validate(schema)?;
        Ok(bundle)
    }

    fn validate(&self, schema: &FeatureSchema) -> Result<(), BundleError> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(BundleError::UnsupportedVersion(self.format_version));
        }
        let fingerprint = schema.fingerprint();
        if self.schema_version != schema.version || self.schema_fingerprint != fingerprint {
            return Err(BundleError::SchemaMismatch {
                bundle_version: self.schema_version,
                bundle_fingerprint: self.schema_fingerprint.clone(),
                active_version: schema.version,
                active_fingerprint: fingerprint,
            });
        }

        let width = schema.feature_len();
        let regressor_ok = |m: &Option<RandomForestRegressor>| {
            m.as_ref().map_or(true, |m| m.n_features == width && m.is_well_formed())
        };
        if !regressor_ok(&self.age_model) {
            return Err(BundleError::CorruptModel("age"));
        }
        if !regressor_ok(&self.quality_model) {
            return Err(BundleError::CorruptModel("quality"));
        }
        if let Some(m) = &self.gender_model {
            if m.n_features != width || !m.is_well_formed() {
                return Err(BundleError::CorruptModel("gender"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::Tree;

    fn schema() -> &'static FeatureSchema {
        FeatureSchema::builtin()
    }

    fn sample_bundle() -> ModelBundle {
        let mut bundle = ModelBundle::empty(schema());
        bundle.age_model = Some(RandomForestRegressor::from_trees(57, vec![Tree::leaf(vec![33.0])]));
        bundle.bias.location_age.insert("Japan".into(), 48.0);
        bundle.bias.hour_female_ratio.insert(21, 0.7);
        bundle.samples.age = 12;
        bundle
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/bundle.json");
        let bundle = sample_bundle();
        bundle.save(&path).unwrap();

        let loaded = ModelBundle::load(&path, schema()).unwrap();
        assert_eq!(loaded, bundle);
        assert!(loaded.has_models());
        assert_eq!(loaded.weights, FeatureWeights::default());
    }

    #[test]
    fn test_resave_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        sample_bundle().save(&path).unwrap();

        let smaller = ModelBundle::empty(schema());
        smaller.save(&path).unwrap();
        assert_eq!(ModelBundle::load(&path, schema()).unwrap(), smaller);
        assert!(!dir.path().join("bundle.json.tmp").exists());
    }

    #[test]
    fn test_schema_mismatch() {
        let bytes = serde_json::to_vec(&sample_bundle()).unwrap();
        let mut other = schema().clone();
        other.countries.push("Brazil".into());
        assert!(matches!(
            ModelBundle::from_slice(&bytes, &other),
            Err(BundleError::SchemaMismatch { bundle_version: 1, active_version: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_width_model() {
        let mut bundle = sample_bundle();
        bundle.quality_model = Some(RandomForestRegressor::from_trees(12, vec![Tree::leaf(vec![0.5])]));
        let bytes = serde_json::to_vec(&bundle).unwrap();
        assert!(matches!(
            ModelBundle::from_slice(&bytes, schema()),
            Err(BundleError::CorruptModel("quality"))
        ));
    }

    #[test]
    fn test_load_failures_surface() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.json");
        assert!(matches!(ModelBundle::load(&missing, schema()), Err(BundleError::Io(_))));

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"{\"format_version\": 1").unwrap();
        assert!(matches!(ModelBundle::load(&corrupt, schema()), Err(BundleError::Format(_))));
    }

    #[test]
    fn test_empty_bundle_has_no_models() {
        let bundle = ModelBundle::empty(schema());
        assert!(!bundle.has_models());
        assert_eq!(bundle.schema_fingerprint.len(), 64);
    }
}
