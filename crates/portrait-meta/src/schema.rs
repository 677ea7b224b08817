//! Versioned feature schema.
//!
//! The closed one-hot vocabularies (countries, camera brands) live here and
//! nowhere else. The built-in v1 schema is embedded at compile time from
//! `contrib/schema/v1.toml`; alternative schemas load from TOML files of the
//! same shape. Trained bundles record the schema fingerprint they were fit
//! against.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Compile-time embedded v1 vocabulary.
const SCHEMA_V1: &str = include_str!("../../../contrib/schema/v1.toml");

/// Age groups, in one-hot order.
pub const AGE_GROUPS: [&str; 5] = ["child", "teen", "young_adult", "adult", "senior"];
/// Seasons, in one-hot order.
pub const SEASONS: [&str; 4] = ["spring", "summer", "autumn", "winter"];

// Fixed segment widths.
const DEMOGRAPHIC_LEN: usize = 1 + 2 + AGE_GROUPS.len();
const LOCATION_FIXED_LEN: usize = 3;
const TEMPORAL_LEN: usize = 1 + 7 + 12 + SEASONS.len();
const TECHNICAL_FIXED_LEN: usize = 1 + 3;

static BUILTIN: OnceLock<FeatureSchema> = OnceLock::new();

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad schema TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// Vocabulary tables that shape the feature vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub countries: Vec<String>,
    pub cameras: Vec<String>,
}

/// Start offsets and widths of the four sub-vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub demographic: std::ops::Range<usize>,
    pub location: std::ops::Range<usize>,
    pub temporal: std::ops::Range<usize>,
    pub technical: std::ops::Range<usize>,
}

impl FeatureSchema {
    /// The v1 schema every bundle trained so far was fit against.
    pub fn builtin() -> &'static FeatureSchema {
        BUILTIN.get_or_init(|| match Self::from_toml(SCHEMA_V1) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::error!(error = %e, "bad embedded v1 schema TOML");
                FeatureSchema { version: 1, countries: Vec::new(), cameras: Vec::new() }
            }
        })
    }

    pub fn from_toml(src: &str) -> Result<Self, SchemaError> {
        let schema: FeatureSchema = toml::from_str(src)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let schema = Self::from_toml(&std::fs::read_to_string(path)?)?;
        tracing::info!(
            path = %path.display(),
            version = schema.version,
            len = schema.feature_len(),
            "loaded feature schema"
        );
        Ok(schema)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        for (name, vocab) in [("countries", &self.countries), ("cameras", &self.cameras)] {
            if vocab.iter().any(String::is_empty) {
                return Err(SchemaError::Invalid(format!("empty entry in {name}")));
            }
            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = vocab.iter().find(|v| !seen.insert(v.as_str())) {
                return Err(SchemaError::Invalid(format!("duplicate {dup:?} in {name}")));
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        let demographic = 0..DEMOGRAPHIC_LEN;
        let location = demographic.end..demographic.end + LOCATION_FIXED_LEN + self.countries.len();
        let temporal = location.end..location.end + TEMPORAL_LEN;
        let technical = temporal.end..temporal.end + TECHNICAL_FIXED_LEN + self.cameras.len();
        Layout { demographic, location, temporal, technical }
    }

    /// Total encoded length (57 for v1).
    pub fn feature_len(&self) -> usize {
        self.layout().technical.end
    }

    /// SHA-256 over the version and both vocabularies, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("v{}\n", self.version));
        for (name, vocab) in [("countries", &self.countries), ("cameras", &self.cameras)] {
            hasher.update(name);
            for entry in vocab {
                hasher.update([0x1fu8]);
                hasher.update(entry);
            }
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_57_wide() {
        let schema = FeatureSchema::builtin();
        assert_eq!(schema.feature_len(), 57);
        let layout = schema.layout();
        assert_eq!(layout.demographic, 0..8);
        assert_eq!(layout.location, 8..21);
        assert_eq!(layout.temporal, 21..45);
        assert_eq!(layout.technical, 45..57);
    }

    #[test]
    fn test_builtin_parses_embedded_table() {
        let parsed = FeatureSchema::from_toml(SCHEMA_V1).unwrap();
        assert_eq!(&parsed, FeatureSchema::builtin());
        let schema = FeatureSchema::builtin();
        assert_eq!(schema.version, 1);
        assert_eq!(schema.countries.len(), 10);
        assert_eq!(schema.countries.first().map(String::as_str), Some("Germany"));
        assert_eq!(schema.countries.last().map(String::as_str), Some("Australia"));
        assert_eq!(schema.cameras.len(), 8);
        assert_eq!(schema.cameras.first().map(String::as_str), Some("iPhone"));
        assert_eq!(schema.cameras.last().map(String::as_str), Some("Xiaomi"));
    }

    #[test]
    fn test_fingerprint_tracks_vocabulary() {
        let mut other = FeatureSchema::builtin().clone();
        other.cameras.push("Fujifilm".into());
        assert_ne!(other.fingerprint(), FeatureSchema::builtin().fingerprint());
        assert_eq!(other.feature_len(), 58);
        assert_eq!(FeatureSchema::builtin().fingerprint().len(), 64);
    }

    #[test]
    fn test_rejects_duplicates_and_empties() {
        let dup = "version = 2\ncountries = [\"UK\", \"UK\"]\ncameras = []\n";
        assert!(matches!(FeatureSchema::from_toml(dup), Err(SchemaError::Invalid(_))));
        let empty = "version = 2\ncountries = [\"\"]\ncameras = []\n";
        assert!(matches!(FeatureSchema::from_toml(empty), Err(SchemaError::Invalid(_))));
        assert!(matches!(FeatureSchema::from_toml("version = "), Err(SchemaError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v2.toml");
        std::fs::write(&path, "version = 2\ncountries = [\"Austria\"]\ncameras = [\"Leica\"]\n").unwrap();
        let schema = FeatureSchema::load(&path).unwrap();
        assert_eq!(schema.version, 2);
        assert_eq!(schema.feature_len(), 8 + 4 + 24 + 5);
    }
}
