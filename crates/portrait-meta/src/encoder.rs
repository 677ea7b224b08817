//! Metadata feature encoder.
//!
//! Concatenates four sub-vectors (demographic, location, temporal,
//! technical) into one fixed-length vector. Encoding is a pure function of
//! the metadata and the schema: the same input always yields the same
//! vector, and every absent field takes its documented default.

use crate::metadata::CaptureMetadata;
use crate::schema::{FeatureSchema, AGE_GROUPS, SEASONS};
use portrait_core::Gender;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Normalizers ---
const AGE_SCALE: f64 = 100.0;
const LAT_SCALE: f64 = 90.0;
const LON_SCALE: f64 = 180.0;
const ALTITUDE_SCALE: f64 = 8848.0; // Mount Everest
const HOURS_PER_DAY: f64 = 24.0;
const FOCAL_SCALE: f64 = 200.0;
const ISO_SCALE: f64 = 6400.0;
const F_NUMBER_SCALE: f64 = 22.0;

// --- Defaults for absent fields ---
const DEFAULT_AGE: f64 = 30.0;
const DEFAULT_QUALITY: f64 = 0.5;
const DEFAULT_HOUR_FEATURE: f32 = 0.5;
const DEFAULT_FOCAL_FEATURE: f32 = 0.25; // 50mm
const DEFAULT_ISO_FEATURE: f32 = 0.015625; // ISO 100
const DEFAULT_F_NUMBER_FEATURE: f32 = 0.127; // f/2.8

/// Encoded metadata, `schema.feature_len()` values long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MetadataEncoder {
    schema: FeatureSchema,
}

impl Default for MetadataEncoder {
    fn default() -> Self {
        Self::new(FeatureSchema::builtin().clone())
    }
}

impl MetadataEncoder {
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Normalize and encode raw JSON metadata.
    pub fn encode(&self, raw: &Value) -> FeatureVector {
        self.encode_metadata(&CaptureMetadata::from_json(raw))
    }

    pub fn encode_metadata(&self, m: &CaptureMetadata) -> FeatureVector {
        let mut values = Vec::with_capacity(self.schema.feature_len());
        self.demographic(m, &mut values);
        self.location(m, &mut values);
        self.temporal(m, &mut values);
        self.technical(m, &mut values);
        debug_assert_eq!(values.len(), self.schema.feature_len());
        FeatureVector { values }
    }

    fn demographic(&self, m: &CaptureMetadata, out: &mut Vec<f32>) {
        let age = m.age.unwrap_or(DEFAULT_AGE);
        out.push((age / AGE_SCALE).min(1.0) as f32);

        out.extend(match m.gender {
            Some(Gender::Male) => [1.0, 0.0],
            Some(Gender::Female) => [0.0, 1.0],
            None => [0.0, 0.0],
        });

        let group = age_group(age.trunc() as u32);
        out.extend(AGE_GROUPS.iter().map(|g| one_hot(*g == group)));
    }

    fn location(&self, m: &CaptureMetadata, out: &mut Vec<f32>) {
        match m.gps {
            Some(gps) => out.extend([(gps.lat / LAT_SCALE) as f32, (gps.lon / LON_SCALE) as f32]),
            None => out.extend([0.0, 0.0]),
        }
        out.push(m.altitude.map_or(0.0, |a| (a / ALTITUDE_SCALE).min(1.0) as f32));

        let country = m.country.as_deref();
        out.extend(self.schema.countries.iter().map(|c| one_hot(Some(c.as_str()) == country)));
    }

    fn temporal(&self, m: &CaptureMetadata, out: &mut Vec<f32>) {
        let (Some(hour), Some(weekday), Some(month)) = (m.hour(), m.weekday(), m.month()) else {
            out.push(DEFAULT_HOUR_FEATURE);
            out.extend([0.0; 7 + 12 + SEASONS.len()]);
            return;
        };

        out.push((hour as f64 / HOURS_PER_DAY) as f32);
        out.extend((0..7).map(|d| one_hot(d == weekday)));
        out.extend((1..=12).map(|mo| one_hot(mo == month)));
        let season = season(month);
        out.extend(SEASONS.iter().map(|s| one_hot(*s == season)));
    }

    fn technical(&self, m: &CaptureMetadata, out: &mut Vec<f32>) {
        out.push(m.image_quality.unwrap_or(DEFAULT_QUALITY).clamp(0.0, 1.0) as f32);

        let camera = m.camera_model.as_deref().unwrap_or("");
        out.extend(
            self.schema
                .cameras
                .iter()
                .map(|c| one_hot(!camera.is_empty() && camera.contains(c.as_str()))),
        );

        out.push(m.focal_length.map_or(DEFAULT_FOCAL_FEATURE, |f| (f / FOCAL_SCALE).min(1.0) as f32));
        out.push(m.iso.map_or(DEFAULT_ISO_FEATURE, |i| (i / ISO_SCALE).min(1.0) as f32));
        out.push(m.f_number.map_or(DEFAULT_F_NUMBER_FEATURE, |f| (f / F_NUMBER_SCALE).min(1.0) as f32));
    }
}

fn one_hot(hit: bool) -> f32 {
    if hit { 1.0 } else { 0.0 }
}

pub fn age_group(age: u32) -> &'static str {
    match age {
        0..=12 => "child",
        13..=19 => "teen",
        20..=29 => "young_adult",
        30..=49 => "adult",
        _ => "senior",
    }
}

pub fn season(month: u32) -> &'static str {
    match month {
        3..=5 => "spring",
        6..=8 => "summer",
        9..=11 => "autumn",
        _ => "winter",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len(), "length");
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < 1e-6, "index {i}: got {a}, expected {e}");
        }
    }

    #[test]
    fn test_empty_metadata_default_vector() {
        let enc = MetadataEncoder::default();
        let v = enc.encode(&json!({}));
        assert_eq!(v.len(), 57);

        let layout = enc.schema().layout();
        assert_close(&v.values[layout.demographic], &[0.3, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_close(&v.values[layout.location], &[0.0; 13]);
        let mut temporal = vec![0.0; 24];
        temporal[0] = 0.5;
        assert_close(&v.values[layout.temporal], &temporal);
        let mut technical = vec![0.0; 12];
        technical[0] = 0.5;
        technical[9] = 0.25;
        technical[10] = 0.015625;
        technical[11] = 0.127;
        assert_close(&v.values[layout.technical], &technical);
    }

    #[test]
    fn test_always_57_long() {
        let enc = MetadataEncoder::default();
        for raw in [
            json!(null),
            json!("metadata"),
            json!({"age": "x", "gps": 5, "datetime": 12}),
            json!({"camera_model": "iPhone 14 Pro", "location": {"country": "Atlantis"}}),
        ] {
            assert_eq!(enc.encode(&raw).len(), 57, "{raw}");
        }
    }

    #[test]
    fn test_deterministic() {
        let enc = MetadataEncoder::default();
        let raw = json!({"age": 27, "gender": "male", "datetime": "2022-12-24 20:15:00"});
        assert_eq!(enc.encode(&raw), enc.encode(&raw));
    }

    #[test]
    fn test_full_record_encoding() {
        let enc = MetadataEncoder::default();
        let v = enc.encode(&json!({
            "age": 150,
            "gender": "female",
            "gps": {"lat": 45.0, "lon": -90.0, "altitude": 10000},
            "location": {"country": "Japan"},
            "datetime": "2023:07:15 18:00:00",
            "image_quality": 1.7,
            "camera_model": "Sony ILCE with Canon adapter",
            "focal_length": 400,
            "iso": 3200,
            "f_number": 11
        }));
        let layout = enc.schema().layout();

        assert_close(&v.values[layout.demographic], &[1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);

        let loc = &v.values[layout.location];
        assert_close(&loc[..3], &[0.5, -0.5, 1.0]);
        assert_eq!(loc[3 + 3], 1.0); // Japan
        assert_eq!(loc[3..].iter().sum::<f32>(), 1.0);

        let t = &v.values[layout.temporal];
        assert!((t[0] - 0.75).abs() < 1e-6);
        assert_eq!(t[1 + 5], 1.0); // Saturday
        assert_eq!(t[8 + 6], 1.0); // July
        assert_eq!(t[20 + 1], 1.0); // summer
        assert_eq!(t.iter().skip(1).sum::<f32>(), 3.0);

        let tech = &v.values[layout.technical];
        assert_eq!(tech[0], 1.0);
        assert_close(&tech[1..9], &[0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_close(&tech[9..], &[1.0, 0.5, 0.5]);
    }

    #[test]
    fn test_age_groups_and_seasons() {
        assert_eq!(age_group(12), "child");
        assert_eq!(age_group(13), "teen");
        assert_eq!(age_group(29), "young_adult");
        assert_eq!(age_group(30), "adult");
        assert_eq!(age_group(50), "senior");
        assert_eq!(season(2), "winter");
        assert_eq!(season(12), "winter");
        assert_eq!(season(9), "autumn");
    }

    #[test]
    fn test_unknown_gender_and_country_are_zero() {
        let enc = MetadataEncoder::default();
        let v = enc.encode(&json!({"gender": "unknown", "location": {"country": "germany"}}));
        let layout = enc.schema().layout();
        assert!(v.values[1..3].iter().all(|&x| x == 0.0));
        assert!(v.values[layout.location].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_custom_schema_changes_width() {
        let schema = FeatureSchema::from_toml(
            "version = 2\ncountries = [\"Austria\"]\ncameras = [\"Leica\", \"Fujifilm\"]\n",
        )
        .unwrap();
        let enc = MetadataEncoder::new(schema);
        let v = enc.encode(&json!({"camera_model": "Leica M11", "location": {"country": "Austria"}}));
        assert_eq!(v.len(), 8 + 4 + 24 + 6);
        let layout = enc.schema().layout();
        assert_eq!(v.values[layout.location][3], 1.0);
        assert_eq!(v.values[layout.technical][1], 1.0);
    }
}
