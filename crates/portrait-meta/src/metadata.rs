//! Normalization of raw capture metadata into a typed record.
//!
//! Raw metadata arrives as loosely-typed JSON (EXIF extraction, annotation
//! tools, hand-written corpora). Every field is validated exactly once here;
//! anything missing, wrong-typed or out of range becomes `None` and the
//! encoder substitutes its default.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use portrait_core::Gender;
use serde_json::Value;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y:%m:%d %H:%M:%S%.f", // EXIF DateTimeOriginal
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// GPS position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPosition {
    pub lat: f64,
    pub lon: f64,
}

/// Capture metadata after validation. All fields optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureMetadata {
    /// Age in years, non-negative.
    pub age: Option<f64>,
    pub gender: Option<Gender>,
    pub gps: Option<GpsPosition>,
    pub altitude: Option<f64>,
    pub country: Option<String>,
    /// Not encoded; used for corpus statistics.
    pub city: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    pub image_quality: Option<f64>,
    pub camera_model: Option<String>,
    pub focal_length: Option<f64>,
    pub iso: Option<f64>,
    pub f_number: Option<f64>,
}

impl CaptureMetadata {
    /// Normalize a raw metadata object. Never fails; a non-object yields an empty record.
    pub fn from_json(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::default();
        };

        let gps = obj.get("gps").and_then(Value::as_object);
        let location = obj.get("location").and_then(Value::as_object);

        Self {
            age: obj.get("age").and_then(present_number).filter(|a| *a >= 0.0),
            gender: obj.get("gender").and_then(Value::as_str).and_then(Gender::from_label),
            gps: gps.and_then(|g| {
                let lat = g.get("lat").map_or(Some(0.0), number_or_zero)?;
                let lon = g.get("lon").map_or(Some(0.0), number_or_zero)?;
                (lat.abs() <= 90.0 && lon.abs() <= 180.0).then_some(GpsPosition { lat, lon })
            }),
            altitude: gps.and_then(|g| g.get("altitude")).and_then(number_or_zero),
            country: location
                .and_then(|l| l.get("country"))
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            city: location
                .and_then(|l| l.get("city"))
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            datetime: obj.get("datetime").and_then(Value::as_str).and_then(parse_datetime),
            image_quality: obj.get("image_quality").and_then(present_number),
            camera_model: obj
                .get("camera_model")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            focal_length: obj.get("focal_length").and_then(present_number).filter(|f| *f > 0.0),
            iso: obj.get("iso").and_then(present_number).filter(|i| *i > 0.0),
            f_number: obj.get("f_number").and_then(present_number).filter(|f| *f > 0.0),
        }
    }

    pub fn hour(&self) -> Option<u32> {
        self.datetime.map(|dt| dt.hour())
    }

    /// Weekday index with Monday = 0.
    pub fn weekday(&self) -> Option<u32> {
        self.datetime.map(|dt| dt.weekday().num_days_from_monday())
    }

    pub fn month(&self) -> Option<u32> {
        self.datetime.map(|dt| dt.month())
    }
}

/// Parse the datetime spellings found in photo metadata.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// A finite number given as a JSON number or numeric string.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Like [`number`], but `null` and zero count as zero rather than invalid.
fn number_or_zero(v: &Value) -> Option<f64> {
    if v.is_null() {
        return Some(0.0);
    }
    number(v)
}

/// Like [`number`], but zero counts as absent.
fn present_number(v: &Value) -> Option<f64> {
    number(v).filter(|n| *n != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_object_is_empty() {
        assert_eq!(CaptureMetadata::from_json(&json!(null)), CaptureMetadata::default());
        assert_eq!(CaptureMetadata::from_json(&json!([1, 2])), CaptureMetadata::default());
    }

    #[test]
    fn test_full_record() {
        let m = CaptureMetadata::from_json(&json!({
            "age": "42",
            "gender": "female",
            "gps": {"lat": 48.1, "lon": 11.6, "altitude": 520},
            "location": {"country": "Germany", "city": "Munich"},
            "datetime": "2023:07:15 18:30:00",
            "image_quality": 0.8,
            "camera_model": "Canon EOS R5",
            "focal_length": 85,
            "iso": "400",
            "f_number": 1.8
        }));
        assert_eq!(m.age, Some(42.0));
        assert_eq!(m.gender, Some(Gender::Female));
        assert_eq!(m.gps, Some(GpsPosition { lat: 48.1, lon: 11.6 }));
        assert_eq!(m.altitude, Some(520.0));
        assert_eq!(m.country.as_deref(), Some("Germany"));
        assert_eq!(m.city.as_deref(), Some("Munich"));
        assert_eq!(m.hour(), Some(18));
        // 2023-07-15 was a Saturday.
        assert_eq!(m.weekday(), Some(5));
        assert_eq!(m.month(), Some(7));
        assert_eq!(m.iso, Some(400.0));
    }

    #[test]
    fn test_malformed_fields_become_none() {
        let m = CaptureMetadata::from_json(&json!({
            "age": "old",
            "gender": 1,
            "gps": {"lat": "north", "lon": 11.6},
            "location": "Germany",
            "datetime": "yesterday",
            "image_quality": [0.5],
            "camera_model": 42,
            "focal_length": -35,
            "iso": 0,
            "f_number": null
        }));
        assert_eq!(m, CaptureMetadata::default());
    }

    #[test]
    fn test_out_of_range() {
        let m = CaptureMetadata::from_json(&json!({
            "age": -3,
            "gps": {"lat": 123.0, "lon": 0.0},
        }));
        assert!(m.age.is_none());
        assert!(m.gps.is_none());
    }

    #[test]
    fn test_zero_age_is_missing() {
        let m = CaptureMetadata::from_json(&json!({"age": 0}));
        assert!(m.age.is_none());
    }

    #[test]
    fn test_gps_partial_defaults_to_zero() {
        let m = CaptureMetadata::from_json(&json!({"gps": {"lat": 45.0}}));
        assert_eq!(m.gps, Some(GpsPosition { lat: 45.0, lon: 0.0 }));
        assert!(m.altitude.is_none());
    }

    #[test]
    fn test_datetime_forms() {
        for s in [
            "2024:01:02 03:04:05",
            "2024-01-02 03:04:05",
            "2024-01-02T03:04:05",
            "2024-01-02T03:04:05.250",
            "2024-01-02T03:04:05+02:00",
        ] {
            let dt = parse_datetime(s).unwrap_or_else(|| panic!("failed to parse {s}"));
            assert_eq!(dt.hour(), 3, "{s}");
            assert_eq!(dt.day(), 2, "{s}");
        }
        assert_eq!(parse_datetime("2024-01-02").map(|d| d.hour()), Some(0));
        assert!(parse_datetime("").is_none());
        assert!(parse_datetime("2024-13-40 99:00:00").is_none());
    }
}
